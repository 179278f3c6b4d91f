//! Interactive REPL.

use crate::commands::{format_json, format_microstep, format_snapshot, parse_json_arg};
use colored::Colorize;
use harel_core::Event;
use harel_runtime::Interpreter;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use serde_json::Value;

const HELP_TEXT: &str = r#"
Available commands:
  help                      Show this help

  send <event> [data_json]  Send an event
  next                      List events the active states react to
  state                     Show status, configuration and context
  ctx                       Show the context
  services                  Number of running services and timers

  quit, exit                Cancel the instance and exit
"#;

pub async fn run(interpreter: Interpreter<Value>) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "harel REPL".bold().cyan());

    let (snapshot, _completion) = interpreter.start()?;
    for step in &snapshot.microsteps {
        println!("{}", format_microstep(step));
    }
    println!(
        "Started instance {} in {}",
        interpreter.id().cyan(),
        snapshot.configuration.to_string().yellow()
    );

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".harel_history"))
        .unwrap_or_else(|_| ".harel_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        let prompt = format!("{} ", "harel>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(&interpreter, line) {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break,
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);

    interpreter.cancel();
    println!("{}", "Instance cancelled.".dimmed());

    Ok(())
}

fn execute_repl_command(
    interpreter: &Interpreter<Value>,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.is_empty() {
        return Ok(Some(String::new()));
    }

    let cmd = parts[0].to_lowercase();
    let args = &parts[1..];

    match cmd.as_str() {
        "help" | "?" => Ok(Some(HELP_TEXT.to_string())),

        "quit" | "exit" | "q" => Ok(None),

        "send" | "s" => {
            if args.is_empty() {
                return Ok(Some("Usage: send <event> [data_json]".to_string()));
            }
            let data = if args.len() > 1 {
                parse_json_arg(&args[1..].join(" "))?
            } else {
                Value::Null
            };

            let snapshot = interpreter.send(Event::with_data(args[0], data))?;
            if snapshot.microsteps.is_empty() {
                return Ok(Some(format!(
                    "{} {} (no transition)",
                    args[0].cyan(),
                    "ignored".yellow()
                )));
            }
            let mut output: Vec<String> = snapshot.microsteps.iter().map(format_microstep).collect();
            output.push(format!(
                "{} {}",
                "Now in".green(),
                snapshot.configuration.to_string().yellow()
            ));
            if snapshot.status.is_terminal() {
                output.push(format!("Instance {}", snapshot.status.to_string().bold()));
            }
            Ok(Some(output.join("\n")))
        }

        "next" | "n" => {
            let events = interpreter.next_events();
            if events.is_empty() {
                Ok(Some("No events".yellow().to_string()))
            } else {
                Ok(Some(events.join(", ")))
            }
        }

        "state" | "st" => Ok(Some(format_snapshot(&interpreter.snapshot()))),

        "ctx" => Ok(Some(format_json(&interpreter.snapshot().context))),

        "services" => Ok(Some(format!(
            "{} running",
            interpreter.running_services()
        ))),

        _ => Ok(Some(format!(
            "Unknown command: {}. Type 'help' for help.",
            cmd
        ))),
    }
}
