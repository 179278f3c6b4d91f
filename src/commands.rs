//! Command execution.

use crate::Commands;
use colored::Colorize;
use harel_core::{ChartDefinition, Event, Microstep, ServiceError, ServiceRequest, StateTree};
use harel_runtime::{Config, Interpreter, ServiceRegistry, Snapshot};
use serde_json::Value;
use std::time::Duration;

/// Services available to charts run from the command line.
///
/// - `echo` succeeds with its input.
/// - `sleep` waits `input.ms` (or `input` as a number) milliseconds, then
///   succeeds with its input.
/// - `fail` fails with `input.message` (or `input` as a string).
pub fn builtin_services() -> ServiceRegistry {
    let mut registry = ServiceRegistry::new();
    registry
        .register("echo", |req: ServiceRequest| async move { Ok(req.input) })
        .register("sleep", |req: ServiceRequest| async move {
            let ServiceRequest { token, input } = req;
            let ms = input
                .get("ms")
                .and_then(Value::as_u64)
                .or_else(|| input.as_u64())
                .unwrap_or(1000);
            tokio::select! {
                _ = token.cancelled() => Err(ServiceError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(input),
            }
        })
        .register("fail", |req: ServiceRequest| async move {
            let message = req
                .input
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| req.input.as_str())
                .unwrap_or("service failed")
                .to_string();
            Err(ServiceError::Failed(message))
        });
    registry
}

/// Executes a one-shot command and returns the formatted output.
pub async fn execute(cmd: Commands, config: &Config) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        // Handled by the REPL module.
        Commands::Repl { .. } => unreachable!(),

        Commands::Validate { chart } => {
            let definition = load_chart(&chart)?;
            let tree = definition.build(&builtin_services())?;
            Ok(format!(
                "{} chart {} ({} states, checksum: {})\n{}",
                "Valid".green(),
                definition.id().cyan(),
                tree.len(),
                definition.checksum,
                format_tree(&tree)
            ))
        }

        Commands::Run {
            chart,
            events,
            ctx,
            trace,
            wait,
        } => {
            let interpreter = instantiate(&chart, ctx.as_deref(), config)?;
            let mut output = String::new();

            let (snapshot, completion) = interpreter.start()?;
            if trace {
                push_microsteps(&mut output, &snapshot.microsteps);
            }

            for name in events {
                if interpreter.status().is_terminal() {
                    output.push_str(&format!(
                        "{}: instance is {}, not sending {}\n",
                        "Warning".yellow(),
                        interpreter.status(),
                        name
                    ));
                    break;
                }
                let snapshot = interpreter.send(Event::named(name))?;
                if trace {
                    push_microsteps(&mut output, &snapshot.microsteps);
                }
            }

            if wait && !interpreter.status().is_terminal() {
                tokio::select! {
                    result = completion.wait() => {
                        result?;
                    }
                    _ = tokio::signal::ctrl_c() => {
                        interpreter.cancel();
                    }
                }
            }

            output.push_str(&format_snapshot(&interpreter.snapshot()));
            Ok(output)
        }
    }
}

/// Loads a chart, optionally replacing its context, and creates an instance.
pub fn instantiate(
    chart: &str,
    ctx: Option<&str>,
    config: &Config,
) -> Result<Interpreter<Value>, Box<dyn std::error::Error>> {
    let mut definition = load_chart(chart)?;
    if let Some(ctx) = ctx {
        let mut raw = definition.raw.clone();
        raw.context = parse_json_arg(ctx)?;
        definition = ChartDefinition::from_raw(raw)?;
    }
    Ok(Interpreter::from_definition(
        &definition,
        &builtin_services(),
        config,
    )?)
}

fn load_chart(arg: &str) -> Result<ChartDefinition, Box<dyn std::error::Error>> {
    let json = parse_json_arg(arg)?;
    Ok(ChartDefinition::from_json(&json)?)
}

/// Parses a JSON argument (either inline JSON or @file.json).
pub fn parse_json_arg(arg: &str) -> Result<Value, Box<dyn std::error::Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_json::from_str(arg)?)
    }
}

/// Formats the state tree, one node per line, indented by depth.
fn format_tree<C>(tree: &StateTree<C>) -> String {
    let mut output = String::new();
    for node in tree.iter() {
        output.push_str(&format!(
            "{}{} {}\n",
            "  ".repeat(node.depth()),
            node.id.key().cyan(),
            format!("({})", node.kind_name()).dimmed()
        ));
    }
    output
}

pub fn format_microstep(step: &Microstep) -> String {
    format!("{} {}", "->".dimmed(), step)
}

fn push_microsteps(output: &mut String, steps: &[Microstep]) {
    for step in steps {
        output.push_str(&format_microstep(step));
        output.push('\n');
    }
}

pub fn format_snapshot(snapshot: &Snapshot<Value>) -> String {
    format!(
        "Status: {}\nConfiguration: {}\nContext: {}",
        snapshot.status.to_string().yellow(),
        snapshot.configuration,
        format_json(&snapshot.context)
    )
}

/// Formats JSON for display.
pub fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
