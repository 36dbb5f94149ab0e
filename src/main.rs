use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tokio::io::AsyncReadExt;

use omcp::a2a::{self, A2aMessage, A2aRequest};
use omcp::pipeline::PipelineRoutes;
use omcp::{CapabilityRegistry, PipelineController};

/// Ask OMOP questions through stdio capability servers.
#[derive(Debug, Parser)]
#[command(name = "omcp", about = "Route OMOP questions through stdio capability servers", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, PartialEq, Subcommand)]
enum Command {
    /// Run the full pipeline for a natural-language question.
    Ask {
        #[arg(required = true)]
        question: Vec<String>,
        /// Schema context to use instead of fetching it.
        #[arg(long)]
        context: Option<String>,
    },
    /// Validate (and refine if needed) a SQL statement.
    Validate {
        #[arg(required = true)]
        sql: Vec<String>,
    },
    /// Report which capabilities started and the tools they expose.
    Health,
    /// Answer an A2A request read from stdin.
    A2a,
    /// Send a question to another agent's A2A endpoint.
    Send {
        url: String,
        #[arg(required = true)]
        question: Vec<String>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run one command against a started registry. `Ok(false)` means the
/// operation produced a failure report.
async fn run_command(
    command: Command,
    registry: &CapabilityRegistry,
    routes: &PipelineRoutes,
    failed: &[String],
) -> Result<bool> {
    let controller = PipelineController::new(registry, routes);

    match command {
        Command::Ask { question, context } => {
            match controller.process(&question.join(" "), context.as_deref()).await {
                Ok(answer) => {
                    print_json(&answer)?;
                    Ok(true)
                }
                Err(failure) => {
                    print_json(&failure)?;
                    Ok(false)
                }
            }
        }
        Command::Validate { sql } => {
            let report = controller.validate_sql(&sql.join(" ")).await?;
            print_json(&report)?;
            Ok(true)
        }
        Command::Health => {
            let status = if failed.is_empty() { "healthy" } else { "degraded" };
            print_json(&json!({
                "status": status,
                "servers": registry.names(),
                "failed": failed,
                "tools": registry.tool_summary(),
            }))?;
            Ok(failed.is_empty())
        }
        Command::A2a => {
            let mut raw = String::new();
            tokio::io::stdin()
                .read_to_string(&mut raw)
                .await
                .context("failed to read A2A request from stdin")?;
            let request: A2aRequest =
                serde_json::from_str(&raw).context("stdin is not an A2A request")?;
            let response = a2a::answer(&controller, &request).await;
            print_json(&response)?;
            Ok(true)
        }
        Command::Send { url, question } => {
            send(&url, &question.join(" ")).await?;
            Ok(true)
        }
    }
}

/// Ask another agent a question over A2A.
async fn send(url: &str, question: &str) -> Result<()> {
    let request = A2aRequest::new(vec![A2aMessage::user(question)]);
    let response = a2a::send_request(url, &request, a2a::DEFAULT_REQUEST_TIMEOUT)
        .await
        .with_context(|| format!("A2A request to {url} failed"))?;
    print_json(&response)
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli { command } = Cli::parse();

    if let Err(e) = omcp::init_tracing() {
        eprintln!("warning: file logging disabled: {e}");
    }

    // Outbound requests need no local capabilities.
    if let Command::Send { url, question } = &command {
        return send(url, &question.join(" ")).await;
    }

    let cwd: PathBuf = std::env::current_dir().context("failed to read current directory")?;
    let resolved = omcp::resolve_config(&cwd)?;
    let configs = resolved.config.capability_configs(&resolved.project_root);
    if configs.is_empty() {
        bail!(
            "no capability servers configured or found under {}",
            resolved.config.servers_dir(&resolved.project_root).display()
        );
    }

    let working_dir = resolved.project_root.to_string_lossy().into_owned();
    let (mut registry, errors) = CapabilityRegistry::start_all(&configs, Some(&working_dir)).await;
    for (name, e) in &errors {
        eprintln!("warning: capability '{name}' failed to start: {e}");
    }
    let failed: Vec<String> = errors.into_iter().map(|(name, _)| name).collect();

    let outcome = run_command(command, &registry, &resolved.config.routes, &failed).await;
    registry.stop_all().await;
    tracing::info!("=== OMCP stopped ===");

    if !outcome? {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Command, clap::Error> {
        Cli::try_parse_from(std::iter::once("omcp").chain(args.iter().copied())).map(|cli| cli.command)
    }

    #[test]
    fn test_parse_question_with_context() {
        let command = parse(&["ask", "How", "many", "patients?", "--context", "schema"]).unwrap();
        assert_eq!(
            command,
            Command::Ask {
                question: vec!["How".into(), "many".into(), "patients?".into()],
                context: Some("schema".into()),
            }
        );
    }

    #[test]
    fn test_parse_context_with_equals() {
        let command = parse(&["ask", "--context=schema", "count", "visits"]).unwrap();
        assert_eq!(
            command,
            Command::Ask {
                question: vec!["count".into(), "visits".into()],
                context: Some("schema".into()),
            }
        );
    }

    #[test]
    fn test_parse_validate_keeps_sql_words() {
        let command = parse(&["validate", "SELECT", "1"]).unwrap();
        assert_eq!(command, Command::Validate { sql: vec!["SELECT".into(), "1".into()] });
    }

    #[test]
    fn test_parse_validate_rejects_context() {
        assert!(parse(&["validate", "SELECT 1", "--context", "x"]).is_err());
    }

    #[test]
    fn test_parse_health_flag_inside_question_rejected() {
        assert!(parse(&["ask", "how", "many", "--health"]).is_err());
    }

    #[test]
    fn test_parse_send() {
        let command = parse(&["send", "http://agent/a2a", "hi", "there"]).unwrap();
        assert_eq!(
            command,
            Command::Send {
                url: "http://agent/a2a".into(),
                question: vec!["hi".into(), "there".into()],
            }
        );
    }

    #[test]
    fn test_parse_rejects_missing_arguments() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["ask"]).is_err());
        assert!(parse(&["validate"]).is_err());
        assert!(parse(&["send", "http://agent/a2a"]).is_err());
        assert!(parse(&["ask", "question", "--context"]).is_err());
        assert_eq!(parse(&["health"]).unwrap(), Command::Health);
        assert_eq!(parse(&["a2a"]).unwrap(), Command::A2a);
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
