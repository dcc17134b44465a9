//! Reverie CLI.
//!
//! ```text
//! reverie serve                       run the worker pool until Ctrl-C
//! reverie contemplate                 bridge child: JSON lines on stdin/stdout
//! reverie delegate <type> <content> [--priority N] [--context JSON]
//! reverie get <id>
//! reverie insights [--hours N] [--limit N]
//! reverie status
//! ```
//!
//! Logs go to stderr; stdout carries command output (and the line protocol
//! in `contemplate` mode).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use reverie_engine::{
    BackendSettings, BridgeBackend, ContemplationLoop, ReverieConfig, Settings, Subconscious,
};
use reverie_providers::OllamaClient;
use reverie_store::ThoughtStore;
use reverie_types::{Priority, ThoughtContext, ThoughtId};

const USAGE: &str = "usage: reverie <serve|contemplate|delegate|get|insights|status> [args]";

#[derive(Debug, PartialEq)]
enum Command {
    Serve,
    Contemplate,
    Delegate {
        kind: String,
        content: String,
        priority: i64,
        context: ThoughtContext,
    },
    Get(ThoughtId),
    Insights { hours: u64, limit: usize },
    Status,
}

fn parse_args(args: &[String]) -> Result<Command> {
    let Some((name, rest)) = args.split_first() else {
        bail!("{USAGE}");
    };

    match name.as_str() {
        "serve" => Ok(Command::Serve),
        "contemplate" => Ok(Command::Contemplate),
        "status" => Ok(Command::Status),
        "get" => match rest {
            [id] => Ok(Command::Get(ThoughtId::new(id.clone()))),
            _ => bail!("usage: reverie get <id>"),
        },
        "delegate" => {
            let mut positional = Vec::new();
            let mut priority = i64::from(Priority::NORMAL);
            let mut context = ThoughtContext::new();
            let mut iter = rest.iter();
            while let Some(arg) = iter.next() {
                match arg.as_str() {
                    "--priority" => {
                        let value = iter.next().context("--priority needs a value")?;
                        priority = value
                            .parse()
                            .with_context(|| format!("invalid priority '{value}'"))?;
                    }
                    "--context" => {
                        let value = iter.next().context("--context needs a value")?;
                        context = serde_json::from_str(value)
                            .context("--context must be a JSON object")?;
                    }
                    _ => positional.push(arg.clone()),
                }
            }
            let [kind, content] = <[String; 2]>::try_from(positional).map_err(|_| {
                anyhow::anyhow!(
                    "usage: reverie delegate <type> <content> [--priority N] [--context JSON]"
                )
            })?;
            Ok(Command::Delegate {
                kind,
                content,
                priority,
                context,
            })
        }
        "insights" => {
            let mut hours = 24;
            let mut limit = 20;
            let mut iter = rest.iter();
            while let Some(arg) = iter.next() {
                let value = iter
                    .next()
                    .with_context(|| format!("{arg} needs a value"))?;
                match arg.as_str() {
                    "--hours" => hours = value.parse().context("invalid --hours")?,
                    "--limit" => limit = value.parse().context("invalid --limit")?,
                    other => bail!("unknown option '{other}'"),
                }
            }
            Ok(Command::Insights { hours, limit })
        }
        other => bail!("unknown command '{other}'\n{USAGE}"),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn open_store(settings: &Settings) -> Result<Arc<ThoughtStore>> {
    let store = ThoughtStore::open(&settings.store_path)
        .with_context(|| format!("failed to open store at {}", settings.store_path.display()))?;
    Ok(Arc::new(store))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn serve(settings: Settings) -> Result<()> {
    let store = open_store(&settings)?;
    store.recover_interrupted()?;
    let mut subconscious = Subconscious::new(Arc::clone(&store), settings.worker.clone());

    let pool = match &settings.backend {
        BackendSettings::Direct => {
            let client = OllamaClient::new(settings.ollama.clone())?;
            if !client.is_available().await {
                tracing::warn!(
                    base_url = %client.config().base_url,
                    "Inference service is not reachable; thoughts will fail until it is"
                );
            }
            subconscious.start_workers(settings.workers, |_| client.clone())
        }
        BackendSettings::Bridge {
            config,
            reply_timeout,
        } => subconscious.start_workers(settings.workers, |_| {
            BridgeBackend::new(config.clone(), *reply_timeout)
        }),
    };

    tracing::info!(store = %settings.store_path.display(), "Reverie serving");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down");
    pool.shutdown().await;
    Ok(())
}

async fn contemplate(settings: Settings) -> Result<()> {
    let client = OllamaClient::new(settings.ollama)?;
    let mut contemplation = ContemplationLoop::new(client, settings.worker.fast.model);
    contemplation
        .run(tokio::io::stdin(), tokio::io::stdout())
        .await
        .context("contemplation loop I/O failed")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;
    let own_exe = std::env::current_exe().ok();
    let settings = ReverieConfig::load()?.resolve_with(own_exe.as_deref());

    match command {
        Command::Serve => serve(settings).await,
        Command::Contemplate => contemplate(settings).await,
        Command::Delegate {
            kind,
            content,
            priority,
            context,
        } => {
            let subconscious = Subconscious::new(open_store(&settings)?, settings.worker);
            let id = subconscious.delegate(&kind, content, context, priority)?;
            println!("{id}");
            Ok(())
        }
        Command::Get(id) => {
            let subconscious = Subconscious::new(open_store(&settings)?, settings.worker);
            match subconscious.get(&id)? {
                Some(thought) => print_json(&thought),
                None => bail!("thought {id} not found"),
            }
        }
        Command::Insights { hours, limit } => {
            let subconscious = Subconscious::new(open_store(&settings)?, settings.worker);
            let insights =
                subconscious.insights(Duration::from_secs(hours.saturating_mul(3600)), limit)?;
            print_json(&insights)
        }
        Command::Status => {
            let subconscious = Subconscious::new(open_store(&settings)?, settings.worker);
            print_json(&subconscious.status()?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn parses_simple_commands() {
        assert_eq!(parse_args(&args(&["serve"])).unwrap(), Command::Serve);
        assert_eq!(
            parse_args(&args(&["contemplate"])).unwrap(),
            Command::Contemplate
        );
        assert_eq!(parse_args(&args(&["status"])).unwrap(), Command::Status);
        assert_eq!(
            parse_args(&args(&["get", "abc"])).unwrap(),
            Command::Get(ThoughtId::new("abc"))
        );
    }

    #[test]
    fn delegate_defaults_to_normal_priority() {
        let command = parse_args(&args(&["delegate", "design", "a queue"])).unwrap();
        assert_eq!(
            command,
            Command::Delegate {
                kind: "design".into(),
                content: "a queue".into(),
                priority: 5,
                context: ThoughtContext::new(),
            }
        );
    }

    #[test]
    fn delegate_options_anywhere() {
        let command = parse_args(&args(&[
            "delegate",
            "--priority",
            "10",
            "problem",
            "disk full",
            "--context",
            r#"{"host":"db1"}"#,
        ]))
        .unwrap();
        let Command::Delegate {
            kind,
            priority,
            context,
            ..
        } = command
        else {
            panic!("expected delegate");
        };
        assert_eq!(kind, "problem");
        assert_eq!(priority, 10);
        assert_eq!(context["host"], "db1");
    }

    #[test]
    fn delegate_rejects_bad_input() {
        assert!(parse_args(&args(&["delegate", "design"])).is_err());
        assert!(parse_args(&args(&["delegate", "a", "b", "--priority", "high"])).is_err());
        assert!(parse_args(&args(&["delegate", "a", "b", "--context", "[1]"])).is_err());
    }

    #[test]
    fn insights_options() {
        assert_eq!(
            parse_args(&args(&["insights"])).unwrap(),
            Command::Insights {
                hours: 24,
                limit: 20
            }
        );
        assert_eq!(
            parse_args(&args(&["insights", "--hours", "2", "--limit", "5"])).unwrap(),
            Command::Insights { hours: 2, limit: 5 }
        );
        assert!(parse_args(&args(&["insights", "--days", "2"])).is_err());
    }

    #[test]
    fn unknown_or_missing_command_fails() {
        assert!(parse_args(&[]).is_err());
        assert!(parse_args(&args(&["dream"])).is_err());
    }
}
