use clap::{Parser, Subcommand};
use dotenv::dotenv;
use telic_rs::backend::fs::FsBackend;
use telic_rs::backend::mcp::McpBackend;
use telic_rs::backend::registry::BackendRegistry;
use telic_rs::backend::shell::ShellBackend;
use telic_rs::engine::config::EngineConfig;
use telic_rs::engine::types::WorkflowOutcome;
use telic_rs::engine::{Engine, WorkflowEvent};
use telic_rs::oracle::Oracle;

use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one request to completion
    Run {
        /// The natural-language request
        #[arg(short, long)]
        request: String,

        /// The oracle model to use
        #[arg(short, long, default_value = "claude-sonnet-4-20250514")]
        model: String,

        /// Path to an engine config YAML file
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Serve the HTTP API
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// The oracle model to use
        #[arg(short, long, default_value = "claude-sonnet-4-20250514")]
        model: String,

        /// Path to an engine config YAML file
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Commands::Run {
            request,
            model,
            config,
        } => {
            let config = load_config(config)?;
            let engine = build_engine(&model, config).await?;

            // Ctrl-C cancels between items; the summarizer still runs
            let cancel = tokio_util::sync::CancellationToken::new();
            let cancel_on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("Cancellation requested");
                    cancel_on_signal.cancel();
                }
            });

            let (tx, mut rx) = tokio::sync::mpsc::channel(64);
            let printer = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    print_event(&event);
                }
            });

            let report = engine
                .run_with(&request, &serde_json::Value::Null, cancel, Some(tx))
                .await?;
            let _ = printer.await;

            println!("\n{}", report.summary);
            println!("\n{}", serde_json::to_string_pretty(&report)?);

            if report.outcome != WorkflowOutcome::Completed {
                std::process::exit(1);
            }
        }
        Commands::Serve {
            port,
            model,
            config,
        } => {
            let config = load_config(config)?;
            let engine = build_engine(&model, config).await?;
            telic_rs::server::serve(Arc::new(engine), port)
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        }
    }

    Ok(())
}

fn load_config(path: Option<String>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => Ok(EngineConfig::from_yaml_file(&path)?),
        None => Ok(EngineConfig::default()),
    }
}

async fn build_engine(model_name: &str, config: EngineConfig) -> anyhow::Result<Engine> {
    // Infer provider from the environment or the model name prefix
    let provider = std::env::var("ORACLE_PROVIDER")
        .ok()
        .or_else(|| {
            if model_name.starts_with("gpt") {
                Some("openai".to_string())
            } else {
                Some("anthropic".to_string())
            }
        })
        .unwrap();

    log::info!(
        "Using oracle provider: {} with model: {}",
        provider,
        model_name
    );

    let oracle: Arc<dyn Oracle> = match provider.as_str() {
        "openai" | "OpenAI" => Arc::new(
            telic_rs::oracle::openai::OpenAIOracle::new(model_name.to_string())
                .map_err(|e| anyhow::anyhow!(e.to_string()))?,
        ),
        _ => Arc::new(
            telic_rs::oracle::anthropic::AnthropicOracle::new(model_name.to_string())
                .map_err(|e| anyhow::anyhow!(e.to_string()))?,
        ),
    };

    let registry = BackendRegistry::new();
    registry
        .register(Arc::new(FsBackend::new(config.sandbox_root.clone())))
        .await;
    registry
        .register(Arc::new(ShellBackend::new(config.invocation_timeout())))
        .await;

    for server_config in &config.mcp_servers {
        match McpBackend::connect(server_config).await {
            Ok(backend) => {
                log::info!("Registered MCP backend: {}", server_config.name);
                registry.register(Arc::new(backend)).await;
            }
            Err(e) => log::warn!(
                "Failed to connect MCP backend {}: {}",
                server_config.name,
                e
            ),
        }
    }

    Ok(Engine::new(oracle, registry, config))
}

fn print_event(event: &WorkflowEvent) {
    match event {
        WorkflowEvent::PlanCreated { items, .. } => {
            println!("Plan: {} items", items.len());
            for (id, action) in items {
                println!("  [{}] {}", id, action);
            }
        }
        WorkflowEvent::ItemStarted {
            id,
            action,
            attempt,
        } => {
            println!("[{}] attempt {}: {}", id, attempt, action);
        }
        WorkflowEvent::BackendsSelected {
            id,
            backends,
            confidence,
            defaulted,
        } => {
            let suffix = if *defaulted { " (defaulted)" } else { "" };
            println!(
                "[{}] backends: {:?} ({}%{})",
                id, backends, confidence, suffix
            );
        }
        WorkflowEvent::ItemVerified {
            id,
            verified,
            confidence,
            ..
        } => {
            let mark = if *verified { "verified" } else { "rejected" };
            println!("[{}] {} ({}%)", id, mark, confidence);
        }
        WorkflowEvent::ItemCompleted { id } => println!("[{}] completed", id),
        WorkflowEvent::ItemRetrying {
            id,
            attempt,
            max_attempts,
        } => {
            println!("[{}] retrying ({}/{})", id, attempt, max_attempts);
        }
        WorkflowEvent::ItemFailed { id, reason } => println!("[{}] failed: {}", id, reason),
        WorkflowEvent::ReplanApplied { decision } => {
            println!(
                "[{}] replan: {:?} -> {:?}",
                decision.failed_item, decision.strategy, decision.inserted
            );
        }
        _ => {}
    }
}
