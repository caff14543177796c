mod api;
mod chat;
mod daily;
#[cfg(test)]
mod mocks;

use chat::ChatService;
use clap::{Parser, Subcommand};
use daily::DailyService;
use std::sync::Arc;
use std::time::Instant;
use tern_channels::SlackTransport;
use tern_core::config::{self, Config};
use tern_core::traits::{ChatModel, ConversationRepository, Transport};
use tern_ledger::{LedgerRepository, SqliteStore};
use tern_providers::GeminiChat;
use tracing::info;

#[derive(Parser)]
#[command(name = "tern", version, about = "Tern — Slack check-in companion")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (Slack events + daily trigger).
    Start,
    /// Run the daily check-in batch once and exit.
    Daily,
    /// Check configuration and chat model availability.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Commands::Start => {
            let cfg = config::load(&cli.config)?;
            let chat_model = build_chat_model(&cfg)?;

            if !chat_model.is_available().await {
                anyhow::bail!("chat model '{}' is not available", chat_model.name());
            }

            let state = build_state(&cfg, chat_model).await?;
            let addr = ("0.0.0.0", cfg.server.port);
            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!("tern listening on port {}", cfg.server.port);
            axum::serve(listener, api::router(state)).await?;
        }
        Commands::Daily => {
            let cfg = config::load(&cli.config)?;
            let chat_model = build_chat_model(&cfg)?;
            let state = build_state(&cfg, chat_model).await?;

            match state.daily.run().await {
                Ok(summary) => println!("{}", summary.status_line()),
                Err(e) => anyhow::bail!("daily batch failed: {e}"),
            }
        }
        Commands::Status => {
            let cfg = config::load(&cli.config)?;
            println!("Tern — Status Check\n");
            println!("Config: {}", cli.config);
            println!("Store: {} ({})", cfg.store.backend, cfg.store.db_path);
            println!(
                "Slack: {}",
                if cfg.slack.bot_token.is_empty() {
                    "missing bot_token"
                } else {
                    "configured"
                }
            );
            println!(
                "Daily trigger: {}",
                if cfg.server.cron_token.is_empty() {
                    "disabled (no cron_token)"
                } else {
                    "enabled"
                }
            );

            let chat_model = build_chat_model(&cfg)?;
            let available = chat_model.is_available().await;
            println!(
                "LLM: {} ({})",
                chat_model.name(),
                if available { "available" } else { "not available" }
            );
        }
    }

    Ok(())
}

/// Build the configured chat model.
fn build_chat_model(cfg: &Config) -> anyhow::Result<Arc<dyn ChatModel>> {
    match cfg.llm.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiChat::from_config(&cfg.llm))),
        other => anyhow::bail!("unsupported llm provider: {other}"),
    }
}

/// Wire the store, repository, transport, and services into API state.
async fn build_state(cfg: &Config, chat_model: Arc<dyn ChatModel>) -> anyhow::Result<api::ApiState> {
    let store = match cfg.store.backend.as_str() {
        "sqlite" => SqliteStore::new(&cfg.store).await?,
        other => anyhow::bail!("unsupported store backend: {other}"),
    };

    let repo: Arc<dyn ConversationRepository> = Arc::new(LedgerRepository::new(Arc::new(store)));
    let transport: Arc<dyn Transport> = Arc::new(SlackTransport::new(&cfg.slack));

    let chat = Arc::new(ChatService::new(
        repo.clone(),
        chat_model.clone(),
        transport.clone(),
        &cfg.chat,
    ));
    let daily = Arc::new(DailyService::new(repo, chat_model, transport.clone()));

    Ok(api::ApiState {
        chat,
        daily,
        transport,
        cron_token: cfg.server.cron_token.clone(),
        uptime: Instant::now(),
    })
}
