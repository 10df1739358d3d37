mod chat;
mod config;
mod error;
mod market;
mod matcher;
mod model;
mod registry;
mod session;
mod storage;
mod store;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chat::ChatClient;
use chat::discord::{DiscordGateway, DiscordRest};
use config::AppConfig;
use market::MarketData;
use market::tradingview::TradingViewScanner;
use model::ChatEvent;
use session::{SessionController, SessionSettings};
use storage::Storage;
use storage::csv_file::CsvFileStorage;
use store::AlertStore;

#[derive(Debug, Display, Error)]
pub enum AppError {
    #[display("configuration error")]
    Config,
    #[display("storage error")]
    Storage,
    #[display("chat error")]
    Chat,
    #[display("runtime error")]
    Runtime,
}

#[derive(Parser)]
#[command(name = "fx-alert-bot", about = "Discord price-target alerts for currency pairs")]
struct Cli {
    /// Path to a TOML configuration file; defaults and environment are used
    /// when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    // A missing .env is fine; the environment may be set directly.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref()).change_context(AppError::Config)?;

    init_tracing(&config);

    // ── Alerts ────────────────────────────────────────────────────────────────
    let csv = CsvFileStorage::new(&config.general.data_file);
    info!(path = %csv.path().display(), "loading alerts");
    let storage: Arc<dyn Storage> = Arc::new(csv);
    let store = AlertStore::load(storage)
        .await
        .change_context(AppError::Storage)?;

    // ── Collaborators ─────────────────────────────────────────────────────────
    let market: Arc<dyn MarketData> = Arc::new(TradingViewScanner::new(&config.market));
    let chat: Arc<dyn ChatClient> = Arc::new(DiscordRest::new(&config.discord.token));

    // ── Gateway ───────────────────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    let (event_tx, event_rx) = mpsc::channel::<ChatEvent>(256);

    let gateway = DiscordGateway::new(&config.discord.token);
    let gateway_cancel = cancel.clone();
    let gateway_handle = tokio::spawn(async move { gateway.run(event_tx, gateway_cancel).await });

    let interrupt = CancellationToken::new();
    let interrupt_on_signal = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl+c received, shutting down");
            interrupt_on_signal.cancel();
        }
    });

    // ── Session ───────────────────────────────────────────────────────────────
    let controller = SessionController::new(SessionSettings::from_config(&config), store, market, chat);
    let outcome = controller
        .run(event_rx, interrupt)
        .await
        .change_context(AppError::Storage);

    cancel.cancel();
    let gateway_result = tokio::time::timeout(Duration::from_secs(5), gateway_handle).await;

    let outcome = outcome?;
    info!(outcome = ?outcome, "session closed");

    match gateway_result {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => return Err(e.change_context(AppError::Chat)),
        Ok(Err(e)) => return Err(Report::new(e).change_context(AppError::Runtime)),
        Err(_) => warn!("gateway did not stop within 5s"),
    }

    info!("shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    match config.general.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
