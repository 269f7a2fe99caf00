use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

mod api;
mod bus;
mod chat;
mod config;
mod interface;
mod pipeline;
mod session;
mod speech;
mod store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        // It's not fatal if .env doesn't exist, but good to know
        info!("No .env file found or failed to load: {}", e);
    }

    // Logs go to stderr so they don't interleave with the conversation
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = config::Config::from_env();
    info!(api = %config.api_base_url, "parley starting...");

    let bus = Arc::new(bus::EventBus::new());

    info!("Initializing store at {}", config.db_path.display());
    let store = store::Store::new(&config.db_path).await?;
    store.init().await?;

    let session = Arc::new(Mutex::new(
        session::ConversationStore::initialize(store, bus.clone()).await,
    ));

    let backend = Arc::new(api::HttpBackend::new(&config)?);
    let pipeline = Arc::new(pipeline::MessagePipeline::new(
        session.clone(),
        backend,
        bus.clone(),
        config.clone(),
    ));

    // No speech engine is available in a terminal.
    let voice = speech::VoiceInput::new(None);
    let terminal = interface::terminal::TerminalInterface::new(bus, session, pipeline, voice);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        res = terminal.run() => {
            if let Err(e) = res {
                error!("Terminal stopped with error: {}", e);
            }
        }
    }

    Ok(())
}
