//! Chatly relay server.
//!
//! Configuration comes from `CHATLY_*` environment variables, an optional
//! `.env` file and the settings file named by `CHATLY_CONFIG`.

use chatly::Settings;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    chatly_log::init();

    let settings = Settings::load()?;
    tracing::info!(
        bind_addr = %settings.server.bind_addr,
        backend = ?settings.store.backend,
        heartbeat_secs = settings.heartbeat.interval_secs,
        "Starting chatly"
    );

    let server = chatly::build_server(&settings).await?;
    server.run_until(chatly::shutdown_signal()).await?;

    Ok(())
}
