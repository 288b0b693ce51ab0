//! Orc engine demo client.
//!
//! - Config: `orc.yaml`, or the path given as the first argument
//! - Sends the OP request in `ORC_REQUEST` (if set) under a fresh correlation id
//! - Logs every delivery as JSON until Ctrl-C

use tracing_subscriber::{fmt, EnvFilter};

use orc_core::protocol::{decode, CorrelationId};
use orc_engine::{config, OrcClient, TreeCodec};

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    if let Err(e) = run().await {
        tracing::error!(code = e.code().as_str(), error = %e, "orc-engine failed");
        std::process::exit(1);
    }
}

async fn run() -> orc_core::Result<()> {
    let path = std::env::args().nth(1).unwrap_or_else(|| "orc.yaml".to_string());
    let cfg = config::load_from_file(&path)?;

    let client = OrcClient::connect(cfg, TreeCodec::new()).await?;

    if let Ok(request) = std::env::var("ORC_REQUEST") {
        let message = decode(&request)?;
        let id = CorrelationId::new_v4();
        client
            .send(message, id, |d| {
                match serde_json::to_string(&d.payload) {
                    Ok(json) => tracing::info!(
                        correlation_id = %d.correlation_id,
                        message_type = %d.message_type,
                        payload = %json,
                        "delivery"
                    ),
                    Err(e) => tracing::warn!(error = %e, "delivery not serializable"),
                }
            })
            .await?;
        tracing::info!(correlation_id = %id, "request sent");
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl-c handler unavailable");
    }
    tracing::info!(traffic = ?client.traffic(), "shutting down");
    client.close();
    Ok(())
}
