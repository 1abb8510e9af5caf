use peerboot::config::BootstrapConfig;
use peerboot::workflow;
use peerboot_core::headless::CtlHeadless;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "peerboot=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = BootstrapConfig::from_env();
    let ctl_bin = config.peerctl_bin.clone();

    match workflow::run(&config, |headless| CtlHeadless::new(ctl_bin, headless)).await {
        Ok(outcome) => {
            tracing::info!(peer_id = %outcome.peer_id, "node bootstrap complete");
        }
        Err(error) => {
            tracing::error!(%error, "node bootstrap failed");
            std::process::exit(1);
        }
    }
}
