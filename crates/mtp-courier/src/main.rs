//! Polls the native bridge for MTP devices and logs every event until Ctrl-C.

use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use mtp_courier::Courier;
use mtp_courier::config::{CourierConfig, default_config_path, load_config};
use mtp_courier::transport::KalamBridge;

#[tokio::main]
async fn main() {
    // Respects RUST_LOG (default: info)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let config = match default_config_path() {
        Some(path) => {
            info!("Loading settings from {}", path.display());
            load_config(&path)
        }
        None => CourierConfig::default(),
    };

    let courier = Courier::new(Arc::new(KalamBridge::init()), config);
    let mut events = courier.subscribe();
    courier.start();

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => info!("{}: {}", event.name(), json),
                    Err(e) => error!("Couldn't serialize {}: {}", event.name(), e),
                },
                Err(RecvError::Lagged(missed)) => warn!("Missed {} event(s)", missed),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    courier.shutdown();
}
