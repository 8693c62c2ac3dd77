//! Entry point: parses configuration, connects MQTT, brings up the selected
//! panel dialect, and runs until a shutdown signal arrives.

mod client_amt8000;
mod config;
mod connection;
mod error;
mod handler_amt8000;
mod handler_isecnet;
mod intent;
mod mqtt;
mod runtime;
mod server;
mod state;

use clap::Parser;
use config::Config;
use log::{error, info};
use mqtt::MqttPublisher;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    if let Err(e) = config.validate() {
        error!("configuration error: {e}");
        std::process::exit(1);
    }

    match run(config).await {
        Ok(()) => {
            info!("shutdown complete");
            std::process::exit(0);
        }
        Err(e) => {
            error!("fatal startup failure: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let zones = config.zones()?.0;
    let poll_interval = std::time::Duration::from_secs(config.polling_interval_minutes * 60);

    let (mqtt_client, mqtt_eventloop) = runtime::build_mqtt_client(&config);
    let publisher = MqttPublisher::new(mqtt_client.clone());

    let dialect = runtime::build_dialect(&config).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let listener_task = runtime::spawn_isecnet_listener(&dialect, shutdown_rx.clone());

    let app = runtime::Runtime::new(dialect, &zones, publisher, poll_interval);

    let signal_task = tokio::spawn(runtime::wait_for_shutdown_signal(shutdown_tx));

    info!("intelbras-bridge starting, protocol={:?}", config.protocol()?);
    app.run(mqtt_eventloop, mqtt_client, shutdown_rx).await?;

    signal_task.abort();
    if let Some(listener_task) = listener_task {
        listener_task.abort();
    }
    Ok(())
}
