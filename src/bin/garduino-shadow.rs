use std::{process, sync::Arc};

use clap::Parser;
use garduino::{
    cli::ShadowCli,
    config::Config,
    core::{ReadingSource, ShadowPublisher, StaticReadingSource},
    logger::LoggerManager,
    print_error,
};
use garduino_mqtt::MqttManager;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use validator::Validate;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = ShadowCli::parse();
    if let Err(e) = cli.check_credentials() {
        e.exit();
    }

    let mut cfg = Config::new().unwrap_or_else(|e| {
        print_error!("{}", e);
        process::exit(1);
    });
    cli.apply(&mut cfg);
    if let Err(e) = cfg.validate() {
        print_error!("Invalid configuration: {}", e);
        process::exit(1);
    }

    let logger_manager = LoggerManager::new(cfg.logger.clone())
        .unwrap_or_else(|e| {
            print_error!("Failed to setup Log Manager: {}", e);
            process::exit(1);
        })
        .with_identifier("garduino-shadow");
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });
    info!(
        "Starting garduino-shadow version {}...",
        env!("CARGO_PKG_VERSION")
    );
    debug!("{:#?}", cfg.transport);

    let manager = MqttManager::from_config(cfg.transport.clone()).unwrap_or_else(|e| {
        error!("Failed to create MqttManager: {}", e);
        process::exit(1);
    });
    let instance = manager.build_and_start().await.unwrap_or_else(|e| {
        error!("Failed to build and start MQTT kernel: {}", e);
        process::exit(1);
    });

    info!(
        "Connecting to {} with client ID '{}'...",
        cfg.transport.host, cfg.transport.client_id
    );
    if let Err(e) = instance
        .wait_connected(cfg.transport.connection_timeout())
        .await
    {
        error!("Failed to connect: {}", e);
        let _ = instance.shutdown().await;
        process::exit(1);
    }

    let shadow = instance.shadow(cfg.shadow.thing_name.clone());
    if let Err(e) = shadow.subscribe_responses().await {
        error!("Failed to subscribe to shadow responses: {}", e);
        let _ = instance.shutdown().await;
        process::exit(1);
    }
    let dispatcher = shadow.spawn_dispatcher(
        instance.subscribe_incoming(),
        instance.state_receiver(),
        instance.cancel_token(),
    );

    let source: Arc<dyn ReadingSource> = Arc::new(StaticReadingSource::default());
    let publisher = ShadowPublisher::new(shadow, source, cfg.shadow.clone());

    let cancel = CancellationToken::new();
    let publishing = tokio::spawn(publisher.run(cancel.clone()));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }
    info!("Received Ctrl+C, initiating graceful shutdown...");

    cancel.cancel();
    if let Err(e) = publishing.await {
        error!("Publisher task failed: {}", e);
    }

    instance.shutdown().await?;
    if let Err(e) = dispatcher.await {
        error!("Shadow dispatcher task failed: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}
