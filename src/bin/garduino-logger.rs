use std::process;

use clap::Parser;
use garduino::{
    cli::LoggerCli,
    config::Config,
    core::{SerialLogger, SerialPortSource},
    logger::LoggerManager,
    print_error,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use validator::Validate;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = LoggerCli::parse();

    let mut cfg = Config::new().unwrap_or_else(|e| {
        print_error!("{}", e);
        process::exit(1);
    });
    cli.apply(&mut cfg);
    if let Err(e) = cfg.serial.validate() {
        print_error!("Invalid serial configuration: {}", e);
        process::exit(1);
    }

    let logger_manager = LoggerManager::new(cfg.logger.clone())
        .unwrap_or_else(|e| {
            print_error!("Failed to setup Log Manager: {}", e);
            process::exit(1);
        })
        .with_identifier("garduino-logger");
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });
    info!(
        "Starting garduino-logger version {}...",
        env!("CARGO_PKG_VERSION")
    );
    debug!("{:#?}", cfg.serial);

    let source = SerialPortSource::open(&cfg.serial).unwrap_or_else(|e| {
        error!("{}", e);
        process::exit(1);
    });

    let cancel = CancellationToken::new();
    let serial_logger = SerialLogger::new(source, &cfg.serial);
    let worker = tokio::task::spawn_blocking({
        let cancel = cancel.clone();
        move || serial_logger.run(cancel)
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }
    info!("Received Ctrl+C, stopping serial logger...");
    cancel.cancel();

    match worker.await {
        Ok(stats) => debug!("{:?}", stats),
        Err(e) => error!("Serial logger task failed: {}", e),
    }

    info!("Shutdown complete");
    Ok(())
}
