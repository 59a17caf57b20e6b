use std::{io, path::PathBuf};

use thiserror::Error;

use super::reading::SensorError;

/// Errors of the serial logger. Only `Open` is fatal; the loop logs the
/// others and keeps going.
#[derive(Error, Debug)]
pub enum SerialError {
    #[error("Failed to open serial port {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Serial port query failed: {0}")]
    Port(#[from] serialport::Error),

    #[error("Serial read failed: {0}")]
    Read(#[source] io::Error),

    /// The CSV log could not be opened or written.
    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors of the shadow publisher.
#[derive(Error, Debug)]
pub enum ShadowError {
    #[error("Transport error: {0}")]
    Transport(#[from] garduino_mqtt::TransferError),

    #[error("Reading source failed: {0}")]
    Sensor(#[from] SensorError),

    #[error("Failed to serialize reading: {0}")]
    Serialization(#[from] serde_json::Error),
}
