//! Sensor readings and their shadow document form.
//!
//! A [`Reading`] is what a [`ReadingSource`] produces. On the wire it becomes
//! a [`ShadowEnvelope`]:
//!
//! ```json
//! {"state":{"reported":{"row":"3","pos":"0","moistureV":3.0,"moistureLevel":350,
//!   "lightV":2.7,"lightLevel":300,"tempV":2.5,"tempC":29.43}}}
//! ```
//!
//! `row` and `pos` travel as strings, levels as integers, and voltages and
//! `tempC` as floats.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("Sensor unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid sensor value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// One sample of the garden bed sensors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub row: i64,
    pub pos: i64,
    pub moisture_v: f64,
    pub moisture_level: i64,
    pub light_v: f64,
    pub light_level: i64,
    pub temp_v: f64,
    pub temp_c: f64,
}

impl Reading {
    /// Rejects NaN and infinite values, which have no JSON representation.
    pub fn validate(&self) -> Result<(), SensorError> {
        let floats = [
            ("moistureV", self.moisture_v),
            ("lightV", self.light_v),
            ("tempV", self.temp_v),
            ("tempC", self.temp_c),
        ];
        for (field, value) in floats {
            if !value.is_finite() {
                return Err(SensorError::InvalidValue {
                    field,
                    reason: format!("{value} is not a finite number"),
                });
            }
        }
        Ok(())
    }

    /// Wire form. With `legacy_pos_from_row`, `pos` carries the row value.
    pub fn to_envelope(&self, legacy_pos_from_row: bool) -> ShadowEnvelope {
        let pos = if legacy_pos_from_row { self.row } else { self.pos };
        ShadowEnvelope {
            state: ShadowState {
                reported: ReportedState {
                    row: self.row.to_string(),
                    pos: pos.to_string(),
                    moisture_v: self.moisture_v,
                    moisture_level: self.moisture_level,
                    light_v: self.light_v,
                    light_level: self.light_level,
                    temp_v: self.temp_v,
                    temp_c: self.temp_c,
                },
            },
        }
    }

    pub fn log(&self) {
        info!("Row: {}", self.row);
        info!("Position: {}", self.pos);
        info!("Moisture (V): {}", self.moisture_v);
        info!("Moisture Level: {}", self.moisture_level);
        info!("Light (V): {}", self.light_v);
        info!("Light Level: {}", self.light_level);
        info!("Temperature (V): {}", self.temp_v);
        info!("Temperature (C): {}", self.temp_c);
    }
}

/// `{"state": {"reported": {...}}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowEnvelope {
    pub state: ShadowState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowState {
    pub reported: ReportedState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedState {
    pub row: String,
    pub pos: String,
    pub moisture_v: f64,
    pub moisture_level: i64,
    pub light_v: f64,
    pub light_level: i64,
    pub temp_v: f64,
    pub temp_c: f64,
}

impl ReportedState {
    pub fn log(&self) {
        info!("Row: {}", self.row);
        info!("Pos: {}", self.pos);
        info!("moisture: {}", self.moisture_v);
        info!("moistureLevel: {}", self.moisture_level);
        info!("Light: {}", self.light_v);
        info!("LightLevel: {}", self.light_level);
        info!("temperatureV: {}", self.temp_v);
        info!("temperatureC: {}", self.temp_c);
    }
}

impl ShadowEnvelope {
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Extracts the reported reading from an accepted-update echo. Service
    /// metadata (`metadata`, `version`, `timestamp`, `clientToken`) is
    /// ignored.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        ShadowEnvelope::deserialize(value)
    }
}

/// Where readings come from. Hardware drivers implement this; the publisher
/// only sees the trait.
#[async_trait::async_trait]
pub trait ReadingSource: Send + Sync {
    async fn produce_reading(&self) -> Result<Reading, SensorError>;
}

/// Returns the same reading every time. Stands in for the sensor board
/// until a driver exists.
#[derive(Debug, Clone)]
pub struct StaticReadingSource {
    reading: Reading,
}

impl StaticReadingSource {
    pub fn new(reading: Reading) -> Self {
        Self { reading }
    }
}

impl Default for StaticReadingSource {
    fn default() -> Self {
        Self::new(Reading {
            row: 3,
            pos: 0,
            moisture_v: 3.00,
            moisture_level: 350,
            light_v: 2.70,
            light_level: 300,
            temp_v: 2.50,
            temp_c: 29.43,
        })
    }
}

#[async_trait::async_trait]
impl ReadingSource for StaticReadingSource {
    async fn produce_reading(&self) -> Result<Reading, SensorError> {
        Ok(self.reading.clone())
    }
}
