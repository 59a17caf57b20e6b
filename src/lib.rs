//! garduino: garden bed telemetry
//!
//! Two long-running programs share this crate:
//!
//! * `garduino-logger` samples newline-terminated lines from the sensor
//!   board's serial port, keeps one out of every `sample_period`, and
//!   appends it to a timestamped CSV log.
//!
//! * `garduino-shadow` takes a [`core::Reading`] on a fixed cadence and
//!   reports it to a device shadow over MQTT with mutual TLS, logging
//!   whether each update was accepted, rejected or timed out.
//!
//! ## Modules
//!
//! * `cli`: Command line flags of both programs.
//!
//! * `config`: TOML configuration, validated with `validator`. Sections
//!   `[logger]`, `[serial]`, `[shadow]` and `[transport]`.
//!
//! * `core`: Serial sampler, CSV log, readings and the shadow publisher.
//!
//! * `logger`: `tracing` subscriber setup: console output (compact,
//!   pretty or JSON) and optional journald.
//!
//! The MQTT transport lives in the `garduino_mqtt` workspace crate.

pub mod cli;
pub mod config;
pub mod core;
pub mod logger;
