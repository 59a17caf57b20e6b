//! # garduino_mqtt: device shadow transport
//!
//! Async MQTT client for the Garduino shadow publisher, built on `rumqttc`:
//!
//! - **Connection kernel** that drives the event loop, tells fatal errors
//!   (TLS, refused credentials) from transient ones and reconnects with
//!   exponential backoff
//! - **State monitoring** over a `watch` channel
//! - **Mutual TLS** from PEM files
//! - **Named shadow handle** that correlates update/delete requests with
//!   their accepted/rejected responses
//!
//! # Quick Start
//!
//! ```ignore
//! use garduino_mqtt::{Config, MqttManager, ShadowResponse, TlsConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         host: "abc123-ats.iot.eu-west-1.amazonaws.com".into(),
//!         tls: Some(TlsConfig::new("root-CA.crt", "garduino.cert.pem", "garduino.private.key")),
//!         ..Default::default()
//!     };
//!
//!     let instance = MqttManager::from_config(config)?.build_and_start().await?;
//!     instance.wait_connected(instance.config().connection_timeout()).await?;
//!
//!     let shadow = instance.shadow("Bot");
//!     shadow.subscribe_responses().await?;
//!     shadow.spawn_dispatcher(
//!         instance.subscribe_incoming(),
//!         instance.state_receiver(),
//!         instance.cancel_token(),
//!     );
//!
//!     let pending = shadow.update(json!({"state": {"reported": {"row": "3"}}})).await?;
//!     if let ShadowResponse::Accepted { payload, .. } = pending.outcome().await {
//!         println!("accepted: {payload}");
//!     }
//!
//!     instance.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Reconnection
//!
//! With the default configuration the kernel waits 1, 2, 4, 8, 16, 32, 32, ...
//! seconds between attempts and gives up after 20 consecutive failures. A
//! CONNACK resets the schedule.
//!
//! # Shadow responses
//!
//! Every request gets a `clientToken` of the form `<clientId>_<uuid>`. The
//! dispatcher task resolves the matching [`PendingRequest`] when the echo
//! arrives; requests without an echo within `operation_timeout` resolve to
//! [`ShadowResponse::Timeout`].

pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod shadow;
pub mod state;

pub use backoff::{Backoff, BackoffError};
pub use client::ClientBuilder;
pub use config::{Config, TlsConfig};
pub use connection::ConnectionKernel;
pub use error::TransferError;
pub use manager::{MqttInstance, MqttManager};
pub use shadow::{PendingRequest, ShadowHandler, ShadowOperation, ShadowResponse, ShadowTopics};
pub use state::ConnectionState;
