// ============================================================================
// state.rs
// ============================================================================
//! Observable connection state.
//!
//! The connection kernel publishes a [`ConnectionState`] on a `watch`
//! channel. The shadow binary waits on it for the first `Connected`, and
//! the shadow dispatcher re-subscribes its response topics on every
//! reconnect.
//!
//! # Examples
//!
//! ```ignore
//! use garduino_mqtt::ConnectionState;
//!
//! let state = ConnectionState::Reconnecting(4.0);
//! println!("Status: {}", state);        // "Reconnecting (in 4 seconds)"
//! println!("Type: {}", state.as_str()); // "Reconnecting"
//! ```

use std::fmt;

/// Lifecycle of the broker connection.
///
/// The kernel moves through these states:
/// - `Connecting` -> `Connected` (CONNACK received)
/// - `Connected` -> `Disconnected` (broker closed, network error, shutdown)
/// - `Disconnected` -> `Reconnecting` -> `Connecting` -> ... (backoff loop)
///
/// A fatal error or an exhausted attempt cap leaves the state at
/// `Disconnected` and the kernel task ends.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// CONNECT sent, waiting for CONNACK.
    ///
    /// Publishes queue in the client's request channel until the broker
    /// answers.
    Connecting,

    /// CONNACK received. Publishes and subscriptions go through.
    Connected,

    /// Connection lost or closed.
    ///
    /// The `String` carries the reason, for example:
    /// - `"Disconnected by broker"`
    /// - a network or TLS error message
    /// - `"Shutdown requested"` after cancellation
    Disconnected(String),

    /// Waiting out a backoff delay before the next attempt.
    ///
    /// The `f64` is the delay in seconds. With the default policy it runs
    /// 1 -> 2 -> 4 -> ... -> 32.
    Reconnecting(f64),
}

impl ConnectionState {
    /// Returns a short static name for the state, for logs.
    ///
    /// # Returns
    /// One of: `"Connecting"`, `"Connected"`, `"Disconnected"`, `"Reconnecting"`
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnected(_) => "Disconnected",
            ConnectionState::Reconnecting(_) => "Reconnecting",
        }
    }

    /// Reason for `Disconnected`, delay for `Reconnecting`, empty otherwise.
    pub fn details(&self) -> String {
        match self {
            ConnectionState::Connecting | ConnectionState::Connected => String::new(),
            ConnectionState::Disconnected(reason) => reason.clone(),
            ConnectionState::Reconnecting(seconds) => format!("in {seconds} seconds"),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())?;
        let details = self.details();
        if !details.is_empty() {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}
