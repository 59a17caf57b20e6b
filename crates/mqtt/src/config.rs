//! Transport configuration for the device shadow connection.
//!
//! All types deserialize with serde, so the application can embed them in its
//! TOML file under `[transport]`, and validate with the `validator` crate so a
//! bad file fails at load time rather than at connect time.
//!
//! ```toml
//! [transport]
//! host = "abc123-ats.iot.eu-west-1.amazonaws.com"
//! port = 8883
//! client_id = "basicShadowUpdater"
//! connection_timeout = 10
//! operation_timeout = 5
//! reconnect_min_delay = 1
//! reconnect_max_delay = 32
//! max_reconnect_attempts = 20
//!
//! [transport.tls]
//! ca_cert_path = "/etc/garduino/root-CA.crt"
//! client_cert_path = "/etc/garduino/garduino.cert.pem"
//! client_key_path = "/etc/garduino/garduino.private.key"
//! ```

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// MQTT connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_reconnect_bounds"))]
pub struct Config {
    /// Broker hostname (the shadow service endpoint).
    #[validate(length(
        min = 1,
        max = 255,
        message = "Host must be between 1 and 255 characters"
    ))]
    pub host: String,

    /// Broker port. 8883 is MQTT over TLS.
    #[validate(range(min = 1, message = "Port must be between 1 and 65535"))]
    pub port: u16,

    /// Client identifier presented in CONNECT. Also used as the prefix of
    /// shadow correlation tokens.
    #[validate(length(
        min = 1,
        max = 128,
        message = "Client ID must be between 1 and 128 characters"
    ))]
    pub client_id: String,

    /// Keep-alive interval in seconds.
    #[validate(range(
        min = 5,
        max = 3600,
        message = "Keep alive must be between 5 and 3600 seconds"
    ))]
    pub keep_alive: u64,

    pub clean_session: bool,

    #[validate(range(
        min = 1,
        max = 1000,
        message = "Max inflight must be between 1 and 1000"
    ))]
    pub max_inflight: u16,

    #[validate(range(
        min = 64,
        max = 65535,
        message = "Max packet size must be between 64 and 65535 bytes"
    ))]
    pub max_packet_size: Option<u16>,

    /// Capacity of the rumqttc request channel.
    #[validate(range(
        min = 1,
        max = 255,
        message = "Request channel capacity must be between 1 and 255"
    ))]
    pub request_channel_capacity: Option<u8>,

    /// Seconds to wait for the first CONNACK.
    #[validate(range(
        min = 1,
        max = 300,
        message = "Connection timeout must be between 1 and 300 seconds"
    ))]
    pub connection_timeout: u64,

    /// Seconds to wait for DISCONNECT to be handed to the event loop on
    /// shutdown.
    #[validate(range(
        min = 1,
        max = 300,
        message = "Disconnect timeout must be between 1 and 300 seconds"
    ))]
    pub disconnect_timeout: u64,

    /// Seconds to wait for a shadow request to be accepted or rejected.
    #[validate(range(
        min = 1,
        max = 300,
        message = "Operation timeout must be between 1 and 300 seconds"
    ))]
    pub operation_timeout: u64,

    /// First reconnect delay in seconds.
    #[validate(range(
        min = 1,
        max = 60,
        message = "Reconnect min delay must be between 1 and 60 seconds"
    ))]
    pub reconnect_min_delay: u64,

    /// Upper bound for the reconnect delay in seconds.
    #[validate(range(
        min = 1,
        max = 3600,
        message = "Reconnect max delay must be between 1 and 3600 seconds"
    ))]
    pub reconnect_max_delay: u64,

    /// Reconnect attempts before the kernel gives up. 0 = unlimited.
    #[validate(range(
        max = 1000,
        message = "Max reconnect attempts must be between 0 and 1000"
    ))]
    pub max_reconnect_attempts: u32,

    #[validate(nested)]
    pub tls: Option<TlsConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "localhost".to_string(),
            port: 8883,
            client_id: "basicShadowUpdater".to_string(),
            keep_alive: 30,
            clean_session: true,
            max_inflight: 20,
            max_packet_size: Some(65_535),
            request_channel_capacity: Some(10),
            connection_timeout: 10,
            disconnect_timeout: 10,
            operation_timeout: 5,
            reconnect_min_delay: 1,
            reconnect_max_delay: 32,
            max_reconnect_attempts: 20,
            tls: None,
        }
    }
}

impl Config {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.disconnect_timeout)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout)
    }
}

fn validate_reconnect_bounds(config: &Config) -> Result<(), ValidationError> {
    if config.reconnect_min_delay > config.reconnect_max_delay {
        return Err(ValidationError::new("invalid_reconnect_bounds").with_message(
            format!(
                "reconnect_min_delay ({}) must not exceed reconnect_max_delay ({})",
                config.reconnect_min_delay, config.reconnect_max_delay
            )
            .into(),
        ));
    }
    Ok(())
}

/// TLS material for the broker connection. Paths point at PEM files.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TlsConfig {
    /// Root CA used to verify the broker.
    #[validate(custom(
        function = "validate_optional_file_exists",
        message = "CA certificate file does not exist"
    ))]
    pub ca_cert_path: Option<String>,

    /// Client certificate. Must be paired with `client_key_path`.
    #[validate(custom(
        function = "validate_optional_file_exists",
        message = "Client certificate file does not exist"
    ))]
    pub client_cert_path: Option<String>,

    /// Unencrypted client private key. Must be paired with `client_cert_path`.
    #[validate(custom(
        function = "validate_optional_file_exists",
        message = "Client key file does not exist"
    ))]
    pub client_key_path: Option<String>,
}

impl TlsConfig {
    /// Mutual TLS: root CA plus client certificate and key.
    pub fn new(
        ca_cert_path: impl Into<String>,
        client_cert_path: impl Into<String>,
        client_key_path: impl Into<String>,
    ) -> Self {
        TlsConfig {
            ca_cert_path: Some(ca_cert_path.into()),
            client_cert_path: Some(client_cert_path.into()),
            client_key_path: Some(client_key_path.into()),
        }
    }

    /// Server verification only.
    pub fn with_ca_only(ca_cert_path: impl Into<String>) -> Self {
        TlsConfig {
            ca_cert_path: Some(ca_cert_path.into()),
            client_cert_path: None,
            client_key_path: None,
        }
    }

    /// True only when both the client certificate and key are set.
    pub fn has_client_auth(&self) -> bool {
        self.client_cert_path.is_some() && self.client_key_path.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.ca_cert_path.is_some()
    }

    /// Checks that the CA is present and readable, and that client auth is
    /// either fully configured with readable files or absent.
    pub fn validate_config(&self) -> Result<(), ValidationError> {
        let ca = self.ca_cert_path.as_deref().ok_or_else(|| {
            ValidationError::new("missing_ca_cert")
                .with_message("CA certificate path is required".into())
        })?;
        validate_file_path(ca)?;

        match (
            self.client_cert_path.as_deref(),
            self.client_key_path.as_deref(),
        ) {
            (Some(cert), Some(key)) => {
                validate_file_path(cert)?;
                validate_file_path(key)?;
            }
            (None, None) => {}
            _ => {
                return Err(ValidationError::new("incomplete_client_auth").with_message(
                    "Both client certificate and key must be provided or neither".into(),
                ));
            }
        }

        Ok(())
    }
}

fn validate_optional_file_exists(path: &str) -> Result<(), ValidationError> {
    validate_file_path(path)
}

/// The path must be non-empty and point at an existing regular file.
fn validate_file_path(path: &str) -> Result<(), ValidationError> {
    if path.is_empty() {
        return Err(
            ValidationError::new("empty_path").with_message("File path cannot be empty".into())
        );
    }

    let path_obj = Path::new(path);

    if !path_obj.exists() {
        return Err(ValidationError::new("file_not_found")
            .with_message(format!("File does not exist: {path}").into()));
    }

    if !path_obj.is_file() {
        return Err(ValidationError::new("not_a_file")
            .with_message(format!("Path is not a file: {path}").into()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::Write};

    use tempfile::TempDir;

    use super::*;

    fn pem_files() -> (TempDir, String, String, String) {
        let dir = TempDir::new().unwrap();
        let mut paths = Vec::new();
        for name in ["root-CA.crt", "device.cert.pem", "device.private.key"] {
            let path = dir.path().join(name);
            File::create(&path).unwrap().write_all(b"pem").unwrap();
            paths.push(path.to_string_lossy().into_owned());
        }
        let key = paths.pop().unwrap();
        let cert = paths.pop().unwrap();
        let ca = paths.pop().unwrap();
        (dir, ca, cert, key)
    }

    #[test]
    fn test_defaults_match_shadow_client() {
        let config = Config::default();
        assert_eq!(config.port, 8883);
        assert_eq!(config.client_id, "basicShadowUpdater");
        assert_eq!(config.connection_timeout(), Duration::from_secs(10));
        assert_eq!(config.disconnect_timeout(), Duration::from_secs(10));
        assert_eq!(config.operation_timeout(), Duration::from_secs(5));
        assert_eq!(config.reconnect_min_delay, 1);
        assert_eq!(config.reconnect_max_delay, 32);
        assert_eq!(config.max_reconnect_attempts, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_inverted_reconnect_bounds_rejected() {
        let config = Config {
            reconnect_min_delay: 40,
            reconnect_max_delay: 32,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_host_rejected() {
        let config = Config {
            host: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tls_full_client_auth_is_valid() {
        let (_dir, ca, cert, key) = pem_files();
        let tls = TlsConfig::new(ca, cert, key);
        assert!(tls.has_client_auth());
        assert!(tls.validate_config().is_ok());
        assert!(tls.validate().is_ok());
    }

    #[test]
    fn test_tls_partial_client_auth_rejected() {
        let (_dir, ca, cert, _key) = pem_files();
        let tls = TlsConfig {
            ca_cert_path: Some(ca),
            client_cert_path: Some(cert),
            client_key_path: None,
        };
        assert!(!tls.has_client_auth());
        assert!(tls.validate_config().is_err());
    }

    #[test]
    fn test_tls_missing_file_rejected() {
        let tls = TlsConfig::with_ca_only("/nonexistent/root-CA.crt");
        assert!(tls.validate_config().is_err());
        assert!(tls.validate().is_err());
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"host":"example.iot","port":443,"max_reconnect_attempts":5}"#)
                .unwrap();
        assert_eq!(config.host, "example.iot");
        assert_eq!(config.port, 443);
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.operation_timeout, 5);
    }
}
