//! Builds the rumqttc client and event loop from [`Config`].
//!
//! ```ignore
//! let (client, event_loop) = ClientBuilder::from_config(&config)?.build()?;
//! ```
//!
//! The returned `AsyncClient` is cheap to clone and safe to share between
//! tasks; the `EventLoop` must be driven by exactly one task (the
//! [`crate::connection::ConnectionKernel`]).

use std::{fs, time::Duration};

use rumqttc::{AsyncClient, EventLoop, MqttOptions, TlsConfiguration, Transport};
use tracing::debug;
use validator::Validate;

use super::{
    config::{Config, TlsConfig},
    error::TransferError,
};

pub struct ClientBuilder {
    opts: MqttOptions,
    /// Capacity of the rumqttc request channel.
    cap: usize,
    tls_config: Option<TlsConfig>,
}

impl ClientBuilder {
    /// Validates the configuration and maps it onto `MqttOptions`.
    ///
    /// # Errors
    ///
    /// Returns `TransferError::ConfigError` when `config` fails validation,
    /// for example an empty host or a TLS path that does not exist.
    pub fn from_config(config: &Config) -> Result<Self, TransferError> {
        config.validate()?;

        let mut opts = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        opts.set_keep_alive(Duration::from_secs(config.keep_alive));
        opts.set_clean_session(config.clean_session);
        opts.set_inflight(config.max_inflight);

        if let Some(max_packet_size) = config.max_packet_size {
            opts.set_max_packet_size(max_packet_size as usize, max_packet_size as usize);
        }

        let cap = config.request_channel_capacity.unwrap_or(10) as usize;

        let tls_config = config.tls.clone().filter(TlsConfig::is_enabled);

        debug!(
            "MQTT options prepared for {}:{} (client id '{}', tls: {})",
            config.host,
            config.port,
            config.client_id,
            tls_config.is_some()
        );

        Ok(Self {
            opts,
            cap,
            tls_config,
        })
    }

    fn load_file(path: &str) -> Result<Vec<u8>, TransferError> {
        Ok(fs::read(path)?)
    }

    /// Reads the PEM files named by the TLS configuration into a rustls
    /// transport.
    fn build_tls_transport(tls_config: &TlsConfig) -> Result<Transport, TransferError> {
        tls_config
            .validate_config()
            .map_err(|e| TransferError::ClientSetup(format!("Invalid TLS configuration: {e}")))?;

        let ca_path = tls_config
            .ca_cert_path
            .as_deref()
            .ok_or_else(|| TransferError::ClientSetup("TLS configuration is not set".into()))?;
        let ca = Self::load_file(ca_path)?;

        let client_auth = match (
            tls_config.client_cert_path.as_deref(),
            tls_config.client_key_path.as_deref(),
        ) {
            (Some(cert), Some(key)) => Some((Self::load_file(cert)?, Self::load_file(key)?)),
            _ => None,
        };

        Ok(Transport::Tls(TlsConfiguration::Simple {
            ca,
            client_auth,
            alpn: None,
        }))
    }

    /// Consumes the builder and returns the client and its event loop.
    pub fn build(self) -> Result<(AsyncClient, EventLoop), TransferError> {
        let transport = match &self.tls_config {
            Some(tls_config) => Self::build_tls_transport(tls_config)?,
            None => Transport::Tcp,
        };

        let mut opts = self.opts;
        opts.set_transport(transport);

        Ok(AsyncClient::new(opts, self.cap))
    }
}

#[cfg(test)]
mod tests {
    use std::{fs::File, io::Write};

    use tempfile::TempDir;

    use super::*;

    struct TestFiles {
        _temp_dir: TempDir,
        ca_cert: String,
        client_cert: String,
        client_key: String,
    }

    impl TestFiles {
        fn new() -> std::io::Result<Self> {
            let temp_dir = TempDir::new()?;

            let ca_cert = temp_dir.path().join("root-CA.crt");
            let client_cert = temp_dir.path().join("garduino.cert.pem");
            let client_key = temp_dir.path().join("garduino.private.key");

            File::create(&ca_cert)?.write_all(b"ca certificate content")?;
            File::create(&client_cert)?.write_all(b"client certificate content")?;
            File::create(&client_key)?.write_all(b"client key content")?;

            Ok(TestFiles {
                _temp_dir: temp_dir,
                ca_cert: ca_cert.to_string_lossy().into_owned(),
                client_cert: client_cert.to_string_lossy().into_owned(),
                client_key: client_key.to_string_lossy().into_owned(),
            })
        }
    }

    #[tokio::test]
    async fn test_build_tcp_client() {
        let config = Config {
            host: "localhost".into(),
            port: 1883,
            keep_alive: 30,
            ..Default::default()
        };

        let builder = ClientBuilder::from_config(&config).unwrap();
        assert!(builder.tls_config.is_none());
        assert!(builder.build().is_ok());
    }

    #[tokio::test]
    async fn test_tls_without_ca_path_is_plain_tcp() {
        let config = Config {
            tls: Some(TlsConfig::default()),
            ..Default::default()
        };

        let builder = ClientBuilder::from_config(&config).unwrap();
        assert!(builder.tls_config.is_none());
    }

    #[tokio::test]
    async fn test_build_tls_missing_ca() {
        let config = Config {
            tls: Some(TlsConfig::with_ca_only("/nonexistent/root-CA.crt")),
            ..Default::default()
        };

        assert!(matches!(
            ClientBuilder::from_config(&config),
            Err(TransferError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_build_tls_cert_without_key() {
        let files = TestFiles::new().expect("Failed to create test files");
        let config = Config {
            tls: Some(TlsConfig {
                ca_cert_path: Some(files.ca_cert.clone()),
                client_cert_path: Some(files.client_cert.clone()),
                client_key_path: None,
            }),
            ..Default::default()
        };

        let result = ClientBuilder::from_config(&config).unwrap().build();
        assert!(matches!(result, Err(TransferError::ClientSetup(_))));
    }

    #[tokio::test]
    async fn test_from_config_with_tls() {
        let files = TestFiles::new().expect("Failed to create test files");
        let config = Config {
            tls: Some(TlsConfig::new(
                &files.ca_cert,
                &files.client_cert,
                &files.client_key,
            )),
            ..Default::default()
        };

        let builder = ClientBuilder::from_config(&config).unwrap();
        assert_eq!(builder.cap, 10);
        assert!(builder.tls_config.is_some());
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_from_config_invalid() {
        let config = Config {
            host: String::new(),
            ..Default::default()
        };

        assert!(matches!(
            ClientBuilder::from_config(&config),
            Err(TransferError::ConfigError(_))
        ));
    }
}
