//! Command line flags of both programs.
//!
//! Flags override the matching configuration fields; everything else comes
//! from the TOML file or the built-in defaults.

use clap::{error::ErrorKind, CommandFactory, Parser};

use crate::config::Config;
use garduino_mqtt::TlsConfig;

/// Publishes garden sensor readings to a device shadow.
#[derive(Parser, Debug, Clone)]
#[command(name = "garduino-shadow", version)]
pub struct ShadowCli {
    /// Shadow service endpoint host.
    #[arg(short = 'e', long = "endpoint")]
    pub endpoint: String,

    /// Root CA file path.
    #[arg(short = 'r', long = "rootCA")]
    pub root_ca: String,

    /// Client certificate file path.
    #[arg(short = 'c', long = "cert")]
    pub cert: Option<String>,

    /// Private key file path.
    #[arg(short = 'k', long = "key")]
    pub key: Option<String>,

    /// Broker port [default: 8883]
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Targeted thing name [default: Bot]
    #[arg(short = 'n', long = "thingName")]
    pub thing_name: Option<String>,

    /// Targeted client id [default: basicShadowUpdater]
    #[arg(short = 'i', long = "clientId")]
    pub client_id: Option<String>,
}

impl ShadowCli {
    /// Certificate and key are both required for mutual TLS. The error exits
    /// with status 2 like any other usage error.
    pub fn check_credentials(&self) -> Result<(), clap::Error> {
        if self.cert.is_none() || self.key.is_none() {
            return Err(Self::command().error(
                ErrorKind::MissingRequiredArgument,
                "Missing credentials for authentication.",
            ));
        }
        Ok(())
    }

    /// Writes the flags into `config`. Call after [`check_credentials`](Self::check_credentials).
    pub fn apply(&self, config: &mut Config) {
        let transport = &mut config.transport;
        transport.host = self.endpoint.clone();
        if let Some(port) = self.port {
            transport.port = port;
        }
        if let Some(client_id) = &self.client_id {
            transport.client_id = client_id.clone();
        }
        transport.tls = Some(match (&self.cert, &self.key) {
            (Some(cert), Some(key)) => TlsConfig::new(&self.root_ca, cert, key),
            _ => TlsConfig::with_ca_only(&self.root_ca),
        });

        if let Some(thing_name) = &self.thing_name {
            config.shadow.thing_name = thing_name.clone();
        }
    }
}

/// Samples a serial device into a CSV log.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "garduino-logger", version)]
pub struct LoggerCli {
    /// Serial device path.
    #[arg(long)]
    pub port_path: Option<String>,

    /// CSV log file path.
    #[arg(long)]
    pub output: Option<String>,

    /// Keep one line out of this many.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub sample_period: Option<u32>,
}

impl LoggerCli {
    pub fn apply(&self, config: &mut Config) {
        let serial = &mut config.serial;
        if let Some(port_path) = &self.port_path {
            serial.port_path = port_path.clone();
        }
        if let Some(output) = &self.output {
            serial.output_path = output.clone();
        }
        if let Some(sample_period) = self.sample_period {
            serial.sample_period = sample_period;
        }
    }
}
