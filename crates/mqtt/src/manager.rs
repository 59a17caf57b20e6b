//! Entry point that wires the client, connection kernel and shadow handles.
//!
//! ```ignore
//! let instance = MqttManager::from_config(config)?.build_and_start().await?;
//! instance.wait_connected(instance.config().connection_timeout()).await?;
//!
//! let shadow = instance.shadow("Bot");
//! shadow.subscribe_responses().await?;
//! shadow.spawn_dispatcher(instance.subscribe_incoming(), instance.state_receiver(), instance.cancel_token());
//! ...
//! instance.shutdown().await?;
//! ```

use std::{sync::Arc, time::Duration};

use rumqttc::{AsyncClient, Publish};
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{
    backoff::Backoff, client::ClientBuilder, config::Config, connection::ConnectionKernel,
    error::TransferError, shadow::ShadowHandler, state::ConnectionState,
};

pub struct MqttManager {
    config: Config,
    cancel_token: CancellationToken,
}

impl MqttManager {
    pub fn from_config(config: Config) -> Result<Self, TransferError> {
        Ok(Self {
            config,
            cancel_token: CancellationToken::new(),
        })
    }

    /// Builds the client and spawns the connection kernel.
    ///
    /// Returns as soon as the kernel task is running; use
    /// [`MqttInstance::wait_connected`] to wait for the CONNACK.
    pub async fn build_and_start(self) -> Result<MqttInstance, TransferError> {
        info!(
            "Connecting to {}:{} with client ID '{}'",
            self.config.host, self.config.port, self.config.client_id
        );

        let (client, event_loop) = ClientBuilder::from_config(&self.config)?.build()?;

        let mut kernel = ConnectionKernel::new(
            client.clone(),
            event_loop,
            Backoff::from_config(&self.config),
            self.cancel_token.clone(),
        )
        .with_disconnect_timeout(self.config.disconnect_timeout());

        let state_rx = kernel.subscribe_state();
        let incoming_tx = kernel.incoming_sender();

        let kernel_task = tokio::spawn(async move {
            let result = kernel.run().await;
            if let Err(e) = &result {
                error!("MQTT connection kernel exited with error: {}", e);
            }
            result
        });

        Ok(MqttInstance {
            client,
            config: Arc::new(self.config),
            state_rx,
            incoming_tx,
            cancel_token: self.cancel_token,
            kernel_task: Arc::new(Mutex::new(Some(kernel_task))),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}

/// A started connection. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MqttInstance {
    client: AsyncClient,
    config: Arc<Config>,
    state_rx: watch::Receiver<ConnectionState>,
    incoming_tx: broadcast::Sender<Publish>,
    cancel_token: CancellationToken,
    kernel_task: Arc<Mutex<Option<JoinHandle<Result<(), TransferError>>>>>,
}

impl MqttInstance {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn subscribe_incoming(&self) -> broadcast::Receiver<Publish> {
        self.incoming_tx.subscribe()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state_rx.borrow().is_connected()
    }

    /// Waits for the broker to accept the connection.
    ///
    /// Fails with `ConnectTimeout` when no CONNACK arrives in time, and with
    /// `ConnectionKernel` when the kernel stopped (fatal error or retries
    /// exhausted) before connecting.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), TransferError> {
        let mut state_rx = self.state_rx.clone();
        // The `watch::Ref` from `wait_for` borrows `state_rx`; drop it here.
        let waited = tokio::time::timeout(timeout, state_rx.wait_for(ConnectionState::is_connected))
            .await
            .map(|result| result.map(|_| ()));

        match waited {
            Ok(Ok(())) => {
                info!("Connected to {}:{}", self.config.host, self.config.port);
                Ok(())
            }
            Ok(Err(_)) => Err(TransferError::ConnectionKernel(format!(
                "connection kernel stopped before connecting ({})",
                *self.state_rx.borrow()
            ))),
            Err(_) => Err(TransferError::ConnectTimeout(timeout)),
        }
    }

    /// A handle to the named shadow of `thing_name`, using this connection's
    /// client id for correlation tokens.
    pub fn shadow(&self, thing_name: impl Into<String>) -> ShadowHandler {
        ShadowHandler::new(
            self.client.clone(),
            self.config.client_id.clone(),
            thing_name,
            self.config.operation_timeout(),
        )
    }

    /// Stops the kernel and waits for it to send DISCONNECT (bounded by the
    /// disconnect timeout). Later calls are no-ops.
    pub async fn shutdown(&self) -> Result<(), TransferError> {
        self.cancel_token.cancel();

        let Some(task) = self.kernel_task.lock().await.take() else {
            return Ok(());
        };

        match task.await {
            Ok(Ok(())) => {
                info!("MQTT connection closed");
                Ok(())
            }
            // Already logged by the kernel task.
            Ok(Err(_)) => Ok(()),
            Err(e) => {
                warn!("MQTT connection kernel task failed: {}", e);
                Err(TransferError::ConnectionKernel(e.to_string()))
            }
        }
    }
}
