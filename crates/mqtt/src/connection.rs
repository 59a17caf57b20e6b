// ============================================================================
// connection.rs
// ============================================================================
//! Connection kernel: drives the rumqttc event loop.
//!
//! ```text
//! ShadowHandler / MqttInstance (use the AsyncClient)
//!     ↓
//! ConnectionKernel (polls the event loop, reconnects with backoff)
//!     ↓
//! rumqttc AsyncClient & EventLoop
//!     ↓
//! Network (TLS)
//! ```
//!
//! The kernel publishes [`ConnectionState`] on a `watch` channel and forwards
//! every incoming PUBLISH on a `broadcast` channel so response dispatchers
//! can match them to requests.
//!
//! ```ignore
//! let (client, event_loop) = ClientBuilder::from_config(&config)?.build()?;
//! let mut kernel = ConnectionKernel::new(client, event_loop, Backoff::from_config(&config), cancel);
//! let state_rx = kernel.subscribe_state();
//! let incoming_rx = kernel.subscribe_incoming();
//! kernel.run().await?;
//! ```

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Packet, Publish,
};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{backoff::Backoff, error::TransferError, state::ConnectionState};

/// Capacity of the incoming-publish broadcast channel.
const INCOMING_CAPACITY: usize = 64;

/// Core connection management logic.
///
/// # Responsibilities
///
/// 1. **Event Loop Management**: polls rumqttc's event loop, the only thing
///    that moves packets in either direction
/// 2. **Error Handling**: separates fatal errors (TLS, refused credentials)
///    from transient ones
/// 3. **Retry Logic**: waits out [`Backoff`] delays between attempts
/// 4. **State Tracking**: broadcasts [`ConnectionState`] changes
/// 5. **Graceful Shutdown**: sends DISCONNECT when the token is cancelled
///
/// # Concurrency
///
/// Runs on a single task. The `AsyncClient` can be cloned and used from
/// other tasks.
pub struct ConnectionKernel {
    client: AsyncClient,
    event_loop: EventLoop,
    is_connected: Arc<AtomicBool>,
    backoff: Backoff,
    cancel: CancellationToken,
    /// Upper bound for handing DISCONNECT to the event loop on shutdown.
    disconnect_timeout: Duration,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    incoming_tx: broadcast::Sender<Publish>,
}

impl ConnectionKernel {
    /// Creates a new connection kernel in the `Connecting` state.
    ///
    /// # Arguments
    /// - `client`: MQTT client, also used to send DISCONNECT on shutdown
    /// - `event_loop`: event loop this kernel drives exclusively
    /// - `backoff`: reconnect policy, reset on every CONNACK
    /// - `cancel`: token that ends [`ConnectionKernel::run`]
    pub fn new(
        client: AsyncClient,
        event_loop: EventLoop,
        backoff: Backoff,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (incoming_tx, _) = broadcast::channel(INCOMING_CAPACITY);
        Self {
            client,
            event_loop,
            is_connected: Arc::new(AtomicBool::new(false)),
            backoff,
            cancel,
            disconnect_timeout: Duration::from_secs(10),
            state_tx,
            state_rx,
            incoming_tx,
        }
    }

    /// Bounds how long shutdown waits for DISCONNECT to go out. Defaults to
    /// 10 seconds.
    pub fn with_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    /// The receiver sees the current state immediately.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Incoming PUBLISH packets, in arrival order. Slow receivers lag rather
    /// than block the event loop.
    pub fn subscribe_incoming(&self) -> broadcast::Receiver<Publish> {
        self.incoming_tx.subscribe()
    }

    /// Sender side of the incoming channel, for handing out receivers after
    /// the kernel has moved onto its task.
    pub fn incoming_sender(&self) -> broadcast::Sender<Publish> {
        self.incoming_tx.clone()
    }

    /// Shared flag, true between CONNACK and the next disconnect.
    pub fn is_connected(&self) -> Arc<AtomicBool> {
        self.is_connected.clone()
    }

    fn update_state(&self, state: ConnectionState) {
        if *self.state_tx.borrow() == state {
            return;
        }
        info!("Connection state changed to: {}", state);
        // The kernel holds a receiver itself, so send only fails after drop.
        let _ = self.state_tx.send(state);
    }

    /// Polls the event loop until cancelled, a fatal error occurs, or the
    /// backoff policy gives up.
    ///
    /// Returns `Ok(())` on cancellation after a best-effort DISCONNECT.
    ///
    /// # Errors
    ///
    /// - `TransferError::ClientConnection` for a fatal connection error
    ///   (TLS failure, bad credentials, not authorized)
    /// - `TransferError::RetriesPolicy` once the attempt cap is exhausted
    ///
    /// The state is `Disconnected` in both cases.
    pub async fn run(&mut self) -> Result<(), TransferError> {
        if self.is_connected.load(Ordering::Acquire) {
            warn!("Connection kernel already running");
            return Ok(());
        }

        self.update_state(ConnectionState::Connecting);
        self.backoff.reset();

        info!("Starting connection event loop...");
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!("Shutdown signal received, disconnecting...");
                    self.is_connected.store(false, Ordering::Release);
                    self.disconnect().await;
                    self.update_state(ConnectionState::Disconnected("Shutdown requested".into()));
                    info!("Connection kernel shutdown completed");
                    return Ok(());
                }

                event_result = self.event_loop.poll() => {
                    match event_result {
                        Ok(event) => self.handle_event(event),
                        Err(e) => {
                            self.is_connected.store(false, Ordering::Release);

                            if is_fatal_error(&e) {
                                error!("Fatal connection error: {}", get_error_message(&e));
                                self.update_state(ConnectionState::Disconnected(e.to_string()));
                                return Err(TransferError::from(e));
                            }

                            match self.backoff.next_sleep() {
                                Ok(sleep_duration) => {
                                    warn!(
                                        "Reconnecting in {:.2} seconds due to error: {}",
                                        sleep_duration.as_secs_f64(),
                                        get_error_message(&e)
                                    );
                                    self.update_state(ConnectionState::Reconnecting(
                                        sleep_duration.as_secs_f64(),
                                    ));
                                    tokio::select! {
                                        _ = self.cancel.cancelled() => {}
                                        _ = tokio::time::sleep(sleep_duration) => {
                                            self.update_state(ConnectionState::Connecting);
                                        }
                                    }
                                }
                                Err(backoff_err) => {
                                    error!("Giving up on the broker: {}", backoff_err);
                                    self.update_state(ConnectionState::Disconnected(
                                        backoff_err.to_string(),
                                    ));
                                    return Err(backoff_err.into());
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(conn_ack)) => {
                if conn_ack.code == ConnectReturnCode::Success {
                    info!("Connection established successfully.");
                    self.is_connected.store(true, Ordering::Release);
                    self.backoff.reset();
                    self.update_state(ConnectionState::Connected);
                }
            }
            Event::Incoming(Packet::Publish(publish)) => {
                trace!("Received publish on topic {}", publish.topic);
                if self.incoming_tx.send(publish).is_err() {
                    debug!("No receivers for incoming publish");
                }
            }
            Event::Incoming(Packet::Disconnect) => {
                warn!("Disconnected by broker");
                self.is_connected.store(false, Ordering::Release);
                self.update_state(ConnectionState::Disconnected(
                    "Disconnected by broker".into(),
                ));
            }
            Event::Incoming(_) => {}
            Event::Outgoing(outgoing) => {
                trace!("Outgoing packet: {:?}", outgoing);
            }
        }
    }

    /// Queues DISCONNECT and polls the event loop until it is flushed or the
    /// disconnect timeout elapses.
    async fn disconnect(&mut self) {
        let timeout = self.disconnect_timeout;
        let client = &self.client;
        let event_loop = &mut self.event_loop;

        let flush = async {
            client.disconnect().await?;
            loop {
                match event_loop.poll().await {
                    Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => break,
                    Ok(_) => continue,
                    Err(e) => return Err(TransferError::from(e)),
                }
            }
            Ok::<(), TransferError>(())
        };

        match tokio::time::timeout(timeout, flush).await {
            Ok(Ok(())) => debug!("DISCONNECT sent"),
            Ok(Err(e)) => warn!("Error sending disconnect packet: {}", e),
            Err(_) => warn!(
                "DISCONNECT not flushed within {:?}, dropping connection",
                timeout
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Fatal,
    Reconnect,
}

// ============================================================================
// Error classification
// ============================================================================

fn classify_connection_error(err: &ConnectionError) -> Disposition {
    use Disposition::*;

    match err {
        // Bad certificates or key material.
        ConnectionError::Tls(_) => Fatal,
        ConnectionError::MqttState(_) => Fatal,
        ConnectionError::NotConnAck(_) => Fatal,
        ConnectionError::RequestsDone => Fatal,

        ConnectionError::Io(e) => match e.kind() {
            std::io::ErrorKind::AddrInUse
            | std::io::ErrorKind::PermissionDenied
            | std::io::ErrorKind::InvalidInput
            | std::io::ErrorKind::InvalidData => Fatal,
            _ => Reconnect,
        },

        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => Reconnect,

        ConnectionError::ConnectionRefused(code) => match code {
            ConnectReturnCode::RefusedProtocolVersion
            | ConnectReturnCode::BadClientId
            | ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::NotAuthorized => Fatal,
            _ => Reconnect,
        },

        #[allow(unreachable_patterns)]
        _ => Reconnect,
    }
}

fn is_fatal_error(err: &ConnectionError) -> bool {
    matches!(classify_connection_error(err), Disposition::Fatal)
}

/// Innermost message of an error chain, unquoted.
fn get_error_message(e: &dyn std::error::Error) -> String {
    let mut current = e;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string().trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use std::io;

    use rumqttc::MqttOptions;

    use super::*;

    fn kernel(cancel: CancellationToken) -> ConnectionKernel {
        // Port 1 on localhost refuses connections, which keeps the tests
        // offline.
        let (client, event_loop) =
            AsyncClient::new(MqttOptions::new("garduino-test", "127.0.0.1", 1), 10);
        ConnectionKernel::new(client, event_loop, Backoff::default(), cancel)
            .with_disconnect_timeout(Duration::from_millis(200))
    }

    #[test]
    fn test_fatal_error_detection() {
        let refused = ConnectionError::Io(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert!(!is_fatal_error(&refused));

        let denied = ConnectionError::Io(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "permission denied",
        ));
        assert!(is_fatal_error(&denied));

        assert!(is_fatal_error(&ConnectionError::ConnectionRefused(
            ConnectReturnCode::NotAuthorized
        )));
        assert!(!is_fatal_error(&ConnectionError::ConnectionRefused(
            ConnectReturnCode::ServiceUnavailable
        )));
        assert!(!is_fatal_error(&ConnectionError::NetworkTimeout));
    }

    #[test]
    fn test_error_message_is_unquoted() {
        let err = io::Error::new(io::ErrorKind::Other, "\"broker gone\"");
        assert_eq!(get_error_message(&err), "broker gone");
    }

    #[tokio::test]
    async fn test_state_subscription() {
        let kernel = kernel(CancellationToken::new());
        let mut state_rx = kernel.subscribe_state();
        assert_eq!(*state_rx.borrow(), ConnectionState::Connecting);

        kernel.update_state(ConnectionState::Connected);
        state_rx.changed().await.unwrap();
        assert_eq!(*state_rx.borrow(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_incoming_publish_is_forwarded() {
        let mut kernel = kernel(CancellationToken::new());
        let mut incoming = kernel.subscribe_incoming();

        let publish = Publish::new(
            "$aws/things/Bot/shadow/update/accepted",
            rumqttc::QoS::AtLeastOnce,
            br#"{"clientToken":"t"}"#.to_vec(),
        );
        kernel.handle_event(Event::Incoming(Packet::Publish(publish)));

        let received = incoming.recv().await.unwrap();
        assert_eq!(received.topic, "$aws/things/Bot/shadow/update/accepted");
    }

    #[tokio::test]
    async fn test_connack_marks_connected_and_resets_backoff() {
        let mut kernel = kernel(CancellationToken::new());
        kernel.backoff.next_sleep().unwrap();
        kernel.backoff.next_sleep().unwrap();

        kernel.handle_event(Event::Incoming(Packet::ConnAck(rumqttc::ConnAck::new(
            ConnectReturnCode::Success,
            false,
        ))));

        assert!(kernel.is_connected().load(Ordering::Acquire));
        assert_eq!(kernel.backoff.attempt(), 0);
        assert!(kernel.subscribe_state().borrow().is_connected());
    }

    #[tokio::test]
    async fn test_run_returns_on_cancel() {
        let cancel = CancellationToken::new();
        let mut kernel = kernel(cancel.clone());
        let state_rx = kernel.subscribe_state();
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), kernel.run()).await;
        assert!(matches!(result, Ok(Ok(()))));
        assert!(matches!(
            *state_rx.borrow(),
            ConnectionState::Disconnected(_)
        ));
    }
}
