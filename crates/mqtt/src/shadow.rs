//! Named device shadow over MQTT.
//!
//! Every request carries a `clientToken` of the form `<clientId>_<uuid>`.
//! The service echoes it on `.../accepted` or `.../rejected`; the dispatcher
//! task matches the echo against the pending table and resolves the
//! request's [`PendingRequest`]. A request with no echo within the operation
//! timeout resolves to [`ShadowResponse::Timeout`].
//!
//! ```ignore
//! let shadow = ShadowHandler::new(client, "basicShadowUpdater", "Bot", Duration::from_secs(5));
//! shadow.subscribe_responses().await?;
//! shadow.spawn_dispatcher(incoming_rx, state_rx, cancel.clone());
//!
//! let pending = shadow.update(json!({"state": {"reported": {"row": "3"}}})).await?;
//! match pending.outcome().await {
//!     ShadowResponse::Accepted { payload, .. } => { /* ... */ }
//!     ShadowResponse::Rejected { payload, .. } => { /* ... */ }
//!     ShadowResponse::Timeout { token } => { /* ... */ }
//! }
//! ```

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use rumqttc::{AsyncClient, Publish, QoS, SubscribeFilter};
use serde_json::{Map, Value};
use tokio::{
    sync::{broadcast, oneshot, watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{error::TransferError, state::ConnectionState};

/// Topic set of one named thing's classic shadow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowTopics {
    pub update: String,
    pub update_accepted: String,
    pub update_rejected: String,
    pub delete: String,
    pub delete_accepted: String,
    pub delete_rejected: String,
}

impl ShadowTopics {
    pub fn new(thing_name: &str) -> Self {
        let base = format!("$aws/things/{thing_name}/shadow");
        Self {
            update: format!("{base}/update"),
            update_accepted: format!("{base}/update/accepted"),
            update_rejected: format!("{base}/update/rejected"),
            delete: format!("{base}/delete"),
            delete_accepted: format!("{base}/delete/accepted"),
            delete_rejected: format!("{base}/delete/rejected"),
        }
    }

    pub fn response_topics(&self) -> [&str; 4] {
        [
            self.update_accepted.as_str(),
            self.update_rejected.as_str(),
            self.delete_accepted.as_str(),
            self.delete_rejected.as_str(),
        ]
    }

    /// Maps a response topic to the operation and whether it was accepted.
    pub fn classify(&self, topic: &str) -> Option<(ShadowOperation, bool)> {
        if topic == self.update_accepted {
            Some((ShadowOperation::Update, true))
        } else if topic == self.update_rejected {
            Some((ShadowOperation::Update, false))
        } else if topic == self.delete_accepted {
            Some((ShadowOperation::Delete, true))
        } else if topic == self.delete_rejected {
            Some((ShadowOperation::Delete, false))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowOperation {
    Update,
    Delete,
}

impl fmt::Display for ShadowOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShadowOperation::Update => write!(f, "update"),
            ShadowOperation::Delete => write!(f, "delete"),
        }
    }
}

/// Final outcome of a shadow request.
#[derive(Debug, Clone, PartialEq)]
pub enum ShadowResponse {
    /// The service applied the request. `payload` is the echoed document.
    Accepted { token: String, payload: Value },

    /// The service refused the request. `payload` is its error document
    /// (`code`, `message`), or `Null` when the body was not JSON.
    Rejected { token: String, payload: Value },

    /// No response within the operation timeout.
    Timeout { token: String },
}

impl ShadowResponse {
    pub fn token(&self) -> &str {
        match self {
            ShadowResponse::Accepted { token, .. }
            | ShadowResponse::Rejected { token, .. }
            | ShadowResponse::Timeout { token } => token,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            ShadowResponse::Accepted { .. } => "accepted",
            ShadowResponse::Rejected { .. } => "rejected",
            ShadowResponse::Timeout { .. } => "timeout",
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, ShadowResponse::Accepted { .. })
    }
}

type PendingTable = Arc<Mutex<HashMap<String, oneshot::Sender<ShadowResponse>>>>;

/// A submitted request waiting for its response.
#[derive(Debug)]
pub struct PendingRequest {
    token: String,
    rx: oneshot::Receiver<ShadowResponse>,
    timeout: Duration,
    pending: PendingTable,
}

impl PendingRequest {
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Waits for the response, bounded by the operation timeout. The table
    /// entry is dropped on timeout so a late response is ignored.
    pub async fn outcome(self) -> ShadowResponse {
        let PendingRequest {
            token,
            rx,
            timeout,
            pending,
        } = self;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) | Err(_) => {
                pending.lock().await.remove(&token);
                ShadowResponse::Timeout { token }
            }
        }
    }
}

/// Serializes a request document with its correlation token attached.
fn request_body(mut document: Map<String, Value>, token: &str) -> Result<Vec<u8>, TransferError> {
    document.insert("clientToken".into(), Value::String(token.to_string()));
    Ok(serde_json::to_vec(&document)?)
}

/// Handle to one named shadow. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ShadowHandler {
    client: AsyncClient,
    client_id: String,
    thing_name: String,
    topics: Arc<ShadowTopics>,
    pending: PendingTable,
    operation_timeout: Duration,
}

impl ShadowHandler {
    pub fn new(
        client: AsyncClient,
        client_id: impl Into<String>,
        thing_name: impl Into<String>,
        operation_timeout: Duration,
    ) -> Self {
        let thing_name = thing_name.into();
        Self {
            client,
            client_id: client_id.into(),
            topics: Arc::new(ShadowTopics::new(&thing_name)),
            thing_name,
            pending: Arc::new(Mutex::new(HashMap::new())),
            operation_timeout,
        }
    }

    pub fn thing_name(&self) -> &str {
        &self.thing_name
    }

    pub fn topics(&self) -> &ShadowTopics {
        &self.topics
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    fn next_token(&self) -> String {
        format!("{}_{}", self.client_id, Uuid::new_v4())
    }

    /// Subscribes the accepted/rejected topics of update and delete.
    pub async fn subscribe_responses(&self) -> Result<(), TransferError> {
        let filters: Vec<SubscribeFilter> = self
            .topics
            .response_topics()
            .iter()
            .map(|topic| SubscribeFilter::new(topic.to_string(), QoS::AtLeastOnce))
            .collect();

        self.client.subscribe_many(filters).await?;
        info!("Subscribed to shadow responses of '{}'", self.thing_name);
        Ok(())
    }

    /// Publishes `document` to the update topic with a fresh `clientToken`.
    ///
    /// `document` must be a JSON object, normally `{"state": {...}}`.
    pub async fn update(&self, document: Value) -> Result<PendingRequest, TransferError> {
        let Value::Object(document) = document else {
            return Err(TransferError::Serialization(
                "shadow update document must be a JSON object".into(),
            ));
        };
        let topic = self.topics.update.clone();
        self.submit(ShadowOperation::Update, topic, document).await
    }

    /// Deletes the whole shadow document.
    pub async fn delete(&self) -> Result<PendingRequest, TransferError> {
        let topic = self.topics.delete.clone();
        self.submit(ShadowOperation::Delete, topic, Map::new())
            .await
    }

    async fn submit(
        &self,
        operation: ShadowOperation,
        topic: String,
        document: Map<String, Value>,
    ) -> Result<PendingRequest, TransferError> {
        let token = self.next_token();
        let payload = request_body(document, &token)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            // Requests abandoned mid-publish or dropped unawaited.
            pending.retain(|_, tx| !tx.is_closed());
            pending.insert(token.clone(), tx);
        }

        if let Err(e) = self
            .client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
        {
            self.pending.lock().await.remove(&token);
            return Err(e.into());
        }

        debug!("Shadow {} submitted with token {}", operation, token);

        Ok(PendingRequest {
            token,
            rx,
            timeout: self.operation_timeout,
            pending: self.pending.clone(),
        })
    }

    /// Resolves the pending request named by the publish's `clientToken`.
    /// Returns `false` when the publish is not a shadow response or matches
    /// no pending request.
    pub async fn dispatch(&self, publish: &Publish) -> bool {
        let Some((operation, accepted)) = self.topics.classify(&publish.topic) else {
            return false;
        };

        let payload: Value = serde_json::from_slice(&publish.payload).unwrap_or(Value::Null);
        let Some(token) = payload.get("clientToken").and_then(Value::as_str) else {
            debug!(
                "Shadow {} response without clientToken on {}",
                operation, publish.topic
            );
            return false;
        };
        let token = token.to_string();

        let Some(tx) = self.pending.lock().await.remove(&token) else {
            debug!("No pending {} request for token {}", operation, token);
            return false;
        };

        let response = if accepted {
            ShadowResponse::Accepted { token, payload }
        } else {
            ShadowResponse::Rejected { token, payload }
        };

        // The requester may have timed out and dropped its receiver.
        tx.send(response).is_ok()
    }

    /// Spawns the task that routes incoming publishes to pending requests
    /// and re-subscribes the response topics after every reconnect.
    pub fn spawn_dispatcher(
        &self,
        mut incoming: broadcast::Receiver<Publish>,
        mut state_rx: watch::Receiver<ConnectionState>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let handler = self.clone();
        // Subscriptions for the current connection are made by the caller.
        state_rx.borrow_and_update();

        tokio::spawn(async move {
            info!("Shadow dispatcher started for '{}'", handler.thing_name);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,

                    received = incoming.recv() => match received {
                        Ok(publish) => {
                            handler.dispatch(&publish).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Shadow dispatcher lagged, {} responses dropped", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },

                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let connected = state_rx.borrow_and_update().is_connected();
                        if connected {
                            if let Err(e) = handler.subscribe_responses().await {
                                warn!("Failed to re-subscribe shadow responses: {}", e);
                            }
                        }
                    }
                }
            }
            info!("Shadow dispatcher stopped");
        })
    }
}
