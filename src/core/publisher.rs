//! Periodic shadow publisher.
//!
//! Every tick takes a `Reading` from the injected source, logs it, and
//! submits it as a shadow update. The outcome of each request is awaited and
//! logged on its own task so a slow response never delays the next tick.

use std::sync::Arc;

use garduino_mqtt::{ShadowHandler, ShadowOperation, ShadowResponse};
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

use super::{
    error::ShadowError,
    reading::{ReadingSource, ShadowEnvelope},
};
use crate::config::shadow::ShadowConfig;

pub struct ShadowPublisher {
    shadow: ShadowHandler,
    source: Arc<dyn ReadingSource>,
    config: ShadowConfig,
}

impl ShadowPublisher {
    pub fn new(shadow: ShadowHandler, source: Arc<dyn ReadingSource>, config: ShadowConfig) -> Self {
        if config.legacy_pos_from_row {
            warn!("legacy_pos_from_row is enabled: reported pos will repeat the row value");
        }
        Self {
            shadow,
            source,
            config,
        }
    }

    /// Requests deletion of the stored shadow document. The outcome is
    /// logged in the background.
    pub async fn delete_previous(&self) -> Result<JoinHandle<ShadowResponse>, ShadowError> {
        let pending = self.shadow.delete().await?;
        info!("Delete request {} submitted", pending.token());
        Ok(spawn_outcome_logger(ShadowOperation::Delete, pending))
    }

    /// Takes one reading and submits it. The returned handle resolves once
    /// the outcome has been logged.
    pub async fn publish_once(&self) -> Result<JoinHandle<ShadowResponse>, ShadowError> {
        let reading = self.source.produce_reading().await?;
        reading.validate()?;
        reading.log();

        let document = reading
            .to_envelope(self.config.legacy_pos_from_row)
            .to_value()?;
        let pending = self.shadow.update(document).await?;
        info!("Update request {} submitted", pending.token());

        Ok(spawn_outcome_logger(ShadowOperation::Update, pending))
    }

    /// Publishes on a fixed cadence until `cancel` fires. Errors of a single
    /// tick are logged and the next tick proceeds.
    ///
    /// Submitting waits for room in the client's request queue, which does
    /// not drain while the broker is unreachable. Every submission therefore
    /// races `cancel` so shutdown never waits on the transport.
    pub async fn run(self, cancel: CancellationToken) {
        if self.config.delete_on_start {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shadow publisher stopped before the first update");
                    return;
                }
                result = self.delete_previous() => {
                    if let Err(e) = result {
                        error!("Failed to request shadow deletion: {}", e);
                    }
                }
            }
        }

        let mut ticker = interval(self.config.publish_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Publishing to shadow '{}' every {}s",
            self.shadow.thing_name(),
            self.config.publish_interval
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!("Cancelled while an update was waiting for the transport");
                    break;
                }
                result = self.publish_once() => {
                    if let Err(e) = result {
                        error!("Publish failed: {}", e);
                    }
                }
            }
        }

        info!("Shadow publisher stopped");
    }
}

fn spawn_outcome_logger(
    operation: ShadowOperation,
    pending: garduino_mqtt::PendingRequest,
) -> JoinHandle<ShadowResponse> {
    tokio::spawn(
        async move {
            let response = pending.outcome().await;
            log_outcome(operation, &response);
            response
        }
        .in_current_span(),
    )
}

/// Logs a request outcome. Accepted updates are parsed and every reported
/// field is logged; timeouts carry no payload and only the token is logged.
pub fn log_outcome(operation: ShadowOperation, response: &ShadowResponse) {
    let request = match operation {
        ShadowOperation::Update => "Update request",
        ShadowOperation::Delete => "Delete request",
    };

    match response {
        ShadowResponse::Accepted { token, payload } => {
            info!("{} with token: {} accepted!", request, token);
            if operation == ShadowOperation::Update {
                match ShadowEnvelope::from_value(payload) {
                    Ok(envelope) => envelope.state.reported.log(),
                    Err(e) => warn!("Accepted update echo could not be parsed: {}", e),
                }
            }
        }
        ShadowResponse::Rejected { token, payload } => {
            warn!("{} {} rejected!", request, token);
            if let (Some(code), Some(message)) = (payload.get("code"), payload.get("message")) {
                warn!("Rejection {}: {}", code, message);
            }
        }
        ShadowResponse::Timeout { token } => {
            warn!("{} {} time out!", request, token);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rumqttc::{AsyncClient, EventLoop, MqttOptions};
    use serde_json::json;
    use tracing_test::traced_test;

    use super::*;
    use crate::core::reading::{Reading, SensorError, StaticReadingSource};

    struct FailingSource;

    #[async_trait::async_trait]
    impl ReadingSource for FailingSource {
        async fn produce_reading(&self) -> Result<Reading, SensorError> {
            Err(SensorError::Unavailable("board not answering".into()))
        }
    }

    /// Handler on a client whose event loop is never polled, so every
    /// request times out.
    fn offline_shadow() -> (ShadowHandler, EventLoop) {
        let (client, event_loop) =
            AsyncClient::new(MqttOptions::new("basicShadowUpdater", "127.0.0.1", 1), 10);
        (
            ShadowHandler::new(client, "basicShadowUpdater", "Bot", Duration::from_millis(50)),
            event_loop,
        )
    }

    fn publisher(source: Arc<dyn ReadingSource>, config: ShadowConfig) -> (ShadowPublisher, EventLoop) {
        let (shadow, event_loop) = offline_shadow();
        (ShadowPublisher::new(shadow, source, config), event_loop)
    }

    #[test]
    #[traced_test]
    fn test_accepted_update_logs_every_field() {
        let payload = json!({
            "state": {"reported": {
                "row": "3", "pos": "0", "moistureV": 3.0, "moistureLevel": 350,
                "lightV": 2.7, "lightLevel": 300, "tempV": 2.5, "tempC": 29.43
            }},
            "version": 12,
            "clientToken": "basicShadowUpdater_1"
        });
        log_outcome(
            ShadowOperation::Update,
            &ShadowResponse::Accepted {
                token: "basicShadowUpdater_1".into(),
                payload,
            },
        );

        assert!(logs_contain(
            "Update request with token: basicShadowUpdater_1 accepted!"
        ));
        assert!(logs_contain("Pos: 0"));
        assert!(logs_contain("moistureLevel: 350"));
        assert!(logs_contain("LightLevel: 300"));
        assert!(logs_contain("temperatureC: 29.43"));
    }

    #[test]
    #[traced_test]
    fn test_timeout_logs_token_only() {
        log_outcome(
            ShadowOperation::Update,
            &ShadowResponse::Timeout {
                token: "basicShadowUpdater_2".into(),
            },
        );

        assert!(logs_contain("Update request basicShadowUpdater_2 time out!"));
        assert!(!logs_contain("Row:"));
    }

    #[test]
    #[traced_test]
    fn test_rejected_delete_logs_error_document() {
        log_outcome(
            ShadowOperation::Delete,
            &ShadowResponse::Rejected {
                token: "basicShadowUpdater_3".into(),
                payload: json!({"code": 404, "message": "No shadow exists with name: 'Bot'"}),
            },
        );

        assert!(logs_contain("Delete request basicShadowUpdater_3 rejected!"));
        assert!(logs_contain("Rejection 404"));
    }

    #[test]
    #[traced_test]
    fn test_unparseable_accepted_echo_is_not_fatal() {
        log_outcome(
            ShadowOperation::Update,
            &ShadowResponse::Accepted {
                token: "basicShadowUpdater_4".into(),
                payload: json!({"state": {"desired": {}}}),
            },
        );

        assert!(logs_contain("accepted!"));
        assert!(logs_contain("could not be parsed"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_legacy_mode_warns() {
        let config = ShadowConfig {
            legacy_pos_from_row: true,
            ..Default::default()
        };
        let (_publisher, _event_loop) = publisher(Arc::new(StaticReadingSource::default()), config);
        assert!(logs_contain("legacy_pos_from_row is enabled"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_publish_once_logs_reading_and_timeout() {
        let (publisher, _event_loop) =
            publisher(Arc::new(StaticReadingSource::default()), ShadowConfig::default());

        let handle = publisher.publish_once().await.unwrap();
        let response = handle.await.unwrap();

        assert_eq!(response.status(), "timeout");
        assert!(logs_contain("Row: 3"));
        assert!(logs_contain("Temperature (C): 29.43"));
        assert!(logs_contain(&format!(
            "Update request {} time out!",
            response.token()
        )));
    }

    #[tokio::test]
    async fn test_sensor_failure_is_returned() {
        let (publisher, _event_loop) = publisher(Arc::new(FailingSource), ShadowConfig::default());
        assert!(matches!(
            publisher.publish_once().await,
            Err(ShadowError::Sensor(_))
        ));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_run_deletes_once_then_publishes_until_cancelled() {
        let config = ShadowConfig {
            publish_interval: 1,
            ..Default::default()
        };
        let (publisher, _event_loop) = publisher(Arc::new(StaticReadingSource::default()), config);
        let cancel = CancellationToken::new();

        let run = tokio::spawn(publisher.run(cancel.clone()).in_current_span());
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("publisher did not stop")
            .unwrap();

        assert!(logs_contain("Delete request"));
        assert!(logs_contain("Update request"));
        assert!(logs_contain("Shadow publisher stopped"));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_cancel_while_request_queue_is_full() {
        // Nothing polls the event loop, so the 10-slot request queue fills
        // up and the next update waits for room that never comes.
        let (publisher, _event_loop) =
            publisher(Arc::new(StaticReadingSource::default()), ShadowConfig::default());
        let cancel = CancellationToken::new();

        let run = tokio::spawn(publisher.run(cancel.clone()).in_current_span());
        tokio::time::sleep(Duration::from_secs(200)).await;
        cancel.cancel();

        let stopped = tokio::time::timeout(Duration::from_secs(60), run).await;
        assert!(stopped.is_ok(), "publisher ignored cancellation");
        assert!(logs_contain("waiting for the transport"));
        assert!(logs_contain("Shadow publisher stopped"));
    }
}
