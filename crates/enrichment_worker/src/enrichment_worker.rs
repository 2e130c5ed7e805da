use crate::domain::{
    publish_topic_for, serialize_enriched, DispatchQueueReceiver, EnrichmentError,
    EnrichmentService, IngressMessage,
};
use common::domain::EnrichedMessagePublisher;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub struct EnrichmentWorkerConfig {
    pub publish_topic_base: String,
}

/// Where the worker is in its per-message cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Processing,
    Publishing,
    ShuttingDown,
}

/// Result of handling one dequeued message
#[derive(Debug)]
pub enum MessageOutcome {
    Published { topic: String },
    PublishFailed { topic: String },
    Dropped(EnrichmentError),
}

/// Single consumer of the dispatch queue
///
/// Drains messages in FIFO order, enriches each one and hands the result to
/// the publisher. A failing message is logged and dropped; the loop only
/// stops on cancellation.
pub struct EnrichmentWorker {
    queue: DispatchQueueReceiver,
    service: Arc<EnrichmentService>,
    publisher: Arc<dyn EnrichedMessagePublisher>,
    publish_topic_base: String,
    state: watch::Sender<WorkerState>,
}

impl EnrichmentWorker {
    pub fn new(
        queue: DispatchQueueReceiver,
        service: Arc<EnrichmentService>,
        publisher: Arc<dyn EnrichedMessagePublisher>,
        config: EnrichmentWorkerConfig,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            queue,
            service,
            publisher,
            publish_topic_base: config.publish_topic_base,
            state,
        }
    }

    /// Observe state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    pub async fn run(mut self, token: CancellationToken) -> anyhow::Result<()> {
        info!(
            publish_topic_base = %self.publish_topic_base,
            "enrichment worker started"
        );

        loop {
            self.state.send_replace(WorkerState::Idle);

            let Some(message) = self.queue.dequeue(&token).await else {
                break;
            };

            self.process_message(message).await;
        }

        self.state.send_replace(WorkerState::ShuttingDown);

        if token.is_cancelled() {
            info!(
                abandoned = self.queue.len(),
                "enrichment worker stopped"
            );
        } else {
            warn!("dispatch queue closed, enrichment worker stopped");
        }

        Ok(())
    }

    #[instrument(
        name = "process_message",
        skip_all,
        fields(topic = %message.topic, payload_size = message.payload.len())
    )]
    pub async fn process_message(&self, message: IngressMessage) -> MessageOutcome {
        let started = Instant::now();
        self.state.send_replace(WorkerState::Processing);

        let outcome = match self.prepare(&message).await {
            Ok((payload, topic)) => {
                self.state.send_replace(WorkerState::Publishing);

                match self.publisher.publish(payload, &topic).await {
                    Ok(()) => {
                        debug!(publish_topic = %topic, "published enriched message");
                        MessageOutcome::Published { topic }
                    }
                    Err(e) => {
                        error!(publish_topic = %topic, error = %e, "failed to publish enriched message");
                        MessageOutcome::PublishFailed { topic }
                    }
                }
            }
            Err(err) => {
                log_failure(&err, &message);
                MessageOutcome::Dropped(err)
            }
        };

        debug!(
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "message processing finished"
        );

        outcome
    }

    async fn prepare(
        &self,
        message: &IngressMessage,
    ) -> Result<(bytes::Bytes, String), EnrichmentError> {
        let enriched = self.service.enrich(&message.topic, &message.payload).await?;
        let payload = serialize_enriched(&enriched)?;
        let topic = publish_topic_for(&self.publish_topic_base, &enriched);
        Ok((payload, topic))
    }
}

fn log_failure(err: &EnrichmentError, message: &IngressMessage) {
    let kind = err.kind();
    match err {
        EnrichmentError::WrongDataModel { .. } => {
            // A configured filter, not a fault
            debug!(error_kind = kind, reason = %err, "skipping message");
            return;
        }
        EnrichmentError::Malformed { .. } | EnrichmentError::RegistryIncomplete { .. } => {
            warn!(error_kind = kind, error = %err, "dropping message");
        }
        EnrichmentError::LookupFailed { source_topic, .. } => {
            error!(error_kind = kind, source_topic = %source_topic, error = %err, "dropping message");
        }
        EnrichmentError::Serialize(_) => {
            error!(error_kind = kind, error = %err, "dropping message");
        }
    }
    debug!(payload = %String::from_utf8_lossy(&message.payload), "dropped message payload");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dispatch_queue;
    use common::domain::{MockEnrichedMessagePublisher, MockRegistryLookup};

    fn worker_with(
        registry: MockRegistryLookup,
        publisher: MockEnrichedMessagePublisher,
    ) -> EnrichmentWorker {
        worker_expecting(registry, publisher, None)
    }

    fn worker_expecting(
        registry: MockRegistryLookup,
        publisher: MockEnrichedMessagePublisher,
        expected_data_model: Option<String>,
    ) -> EnrichmentWorker {
        let (_tx, rx) = dispatch_queue(4).unwrap();
        EnrichmentWorker::new(
            rx,
            Arc::new(EnrichmentService::new(Arc::new(registry), expected_data_model)),
            Arc::new(publisher),
            EnrichmentWorkerConfig {
                publish_topic_base: "base".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_process_message_publish_failure_is_reported() {
        // Arrange
        let mut mock_registry = MockRegistryLookup::new();
        mock_registry
            .expect_get()
            .returning(|_| Ok(r#"{"siteCode":"S1","dataModel":"modelA"}"#.as_bytes().to_vec()));

        let mut mock_publisher = MockEnrichedMessagePublisher::new();
        mock_publisher
            .expect_publish()
            .times(1)
            .returning(|_, topic| {
                Err(common::domain::DomainError::PublishFailed(
                    topic.to_string(),
                    "broker unavailable".to_string(),
                ))
            });

        let worker = worker_with(mock_registry, mock_publisher);
        let state = worker.subscribe_state();

        // Act
        let outcome = worker
            .process_message(IngressMessage::new(
                "in",
                r#"{"source_topic":"in","device_id":"D1","data":{}}"#,
            ))
            .await;

        // Assert
        match outcome {
            MessageOutcome::PublishFailed { topic } => assert_eq!(topic, "base/S1/D1"),
            other => panic!("expected PublishFailed, got {:?}", other),
        }
        assert_eq!(*state.borrow(), WorkerState::Publishing);
    }

    #[tokio::test]
    async fn test_process_message_failure_never_publishes() {
        let mut mock_registry = MockRegistryLookup::new();
        mock_registry
            .expect_get()
            .returning(|_| Ok(r#"{"siteCode":"S1"}"#.as_bytes().to_vec()));

        let mut mock_publisher = MockEnrichedMessagePublisher::new();
        mock_publisher.expect_publish().times(0);

        let worker = worker_with(mock_registry, mock_publisher);

        let outcome = worker
            .process_message(IngressMessage::new(
                "in",
                r#"{"source_topic":"in","device_id":"D1","data":{}}"#,
            ))
            .await;

        assert!(matches!(
            outcome,
            MessageOutcome::Dropped(EnrichmentError::RegistryIncomplete { .. })
        ));
    }

    #[tokio::test]
    async fn test_process_message_wrong_data_model_is_skipped() {
        // Arrange
        let mut mock_registry = MockRegistryLookup::new();
        mock_registry
            .expect_get()
            .returning(|_| Ok(r#"{"siteCode":"S1","dataModel":"modelB"}"#.as_bytes().to_vec()));

        let mut mock_publisher = MockEnrichedMessagePublisher::new();
        mock_publisher.expect_publish().times(0);

        let worker =
            worker_expecting(mock_registry, mock_publisher, Some("modelA".to_string()));

        // Act
        let outcome = worker
            .process_message(IngressMessage::new(
                "in",
                r#"{"source_topic":"in","device_id":"D1","data":{}}"#,
            ))
            .await;

        // Assert
        match outcome {
            MessageOutcome::Dropped(EnrichmentError::WrongDataModel { data_model, .. }) => {
                assert_eq!(data_model, "modelB")
            }
            other => panic!("expected WrongDataModel, got {:?}", other),
        }
    }
}
