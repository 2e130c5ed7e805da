use crate::mqtt::{MqttBrokerConfig, MqttRetryConfig};
use async_trait::async_trait;
use bytes::Bytes;
use common::domain::{DomainError, DomainResult, EnrichedMessagePublisher};
use rumqttc::{AsyncClient, ClientError, Event, EventLoop, Packet, QoS};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// MQTT publisher for enriched messages
///
/// Publishing only queues the packet on the client; the network side is
/// driven by `MqttPublisherEventLoop::run`, which must be running.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

/// Drives the publisher connection
pub struct MqttPublisherEventLoop {
    eventloop: EventLoop,
    retry: MqttRetryConfig,
}

/// Publish requests buffered between the publisher and its event loop
const REQUEST_BUFFER: usize = 100;

impl MqttPublisher {
    pub fn new(broker: &MqttBrokerConfig, retry: MqttRetryConfig) -> (Self, MqttPublisherEventLoop) {
        let (client, eventloop) = AsyncClient::new(broker.mqtt_options("publisher"), REQUEST_BUFFER);
        info!(
            broker_host = %broker.host,
            broker_port = broker.port,
            "created MQTT publisher"
        );
        (Self { client }, MqttPublisherEventLoop { eventloop, retry })
    }

    pub async fn disconnect(&self) -> anyhow::Result<()> {
        self.client
            .disconnect()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to disconnect MQTT publisher: {}", e))
    }
}

#[async_trait]
impl EnrichedMessagePublisher for MqttPublisher {
    async fn publish(&self, payload: Bytes, topic: &str) -> DomainResult<()> {
        debug!(topic = %topic, size_bytes = payload.len(), "publishing enriched message");

        // Never waits on the request buffer; a full buffer drops the message
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| match e {
                ClientError::TryRequest(_) => DomainError::PublishFailed(
                    topic.to_string(),
                    "publish buffer full or connection closed".to_string(),
                ),
                other => DomainError::PublishFailed(topic.to_string(), other.to_string()),
            })
    }
}

impl MqttPublisherEventLoop {
    /// Poll the connection until cancelled
    ///
    /// rumqttc reconnects on the next poll after an error, so errors only
    /// delay polling. Consecutive failures beyond the retry budget fail the process.
    pub async fn run(mut self, token: CancellationToken) -> anyhow::Result<()> {
        let mut failures = 0;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("MQTT publisher event loop cancelled");
                    return Ok(());
                }
                event = self.eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            info!("MQTT publisher connected");
                            failures = 0;
                        }
                        Ok(Event::Incoming(Packet::PubAck(ack))) => {
                            debug!(pkid = ack.pkid, "publish acknowledged");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            failures += 1;
                            error!(error = %e, attempt = failures, "MQTT publisher connection error");

                            if failures >= self.retry.max_retry_attempts {
                                return Err(anyhow::anyhow!(
                                    "MQTT publisher gave up after {} attempts: {}",
                                    failures,
                                    e
                                ));
                            }

                            warn!(
                                delay_secs = self.retry.retry_delay_secs,
                                "retrying MQTT publisher connection"
                            );
                            tokio::select! {
                                _ = token.cancelled() => return Ok(()),
                                _ = tokio::time::sleep(self.retry.retry_delay()) => {}
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_publish_fails_fast_when_request_buffer_is_full() {
        // Arrange
        let broker = MqttBrokerConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            username: None,
            password: None,
            tls: false,
            client_id: "test".to_string(),
            keep_alive: Duration::from_secs(30),
        };
        // Event loop kept alive but never polled, as during a reconnect backoff
        let (publisher, _eventloop) = MqttPublisher::new(&broker, MqttRetryConfig::default());

        // Act
        let mut published = 0;
        let mut rejected = Vec::new();
        for n in 0..150 {
            let result = tokio::time::timeout(
                Duration::from_millis(200),
                publisher.publish(Bytes::from_static(b"{}"), &format!("FCTS/ENRICHED/S1/D{}", n)),
            )
            .await
            .expect("publish must not wait on a full buffer");

            match result {
                Ok(()) => published += 1,
                Err(e) => rejected.push(e),
            }
        }

        // Assert
        assert_eq!(published, REQUEST_BUFFER);
        assert_eq!(rejected.len(), 150 - REQUEST_BUFFER);
        assert!(matches!(
            &rejected[0],
            DomainError::PublishFailed(topic, _) if topic == "FCTS/ENRICHED/S1/D100"
        ));
    }
}
