use crate::domain::{DispatchQueueSender, IngressMessage, QueueError};
use crate::mqtt::{MqttBrokerConfig, MqttRetryConfig};
use rumqttc::{AsyncClient, Event, Packet, QoS};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Run the MQTT ingress process
///
/// Subscribes to `subscription_topic` and enqueues every received payload on
/// the dispatch queue. Connection failures are retried; once the retry budget
/// is spent the process fails so the runner can shut the relay down.
#[instrument(
    name = "mqtt_ingress",
    skip_all,
    fields(
        broker_host = %broker.host,
        broker_port = broker.port,
        subscription_topic = %subscription_topic,
    )
)]
pub async fn run_mqtt_ingress(
    broker: MqttBrokerConfig,
    subscription_topic: String,
    retry: MqttRetryConfig,
    queue: DispatchQueueSender,
    token: CancellationToken,
) -> anyhow::Result<()> {
    info!("starting MQTT ingress");

    let mut retry_count = 0;

    loop {
        if token.is_cancelled() {
            debug!("MQTT ingress cancelled before connection");
            break;
        }

        match run_mqtt_connection(&broker, &subscription_topic, &queue, &token, &mut retry_count)
            .await
        {
            Ok(()) => {
                debug!("MQTT ingress stopped cleanly");
                break;
            }
            Err(e) => {
                error!(error = %e, "MQTT ingress connection error");

                retry_count += 1;
                if retry_count >= retry.max_retry_attempts {
                    error!(
                        max_retries = retry.max_retry_attempts,
                        "max retry attempts reached, stopping MQTT ingress"
                    );
                    return Err(e.context("MQTT ingress gave up reconnecting"));
                }

                warn!(
                    attempt = retry_count,
                    max_attempts = retry.max_retry_attempts,
                    "retrying MQTT connection"
                );

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(retry.retry_delay()) => {}
                }
            }
        }
    }

    info!("MQTT ingress stopped");
    Ok(())
}

/// Run a single MQTT session until cancellation or a connection error
async fn run_mqtt_connection(
    broker: &MqttBrokerConfig,
    subscription_topic: &str,
    queue: &DispatchQueueSender,
    token: &CancellationToken,
    retry_count: &mut u32,
) -> anyhow::Result<()> {
    let (client, mut eventloop) = AsyncClient::new(broker.mqtt_options("ingress"), 100);

    // Queued until the connection is up; rumqttc sends it after CONNACK
    client
        .subscribe(subscription_topic, QoS::AtLeastOnce)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to subscribe: {}", e))?;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("shutdown signal received");
                let _ = client.disconnect().await;
                return Ok(());
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        handle_ingress_message(
                            queue,
                            IngressMessage::new(publish.topic, publish.payload),
                        );
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("connected to MQTT broker");
                        *retry_count = 0;
                    }
                    Ok(Event::Incoming(Packet::SubAck(_))) => {
                        info!(topic = %subscription_topic, "subscribed to MQTT topic");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(anyhow::anyhow!("MQTT event loop error: {}", e));
                    }
                }
            }
        }
    }
}

/// Hand a received message to the dispatch queue without waiting
///
/// A full queue drops the message.
pub(crate) fn handle_ingress_message(queue: &DispatchQueueSender, message: IngressMessage) {
    let topic = message.topic.clone();
    let payload_size = message.payload.len();

    match queue.enqueue(message) {
        Ok(()) => {
            debug!(topic = %topic, payload_size, "message queued for enrichment");
        }
        Err(QueueError::Full(capacity)) => {
            error!(
                topic = %topic,
                payload_size,
                capacity,
                "dispatch queue full, dropping message"
            );
        }
        Err(e) => {
            error!(topic = %topic, error = %e, "failed to queue message, dropping");
        }
    }
}
