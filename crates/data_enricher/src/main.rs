mod config;

use common::registry::RedisRegistry;
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig, TelemetryProviders};
use crate::config::ServiceConfig;
use enricher_runner::Runner;
use enrichment_worker::domain::{dispatch_queue, EnrichmentService};
use enrichment_worker::enrichment_worker::{EnrichmentWorker, EnrichmentWorkerConfig};
use enrichment_worker::mqtt::{
    parse_broker_address, run_mqtt_ingress, MqttBrokerConfig, MqttPublisher, MqttRetryConfig,
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&TelemetryConfig {
        service_name: config.otel_service_name.clone(),
        otel_endpoint: config.otel_endpoint.clone(),
        otel_enabled: config.otel_enabled,
        log_level: config.log_level.clone(),
    }) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!(
        subscription_topic = %config.subscription_topic,
        publish_topic_base = %config.publish_topic_base,
        queue_capacity = config.queue_capacity,
        "Starting data-enricher"
    );
    debug!("Configuration: {:?}", config.redacted());

    let registry = match RedisRegistry::connect(
        &config.redis_url,
        config.redis_mode(),
        Duration::from_secs(config.startup_timeout_secs),
    )
    .await
    {
        Ok(registry) => registry,
        Err(e) => {
            error!(error = format!("{:#}", e), "Failed to connect to registry");
            shutdown_telemetry(telemetry_providers);
            return ExitCode::FAILURE;
        }
    };

    let (queue_tx, queue_rx) = match dispatch_queue(config.queue_capacity) {
        Ok(queue) => queue,
        Err(e) => {
            error!(error = %e, capacity = config.queue_capacity, "Invalid dispatch queue capacity");
            shutdown_telemetry(telemetry_providers);
            return ExitCode::FAILURE;
        }
    };

    let address = match parse_broker_address(&config.mqtt_host, config.mqtt_port) {
        Ok(address) => address,
        Err(e) => {
            error!(error = %e, "Invalid MQTT broker address");
            shutdown_telemetry(telemetry_providers);
            return ExitCode::FAILURE;
        }
    };
    let broker = MqttBrokerConfig {
        host: address.host,
        port: address.port,
        username: config.mqtt_username(),
        password: config.mqtt_password(),
        tls: config.mqtt_tls || address.tls,
        client_id: config.mqtt_client_id.clone(),
        keep_alive: Duration::from_secs(config.mqtt_keep_alive_secs),
    };
    let retry = MqttRetryConfig {
        retry_delay_secs: config.mqtt_retry_delay_secs,
        max_retry_attempts: config.mqtt_max_retry_attempts,
    };

    let (publisher, publisher_eventloop) = MqttPublisher::new(&broker, retry.clone());

    let service = Arc::new(EnrichmentService::new(
        Arc::new(registry),
        config.expected_data_model(),
    ));
    let worker = EnrichmentWorker::new(
        queue_rx,
        service,
        Arc::new(publisher.clone()),
        EnrichmentWorkerConfig {
            publish_topic_base: config.publish_topic_base.clone(),
        },
    );

    let subscription_topic = config.subscription_topic.clone();

    let result = Runner::new()
        .with_named_app_process("enrichment_worker", move |ctx| worker.run(ctx))
        .with_named_app_process("mqtt_ingress", move |ctx| {
            run_mqtt_ingress(broker, subscription_topic, retry, queue_tx, ctx)
        })
        .with_named_app_process("mqtt_publisher", move |ctx| publisher_eventloop.run(ctx))
        .with_closer(move || async move {
            info!("Running cleanup tasks...");
            if let Err(e) = publisher.disconnect().await {
                debug!(error = %e, "MQTT publisher already disconnected");
            }

            // Flush pending traces and logs
            shutdown_telemetry(telemetry_providers);
            Ok(())
        })
        .with_closer_timeout(Duration::from_secs(10))
        .run()
        .await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("data-enricher stopped with error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
