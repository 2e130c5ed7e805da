mod broker;
mod publisher;
pub(crate) mod subscriber;

pub use broker::{parse_broker_address, BrokerAddress, MqttBrokerConfig, MqttRetryConfig};
pub use publisher::{MqttPublisher, MqttPublisherEventLoop};
pub use subscriber::run_mqtt_ingress;
