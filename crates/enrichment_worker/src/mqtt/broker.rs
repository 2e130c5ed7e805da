use common::domain::{DomainError, DomainResult};
use rumqttc::{MqttOptions, Transport};
use std::time::Duration;

/// Connection settings shared by the ingress subscriber and the publisher
#[derive(Debug, Clone)]
pub struct MqttBrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
    pub client_id: String,
    pub keep_alive: Duration,
}

impl MqttBrokerConfig {
    /// Build client options; `role` is appended to the client id so the
    /// subscriber and the publisher do not evict each other on the broker
    pub fn mqtt_options(&self, role: &str) -> MqttOptions {
        let client_id = format!("{}-{}", self.client_id, role);
        let mut options = MqttOptions::new(client_id, self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);

        if let Some(username) = &self.username {
            options.set_credentials(username.clone(), self.password.clone().unwrap_or_default());
        }

        if self.tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        options
    }
}

/// Reconnect policy for broker sessions
#[derive(Debug, Clone)]
pub struct MqttRetryConfig {
    pub retry_delay_secs: u64,
    pub max_retry_attempts: u32,
}

impl Default for MqttRetryConfig {
    fn default() -> Self {
        Self {
            retry_delay_secs: 5,
            max_retry_attempts: 10,
        }
    }
}

impl MqttRetryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Broker address split into its parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    /// Set by an `mqtts://` or `ssl://` scheme
    pub tls: bool,
}

/// Parse `mqtt://host:port`, `tcp://host:port`, `mqtts://host:port` or `host[:port]`
///
/// `default_port` applies when the address has none.
pub fn parse_broker_address(address: &str, default_port: u16) -> DomainResult<BrokerAddress> {
    let address = address.trim();
    let (rest, tls) = match address.split_once("://") {
        Some(("mqtt" | "tcp", rest)) => (rest, false),
        Some(("mqtts" | "ssl", rest)) => (rest, true),
        Some((scheme, _)) => {
            return Err(DomainError::InvalidBrokerConfig(format!(
                "Unsupported broker scheme: {}",
                scheme
            )));
        }
        None => (address, false),
    };
    let rest = rest.trim_end_matches('/');

    let (host, port) = match rest.split_once(':') {
        None => (rest, default_port),
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| {
                DomainError::InvalidBrokerConfig(format!("Invalid port in broker address: {}", port))
            })?;
            (host, port)
        }
    };

    if host.is_empty() {
        return Err(DomainError::InvalidBrokerConfig(format!(
            "Missing host in broker address: {}",
            address
        )));
    }

    Ok(BrokerAddress {
        host: host.to_string(),
        port,
        tls,
    })
}
