use crate::domain::{DomainError, DomainResult, RegistryLookup};
use anyhow::Context;
use async_trait::async_trait;
use redis::aio::{ConnectionLike, ConnectionManager};
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// How the registry is deployed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedisMode {
    #[default]
    Standalone,
    /// Redis Cluster; keys are routed to their slot owner and MOVED/ASK
    /// redirects are followed by the client
    Cluster,
}

#[derive(Clone)]
enum RegistryConnection {
    Standalone(ConnectionManager),
    Cluster(ClusterConnection),
}

/// Device registry backed by Redis
///
/// Values are stored as JSON strings under `device-{device_id}` keys.
#[derive(Clone)]
pub struct RedisRegistry {
    connection: RegistryConnection,
}

impl RedisRegistry {
    /// Connect to Redis and verify the server answers a PING
    ///
    /// Accepts `redis://` and `rediss://` (TLS) connection strings. In cluster
    /// mode `connection_string` may list several seed nodes separated by commas.
    /// Connecting and the PING share `timeout`. Intended to be called once at
    /// startup; failure should abort the process.
    pub async fn connect(
        connection_string: &str,
        mode: RedisMode,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let nodes = seed_nodes(connection_string);
        if nodes.is_empty() {
            anyhow::bail!("Redis connection string is empty");
        }

        let tls = nodes.iter().all(|node| node.starts_with("rediss://"));

        let connection = tokio::time::timeout(timeout, async {
            let mut connection = open(&nodes, mode).await?;
            let pong = ping(&mut connection).await?;
            anyhow::Ok((connection, pong))
        })
        .await
        .context("Timed out connecting to Redis")?;

        let (connection, pong) = connection?;

        info!(
            mode = ?mode,
            tls,
            nodes = nodes.len(),
            reply = %pong,
            "connected to Redis registry"
        );

        Ok(Self { connection })
    }
}

fn seed_nodes(connection_string: &str) -> Vec<&str> {
    connection_string
        .split(',')
        .map(str::trim)
        .filter(|node| !node.is_empty())
        .collect()
}

async fn open(nodes: &[&str], mode: RedisMode) -> anyhow::Result<RegistryConnection> {
    match mode {
        RedisMode::Standalone => {
            let [node] = nodes else {
                anyhow::bail!(
                    "Standalone Redis takes a single URL, got {} (enable cluster mode for several nodes)",
                    nodes.len()
                );
            };
            let client = redis::Client::open(*node).context("Invalid Redis connection string")?;
            let manager = client
                .get_connection_manager()
                .await
                .context("Failed to connect to Redis")?;
            Ok(RegistryConnection::Standalone(manager))
        }
        RedisMode::Cluster => {
            let client = ClusterClient::new(nodes.to_vec())
                .context("Invalid Redis cluster connection string")?;
            let connection = client
                .get_async_connection()
                .await
                .context("Failed to connect to Redis cluster")?;
            Ok(RegistryConnection::Cluster(connection))
        }
    }
}

async fn ping(connection: &mut RegistryConnection) -> anyhow::Result<String> {
    let pong = match connection {
        RegistryConnection::Standalone(c) => query_ping(c).await,
        RegistryConnection::Cluster(c) => query_ping(c).await,
    };
    pong.context("Redis did not answer PING")
}

async fn query_ping<C: ConnectionLike + Send>(connection: &mut C) -> redis::RedisResult<String> {
    redis::cmd("PING").query_async(connection).await
}

#[async_trait]
impl RegistryLookup for RedisRegistry {
    #[instrument(skip(self), fields(key = %key))]
    async fn get(&self, key: &str) -> DomainResult<Vec<u8>> {
        // Raw bytes: the record's content is validated by the caller
        let value = match &self.connection {
            RegistryConnection::Standalone(c) => {
                let mut connection = c.clone();
                connection.get::<_, Option<Vec<u8>>>(key).await
            }
            RegistryConnection::Cluster(c) => {
                let mut connection = c.clone();
                connection.get::<_, Option<Vec<u8>>>(key).await
            }
        }
        .with_context(|| format!("Failed to read registry key {}", key))?;

        match value {
            Some(value) => {
                debug!(size_bytes = value.len(), "registry entry found");
                Ok(value)
            }
            None => Err(DomainError::RegistryEntryNotFound(key.to_string())),
        }
    }
}
