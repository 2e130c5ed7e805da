use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Failures reported by the relay's collaborators (registry, broker)
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Registry entry not found: {0}")]
    RegistryEntryNotFound(String),

    #[error("Invalid broker configuration: {0}")]
    InvalidBrokerConfig(String),

    #[error("Publish failed for topic {0}: {1}")]
    PublishFailed(String, String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}
