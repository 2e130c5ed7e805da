use common::domain::{DomainError, RegistryRecordError};
use thiserror::Error;

/// Why a single message was not published
///
/// Every variant ends processing for that message only; the worker keeps going.
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("malformed message: {reason}")]
    Malformed { reason: String },

    #[error("registry lookup failed for key {key} (source_topic: {source_topic}): {source}")]
    LookupFailed {
        key: String,
        source_topic: String,
        #[source]
        source: DomainError,
    },

    #[error("registry entry for device {device_id} is incomplete: {source}")]
    RegistryIncomplete {
        device_id: String,
        #[source]
        source: RegistryRecordError,
    },

    #[error("device {device_id} has data model '{data_model}', expected '{expected}'")]
    WrongDataModel {
        device_id: String,
        data_model: String,
        expected: String,
    },

    #[error("failed to serialize enriched message: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl EnrichmentError {
    /// Stable identifier used as the `error_kind` log field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => "malformed",
            Self::LookupFailed { .. } => "lookup_failed",
            Self::RegistryIncomplete { .. } => "registry_incomplete",
            Self::WrongDataModel { .. } => "wrong_data_model",
            Self::Serialize(_) => "serialize",
        }
    }
}
