use crate::domain::EnrichmentError;
use bytes::Bytes;
use common::domain::{EnrichedMessage, RawMessage, RegistryLookup};
use std::sync::Arc;
use tracing::{debug, field, instrument, Span};

/// Domain service turning raw payloads into enriched messages
///
/// Flow:
/// 1. Parse the raw payload into a RawMessage; a missing `source_topic` is
///    taken from the topic the message arrived on
/// 2. Look up `device-{device_id}` in the registry
/// 3. Validate the registry value and build the EnrichedMessage
/// 4. Drop messages whose data model is not the expected one (when configured)
pub struct EnrichmentService {
    registry: Arc<dyn RegistryLookup>,
    expected_data_model: Option<String>,
}

impl EnrichmentService {
    /// Create a new EnrichmentService
    ///
    /// `expected_data_model` enables the data model filter; `None` lets every model through.
    pub fn new(registry: Arc<dyn RegistryLookup>, expected_data_model: Option<String>) -> Self {
        Self {
            registry,
            expected_data_model,
        }
    }

    #[instrument(
        skip_all,
        fields(
            ingress_topic = %ingress_topic,
            payload_size = payload.len(),
            device_id = field::Empty,
            source_topic = field::Empty,
        )
    )]
    pub async fn enrich(
        &self,
        ingress_topic: &str,
        payload: &[u8],
    ) -> Result<EnrichedMessage, EnrichmentError> {
        let mut raw = parse_raw_message(payload)?;
        if raw.source_topic.is_empty() {
            raw.source_topic = ingress_topic.to_string();
        }

        let span = Span::current();
        span.record("device_id", raw.device_id.as_str());
        span.record("source_topic", raw.source_topic.as_str());

        let key = raw.registry_key();
        debug!(key = %key, "looking up device registry entry");

        let registry = self
            .registry
            .get(&key)
            .await
            .map_err(|source| EnrichmentError::LookupFailed {
                key,
                source_topic: raw.source_topic.clone(),
                source,
            })?;

        let enriched = enrich_message(raw, &registry)?;
        self.check_data_model(&enriched)?;

        debug!(
            site_code = %enriched.site_code,
            data_model = %enriched.data_model,
            "message enriched"
        );

        Ok(enriched)
    }

    fn check_data_model(&self, message: &EnrichedMessage) -> Result<(), EnrichmentError> {
        match &self.expected_data_model {
            Some(expected) if *expected != message.data_model => {
                Err(EnrichmentError::WrongDataModel {
                    device_id: message.device_id.clone(),
                    data_model: message.data_model.clone(),
                    expected: expected.clone(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Decode an ingress payload
pub fn parse_raw_message(payload: &[u8]) -> Result<RawMessage, EnrichmentError> {
    let raw: RawMessage =
        serde_json::from_slice(payload).map_err(|e| EnrichmentError::Malformed {
            reason: e.to_string(),
        })?;

    if raw.device_id.trim().is_empty() {
        return Err(EnrichmentError::Malformed {
            reason: "device_id is empty".to_string(),
        });
    }

    Ok(raw)
}

/// Merge a raw message with its registry value
///
/// Pure: the same inputs always produce the same message.
pub fn enrich_message(
    raw: RawMessage,
    registry_raw: &[u8],
) -> Result<EnrichedMessage, EnrichmentError> {
    let device_id = raw.device_id.clone();
    EnrichedMessage::build(raw, registry_raw)
        .map_err(|source| EnrichmentError::RegistryIncomplete { device_id, source })
}

/// Serialize an enriched message for publication
pub fn serialize_enriched(message: &EnrichedMessage) -> Result<Bytes, EnrichmentError> {
    message
        .to_bytes()
        .map(Bytes::from)
        .map_err(EnrichmentError::Serialize)
}
