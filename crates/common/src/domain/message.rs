use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;

/// Registry key prefix for device metadata
pub const REGISTRY_KEY_PREFIX: &str = "device-";

/// Raw device message as delivered by ingress
///
/// `data` is kept as unparsed JSON so it is republished byte-for-byte.
#[derive(Debug, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub source_topic: String,
    pub device_id: String,
    #[serde(default)]
    pub data: Option<Box<RawValue>>,
}

impl RawMessage {
    /// Registry key holding this device's metadata
    pub fn registry_key(&self) -> String {
        format!("{}{}", REGISTRY_KEY_PREFIX, self.device_id)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryRecordError {
    #[error("registry value is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("registry value is not a JSON object")]
    NotAnObject,

    #[error("registry value is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("registry field '{0}' must be a non-empty string")]
    InvalidField(&'static str),
}

/// The part of a registry value the relay depends on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryRecord {
    pub site_code: String,
    pub data_model: String,
}

impl RegistryRecord {
    pub const SITE_CODE_FIELD: &'static str = "siteCode";
    pub const DATA_MODEL_FIELD: &'static str = "dataModel";

    /// Parse and validate a registry value
    ///
    /// Both `siteCode` and `dataModel` must be present as non-empty strings.
    /// Any other keys are ignored.
    pub fn parse(raw: &[u8]) -> Result<Self, RegistryRecordError> {
        let value: serde_json::Value = serde_json::from_slice(raw)
            .map_err(|e| RegistryRecordError::InvalidJson(e.to_string()))?;

        let fields = value.as_object().ok_or(RegistryRecordError::NotAnObject)?;

        let required = |name: &'static str| -> Result<String, RegistryRecordError> {
            match fields.get(name) {
                None => Err(RegistryRecordError::MissingField(name)),
                Some(serde_json::Value::String(s)) if !s.is_empty() => Ok(s.clone()),
                Some(_) => Err(RegistryRecordError::InvalidField(name)),
            }
        };

        Ok(Self {
            site_code: required(Self::SITE_CODE_FIELD)?,
            data_model: required(Self::DATA_MODEL_FIELD)?,
        })
    }
}

/// Outbound envelope published after enrichment
#[derive(Debug, Serialize)]
pub struct EnrichedMessage {
    pub source_topic: String,
    pub device_id: String,
    pub site_code: String,
    pub data_model: String,
    pub data: Option<Box<RawValue>>,
    pub registry: Box<RawValue>,
}

impl EnrichedMessage {
    /// Combine a raw message with its validated registry value
    ///
    /// `registry_raw` is kept verbatim. Fails without producing a partial
    /// message if the registry value is unusable.
    pub fn build(raw: RawMessage, registry_raw: &[u8]) -> Result<Self, RegistryRecordError> {
        let record = RegistryRecord::parse(registry_raw)?;
        let text = String::from_utf8(registry_raw.to_vec())
            .map_err(|e| RegistryRecordError::InvalidJson(e.to_string()))?;
        let registry = RawValue::from_string(text)
            .map_err(|e| RegistryRecordError::InvalidJson(e.to_string()))?;

        Ok(Self {
            source_topic: raw.source_topic,
            device_id: raw.device_id,
            site_code: record.site_code,
            data_model: record.data_model,
            data: raw.data,
            registry,
        })
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_message(json: &str) -> RawMessage {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_registry_key() {
        let raw = raw_message(r#"{"source_topic":"FCTS/INGRESS/ENRICH","device_id":"D42","data":{}}"#);
        assert_eq!(raw.registry_key(), "device-D42");
    }

    #[test]
    fn test_raw_message_requires_device_id() {
        let result = serde_json::from_str::<RawMessage>(r#"{"source_topic":"t","data":{}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_raw_message_without_data() {
        let raw = raw_message(r#"{"device_id":"D1"}"#);
        assert!(raw.data.is_none());
        assert_eq!(raw.source_topic, "");
    }

    #[test]
    fn test_registry_record_parse_ignores_extra_fields() {
        let record =
            RegistryRecord::parse(br#"{"siteCode":"S1","dataModel":"modelA","owner":"ops","rev":3}"#)
                .unwrap();
        assert_eq!(record.site_code, "S1");
        assert_eq!(record.data_model, "modelA");
    }

    #[test]
    fn test_registry_record_missing_site_code() {
        let err = RegistryRecord::parse(br#"{"dataModel":"modelA"}"#).unwrap_err();
        assert_eq!(err, RegistryRecordError::MissingField("siteCode"));
    }

    #[test]
    fn test_registry_record_missing_data_model() {
        let err = RegistryRecord::parse(br#"{"siteCode":"S1"}"#).unwrap_err();
        assert_eq!(err, RegistryRecordError::MissingField("dataModel"));
    }

    #[test]
    fn test_registry_record_rejects_empty_and_non_string_values() {
        assert_eq!(
            RegistryRecord::parse(br#"{"siteCode":"","dataModel":"m"}"#).unwrap_err(),
            RegistryRecordError::InvalidField("siteCode")
        );
        assert_eq!(
            RegistryRecord::parse(br#"{"siteCode":"S1","dataModel":7}"#).unwrap_err(),
            RegistryRecordError::InvalidField("dataModel")
        );
    }

    #[test]
    fn test_registry_record_rejects_non_object() {
        assert_eq!(
            RegistryRecord::parse(br#"["siteCode","dataModel"]"#).unwrap_err(),
            RegistryRecordError::NotAnObject
        );
        assert!(matches!(
            RegistryRecord::parse(b"not json").unwrap_err(),
            RegistryRecordError::InvalidJson(_)
        ));
    }

    #[test]
    fn test_registry_record_rejects_invalid_utf8() {
        let raw = b"{\"siteCode\":\"S\xff\",\"dataModel\":\"modelA\"}";

        assert!(matches!(
            RegistryRecord::parse(raw).unwrap_err(),
            RegistryRecordError::InvalidJson(_)
        ));
        let message = raw_message(r#"{"device_id":"D1"}"#);
        assert!(EnrichedMessage::build(message, raw).is_err());
    }

    #[test]
    fn test_enriched_message_keeps_payloads_verbatim() {
        let raw = raw_message(
            r#"{"source_topic":"in","device_id":"D1","data":{ "temp" : 21.5, "unit":"C" }}"#,
        );
        let registry = br#"{"siteCode":"S1", "dataModel":"modelA"}"#;

        let enriched = EnrichedMessage::build(raw, registry).unwrap();
        let json = String::from_utf8(enriched.to_bytes().unwrap()).unwrap();

        assert_eq!(
            json,
            r#"{"source_topic":"in","device_id":"D1","site_code":"S1","data_model":"modelA","data":{ "temp" : 21.5, "unit":"C" },"registry":{"siteCode":"S1", "dataModel":"modelA"}}"#
        );
    }
}
