use common::domain::EnrichedMessage;

/// Build the destination topic `{base_topic}/{site_code}/{device_id}`
///
/// # Examples
/// ```
/// use enrichment_worker::domain::publish_topic;
///
/// let topic = publish_topic("FCTS/ENRICHED/geokonapi", "SITE7", "D42");
/// assert_eq!(topic, "FCTS/ENRICHED/geokonapi/SITE7/D42");
/// ```
pub fn publish_topic(base_topic: &str, site_code: &str, device_id: &str) -> String {
    format!("{}/{}/{}", base_topic, site_code, device_id)
}

/// Destination topic for an enriched message
pub fn publish_topic_for(base_topic: &str, message: &EnrichedMessage) -> String {
    publish_topic(base_topic, &message.site_code, &message.device_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_topic() {
        assert_eq!(
            publish_topic("FCTS/ENRICHED/geokonapi", "SITE7", "D42"),
            "FCTS/ENRICHED/geokonapi/SITE7/D42"
        );
    }

    #[test]
    fn test_publish_topic_keeps_segments_as_given() {
        assert_eq!(publish_topic("base", "S 1", "dev_01"), "base/S 1/dev_01");
    }
}
