//! MQTT topic matching and topic-path parsing.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// A `telemetry` path segment anywhere in the topic.
    static ref TELEMETRY_SEGMENT: Regex = Regex::new(r"(^|/)telemetry(/|$)").unwrap();

    /// An `images` path segment anywhere in the topic.
    static ref IMAGES_SEGMENT: Regex = Regex::new(r"(^|/)images(/|$)").unwrap();
}

/// Where the publish bridge sends a device message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    Telemetry,
    Image,
    Other,
}

/// Match an MQTT topic filter against a concrete topic.
///
/// - `+` matches exactly one path segment
/// - a trailing `/#` matches the prefix plus zero or more segments
/// - a leading wildcard never matches a `$`-prefixed system topic
///
/// Matching is anchored: the whole topic must be consumed.
///
/// # Examples
/// ```
/// use ares_trust_core::routing::topic_matches;
/// assert!(topic_matches("a/#", "a"));
/// assert!(topic_matches("+/b", "x/b"));
/// assert!(!topic_matches("a/b", "a/bc"));
/// assert!(!topic_matches("#", "$SYS/health"));
/// ```
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if filter.is_empty() || topic.is_empty() {
        return false;
    }

    let filter_parts: Vec<&str> = filter.split('/').collect();
    let topic_parts: Vec<&str> = topic.split('/').collect();

    if topic.starts_with('$') && matches!(filter_parts[0], "#" | "+") {
        return false;
    }

    for (idx, part) in filter_parts.iter().enumerate() {
        match *part {
            // `#` is only valid as the final segment
            "#" => return idx == filter_parts.len() - 1,
            "+" => {
                if idx >= topic_parts.len() {
                    return false;
                }
            }
            literal => {
                if topic_parts.get(idx) != Some(&literal) {
                    return false;
                }
            }
        }
    }

    filter_parts.len() == topic_parts.len()
}

/// Extract the device identifier: the second slash-delimited segment.
pub fn device_id_from_topic(topic: &str) -> Option<&str> {
    let mut parts = topic.split('/');
    let _namespace = parts.next().filter(|ns| !ns.is_empty())?;
    parts
        .next()
        .filter(|id| !id.is_empty() && !id.contains(['+', '#']))
}

pub fn is_telemetry_topic(topic: &str) -> bool {
    TELEMETRY_SEGMENT.is_match(topic)
}

pub fn classify_topic(topic: &str) -> TopicKind {
    if is_telemetry_topic(topic) {
        TopicKind::Telemetry
    } else if IMAGES_SEGMENT.is_match(topic) {
        TopicKind::Image
    } else {
        TopicKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_is_anchored() {
        assert!(topic_matches("a/b", "a/b"));
        assert!(!topic_matches("a/b", "a/bc"));
        assert!(!topic_matches("a/b", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(topic_matches("a/#", "a"));
        assert!(topic_matches("a/#", "a/b"));
        assert!(topic_matches("a/#", "a/b/c"));
        assert!(!topic_matches("a/#", "b/a"));
        assert!(topic_matches("#", "anything/at/all"));
        // `#` in the middle is not a valid filter
        assert!(!topic_matches("a/#/c", "a/b/c"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(topic_matches("+/b", "x/b"));
        assert!(!topic_matches("+/b", "x/y/b"));
        assert!(topic_matches("ares4/+/telemetry/#", "ares4/D1/telemetry"));
        assert!(topic_matches("ares4/+/telemetry/#", "ares4/D1/telemetry/dht22"));
        assert!(!topic_matches("ares4/+/telemetry/#", "ares4/D1/images"));
    }

    #[test]
    fn test_system_topics() {
        assert!(!topic_matches("#", "$SYS/health"));
        assert!(!topic_matches("+/health", "$SYS/health"));
        assert!(topic_matches("$SYS/#", "$SYS/health"));
    }

    #[test]
    fn test_device_id_extraction() {
        assert_eq!(device_id_from_topic("ares4/D1/telemetry"), Some("D1"));
        assert_eq!(device_id_from_topic("ares4/D1"), Some("D1"));
        assert_eq!(device_id_from_topic("ares4"), None);
        assert_eq!(device_id_from_topic("ares4//telemetry"), None);
        assert_eq!(device_id_from_topic("/D1/telemetry"), None);
        assert_eq!(device_id_from_topic("ares4/+/telemetry"), None);
    }

    #[test]
    fn test_classify_topic() {
        assert_eq!(classify_topic("ares4/D1/telemetry"), TopicKind::Telemetry);
        assert_eq!(classify_topic("ares4/D1/telemetry/x"), TopicKind::Telemetry);
        assert_eq!(classify_topic("ares4/D1/telemetryx"), TopicKind::Other);
        assert_eq!(classify_topic("ares4/D1/images/cam0"), TopicKind::Image);
        assert_eq!(classify_topic("ares4/D1/status"), TopicKind::Other);
    }
}
