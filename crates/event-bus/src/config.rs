//! Bus connection settings.

use std::time::Duration;

/// Connection and topology settings for the event bus.
///
/// Services receive this struct from the process bootstrap; nothing in the
/// saga crates hardcodes broker addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Broker bootstrap addresses.
    pub brokers: Vec<String>,
    /// Client identifier reported to the broker.
    pub client_id: String,
    /// Number of partitions per topic.
    pub partitions: u32,
    /// Deadline for request/reply round trips.
    pub request_timeout: Duration,
}

impl BusConfig {
    /// Parses a comma separated broker list, ignoring empty entries.
    pub fn parse_brokers(list: &str) -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Returns a copy with the given partition count (at least one).
    pub fn with_partitions(mut self, partitions: u32) -> Self {
        self.partitions = partitions.max(1);
        self
    }

    /// Returns a copy with the given request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            client_id: "orders-saga".to_string(),
            partitions: 3,
            request_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = BusConfig::default();
        assert_eq!(config.brokers, vec!["localhost:9092"]);
        assert_eq!(config.partitions, 3);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_parse_brokers() {
        assert_eq!(
            BusConfig::parse_brokers("a:9092, b:9092,,"),
            vec!["a:9092".to_string(), "b:9092".to_string()]
        );
        assert!(BusConfig::parse_brokers("").is_empty());
    }

    #[test]
    fn test_partitions_never_zero() {
        let config = BusConfig::default().with_partitions(0);
        assert_eq!(config.partitions, 1);
    }
}
