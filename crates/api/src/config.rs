//! Application configuration loaded from environment variables.

use std::time::Duration;

use domain::Amount;
use event_bus::BusConfig;
use saga::RetryPolicy;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` for structured output, anything else for text
/// - `KAFKA_BROKERS`: comma separated broker list (default: `localhost:9092`)
/// - `KAFKA_CLIENT_ID`: client id reported to the brokers
/// - `BUS_PARTITIONS`: partitions per topic (default: `3`)
/// - `USER_LOOKUP_TIMEOUT_MS`: `user.getUser` deadline (default: `5000`)
/// - `PAYMENT_MAX_RETRIES`: capture retries after the first attempt (default: `3`)
/// - `PAYMENT_BASE_DELAY_MS`: first backoff delay (default: `1000`)
/// - `PAYMENT_CAPTURE_LIMIT`: largest amount the gateway approves (default: `10000.00`)
/// - `DATABASE_URL`: PostgreSQL ledgers when set, in-memory otherwise
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub bus: BusConfig,
    pub retry: RetryPolicy,
    pub capture_limit: Amount,
    pub database_url: Option<String>,
}

const DEFAULT_CAPTURE_LIMIT: &str = "10000.00";

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let mut bus = defaults.bus;
        if let Some(brokers) = lookup("KAFKA_BROKERS") {
            let parsed = BusConfig::parse_brokers(&brokers);
            if !parsed.is_empty() {
                bus.brokers = parsed;
            }
        }
        if let Some(client_id) = lookup("KAFKA_CLIENT_ID") {
            bus.client_id = client_id;
        }
        if let Some(partitions) = number("BUS_PARTITIONS") {
            bus = bus.with_partitions(u32::try_from(partitions).unwrap_or(u32::MAX));
        }
        if let Some(ms) = number("USER_LOOKUP_TIMEOUT_MS") {
            bus = bus.with_request_timeout(Duration::from_millis(ms));
        }

        let retry = RetryPolicy::new(
            number("PAYMENT_MAX_RETRIES")
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.retry.max_retries),
            number("PAYMENT_BASE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.base_delay),
        );

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.log_format),
            bus,
            retry,
            capture_limit: lookup("PAYMENT_CAPTURE_LIMIT")
                .and_then(|v| Amount::parse(v).ok())
                .unwrap_or(defaults.capture_limit),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            bus: BusConfig::default(),
            retry: RetryPolicy::default(),
            capture_limit: Amount::parse(DEFAULT_CAPTURE_LIMIT)
                .expect("default capture limit is a valid amount"),
            database_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.capture_limit.as_str(), "10000.00");
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_empty_environment_matches_defaults() {
        let config = from_pairs(&[]);
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.bus, BusConfig::default());
    }

    #[test]
    fn test_reads_every_variable() {
        let config = from_pairs(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("RUST_LOG", "debug"),
            ("LOG_FORMAT", "JSON"),
            ("KAFKA_BROKERS", "kafka-1:9092,kafka-2:9092"),
            ("KAFKA_CLIENT_ID", "orders-api"),
            ("BUS_PARTITIONS", "6"),
            ("USER_LOOKUP_TIMEOUT_MS", "250"),
            ("PAYMENT_MAX_RETRIES", "5"),
            ("PAYMENT_BASE_DELAY_MS", "20"),
            ("PAYMENT_CAPTURE_LIMIT", "50.00"),
            ("DATABASE_URL", "postgres://localhost/orders"),
        ]);

        assert_eq!(config.addr(), "127.0.0.1:8080");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.bus.brokers, vec!["kafka-1:9092", "kafka-2:9092"]);
        assert_eq!(config.bus.client_id, "orders-api");
        assert_eq!(config.bus.partitions, 6);
        assert_eq!(config.bus.request_timeout, Duration::from_millis(250));
        assert_eq!(config.retry, RetryPolicy::new(5, Duration::from_millis(20)));
        assert_eq!(config.capture_limit.as_str(), "50.00");
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/orders")
        );
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("PORT", "http"),
            ("BUS_PARTITIONS", "many"),
            ("PAYMENT_CAPTURE_LIMIT", "-5"),
            ("DATABASE_URL", "  "),
        ]);

        assert_eq!(config.port, 3000);
        assert_eq!(config.bus.partitions, 3);
        assert_eq!(config.capture_limit.as_str(), "10000.00");
        assert!(config.database_url.is_none());
    }
}
