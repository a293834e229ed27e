use relay_core::config::{DatabaseConfig, RelayConfig};
use relay_core::ServiceError;

const KEY: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[test]
fn test_database_config_serialization() {
    let config = DatabaseConfig {
        url: "postgresql://localhost:5432/relay".to_string(),
        max_connections: 10,
        min_connections: 1,
    };

    let serialized = serde_json::to_string(&config).unwrap();
    assert!(serialized.contains("postgresql://localhost:5432/relay"));

    let deserialized: DatabaseConfig = serde_json::from_str(&serialized).unwrap();
    assert_eq!(deserialized.url, config.url);
    assert_eq!(deserialized.max_connections, 10);
    assert_eq!(deserialized.min_connections, 1);
}

#[test]
fn test_relay_config_defaults() {
    let config = RelayConfig::new("sqlite::memory:", KEY);

    assert_eq!(config.poll_interval().as_millis(), 1_000);
    assert_eq!(config.request_timeout().as_secs(), 30);
    assert_eq!(config.processing_timeout().as_secs(), 45);
    assert_eq!(config.max_processing_age().as_secs(), 300);
    assert_eq!(config.retention_days, 30);
    assert!(config.validate().is_ok());
}

#[test]
fn test_relay_config_rejects_processing_age_shorter_than_timeout() {
    let mut config = RelayConfig::new("sqlite::memory:", KEY);
    config.max_processing_age_secs = 40;
    config.processing_timeout_secs = 45;

    match config.validate() {
        Err(ServiceError::Configuration { message }) => {
            assert!(message.contains("max processing age"));
        }
        other => panic!("Expected configuration error, got {:?}", other),
    }
}

#[test]
fn test_relay_config_rejects_processing_timeout_within_request_timeout() {
    let mut config = RelayConfig::new("sqlite::memory:", KEY);
    config.request_timeout_secs = 30;
    config.processing_timeout_secs = 30;

    match config.validate() {
        Err(ServiceError::Configuration { message }) => {
            assert!(message.contains("request timeout"));
        }
        other => panic!("Expected configuration error, got {:?}", other),
    }

    config.processing_timeout_secs = 31;
    assert!(config.validate().is_ok());
}
