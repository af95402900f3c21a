use crate::config::models::AppConfig;

#[test]
fn test_default_config() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());

    assert_eq!(config.database.max_connections, 10);
    assert_eq!(config.analysis.max_retries, 3);
    assert_eq!(config.analysis.lease_timeout_seconds, 600);
    assert_eq!(config.analysis.backoff_limit, 10);
    assert_eq!(config.analysis.backoff_unit_minutes, 5);
    assert!(!config.observability.metrics_enabled);
}

#[test]
fn test_config_from_toml() {
    let toml_content = r#"
[database]
url = "sqlite::memory:"
max_connections = 4
min_connections = 1
connection_timeout_seconds = 10
idle_timeout_seconds = 60

[analysis]
max_retries = 5
lease_timeout_seconds = 120
backoff_limit = 13
backoff_unit_minutes = 2
default_priority = 0

[observability]
log_level = "debug"
log_format = "json"
metrics_enabled = true
metrics_bind_address = "127.0.0.1:9000"
"#;

    let config = AppConfig::from_toml(toml_content).unwrap();

    assert_eq!(config.database.url, "sqlite::memory:");
    assert_eq!(config.analysis.max_retries, 5);
    assert_eq!(config.analysis.lease_timeout().num_seconds(), 120);
    assert_eq!(config.analysis.backoff_unit().num_minutes(), 2);
    assert_eq!(config.observability.log_format, "json");
}

#[test]
fn test_config_to_toml() {
    let config = AppConfig::default();
    let toml_str = config.to_toml().unwrap();

    let parsed_config = AppConfig::from_toml(&toml_str).unwrap();
    assert_eq!(config.database.url, parsed_config.database.url);
    assert_eq!(config.analysis, parsed_config.analysis);
}

#[test]
fn test_invalid_values_rejected() {
    let mut config = AppConfig::default();
    config.database.url = "postgresql://localhost/verifier".to_string();
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.analysis.max_retries = 0;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.observability.log_level = "loud".to_string();
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.observability.metrics_enabled = true;
    config.observability.metrics_bind_address = "not-an-address".to_string();
    assert!(config.validate().is_err());
}
