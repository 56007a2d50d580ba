//! Integration tests for file and environment layering.

use std::io::Write;
use std::time::Duration;

use sluice_config::{parse_period, ConfigError, ConfigLoader, LogFormat, RateLimitRuleConfig};
use tempfile::Builder;

fn write_config(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn loads_rules_from_toml_file() {
    let file = write_config(
        ".toml",
        r#"
        [server]
        http_addr = "127.0.0.1:0"

        [[rate_limiting.rules]]
        endpoint = "*"
        limit = 2
        period = "1s"
        "#,
    );

    let loader = ConfigLoader::new().with_file(file.path()).unwrap();
    assert!(loader.file_loaded());
    let config = loader.load().unwrap();

    assert_eq!(config.server.http_addr, "127.0.0.1:0");
    assert_eq!(config.rate_limiting.rules, vec![RateLimitRuleConfig::new("*", 2, "1s")]);
    assert_eq!(
        parse_period(&config.rate_limiting.rules[0].period).unwrap(),
        Duration::from_secs(1)
    );
}

#[test]
fn loads_json_file() {
    let file = write_config(
        ".json",
        r#"{"logging": {"format": "pretty"}, "cors": {"enabled": false}}"#,
    );

    let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
    assert_eq!(config.logging.format, LogFormat::Pretty);
    assert!(!config.cors.enabled);
    assert_eq!(config.rate_limiting.rules[0].limit, 1000);
}

#[test]
fn unknown_field_in_file_is_rejected() {
    let file = write_config(
        ".toml",
        r#"
        [rate_limiting]
        burst = 10
        "#,
    );

    let result = ConfigLoader::new().with_file(file.path());
    assert!(matches!(result, Err(ConfigError::Toml(_))));
}

#[test]
fn unsupported_extension_is_rejected() {
    let file = write_config(".yaml", "server: {}\n");
    let result = ConfigLoader::new().with_file(file.path());
    assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
}

#[test]
fn malformed_rule_in_file_is_fatal_at_load() {
    let file = write_config(
        ".toml",
        r#"
        [[rate_limiting.rules]]
        endpoint = "*"
        limit = 10
        period = "forever"
        "#,
    );

    let err = ConfigLoader::new()
        .with_file(file.path())
        .unwrap()
        .load()
        .unwrap_err();
    assert!(err.to_string().contains("rate_limiting.rules[0].period"));
}

#[test]
fn env_overrides_file_values() {
    // A prefix unique to this test keeps it independent of the others.
    std::env::set_var("SLUICE_LOADER_IT__SERVER__HTTP_ADDR", "127.0.0.1:9100");
    std::env::set_var(
        "SLUICE_LOADER_IT__RATE_LIMITING__RULES",
        r#"[{"endpoint":"get:/api/values","limit":3,"period":"1m"}]"#,
    );

    let file = write_config(
        ".toml",
        r#"
        [server]
        http_addr = "127.0.0.1:9000"
        "#,
    );

    let config = ConfigLoader::new()
        .with_file(file.path())
        .unwrap()
        .with_env_prefix("sluice_loader_it")
        .load()
        .unwrap();

    std::env::remove_var("SLUICE_LOADER_IT__SERVER__HTTP_ADDR");
    std::env::remove_var("SLUICE_LOADER_IT__RATE_LIMITING__RULES");

    assert_eq!(config.server.http_addr, "127.0.0.1:9100");
    assert_eq!(
        config.rate_limiting.rules,
        vec![RateLimitRuleConfig::new("get:/api/values", 3, "1m")]
    );
}

#[test]
fn env_override_that_breaks_validation_fails_load() {
    std::env::set_var("SLUICE_LOADER_BAD__RATE_LIMITING__IP_WHITELIST", "not-an-ip");

    let result = ConfigLoader::new().with_env_prefix("SLUICE_LOADER_BAD").load();

    std::env::remove_var("SLUICE_LOADER_BAD__RATE_LIMITING__IP_WHITELIST");

    let err = result.unwrap_err();
    assert!(err.to_string().contains("ip_whitelist"));
}
