use super::{types::Config, ConfigError};

/// Validate configuration
///
/// Checks the things serde defaults cannot: non-zero limits, positive
/// rates, parseable proxy URLs, and unique source names.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.engine.concurrent_downloads == 0 {
        return Err(ConfigError::ValidationError(
            "engine.concurrent_downloads must be at least 1".to_string(),
        ));
    }

    if config.engine.queue_capacity == 0 {
        return Err(ConfigError::ValidationError(
            "engine.queue_capacity must be at least 1".to_string(),
        ));
    }

    if config.engine.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "engine.max_attempts must be at least 1".to_string(),
        ));
    }

    if config.engine.default_rate_per_sec <= 0.0 {
        return Err(ConfigError::ValidationError(
            "engine.default_rate_per_sec must be positive".to_string(),
        ));
    }

    for source in &config.sources {
        if source.name.is_empty() {
            return Err(ConfigError::ValidationError(
                "source name cannot be empty".to_string(),
            ));
        }
        if let Some(rate) = source.rate_per_sec {
            if rate <= 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "source '{}': rate_per_sec must be positive",
                    source.name
                )));
            }
        }
        let duplicates = config
            .sources
            .iter()
            .filter(|s| s.name == source.name)
            .count();
        if duplicates > 1 {
            return Err(ConfigError::ValidationError(format!(
                "duplicate source name '{}'",
                source.name
            )));
        }
    }

    if config.proxy.enabled {
        for proxy in &config.proxy.proxies {
            if reqwest::Proxy::all(proxy.as_str()).is_err() {
                return Err(ConfigError::ValidationError(format!(
                    "invalid proxy URL '{}'",
                    proxy
                )));
            }
        }
        if config.proxy.unhealthy_after == 0 {
            return Err(ConfigError::ValidationError(
                "proxy.unhealthy_after must be at least 1".to_string(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    #[test]
    fn test_validate_default_config() {
        let config = load_config_from_str("").unwrap();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_zero_workers_fails() {
        let config = load_config_from_str(
            r#"
[engine]
concurrent_downloads = 0
"#,
        )
        .unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_negative_rate_fails() {
        let config = load_config_from_str(
            r#"
[[sources]]
name = "e621"
base_url = "https://e621.net"
rate_per_sec = -1.0
"#,
        )
        .unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_duplicate_source_fails() {
        let config = load_config_from_str(
            r#"
[[sources]]
name = "e621"
base_url = "https://e621.net"

[[sources]]
name = "e621"
base_url = "https://e926.net"
"#,
        )
        .unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_validate_bad_proxy_url_fails() {
        let config = load_config_from_str(
            r#"
[proxy]
enabled = true
proxies = ["not a url"]
"#,
        )
        .unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_disabled_proxy_skips_url_check() {
        let config = load_config_from_str(
            r#"
[proxy]
enabled = false
proxies = ["not a url"]
"#,
        )
        .unwrap();
        assert!(validate_config(&config).is_ok());
    }
}
