use dotenvy::dotenv;
use reqwest::Url;
use std::env;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} missing, it is required")]
    Missing(&'static str),

    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// AWS SQS settings; present only when AWS_SQS_URL is set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub queue_url: String,
    pub region: String,
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub redis_url: String,
    pub flag_service_url: Url,
    pub targeting_service_url: Url,
    pub queue: Option<QueueConfig>,
    pub cache_ttl: Duration,
    pub error_cache_ttl: Duration,
    pub cache_timeout: Duration,
    pub upstream_timeout: Duration,
    pub evaluation_timeout: Duration,
    pub publish_timeout: Duration,
    pub event_buffer_size: usize,
    pub event_workers: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv().is_ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let port = match get("PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: "PORT",
                reason: "must be a valid u16 number".to_string(),
            })?,
            None => 8004,
        };

        let queue = match get("AWS_SQS_URL") {
            Some(queue_url) => Some(QueueConfig {
                queue_url,
                region: get("AWS_REGION").ok_or(ConfigError::Invalid {
                    key: "AWS_REGION",
                    reason: "must be set to use SQS".to_string(),
                })?,
                endpoint_url: get("AWS_ENDPOINT_URL"),
            }),
            None => None,
        };

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            redis_url: required("REDIS_URL")?,
            flag_service_url: parse_base_url("FLAG_SERVICE_URL", &required("FLAG_SERVICE_URL")?)?,
            targeting_service_url: parse_base_url(
                "TARGETING_SERVICE_URL",
                &required("TARGETING_SERVICE_URL")?,
            )?,
            queue,
            cache_ttl: Duration::from_secs(positive(&get, "CACHE_TTL_SECS", 60)?),
            error_cache_ttl: Duration::from_secs(positive(&get, "ERROR_CACHE_TTL_SECS", 5)?),
            cache_timeout: Duration::from_millis(positive(&get, "CACHE_TIMEOUT_MS", 250)?),
            upstream_timeout: Duration::from_millis(positive(&get, "UPSTREAM_TIMEOUT_MS", 2000)?),
            evaluation_timeout: Duration::from_millis(positive(&get, "EVALUATION_TIMEOUT_MS", 5000)?),
            publish_timeout: Duration::from_millis(positive(&get, "EVENT_PUBLISH_TIMEOUT_MS", 2000)?),
            event_buffer_size: positive(&get, "EVENT_BUFFER_SIZE", 1024)? as usize,
            event_workers: positive(&get, "EVENT_WORKERS", 4)? as usize,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn positive(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(raw) = get(key) else {
        return Ok(default);
    };

    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::Invalid {
            key,
            reason: format!("'{}' is not a positive integer", raw),
        }),
    }
}

fn parse_base_url(key: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::Invalid {
        key,
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(ConfigError::Invalid {
            key,
            reason: "must be an http(s) base URL".to_string(),
        });
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("REDIS_URL", "redis://localhost:6379/0"),
        ("FLAG_SERVICE_URL", "http://localhost:8002"),
        ("TARGETING_SERVICE_URL", "http://localhost:8003"),
    ];

    #[test]
    fn test_defaults() {
        let config = load(&REQUIRED).unwrap();
        assert_eq!(config.addr(), "0.0.0.0:8004");
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.error_cache_ttl, Duration::from_secs(5));
        assert_eq!(config.upstream_timeout, Duration::from_millis(2000));
        assert_eq!(config.evaluation_timeout, Duration::from_millis(5000));
        assert_eq!(config.event_workers, 4);
        assert!(config.queue.is_none());
    }

    #[test]
    fn test_missing_required() {
        assert_eq!(load(&REQUIRED[1..]), Err(ConfigError::Missing("REDIS_URL")));
        assert_eq!(
            load(&REQUIRED[..2]),
            Err(ConfigError::Missing("TARGETING_SERVICE_URL"))
        );
    }

    #[test]
    fn test_queue_requires_region() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("AWS_SQS_URL", "http://localhost:4566/000000000000/evaluations"));
        assert!(matches!(
            load(&vars),
            Err(ConfigError::Invalid { key: "AWS_REGION", .. })
        ));

        vars.push(("AWS_REGION", "us-east-1"));
        vars.push(("AWS_ENDPOINT_URL", "http://localhost:4566"));
        let queue = load(&vars).unwrap().queue.unwrap();
        assert_eq!(queue.region, "us-east-1");
        assert_eq!(queue.endpoint_url.as_deref(), Some("http://localhost:4566"));
    }

    #[test]
    fn test_invalid_values() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("CACHE_TTL_SECS", "0"));
        assert!(matches!(
            load(&vars),
            Err(ConfigError::Invalid { key: "CACHE_TTL_SECS", .. })
        ));

        let mut vars = REQUIRED.to_vec();
        vars.push(("PORT", "eighty"));
        assert!(matches!(load(&vars), Err(ConfigError::Invalid { key: "PORT", .. })));

        let mut vars = REQUIRED.to_vec();
        vars[1] = ("FLAG_SERVICE_URL", "mailto:flags@example.com");
        assert!(matches!(
            load(&vars),
            Err(ConfigError::Invalid { key: "FLAG_SERVICE_URL", .. })
        ));
    }

    #[test]
    fn test_overrides() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("PORT", "9000"),
            ("HOST", "127.0.0.1"),
            ("ERROR_CACHE_TTL_SECS", "2"),
            ("EVALUATION_TIMEOUT_MS", "750"),
        ]);
        let config = load(&vars).unwrap();
        assert_eq!(config.addr(), "127.0.0.1:9000");
        assert_eq!(config.error_cache_ttl, Duration::from_secs(2));
        assert_eq!(config.evaluation_timeout, Duration::from_millis(750));
    }
}
