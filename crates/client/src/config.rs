use std::time::Duration;

/// Default API base when `GEOREPO_API_URL` is not set.
const DEFAULT_API_URL: &str = "http://localhost:8000/api";

/// Errors raised while reading configuration from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got '{value}'")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("{0} must be set")]
    Missing(&'static str),
}

/// Client configuration loaded from environment variables.
///
/// All fields have defaults suitable for a local dashboard.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API base URL without a trailing slash.
    pub api_url: String,
    /// Optional API token, sent as `Authorization: Token <value>`.
    pub api_token: Option<String>,
    /// Cadence of the upload status poller (default: 5 seconds).
    pub status_poll_interval: Duration,
    /// Per-request timeout (default: 30 seconds).
    pub request_timeout: Duration,
    /// Caller has elevated privileges; import navigates to its own
    /// review session instead of the generic listing.
    pub is_admin: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            status_poll_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            is_admin: false,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                     |
    /// |------------------------|-----------------------------|
    /// | `GEOREPO_API_URL`      | `http://localhost:8000/api` |
    /// | `GEOREPO_API_TOKEN`    | unset                       |
    /// | `STATUS_POLL_SECS`     | `5`                         |
    /// | `REQUEST_TIMEOUT_SECS` | `30`                        |
    /// | `GEOREPO_IS_ADMIN`     | `false`                     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let api_url = lookup("GEOREPO_API_URL")
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or(defaults.api_url);

        let api_token = lookup("GEOREPO_API_TOKEN").filter(|token| !token.trim().is_empty());

        let status_poll_interval = match lookup("STATUS_POLL_SECS") {
            Some(value) => Duration::from_secs(parse_secs("STATUS_POLL_SECS", &value)?),
            None => defaults.status_poll_interval,
        };

        let request_timeout = match lookup("REQUEST_TIMEOUT_SECS") {
            Some(value) => Duration::from_secs(parse_secs("REQUEST_TIMEOUT_SECS", &value)?),
            None => defaults.request_timeout,
        };

        let is_admin = match lookup("GEOREPO_IS_ADMIN") {
            Some(value) => parse_flag("GEOREPO_IS_ADMIN", &value)?,
            None => defaults.is_admin,
        };

        Ok(Self {
            api_url,
            api_token,
            status_poll_interval,
            request_timeout,
            is_admin,
        })
    }
}

/// Parse a positive number of seconds.
pub fn parse_secs(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(ConfigError::Invalid {
            name,
            expected: "a positive number of seconds",
            value: value.to_string(),
        }),
    }
}

/// Parse a boolean flag (`true/false`, `1/0`, `yes/no`).
pub fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            expected: "a boolean",
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.api_url, "http://localhost:8000/api");
        assert_eq!(config.status_poll_interval, Duration::from_secs(5));
        assert!(config.api_token.is_none());
        assert!(!config.is_admin);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("GEOREPO_API_URL", "https://georepo.example.org/api/"),
            ("GEOREPO_API_TOKEN", "abc"),
            ("STATUS_POLL_SECS", "2"),
            ("GEOREPO_IS_ADMIN", "yes"),
        ]))
        .unwrap();
        assert_eq!(config.api_url, "https://georepo.example.org/api");
        assert_eq!(config.api_token.as_deref(), Some("abc"));
        assert_eq!(config.status_poll_interval, Duration::from_secs(2));
        assert!(config.is_admin);
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let err = ClientConfig::from_lookup(lookup(&[("STATUS_POLL_SECS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "STATUS_POLL_SECS", .. }));
    }

    #[test]
    fn bad_flag_is_rejected() {
        assert!(parse_flag("X", "maybe").is_err());
        assert!(parse_flag("X", "TRUE").unwrap());
    }
}
