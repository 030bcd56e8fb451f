use std::path::PathBuf;

use georepo_client::config::{parse_flag, ClientConfig, ConfigError};
use georepo_core::types::DbId;

/// Worker configuration: the client settings plus what to watch.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub client: ClientConfig,
    /// Upload session whose rows are followed.
    pub session_id: DbId,
    /// Send every selectable row to review once validation finishes.
    pub auto_import: bool,
    /// Where error reports are saved; downloads are skipped when unset.
    pub report_dir: Option<PathBuf>,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var             | Default  |
    /// |---------------------|----------|
    /// | `UPLOAD_SESSION_ID` | required |
    /// | `AUTO_IMPORT`       | `false`  |
    /// | `REPORT_DIR`        | unset    |
    ///
    /// Client settings are read by [`ClientConfig::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let client = ClientConfig::from_lookup(&lookup)?;

        let raw_session = lookup("UPLOAD_SESSION_ID").ok_or(ConfigError::Missing("UPLOAD_SESSION_ID"))?;
        let session_id = raw_session
            .trim()
            .parse::<DbId>()
            .map_err(|_| ConfigError::Invalid {
                name: "UPLOAD_SESSION_ID",
                expected: "an integer id",
                value: raw_session.clone(),
            })?;

        let auto_import = match lookup("AUTO_IMPORT") {
            Some(value) => parse_flag("AUTO_IMPORT", &value)?,
            None => false,
        };

        let report_dir = lookup("REPORT_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            client,
            session_id,
            auto_import,
            report_dir,
        })
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
    fn session_id_is_required() {
        let err = WorkerConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("UPLOAD_SESSION_ID")));
    }

    #[test]
    fn non_numeric_session_id_is_rejected() {
        let err = WorkerConfig::from_lookup(lookup(&[("UPLOAD_SESSION_ID", "abc")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "UPLOAD_SESSION_ID", .. }));
    }

    #[test]
    fn worker_options_are_read() {
        let config = WorkerConfig::from_lookup(lookup(&[
            ("UPLOAD_SESSION_ID", " 42 "),
            ("AUTO_IMPORT", "1"),
            ("REPORT_DIR", "/tmp/reports"),
        ]))
        .unwrap();
        assert_eq!(config.session_id, 42);
        assert!(config.auto_import);
        assert_eq!(config.report_dir, Some(PathBuf::from("/tmp/reports")));
        assert_eq!(config.client.api_url, "http://localhost:8000/api");
    }
}
