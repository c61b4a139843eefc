use crate::core::db::{BackendKind, ConnectionOptions, TIMEOUT_UNSET};
use crate::core::{DbError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub source: BackendConfig,
    pub destination: Option<BackendConfig>,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

/// Backend-specific connection settings.
///
/// File-based backends use `path`; xbase additionally lists its `.dbf`
/// `files`; client-server backends use host, port, service and credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub files: Vec<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub service: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// ODBC driver name, for backends reached through ODBC
    pub driver: Option<String>,
    /// Statement timeout in seconds; `-1` leaves the driver default
    #[serde(default = "default_timeout")]
    pub timeout_secs: i64,
    #[serde(default)]
    pub execute_security: bool,
}

fn default_timeout() -> i64 {
    TIMEOUT_UNSET
}

impl BackendConfig {
    /// Settings for a backend of `kind` with everything else unset.
    pub fn new(kind: BackendKind) -> Self {
        BackendConfig {
            kind,
            path: None,
            files: Vec::new(),
            host: None,
            port: None,
            service: None,
            user: None,
            password: None,
            driver: None,
            timeout_secs: TIMEOUT_UNSET,
            execute_security: false,
        }
    }

    /// Shorthand for a file-based backend.
    pub fn with_path(kind: BackendKind, path: impl Into<PathBuf>) -> Self {
        BackendConfig {
            path: Some(path.into()),
            ..BackendConfig::new(kind)
        }
    }

    pub fn options(&self) -> ConnectionOptions {
        ConnectionOptions::new(self.timeout_secs, self.execute_security)
    }

    /// Checks that the fields `kind` needs are present.
    pub fn validate(&self) -> Result<()> {
        let missing = |field: &str| {
            DbError::Config(format!("{} backend requires '{}'", self.kind, field))
        };
        match self.kind {
            BackendKind::Sqlite | BackendKind::Access => {
                self.path.as_ref().ok_or_else(|| missing("path"))?;
            }
            BackendKind::Xbase => {
                if self.files.is_empty() && self.path.is_none() {
                    return Err(missing("files"));
                }
            }
            BackendKind::Oracle => {
                self.host.as_ref().ok_or_else(|| missing("host"))?;
                self.service.as_ref().ok_or_else(|| missing("service"))?;
                self.user.as_ref().ok_or_else(|| missing("user"))?;
            }
            BackendKind::Memory => {}
        }
        Ok(())
    }
}

/// Failure handling of a configured transfer job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPolicy {
    /// Stop at the first destination failure
    #[default]
    Abort,
    /// Keep going and collect failures in a log
    Log,
    /// Keep going and report progress and failures as they happen
    Events,
}

/// One transfer from the source to the destination.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    pub name: String,
    /// Query run against the source
    pub query: String,
    /// Insert template with `#column#` placeholders (per-row writes)
    pub insert: Option<String>,
    /// Destination table (batched writes)
    pub table: Option<String>,
    /// Destination column list such as `(id,val)` (batched writes)
    pub columns: Option<String>,
    /// Rows per chunk; absent reads the whole result in one pass
    pub chunk_size: Option<u64>,
    #[serde(default)]
    pub policy: JobPolicy,
    #[serde(default)]
    pub batched: bool,
}

impl JobConfig {
    pub fn validate(&self) -> Result<()> {
        if self.insert.is_none() {
            return Err(DbError::Config(format!(
                "job '{}' requires an 'insert' template",
                self.name
            )));
        }
        if self.batched {
            if self.table.is_none() {
                return Err(DbError::Config(format!(
                    "batched job '{}' requires a destination 'table'",
                    self.name
                )));
            }
            if self.chunk_size.is_none() {
                return Err(DbError::Config(format!(
                    "batched job '{}' requires a 'chunk_size'",
                    self.name
                )));
            }
            if self.policy == JobPolicy::Events {
                return Err(DbError::Config(format!(
                    "batched job '{}' cannot report per-row events",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        self.source.validate()?;
        if let Some(destination) = &self.destination {
            destination.validate()?;
        }
        if !self.jobs.is_empty() && self.destination.is_none() {
            return Err(DbError::Config(
                "jobs are configured but no [destination] is".to_string(),
            ));
        }
        for job in &self.jobs {
            job.validate()?;
        }
        Ok(())
    }
}

/// Parses and validates configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).map_err(|e| DbError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Loads configuration from a TOML file at the given path.
///
/// # Arguments
///
/// * `path` - The file path to the TOML configuration file.
///
/// # Example
///
/// ```no_run
/// let config = dbbridge::config::load_config("config.toml").expect("Failed to load config");
/// println!("{:?}", config);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// `<config dir>/dbbridge/config.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("dbbridge").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const SAMPLE_CONFIG: &str = r#"
[source]
kind = "xbase"
path = "/tmp/legacy.db"
files = ["/data/CLIENTS.DBF", "/data/ORDERS.DBF"]

[destination]
kind = "sqlite"
path = "/tmp/target.db"
timeout_secs = 30
execute_security = true

[[jobs]]
name = "clients"
query = "select * from clients"
insert = "insert into clients values ('#code#', '#name#')"
chunk_size = 500
policy = "log"

[[jobs]]
name = "orders"
query = "select * from orders"
insert = "('#id#', '#total#')"
table = "orders"
chunk_size = 1000
batched = true
"#;

    #[test]
    fn test_load_config_from_str() {
        let config = parse_config(SAMPLE_CONFIG).expect("Failed to parse sample config");
        assert_eq!(config.source.kind, BackendKind::Xbase);
        assert_eq!(config.source.files.len(), 2);
        assert_eq!(config.source.timeout_secs, TIMEOUT_UNSET);
        assert_eq!(config.source.options().timeout, None);

        let destination = config.destination.expect("destination");
        assert_eq!(destination.options().timeout, Some(Duration::from_secs(30)));
        assert!(destination.options().execute_security);

        assert_eq!(config.jobs.len(), 2);
        assert_eq!(config.jobs[0].policy, JobPolicy::Log);
        assert!(!config.jobs[0].batched);
        assert_eq!(config.jobs[1].policy, JobPolicy::Abort);
        assert!(config.jobs[1].batched);
    }

    #[test]
    fn test_missing_required_fields() {
        let err = parse_config("[source]\nkind = \"oracle\"\nhost = \"db\"\n").unwrap_err();
        match err {
            DbError::Config(msg) => assert!(msg.contains("service")),
            other => panic!("Expected configuration error, got {:?}", other),
        }
        assert!(parse_config("[source]\nkind = \"sqlite\"\n").is_err());
        assert!(parse_config("[source]\nkind = \"memory\"\n").is_ok());
    }

    #[test]
    fn test_unknown_backend_kind() {
        assert!(matches!(
            parse_config("[source]\nkind = \"mysql\"\n"),
            Err(DbError::Config(_))
        ));
    }

    #[test]
    fn test_jobs_need_destination() {
        let text = r#"
[source]
kind = "memory"

[[jobs]]
name = "j"
query = "select 1"
insert = "insert into t values (#a#)"
"#;
        assert!(matches!(parse_config(text), Err(DbError::Config(_))));
    }

    #[test]
    fn test_batched_events_rejected() {
        let job = JobConfig {
            name: "j".to_string(),
            query: "select 1".to_string(),
            insert: Some("(#a#)".to_string()),
            table: Some("t".to_string()),
            columns: None,
            chunk_size: Some(10),
            policy: JobPolicy::Events,
            batched: true,
        };
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_default_config_path_shape() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("dbbridge/config.toml"));
        }
    }
}
