use anyhow::{anyhow, Result};
use config::Config;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::database::Dialect;

/// Fixed client encoding for every connection
pub const DEFAULT_ENCODING: &str = "UTF-8";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DbikitConfig {
    /// Directory holding embedded database files
    pub data_dir: String,

    /// SQL engine to use
    pub dialect: Dialect,

    pub host: Option<String>,
    pub port: Option<u16>,

    /// Database name (file name for the embedded engine)
    pub dbname: String,

    pub username: Option<String>,

    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// First delay of the reconnect backoff, in milliseconds
    pub retry_backoff_ms: u64,
}

const EMPTY_CONFIG: &str = r#"### dbikit configuration file

### directory for embedded (sqlite3) database files
# data_dir = "~/.dbikit"

### sql engine: sqlite3, mysql or pgsql
# dialect = "sqlite3"

### connection settings
# dbname = "dbikit.sqlite"
# host = "localhost"
# port = 5432
# username = "dbikit"
# password = ""

### first reconnect delay in milliseconds, doubled per attempt
# retry_backoff_ms = 100
"#;

impl Default for DbikitConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());

        Self {
            data_dir: format!("{}/.dbikit", home_dir),
            dialect: Dialect::Sqlite,
            host: None,
            port: None,
            dbname: "dbikit.sqlite".to_string(),
            username: None,
            password: None,
            retry_backoff_ms: 100,
        }
    }
}

impl DbikitConfig {
    /// Load the configuration file, layered under `DBIKIT_*` environment variables
    ///
    /// Without an explicit path `$HOME/.dbikit/dbikit.toml` is used. A missing
    /// file is created from a commented template.
    pub fn new(path: &Option<String>) -> Result<DbikitConfig> {
        let mut builder = Config::builder();

        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if path.exists() {
                    let path_str = path
                        .to_str()
                        .ok_or_else(|| anyhow!("Could not convert path to string"))?;
                    builder = builder.add_source(config::File::with_name(path_str));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file: {}", e))?;
                }
            }
            None => {
                let dbikit_dir = Self::config_dir()?;
                std::fs::create_dir_all(&dbikit_dir)
                    .map_err(|e| anyhow!("Unable to create dbikit directory: {}", e))?;
                let p = dbikit_dir.join("dbikit.toml");
                let p_str = p
                    .to_str()
                    .ok_or_else(|| anyhow!("Could not convert path to string"))?;
                if p.exists() {
                    builder = builder.add_source(config::File::with_name(p_str));
                } else {
                    std::fs::write(&p, EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file {}: {}", p_str, e))?;
                }
            }
        }

        // E.g., `DBIKIT_DIALECT=pgsql dbikit status`
        builder = builder.add_source(config::Environment::with_prefix("DBIKIT"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let config = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        Self::from_map(&config)
    }

    fn from_map(config: &HashMap<String, String>) -> Result<DbikitConfig> {
        let defaults = DbikitConfig::default();

        let data_dir = match config.get("data_dir") {
            Some(p) => expand_home(p),
            None => defaults.data_dir,
        };

        let dialect = match config.get("dialect") {
            Some(d) => {
                Dialect::from_name(d).ok_or_else(|| anyhow!("Unknown dialect '{}'", d))?
            }
            None => defaults.dialect,
        };

        let port = match config.get("port") {
            Some(p) => Some(
                p.parse::<u16>()
                    .map_err(|e| anyhow!("Invalid port '{}': {}", p, e))?,
            ),
            None => None,
        };

        let retry_backoff_ms = config
            .get("retry_backoff_ms")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.retry_backoff_ms);

        Ok(DbikitConfig {
            data_dir,
            dialect,
            host: config.get("host").cloned(),
            port,
            dbname: config.get("dbname").cloned().unwrap_or(defaults.dbname),
            username: config.get("username").cloned(),
            password: config.get("password").cloned(),
            retry_backoff_ms,
        })
    }

    fn config_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir().ok_or_else(|| anyhow!("Could not find home directory"))?;
        Ok(home_dir.join(".dbikit"))
    }

    /// Get the config file path
    pub fn config_file_path() -> String {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| "~".to_string());
        format!("{}/.dbikit/dbikit.toml", home_dir)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Connection options for the configured store
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            host: self.host.clone(),
            port: self.port,
            dbname: self.dbname.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            encoding: DEFAULT_ENCODING.to_string(),
            dbdir: match self.dialect {
                Dialect::Sqlite => Some(PathBuf::from(&self.data_dir)),
                _ => None,
            },
        }
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        let options = self.connection_options();
        let mut lines = vec![
            format!("Config File:        {}", Self::config_file_path()),
            format!("Dialect:            {}", self.dialect),
            format!("Database:           {}", self.dbname),
        ];
        match self.dialect {
            Dialect::Sqlite => {
                lines.push(format!("Data Directory:     {}", self.data_dir));
            }
            dialect => {
                lines.push(format!(
                    "Host:               {}",
                    self.host.as_deref().unwrap_or("localhost")
                ));
                if let Some(port) = options.effective_port(dialect) {
                    lines.push(format!("Port:               {}", port));
                }
                if let Some(username) = &self.username {
                    lines.push(format!("Username:           {}", username));
                }
            }
        }
        lines.push(format!("Retry Backoff:      {} ms", self.retry_backoff_ms));
        lines.join("\n")
    }
}

fn expand_home(p: &str) -> String {
    match (p.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest).to_string_lossy().to_string(),
        _ => p.to_string(),
    }
}

/// Options for opening one database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionOptions {
    pub host: Option<String>,
    /// Falls back to the dialect default when unset
    pub port: Option<u16>,
    pub dbname: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub encoding: String,
    /// Directory of the embedded database file
    pub dbdir: Option<PathBuf>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            dbname: String::new(),
            username: None,
            password: None,
            encoding: DEFAULT_ENCODING.to_string(),
            dbdir: None,
        }
    }
}

impl ConnectionOptions {
    /// Embedded database file `dbname` inside `dir`
    pub fn sqlite(dir: &Path, dbname: &str) -> Self {
        Self {
            dbname: dbname.to_string(),
            dbdir: Some(dir.to_path_buf()),
            ..Self::default()
        }
    }

    /// Embedded in-memory database
    pub fn in_memory() -> Self {
        Self {
            dbname: ":memory:".to_string(),
            ..Self::default()
        }
    }

    pub fn server(host: &str, dbname: &str) -> Self {
        Self {
            host: Some(host.to_string()),
            dbname: dbname.to_string(),
            ..Self::default()
        }
    }

    pub fn effective_port(&self, dialect: Dialect) -> Option<u16> {
        self.port.or(dialect.default_port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = DbikitConfig::from_map(&HashMap::new()).unwrap();
        assert_eq!(config.dialect, Dialect::Sqlite);
        assert_eq!(config.dbname, "dbikit.sqlite");
        assert_eq!(config.retry_backoff(), Duration::from_millis(100));
        assert!(config.data_dir.ends_with(".dbikit"));
    }

    #[test]
    fn test_server_settings() {
        let config = DbikitConfig::from_map(&map(&[
            ("dialect", "postgres"),
            ("host", "db.example.org"),
            ("dbname", "Books"),
            ("username", "gnc"),
            ("password", "secret"),
            ("retry_backoff_ms", "5"),
        ]))
        .unwrap();
        assert_eq!(config.dialect, Dialect::Pgsql);

        let options = config.connection_options();
        assert_eq!(options.effective_port(Dialect::Pgsql), Some(5432));
        assert_eq!(options.encoding, "UTF-8");
        assert!(options.dbdir.is_none());
        assert_eq!(config.retry_backoff(), Duration::from_millis(5));

        // never serialized
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
        assert!(config.summary().contains("Port:               5432"));
    }

    #[test]
    fn test_invalid_values() {
        assert!(DbikitConfig::from_map(&map(&[("dialect", "oracle")])).is_err());
        assert!(DbikitConfig::from_map(&map(&[("port", "not-a-port")])).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dbikit.toml");
        std::fs::write(
            &path,
            "dialect = \"mysql\"\nhost = \"db.example.org\"\nport = \"3307\"\ndbname = \"books\"\n",
        )
        .unwrap();

        let config = DbikitConfig::new(&Some(path.to_string_lossy().to_string())).unwrap();
        assert_eq!(config.dialect, Dialect::Mysql);
        assert_eq!(config.port, Some(3307));
        assert_eq!(
            config.connection_options().effective_port(Dialect::Mysql),
            Some(3307)
        );
    }

    #[test]
    fn test_missing_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.toml");
        DbikitConfig::new(&Some(path.to_string_lossy().to_string())).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("### dbikit configuration file"));
    }

    #[test]
    fn test_sqlite_options() {
        let options = ConnectionOptions::sqlite(Path::new("/data"), "books.sqlite");
        assert_eq!(options.dbdir, Some(PathBuf::from("/data")));
        assert_eq!(options.effective_port(Dialect::Sqlite), None);
        assert_eq!(ConnectionOptions::in_memory().dbname, ":memory:");
    }
}
