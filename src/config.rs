use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use crate::models::{ClientPrincipal, ConnectionProfile};

/// Location of the configuration file when `PGREST_CONFIG_PATH` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "./config/pgrest.conf";

static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([\]}])").expect("constant pattern"));

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub pgrest: ServerConfig,
    #[serde(default)]
    pub connections: Vec<ConnectionProfile>,
    #[serde(default)]
    pub users: Vec<ClientPrincipal>,
    #[serde(skip)]
    connections_by_name: HashMap<String, ConnectionProfile>,
    #[serde(skip)]
    users_by_id: HashMap<String, ClientPrincipal>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub port: u16,
    pub debug: bool,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(alias = "maxconcurrentrequests")]
    pub max_concurrent_requests: usize,
    /// Request deadline in seconds
    pub timeout: u64,
    /// Seconds an unused pool survives before the sweep closes it
    #[serde(alias = "poolidletimeout")]
    pub pool_idle_timeout: u64,
    #[serde(alias = "maxpoolsize")]
    pub max_pool_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorsConfig {
    #[serde(default, alias = "alloworigins")]
    pub allow_origins: Vec<String>,
    #[serde(default, alias = "allowheaders")]
    pub allow_headers: Vec<String>,
    #[serde(default, alias = "allowmethods")]
    pub allow_methods: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: vec!["*".to_string()],
            allow_headers: vec!["*".to_string()],
            allow_methods: vec!["POST".to_string(), "OPTIONS".to_string()],
        }
    }
}

impl CorsConfig {
    /// Check whether `origin` is in the allow-list. `*` allows everything.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        self.allow_origins
            .iter()
            .any(|allowed| allowed == "*" || allowed == origin)
    }

    pub fn allows_any_origin(&self) -> bool {
        self.allow_origins.iter().any(|o| o == "*")
    }

    fn fill_defaults(&mut self) {
        let defaults = CorsConfig::default();
        if self.allow_origins.is_empty() {
            self.allow_origins = defaults.allow_origins;
        }
        if self.allow_headers.is_empty() {
            self.allow_headers = defaults.allow_headers;
        }
        if self.allow_methods.is_empty() {
            self.allow_methods = defaults.allow_methods;
        }
    }
}

impl Config {
    /// Load the configuration file named by `PGREST_CONFIG_PATH`.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file
        let _ = dotenv::dotenv();

        let path = env::var("PGREST_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::from_file(path)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, config::ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            config::ConfigError::Message(format!(
                "Failed to read configuration file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, config::ConfigError> {
        let cleaned = clean_json(raw);

        let mut builder = config::Config::builder()
            .set_default("pgrest.port", 8080)?
            .set_default("pgrest.debug", false)?
            .set_default("pgrest.maxConcurrentRequests", 15)?
            .set_default("pgrest.timeout", 30)?
            .set_default("pgrest.poolIdleTimeout", 60)?
            .set_default("pgrest.maxPoolSize", 16)?
            .add_source(config::File::from_str(&cleaned, config::FileFormat::Json));

        if let Ok(port) = env::var("PORT") {
            if let Ok(port) = port.parse::<u16>() {
                builder = builder.set_override("pgrest.port", port)?;
            }
        }

        let mut config: Config = builder.build()?.try_deserialize()?;
        config.finalize();
        Ok(config)
    }

    /// Apply defaults the file may leave empty and build the lookup tables.
    fn finalize(&mut self) {
        self.pgrest.cors.fill_defaults();
        if self.pgrest.max_concurrent_requests == 0 {
            self.pgrest.max_concurrent_requests = 15;
        }
        if self.pgrest.timeout == 0 {
            self.pgrest.timeout = 30;
        }

        self.connections_by_name = self
            .connections
            .iter()
            .map(|c| (c.name.clone(), c.clone()))
            .collect();
        self.users_by_id = self
            .users
            .iter()
            .map(|u| (u.client_id.clone(), u.clone()))
            .collect();
    }

    pub fn connection(&self, name: &str) -> Option<&ConnectionProfile> {
        self.connections_by_name.get(name)
    }

    /// Find the principal registered under `client_id`.
    pub fn principal(&self, client_id: &str) -> Option<ClientPrincipal> {
        self.users_by_id.get(client_id).cloned()
    }

    pub fn server_address(&self) -> String {
        format!("0.0.0.0:{}", self.pgrest.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.pgrest.timeout)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pgrest.pool_idle_timeout.max(1))
    }
}

/// Remove trailing commas before closing braces/brackets and collapse doubled commas.
fn clean_json(input: &str) -> String {
    TRAILING_COMMA
        .replace_all(input, "$1")
        .replace(",,", ",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "pgrest": {
            "port": 9090,
            "debug": true,
            "cors": { "allowOrigins": ["https://app.example.com"], },
            "timeout": 10,
        },
        "connections": [
            { "name": "default", "auth": "public", "connectionString": "postgres://u:p@localhost/db" },
            { "name": "private", "connectionString": "postgres://u:p@localhost/db2" },
        ],
        "users": [
            { "clientId": "client-a", "clientSecret": "secret-a", "connections": ["private"] }
        ]
    }"#;

    #[test]
    fn test_clean_json() {
        assert_eq!(clean_json(r#"{"a": [1, 2,], }"#), r#"{"a": [1, 2]}"#);
        assert_eq!(clean_json(r#"[1,,2]"#), "[1,2]");
    }

    #[test]
    fn test_config_values_and_defaults() {
        env::remove_var("PORT");
        let config = Config::from_json_str(SAMPLE).unwrap();

        assert_eq!(config.pgrest.port, 9090);
        assert!(config.pgrest.debug);
        assert_eq!(config.pgrest.timeout, 10);
        assert_eq!(config.pgrest.max_concurrent_requests, 15);
        assert_eq!(config.pool_idle_timeout(), Duration::from_secs(60));
        assert_eq!(config.pgrest.cors.allow_origins, vec!["https://app.example.com"]);
        assert_eq!(config.pgrest.cors.allow_methods, vec!["POST", "OPTIONS"]);
    }

    #[test]
    fn test_lookups() {
        let config = Config::from_json_str(SAMPLE).unwrap();

        assert!(config.connection("default").unwrap().is_public());
        assert!(!config.connection("private").unwrap().is_public());
        assert!(config.connection("missing").is_none());

        let principal = config.principal("client-a").unwrap();
        assert_eq!(principal.client_secret, "secret-a");
        assert!(principal.can_access("private"));
        assert!(config.principal("client-b").is_none());
    }

    #[test]
    fn test_origin_check() {
        let cors = CorsConfig::default();
        assert!(cors.is_origin_allowed("https://anything.example"));

        let cors = CorsConfig {
            allow_origins: vec!["https://app.example.com".to_string()],
            ..CorsConfig::default()
        };
        assert!(cors.is_origin_allowed("https://app.example.com"));
        assert!(!cors.is_origin_allowed("https://evil.example"));
        assert!(!cors.is_origin_allowed(""));
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.connections.len(), 2);
        assert_eq!(config.users.len(), 1);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(Config::from_file("/nonexistent/pgrest.conf").is_err());
    }
}
