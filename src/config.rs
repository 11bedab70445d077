//! Harness configuration.
//!
//! Values are resolved in this order, first hit wins:
//! 1. Environment variables (a `.env` file is loaded first via `dotenvy`)
//! 2. The JSON config file (`API_AUDIT_CONFIG`, else `config/default.json`)
//! 3. Built-in defaults
//!
//! ```json
//! {
//!   "database": { "host": "localhost", "port": 5432, "name": "api_tests" },
//!   "api": { "baseUrl": "https://dummyjson.com" },
//!   "test": { "timeout": 30000, "retries": 0 }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_CONFIG_PATH: &str = "config/default.json";

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub test: TestConfig,
    /// Deployment environment name. `production` disables the ephemeral backend.
    pub environment: String,
}

/// Connection parameters for the audit log store.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: SecretString,
    pub pool_size: usize,
    /// Start a disposable Postgres container instead of using `host`/`port`.
    pub use_ephemeral: bool,
}

/// The API under test.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub username: String,
    pub password: SecretString,
}

/// Test runner knobs.
#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Per-request timeout applied to the HTTP client.
    pub timeout: Duration,
    /// Carried for the configuration surface only; the client never retries.
    pub retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            api: ApiConfig::default(),
            test: TestConfig::default(),
            environment: "development".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            name: "api_tests".to_string(),
            user: "postgres".to_string(),
            password: SecretString::from("postgres".to_string()),
            pool_size: 5,
            use_ephemeral: false,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://dummyjson.com".to_string(),
            username: "emilys".to_string(),
            password: SecretString::from("emilyspass".to_string()),
        }
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(30_000),
            retries: 0,
        }
    }
}

/// On-disk shape of the config file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub test: TestSection,
    pub environment: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub name: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub pool_size: Option<usize>,
    pub use_ephemeral: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSection {
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSection {
    /// Milliseconds.
    pub timeout: Option<u64>,
    pub retries: Option<u32>,
}

impl ConfigFile {
    /// Read and parse a config file.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Config {
    /// Load configuration from `.env`, the config file and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let file = match std::env::var_os("API_AUDIT_CONFIG") {
            // An explicitly named file must exist.
            Some(path) => ConfigFile::read(&PathBuf::from(path))?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    ConfigFile::read(path)?
                } else {
                    tracing::debug!("No config file at {}, using defaults", path.display());
                    ConfigFile::default()
                }
            }
        };

        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with an environment lookup. Environment wins.
    pub fn resolve<F>(file: ConfigFile, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let database = DatabaseConfig {
            host: env("DB_HOST")
                .or(file.database.host)
                .unwrap_or(defaults.database.host),
            port: parse_env(&env, "DB_PORT")?
                .or(file.database.port)
                .unwrap_or(defaults.database.port),
            name: env("DB_NAME")
                .or(file.database.name)
                .unwrap_or(defaults.database.name),
            user: env("DB_USER")
                .or(file.database.user)
                .unwrap_or(defaults.database.user),
            password: env("DB_PASSWORD")
                .or(file.database.password)
                .map(SecretString::from)
                .unwrap_or(defaults.database.password),
            pool_size: parse_env(&env, "DB_POOL_SIZE")?
                .or(file.database.pool_size)
                .unwrap_or(defaults.database.pool_size),
            use_ephemeral: parse_bool_env(&env, "USE_EPHEMERAL_DB")?
                .or(file.database.use_ephemeral)
                .unwrap_or(defaults.database.use_ephemeral),
        };

        let api = ApiConfig {
            base_url: env("API_BASE_URL")
                .or(file.api.base_url)
                .unwrap_or(defaults.api.base_url),
            username: env("API_USERNAME")
                .or(file.api.username)
                .unwrap_or(defaults.api.username),
            password: env("API_PASSWORD")
                .or(file.api.password)
                .map(SecretString::from)
                .unwrap_or(defaults.api.password),
        };

        let test = TestConfig {
            timeout: parse_env::<u64, _>(&env, "TEST_TIMEOUT")?
                .or(file.test.timeout)
                .map(Duration::from_millis)
                .unwrap_or(defaults.test.timeout),
            retries: parse_env(&env, "TEST_RETRIES")?
                .or(file.test.retries)
                .unwrap_or(defaults.test.retries),
        };

        Ok(Self {
            database,
            api,
            test,
            environment: env("APP_ENV")
                .or(file.environment)
                .unwrap_or(defaults.environment),
        })
    }

    /// True when running against production, where no ephemeral store may be started.
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

fn parse_env<T, F>(env: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    env(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
            })
        })
        .transpose()
}

fn parse_bool_env<F>(env: &F, key: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    env(key)
        .map(|raw| match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
            }),
        })
        .transpose()
}
