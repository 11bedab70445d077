//! Error types for the audit harness.

use std::path::PathBuf;

/// Errors raised by the connection manager, schema provisioner and log store.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// The pool could not be built or a connection could not be checked out.
    #[error("Pool error: {0}")]
    Pool(String),

    /// A statement failed inside Postgres.
    #[error("Query failed: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// The ephemeral Postgres container could not be started or stopped.
    #[error("Ephemeral backend error: {reason}")]
    Ephemeral { reason: String },

    /// A schema or table name is not a plain SQL identifier.
    #[error("Invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),

    /// A record could not be converted to or from a JSON column.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// No pool exists yet (or it was closed).
    #[error("Connection manager is not initialized")]
    NotInitialized,
}

impl From<deadpool_postgres::PoolError> for DatabaseError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        DatabaseError::Pool(e.to_string())
    }
}

/// Errors raised by the instrumented HTTP client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The request never produced a complete response.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The endpoint could not be resolved to a URL.
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The server answered with a status the caller did not accept.
    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// The response body was not the JSON the caller asked for.
    #[error("Invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}
