//! Idempotent provisioning of the audit schema.
//!
//! Each object is checked against `information_schema` first and only created
//! when missing. The DDL itself is also guarded by `IF NOT EXISTS`, so two
//! workers racing through provisioning both succeed.

use tokio_postgres::Client;

use crate::error::DatabaseError;

/// Schema holding the audit tables.
pub const SCHEMA_NAME: &str = "api_test";
pub const REQUESTS_TABLE: &str = "api_requests";
pub const RESPONSES_TABLE: &str = "api_responses";

const CREATE_REQUESTS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS api_test.api_requests (
        id SERIAL PRIMARY KEY,
        endpoint VARCHAR(500) NOT NULL,
        method VARCHAR(10) NOT NULL,
        headers JSONB,
        body JSONB,
        timestamp TIMESTAMP DEFAULT NOW()
    )
"#;

const CREATE_RESPONSES_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS api_test.api_responses (
        id SERIAL PRIMARY KEY,
        request_id INTEGER REFERENCES api_test.api_requests(id) ON DELETE CASCADE,
        status_code INTEGER NOT NULL,
        headers JSONB,
        body JSONB,
        response_time_ms INTEGER,
        timestamp TIMESTAMP DEFAULT NOW()
    )
"#;

/// Create `schema` unless it already exists.
pub async fn ensure_schema(client: &Client, schema: &str) -> Result<(), DatabaseError> {
    validate_identifier(schema)?;

    let exists = client
        .query_opt(
            "SELECT 1 FROM information_schema.schemata WHERE schema_name = $1",
            &[&schema],
        )
        .await?
        .is_some();

    if exists {
        tracing::debug!("Schema {} already exists", schema);
        return Ok(());
    }

    client
        .batch_execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
        .await?;
    tracing::info!("Created schema {}", schema);
    Ok(())
}

/// Run `ddl` unless `schema.table` already exists.
pub async fn ensure_table(
    client: &Client,
    schema: &str,
    table: &str,
    ddl: &str,
) -> Result<(), DatabaseError> {
    validate_identifier(schema)?;
    validate_identifier(table)?;

    let exists = client
        .query_opt(
            "SELECT 1 FROM information_schema.tables WHERE table_schema = $1 AND table_name = $2",
            &[&schema, &table],
        )
        .await?
        .is_some();

    if exists {
        tracing::debug!("Table {}.{} already exists", schema, table);
        return Ok(());
    }

    client.batch_execute(ddl).await?;
    tracing::info!("Created table {}.{}", schema, table);
    Ok(())
}

/// Provision the schema, then the requests table, then the responses table.
pub async fn initialize_database(client: &Client) -> Result<(), DatabaseError> {
    ensure_schema(client, SCHEMA_NAME).await?;
    ensure_table(client, SCHEMA_NAME, REQUESTS_TABLE, CREATE_REQUESTS_TABLE).await?;
    ensure_table(client, SCHEMA_NAME, RESPONSES_TABLE, CREATE_RESPONSES_TABLE).await?;
    Ok(())
}

/// Reject anything that is not a plain, unquoted SQL identifier.
pub fn validate_identifier(name: &str) -> Result<(), DatabaseError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_start && valid_rest && name.len() <= 63 {
        Ok(())
    } else {
        Err(DatabaseError::InvalidIdentifier(name.to_string()))
    }
}
