//! Disposable Postgres container for test runs.
//!
//! Started once per worker by the [`ConnectionManager`](super::ConnectionManager)
//! and stopped when the manager is closed. Nothing else may start or stop it.

use secrecy::ExposeSecret;
use testcontainers_modules::postgres::Postgres;
use testcontainers_modules::testcontainers::runners::AsyncRunner;
use testcontainers_modules::testcontainers::{ContainerAsync, ImageExt};

use crate::config::DatabaseConfig;
use crate::error::DatabaseError;

/// Image tag used for the ephemeral backend.
pub const POSTGRES_TAG: &str = "16-alpine";

const POSTGRES_PORT: u16 = 5432;

/// Where to reach a Postgres server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
}

impl From<&DatabaseConfig> for ConnectionParams {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            dbname: config.name.clone(),
            user: config.user.clone(),
            password: config.password.expose_secret().to_string(),
        }
    }
}

/// A running Postgres container and the parameters it was published on.
pub struct EphemeralPostgres {
    container: ContainerAsync<Postgres>,
    params: ConnectionParams,
}

impl EphemeralPostgres {
    /// Pull (if needed) and start a Postgres container, waiting until it accepts connections.
    pub async fn start() -> Result<Self, DatabaseError> {
        tracing::info!("Starting ephemeral Postgres (postgres:{})", POSTGRES_TAG);

        let container = Postgres::default()
            .with_tag(POSTGRES_TAG)
            .start()
            .await
            .map_err(|e| DatabaseError::Ephemeral {
                reason: format!("container start failed: {}", e),
            })?;

        let host = container
            .get_host()
            .await
            .map_err(|e| DatabaseError::Ephemeral {
                reason: format!("host lookup failed: {}", e),
            })?
            .to_string();

        let port = container
            .get_host_port_ipv4(POSTGRES_PORT)
            .await
            .map_err(|e| DatabaseError::Ephemeral {
                reason: format!("port lookup failed: {}", e),
            })?;

        // The module's image runs with postgres/postgres/postgres.
        let params = ConnectionParams {
            host,
            port,
            dbname: "postgres".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
        };

        tracing::info!(
            "Ephemeral Postgres {} listening on {}:{}",
            container.id(),
            params.host,
            params.port
        );

        Ok(Self { container, params })
    }

    /// Connection parameters assigned at startup.
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Stop the container. Dropping it afterwards removes it.
    pub async fn stop(self) -> Result<(), DatabaseError> {
        let id = self.container.id().to_string();
        self.container
            .stop()
            .await
            .map_err(|e| DatabaseError::Ephemeral {
                reason: format!("container stop failed: {}", e),
            })?;
        tracing::info!("Stopped ephemeral Postgres {}", id);
        Ok(())
    }
}
