//! Process-wide connection pool for the audit log store.
//!
//! ```text
//! initialize(use_ephemeral)
//!       │
//!       ├── ephemeral && !production ──▶ start container ──▶ pool from mapped port
//!       │
//!       └── otherwise ──▶ pool from config ──▶ SELECT 1
//!       │
//!       ▼
//! check out one connection ──▶ provision schema ──▶ release
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use deadpool_postgres::{Config as PoolSettings, Pool, PoolConfig, Runtime};
use tokio::sync::{Mutex, RwLock};
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};

use crate::config::{Config, DatabaseConfig};
use crate::db::ephemeral::{ConnectionParams, EphemeralPostgres};
use crate::db::schema;
use crate::error::DatabaseError;

static SHARED: OnceLock<Arc<ConnectionManager>> = OnceLock::new();

/// Owns the single pool (and optional ephemeral backend) used for audit logging.
pub struct ConnectionManager {
    config: DatabaseConfig,
    production: bool,
    pool: RwLock<Option<Pool>>,
    ephemeral: Mutex<Option<EphemeralPostgres>>,
    leases: AtomicUsize,
}

impl ConnectionManager {
    /// Create an uninitialized manager.
    pub fn new(config: DatabaseConfig, production: bool) -> Self {
        Self {
            config,
            production,
            pool: RwLock::new(None),
            ephemeral: Mutex::new(None),
            leases: AtomicUsize::new(0),
        }
    }

    /// Create an uninitialized manager from the harness configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.database.clone(), config.is_production())
    }

    /// The process-wide manager. The first caller's configuration wins.
    pub fn shared(config: &Config) -> Arc<Self> {
        SHARED
            .get_or_init(|| {
                tracing::debug!("Creating shared connection manager");
                Arc::new(Self::from_config(config))
            })
            .clone()
    }

    /// Build the pool and provision the audit schema.
    ///
    /// Calling this on an initialized manager logs and returns `Ok(())`.
    /// On failure nothing is left behind: the pool is dropped and any
    /// container that was started is stopped.
    pub async fn initialize(&self, use_ephemeral: bool) -> Result<(), DatabaseError> {
        let mut slot = self.pool.write().await;
        if slot.is_some() {
            tracing::info!("Connection manager already initialized");
            return Ok(());
        }

        match self.open(use_ephemeral).await {
            Ok(pool) => {
                *slot = Some(pool);
                tracing::info!("Audit log store ready");
                Ok(())
            }
            Err(e) => {
                self.stop_ephemeral().await;
                Err(e)
            }
        }
    }

    async fn open(&self, use_ephemeral: bool) -> Result<Pool, DatabaseError> {
        let pool = if use_ephemeral && !self.production {
            let backend = EphemeralPostgres::start().await?;
            let params = backend.params().clone();
            *self.ephemeral.lock().await = Some(backend);
            build_pool(&params, self.config.pool_size)?
        } else {
            if use_ephemeral {
                tracing::warn!("Ephemeral backend refused in production, using configured database");
            }
            let params = ConnectionParams::from(&self.config);
            let pool = build_pool(&params, self.config.pool_size)?;

            // Liveness probe
            let conn = pool.get().await?;
            conn.query_one("SELECT 1", &[]).await?;
            tracing::info!("Connected to {}:{}/{}", params.host, params.port, params.dbname);
            pool
        };

        {
            let conn = pool.get().await?;
            if let Err(e) = schema::initialize_database(&conn).await {
                drop(conn);
                pool.close();
                return Err(e);
            }
        }

        Ok(pool)
    }

    /// True iff a pool currently exists.
    pub async fn is_initialized(&self) -> bool {
        self.pool.read().await.is_some()
    }

    /// A handle to the shared pool.
    pub async fn pool(&self) -> Result<Pool, DatabaseError> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or(DatabaseError::NotInitialized)
    }

    /// Check a connection out of the pool.
    pub async fn conn(&self) -> Result<deadpool_postgres::Object, DatabaseError> {
        Ok(self.pool().await?.get().await?)
    }

    /// Run a statement and return every row.
    pub async fn query(
        &self,
        text: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, DatabaseError> {
        let conn = self.conn().await?;
        Ok(conn.query(text, params).await?)
    }

    /// Run a statement that must return exactly one row.
    pub async fn query_one(
        &self,
        text: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Row, DatabaseError> {
        let conn = self.conn().await?;
        Ok(conn.query_one(text, params).await?)
    }

    /// Run a statement that returns at most one row.
    pub async fn query_opt(
        &self,
        text: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Option<Row>, DatabaseError> {
        let conn = self.conn().await?;
        Ok(conn.query_opt(text, params).await?)
    }

    /// Register a user of the pool. Pair with [`release`](Self::release).
    pub fn acquire(&self) {
        self.leases.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of outstanding [`acquire`](Self::acquire) calls.
    pub fn lease_count(&self) -> usize {
        self.leases.load(Ordering::SeqCst)
    }

    /// Drop one lease. The last lease out closes the pool and stops the
    /// ephemeral backend; returns true when that happened.
    pub async fn release(&self) -> bool {
        let previous = self
            .leases
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        if previous != 1 {
            tracing::debug!("Connection manager still has {} lease(s)", previous.saturating_sub(1));
            return false;
        }
        self.close().await;
        true
    }

    /// Close the pool and stop the ephemeral backend. Safe to call repeatedly.
    pub async fn close(&self) {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close();
            tracing::info!("Audit log pool closed");
        }
        self.stop_ephemeral().await;
    }

    async fn stop_ephemeral(&self) {
        if let Some(backend) = self.ephemeral.lock().await.take()
            && let Err(e) = backend.stop().await
        {
            tracing::warn!("Failed to stop ephemeral Postgres: {}", e);
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // Async cleanup has to happen in close()
        if let Ok(slot) = self.pool.try_read()
            && slot.is_some()
        {
            tracing::warn!("ConnectionManager dropped without close(), pool left open");
        }
    }
}

fn build_pool(params: &ConnectionParams, max_size: usize) -> Result<Pool, DatabaseError> {
    let mut cfg = PoolSettings::new();
    cfg.host = Some(params.host.clone());
    cfg.port = Some(params.port);
    cfg.dbname = Some(params.dbname.clone());
    cfg.user = Some(params.user.clone());
    cfg.password = Some(params.password.clone());
    cfg.pool = Some(PoolConfig {
        max_size,
        ..Default::default()
    });

    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| DatabaseError::Pool(e.to_string()))
}
