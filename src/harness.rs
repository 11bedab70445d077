//! Per-worker test fixture: audit store plus a client wired to it.
//!
//! If the log store cannot be brought up the harness still starts, with an
//! unlogged client, so a broken database never fails the tests themselves.
//!
//! Each harness holds a lease on its connection manager. Harnesses in one
//! process share the manager from [`ConnectionManager::shared`], and the pool
//! (and any ephemeral backend) is torn down only when the last one shuts down.

use std::sync::Arc;

use crate::audit::LogStore;
use crate::auth::AuthApi;
use crate::client::ApiClient;
use crate::config::Config;
use crate::db::ConnectionManager;
use crate::error::ClientError;
use crate::fixtures::UsersApi;

pub struct Harness {
    config: Config,
    manager: Arc<ConnectionManager>,
    store: Option<LogStore>,
    client: ApiClient,
}

impl Harness {
    /// Start against the process-wide connection manager.
    pub async fn start(config: Config) -> Result<Self, ClientError> {
        let manager = ConnectionManager::shared(&config);
        Self::with_manager(config, manager).await
    }

    /// Start against a specific connection manager.
    pub async fn with_manager(
        config: Config,
        manager: Arc<ConnectionManager>,
    ) -> Result<Self, ClientError> {
        let store = match manager.initialize(config.database.use_ephemeral).await {
            Ok(()) => {
                manager.acquire();
                Some(LogStore::new(Arc::clone(&manager)))
            }
            Err(e) => {
                tracing::warn!("Audit logging disabled, log store unavailable: {}", e);
                None
            }
        };

        let mut client = ApiClient::from_config(&config)?;
        if let Some(store) = &store {
            client = client.with_log(Arc::new(store.clone()));
        }

        Ok(Self {
            config,
            manager,
            store,
            client,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// The audit store, when logging is enabled.
    pub fn store(&self) -> Option<&LogStore> {
        self.store.as_ref()
    }

    pub fn logging_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn auth(&self) -> AuthApi<'_> {
        AuthApi::new(&self.client, &self.config.api)
    }

    pub fn users(&self) -> UsersApi<'_> {
        UsersApi::new(&self.client)
    }

    /// Release this harness's lease. The last harness on a manager closes
    /// the pool and stops any ephemeral backend.
    pub async fn shutdown(self) {
        if self.store.is_some() {
            self.manager.release().await;
        }
    }
}
