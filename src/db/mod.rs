//! Database layer: schema provisioning, the shared pool, and the log-sink abstraction.

mod ephemeral;
mod manager;
pub mod schema;

use async_trait::async_trait;

pub use ephemeral::{ConnectionParams, EphemeralPostgres, POSTGRES_TAG};
pub use manager::ConnectionManager;

use crate::audit::{NewRequest, NewResponse};
use crate::error::DatabaseError;

/// Write side of the audit trail, as seen by the instrumented client.
#[async_trait]
pub trait RequestLog: Send + Sync {
    /// Append a request record and return its store-assigned id.
    async fn log_request(&self, request: &NewRequest) -> Result<i32, DatabaseError>;

    /// Append a response record for an earlier request and return its id.
    async fn log_response(&self, response: &NewResponse) -> Result<i32, DatabaseError>;
}
