//! API test harness with a PostgreSQL audit trail.
//!
//! Tests talk to the API under test through [`ApiClient`]. Each call is
//! recorded as a request row before it is sent and a response row after it
//! returns (or a status-500 row when the transport fails), both in the
//! `api_test` schema. Logging is best-effort: it never changes the outcome a
//! test observes.
//!
//! # Example
//!
//! ```ignore
//! use api_audit::{Config, Harness, RequestOptions};
//!
//! let harness = Harness::start(Config::load()?).await?;
//! let response = harness.client().get("/users/1", RequestOptions::new()).await?;
//! assert_eq!(response.status().as_u16(), 200);
//! harness.shutdown().await;
//! ```

pub mod audit;
pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod fixtures;
pub mod harness;

pub use audit::{HttpMethod, LogStore, NewRequest, NewResponse};
pub use client::{ApiClient, ApiResponse, RequestOptions};
pub use config::Config;
pub use db::{ConnectionManager, RequestLog};
pub use error::{ClientError, ConfigError, DatabaseError};
pub use harness::Harness;
