//! Audit trail of every request the harness sends.
//!
//! Two append-only tables in the `api_test` schema:
//! - `api_requests`: one row per outbound call, written before the call
//! - `api_responses`: the matching outcome, written after it

mod records;
mod store;

pub use records::{
    FailedResponse, Headers, HttpMethod, NewRequest, NewResponse, RequestRecord,
    RequestWithResponse, ResponseRecord, TRANSPORT_ERROR_STATUS, duration_ms, to_json_column,
};
pub use store::LogStore;
