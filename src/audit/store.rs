//! PostgreSQL-backed audit trail.

use std::sync::Arc;

use async_trait::async_trait;

use crate::audit::records::{
    FailedResponse, NewRequest, NewResponse, RequestRecord, RequestWithResponse, ResponseRecord,
    to_json_column,
};
use crate::db::{ConnectionManager, RequestLog};
use crate::error::DatabaseError;

/// Repository over the `api_test` schema.
///
/// Cheap to construct and clone; every instance goes through the same
/// [`ConnectionManager`].
#[derive(Clone)]
pub struct LogStore {
    manager: Arc<ConnectionManager>,
}

impl LogStore {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    /// The manager this store delegates to.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    // ==================== Writes ====================

    /// Append a request and return its id.
    pub async fn log_request(&self, request: &NewRequest) -> Result<i32, DatabaseError> {
        let headers = to_json_column(request.headers.as_ref())?;
        let body = to_json_column(request.body.as_ref())?;

        let row = self
            .manager
            .query_one(
                r#"
                INSERT INTO api_test.api_requests (endpoint, method, headers, body)
                VALUES ($1, $2, $3, $4)
                RETURNING id
                "#,
                &[&request.endpoint, &request.method.as_str(), &headers, &body],
            )
            .await?;

        Ok(row.get("id"))
    }

    /// Append a response for `response.request_id` and return its id.
    ///
    /// A `request_id` with no matching request fails on the foreign key.
    pub async fn log_response(&self, response: &NewResponse) -> Result<i32, DatabaseError> {
        let headers = to_json_column(response.headers.as_ref())?;
        let body = to_json_column(response.body.as_ref())?;

        let row = self
            .manager
            .query_one(
                r#"
                INSERT INTO api_test.api_responses
                    (request_id, status_code, headers, body, response_time_ms)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id
                "#,
                &[
                    &response.request_id,
                    &response.status_code,
                    &headers,
                    &body,
                    &response.response_time_ms,
                ],
            )
            .await?;

        Ok(row.get("id"))
    }

    // ==================== Reads ====================

    /// Every request, newest first.
    pub async fn get_all_requests(&self) -> Result<Vec<RequestRecord>, DatabaseError> {
        let rows = self
            .manager
            .query(
                r#"
                SELECT id, endpoint, method, headers, body, timestamp
                FROM api_test.api_requests
                ORDER BY timestamp DESC, id DESC
                "#,
                &[],
            )
            .await?;

        Ok(rows.iter().map(RequestRecord::from_row).collect())
    }

    /// Every response, newest first.
    pub async fn get_all_responses(&self) -> Result<Vec<ResponseRecord>, DatabaseError> {
        let rows = self
            .manager
            .query(
                r#"
                SELECT id, request_id, status_code, headers, body, response_time_ms, timestamp
                FROM api_test.api_responses
                ORDER BY timestamp DESC, id DESC
                "#,
                &[],
            )
            .await?;

        Ok(rows.iter().map(ResponseRecord::from_row).collect())
    }

    /// One request joined to its response, if the request exists.
    pub async fn get_request_with_response(
        &self,
        id: i32,
    ) -> Result<Option<RequestWithResponse>, DatabaseError> {
        let row = self
            .manager
            .query_opt(
                r#"
                SELECT r.id, r.endpoint, r.method, r.headers, r.body, r.timestamp,
                       s.id AS response_id,
                       s.status_code,
                       s.headers AS response_headers,
                       s.body AS response_body,
                       s.response_time_ms,
                       s.timestamp AS response_timestamp
                FROM api_test.api_requests r
                LEFT JOIN api_test.api_responses s ON s.request_id = r.id
                WHERE r.id = $1
                ORDER BY s.id DESC NULLS LAST
                LIMIT 1
                "#,
                &[&id],
            )
            .await?;

        Ok(row.as_ref().map(RequestWithResponse::from_row))
    }

    /// Requests whose endpoint contains `pattern` (case-sensitive), newest first.
    pub async fn get_requests_by_endpoint(
        &self,
        pattern: &str,
    ) -> Result<Vec<RequestRecord>, DatabaseError> {
        // strpos avoids LIKE wildcards in the pattern
        let rows = self
            .manager
            .query(
                r#"
                SELECT id, endpoint, method, headers, body, timestamp
                FROM api_test.api_requests
                WHERE strpos(endpoint, $1) > 0
                ORDER BY timestamp DESC, id DESC
                "#,
                &[&pattern],
            )
            .await?;

        Ok(rows.iter().map(RequestRecord::from_row).collect())
    }

    /// Requests sent with exactly `method`, newest first.
    pub async fn get_requests_by_method(
        &self,
        method: &str,
    ) -> Result<Vec<RequestRecord>, DatabaseError> {
        let rows = self
            .manager
            .query(
                r#"
                SELECT id, endpoint, method, headers, body, timestamp
                FROM api_test.api_requests
                WHERE method = $1
                ORDER BY timestamp DESC, id DESC
                "#,
                &[&method],
            )
            .await?;

        Ok(rows.iter().map(RequestRecord::from_row).collect())
    }

    /// Responses with status >= 400 alongside their request, newest first.
    pub async fn get_failed_responses(&self) -> Result<Vec<FailedResponse>, DatabaseError> {
        let rows = self
            .manager
            .query(
                r#"
                SELECT s.id, s.request_id, s.status_code, s.headers, s.body,
                       s.response_time_ms, s.timestamp,
                       r.endpoint, r.method
                FROM api_test.api_responses s
                INNER JOIN api_test.api_requests r ON r.id = s.request_id
                WHERE s.status_code >= 400
                ORDER BY s.timestamp DESC, s.id DESC
                "#,
                &[],
            )
            .await?;

        Ok(rows.iter().map(FailedResponse::from_row).collect())
    }
}

#[async_trait]
impl RequestLog for LogStore {
    async fn log_request(&self, request: &NewRequest) -> Result<i32, DatabaseError> {
        LogStore::log_request(self, request).await
    }

    async fn log_response(&self, response: &NewResponse) -> Result<i32, DatabaseError> {
        LogStore::log_response(self, response).await
    }
}
