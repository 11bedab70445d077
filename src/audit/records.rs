//! Request/response records and their JSON column mapping.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_postgres::Row;

use crate::error::DatabaseError;

/// Header name → value, kept sorted so stored JSON is stable.
pub type Headers = BTreeMap<String, String>;

/// Status recorded when the network call itself failed.
pub const TRANSPORT_ERROR_STATUS: i32 = 500;

/// HTTP verbs the client issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            _ => Err(format!("unsupported HTTP method '{}'", s)),
        }
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A request about to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRequest {
    /// Fully resolved URL.
    pub endpoint: String,
    pub method: HttpMethod,
    pub headers: Option<Headers>,
    pub body: Option<Value>,
}

/// The outcome of a request, linked back by `request_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewResponse {
    pub request_id: i32,
    pub status_code: i32,
    pub headers: Option<Headers>,
    pub body: Option<Value>,
    pub response_time_ms: i32,
}

impl NewResponse {
    /// Record for a call that never produced a response.
    pub fn transport_error(request_id: i32, message: &str, elapsed: Duration) -> Self {
        Self {
            request_id,
            status_code: TRANSPORT_ERROR_STATUS,
            headers: None,
            body: Some(serde_json::json!({ "error": message })),
            response_time_ms: duration_ms(elapsed),
        }
    }
}

/// Clamp a duration into the `response_time_ms` column.
pub fn duration_ms(elapsed: Duration) -> i32 {
    i32::try_from(elapsed.as_millis()).unwrap_or(i32::MAX)
}

/// Convert an optional value to an optional JSONB column value.
///
/// `None` maps to SQL `NULL`.
pub fn to_json_column<T>(value: Option<&T>) -> Result<Option<Value>, DatabaseError>
where
    T: Serialize + ?Sized,
{
    value
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| DatabaseError::Serialization(e.to_string()))
}

/// A persisted request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: i32,
    pub endpoint: String,
    pub method: String,
    pub headers: Option<Value>,
    pub body: Option<Value>,
    pub timestamp: Option<NaiveDateTime>,
}

impl RequestRecord {
    pub(crate) fn from_row(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            endpoint: row.get("endpoint"),
            method: row.get("method"),
            headers: row.get("headers"),
            body: row.get("body"),
            timestamp: row.get("timestamp"),
        }
    }
}

/// A persisted response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub id: i32,
    pub request_id: Option<i32>,
    pub status_code: i32,
    pub headers: Option<Value>,
    pub body: Option<Value>,
    pub response_time_ms: Option<i32>,
    pub timestamp: Option<NaiveDateTime>,
}

impl ResponseRecord {
    pub(crate) fn from_row(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            request_id: row.get("request_id"),
            status_code: row.get("status_code"),
            headers: row.get("headers"),
            body: row.get("body"),
            response_time_ms: row.get("response_time_ms"),
            timestamp: row.get("timestamp"),
        }
    }
}

/// A request left-joined to its response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestWithResponse {
    #[serde(flatten)]
    pub request: RequestRecord,
    pub response_id: Option<i32>,
    pub status_code: Option<i32>,
    pub response_headers: Option<Value>,
    pub response_body: Option<Value>,
    pub response_time_ms: Option<i32>,
    pub response_timestamp: Option<NaiveDateTime>,
}

impl RequestWithResponse {
    pub(crate) fn from_row(row: &Row) -> Self {
        Self {
            request: RequestRecord::from_row(row),
            response_id: row.get("response_id"),
            status_code: row.get("status_code"),
            response_headers: row.get("response_headers"),
            response_body: row.get("response_body"),
            response_time_ms: row.get("response_time_ms"),
            response_timestamp: row.get("response_timestamp"),
        }
    }
}

/// A response with status >= 400 and the request it answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedResponse {
    #[serde(flatten)]
    pub response: ResponseRecord,
    pub endpoint: String,
    pub method: String,
}

impl FailedResponse {
    pub(crate) fn from_row(row: &Row) -> Self {
        Self {
            response: ResponseRecord::from_row(row),
            endpoint: row.get("endpoint"),
            method: row.get("method"),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_json_column_none_is_null() {
        let headers: Option<&Headers> = None;
        assert_eq!(to_json_column(headers).unwrap(), None);
    }

    #[test]
    fn test_json_column_headers() {
        let mut headers = Headers::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        headers.insert("x-trace".to_string(), "abc".to_string());

        let value = to_json_column(Some(&headers)).unwrap();
        assert_eq!(
            value,
            Some(json!({ "content-type": "application/json", "x-trace": "abc" }))
        );
    }

    #[test]
    fn test_json_column_keeps_json_null_distinct() {
        let value = to_json_column(Some(&Value::Null)).unwrap();
        assert_eq!(value, Some(Value::Null));
    }

    #[test]
    fn test_transport_error_record() {
        let record = NewResponse::transport_error(7, "connection refused", Duration::from_millis(42));
        assert_eq!(record.request_id, 7);
        assert_eq!(record.status_code, 500);
        assert_eq!(record.body, Some(json!({ "error": "connection refused" })));
        assert_eq!(record.response_time_ms, 42);
        assert_eq!(record.headers, None);
    }

    #[test]
    fn test_duration_clamps() {
        assert_eq!(duration_ms(Duration::from_secs(u64::MAX)), i32::MAX);
    }

    #[test]
    fn test_method_parse_and_display() {
        assert_eq!("patch".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
        assert_eq!(HttpMethod::Delete.to_string(), "DELETE");
        assert!("TRACE".parse::<HttpMethod>().is_err());
        assert_eq!(serde_json::to_value(HttpMethod::Get).unwrap(), json!("GET"));
    }

    #[test]
    fn test_joined_row_serializes_flat() {
        let joined = RequestWithResponse {
            request: RequestRecord {
                id: 1,
                endpoint: "https://api.example/users/1".to_string(),
                method: "GET".to_string(),
                headers: None,
                body: None,
                timestamp: None,
            },
            response_id: Some(3),
            status_code: Some(200),
            response_headers: None,
            response_body: Some(json!({ "id": 1 })),
            response_time_ms: Some(12),
            response_timestamp: None,
        };

        let value = serde_json::to_value(&joined).unwrap();
        assert_eq!(value["id"], json!(1));
        assert_eq!(value["status_code"], json!(200));
        assert_eq!(value["response_body"], json!({ "id": 1 }));
    }
}
