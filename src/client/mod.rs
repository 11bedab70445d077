//! Instrumented HTTP client.
//!
//! Every call goes through the same sequence:
//!
//! ```text
//! resolve URL ──▶ log request ──▶ send + read body ──▶ log response ──▶ return
//!                     │                   │                  │
//!                (id or none)        (timed)        (or 500 error row when
//!                                                    send fails)
//! ```
//!
//! Audit writes are best-effort. A failed write is reported with
//! `tracing::warn!` and never changes what the caller sees.

mod response;

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, Url};
use serde_json::Value;

pub use response::{ApiResponse, header_map_to_headers, parse_body};

use crate::audit::{Headers, HttpMethod, NewRequest, NewResponse, duration_ms};
use crate::config::Config;
use crate::db::RequestLog;
use crate::error::ClientError;

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// JSON body.
    pub data: Option<Value>,
    /// Extra headers, layered over the client's defaults.
    pub headers: Option<Headers>,
    /// Query parameters appended to the URL of GET calls. Other verbs ignore them.
    pub params: Option<Vec<(String, String)>>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn json(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(Headers::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params
            .get_or_insert_with(Vec::new)
            .push((name.into(), value.into()));
        self
    }
}

/// HTTP client that records each call in the audit trail.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    default_headers: Headers,
    log: Option<Arc<dyn RequestLog>>,
}

impl ApiClient {
    /// Create a client without audit logging.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            default_headers: Headers::new(),
            log: None,
        })
    }

    /// Create a client for the configured API, without audit logging.
    pub fn from_config(config: &Config) -> Result<Self, ClientError> {
        Ok(Self::new(config.api.base_url.clone(), config.test.timeout)?
            .with_header("Accept", "application/json"))
    }

    /// Record every call through `log`.
    pub fn with_log(mut self, log: Arc<dyn RequestLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Add a header sent on every call.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    pub fn logging_enabled(&self) -> bool {
        self.log.is_some()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, ClientError> {
        self.request(HttpMethod::Get, endpoint, options).await
    }

    pub async fn post(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, ClientError> {
        self.request(HttpMethod::Post, endpoint, options).await
    }

    pub async fn put(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, ClientError> {
        self.request(HttpMethod::Put, endpoint, options).await
    }

    pub async fn patch(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, ClientError> {
        self.request(HttpMethod::Patch, endpoint, options).await
    }

    pub async fn delete(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, ClientError> {
        self.request(HttpMethod::Delete, endpoint, options).await
    }

    /// Send one request, recording it and its outcome.
    pub async fn request(
        &self,
        method: HttpMethod,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, ClientError> {
        let params = match method {
            HttpMethod::Get => options.params.as_deref(),
            _ => {
                if options.params.is_some() {
                    tracing::debug!("Ignoring query parameters on {} {}", method, endpoint);
                }
                None
            }
        };
        let url = self.resolve_url(endpoint, params)?;

        let mut headers = self.default_headers.clone();
        if let Some(extra) = options.headers {
            headers.extend(extra);
        }

        let request_id = self
            .record_request(&NewRequest {
                endpoint: url.to_string(),
                method,
                headers: (!headers.is_empty()).then(|| headers.clone()),
                body: options.data.clone(),
            })
            .await;

        let mut builder = self.http.request(method.into(), url.clone());
        for (name, value) in &headers {
            builder = builder.header(name, value);
        }
        if let Some(data) = &options.data {
            builder = builder.json(data);
        }

        tracing::debug!("{} {}", method, url);
        let start = Instant::now();
        let result = match builder.send().await {
            Ok(response) => Ok(ApiResponse::read(response).await),
            Err(e) => Err(e),
        };
        let elapsed = start.elapsed();

        match result {
            Ok(response) => {
                tracing::debug!(
                    "{} {} -> {} in {}ms",
                    method,
                    url,
                    response.status().as_u16(),
                    elapsed.as_millis()
                );
                if let Some(id) = request_id {
                    self.record_response(&NewResponse {
                        request_id: id,
                        status_code: i32::from(response.status().as_u16()),
                        headers: Some(response.audit_headers()),
                        body: response.audit_body(),
                        response_time_ms: duration_ms(elapsed),
                    })
                    .await;
                }
                Ok(response)
            }
            Err(e) => {
                tracing::debug!("{} {} failed after {}ms: {}", method, url, elapsed.as_millis(), e);
                if let Some(id) = request_id {
                    self.record_response(&NewResponse::transport_error(id, &e.to_string(), elapsed))
                        .await;
                }
                Err(ClientError::Transport(e))
            }
        }
    }

    /// Prefix `endpoint` with the base URL unless it is already absolute, then append `params`.
    pub fn resolve_url(
        &self,
        endpoint: &str,
        params: Option<&[(String, String)]>,
    ) -> Result<Url, ClientError> {
        let raw = if is_absolute(endpoint) {
            endpoint.to_string()
        } else {
            format!(
                "{}/{}",
                self.base_url.trim_end_matches('/'),
                endpoint.trim_start_matches('/')
            )
        };

        let mut url = Url::parse(&raw).map_err(|e| ClientError::InvalidUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })?;

        if let Some(params) = params
            && !params.is_empty()
        {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in params {
                pairs.append_pair(name, value);
            }
        }

        Ok(url)
    }

    async fn record_request(&self, request: &NewRequest) -> Option<i32> {
        let log = self.log.as_ref()?;
        match log.log_request(request).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(
                    "Failed to log {} {}, continuing unlogged: {}",
                    request.method,
                    request.endpoint,
                    e
                );
                None
            }
        }
    }

    async fn record_response(&self, response: &NewResponse) {
        let Some(log) = self.log.as_ref() else {
            return;
        };
        if let Err(e) = log.log_response(response).await {
            tracing::warn!(
                "Failed to log response for request {}: {}",
                response.request_id,
                e
            );
        }
    }
}

fn is_absolute(endpoint: &str) -> bool {
    let lower = endpoint.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}
