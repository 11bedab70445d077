//! Login against the API under test.

use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::client::{ApiClient, ApiResponse, RequestOptions};
use crate::config::ApiConfig;
use crate::error::ClientError;

/// Username/password pair posted to `/auth/login`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub username: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_mins: Option<u32>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            expires_in_mins: None,
        }
    }
}

/// Authenticated user returned by a successful login.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: u64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Auth endpoints, called through the instrumented client.
pub struct AuthApi<'a> {
    client: &'a ApiClient,
    defaults: &'a ApiConfig,
}

impl<'a> AuthApi<'a> {
    pub fn new(client: &'a ApiClient, defaults: &'a ApiConfig) -> Self {
        Self { client, defaults }
    }

    /// Log in with `credentials`, or the configured user when `None`.
    pub async fn login(&self, credentials: Option<Credentials>) -> Result<AuthUser, ClientError> {
        let credentials = credentials.unwrap_or_else(|| {
            Credentials::new(
                self.defaults.username.clone(),
                self.defaults.password.expose_secret(),
            )
        });

        let response = self
            .client
            .post(
                "/auth/login",
                RequestOptions::new().json(serde_json::to_value(&credentials)?),
            )
            .await?
            .error_for_status()?;

        response.json()
    }

    /// The user behind `access_token`.
    pub async fn current_user(&self, access_token: &str) -> Result<ApiResponse, ClientError> {
        self.client
            .get(
                "/auth/me",
                RequestOptions::new().header("Authorization", format!("Bearer {}", access_token)),
            )
            .await
    }
}
