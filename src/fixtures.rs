//! Test data for user CRUD scenarios.

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::Serialize;
use serde_json::Value;

use crate::client::{ApiClient, ApiResponse, RequestOptions};
use crate::error::ClientError;

/// Payload for `POST /users/add`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// A required field was never set on a [`UserBuilder`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("missing required field: {0}")]
pub struct MissingField(pub &'static str);

#[derive(Debug, Clone, Default)]
pub struct UserBuilder {
    first_name: Option<String>,
    last_name: Option<String>,
    email: Option<String>,
    age: Option<u32>,
    username: Option<String>,
    password: Option<String>,
}

impl UserBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn first_name(mut self, value: impl Into<String>) -> Self {
        self.first_name = Some(value.into());
        self
    }

    pub fn last_name(mut self, value: impl Into<String>) -> Self {
        self.last_name = Some(value.into());
        self
    }

    pub fn email(mut self, value: impl Into<String>) -> Self {
        self.email = Some(value.into());
        self
    }

    pub fn age(mut self, value: u32) -> Self {
        self.age = Some(value);
        self
    }

    pub fn username(mut self, value: impl Into<String>) -> Self {
        self.username = Some(value.into());
        self
    }

    pub fn password(mut self, value: impl Into<String>) -> Self {
        self.password = Some(value.into());
        self
    }

    /// Fails on the first required field (first name, last name, email) left unset.
    pub fn build(self) -> Result<NewUser, MissingField> {
        Ok(NewUser {
            first_name: self.first_name.ok_or(MissingField("firstName"))?,
            last_name: self.last_name.ok_or(MissingField("lastName"))?,
            email: self.email.ok_or(MissingField("email"))?,
            age: self.age,
            username: self.username,
            password: self.password,
        })
    }
}

/// Randomized users that do not collide across parallel workers.
pub struct UserFactory;

impl UserFactory {
    pub fn unique() -> NewUser {
        let mut rng = rand::thread_rng();
        let suffix: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect::<String>()
            .to_lowercase();

        NewUser {
            first_name: "Test".to_string(),
            last_name: format!("User{}", suffix),
            email: format!("test.{}@example.com", suffix),
            age: Some(rng.gen_range(18..=80)),
            username: Some(format!("test_{}", suffix)),
            password: Some(format!("pw-{}", suffix)),
        }
    }
}

/// User CRUD endpoints, called through the instrumented client.
pub struct UsersApi<'a> {
    client: &'a ApiClient,
}

impl<'a> UsersApi<'a> {
    pub fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }

    pub async fn list(&self, limit: u32, skip: u32) -> Result<ApiResponse, ClientError> {
        self.client
            .get(
                "/users",
                RequestOptions::new()
                    .param("limit", limit.to_string())
                    .param("skip", skip.to_string()),
            )
            .await
    }

    pub async fn get(&self, id: u64) -> Result<ApiResponse, ClientError> {
        self.client
            .get(&format!("/users/{}", id), RequestOptions::new())
            .await
    }

    pub async fn add(&self, user: &NewUser) -> Result<ApiResponse, ClientError> {
        self.client
            .post("/users/add", RequestOptions::new().json(serde_json::to_value(user)?))
            .await
    }

    pub async fn update(&self, id: u64, changes: Value) -> Result<ApiResponse, ClientError> {
        self.client
            .put(&format!("/users/{}", id), RequestOptions::new().json(changes))
            .await
    }

    pub async fn delete(&self, id: u64) -> Result<ApiResponse, ClientError> {
        self.client
            .delete(&format!("/users/{}", id), RequestOptions::new())
            .await
    }
}
