//! Log store and full pipeline against a real Postgres.
//!
//! Each test provisions its own ephemeral container through the connection
//! manager. To run:
//! ```
//! # Requires Docker to be running
//! cargo test --test store_postgres -- --ignored
//! ```

use std::collections::BTreeMap;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use api_audit::audit::{Headers, TRANSPORT_ERROR_STATUS};
use api_audit::config::{ApiConfig, Config, DatabaseConfig};
use api_audit::db::schema::{self, REQUESTS_TABLE, SCHEMA_NAME};
use api_audit::{
    ApiClient, ConnectionManager, DatabaseError, Harness, HttpMethod, LogStore, NewRequest,
    NewResponse, RequestLog, RequestOptions,
};
use async_trait::async_trait;
use httpmock::prelude::*;
use pretty_assertions::assert_eq;
use serde_json::json;

async fn ephemeral_store() -> LogStore {
    let manager = Arc::new(ConnectionManager::new(DatabaseConfig::default(), false));
    manager
        .initialize(true)
        .await
        .expect("Failed to start ephemeral Postgres");
    LogStore::new(manager)
}

fn harness_config(base_url: String) -> Config {
    Config {
        database: DatabaseConfig {
            use_ephemeral: true,
            ..DatabaseConfig::default()
        },
        api: ApiConfig {
            base_url,
            ..ApiConfig::default()
        },
        ..Config::default()
    }
}

async fn users_server() -> MockServer {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/users/1");
            then.status(200).json_body(json!({ "id": 1 }));
        })
        .await;
    server
}

fn request(endpoint: &str, method: HttpMethod) -> NewRequest {
    NewRequest {
        endpoint: endpoint.to_string(),
        method,
        headers: None,
        body: None,
    }
}

fn response(request_id: i32, status_code: i32, body: serde_json::Value) -> NewResponse {
    NewResponse {
        request_id,
        status_code,
        headers: None,
        body: Some(body),
        response_time_ms: 12,
    }
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_provisioning_is_idempotent() {
    let store = ephemeral_store().await;
    let manager = store.manager();

    // Second initialize is a no-op on the same manager.
    manager.initialize(true).await.unwrap();

    let conn = manager.conn().await.unwrap();
    schema::initialize_database(&conn).await.unwrap();
    schema::initialize_database(&conn).await.unwrap();
    schema::ensure_schema(&conn, SCHEMA_NAME).await.unwrap();
    schema::ensure_table(&conn, SCHEMA_NAME, REQUESTS_TABLE, "SELECT 1/0")
        .await
        .unwrap();

    let row = conn
        .query_one(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = $1",
            &[&SCHEMA_NAME],
        )
        .await
        .unwrap();
    let tables: i64 = row.get(0);
    assert_eq!(tables, 2);

    drop(conn);
    manager.close().await;
    assert!(!manager.is_initialized().await);
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_requests_newest_first_and_joined_response() {
    let store = ephemeral_store().await;

    let first = store
        .log_request(&request("https://dummyjson.com/users/1", HttpMethod::Get))
        .await
        .unwrap();
    store
        .log_response(&response(first, 200, json!({ "id": 1, "firstName": "Emily" })))
        .await
        .unwrap();

    let second = store
        .log_request(&NewRequest {
            body: Some(json!({ "firstName": "Ada" })),
            ..request("https://dummyjson.com/users/add", HttpMethod::Post)
        })
        .await
        .unwrap();
    store
        .log_response(&response(second, 201, json!({ "id": 209 })))
        .await
        .unwrap();

    let all = store.get_all_requests().await.unwrap();
    let ids: Vec<i32> = all.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![second, first]);
    assert!(all.iter().all(|r| r.timestamp.is_some()));

    let joined = store.get_request_with_response(first).await.unwrap().unwrap();
    assert_eq!(joined.request.method, "GET");
    assert_eq!(joined.status_code, Some(200));
    assert_eq!(joined.response_body, Some(json!({ "id": 1, "firstName": "Emily" })));

    assert_eq!(store.get_all_responses().await.unwrap().len(), 2);
    assert!(store.get_request_with_response(9999).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_request_without_response_joins_to_nulls() {
    let store = ephemeral_store().await;

    let id = store
        .log_request(&request("https://dummyjson.com/users/5", HttpMethod::Get))
        .await
        .unwrap();

    let joined = store.get_request_with_response(id).await.unwrap().unwrap();
    assert_eq!(joined.request.id, id);
    assert_eq!(joined.response_id, None);
    assert_eq!(joined.status_code, None);
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_failed_responses_only_include_errors() {
    let store = ephemeral_store().await;

    for (path, status) in [("/users/1", 200), ("/users/0", 404), ("/users/add", 201), ("/auth/login", 400), ("/users/9", 500)] {
        let id = store
            .log_request(&request(&format!("https://dummyjson.com{}", path), HttpMethod::Get))
            .await
            .unwrap();
        store
            .log_response(&response(id, status, json!({ "path": path })))
            .await
            .unwrap();
    }

    let failed = store.get_failed_responses().await.unwrap();
    let mut statuses: Vec<i32> = failed.iter().map(|f| f.response.status_code).collect();
    statuses.sort();
    assert_eq!(statuses, vec![400, 404, 500]);
    assert!(failed.iter().all(|f| f.response.status_code >= 400));
    assert!(failed.iter().any(|f| f.endpoint.ends_with("/auth/login")));
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_endpoint_filter_is_case_sensitive_substring() {
    let store = ephemeral_store().await;

    let users = store
        .log_request(&request("https://dummyjson.com/users/1", HttpMethod::Get))
        .await
        .unwrap();
    store
        .log_request(&request("https://dummyjson.com/Users/2", HttpMethod::Get))
        .await
        .unwrap();
    store
        .log_request(&request("https://dummyjson.com/products/1", HttpMethod::Delete))
        .await
        .unwrap();
    // LIKE wildcards in the pattern are matched literally
    let wildcard = store
        .log_request(&request("https://dummyjson.com/search?q=100%_off", HttpMethod::Get))
        .await
        .unwrap();

    let matched: Vec<i32> = store
        .get_requests_by_endpoint("users")
        .await
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(matched, vec![users]);

    let matched: Vec<i32> = store
        .get_requests_by_endpoint("%_")
        .await
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(matched, vec![wildcard]);

    let deletes = store.get_requests_by_method("DELETE").await.unwrap();
    assert_eq!(deletes.len(), 1);
    assert!(deletes[0].endpoint.contains("products"));
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_json_columns_round_trip() {
    let store = ephemeral_store().await;

    let headers: Headers = BTreeMap::from([
        ("authorization".to_string(), "Bearer abc".to_string()),
        ("content-type".to_string(), "application/json".to_string()),
    ]);
    let body = json!({
        "firstName": "Ada",
        "tags": ["a", "b"],
        "address": { "city": "London", "zip": null },
        "age": 36,
        "ratio": 0.5
    });

    store
        .log_request(&NewRequest {
            endpoint: "https://dummyjson.com/users/add".to_string(),
            method: HttpMethod::Post,
            headers: Some(headers.clone()),
            body: Some(body.clone()),
        })
        .await
        .unwrap();

    let stored = &store.get_all_requests().await.unwrap()[0];
    assert_eq!(stored.body, Some(body));
    assert_eq!(stored.headers, Some(serde_json::to_value(&headers).unwrap()));
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_dangling_response_fails_on_foreign_key() {
    let store = ephemeral_store().await;

    let result = store.log_response(&response(424242, 200, json!({}))).await;
    assert!(matches!(result, Err(DatabaseError::Query(_))), "got {:?}", result);
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_pipeline_persists_correlated_rows() {
    let store = ephemeral_store().await;

    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/users/1");
            then.status(200).json_body(json!({ "id": 1 }));
        })
        .await;

    let client = ApiClient::new(server.base_url(), Duration::from_secs(5))
        .unwrap()
        .with_log(Arc::new(store.clone()));
    let response = client.get("/users/1", RequestOptions::new()).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let requests = store.get_all_requests().await.unwrap();
    let responses = store.get_all_responses().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].request_id, Some(requests[0].id));
    assert_eq!(responses[0].body, Some(json!({ "id": 1 })));
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_pipeline_records_transport_failure() {
    let store = ephemeral_store().await;

    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let client = ApiClient::new(format!("http://127.0.0.1:{}", port), Duration::from_secs(5))
        .unwrap()
        .with_log(Arc::new(store.clone()));

    let result = client.delete("/users/1", RequestOptions::new()).await;
    assert!(result.is_err());

    let request = &store.get_requests_by_method("DELETE").await.unwrap()[0];
    let joined = store.get_request_with_response(request.id).await.unwrap().unwrap();
    assert_eq!(joined.status_code, Some(TRANSPORT_ERROR_STATUS));
    assert!(joined.response_body.unwrap()["error"].is_string());
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_pipeline_survives_closed_store() {
    let store = ephemeral_store().await;

    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/users/1");
            then.status(200).json_body(json!({ "id": 1 }));
        })
        .await;

    let client = ApiClient::new(server.base_url(), Duration::from_secs(5))
        .unwrap()
        .with_log(Arc::new(store.clone()));

    store.manager().close().await;

    let response = client.get("/users/1", RequestOptions::new()).await.unwrap();
    assert_eq!(response.json::<serde_json::Value>().unwrap(), json!({ "id": 1 }));
}

/// Writes the request row, then shuts the store down before the response arrives.
struct CloseAfterRequest {
    store: LogStore,
}

#[async_trait]
impl RequestLog for CloseAfterRequest {
    async fn log_request(&self, request: &NewRequest) -> Result<i32, DatabaseError> {
        let id = self.store.log_request(request).await?;
        self.store.manager().close().await;
        Ok(id)
    }

    async fn log_response(&self, response: &NewResponse) -> Result<i32, DatabaseError> {
        self.store.log_response(response).await
    }
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_pipeline_survives_store_loss_after_request_id() {
    let store = ephemeral_store().await;
    let server = users_server().await;

    let log = Arc::new(CloseAfterRequest {
        store: store.clone(),
    });
    let client = ApiClient::new(server.base_url(), Duration::from_secs(5))
        .unwrap()
        .with_log(log);

    let response = client.get("/users/1", RequestOptions::new()).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.json::<serde_json::Value>().unwrap(), json!({ "id": 1 }));
    assert!(!store.manager().is_initialized().await);
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_harness_shutdown_keeps_pool_for_remaining_harnesses() {
    let server = users_server().await;
    let config = harness_config(server.base_url());
    let manager = Arc::new(ConnectionManager::from_config(&config));

    let first = Harness::with_manager(config.clone(), Arc::clone(&manager))
        .await
        .unwrap();
    let second = Harness::with_manager(config, Arc::clone(&manager))
        .await
        .unwrap();
    assert!(first.logging_enabled());
    assert!(second.logging_enabled());
    assert_eq!(manager.lease_count(), 2);

    first.shutdown().await;
    assert!(manager.is_initialized().await);

    second.client().get("/users/1", RequestOptions::new()).await.unwrap();
    let store = second.store().unwrap();
    let responses = store.get_all_responses().await.unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status_code, 200);

    second.shutdown().await;
    assert!(!manager.is_initialized().await);
}

#[tokio::test]
#[ignore = "Requires Docker"]
async fn test_harnesses_share_process_wide_manager() {
    let server = users_server().await;
    let config = harness_config(server.base_url());

    let first = Harness::start(config.clone()).await.unwrap();
    let second = Harness::start(config).await.unwrap();
    let manager = Arc::clone(first.store().unwrap().manager());
    assert!(Arc::ptr_eq(&manager, second.store().unwrap().manager()));

    first.client().get("/users/1", RequestOptions::new()).await.unwrap();
    second.client().get("/users/1", RequestOptions::new()).await.unwrap();

    let requests = second.store().unwrap().get_all_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.endpoint == server.url("/users/1")));

    first.shutdown().await;
    assert!(manager.is_initialized().await);
    second.shutdown().await;
    assert!(!manager.is_initialized().await);
}
