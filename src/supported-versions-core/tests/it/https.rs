//! HTTPS sources against a local mock server.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use supported_versions_core::{
    CascadeOutcome, HttpsClient, InMemoryServerRegistry, PolicySource, PolicySources,
    RecordingEventSink, ServerRef, SupportedVersionsEngine, SupportedVersionsError,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::*;

fn client(cloud: &MockServer) -> HttpsClient {
    HttpsClient::new(&cloud.uri(), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_server_info_with_signed_policy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "version": "7.1.3",
            "success": true,
            "supportedVersions": { "signed": "header.payload.signature" },
        })))
        .expect(1)
        .mount(&server)
        .await;

    let info = client(&server).fetch_server_info(&server.uri()).await.unwrap();
    assert_eq!(info.version, "7.1.3");
    assert_eq!(info.supported_versions.unwrap().signed, "header.payload.signature");
}

#[tokio::test]
async fn test_server_info_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "version": "7.1.3",
            "success": false,
        })))
        .mount(&server)
        .await;

    let result = client(&server).fetch_server_info(&server.uri()).await;
    assert!(matches!(result, Err(SupportedVersionsError::Network { .. })));

    let broken = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/info"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&broken)
        .await;

    let result = client(&broken).fetch_server_info(&broken.uri()).await;
    assert!(result.unwrap_err().is_retryable());
}

#[tokio::test]
async fn test_unique_id_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/settings.public"))
        .and(query_param("query", r#"{"_id":{"$in":["uniqueID"]}}"#))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "settings": [{ "_id": "uniqueID", "value": UNIQUE_ID }],
            "success": true,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let unique_id = client(&server).fetch_unique_id(&server.uri()).await.unwrap();
    assert_eq!(unique_id, UNIQUE_ID);
}

#[tokio::test]
async fn test_unique_id_missing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/settings.public"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "settings": [{ "_id": "uniqueID", "value": "" }],
        })))
        .mount(&server)
        .await;

    let result = client(&server).fetch_unique_id(&server.uri()).await;
    assert!(matches!(result, Err(SupportedVersionsError::DataMissing { .. })));
}

#[tokio::test]
async fn test_cloud_policy_query() {
    let cloud = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/server/supportedVersions"))
        .and(query_param("uniqueId", UNIQUE_ID))
        .and(query_param("domain", "chat.example.com"))
        .and(query_param("source", "desktop"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "signed": "a.b.c" })))
        .expect(1)
        .mount(&cloud)
        .await;

    let policy = client(&cloud)
        .fetch_cloud_policy(UNIQUE_ID, "chat.example.com")
        .await
        .unwrap();
    assert_eq!(policy.signed, "a.b.c");
}

#[tokio::test]
async fn test_engine_over_http_reaches_cloud() {
    let workspace = MockServer::start().await;
    let cloud = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "version": "7.2.1" })))
        .expect(1)
        .mount(&workspace)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/settings.public"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "settings": [{ "_id": "uniqueID", "value": UNIQUE_ID }],
        })))
        .expect(1)
        .mount(&workspace)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/server/supportedVersions"))
        .and(query_param("domain", "127.0.0.1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "signed": sign(&cloud_document()) })),
        )
        .expect(1)
        .mount(&cloud)
        .await;

    let url = workspace.uri();
    let registry = Arc::new(InMemoryServerRegistry::new());
    registry.insert(ServerRef::new(url.as_str()));
    let events = Arc::new(RecordingEventSink::new());
    let engine = SupportedVersionsEngine::with_sources(
        test_config(),
        registry,
        Arc::new(client(&cloud)),
        test_verifier(),
        events.clone(),
    );

    let outcome = engine.update_supported_versions_data(&url).await;
    assert_eq!(outcome, CascadeOutcome::Fresh(PolicySource::Cloud));
    assert_eq!(events.events().len(), 4);

    let verdict = engine.support_status(&url).await.unwrap();
    assert!(verdict.supported);
}
