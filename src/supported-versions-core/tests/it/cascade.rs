//! Cascade ordering, retries and fallbacks against mocked sources.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::json;

use supported_versions_core::{
    BuiltinSource, CascadeOutcome, PolicyCache, PolicySource, ServerRegistry, SupportedVersionsConfig,
    SupportedVersionsEvent,
};

use crate::common::*;

fn kinds(events: &[SupportedVersionsEvent]) -> Vec<&'static str> {
    events
        .iter()
        .map(|e| match e {
            SupportedVersionsEvent::Loading { .. } => "loading",
            SupportedVersionsEvent::VersionUpdated { .. } => "version-updated",
            SupportedVersionsEvent::UniqueIdUpdated { .. } => "unique-id-updated",
            SupportedVersionsEvent::SupportedVersionsUpdated { .. } => "updated",
            SupportedVersionsEvent::SupportedVersionsError { .. } => "error",
        })
        .collect()
}

type Updated = (String, PolicySource, Option<PolicySource>);

fn updated(events: &[SupportedVersionsEvent]) -> Option<Updated> {
    events.iter().find_map(|e| match e {
        SupportedVersionsEvent::SupportedVersionsUpdated {
            supported_versions,
            source,
            cached_origin,
            ..
        } => Some((supported_versions.timestamp.clone(), *source, *cached_origin)),
        _ => None,
    })
}

#[tokio::test(start_paused = true)]
async fn test_verified_server_policy_ends_cascade() {
    let sources = MockSources::failing()
        .with_server_info("7.1.3", Some(sign(&server_document())))
        .with_unique_id(UNIQUE_ID)
        .with_cloud_token(sign(&cloud_document()));
    let h = harness(sources, test_config());

    let outcome = h.engine.update_supported_versions_data(URL).await;

    assert_eq!(outcome, CascadeOutcome::Fresh(PolicySource::Server));
    assert_eq!(h.sources.calls(), vec![Call::ServerInfo(URL.to_string())]);
    assert_eq!(
        kinds(&h.events.events()),
        vec!["loading", "version-updated", "updated"]
    );
    assert_eq!(
        updated(&h.events.events()),
        Some((server_document().timestamp, PolicySource::Server, None))
    );

    assert_eq!(h.registry.get(URL).unwrap().version.as_deref(), Some("7.1.3"));
    let cached = h.engine.cache().get(URL).unwrap();
    assert_eq!(cached.source, PolicySource::Server);
    assert_eq!(cached.document, server_document());
}

#[tokio::test(start_paused = true)]
async fn test_signed_policy_with_sparse_messages_is_trusted() {
    let claims = json!({
        "timestamp": "2026-10-03T00:00:00Z",
        "versions": [{
            "version": "7.1.0",
            "expiration": "2030-01-31T23:59:59Z",
            "messages": [{ "remainingDays": 30, "title": "message_title" }],
        }],
    });
    let key = EncodingKey::from_rsa_pem(TEST_SIGNING_KEY).unwrap();
    let token = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key).unwrap();

    let sources = MockSources::failing().with_server_info("7.1.3", Some(token));
    let h = harness(sources, test_config());

    let outcome = h.engine.update_supported_versions_data(URL).await;

    assert_eq!(outcome, CascadeOutcome::Fresh(PolicySource::Server));
    assert_eq!(h.sources.call_count(), 1);
    let versions = h.engine.cache().get(URL).unwrap().document.versions.unwrap();
    let message = versions[0].messages.as_ref().unwrap()[0].clone();
    assert_eq!(message.title, "message_title");
    assert!(message.subtitle.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_legacy_server_falls_through_to_cloud() {
    let sources = MockSources::failing()
        .with_server_info("6.9.2", None)
        .with_unique_id(UNIQUE_ID)
        .with_cloud_token(sign(&cloud_document()));
    let h = harness(sources, test_config());

    let outcome = h.engine.update_supported_versions_data(URL).await;

    assert_eq!(outcome, CascadeOutcome::Fresh(PolicySource::Cloud));
    assert_eq!(
        h.sources.calls(),
        vec![
            Call::ServerInfo(URL.to_string()),
            Call::UniqueId(URL.to_string()),
            Call::CloudPolicy {
                unique_id: UNIQUE_ID.to_string(),
                domain: "chat.example.com".to_string(),
            },
        ]
    );
    assert_eq!(
        kinds(&h.events.events()),
        vec!["loading", "version-updated", "unique-id-updated", "updated"]
    );

    let server = h.registry.get(URL).unwrap();
    assert_eq!(server.version.as_deref(), Some("6.9.2"));
    assert_eq!(server.unique_id.as_deref(), Some(UNIQUE_ID));
    assert_eq!(h.engine.cache().get(URL).unwrap().source, PolicySource::Cloud);
}

#[tokio::test(start_paused = true)]
async fn test_server_token_from_other_key_is_discarded() {
    let sources = MockSources::failing()
        .with_server_info("7.1.3", Some(sign_with(&server_document(), OTHER_SIGNING_KEY)))
        .with_unique_id(UNIQUE_ID)
        .with_cloud_token(sign(&cloud_document()));
    let h = harness(sources, test_config());

    let outcome = h.engine.update_supported_versions_data(URL).await;

    assert_eq!(outcome, CascadeOutcome::Fresh(PolicySource::Cloud));
    assert_eq!(h.sources.call_count(), 3);
    assert_eq!(
        updated(&h.events.events()),
        Some((cloud_document().timestamp, PolicySource::Cloud, None))
    );
}

#[tokio::test(start_paused = true)]
async fn test_tampered_payload_is_discarded() {
    let token = sign(&server_document());
    let parts: Vec<&str> = token.split('.').collect();
    let mut forged = server_document();
    forged.versions.as_mut().unwrap()[0].expiration = "2099-01-01T00:00:00Z".parse().unwrap();
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
    let tampered = format!("{}.{}.{}", parts[0], payload, parts[2]);

    let sources = MockSources::failing().with_server_info("7.1.3", Some(tampered));
    let h = harness(sources, test_config());

    let outcome = h.engine.update_supported_versions_data(URL).await;

    assert_eq!(outcome, CascadeOutcome::Unavailable);
    assert!(h.engine.cache().get(URL).is_none());
    assert_eq!(
        kinds(&h.events.events()),
        vec!["loading", "version-updated", "error"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_all_network_sources_failing_makes_seven_calls() {
    let sources = MockSources::failing().with_unique_id(UNIQUE_ID);
    let h = harness(sources, test_config());

    let outcome = h.engine.update_supported_versions_data(URL).await;

    assert_eq!(outcome, CascadeOutcome::Unavailable);
    let calls = h.sources.calls();
    assert_eq!(calls.len(), 7);
    assert!(calls[..3].iter().all(|c| matches!(c, Call::ServerInfo(_))));
    assert_eq!(calls[3], Call::UniqueId(URL.to_string()));
    assert!(calls[4..].iter().all(|c| matches!(c, Call::CloudPolicy { .. })));

    // 2000 ms between attempts on the same source, none across sources.
    let times = h.sources.call_times();
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    let retry = Duration::from_millis(2000);
    assert_eq!(
        gaps,
        vec![retry, retry, Duration::ZERO, Duration::ZERO, retry, retry]
    );

    assert_eq!(
        kinds(&h.events.events()),
        vec!["loading", "unique-id-updated", "error"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_unique_id_failure_skips_cloud() {
    let h = harness(MockSources::failing(), test_config());

    let outcome = h.engine.update_supported_versions_data(URL).await;

    assert_eq!(outcome, CascadeOutcome::Unavailable);
    assert_eq!(h.sources.call_count(), 4);
    assert!(!h
        .sources
        .calls()
        .iter()
        .any(|c| matches!(c, Call::CloudPolicy { .. })));
    assert_eq!(kinds(&h.events.events()), vec!["loading", "error"]);
}

#[tokio::test(start_paused = true)]
async fn test_cached_policy_served_with_error() {
    let h = harness(MockSources::failing(), test_config());
    h.engine
        .cache()
        .put(URL, &server_document(), PolicySource::Server);

    let outcome = h.engine.update_supported_versions_data(URL).await;

    assert_eq!(outcome, CascadeOutcome::Fallback(PolicySource::Server));
    assert_eq!(
        kinds(&h.events.events()),
        vec!["loading", "updated", "error"]
    );
    assert_eq!(
        updated(&h.events.events()),
        Some((
            server_document().timestamp,
            PolicySource::Cloud,
            Some(PolicySource::Server)
        ))
    );
}

#[tokio::test(start_paused = true)]
async fn test_builtin_policy_served_with_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("supportedVersions.jwt");
    let bundled = document(
        "2026-09-01T00:00:00Z",
        "7.0.0",
        "2026-12-31T23:59:59Z".parse().unwrap(),
    );
    std::fs::write(&path, sign(&bundled)).unwrap();

    let config = SupportedVersionsConfig {
        builtin: BuiltinSource::File(path),
        ..test_config()
    };
    let h = harness(MockSources::failing(), config);

    let outcome = h.engine.update_supported_versions_data(URL).await;

    assert_eq!(outcome, CascadeOutcome::Fallback(PolicySource::Builtin));
    assert_eq!(
        kinds(&h.events.events()),
        vec!["loading", "updated", "error"]
    );
    assert_eq!(
        updated(&h.events.events()),
        Some((bundled.timestamp.clone(), PolicySource::Builtin, None))
    );
    assert!(h.engine.builtin().is_loaded());

    // The bundled document is now the cached one.
    let cached = h.engine.cache().get(URL).unwrap();
    assert_eq!(cached.source, PolicySource::Builtin);
    assert_eq!(cached.document, bundled);
}

#[tokio::test(start_paused = true)]
async fn test_cache_preferred_over_builtin() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("supportedVersions.jwt");
    std::fs::write(&path, sign(&cloud_document())).unwrap();

    let config = SupportedVersionsConfig {
        builtin: BuiltinSource::File(path),
        ..test_config()
    };
    let h = harness(MockSources::failing(), config);
    h.engine
        .cache()
        .put(URL, &server_document(), PolicySource::Cloud);

    let outcome = h.engine.update_supported_versions_data(URL).await;

    assert_eq!(outcome, CascadeOutcome::Fallback(PolicySource::Cloud));
    assert!(!h.engine.builtin().is_loaded());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_server_makes_no_calls() {
    let h = harness(MockSources::failing(), test_config());

    let outcome = h
        .engine
        .update_supported_versions_data("https://unregistered.example.com")
        .await;

    assert_eq!(outcome, CascadeOutcome::UnknownServer);
    assert_eq!(h.sources.call_count(), 0);
    assert!(h.events.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_persisted_cache_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let cache_file = dir.path().join("supported-versions.json");
    let config = SupportedVersionsConfig {
        cache_file: Some(cache_file.clone()),
        ..test_config()
    };

    let first = harness(
        MockSources::failing().with_server_info("7.1.3", Some(sign(&server_document()))),
        config.clone(),
    );
    assert!(first.engine.update_supported_versions_data(URL).await.is_fresh());

    // A later run with every source down serves what the first one stored.
    let second = harness(MockSources::failing(), config);
    let outcome = second.engine.update_supported_versions_data(URL).await;
    assert_eq!(outcome, CascadeOutcome::Fallback(PolicySource::Server));

    let reopened = PolicyCache::with_file(cache_file);
    assert_eq!(reopened.get(URL).unwrap().document, server_document());
}

#[tokio::test(start_paused = true)]
async fn test_status_uses_cascade_result() {
    let sources = MockSources::failing()
        .with_server_info("7.1.3", Some(sign(&server_document())));
    let h = harness(sources, test_config());
    h.engine.update_supported_versions_data(URL).await;

    let before = h
        .engine
        .support_status_at(URL, "2026-10-19T00:00:00Z".parse().unwrap())
        .await
        .unwrap();
    assert!(before.supported);

    let after = h
        .engine
        .support_status_at(URL, "2030-02-01T00:00:00Z".parse().unwrap())
        .await
        .unwrap();
    assert!(!after.supported);
}
