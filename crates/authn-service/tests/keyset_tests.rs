//! Key set cache integration tests.
//!
//! Exercises fetching, throttling and single-flight refresh against a mocked
//! JWKS endpoint.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use authn_service::auth::keyset_config::RefreshOutcome;
use authn_service::auth::{KeySetConfig, KeySetPolicy, TokenOrigin};
use authn_service::errors::AuthError;
use authn_test_utils::{origin_settings, JwksMock, TestKeypair};
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const ISSUER: &str = "https://sso.test/realms/main";

fn key_set(jwks: &JwksMock, policy: KeySetPolicy) -> KeySetConfig {
    KeySetConfig::new(
        origin_settings(ISSUER, &jwks.url(), TokenOrigin::Keycloak),
        policy,
    )
}

fn fast_policy(throttle: Duration) -> KeySetPolicy {
    KeySetPolicy {
        refresh_throttle: throttle,
        retry_delay: Duration::from_millis(20),
        ..KeySetPolicy::default()
    }
}

#[tokio::test]
async fn test_refresh_populates_keys() {
    let keypair = TestKeypair::new(1, "key-1");
    let jwks = JwksMock::start(vec![keypair.jwk_json()]).await;
    let config = key_set(&jwks, KeySetPolicy::default());

    assert!(config.current().await.is_none());

    let outcome = config.refresh().await.unwrap();
    assert_eq!(outcome, RefreshOutcome::Refreshed { key_count: 1 });
    assert!(config.get_key_by_id("key-1").await.is_some());
    assert!(!config.update_in_progress());
}

#[tokio::test]
async fn test_refresh_within_throttle_window_does_not_fetch() {
    let keypair = TestKeypair::new(1, "key-1");
    let jwks = JwksMock::empty().await;
    jwks.serve_expecting(vec![keypair.jwk_json()], 1).await;
    let config = key_set(&jwks, KeySetPolicy::default());

    assert!(matches!(
        config.refresh().await,
        Ok(RefreshOutcome::Refreshed { .. })
    ));
    assert_eq!(config.refresh().await.unwrap(), RefreshOutcome::Throttled);
    assert_eq!(config.refresh().await.unwrap(), RefreshOutcome::Throttled);

    jwks.verify().await;
}

#[tokio::test]
async fn test_zero_throttle_always_fetches() {
    let keypair = TestKeypair::new(1, "key-1");
    let jwks = JwksMock::empty().await;
    jwks.serve_expecting(vec![keypair.jwk_json()], 2).await;
    let config = key_set(&jwks, fast_policy(Duration::ZERO));

    config.refresh().await.unwrap();
    config.refresh().await.unwrap();

    jwks.verify().await;
}

#[tokio::test]
async fn test_concurrent_refreshes_fetch_once() {
    let keypair = TestKeypair::new(1, "key-1");
    let jwks = JwksMock::empty().await;
    jwks.serve_slowly_expecting(vec![keypair.jwk_json()], Duration::from_millis(200), 1)
        .await;
    let config = Arc::new(key_set(&jwks, KeySetPolicy::default()));

    let results = join_all((0..10).map(|_| {
        let config = Arc::clone(&config);
        async move { config.refresh().await }
    }))
    .await;

    let refreshed = results
        .iter()
        .filter(|r| matches!(r, Ok(RefreshOutcome::Refreshed { .. })))
        .count();
    let in_progress = results
        .iter()
        .filter(|r| matches!(r, Err(AuthError::KeySetUpdateInProgress)))
        .count();
    assert_eq!(refreshed, 1);
    assert_eq!(in_progress, 9);

    jwks.verify().await;
}

#[tokio::test]
async fn test_concurrent_refresh_with_retry_waits_for_single_fetch() {
    let keypair = TestKeypair::new(1, "key-1");
    let jwks = JwksMock::empty().await;
    jwks.serve_slowly_expecting(vec![keypair.jwk_json()], Duration::from_millis(100), 1)
        .await;
    let config = Arc::new(key_set(&jwks, fast_policy(Duration::from_secs(10))));

    let results = join_all((0..8).map(|_| {
        let config = Arc::clone(&config);
        async move { config.refresh_with_retry().await }
    }))
    .await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(config.key_count().await, 1);

    jwks.verify().await;
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_key_set() {
    let keypair = TestKeypair::new(1, "key-1");
    let jwks = JwksMock::start(vec![keypair.jwk_json()]).await;
    let config = key_set(&jwks, fast_policy(Duration::ZERO));
    config.refresh().await.unwrap();

    jwks.fail_with(503).await;
    assert!(matches!(
        config.refresh().await,
        Err(AuthError::KeySetFetch(_))
    ));
    assert!(config.get_key_by_id("key-1").await.is_some());

    // The retry sequence falls back to the cached set
    assert!(config.refresh_with_retry().await.is_ok());
    assert!(!config.update_in_progress());
}

#[tokio::test]
async fn test_refresh_with_retry_without_cache_surfaces_error() {
    let jwks = JwksMock::empty().await;
    jwks.fail_with(500).await;
    let config = key_set(&jwks, fast_policy(Duration::ZERO));

    assert!(matches!(
        config.refresh_with_retry().await,
        Err(AuthError::KeySetFetch(_))
    ));
}

#[tokio::test]
async fn test_empty_key_set_rejected() {
    let jwks = JwksMock::start(vec![]).await;
    let config = key_set(&jwks, KeySetPolicy::default());

    let result = config.refresh().await;
    assert!(
        matches!(result, Err(AuthError::KeySetEmptyOrInvalid { ref issuer, .. }) if issuer == ISSUER)
    );
    assert!(config.current().await.is_none());
}

#[tokio::test]
async fn test_invalid_entries_skipped() {
    let keypair = TestKeypair::new(1, "key-1");
    let jwks = JwksMock::start(vec![
        json!({"kty": "RSA", "kid": "broken"}),
        json!({"kty": "unknown", "kid": "odd"}),
        keypair.jwk_json(),
    ])
    .await;
    let config = key_set(&jwks, KeySetPolicy::default());

    assert_eq!(
        config.refresh().await.unwrap(),
        RefreshOutcome::Refreshed { key_count: 1 }
    );
    assert!(config.get_key_by_id("broken").await.is_none());
    assert_eq!(config.current().await.unwrap().skipped(), 2);
}

#[tokio::test]
async fn test_non_jwks_body_rejected() {
    let jwks = JwksMock::empty().await;
    jwks.serve_body(json!({"issuer": ISSUER})).await;
    let config = key_set(&jwks, KeySetPolicy::default());

    assert!(matches!(
        config.refresh().await,
        Err(AuthError::KeySetEmptyOrInvalid { .. })
    ));
}
