//! Key resolution integration tests.
//!
//! Tokens are signed with deterministic Ed25519 keys and verified through
//! `KeySetConfig::validate_token` against a mocked JWKS endpoint.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use authn_service::auth::{KeySetConfig, KeySetPolicy, TokenOrigin};
use authn_service::errors::AuthError;
use authn_test_utils::{base_claims, origin_settings, JwksMock, P521Keypair, TestKeypair};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::time::Duration;

const ISSUER: &str = "https://sso.test/realms/main";

fn key_set(jwks: &JwksMock, throttle: Duration) -> KeySetConfig {
    KeySetConfig::new(
        origin_settings(ISSUER, &jwks.url(), TokenOrigin::Keycloak),
        KeySetPolicy {
            refresh_throttle: throttle,
            max_attempts: 2,
            retry_delay: Duration::from_millis(20),
            ..KeySetPolicy::default()
        },
    )
}

/// Token with an arbitrary header and an unsigned body.
fn token_with_header(header: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(header.to_string());
    let body = URL_SAFE_NO_PAD.encode(Value::Object(base_claims(ISSUER, "user-1")).to_string());
    format!("{header}.{body}.c2lnbmF0dXJl")
}

#[tokio::test]
async fn test_token_with_kid_verifies() {
    let keypair = TestKeypair::new(1, "key-1");
    let jwks = JwksMock::start(vec![keypair.jwk_json()]).await;
    let config = key_set(&jwks, Duration::from_secs(10));

    let token = keypair.sign(&base_claims(ISSUER, "user-1"));
    let claims: Map<String, Value> = config.validate_token(&token).await.unwrap();
    assert_eq!(claims["sub"], "user-1");
}

#[tokio::test]
async fn test_unknown_kid_refreshes_once_then_not_found() {
    let cached = TestKeypair::new(1, "key-1");
    let unknown = TestKeypair::new(2, "key-2");
    let jwks = JwksMock::empty().await;
    jwks.serve_expecting(vec![cached.jwk_json()], 1).await;
    let config = key_set(&jwks, Duration::from_secs(10));

    // First miss loads the set; the second is inside the throttle window
    for _ in 0..2 {
        let token = unknown.sign(&base_claims(ISSUER, "user-1"));
        let result = config.validate_token::<Value>(&token).await;
        assert!(matches!(result, Err(AuthError::KeyNotFound(msg)) if msg.contains("key-2")));
    }

    jwks.verify().await;
}

#[tokio::test]
async fn test_key_rotation_picked_up_on_kid_miss() {
    let old_key = TestKeypair::new(1, "key-1");
    let new_key = TestKeypair::new(2, "key-2");
    let jwks = JwksMock::start(vec![old_key.jwk_json()]).await;
    let config = key_set(&jwks, Duration::ZERO);

    let token = old_key.sign(&base_claims(ISSUER, "user-1"));
    config.validate_token::<Value>(&token).await.unwrap();

    jwks.serve(vec![old_key.jwk_json(), new_key.jwk_json()]).await;
    let token = new_key.sign(&base_claims(ISSUER, "user-1"));
    config.validate_token::<Value>(&token).await.unwrap();
    assert_eq!(config.key_count().await, 2);
}

#[tokio::test]
async fn test_token_without_kid_tries_matching_keys() {
    let other = TestKeypair::new(3, "other");
    let signer = TestKeypair::new(4, "signer");
    let jwks = JwksMock::start(vec![other.bare_jwk_json(), signer.bare_jwk_json()]).await;
    let config = key_set(&jwks, Duration::from_secs(10));

    let token = signer.sign_without_kid(&base_claims(ISSUER, "user-1"));
    let claims: Value = config.validate_token(&token).await.unwrap();
    assert_eq!(claims["iss"], ISSUER);
}

#[tokio::test]
async fn test_token_without_kid_and_no_matching_key_is_rejected() {
    let published = TestKeypair::new(1, "key-1");
    let signer = TestKeypair::new(2, "key-2");
    let jwks = JwksMock::start(vec![published.jwk_json()]).await;
    let config = key_set(&jwks, Duration::from_secs(10));

    let token = signer.sign_without_kid(&base_claims(ISSUER, "user-1"));
    assert!(matches!(
        config.validate_token::<Value>(&token).await,
        Err(AuthError::TokenInvalidSignature(_))
    ));
}

#[tokio::test]
async fn test_unsupported_algorithms_rejected_before_lookup() {
    let jwks = JwksMock::empty().await;
    jwks.serve_expecting(vec![], 0).await;
    let config = key_set(&jwks, Duration::from_secs(10));

    let result = config
        .validate_token::<Value>(&token_with_header(json!({"alg": "none", "typ": "JWT"})))
        .await;
    assert!(matches!(result, Err(AuthError::UnsupportedAlgorithm(alg)) if alg == "none"));

    let long_alg = "X".repeat(100);
    let result = config
        .validate_token::<Value>(&token_with_header(json!({"alg": long_alg})))
        .await;
    assert!(matches!(result, Err(AuthError::UnsupportedAlgorithm(alg)) if alg.len() == 32));

    let result = config
        .validate_token::<Value>(&token_with_header(json!({"alg": "ES256K", "kid": "k"})))
        .await;
    assert!(matches!(result, Err(AuthError::UnsupportedAlgorithm(alg)) if alg == "ES256K"));

    jwks.verify().await;
}

#[tokio::test]
async fn test_es512_token_verifies_with_p521_key() {
    let keypair = P521Keypair::new(1, "p521");
    let jwks = JwksMock::empty().await;
    jwks.serve_expecting(vec![keypair.jwk_json()], 1).await;
    let config = key_set(&jwks, Duration::from_secs(10));

    let token = keypair.sign(&base_claims(ISSUER, "user-1"));
    let claims: Value = config.validate_token(&token).await.unwrap();
    assert_eq!(claims["sub"], "user-1");

    let mut expired = base_claims(ISSUER, "user-1");
    expired.insert("exp".to_string(), json!(Utc::now().timestamp() - 3600));
    assert!(matches!(
        config.validate_token::<Value>(&keypair.sign(&expired)).await,
        Err(AuthError::TokenExpired)
    ));

    jwks.verify().await;
}

#[tokio::test]
async fn test_es512_token_from_other_key_is_rejected() {
    let published = P521Keypair::new(1, "p521");
    let forger = P521Keypair::new(2, "p521");
    let jwks = JwksMock::start(vec![published.jwk_json()]).await;
    let config = key_set(&jwks, Duration::from_secs(10));

    let token = forger.sign(&base_claims(ISSUER, "user-1"));
    assert!(matches!(
        config.validate_token::<Value>(&token).await,
        Err(AuthError::TokenInvalidSignature(_))
    ));
}

#[tokio::test]
async fn test_token_without_kid_prefers_signing_keys() {
    let encryption = TestKeypair::new(5, "enc-key");
    let signing = TestKeypair::new(6, "sig-key");
    let jwks = JwksMock::empty().await;
    // Other-use key listed first; both tokens resolve from the first fetch
    jwks.serve_expecting(
        vec![
            encryption.jwk_json_with_use("enc"),
            signing.jwk_json_with_use("sig"),
        ],
        1,
    )
    .await;
    let config = key_set(&jwks, Duration::ZERO);

    let token = signing.sign_without_kid(&base_claims(ISSUER, "signed-by-sig"));
    let claims: Value = config.validate_token(&token).await.unwrap();
    assert_eq!(claims["sub"], "signed-by-sig");

    // Other-use keys are still tried once signing keys fail
    let token = encryption.sign_without_kid(&base_claims(ISSUER, "signed-by-enc"));
    let claims: Value = config.validate_token(&token).await.unwrap();
    assert_eq!(claims["sub"], "signed-by-enc");

    assert_eq!(jwks.request_count().await, 1);
    jwks.verify().await;
}

#[tokio::test]
async fn test_expired_token() {
    let keypair = TestKeypair::new(1, "key-1");
    let jwks = JwksMock::start(vec![keypair.jwk_json()]).await;
    let config = key_set(&jwks, Duration::from_secs(10));

    let now = Utc::now().timestamp();
    let mut claims = base_claims(ISSUER, "user-1");
    claims.insert("iat".to_string(), json!(now - 7200));
    claims.insert("exp".to_string(), json!(now - 3600));

    assert!(matches!(
        config.validate_token::<Value>(&keypair.sign(&claims)).await,
        Err(AuthError::TokenExpired)
    ));
}

#[tokio::test]
async fn test_future_iat_rejected() {
    let keypair = TestKeypair::new(1, "key-1");
    let jwks = JwksMock::start(vec![keypair.jwk_json()]).await;
    let config = key_set(&jwks, Duration::from_secs(10));

    let now = Utc::now().timestamp();
    let mut claims = base_claims(ISSUER, "user-1");
    claims.insert("iat".to_string(), json!(now + 3600));
    claims.insert("exp".to_string(), json!(now + 7200));

    assert!(matches!(
        config.validate_token::<Value>(&keypair.sign(&claims)).await,
        Err(AuthError::TokenInvalidSignature(_))
    ));
}

#[tokio::test]
async fn test_issuer_mismatch_rejected() {
    let keypair = TestKeypair::new(1, "key-1");
    let jwks = JwksMock::start(vec![keypair.jwk_json()]).await;
    let config = key_set(&jwks, Duration::from_secs(10));

    let token = keypair.sign(&base_claims("https://elsewhere.test", "user-1"));
    assert!(matches!(
        config.validate_token::<Value>(&token).await,
        Err(AuthError::TokenInvalidSignature(_))
    ));
}

#[tokio::test]
async fn test_missing_exp_rejected() {
    let keypair = TestKeypair::new(1, "key-1");
    let jwks = JwksMock::start(vec![keypair.jwk_json()]).await;
    let config = key_set(&jwks, Duration::from_secs(10));

    let mut claims = base_claims(ISSUER, "user-1");
    claims.remove("exp");

    assert!(matches!(
        config.validate_token::<Value>(&keypair.sign(&claims)).await,
        Err(AuthError::MissingRequiredClaim(c)) if c == "exp"
    ));
}
