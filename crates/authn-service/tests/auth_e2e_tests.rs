//! End-to-end authentication tests.
//!
//! Spawns the real router with an in-memory user store and mocked issuers,
//! then drives `/api/v1/me` over HTTP.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use authn_service::auth::context::{ACTOR_ID_HEADER, PROFILE_ORG_NAME_HEADER, PROFILE_ROLES_HEADER};
use authn_service::auth::processors::ssa::DEFAULT_PARTNER_SCOPE;
use authn_service::auth::TokenOrigin;
use authn_service::config::OriginSettings;
use authn_service::repositories::users::mock::InMemoryUserStore;
use authn_service::services::profile_sync::mock::MockProfileSync;
use authn_service::services::ProfileSyncWorkflow;
use authn_test_utils::{
    base_claims, claims_with, origin_settings, test_config, JwksMock, TestAuthServer, TestKeypair,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value};
use std::sync::Arc;

const KEYCLOAK_ISSUER: &str = "https://sso.test/realms/main";
const SSA_ISSUER: &str = "https://ssa.test";
const CI_ISSUER: &str = "https://token.ci.test";
const KAS_ISSUER: &str = "https://kas.test";

struct Fixture {
    server: TestAuthServer,
    keypair: TestKeypair,
    store: Arc<InMemoryUserStore>,
    workflow: Arc<MockProfileSync>,
    _jwks: JwksMock,
}

impl Fixture {
    async fn start() -> Result<Self> {
        let keypair = TestKeypair::new(1, "key-1");
        let jwks = JwksMock::start(vec![keypair.jwk_json()]).await;
        let url = jwks.url();

        let origins = vec![
            origin_settings(KEYCLOAK_ISSUER, &url, TokenOrigin::Keycloak),
            origin_settings(SSA_ISSUER, &url, TokenOrigin::Ssa),
            origin_settings(KAS_ISSUER, &url, TokenOrigin::Kas),
            OriginSettings {
                display_name: Some("CI".to_string()),
                allow_service_accounts: true,
                audiences: vec!["control-plane".to_string()],
                ..origin_settings(CI_ISSUER, &url, TokenOrigin::Custom)
            },
        ];

        let store = Arc::new(InMemoryUserStore::new());
        let workflow = Arc::new(MockProfileSync::failing());
        let server = TestAuthServer::spawn(
            test_config(origins),
            store.clone(),
            Some(workflow.clone() as Arc<dyn ProfileSyncWorkflow>),
        )
        .await?;

        Ok(Self {
            server,
            keypair,
            store,
            workflow,
            _jwks: jwks,
        })
    }

    fn me_url(&self) -> String {
        format!("{}/api/v1/me", self.server.url())
    }
}

async fn error_body(response: reqwest::Response) -> Value {
    response.json::<Value>().await.unwrap()
}

#[tokio::test]
async fn test_me_requires_authorization_header() -> Result<()> {
    let fixture = Fixture::start().await?;

    let response = reqwest::Client::new().get(fixture.me_url()).send().await?;

    assert_eq!(response.status(), 401);
    let www_auth = response
        .headers()
        .get("www-authenticate")
        .expect("401 should carry WWW-Authenticate")
        .to_str()?
        .to_string();
    assert!(www_auth.contains("Bearer"));

    let body = error_body(response).await;
    assert_eq!(body["error"]["code"], "MISSING_AUTH_HEADER");
    assert_eq!(body["error"]["source"], "middleware");
    Ok(())
}

#[tokio::test]
async fn test_unknown_issuer_rejected() -> Result<()> {
    let fixture = Fixture::start().await?;
    let token = fixture
        .keypair
        .sign(&base_claims("https://unknown.test", "user-1"));

    let response = reqwest::Client::new()
        .get(fixture.me_url())
        .bearer_auth(token)
        .send()
        .await?;

    assert_eq!(response.status(), 401);
    let body = error_body(response).await;
    assert_eq!(body["error"]["code"], "UNKNOWN_ISSUER");
    Ok(())
}

#[tokio::test]
async fn test_keycloak_login_returns_user() -> Result<()> {
    let fixture = Fixture::start().await?;
    let token = fixture.keypair.sign(&claims_with(
        KEYCLOAK_ISSUER,
        "kc-user-1",
        json!({"email": "pat@acme.io", "roles": ["Acme:admin"]}),
    ));

    let client = reqwest::Client::new();
    for _ in 0..2 {
        let response = client
            .get(fixture.me_url())
            .bearer_auth(&token)
            .send()
            .await?;
        assert_eq!(response.status(), 200);

        let body: Value = response.json().await?;
        assert_eq!(body["aux_id"], "kc-user-1");
        assert_eq!(body["origin"], "keycloak");
        assert_eq!(body["org_data"]["acme"]["roles"], json!(["admin"]));
    }

    // Repeated logins resolve to one user
    assert_eq!(fixture.store.users().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_keycloak_without_roles_is_forbidden() -> Result<()> {
    let fixture = Fixture::start().await?;
    let token = fixture
        .keypair
        .sign(&claims_with(KEYCLOAK_ISSUER, "kc-user-1", json!({"roles": []})));

    let response = reqwest::Client::new()
        .get(fixture.me_url())
        .bearer_auth(token)
        .send()
        .await?;

    assert_eq!(response.status(), 403);
    assert!(response.headers().get("www-authenticate").is_none());
    let body = error_body(response).await;
    assert_eq!(body["error"]["code"], "NO_ROLES_ASSIGNED");
    assert_eq!(body["error"]["source"], "keycloak");
    Ok(())
}

#[tokio::test]
async fn test_partner_token_without_actor_header() -> Result<()> {
    let fixture = Fixture::start().await?;
    let token = fixture.keypair.sign(&claims_with(
        SSA_ISSUER,
        "partner-svc",
        json!({"scope": DEFAULT_PARTNER_SCOPE}),
    ));

    let response = reqwest::Client::new()
        .get(fixture.me_url())
        .bearer_auth(token)
        .send()
        .await?;

    assert_eq!(response.status(), 401);
    let body = error_body(response).await;
    assert_eq!(body["error"]["code"], "MISSING_REQUIRED_HEADER");
    assert_eq!(body["error"]["source"], "ssa");
    Ok(())
}

#[tokio::test]
async fn test_partner_token_with_actor_and_profile_headers() -> Result<()> {
    let fixture = Fixture::start().await?;
    let token = fixture.keypair.sign(&claims_with(
        SSA_ISSUER,
        "partner-svc",
        json!({"scope": DEFAULT_PARTNER_SCOPE}),
    ));

    let response = reqwest::Client::new()
        .get(fixture.me_url())
        .bearer_auth(token)
        .header(ACTOR_ID_HEADER, "actor-42")
        .header(PROFILE_ORG_NAME_HEADER, STANDARD.encode("Acme"))
        .header(PROFILE_ROLES_HEADER, STANDARD.encode("developer,viewer"))
        .send()
        .await?;

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await?;
    assert_eq!(body["starfleet_id"], "actor-42");
    assert_eq!(body["origin"], "ssa");
    assert_eq!(
        body["org_data"]["acme"]["roles"],
        json!(["developer", "viewer"])
    );
    Ok(())
}

#[tokio::test]
async fn test_oidc_audience_mismatch() -> Result<()> {
    let fixture = Fixture::start().await?;
    let token = fixture.keypair.sign(&claims_with(
        CI_ISSUER,
        "repo:acme/app",
        json!({"aud": "someone-else"}),
    ));

    let response = reqwest::Client::new()
        .get(fixture.me_url())
        .bearer_auth(token)
        .send()
        .await?;

    assert_eq!(response.status(), 401);
    let body = error_body(response).await;
    assert_eq!(body["error"]["code"], "AUDIENCE_MISMATCH");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("audience"));
    Ok(())
}

#[tokio::test]
async fn test_kas_workflow_failure_is_unauthorized() -> Result<()> {
    let fixture = Fixture::start().await?;
    let token = fixture.keypair.sign(&claims_with(
        KAS_ISSUER,
        "kas-user-1",
        json!({"access": [{"type": "organization", "name": "acme"}]}),
    ));

    let response = reqwest::Client::new()
        .get(fixture.me_url())
        .bearer_auth(token)
        .send()
        .await?;

    assert_eq!(response.status(), 401);
    let body = error_body(response).await;
    assert_eq!(body["error"]["code"], "USER_SYNC_FAILED");
    assert_eq!(body["error"]["source"], "kas");
    assert_eq!(fixture.workflow.call_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_health_reports_unreachable_database() -> Result<()> {
    let fixture = Fixture::start().await?;

    let response = reqwest::get(format!("{}/health", fixture.server.url())).await?;

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await?;
    assert_eq!(body["status"], "unhealthy");
    Ok(())
}
