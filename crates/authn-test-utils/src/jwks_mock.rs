//! JWKS endpoint backed by `wiremock`.

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path the mock serves the key set on.
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// A mock issuer publishing a JWKS document.
///
/// Call-count expectations set with the `expecting` variants are verified
/// when the mock is dropped.
pub struct JwksMock {
    server: MockServer,
}

impl JwksMock {
    /// Start serving `keys`.
    pub async fn start(keys: Vec<Value>) -> Self {
        let mock = Self::empty().await;
        mock.serve(keys).await;
        mock
    }

    /// Start with nothing mounted; every request gets a 404.
    pub async fn empty() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// URL of the JWKS document.
    pub fn url(&self) -> String {
        format!("{}{}", self.server.uri(), JWKS_PATH)
    }

    /// Replace whatever is mounted with `keys`.
    pub async fn serve(&self, keys: Vec<Value>) {
        self.server.reset().await;
        Self::jwks_response(json!({ "keys": keys }))
            .mount(&self.server)
            .await;
    }

    /// Replace whatever is mounted with `keys`, expecting exactly `calls` fetches.
    pub async fn serve_expecting(&self, keys: Vec<Value>, calls: u64) {
        self.server.reset().await;
        Self::jwks_response(json!({ "keys": keys }))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// Serve `keys` after `delay`, expecting exactly `calls` fetches.
    pub async fn serve_slowly_expecting(
        &self,
        keys: Vec<Value>,
        delay: std::time::Duration,
        calls: u64,
    ) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "keys": keys }))
                    .set_delay(delay),
            )
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// Serve an arbitrary JSON body.
    pub async fn serve_body(&self, body: Value) {
        self.server.reset().await;
        Self::jwks_response(body).mount(&self.server).await;
    }

    /// Answer every fetch with `status`.
    pub async fn fail_with(&self, status: u16) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Panic unless every mounted expectation has been met.
    pub async fn verify(&self) {
        self.server.verify().await;
    }

    /// Number of requests received since the last reset.
    pub async fn request_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or(0)
    }

    fn jwks_response(body: Value) -> Mock {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
    }
}
