//! Test server harness for E2E testing
//!
//! Provides `TestAuthServer` for spawning real authentication service
//! instances backed by an in-memory user store.

use authn_service::auth::{build_registry, TokenOrigin};
use authn_service::config::{Config, OriginSettings};
use authn_service::observability::metrics::init_metrics_recorder;
use authn_service::repositories::UserStore;
use authn_service::routes::{self, AppState};
use authn_service::services::ProfileSyncWorkflow;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use sqlx::postgres::PgPoolOptions;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Global metrics handle for test servers
static TEST_METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_test_metrics_handle() -> PrometheusHandle {
    TEST_METRICS_HANDLE
        .get_or_init(|| {
            init_metrics_recorder()
                .unwrap_or_else(|_| PrometheusBuilder::new().build_recorder().handle())
        })
        .clone()
}

/// Origin settings with no audience, scope or service-account policy.
pub fn origin_settings(issuer: &str, jwks_url: &str, origin: TokenOrigin) -> OriginSettings {
    OriginSettings {
        issuer: issuer.to_string(),
        jwks_url: jwks_url.to_string(),
        origin,
        display_name: None,
        allow_service_accounts: false,
        audiences: Vec::new(),
        required_scopes: Vec::new(),
    }
}

/// Configuration tuned for tests: no refresh throttle and short retries.
pub fn test_config(origins: Vec<OriginSettings>) -> Config {
    let vars = HashMap::from([
        (
            "DATABASE_URL".to_string(),
            "postgresql://127.0.0.1:1/authn_test".to_string(),
        ),
        ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ("KEYSET_REFRESH_THROTTLE_SECONDS".to_string(), "0".to_string()),
        ("KEY_RESOLUTION_MAX_ATTEMPTS".to_string(), "3".to_string()),
        ("KEY_RESOLUTION_RETRY_DELAY_MS".to_string(), "20".to_string()),
        ("KEYSET_WARM_UP".to_string(), "false".to_string()),
    ]);

    let mut config = Config::from_vars(&vars).expect("test configuration should load");
    config.origins = origins;
    config
}

/// Test harness for spawning the authentication service in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_me_flow_e2e() -> Result<()> {
///     let store = Arc::new(InMemoryUserStore::new());
///     let server = TestAuthServer::spawn(test_config(origins), store, None).await?;
///
///     let response = reqwest::Client::new()
///         .get(format!("{}/api/v1/me", server.url()))
///         .bearer_auth(token)
///         .send()
///         .await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestAuthServer {
    addr: SocketAddr,
    _handle: JoinHandle<()>,
}

impl TestAuthServer {
    /// Spawn a server on a random local port.
    ///
    /// The database pool is lazy; only `/health` touches it and reports
    /// `unhealthy` when no database is reachable.
    pub async fn spawn(
        config: Config,
        store: Arc<dyn UserStore>,
        workflow: Option<Arc<dyn ProfileSyncWorkflow>>,
    ) -> Result<Self, anyhow::Error> {
        let registry = build_registry(&config, store, workflow)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to build registry: {}", e))?;

        let pool = PgPoolOptions::new()
            .acquire_timeout(Duration::from_secs(1))
            .connect_lazy(&config.database_url)
            .map_err(|e| anyhow::anyhow!("Failed to create lazy pool: {}", e))?;

        let state = Arc::new(AppState {
            pool,
            config,
            registry: Arc::new(registry),
        });

        let app = routes::build_routes(state, get_test_metrics_handle());

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for TestAuthServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
