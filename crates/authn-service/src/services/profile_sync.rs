//! Profile-sync workflow client.
//!
//! The legacy gateway processor calls this when a user's stored profile is
//! missing or stale. The workflow engine refreshes the user from the upstream
//! identity source and writes the result to the user store; this client only
//! starts the workflow and waits for it to finish.
//!
//! # Security
//!
//! - The engine bearer token is held as a `SecretString`
//! - Timeouts prevent a hung workflow from holding requests forever
//! - A failed sync is always an error, never success with stale data

use crate::auth::context::ProfileHeaders;
use crate::errors::AuthError;
use crate::observability::metrics;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use reqwest::Client;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Upper bound on one workflow run, including the wait for completion.
const PROFILE_SYNC_TIMEOUT_SECS: u64 = 30;

/// Gateway-supplied profile fields forwarded as hints.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileHints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_display_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
}

impl From<&ProfileHeaders> for ProfileHints {
    fn from(headers: &ProfileHeaders) -> Self {
        Self {
            org_display_name: headers.org_display_name.clone(),
            roles: headers.roles.clone(),
            team: headers.team.clone(),
            user_name: headers.user_name.clone(),
            user_email: headers.user_email.clone(),
        }
    }
}

/// Input of one profile-sync workflow run.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileSyncRequest {
    /// Auxiliary identifier of the user to refresh.
    pub aux_id: String,

    /// Organization the token was issued for.
    pub organization: String,

    pub hints: ProfileHints,
}

/// Starts the upstream profile-sync workflow and awaits its completion.
#[async_trait]
pub trait ProfileSyncWorkflow: Send + Sync {
    /// # Errors
    ///
    /// `UpstreamUserSyncFailure` if the workflow cannot be started or fails.
    async fn sync_user_profile(&self, request: &ProfileSyncRequest) -> Result<(), AuthError>;
}

/// HTTP client for the workflow engine.
#[derive(Clone)]
pub struct HttpProfileSyncClient {
    client: Client,
    url: String,
    token: Option<SecretString>,
}

impl HttpProfileSyncClient {
    /// Create a client posting to `url`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if the HTTP client cannot be built.
    pub fn new(url: String, token: Option<SecretString>) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(PROFILE_SYNC_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| {
                tracing::error!(target: "authn.profile_sync", error = %e, "Failed to build HTTP client");
                AuthError::Internal
            })?;

        Ok(Self { client, url, token })
    }

    async fn run(&self, request: &ProfileSyncRequest) -> Result<(), AuthError> {
        let mut builder = self.client.post(&self.url).json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token.expose_secret());
        }

        let response = builder.send().await.map_err(|e| {
            tracing::warn!(target: "authn.profile_sync", error = %e, "Profile sync request failed");
            AuthError::UpstreamUserSyncFailure("profile sync workflow unavailable".to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            tracing::warn!(target: "authn.profile_sync", status = %status, "Profile sync workflow failed");
            Err(AuthError::UpstreamUserSyncFailure(format!(
                "profile sync workflow returned {status}"
            )))
        }
    }
}

#[async_trait]
impl ProfileSyncWorkflow for HttpProfileSyncClient {
    #[instrument(skip_all, fields(organization = %request.organization))]
    async fn sync_user_profile(&self, request: &ProfileSyncRequest) -> Result<(), AuthError> {
        let start = Instant::now();
        let result = self.run(request).await;
        metrics::record_profile_sync(
            if result.is_ok() { "success" } else { "error" },
            start.elapsed(),
        );
        result
    }
}

pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type SyncEffect = Box<dyn Fn(&ProfileSyncRequest) + Send + Sync>;

    /// Mock workflow for unit testing.
    pub struct MockProfileSync {
        /// Number of calls made.
        call_count: AtomicUsize,
        /// Whether to return errors.
        return_error: bool,
        /// Run on each successful call, e.g. to write the synced profile.
        effect: Option<SyncEffect>,
        requests: Mutex<Vec<ProfileSyncRequest>>,
    }

    impl MockProfileSync {
        /// Create a mock that always succeeds without side effects.
        pub fn succeeding() -> Self {
            Self {
                call_count: AtomicUsize::new(0),
                return_error: false,
                effect: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        /// Create a mock that always fails.
        pub fn failing() -> Self {
            Self {
                return_error: true,
                ..Self::succeeding()
            }
        }

        /// Create a mock that succeeds and runs `effect` on each call.
        pub fn with_effect(effect: impl Fn(&ProfileSyncRequest) + Send + Sync + 'static) -> Self {
            Self {
                effect: Some(Box::new(effect)),
                ..Self::succeeding()
            }
        }

        /// Get the number of calls made.
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        /// Requests received, in order.
        pub fn requests(&self) -> Vec<ProfileSyncRequest> {
            self.requests.lock().map(|r| r.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl ProfileSyncWorkflow for MockProfileSync {
        async fn sync_user_profile(&self, request: &ProfileSyncRequest) -> Result<(), AuthError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(request.clone());
            }

            if self.return_error {
                return Err(AuthError::UpstreamUserSyncFailure(
                    "mock workflow failure".to_string(),
                ));
            }

            if let Some(effect) = &self.effect {
                effect(request);
            }
            Ok(())
        }
    }
}
