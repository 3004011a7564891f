//! Per-issuer key set cache with throttled, single-flight refresh.
//!
//! Each [`KeySetConfig`] owns the cached [`KeySet`] for one issuer. Refresh is
//! demand-driven: there is no background task. Two independent pieces of
//! state coordinate it:
//!
//! - a `tokio::sync::RwLock` guarding the current snapshot and the time of
//!   the last successful update, held only for reads and the final swap
//! - an `AtomicBool` marking a fetch in flight, taken by compare-and-swap so
//!   exactly one caller performs the network call while readers keep using
//!   the still-valid snapshot
//!
//! # Security
//!
//! - Fetches are bounded by a timeout
//! - Refresh attempts are throttled per issuer to prevent refresh storms
//!   driven by tokens carrying unknown key ids

use crate::auth::keyset::{KeySet, SigningAlgorithm, VerificationKey, VerificationRules};
use crate::auth::origin::TokenOrigin;
use crate::auth::resolver;
use crate::config::OriginSettings;
use crate::errors::AuthError;
use crate::observability::metrics;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::instrument;

/// Default minimum interval between refreshes of one key set.
pub const DEFAULT_REFRESH_THROTTLE: Duration = Duration::from_secs(10);

/// Default timeout for one JWKS fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of attempts in a refresh-with-retry sequence.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default spacing between refresh-with-retry attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Timing policy shared by every key set.
#[derive(Debug, Clone)]
pub struct KeySetPolicy {
    pub refresh_throttle: Duration,
    pub fetch_timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub clock_skew: Duration,
}

impl Default for KeySetPolicy {
    fn default() -> Self {
        Self {
            refresh_throttle: DEFAULT_REFRESH_THROTTLE,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            clock_skew: common::jwt::DEFAULT_CLOCK_SKEW,
        }
    }
}

/// Result of a refresh call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new key set was fetched and swapped in.
    Refreshed { key_count: usize },
    /// The throttle window has not elapsed; the cached set was kept.
    Throttled,
}

#[derive(Default)]
struct CachedKeySet {
    keys: Option<Arc<KeySet>>,
    last_updated: Option<Instant>,
}

/// Clears the in-flight flag when the winning refresh finishes, on every path.
struct UpdateGuard<'a>(&'a AtomicBool);

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Key source and processing policy for one trusted issuer.
pub struct KeySetConfig {
    issuer: String,
    url: String,
    origin: TokenOrigin,
    display_name: String,
    allow_service_accounts: bool,
    audiences: Vec<String>,
    required_scopes: Vec<String>,
    policy: KeySetPolicy,
    http_client: reqwest::Client,
    cache: RwLock<CachedKeySet>,
    update_in_progress: AtomicBool,
}

impl std::fmt::Debug for KeySetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySetConfig")
            .field("issuer", &self.issuer)
            .field("url", &self.url)
            .field("origin", &self.origin)
            .field("allow_service_accounts", &self.allow_service_accounts)
            .finish_non_exhaustive()
    }
}

impl KeySetConfig {
    pub fn new(settings: OriginSettings, policy: KeySetPolicy) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(policy.fetch_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "authn.keyset", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        let display_name = settings
            .display_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| settings.issuer.clone());

        Self {
            issuer: settings.issuer,
            url: settings.jwks_url,
            origin: settings.origin,
            display_name,
            allow_service_accounts: settings.allow_service_accounts,
            audiences: settings.audiences,
            required_scopes: settings.required_scopes,
            policy,
            http_client,
            cache: RwLock::new(CachedKeySet::default()),
            update_in_progress: AtomicBool::new(false),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn origin(&self) -> TokenOrigin {
        self.origin
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn allow_service_accounts(&self) -> bool {
        self.allow_service_accounts
    }

    pub fn audiences(&self) -> &[String] {
        &self.audiences
    }

    pub fn required_scopes(&self) -> &[String] {
        &self.required_scopes
    }

    pub fn policy(&self) -> &KeySetPolicy {
        &self.policy
    }

    pub fn update_in_progress(&self) -> bool {
        self.update_in_progress.load(Ordering::Acquire)
    }

    /// Current snapshot, if any fetch has succeeded.
    pub async fn current(&self) -> Option<Arc<KeySet>> {
        self.cache.read().await.keys.clone()
    }

    pub async fn key_count(&self) -> usize {
        self.current().await.map_or(0, |set| set.len())
    }

    pub async fn get_key_by_id(&self, kid: &str) -> Option<VerificationKey> {
        self.current()
            .await
            .and_then(|set| set.get(kid).cloned())
    }

    /// Keys usable for `alg`, signing-use keys before other-use keys.
    pub async fn keys_for_algorithm(&self, alg: SigningAlgorithm) -> Vec<VerificationKey> {
        self.current().await.map_or_else(Vec::new, |set| {
            set.candidates_for(alg).into_iter().cloned().collect()
        })
    }

    fn within_throttle(&self, cached: &CachedKeySet) -> bool {
        match (cached.keys.as_ref(), cached.last_updated) {
            (Some(_), Some(at)) => at.elapsed() < self.policy.refresh_throttle,
            _ => false,
        }
    }

    /// Fetch the JWKS document and swap in the new key set.
    ///
    /// # Errors
    ///
    /// - `KeySetFetch` - empty URL, transport error, or non-200 status
    /// - `KeySetUpdateInProgress` - another caller holds the update guard
    /// - `KeySetEmptyOrInvalid` - the document has no usable key
    ///
    /// On any error the previous key set stays in place.
    #[instrument(skip_all, fields(issuer = %self.issuer))]
    pub async fn refresh(&self) -> Result<RefreshOutcome, AuthError> {
        if self.url.is_empty() {
            metrics::record_keyset_refresh("error");
            return Err(AuthError::KeySetFetch(format!(
                "no key set URL configured for issuer {}",
                self.issuer
            )));
        }

        if self.within_throttle(&*self.cache.read().await) {
            tracing::debug!(target: "authn.keyset", "Key set refresh throttled");
            metrics::record_keyset_refresh("throttled");
            return Ok(RefreshOutcome::Throttled);
        }

        if self
            .update_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(target: "authn.keyset", "Key set refresh already in progress");
            metrics::record_keyset_refresh("in_progress");
            return Err(AuthError::KeySetUpdateInProgress);
        }
        let _guard = UpdateGuard(&self.update_in_progress);

        // A refresh may have completed between the throttle check and the CAS
        if self.within_throttle(&*self.cache.read().await) {
            metrics::record_keyset_refresh("throttled");
            return Ok(RefreshOutcome::Throttled);
        }

        let result = self.fetch().await;
        match result {
            Ok(key_set) => {
                let key_count = key_set.len();
                {
                    let mut cache = self.cache.write().await;
                    cache.keys = Some(Arc::new(key_set));
                    cache.last_updated = Some(Instant::now());
                }
                tracing::info!(target: "authn.keyset", key_count, "Key set refreshed");
                metrics::record_keyset_refresh("refreshed");
                Ok(RefreshOutcome::Refreshed { key_count })
            }
            Err(e) => {
                tracing::warn!(target: "authn.keyset", error = %e, "Key set refresh failed");
                metrics::record_keyset_refresh("error");
                Err(e)
            }
        }
    }

    async fn fetch(&self) -> Result<KeySet, AuthError> {
        tracing::debug!(target: "authn.keyset", url = %self.url, "Fetching key set");
        let start = Instant::now();

        let response = self
            .http_client
            .get(&self.url)
            .timeout(self.policy.fetch_timeout)
            .send()
            .await
            .map_err(|e| AuthError::KeySetFetch(format!("request failed: {e}")));
        metrics::record_keyset_fetch_duration(start.elapsed());
        let response = response?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(AuthError::KeySetFetch(format!(
                "endpoint returned status {}",
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AuthError::KeySetFetch(format!("failed to read body: {e}")))?;

        let key_set =
            KeySet::from_jwks_bytes(&body).map_err(|reason| AuthError::KeySetEmptyOrInvalid {
                issuer: self.issuer.clone(),
                reason,
            })?;

        if key_set.skipped() > 0 {
            tracing::warn!(
                target: "authn.keyset",
                skipped = key_set.skipped(),
                accepted = key_set.len(),
                "Key set contained invalid entries"
            );
        }

        Ok(key_set)
    }

    /// How long a caller waits on another caller's fetch.
    ///
    /// Never shorter than the fetch timeout plus one poll, so a slow fetch
    /// that still succeeds is always observed.
    fn wait_budget(&self, attempts: u32) -> Duration {
        let polling = self.policy.retry_delay.saturating_mul(attempts.saturating_sub(1));
        polling.max(self.policy.fetch_timeout.saturating_add(self.policy.retry_delay))
    }

    /// One bounded refresh sequence used when resolution misses.
    ///
    /// The first attempt calls [`refresh`](Self::refresh). When another caller
    /// is already fetching, later attempts only wait for that fetch to finish,
    /// polling every `retry_delay` for at least as long as the fetch may run.
    /// A failed or timed-out sequence still succeeds if an older snapshot is
    /// cached, so resolution can fall back to it.
    ///
    /// # Errors
    ///
    /// Returns the refresh error (or `KeySetUpdateInProgress`) only when no
    /// key set has ever been cached.
    #[instrument(skip_all, fields(issuer = %self.issuer))]
    pub async fn refresh_with_retry(&self) -> Result<(), AuthError> {
        let attempts = self.policy.max_attempts.max(1);

        let first = self.refresh().await;
        let last_error = match first {
            Ok(_) => return Ok(()),
            Err(AuthError::KeySetUpdateInProgress) => {
                let deadline = Instant::now() + self.wait_budget(attempts);
                loop {
                    tokio::time::sleep(self.policy.retry_delay).await;
                    if !self.update_in_progress() {
                        return Ok(());
                    }
                    if Instant::now() >= deadline {
                        break AuthError::KeySetUpdateInProgress;
                    }
                }
            }
            Err(e) => e,
        };

        if self.current().await.is_some() {
            tracing::warn!(
                target: "authn.keyset",
                error = %last_error,
                "Refresh did not complete, using cached key set"
            );
            return Ok(());
        }

        Err(last_error)
    }

    /// Verify `token` against this issuer's keys and decode its claims.
    ///
    /// # Errors
    ///
    /// - `MalformedToken` / `UnsupportedAlgorithm` for unusable headers
    /// - `KeyNotFound`, `TokenInvalidSignature`, `TokenExpired`,
    ///   `MissingRequiredClaim` from resolution and verification
    #[instrument(skip_all, fields(issuer = %self.issuer))]
    pub async fn validate_token<T: DeserializeOwned>(&self, token: &str) -> Result<T, AuthError> {
        let header = common::jwt::decode_header(token)?;
        let rules = VerificationRules {
            issuer: self.issuer.clone(),
            leeway: self.policy.clock_skew,
        };

        let claims: serde_json::Value =
            resolver::resolve_and_verify(self, token, &header, &rules).await?;

        if let Some(iat) = claims.get("iat").and_then(serde_json::Value::as_i64) {
            common::jwt::validate_iat(iat, self.policy.clock_skew)?;
        }

        serde_json::from_value(claims).map_err(|e| {
            tracing::debug!(target: "authn.keyset", error = %e, "Claims do not match expected shape");
            AuthError::MalformedToken("token claims have an unexpected shape".to_string())
        })
    }
}
