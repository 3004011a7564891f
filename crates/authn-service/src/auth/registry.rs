//! Issuer and origin registry.
//!
//! Maps issuer strings to their [`KeySetConfig`] and origin categories to the
//! [`ClaimProcessor`] that handles them. Both maps sit behind one
//! reader-writer lock owned by the registry, separate from every key set's
//! own lock. The registry is built once at startup and shared by `Arc`.

use crate::auth::keyset_config::KeySetConfig;
use crate::auth::origin::TokenOrigin;
use crate::auth::processors::{
    ClaimProcessor, CustomProcessor, KasProcessor, KeycloakProcessor, SsaProcessor,
};
use crate::config::Config;
use crate::repositories::UserStore;
use crate::services::ProfileSyncWorkflow;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Registry consistency and composition errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Issuer '{issuer}' has origin '{origin}' but no processor is registered for it")]
    MissingProcessor { issuer: String, origin: TokenOrigin },

    #[error("Issuer '{0}' is configured more than once")]
    DuplicateIssuer(String),

    #[error("Origin 'kas' is configured but no profile-sync workflow is available")]
    MissingProfileSync,
}

#[derive(Default)]
struct RegistryMaps {
    issuers: HashMap<String, Arc<KeySetConfig>>,
    processors: HashMap<TokenOrigin, Arc<dyn ClaimProcessor>>,
}

/// Thread-safe issuer and processor lookup.
#[derive(Default)]
pub struct OriginRegistry {
    maps: RwLock<RegistryMaps>,
}

impl OriginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a key set under its issuer, replacing any previous entry.
    ///
    /// Returns the replaced config, if any.
    pub async fn add_config(&self, config: Arc<KeySetConfig>) -> Option<Arc<KeySetConfig>> {
        let issuer = config.issuer().to_string();
        tracing::debug!(target: "authn.registry", issuer = %issuer, origin = %config.origin(), "Registering issuer");
        self.maps.write().await.issuers.insert(issuer, config)
    }

    pub async fn remove_config(&self, issuer: &str) -> Option<Arc<KeySetConfig>> {
        self.maps.write().await.issuers.remove(issuer)
    }

    pub async fn get_config(&self, issuer: &str) -> Option<Arc<KeySetConfig>> {
        self.maps.read().await.issuers.get(issuer).cloned()
    }

    /// All registered key sets, ordered by issuer.
    pub async fn list_configs(&self) -> Vec<Arc<KeySetConfig>> {
        let maps = self.maps.read().await;
        let mut configs: Vec<_> = maps.issuers.values().cloned().collect();
        configs.sort_by(|a, b| a.issuer().cmp(b.issuer()));
        configs
    }

    /// Register a processor under its own origin, replacing any previous one.
    pub async fn add_processor(
        &self,
        processor: Arc<dyn ClaimProcessor>,
    ) -> Option<Arc<dyn ClaimProcessor>> {
        let origin = processor.origin();
        tracing::debug!(target: "authn.registry", origin = %origin, "Registering claim processor");
        self.maps.write().await.processors.insert(origin, processor)
    }

    pub async fn remove_processor(&self, origin: TokenOrigin) -> Option<Arc<dyn ClaimProcessor>> {
        self.maps.write().await.processors.remove(&origin)
    }

    pub async fn get_processor(&self, origin: TokenOrigin) -> Option<Arc<dyn ClaimProcessor>> {
        self.maps.read().await.processors.get(&origin).cloned()
    }

    /// Origins with a registered processor.
    pub async fn list_processors(&self) -> Vec<TokenOrigin> {
        let maps = self.maps.read().await;
        let mut origins: Vec<_> = maps.processors.keys().copied().collect();
        origins.sort_by_key(|o| o.as_str());
        origins
    }

    /// Key set and processor responsible for `issuer`.
    ///
    /// Both lookups happen under one read guard. `None` when the issuer is
    /// unknown or its origin has no processor; callers treat either as an
    /// unknown issuer.
    pub async fn resolve_processor(
        &self,
        issuer: &str,
    ) -> Option<(Arc<KeySetConfig>, Arc<dyn ClaimProcessor>)> {
        let maps = self.maps.read().await;
        let config = maps.issuers.get(issuer)?;
        let Some(processor) = maps.processors.get(&config.origin()) else {
            tracing::warn!(target: "authn.registry", issuer = %issuer, origin = %config.origin(), "Issuer registered without a processor for its origin");
            return None;
        };
        Some((Arc::clone(config), Arc::clone(processor)))
    }

    /// Fetch every registered key set once.
    ///
    /// Failures are logged and otherwise ignored; the next token for that
    /// issuer retries on demand. Returns the number of key sets loaded.
    pub async fn warm_up(&self) -> usize {
        let mut loaded = 0;
        for config in self.list_configs().await {
            match config.refresh().await {
                Ok(_) => loaded += 1,
                Err(e) => {
                    tracing::warn!(target: "authn.registry", issuer = %config.issuer(), error = %e, "Key set warm-up failed");
                }
            }
        }
        loaded
    }

    /// Check that every registered issuer's origin has a processor.
    ///
    /// # Errors
    ///
    /// Returns the first issuer, by name, whose origin is unhandled.
    pub async fn validate(&self) -> Result<(), RegistryError> {
        let maps = self.maps.read().await;
        let mut issuers: Vec<_> = maps.issuers.values().collect();
        issuers.sort_by(|a, b| a.issuer().cmp(b.issuer()));

        for config in issuers {
            if !maps.processors.contains_key(&config.origin()) {
                return Err(RegistryError::MissingProcessor {
                    issuer: config.issuer().to_string(),
                    origin: config.origin(),
                });
            }
        }
        Ok(())
    }
}

/// Compose the registry from configuration.
///
/// One key set per configured origin and one processor per origin category
/// in use. The legacy gateway processor needs `workflow`.
///
/// # Errors
///
/// Returns [`RegistryError`] for duplicate issuers, a `kas` origin without a
/// workflow, or a registry that fails [`OriginRegistry::validate`].
pub async fn build_registry(
    config: &Config,
    store: Arc<dyn UserStore>,
    workflow: Option<Arc<dyn ProfileSyncWorkflow>>,
) -> Result<OriginRegistry, RegistryError> {
    let registry = OriginRegistry::new();
    let policy = config.keyset_policy();

    for settings in &config.origins {
        let key_set = Arc::new(KeySetConfig::new(settings.clone(), policy.clone()));
        if registry.add_config(key_set).await.is_some() {
            return Err(RegistryError::DuplicateIssuer(settings.issuer.clone()));
        }

        if registry.get_processor(settings.origin).await.is_some() {
            continue;
        }

        let processor: Arc<dyn ClaimProcessor> = match settings.origin {
            TokenOrigin::Keycloak => Arc::new(KeycloakProcessor::new(Arc::clone(&store))),
            TokenOrigin::Kas => {
                let workflow = workflow
                    .as_ref()
                    .ok_or(RegistryError::MissingProfileSync)?;
                Arc::new(KasProcessor::new(
                    Arc::clone(&store),
                    Arc::clone(workflow),
                    config.profile_staleness,
                ))
            }
            TokenOrigin::Ssa => Arc::new(SsaProcessor::new(
                Arc::clone(&store),
                config.partner_required_scope.clone(),
                config.scope_claim_names.clone(),
            )),
            TokenOrigin::Custom => Arc::new(CustomProcessor::new(
                Arc::clone(&store),
                config.scope_claim_names.clone(),
            )),
        };
        registry.add_processor(processor).await;
    }

    registry.validate().await?;

    tracing::info!(
        target: "authn.registry",
        issuers = config.origins.len(),
        "Origin registry ready"
    );
    Ok(registry)
}
