//! Legacy gateway (KAS) tokens.
//!
//! The token names the authorized organization through an access grant but
//! carries no roles. Roles come from the stored profile, which is refreshed
//! by the profile-sync workflow when it is missing, empty or stale. A failed
//! refresh rejects the request; stale data is never served in its place.

use crate::auth::claims::KasClaims;
use crate::auth::context::RequestContext;
use crate::auth::keyset_config::KeySetConfig;
use crate::auth::origin::TokenOrigin;
use crate::auth::processors::{required_subject, ClaimProcessor};
use crate::errors::AuthError;
use crate::models::User;
use crate::repositories::UserStore;
use crate::services::profile_sync::{ProfileHints, ProfileSyncRequest, ProfileSyncWorkflow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Default age after which a stored profile is re-synced.
pub const DEFAULT_PROFILE_STALENESS: Duration = Duration::from_secs(60);

pub struct KasProcessor {
    store: Arc<dyn UserStore>,
    workflow: Arc<dyn ProfileSyncWorkflow>,
    staleness: Duration,
}

impl KasProcessor {
    pub fn new(
        store: Arc<dyn UserStore>,
        workflow: Arc<dyn ProfileSyncWorkflow>,
        staleness: Duration,
    ) -> Self {
        Self {
            store,
            workflow,
            staleness,
        }
    }
}

fn is_stale(updated_at: DateTime<Utc>, now: DateTime<Utc>, staleness: Duration) -> bool {
    match chrono::Duration::from_std(staleness) {
        Ok(max_age) => now.signed_duration_since(updated_at) > max_age,
        // Out-of-range staleness never expires
        Err(_) => false,
    }
}

fn needs_sync(user: Option<&User>, now: DateTime<Utc>, staleness: Duration) -> bool {
    match user {
        None => true,
        Some(user) => user.org_data.is_empty() || is_stale(user.updated_at, now, staleness),
    }
}

#[async_trait]
impl ClaimProcessor for KasProcessor {
    fn origin(&self) -> TokenOrigin {
        TokenOrigin::Kas
    }

    #[instrument(skip_all, fields(issuer = %config.issuer()))]
    async fn process(
        &self,
        token: &str,
        config: &KeySetConfig,
        ctx: &RequestContext,
    ) -> Result<User, AuthError> {
        let claims: KasClaims = config.validate_token(token).await?;
        let sub = required_subject(claims.sub.as_deref())?;
        let organization = claims
            .authorized_organization()
            .map(str::to_lowercase)
            .ok_or_else(|| AuthError::MissingRequiredClaim("access (organization grant)".to_string()))?;

        let existing = self.store.get_by_aux_id(sub).await?;
        let user = if needs_sync(existing.as_ref(), Utc::now(), self.staleness) {
            tracing::debug!(
                target: "authn.processor.kas",
                organization = %organization,
                known_user = existing.is_some(),
                "Stored profile missing or stale, running profile sync"
            );

            let request = ProfileSyncRequest {
                aux_id: sub.to_string(),
                organization: organization.clone(),
                hints: ProfileHints::from(&ctx.profile),
            };
            self.workflow
                .sync_user_profile(&request)
                .await
                .map_err(|e| match e {
                    AuthError::UpstreamUserSyncFailure(_) => e,
                    other => AuthError::UpstreamUserSyncFailure(other.to_string()),
                })?;

            self.store.get_by_aux_id(sub).await?.ok_or_else(|| {
                AuthError::UpstreamUserSyncFailure(
                    "user profile unavailable after sync".to_string(),
                )
            })?
        } else {
            // needs_sync is false only when a user exists
            existing.ok_or(AuthError::Internal)?
        };

        match user.roles_in(&organization) {
            Some(roles) if !roles.is_empty() => Ok(user),
            _ => {
                tracing::debug!(target: "authn.processor.kas", organization = %organization, "User has no roles in authorized organization");
                Err(AuthError::NoRolesAssigned(format!(
                    "no roles in organization {organization}"
                )))
            }
        }
    }
}
