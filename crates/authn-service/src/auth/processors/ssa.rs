//! Partner service (SSA) tokens.
//!
//! A partner service acts on behalf of a user named by the actor-identity
//! header. The token must grant the partner scope. Profile fields forwarded
//! in the gateway headers are merged into the stored user; only fields that
//! changed are written.

use crate::auth::authorization::validate_scope;
use crate::auth::claims::SsaClaims;
use crate::auth::context::{ProfileHeaders, RequestContext};
use crate::auth::keyset_config::KeySetConfig;
use crate::auth::origin::TokenOrigin;
use crate::auth::processors::ClaimProcessor;
use crate::errors::AuthError;
use crate::models::{NewUser, OrgData, User, UserUpdate};
use crate::repositories::UserStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::instrument;

/// Default scope a partner token must carry.
pub const DEFAULT_PARTNER_SCOPE: &str = "actor:impersonate";

const MISSING_ACTOR_HEADER: &str = "X-Actor-Id (or legacy X-Starfleet-Actor-Id)";

pub struct SsaProcessor {
    store: Arc<dyn UserStore>,
    required_scope: Vec<String>,
    scope_claim_names: Vec<String>,
}

impl SsaProcessor {
    pub fn new(
        store: Arc<dyn UserStore>,
        required_scope: String,
        scope_claim_names: Vec<String>,
    ) -> Self {
        Self {
            store,
            required_scope: vec![required_scope],
            scope_claim_names,
        }
    }
}

/// Merge gateway profile fields into `org_data`.
///
/// Only the organization named by the headers is touched. Empty header
/// values leave the stored value alone.
pub fn merge_profile(mut org_data: OrgData, profile: &ProfileHeaders) -> OrgData {
    let Some(org) = profile
        .org_name
        .as_deref()
        .map(|name| name.trim().to_lowercase())
        .filter(|name| !name.is_empty())
    else {
        return org_data;
    };

    let membership = org_data.entry(org).or_default();
    if let Some(display_name) = &profile.org_display_name {
        membership.display_name = Some(display_name.clone());
    }
    if !profile.roles.is_empty() {
        membership.roles.clone_from(&profile.roles);
    }
    if let Some(team) = &profile.team {
        if !membership.teams.contains(team) {
            membership.teams.push(team.clone());
        }
    }
    org_data
}

#[async_trait]
impl ClaimProcessor for SsaProcessor {
    fn origin(&self) -> TokenOrigin {
        TokenOrigin::Ssa
    }

    #[instrument(skip_all, fields(issuer = %config.issuer()))]
    async fn process(
        &self,
        token: &str,
        config: &KeySetConfig,
        ctx: &RequestContext,
    ) -> Result<User, AuthError> {
        let actor_id = ctx.actor_id().ok_or_else(|| {
            tracing::debug!(target: "authn.processor.ssa", "Partner token without actor header");
            AuthError::MissingRequiredHeader(MISSING_ACTOR_HEADER.to_string())
        })?;

        let claims: SsaClaims = config.validate_token(token).await?;
        validate_scope(&claims.other, &self.required_scope, &self.scope_claim_names)?;

        let profile = &ctx.profile;
        let user = self
            .store
            .get_or_create_by_starfleet_id(
                actor_id,
                NewUser {
                    email: profile.user_email.clone(),
                    name: profile.user_name.clone(),
                    org_data: merge_profile(OrgData::new(), profile),
                },
            )
            .await?;

        let merged = merge_profile(user.org_data.clone(), profile);
        let update = UserUpdate::diff(
            &user,
            profile.user_email.as_deref(),
            profile.user_name.as_deref(),
            Some(&merged),
        );
        if update.is_empty() {
            return Ok(user);
        }

        tracing::debug!(
            target: "authn.processor.ssa",
            user_id = %user.id,
            email_changed = update.email.is_some(),
            name_changed = update.name.is_some(),
            org_changed = update.org_data.is_some(),
            "Applying profile changes from gateway headers"
        );
        self.store.update(user.id, update).await
    }
}
