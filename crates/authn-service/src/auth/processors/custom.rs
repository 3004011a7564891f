//! Third-party OIDC tokens.
//!
//! Any configured issuer (CI systems, workload identity providers) may mint
//! service tokens. Audience is checked before scope. The resulting user is
//! keyed by `<display name>:<sub>` and belongs to one organization named
//! after the issuer's display name, with a fixed role.

use crate::auth::authorization::{validate_audience, validate_scope};
use crate::auth::claims::CustomClaims;
use crate::auth::context::RequestContext;
use crate::auth::keyset_config::KeySetConfig;
use crate::auth::origin::TokenOrigin;
use crate::auth::processors::{required_subject, ClaimProcessor};
use crate::errors::AuthError;
use crate::models::{NewUser, OrgData, OrgMembership, User, UserUpdate};
use crate::repositories::UserStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::instrument;

/// Role granted to every third-party OIDC principal.
pub const SERVICE_ROLE: &str = "service";

pub struct CustomProcessor {
    store: Arc<dyn UserStore>,
    scope_claim_names: Vec<String>,
}

impl CustomProcessor {
    pub fn new(store: Arc<dyn UserStore>, scope_claim_names: Vec<String>) -> Self {
        Self {
            store,
            scope_claim_names,
        }
    }
}

/// The single organization record synthesized for an issuer.
pub fn service_org_data(display_name: &str) -> OrgData {
    let mut org_data = OrgData::new();
    org_data.insert(
        display_name.to_string(),
        OrgMembership {
            display_name: Some(display_name.to_string()),
            roles: vec![SERVICE_ROLE.to_string()],
            teams: Vec::new(),
        },
    );
    org_data
}

#[async_trait]
impl ClaimProcessor for CustomProcessor {
    fn origin(&self) -> TokenOrigin {
        TokenOrigin::Custom
    }

    #[instrument(skip_all, fields(issuer = %config.issuer()))]
    async fn process(
        &self,
        token: &str,
        config: &KeySetConfig,
        _ctx: &RequestContext,
    ) -> Result<User, AuthError> {
        if !config.allow_service_accounts() {
            return Err(AuthError::ServiceAccountNotEnabled(config.issuer().to_string()));
        }

        let claims: CustomClaims = config.validate_token(token).await?;

        // Audience failures take precedence over scope failures
        validate_audience(&claims.0, config.audiences())?;
        validate_scope(&claims.0, config.required_scopes(), &self.scope_claim_names)?;

        let sub = required_subject(claims.subject())?;
        let aux_id = format!("{}:{}", config.display_name(), sub);
        let org_data = service_org_data(config.display_name());

        let user = self
            .store
            .get_or_create_by_aux_id(
                &aux_id,
                NewUser {
                    org_data: org_data.clone(),
                    ..NewUser::default()
                },
            )
            .await?;

        let update = UserUpdate::diff(&user, None, None, Some(&org_data));
        if update.is_empty() {
            return Ok(user);
        }

        tracing::debug!(target: "authn.processor.custom", user_id = %user.id, "Resetting service organization data");
        self.store.update(user.id, update).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_service_org_data() {
        let org_data = service_org_data("GitHub Actions");
        assert_eq!(org_data.len(), 1);
        let membership = &org_data["GitHub Actions"];
        assert_eq!(membership.roles, vec![SERVICE_ROLE]);
        assert_eq!(membership.display_name.as_deref(), Some("GitHub Actions"));
    }
}
