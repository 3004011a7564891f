//! Internal identity provider (Keycloak) tokens.
//!
//! Roles arrive as `organization:role` strings. Organization names are
//! lower-cased, both parts are trimmed and duplicate roles collapse. Tokens
//! with a client identifier are service accounts and need the issuer's
//! service-account flag.

use crate::auth::claims::KeycloakClaims;
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

pub struct KeycloakProcessor {
    store: Arc<dyn UserStore>,
}

impl KeycloakProcessor {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }
}

/// Build organization data from `organization:role` strings.
///
/// Entries without a separator or with an empty part are skipped. Role order
/// follows first appearance.
pub fn normalize_roles(roles: &[String]) -> OrgData {
    let mut org_data = OrgData::new();
    for entry in roles {
        let Some((org, role)) = entry.split_once(':') else {
            tracing::debug!(target: "authn.processor.keycloak", "Skipping role without organization prefix");
            continue;
        };
        let org = org.trim().to_lowercase();
        let role = role.trim();
        if org.is_empty() || role.is_empty() {
            continue;
        }

        let membership = org_data.entry(org).or_default();
        if !membership.roles.iter().any(|r| r == role) {
            membership.roles.push(role.to_string());
        }
    }
    org_data
}

/// Keep stored display names and teams for organizations still present.
fn carry_over_profile(mut derived: OrgData, stored: &OrgData) -> OrgData {
    for (org, membership) in &mut derived {
        if let Some(OrgMembership {
            display_name,
            teams,
            ..
        }) = stored.get(org)
        {
            membership.display_name.clone_from(display_name);
            membership.teams.clone_from(teams);
        }
    }
    derived
}

#[async_trait]
impl ClaimProcessor for KeycloakProcessor {
    fn origin(&self) -> TokenOrigin {
        TokenOrigin::Keycloak
    }

    #[instrument(skip_all, fields(issuer = %config.issuer()))]
    async fn process(
        &self,
        token: &str,
        config: &KeySetConfig,
        _ctx: &RequestContext,
    ) -> Result<User, AuthError> {
        let claims: KeycloakClaims = config.validate_token(token).await?;
        let sub = required_subject(claims.sub.as_deref())?;

        if claims.is_service_account() && !config.allow_service_accounts() {
            tracing::debug!(target: "authn.processor.keycloak", "Service account token rejected");
            return Err(AuthError::ServiceAccountNotEnabled(config.issuer().to_string()));
        }

        let derived = normalize_roles(&claims.roles);
        if derived.is_empty() {
            return Err(AuthError::NoRolesAssigned(
                "token carries no organization roles".to_string(),
            ));
        }

        let name = claims.full_name();
        let user = self
            .store
            .get_or_create_by_aux_id(
                sub,
                NewUser {
                    email: claims.email.clone(),
                    name: name.clone(),
                    org_data: derived.clone(),
                },
            )
            .await?;

        let org_data = carry_over_profile(derived, &user.org_data);
        let update = UserUpdate::diff(
            &user,
            claims.email.as_deref(),
            name.as_deref(),
            Some(&org_data),
        );
        if update.is_empty() {
            return Ok(user);
        }

        tracing::debug!(target: "authn.processor.keycloak", user_id = %user.id, "Updating user from token claims");
        self.store.update(user.id, update).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn roles(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_duplicate_roles_collapse() {
        let org_data = normalize_roles(&roles(&["acme:admin", "acme:admin"]));
        assert_eq!(org_data.len(), 1);
        assert_eq!(org_data["acme"].roles, vec!["admin"]);
    }

    #[test]
    fn test_org_names_lowercased_and_trimmed() {
        let org_data = normalize_roles(&roles(&[" ACME : admin", "Acme:viewer", "beta:dev"]));
        assert_eq!(org_data["acme"].roles, vec!["admin", "viewer"]);
        assert_eq!(org_data["beta"].roles, vec!["dev"]);
    }

    #[test]
    fn test_malformed_entries_skipped() {
        let org_data = normalize_roles(&roles(&["admin", ":admin", "acme:", "  "]));
        assert!(org_data.is_empty());
    }

    #[test]
    fn test_role_with_colon_keeps_remainder() {
        let org_data = normalize_roles(&roles(&["acme:project:owner"]));
        assert_eq!(org_data["acme"].roles, vec!["project:owner"]);
    }

    #[test]
    fn test_carry_over_keeps_display_name_and_teams() {
        let mut stored = OrgData::new();
        stored.insert(
            "acme".to_string(),
            OrgMembership {
                display_name: Some("Acme Corp".to_string()),
                roles: vec!["viewer".to_string()],
                teams: vec!["platform".to_string()],
            },
        );
        stored.insert("gone".to_string(), OrgMembership::default());

        let merged = carry_over_profile(normalize_roles(&roles(&["acme:admin"])), &stored);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged["acme"].display_name.as_deref(), Some("Acme Corp"));
        assert_eq!(merged["acme"].teams, vec!["platform"]);
        assert_eq!(merged["acme"].roles, vec!["admin"]);
    }
}
