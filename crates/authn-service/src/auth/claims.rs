//! Claim shapes for each token origin.
//!
//! Identifying fields (`sub`, `email`) are redacted in Debug output to
//! prevent exposure in logs.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;

const REDACTED: &str = "[REDACTED]";

fn redact<T>(value: &Option<T>) -> &'static str {
    if value.is_some() {
        REDACTED
    } else {
        "None"
    }
}

/// Internal identity provider (Keycloak) access token claims.
#[derive(Clone, Deserialize)]
pub struct KeycloakClaims {
    /// Subject - redacted in Debug output.
    pub sub: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub given_name: Option<String>,

    #[serde(default)]
    pub family_name: Option<String>,

    /// `organization:role` strings.
    #[serde(default)]
    pub roles: Vec<String>,

    /// Present only on service-account (client credentials) tokens.
    #[serde(default, alias = "clientId")]
    pub client_id: Option<String>,
}

impl fmt::Debug for KeycloakClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeycloakClaims")
            .field("sub", &redact(&self.sub))
            .field("email", &redact(&self.email))
            .field("roles", &self.roles)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl KeycloakClaims {
    pub fn is_service_account(&self) -> bool {
        self.client_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty())
    }

    /// Given and family name joined with a space, if either is present.
    pub fn full_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.given_name.as_deref(), self.family_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

/// One access grant carried by a legacy gateway (KAS) token.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AccessGrant {
    #[serde(rename = "type")]
    pub grant_type: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub actions: Vec<String>,
}

/// Grant type that names the authorized organization.
pub const ORGANIZATION_GRANT: &str = "organization";

/// Legacy gateway (KAS) token claims.
#[derive(Clone, Deserialize)]
pub struct KasClaims {
    /// Subject - redacted in Debug output.
    pub sub: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub access: Vec<AccessGrant>,
}

impl fmt::Debug for KasClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KasClaims")
            .field("sub", &redact(&self.sub))
            .field("email", &redact(&self.email))
            .field("access", &self.access)
            .finish()
    }
}

impl KasClaims {
    /// Name of the first organization grant with a non-empty name.
    pub fn authorized_organization(&self) -> Option<&str> {
        self.access
            .iter()
            .filter(|grant| grant.grant_type == ORGANIZATION_GRANT)
            .map(|grant| grant.name.trim())
            .find(|name| !name.is_empty())
    }
}

/// Partner service (SSA) token claims.
///
/// Scopes are read from the remaining claims by name.
#[derive(Clone, Deserialize)]
pub struct SsaClaims {
    /// Subject - redacted in Debug output.
    pub sub: Option<String>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl fmt::Debug for SsaClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SsaClaims")
            .field("sub", &redact(&self.sub))
            .field("claims", &self.other.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Third-party OIDC token claims, kept as a generic map.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct CustomClaims(pub Map<String, Value>);

impl fmt::Debug for CustomClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CustomClaims")
            .field(&self.0.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CustomClaims {
    pub fn subject(&self) -> Option<&str> {
        self.0
            .get("sub")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}
