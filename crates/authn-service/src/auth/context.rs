//! Per-request side-channel data supplied by upstream gateways.
//!
//! Decoded once in the middleware and handed to the claim processor.

use axum::http::HeaderMap;
use base64::{engine::general_purpose::STANDARD, Engine};

/// Actor identity header for partner service tokens.
pub const ACTOR_ID_HEADER: &str = "x-actor-id";

/// Legacy name of [`ACTOR_ID_HEADER`].
pub const LEGACY_ACTOR_ID_HEADER: &str = "x-starfleet-actor-id";

pub const PROFILE_ORG_NAME_HEADER: &str = "x-profile-org-name";
pub const PROFILE_ORG_DISPLAY_NAME_HEADER: &str = "x-profile-org-display-name";
pub const PROFILE_ROLES_HEADER: &str = "x-profile-roles";
pub const PROFILE_TEAM_HEADER: &str = "x-profile-team";
pub const PROFILE_USER_NAME_HEADER: &str = "x-profile-user-name";
pub const PROFILE_USER_EMAIL_HEADER: &str = "x-profile-user-email";

/// Profile fields forwarded by a gateway as base64-encoded headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileHeaders {
    pub org_name: Option<String>,
    pub org_display_name: Option<String>,
    /// Comma-separated in the header.
    pub roles: Vec<String>,
    pub team: Option<String>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
}

impl ProfileHeaders {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Request data consulted by claim processors besides the token.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    actor_id: Option<String>,
    pub profile: ProfileHeaders,
}

impl RequestContext {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let actor_id = [ACTOR_ID_HEADER, LEGACY_ACTOR_ID_HEADER]
            .into_iter()
            .find_map(|name| plain_header(headers, name));

        let roles = decoded_header(headers, PROFILE_ROLES_HEADER)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            actor_id,
            profile: ProfileHeaders {
                org_name: decoded_header(headers, PROFILE_ORG_NAME_HEADER),
                org_display_name: decoded_header(headers, PROFILE_ORG_DISPLAY_NAME_HEADER),
                roles,
                team: decoded_header(headers, PROFILE_TEAM_HEADER),
                user_name: decoded_header(headers, PROFILE_USER_NAME_HEADER),
                user_email: decoded_header(headers, PROFILE_USER_EMAIL_HEADER),
            },
        }
    }

    /// Builder used by tests and internal callers.
    pub fn with_actor_id(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn with_profile(mut self, profile: ProfileHeaders) -> Self {
        self.profile = profile;
        self
    }

    pub fn actor_id(&self) -> Option<&str> {
        self.actor_id.as_deref()
    }
}

fn plain_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

fn decoded_header(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = plain_header(headers, name)?;
    let bytes = match STANDARD.decode(raw.as_bytes()) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(target: "authn.context", header = name, error = %e, "Ignoring undecodable profile header");
            return None;
        }
    };
    match String::from_utf8(bytes) {
        Ok(value) => Some(value.trim().to_string()).filter(|v| !v.is_empty()),
        Err(_) => {
            tracing::debug!(target: "authn.context", header = name, "Ignoring non-UTF-8 profile header");
            None
        }
    }
}
