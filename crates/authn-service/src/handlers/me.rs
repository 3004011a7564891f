//! Current user handler.
//!
//! Returns the user record resolved by the auth middleware.

use crate::auth::TokenOrigin;
use crate::middleware::AuthenticatedUser;
use crate::models::OrgData;
use axum::{Extension, Json};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

/// Response for `/api/v1/me` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MeResponse {
    pub id: Uuid,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub aux_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub starfleet_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub org_data: OrgData,

    /// Origin category of the token that authenticated this request.
    pub origin: TokenOrigin,
}

/// Handler for GET /api/v1/me
///
/// ## Response
///
/// ```json
/// {
///   "id": "5f0c6a1e-0d7e-4a43-9a3a-0e6c2d3f4b5a",
///   "aux_id": "f7a1...",
///   "email": "pat@acme.io",
///   "org_data": {"acme": {"roles": ["admin"], "teams": []}},
///   "origin": "keycloak"
/// }
/// ```
#[instrument(skip_all, name = "authn.handlers.me")]
pub async fn get_me(Extension(auth): Extension<AuthenticatedUser>) -> Json<MeResponse> {
    let user = auth.user;
    Json(MeResponse {
        id: user.id,
        aux_id: user.aux_id,
        starfleet_id: user.starfleet_id,
        email: user.email,
        name: user.name,
        org_data: user.org_data,
        origin: auth.origin,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_me_response_serialization() {
        let response = MeResponse {
            id: Uuid::nil(),
            aux_id: Some("sub-1".to_string()),
            starfleet_id: None,
            email: None,
            name: Some("Pat".to_string()),
            org_data: OrgData::new(),
            origin: TokenOrigin::Kas,
        };

        let json = serde_json::to_string(&response).unwrap();

        assert!(json.contains("\"aux_id\":\"sub-1\""));
        assert!(json.contains("\"origin\":\"kas\""));
        assert!(
            !json.contains("starfleet_id"),
            "starfleet_id should be omitted when None"
        );
    }
}
