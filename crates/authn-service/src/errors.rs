//! Authentication service error types.
//!
//! All errors map to HTTP status codes via [`AuthRejection`]'s `IntoResponse`
//! impl. Validation and authorization failures are 401, authorized callers
//! without roles get 403, and everything internal is 500 with a generic
//! message; the internal cause is logged server-side only.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::jwt::JwtValidationError;
use serde::Serialize;
use thiserror::Error;

/// Source tag used when an error is raised before an origin is known.
pub const MIDDLEWARE_SOURCE: &str = "middleware";

/// Authentication service error type.
///
/// Maps to HTTP status codes:
/// - Header, token, key, claim and scope failures: 401 Unauthorized
/// - NoRolesAssigned: 403 Forbidden
/// - Key set fetch/empty/in-progress, persistence, internal: 500
///
/// Messages never contain key material or the raw token.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingAuthHeader,

    #[error("Invalid Authorization header format")]
    MalformedAuthHeader,

    #[error("Malformed token: {0}")]
    MalformedToken(String),

    #[error("Token issuer is not recognized")]
    UnknownIssuer,

    #[error("Unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("No verification key found: {0}")]
    KeyNotFound(String),

    #[error("Key set for issuer {issuer} is empty or invalid: {reason}")]
    KeySetEmptyOrInvalid { issuer: String, reason: String },

    #[error("Key set update already in progress")]
    KeySetUpdateInProgress,

    #[error("Failed to fetch key set: {0}")]
    KeySetFetch(String),

    #[error("The access token has expired")]
    TokenExpired,

    #[error("Token verification failed: {0}")]
    TokenInvalidSignature(String),

    #[error("Missing required claim: {0}")]
    MissingRequiredClaim(String),

    #[error("Missing required header: {0}")]
    MissingRequiredHeader(String),

    #[error("Token audience {token:?} does not match any configured audience {configured:?}")]
    AudienceMismatch {
        token: Vec<String>,
        configured: Vec<String>,
    },

    #[error("Token is missing required scopes {missing:?}")]
    MissingScope { missing: Vec<String> },

    #[error("Service account tokens are not enabled for issuer {0}")]
    ServiceAccountNotEnabled(String),

    #[error("No roles assigned: {0}")]
    NoRolesAssigned(String),

    #[error("User profile sync failed: {0}")]
    UpstreamUserSyncFailure(String),

    #[error("Persistence error: {0}")]
    PersistenceFailure(String),

    #[error("Internal server error")]
    Internal,
}

impl AuthError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::NoRolesAssigned(_) => 403,
            AuthError::KeySetEmptyOrInvalid { .. }
            | AuthError::KeySetUpdateInProgress
            | AuthError::KeySetFetch(_)
            | AuthError::PersistenceFailure(_)
            | AuthError::Internal => 500,
            _ => 401,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingAuthHeader => "MISSING_AUTH_HEADER",
            AuthError::MalformedAuthHeader => "MALFORMED_AUTH_HEADER",
            AuthError::MalformedToken(_) => "MALFORMED_TOKEN",
            AuthError::UnknownIssuer => "UNKNOWN_ISSUER",
            AuthError::UnsupportedAlgorithm(_) => "UNSUPPORTED_ALGORITHM",
            AuthError::KeyNotFound(_) => "KEY_NOT_FOUND",
            AuthError::KeySetEmptyOrInvalid { .. } => "KEY_SET_EMPTY_OR_INVALID",
            AuthError::KeySetUpdateInProgress => "KEY_SET_UPDATE_IN_PROGRESS",
            AuthError::KeySetFetch(_) => "KEY_SET_FETCH_FAILED",
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::TokenInvalidSignature(_) => "INVALID_TOKEN",
            AuthError::MissingRequiredClaim(_) => "MISSING_REQUIRED_CLAIM",
            AuthError::MissingRequiredHeader(_) => "MISSING_REQUIRED_HEADER",
            AuthError::AudienceMismatch { .. } => "AUDIENCE_MISMATCH",
            AuthError::MissingScope { .. } => "MISSING_SCOPE",
            AuthError::ServiceAccountNotEnabled(_) => "SERVICE_ACCOUNT_NOT_ENABLED",
            AuthError::NoRolesAssigned(_) => "NO_ROLES_ASSIGNED",
            AuthError::UpstreamUserSyncFailure(_) => "USER_SYNC_FAILED",
            AuthError::PersistenceFailure(_) => "PERSISTENCE_ERROR",
            AuthError::Internal => "INTERNAL_ERROR",
        }
    }

    /// Attach the tag of the component that rejected the request.
    pub fn with_source(self, source: impl Into<String>) -> AuthRejection {
        AuthRejection {
            source: source.into(),
            error: self,
        }
    }
}

impl From<JwtValidationError> for AuthError {
    fn from(err: JwtValidationError) -> Self {
        match err {
            JwtValidationError::TokenTooLarge => {
                AuthError::MalformedToken("token exceeds maximum size".to_string())
            }
            JwtValidationError::MalformedToken => {
                AuthError::MalformedToken("token is not a valid JWT".to_string())
            }
            JwtValidationError::MissingIssuer => {
                AuthError::MalformedToken("token has no issuer".to_string())
            }
            JwtValidationError::IatTooFarInFuture => {
                AuthError::TokenInvalidSignature("token issued in the future".to_string())
            }
        }
    }
}

/// Convert sqlx errors to AuthError
impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::PersistenceFailure(err.to_string())
    }
}

/// An [`AuthError`] tagged with the component that produced it.
///
/// This is what the middleware returns to axum.
#[derive(Debug)]
pub struct AuthRejection {
    pub source: String,
    pub error: AuthError,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    source: String,
    message: String,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Log actual error server-side, return generic message to client
            tracing::error!(
                target: "authn.errors",
                source = %self.source,
                error = %self.error,
                "Authentication failed with internal error"
            );
            "An internal error occurred".to_string()
        } else {
            tracing::debug!(
                target: "authn.errors",
                source = %self.source,
                code = self.error.code(),
                "Request rejected"
            );
            self.error.to_string()
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error.code().to_string(),
                source: self.source,
                message,
            },
        };

        let mut response = (status, Json(body)).into_response();

        // Add WWW-Authenticate header for 401 responses
        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) =
                "Bearer realm=\"control-plane\", error=\"invalid_token\"".parse()
            {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        self.with_source(MIDDLEWARE_SOURCE).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::MissingAuthHeader.status_code(), 401);
        assert_eq!(AuthError::UnknownIssuer.status_code(), 401);
        assert_eq!(AuthError::TokenExpired.status_code(), 401);
        assert_eq!(
            AuthError::MissingScope { missing: vec![] }.status_code(),
            401
        );
        assert_eq!(
            AuthError::UpstreamUserSyncFailure("down".to_string()).status_code(),
            401
        );
        assert_eq!(
            AuthError::NoRolesAssigned("acme".to_string()).status_code(),
            403
        );
        assert_eq!(AuthError::KeySetUpdateInProgress.status_code(), 500);
        assert_eq!(
            AuthError::PersistenceFailure("db".to_string()).status_code(),
            500
        );
        assert_eq!(AuthError::Internal.status_code(), 500);
    }

    #[test]
    fn test_audience_mismatch_names_both_sets() {
        let error = AuthError::AudienceMismatch {
            token: vec!["b".to_string()],
            configured: vec!["a".to_string()],
        };
        let message = error.to_string();
        assert!(message.contains("audience"));
        assert!(message.contains("\"b\""));
        assert!(message.contains("\"a\""));
    }

    #[test]
    fn test_jwt_validation_error_conversion() {
        assert!(matches!(
            AuthError::from(JwtValidationError::TokenTooLarge),
            AuthError::MalformedToken(_)
        ));
        assert!(matches!(
            AuthError::from(JwtValidationError::MissingIssuer),
            AuthError::MalformedToken(_)
        ));
        assert!(matches!(
            AuthError::from(JwtValidationError::IatTooFarInFuture),
            AuthError::TokenInvalidSignature(_)
        ));
    }

    #[tokio::test]
    async fn test_into_response_unauthorized_carries_source() {
        let response = AuthError::UnknownIssuer
            .with_source("middleware")
            .into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let www_auth = response.headers().get("WWW-Authenticate").unwrap();
        assert!(www_auth
            .to_str()
            .unwrap()
            .contains("Bearer realm=\"control-plane\""));

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "UNKNOWN_ISSUER");
        assert_eq!(body_json["error"]["source"], "middleware");
        assert_eq!(
            body_json["error"]["message"],
            "Token issuer is not recognized"
        );
    }

    #[tokio::test]
    async fn test_into_response_forbidden() {
        let response = AuthError::NoRolesAssigned("no roles in organization acme".to_string())
            .with_source("keycloak")
            .into_response();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get("WWW-Authenticate").is_none());

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "NO_ROLES_ASSIGNED");
        assert_eq!(body_json["error"]["source"], "keycloak");
    }

    #[tokio::test]
    async fn test_into_response_internal_hides_cause() {
        let response = AuthError::PersistenceFailure("connection refused to 10.0.0.5".to_string())
            .with_source("kas")
            .into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "PERSISTENCE_ERROR");
        assert_eq!(body_json["error"]["message"], "An internal error occurred");
    }
}
