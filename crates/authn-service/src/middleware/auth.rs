//! Authentication middleware for protected routes.
//!
//! Extracts the Bearer token, reads its issuer without verifying it, looks
//! the issuer up in the [`OriginRegistry`] and hands the token to the
//! matching claim processor. The resolved user is stored in request
//! extensions for handlers.

use crate::auth::{OriginRegistry, RequestContext, TokenOrigin};
use crate::errors::{AuthError, AuthRejection, MIDDLEWARE_SOURCE};
use crate::models::User;
use crate::observability::metrics;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::IntoResponse,
};
use common::jwt::extract_unverified_issuer;
use std::sync::Arc;
use tracing::instrument;

/// Metric label for rejections that happen before an origin is known.
const UNKNOWN_ORIGIN: &str = "unknown";

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub registry: Arc<OriginRegistry>,
}

/// Identity attached to an authenticated request.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user: User,
    pub origin: TokenOrigin,
    pub issuer: String,
}

/// Extract the token from an `Authorization: Bearer <token>` header.
fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::MalformedAuthHeader)?;

    // Auth schemes are case-insensitive (RFC 7235)
    let (scheme, token) = value
        .split_once(' ')
        .ok_or(AuthError::MalformedAuthHeader)?;
    if !scheme.eq_ignore_ascii_case("Bearer") {
        return Err(AuthError::MalformedAuthHeader);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MalformedAuthHeader);
    }
    Ok(token)
}

fn reject(error: AuthError, origin: Option<TokenOrigin>) -> AuthRejection {
    let label = origin.map_or(UNKNOWN_ORIGIN, TokenOrigin::as_str);
    metrics::record_token_validation(label, error.code());
    error.with_source(origin.map_or(MIDDLEWARE_SOURCE, TokenOrigin::as_str))
}

/// Authentication middleware.
///
/// # Authorization Header Format
///
/// ```text
/// Authorization: Bearer <token>
/// ```
///
/// # Response
///
/// - Rejections carry the origin of the processor that failed, or
///   `middleware` when the token never reached one
/// - On success the request continues with [`AuthenticatedUser`] in its
///   extensions
#[instrument(skip_all, name = "authn.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, AuthRejection> {
    let token = bearer_token(req.headers()).map_err(|e| {
        tracing::debug!(target: "authn.middleware", error = %e, "Rejecting request without usable bearer token");
        reject(e, None)
    })?;

    let issuer = extract_unverified_issuer(token).map_err(|e| reject(e.into(), None))?;

    let (config, processor) = state
        .registry
        .resolve_processor(&issuer)
        .await
        .ok_or_else(|| {
            tracing::debug!(target: "authn.middleware", issuer = %issuer, "Token from unknown issuer");
            reject(AuthError::UnknownIssuer, None)
        })?;

    let origin = processor.origin();
    let ctx = RequestContext::from_headers(req.headers());

    let user = processor
        .process(token, &config, &ctx)
        .await
        .map_err(|e| reject(e, Some(origin)))?;

    metrics::record_token_validation(origin.as_str(), "success");
    tracing::debug!(target: "authn.middleware", origin = %origin, user_id = %user.id, "Request authenticated");

    req.extensions_mut().insert(AuthenticatedUser {
        user,
        origin,
        issuer,
    });

    Ok(next.run(req).await)
}
