//! Token-format utilities shared by services that inspect bearer tokens.
//!
//! This module provides the pieces of JWT handling that happen BEFORE a
//! signature can be verified:
//! - Size limits for DoS prevention
//! - Clock skew constants for iat validation
//! - Unverified header parsing (`alg`, `kid`) for key selection
//! - Unverified issuer extraction for routing a token to its trust origin
//! - iat validation logic
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Nothing returned here is trusted: the header only selects a key and the
//!   issuer only selects a key set. The token MUST still be verified.
//! - Generic error messages prevent information leakage
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{decode_header, extract_unverified_issuer, validate_iat, DEFAULT_CLOCK_SKEW};
//!
//! let header = decode_header(token)?;
//! let issuer = extract_unverified_issuer(token)?;
//! // ... look up the issuer's key set, verify the signature ...
//! validate_iat(claims.iat, DEFAULT_CLOCK_SKEW)?;
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// JWTs larger than this size are rejected BEFORE any base64 decoding or
/// cryptographic operations.
///
/// # Rationale
///
/// - Typical IdP access tokens are 600-2000 bytes (RSA signatures, role lists)
/// - 8KB leaves room for large role claims while bounding allocation
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Default JWT clock skew tolerance (5 minutes per NIST SP 800-63B).
///
/// Tokens with `iat` (issued-at) timestamps more than this amount in the
/// future are rejected. The same value is used as `exp`/`nbf` leeway.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Maximum allowed JWT clock skew tolerance (10 minutes).
///
/// This prevents misconfiguration that could weaken security by allowing
/// excessively large clock skew tolerance.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while inspecting an unverified token.
///
/// Note: Display messages are intentionally generic. Callers that need the
/// distinction (malformed vs. too large) match on the variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token format is invalid (not a valid JWT structure).
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Token payload has no string `iss` claim.
    #[error("The access token is invalid or expired")]
    MissingIssuer,

    /// Token `iat` claim is too far in the future.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,
}

// =============================================================================
// Header Types
// =============================================================================

/// The two header fields consulted for key resolution.
///
/// `alg` is kept as the raw string so that callers can apply their own
/// allow-list, including algorithms the verification library does not model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHeader {
    /// Declared signature algorithm (e.g. `RS256`, `EdDSA`).
    pub alg: String,

    /// Optional key identifier. Empty strings are normalised to `None`.
    pub kid: Option<String>,
}

#[derive(Deserialize)]
struct RawHeader {
    alg: String,
    #[serde(default)]
    kid: Option<serde_json::Value>,
}

// =============================================================================
// Functions
// =============================================================================

/// Split a compact JWT into its three segments after the size check.
fn split_token(token: &str) -> Result<(&str, &str, &str), JwtValidationError> {
    // Check token size first (DoS prevention)
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None)
            if !header.is_empty() && !payload.is_empty() =>
        {
            Ok((header, payload, signature))
        }
        _ => {
            tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
            Err(JwtValidationError::MalformedToken)
        }
    }
}

fn decode_segment(segment: &str) -> Result<serde_json::Value, JwtValidationError> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT segment base64");
        JwtValidationError::MalformedToken
    })?;

    serde_json::from_slice(&bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT segment JSON");
        JwtValidationError::MalformedToken
    })
}

/// Decode the JWT header without verifying the signature.
///
/// # Security
///
/// - Token size is checked BEFORE any parsing
/// - The returned `alg` must be checked against an allow-list by the caller
/// - The `kid` value should only be used for key lookup in a trusted key set
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds `MAX_JWT_SIZE_BYTES`
/// - `MalformedToken` - Wrong structure, bad base64, invalid JSON or no `alg`
pub fn decode_header(token: &str) -> Result<TokenHeader, JwtValidationError> {
    let (header_part, _, _) = split_token(token)?;
    let value = decode_segment(header_part)?;

    let raw: RawHeader = serde_json::from_value(value).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "JWT header missing alg");
        JwtValidationError::MalformedToken
    })?;

    // Only non-empty string kids are usable for lookup
    let kid = raw
        .kid
        .as_ref()
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string);

    Ok(TokenHeader { alg: raw.alg, kid })
}

/// Decode the JWT payload without verifying the signature.
///
/// Used only to route a token to the key set that will verify it.
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds `MAX_JWT_SIZE_BYTES`
/// - `MalformedToken` - Wrong structure, bad base64 or a non-object payload
pub fn decode_unverified_claims(
    token: &str,
) -> Result<serde_json::Map<String, serde_json::Value>, JwtValidationError> {
    let (_, payload_part, _) = split_token(token)?;
    match decode_segment(payload_part)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(JwtValidationError::MalformedToken),
    }
}

/// Read the `iss` claim from an unverified token.
///
/// # Errors
///
/// - `TokenTooLarge` / `MalformedToken` as for [`decode_unverified_claims`]
/// - `MissingIssuer` - `iss` is absent, empty or not a string
pub fn extract_unverified_issuer(token: &str) -> Result<String, JwtValidationError> {
    let claims = decode_unverified_claims(token)?;
    claims
        .get("iss")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or(JwtValidationError::MissingIssuer)
}

/// Validate the `iat` (issued-at) claim with clock skew tolerance.
///
/// Rejects tokens with `iat` too far in the future, which could indicate
/// token pre-generation or clock synchronization issues.
///
/// # Errors
///
/// Returns `JwtValidationError::IatTooFarInFuture` if the iat timestamp is more than
/// `clock_skew` in the future.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_iat_at(iat, clock_skew, now)
}

/// Deterministic `iat` validation against an explicit `now` timestamp.
pub(crate) fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    // Safe cast: clock_skew is bounded to MAX_CLOCK_SKEW (600 seconds), well within i64 range
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now + clock_skew_secs;

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
