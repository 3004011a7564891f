//! Key resolution and signature verification.
//!
//! Resolution picks the key(s) to verify a token with, based on the header's
//! `alg` and optional `kid`:
//!
//! - With `kid`: direct lookup. A miss triggers one refresh-with-retry
//!   sequence and a second lookup; still missing is `KeyNotFound`.
//! - Without `kid`: every key matching `alg` is tried, signing-use keys
//!   first. If none verifies, one refresh-with-retry sequence runs and the
//!   refreshed candidates are tried once more.
//!
//! The algorithm allow-list is checked before any lookup.

use crate::auth::keyset::{is_key_mismatch, SigningAlgorithm, VerificationKey, VerificationRules};
use crate::auth::keyset_config::KeySetConfig;
use crate::errors::AuthError;
use common::jwt::TokenHeader;
use jsonwebtoken::errors::ErrorKind;
use serde::de::DeserializeOwned;
use tracing::instrument;

/// Longest header `alg` echoed back in an error message.
const MAX_ALG_ECHO: usize = 32;

enum CandidateFailure {
    /// No candidate produced the signature.
    NoMatch(Option<jsonwebtoken::errors::Error>),
    /// A candidate produced the signature but the claims were rejected.
    Rejected(AuthError),
}

/// Resolve the verification key for `token` and decode its claims.
#[instrument(skip_all, fields(issuer = %config.issuer(), alg = %header.alg, kid = ?header.kid))]
pub async fn resolve_and_verify<T: DeserializeOwned>(
    config: &KeySetConfig,
    token: &str,
    header: &TokenHeader,
    rules: &VerificationRules,
) -> Result<T, AuthError> {
    let alg = SigningAlgorithm::parse(&header.alg).ok_or_else(|| {
        tracing::debug!(target: "authn.resolver", "Token algorithm not in allow-list");
        AuthError::UnsupportedAlgorithm(header.alg.chars().take(MAX_ALG_ECHO).collect())
    })?;

    match header.kid.as_deref() {
        Some(kid) => verify_with_kid(config, token, kid, alg, rules).await,
        None => verify_without_kid(config, token, alg, rules).await,
    }
}

async fn verify_with_kid<T: DeserializeOwned>(
    config: &KeySetConfig,
    token: &str,
    kid: &str,
    alg: SigningAlgorithm,
    rules: &VerificationRules,
) -> Result<T, AuthError> {
    let key = match config.get_key_by_id(kid).await {
        Some(key) => key,
        None => {
            tracing::debug!(target: "authn.resolver", kid = %kid, "Key id not cached, refreshing key set");
            config.refresh_with_retry().await?;
            config.get_key_by_id(kid).await.ok_or_else(|| {
                tracing::warn!(target: "authn.resolver", kid = %kid, "Key id not found after refresh");
                AuthError::KeyNotFound(format!("key id '{kid}'"))
            })?
        }
    };

    key.verify(token, alg, rules)
        .map_err(|e| verification_error(&e))
}

async fn verify_without_kid<T: DeserializeOwned>(
    config: &KeySetConfig,
    token: &str,
    alg: SigningAlgorithm,
    rules: &VerificationRules,
) -> Result<T, AuthError> {
    let candidates = config.keys_for_algorithm(alg).await;
    let first_failure = match try_candidates(&candidates, token, alg, rules) {
        Ok(claims) => return Ok(claims),
        Err(CandidateFailure::Rejected(e)) => return Err(e),
        Err(CandidateFailure::NoMatch(last)) => last,
    };

    tracing::debug!(
        target: "authn.resolver",
        candidates = candidates.len(),
        "No candidate key verified the token, refreshing key set"
    );
    config.refresh_with_retry().await?;

    let candidates = config.keys_for_algorithm(alg).await;
    match try_candidates(&candidates, token, alg, rules) {
        Ok(claims) => Ok(claims),
        Err(CandidateFailure::Rejected(e)) => Err(e),
        Err(CandidateFailure::NoMatch(last)) => match last.or(first_failure) {
            Some(err) => Err(verification_error(&err)),
            None => Err(AuthError::KeyNotFound(format!(
                "no key for algorithm {alg}"
            ))),
        },
    }
}

/// Try each candidate in order, returning the first that verifies.
fn try_candidates<T: DeserializeOwned>(
    candidates: &[VerificationKey],
    token: &str,
    alg: SigningAlgorithm,
    rules: &VerificationRules,
) -> Result<T, CandidateFailure> {
    let mut last_error = None;
    for key in candidates {
        match key.verify(token, alg, rules) {
            Ok(claims) => {
                tracing::debug!(target: "authn.resolver", kid = ?key.kid(), "Token verified by candidate key");
                return Ok(claims);
            }
            Err(e) if is_key_mismatch(&e) => last_error = Some(e),
            Err(e) => return Err(CandidateFailure::Rejected(verification_error(&e))),
        }
    }
    Err(CandidateFailure::NoMatch(last_error))
}

/// Map a verification failure to the error surfaced to callers.
pub fn verification_error(err: &jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        ErrorKind::ImmatureSignature => {
            AuthError::TokenInvalidSignature("token is not yet valid".to_string())
        }
        ErrorKind::InvalidIssuer => {
            AuthError::TokenInvalidSignature("token issuer does not match".to_string())
        }
        ErrorKind::MissingRequiredClaim(claim) => AuthError::MissingRequiredClaim(claim.clone()),
        ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Utf8(_) | ErrorKind::Json(_) => {
            AuthError::MalformedToken("token could not be decoded".to_string())
        }
        _ => AuthError::TokenInvalidSignature("signature verification failed".to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use jsonwebtoken::errors::Error;

    #[test]
    fn test_verification_error_mapping() {
        assert!(matches!(
            verification_error(&Error::from(ErrorKind::ExpiredSignature)),
            AuthError::TokenExpired
        ));
        assert!(matches!(
            verification_error(&Error::from(ErrorKind::InvalidSignature)),
            AuthError::TokenInvalidSignature(_)
        ));
        assert!(matches!(
            verification_error(&Error::from(ErrorKind::MissingRequiredClaim("exp".to_string()))),
            AuthError::MissingRequiredClaim(c) if c == "exp"
        ));
        assert!(matches!(
            verification_error(&Error::from(ErrorKind::InvalidToken)),
            AuthError::MalformedToken(_)
        ));
    }

    #[test]
    fn test_key_mismatch_classification() {
        assert!(is_key_mismatch(&Error::from(ErrorKind::InvalidSignature)));
        assert!(is_key_mismatch(&Error::from(ErrorKind::InvalidAlgorithm)));
        assert!(!is_key_mismatch(&Error::from(ErrorKind::ExpiredSignature)));
        assert!(!is_key_mismatch(&Error::from(ErrorKind::InvalidIssuer)));
    }
}
