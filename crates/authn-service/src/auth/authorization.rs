//! Audience and scope rules shared by claim processors.
//!
//! Both checks accept the claim as a single string or an array of strings.
//! An empty configured list always passes.

use crate::errors::AuthError;
use serde_json::{Map, Value};

/// Default claim names consulted for scopes, in precedence order.
pub const DEFAULT_SCOPE_CLAIM_NAMES: [&str; 3] = ["scope", "scopes", "scp"];

pub fn default_scope_claim_names() -> Vec<String> {
    DEFAULT_SCOPE_CLAIM_NAMES
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn string_values(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => s.split_whitespace().map(String::from).collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

/// The token's `aud` values.
pub fn token_audiences(claims: &Map<String, Value>) -> Vec<String> {
    match claims.get("aud") {
        // A string audience is one value, even if it contains spaces
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        Some(value @ Value::Array(_)) => string_values(value),
        _ => Vec::new(),
    }
}

/// The token's scopes, read from the first claim name that is present.
pub fn token_scopes(claims: &Map<String, Value>, claim_names: &[String]) -> Vec<String> {
    claim_names
        .iter()
        .find_map(|name| claims.get(name.as_str()))
        .map(string_values)
        .unwrap_or_default()
}

/// Require the token audience to intersect `configured`.
///
/// # Errors
///
/// `AudienceMismatch` naming both the token's and the configured audiences.
pub fn validate_audience(
    claims: &Map<String, Value>,
    configured: &[String],
) -> Result<(), AuthError> {
    if configured.is_empty() {
        return Ok(());
    }

    let token = token_audiences(claims);
    if token.iter().any(|aud| configured.contains(aud)) {
        return Ok(());
    }

    tracing::debug!(
        target: "authn.authorization",
        token_audiences = ?token,
        "Token audience not accepted"
    );
    Err(AuthError::AudienceMismatch {
        token,
        configured: configured.to_vec(),
    })
}

/// Require every scope in `required` to be granted by the token.
///
/// # Errors
///
/// `MissingScope` naming the scopes that are absent.
pub fn validate_scope(
    claims: &Map<String, Value>,
    required: &[String],
    claim_names: &[String],
) -> Result<(), AuthError> {
    if required.is_empty() {
        return Ok(());
    }

    let granted = token_scopes(claims, claim_names);
    let missing: Vec<String> = required
        .iter()
        .filter(|scope| !granted.contains(scope))
        .cloned()
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        tracing::debug!(target: "authn.authorization", missing = ?missing, "Token missing required scopes");
        Err(AuthError::MissingScope { missing })
    }
}
