//! Authentication service configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use crate::auth::authorization::DEFAULT_SCOPE_CLAIM_NAMES;
use crate::auth::keyset_config::{
    KeySetPolicy, DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_ATTEMPTS, DEFAULT_REFRESH_THROTTLE,
    DEFAULT_RETRY_DELAY,
};
use crate::auth::origin::TokenOrigin;
use crate::auth::processors::kas::DEFAULT_PROFILE_STALENESS;
use crate::auth::processors::ssa::DEFAULT_PARTNER_SCOPE;
use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::SecretString;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// One trusted token issuer, as listed in `AUTHN_ORIGINS`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OriginSettings {
    /// Exact `iss` value of tokens from this origin.
    pub issuer: String,

    /// JWKS endpoint.
    pub jwks_url: String,

    pub origin: TokenOrigin,

    /// Name used for third-party organizations (defaults to the issuer).
    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub allow_service_accounts: bool,

    /// Accepted `aud` values. Empty accepts any audience.
    #[serde(default)]
    pub audiences: Vec<String>,

    /// Scopes every token must carry. Empty requires none.
    #[serde(default)]
    pub required_scopes: Vec<String>,
}

/// Authentication service configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Database URL is redacted in Debug output to prevent credential leakage.
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Leeway for `exp`/`nbf` and the `iat` future bound.
    pub jwt_clock_skew: Duration,

    /// Minimum interval between refreshes of one key set (default: 10s).
    pub keyset_refresh_throttle: Duration,

    /// Timeout for one JWKS fetch (default: 5s).
    pub keyset_fetch_timeout: Duration,

    /// Attempts in one refresh-with-retry sequence (default: 5).
    pub key_resolution_max_attempts: u32,

    /// Spacing between refresh-with-retry attempts (default: 1s).
    pub key_resolution_retry_delay: Duration,

    /// Age after which a legacy gateway user's profile is re-synced (default: 60s).
    pub profile_staleness: Duration,

    /// Claim names read for scopes, in precedence order.
    pub scope_claim_names: Vec<String>,

    /// Scope partner service tokens must carry.
    pub partner_required_scope: String,

    /// Profile-sync workflow endpoint. Required when a `kas` origin is configured.
    pub profile_sync_url: Option<String>,

    /// Bearer token for the workflow engine.
    pub profile_sync_token: Option<SecretString>,

    /// Fetch every key set once at startup.
    pub warm_up_key_sets: bool,

    /// Trusted issuers.
    pub origins: Vec<OriginSettings>,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("jwt_clock_skew", &self.jwt_clock_skew)
            .field("keyset_refresh_throttle", &self.keyset_refresh_throttle)
            .field("keyset_fetch_timeout", &self.keyset_fetch_timeout)
            .field(
                "key_resolution_max_attempts",
                &self.key_resolution_max_attempts,
            )
            .field(
                "key_resolution_retry_delay",
                &self.key_resolution_retry_delay,
            )
            .field("profile_staleness", &self.profile_staleness)
            .field("scope_claim_names", &self.scope_claim_names)
            .field("partner_required_scope", &self.partner_required_scope)
            .field("profile_sync_url", &self.profile_sync_url)
            .field("profile_sync_token", &self.profile_sync_token)
            .field("warm_up_key_sets", &self.warm_up_key_sets)
            .field("origins", &self.origins)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Invalid origin configuration: {0}")]
    InvalidOrigins(String),
}

/// Parse an unsigned integer variable, falling back to `default`.
fn parse_u64(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
    min: u64,
) -> Result<u64, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: u64 = value_str.trim().parse().map_err(|e| {
        ConfigError::InvalidValue(format!(
            "{name} must be a valid non-negative integer, got '{value_str}': {e}"
        ))
    })?;

    if value < min {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be at least {min}, got {value}"
        )));
    }

    Ok(value)
}

fn parse_bool(vars: &HashMap<String, String>, name: &str, default: bool) -> Result<bool, ConfigError> {
    match vars.get(name).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if v == "true" || v == "1" => Ok(true),
        Some(v) if v == "false" || v == "0" => Ok(false),
        Some(v) => Err(ConfigError::InvalidValue(format!(
            "{name} must be true or false, got '{v}'"
        ))),
    }
}

fn parse_origins(value: &str) -> Result<Vec<OriginSettings>, ConfigError> {
    let origins: Vec<OriginSettings> = serde_json::from_str(value).map_err(|e| {
        ConfigError::InvalidOrigins(format!("AUTHN_ORIGINS must be a JSON array of origins: {e}"))
    })?;

    let mut seen = HashSet::new();
    for origin in &origins {
        if origin.issuer.trim().is_empty() {
            return Err(ConfigError::InvalidOrigins(
                "origin issuer must not be empty".to_string(),
            ));
        }
        if !seen.insert(origin.issuer.as_str()) {
            return Err(ConfigError::InvalidOrigins(format!(
                "duplicate issuer '{}'",
                origin.issuer
            )));
        }
    }

    Ok(origins)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = vars
            .get("DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?
            .clone();

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        // Parse JWT clock skew tolerance with validation
        let jwt_clock_skew = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: i64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid integer, got '{value_str}': {e}"
                ))
            })?;

            if value <= 0 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be positive, got {value}"
                )));
            }

            let value = value.unsigned_abs();
            if value > MAX_CLOCK_SKEW.as_secs() {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {value}",
                    MAX_CLOCK_SKEW.as_secs()
                )));
            }

            Duration::from_secs(value)
        } else {
            DEFAULT_CLOCK_SKEW
        };

        let keyset_refresh_throttle = Duration::from_secs(parse_u64(
            vars,
            "KEYSET_REFRESH_THROTTLE_SECONDS",
            DEFAULT_REFRESH_THROTTLE.as_secs(),
            0,
        )?);

        let keyset_fetch_timeout = Duration::from_secs(parse_u64(
            vars,
            "KEYSET_FETCH_TIMEOUT_SECONDS",
            DEFAULT_FETCH_TIMEOUT.as_secs(),
            1,
        )?);

        let max_attempts = parse_u64(
            vars,
            "KEY_RESOLUTION_MAX_ATTEMPTS",
            u64::from(DEFAULT_MAX_ATTEMPTS),
            1,
        )?;
        let key_resolution_max_attempts = u32::try_from(max_attempts).map_err(|_| {
            ConfigError::InvalidValue(format!(
                "KEY_RESOLUTION_MAX_ATTEMPTS is too large, got {max_attempts}"
            ))
        })?;

        let key_resolution_retry_delay = Duration::from_millis(parse_u64(
            vars,
            "KEY_RESOLUTION_RETRY_DELAY_MS",
            u64::try_from(DEFAULT_RETRY_DELAY.as_millis()).unwrap_or(1000),
            0,
        )?);

        let profile_staleness = Duration::from_secs(parse_u64(
            vars,
            "PROFILE_STALENESS_SECONDS",
            DEFAULT_PROFILE_STALENESS.as_secs(),
            1,
        )?);

        let scope_claim_names: Vec<String> = match vars.get("SCOPE_CLAIM_NAMES") {
            Some(value) => value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            None => DEFAULT_SCOPE_CLAIM_NAMES
                .iter()
                .map(ToString::to_string)
                .collect(),
        };
        if scope_claim_names.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SCOPE_CLAIM_NAMES must name at least one claim".to_string(),
            ));
        }

        let partner_required_scope = vars
            .get("PARTNER_REQUIRED_SCOPE")
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| DEFAULT_PARTNER_SCOPE.to_string());
        if partner_required_scope.is_empty() {
            return Err(ConfigError::InvalidValue(
                "PARTNER_REQUIRED_SCOPE must not be empty".to_string(),
            ));
        }

        let profile_sync_url = vars
            .get("PROFILE_SYNC_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let profile_sync_token = vars
            .get("PROFILE_SYNC_TOKEN")
            .filter(|s| !s.is_empty())
            .map(|s| SecretString::from(s.clone()));

        let warm_up_key_sets = parse_bool(vars, "KEYSET_WARM_UP", true)?;

        let origins = match vars.get("AUTHN_ORIGINS") {
            Some(value) => parse_origins(value)?,
            None => Vec::new(),
        };

        if profile_sync_url.is_none() && origins.iter().any(|o| o.origin == TokenOrigin::Kas) {
            return Err(ConfigError::MissingEnvVar(
                "PROFILE_SYNC_URL (required for kas origins)".to_string(),
            ));
        }

        Ok(Config {
            database_url,
            bind_address,
            jwt_clock_skew,
            keyset_refresh_throttle,
            keyset_fetch_timeout,
            key_resolution_max_attempts,
            key_resolution_retry_delay,
            profile_staleness,
            scope_claim_names,
            partner_required_scope,
            profile_sync_url,
            profile_sync_token,
            warm_up_key_sets,
            origins,
        })
    }

    /// Timing policy applied to every key set.
    pub fn keyset_policy(&self) -> KeySetPolicy {
        KeySetPolicy {
            refresh_throttle: self.keyset_refresh_throttle,
            fetch_timeout: self.keyset_fetch_timeout,
            max_attempts: self.key_resolution_max_attempts,
            retry_delay: self.key_resolution_retry_delay,
            clock_skew: self.jwt_clock_skew,
        }
    }
}
