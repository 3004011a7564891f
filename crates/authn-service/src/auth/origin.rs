//! Token origin categories.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Coarse category of token source. Selects the claim processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenOrigin {
    /// Internal identity provider (Keycloak realm).
    Keycloak,
    /// Legacy gateway tokens (KAS).
    Kas,
    /// Partner service-to-service tokens (SSA).
    Ssa,
    /// Arbitrary third-party OIDC issuer.
    Custom,
}

impl TokenOrigin {
    pub const ALL: [TokenOrigin; 4] = [
        TokenOrigin::Keycloak,
        TokenOrigin::Kas,
        TokenOrigin::Ssa,
        TokenOrigin::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TokenOrigin::Keycloak => "keycloak",
            TokenOrigin::Kas => "kas",
            TokenOrigin::Ssa => "ssa",
            TokenOrigin::Custom => "custom",
        }
    }
}

impl fmt::Display for TokenOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keycloak" => Ok(TokenOrigin::Keycloak),
            "kas" => Ok(TokenOrigin::Kas),
            "ssa" => Ok(TokenOrigin::Ssa),
            "custom" => Ok(TokenOrigin::Custom),
            other => Err(format!("unknown token origin '{other}'")),
        }
    }
}
