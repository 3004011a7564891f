//! Per-origin claim processing.
//!
//! Each [`ClaimProcessor`] verifies a token through its issuer's
//! [`KeySetConfig`], reads the claims shape of its origin, applies that
//! origin's authorization rules and resolves the identity to a [`User`].
//! The registry dispatches on [`TokenOrigin`]; there is one processor per
//! origin category.

pub mod custom;
pub mod kas;
pub mod keycloak;
pub mod ssa;

pub use custom::CustomProcessor;
pub use kas::KasProcessor;
pub use keycloak::KeycloakProcessor;
pub use ssa::SsaProcessor;

use crate::auth::context::RequestContext;
use crate::auth::keyset_config::KeySetConfig;
use crate::auth::origin::TokenOrigin;
use crate::errors::AuthError;
use crate::models::User;
use async_trait::async_trait;

/// Verifies, authorizes and resolves tokens of one origin category.
#[async_trait]
pub trait ClaimProcessor: Send + Sync {
    /// Origin category this processor handles.
    fn origin(&self) -> TokenOrigin;

    /// Process a raw bearer token issued by `config`'s issuer.
    ///
    /// # Errors
    ///
    /// Any [`AuthError`]; the middleware maps it to a response tagged with
    /// this processor's origin.
    async fn process(
        &self,
        token: &str,
        config: &KeySetConfig,
        ctx: &RequestContext,
    ) -> Result<User, AuthError>;
}

/// The `sub` claim, required to be a non-empty string.
pub(crate) fn required_subject(sub: Option<&str>) -> Result<&str, AuthError> {
    sub.map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AuthError::MissingRequiredClaim("sub".to_string()))
}
