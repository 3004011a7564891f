//! # Authentication Service Test Utilities
//!
//! This crate provides:
//! - Deterministic Ed25519 keypairs that mint signed tokens (`TestKeypair`)
//! - A JWKS endpoint on `wiremock` (`JwksMock`)
//! - Server test harness (`TestAuthServer` for E2E tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use authn_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<()> {
//!     let keypair = TestKeypair::new(1, "key-1");
//!     let jwks = JwksMock::start(vec![keypair.jwk_json()]).await;
//!     let origin = origin_settings("https://sso.test", &jwks.url(), TokenOrigin::Keycloak);
//!     let server = TestAuthServer::spawn(test_config(vec![origin]), store, None).await?;
//!     Ok(())
//! }
//! ```

pub mod jwks_mock;
pub mod keys;
pub mod server_harness;

// Re-export commonly used items
pub use jwks_mock::*;
pub use keys::*;
pub use server_harness::*;
