//! Token authentication and authorization.
//!
//! # Components
//!
//! - `keyset` / `keyset_config` - JWKS parsing and the per-issuer key cache
//! - `resolver` - picks the verification key for a token
//! - `registry` - issuer and origin lookup
//! - `processors` - per-origin claim handling
//! - `authorization` - audience and scope checks
//! - `context` - gateway-supplied request headers

pub mod authorization;
pub mod claims;
pub mod context;
pub mod keyset;
pub mod keyset_config;
pub mod origin;
pub mod processors;
pub mod registry;
pub mod resolver;

pub use context::RequestContext;
pub use keyset_config::{KeySetConfig, KeySetPolicy};
pub use origin::TokenOrigin;
pub use processors::ClaimProcessor;
pub use registry::{build_registry, OriginRegistry, RegistryError};
