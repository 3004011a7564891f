//! Service layer for the authentication service.
//!
//! Clients for external collaborators.

pub mod profile_sync;

pub use profile_sync::{HttpProfileSyncClient, ProfileSyncRequest, ProfileSyncWorkflow};
