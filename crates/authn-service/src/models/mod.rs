//! Authentication service models.
//!
//! Contains the user record and the data types used to create and update it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// A user's standing in one organization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgMembership {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default)]
    pub roles: Vec<String>,

    #[serde(default)]
    pub teams: Vec<String>,
}

/// Organization name to membership.
///
/// Ordered so that stored JSON and equality checks are stable.
pub type OrgData = BTreeMap<String, OrgMembership>;

/// A persisted user record.
///
/// `email` and `name` are redacted in Debug output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,

    /// Identifier assigned by the token issuer (usually `sub`).
    pub aux_id: Option<String>,

    /// Identifier from the legacy actor-identity system.
    pub starfleet_id: Option<String>,

    pub email: Option<String>,

    pub name: Option<String>,

    #[serde(default)]
    pub org_data: OrgData,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("name", &self.name.as_ref().map(|_| "[REDACTED]"))
            .field("org_data", &self.org_data)
            .field("updated_at", &self.updated_at)
            .finish_non_exhaustive()
    }
}

impl User {
    /// Roles held in `org`, if the user is a member.
    pub fn roles_in(&self, org: &str) -> Option<&[String]> {
        self.org_data.get(org).map(|m| m.roles.as_slice())
    }
}

/// Initial values for a user created on first login.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub email: Option<String>,
    pub name: Option<String>,
    pub org_data: OrgData,
}

/// Fields to overwrite on an existing user. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub name: Option<String>,
    pub org_data: Option<OrgData>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.name.is_none() && self.org_data.is_none()
    }

    /// Build an update holding only the fields that differ from `user`.
    pub fn diff(
        user: &User,
        email: Option<&str>,
        name: Option<&str>,
        org_data: Option<&OrgData>,
    ) -> Self {
        let changed = |current: &Option<String>, candidate: Option<&str>| {
            candidate
                .filter(|value| current.as_deref() != Some(*value))
                .map(String::from)
        };

        Self {
            email: changed(&user.email, email),
            name: changed(&user.name, name),
            org_data: org_data.filter(|data| **data != user.org_data).cloned(),
        }
    }

    /// Apply the update in memory.
    pub fn apply_to(&self, user: &mut User) {
        if let Some(email) = &self.email {
            user.email = Some(email.clone());
        }
        if let Some(name) = &self.name {
            user.name = Some(name.clone());
        }
        if let Some(org_data) = &self.org_data {
            user.org_data = org_data.clone();
        }
    }
}

/// Health check response.
///
/// Returned by the `/health` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service health status ("healthy" or "unhealthy").
    pub status: String,

    /// Database connectivity status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}
