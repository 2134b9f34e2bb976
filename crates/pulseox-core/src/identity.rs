//! Identity verification collaborator.
//!
//! PulseOx does not manage user accounts itself; an external identity
//! service verifies bearer credentials and resolves directory lookups.
//! This module defines the trait the rest of the system depends on, plus
//! an in-memory implementation for tests and local development.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A verified caller identity with profile claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    /// Stable user identifier.
    pub uid: String,

    /// Primary email, when the provider exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Administrator claim.
    #[serde(default)]
    pub admin: bool,
}

/// A directory entry resolved by uid or email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIdentity {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// External identity service interface.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify a bearer credential and return the caller's identity.
    ///
    /// Invalid or expired credentials surface as [`Error::Unauthorized`];
    /// transport failures as [`Error::Upstream`].
    async fn verify(&self, token: &str) -> Result<AuthUser>;

    /// Resolve an external handle (email) to a directory entry.
    async fn find_by_email(&self, email: &str) -> Result<Option<UserIdentity>>;

    /// Resolve a user id to a directory entry.
    async fn find_by_uid(&self, uid: &str) -> Result<Option<UserIdentity>>;
}

/// In-memory identity tables for tests and local development.
#[derive(Default)]
pub struct StaticIdentityVerifier {
    inner: RwLock<StaticTables>,
}

#[derive(Default)]
struct StaticTables {
    /// token -> identity
    tokens: HashMap<String, AuthUser>,
    /// uid -> entry
    users: HashMap<String, UserIdentity>,
}

impl StaticIdentityVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user and a token that authenticates as them.
    pub fn add_user(&self, token: impl Into<String>, uid: impl Into<String>, email: Option<&str>) {
        let uid = uid.into();
        let email = email.map(|e| e.to_string());
        let mut tables = self.inner.write().expect("identity tables poisoned");
        tables.tokens.insert(
            token.into(),
            AuthUser {
                uid: uid.clone(),
                email: email.clone(),
                admin: false,
            },
        );
        tables.users.insert(uid.clone(), UserIdentity { uid, email });
    }

    /// Remove a user from the directory (tokens stay; lookups miss).
    pub fn remove_user(&self, uid: &str) {
        let mut tables = self.inner.write().expect("identity tables poisoned");
        tables.users.remove(uid);
    }
}

#[async_trait]
impl IdentityVerifier for StaticIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<AuthUser> {
        let tables = self.inner.read().expect("identity tables poisoned");
        tables
            .tokens
            .get(token)
            .cloned()
            .ok_or_else(|| Error::Unauthorized("invalid token".into()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserIdentity>> {
        let tables = self.inner.read().expect("identity tables poisoned");
        Ok(tables
            .users
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn find_by_uid(&self, uid: &str) -> Result<Option<UserIdentity>> {
        let tables = self.inner.read().expect("identity tables poisoned");
        Ok(tables.users.get(uid).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_verifier_roundtrip() {
        let verifier = StaticIdentityVerifier::new();
        verifier.add_user("tok-1", "u1", Some("u1@example.com"));

        let user = verifier.verify("tok-1").await.unwrap();
        assert_eq!(user.uid, "u1");

        let found = verifier.find_by_email("u1@example.com").await.unwrap();
        assert_eq!(found.unwrap().uid, "u1");

        assert!(verifier.verify("bogus").await.is_err());
        assert!(verifier.find_by_email("nobody@example.com").await.unwrap().is_none());
    }
}
