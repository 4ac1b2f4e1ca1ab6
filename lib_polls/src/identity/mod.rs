//! # Identity
//!
//! Verification of presented credentials and role checks. Issuing
//! credentials is somebody else's job; the voting core only needs to know who
//! is calling and with which role.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::error::AuthError;

/// Roles known to the polls service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Moderator,
    User,
}

/// The verified caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable identity recorded in a poll's voter list.
    pub identity: String,
    /// Display name recorded as a poll's creator.
    pub username: String,
    pub role: Role,
}

impl Principal {
    pub fn authorize(&self, allowed: &[Role]) -> Result<(), AuthError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }
}

/// Turns a presented credential into a `Principal`.
pub trait IdentityProvider: Send + Sync {
    fn verify(&self, credential: &str) -> Result<Principal, AuthError>;
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_credential(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::Missing)?;
    let mut parts = header.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Ok(token),
        _ => Err(AuthError::Invalid),
    }
}

#[derive(Debug, Error)]
pub enum TokenTableError {
    #[error("failed to read token file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse token file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// # Token Table
///
/// A fixed map of opaque bearer tokens to principals, loaded from a JSON
/// object of the form `{"<token>": {"identity", "username", "role"}}`.
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    tokens: HashMap<String, Principal>,
}

impl TokenTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, principal: Principal) -> Self {
        self.insert(token, principal);
        self
    }

    pub fn insert(&mut self, token: impl Into<String>, principal: Principal) {
        self.tokens.insert(token.into(), principal);
    }

    pub fn from_json_str(json: &str) -> Result<Self, TokenTableError> {
        let tokens: HashMap<String, Principal> = serde_json::from_str(json)?;
        Ok(Self { tokens })
    }

    pub fn load(path: &Path) -> Result<Self, TokenTableError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl IdentityProvider for TokenTable {
    fn verify(&self, credential: &str) -> Result<Principal, AuthError> {
        if credential.is_empty() {
            return Err(AuthError::Missing);
        }
        self.tokens.get(credential).cloned().ok_or(AuthError::Invalid)
    }
}
