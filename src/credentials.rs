//! Opaque credential identifiers resolved to redacted secret values.
//!
//! Stages consume secrets only through this surface so credential material
//! never lands in logs, `Debug` output, or error messages.

use std::collections::BTreeMap;
use std::env;
use std::fmt;

use thiserror::Error;

/// A secret value whose `Debug` and `Display` renderings are redacted.
#[derive(Clone, Eq, PartialEq)]
pub struct Secret(String);

impl Secret {
    /// Wraps a raw secret value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw value. Callers are responsible for keeping it out of
    /// logs and error text.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

/// Opaque identifier addressing one credential in a store.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct CredentialId(String);

impl CredentialId {
    /// Builds an identifier, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::EmptyId`] when the identifier is blank.
    pub fn new(raw: impl Into<String>) -> Result<Self, CredentialError> {
        let trimmed = raw.into().trim().to_owned();
        if trimmed.is_empty() {
            return Err(CredentialError::EmptyId);
        }
        Ok(Self(trimmed))
    }

    /// The identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors raised while resolving credentials.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CredentialError {
    /// Raised when a credential identifier is blank.
    #[error("credential identifier must not be empty")]
    EmptyId,
    /// Raised when a store has no value for the identifier.
    #[error("credential {id} is not available: set {hint}")]
    Missing {
        /// Identifier that could not be resolved.
        id: String,
        /// Guidance on how to supply the value.
        hint: String,
    },
}

/// Source of secret values addressed by opaque identifiers.
pub trait CredentialStore {
    /// Resolves one credential.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Missing`] when the store holds no value
    /// for `id`.
    fn resolve(&self, id: &CredentialId) -> Result<Secret, CredentialError>;
}

/// Store backed by prefixed environment variables.
///
/// Identifier `registry-password` with the default prefix resolves from
/// `ZHURAVEL_CRED_REGISTRY_PASSWORD`.
#[derive(Clone, Debug)]
pub struct EnvCredentialStore {
    prefix: String,
}

/// Default environment prefix for credential variables.
pub const DEFAULT_CREDENTIAL_PREFIX: &str = "ZHURAVEL_CRED";

impl EnvCredentialStore {
    /// Creates a store using the default prefix.
    #[must_use]
    pub fn new() -> Self {
        Self {
            prefix: String::from(DEFAULT_CREDENTIAL_PREFIX),
        }
    }

    /// Creates a store using a custom prefix.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn env_var(&self, id: &CredentialId) -> String {
        let suffix: String = id
            .as_str()
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() {
                    ch.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}_{suffix}", self.prefix)
    }
}

impl Default for EnvCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for EnvCredentialStore {
    fn resolve(&self, id: &CredentialId) -> Result<Secret, CredentialError> {
        let var = self.env_var(id);
        env::var(&var)
            .map(Secret::new)
            .map_err(|_| CredentialError::Missing {
                id: id.as_str().to_owned(),
                hint: var,
            })
    }
}

/// In-memory store for tests and programmatic wiring.
#[derive(Clone, Debug, Default)]
pub struct StaticCredentialStore {
    values: BTreeMap<String, Secret>,
}

impl StaticCredentialStore {
    /// Creates an empty store.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    /// Inserts or replaces one credential.
    pub fn insert(&mut self, id: &CredentialId, secret: Secret) {
        self.values.insert(id.as_str().to_owned(), secret);
    }
}

impl CredentialStore for StaticCredentialStore {
    fn resolve(&self, id: &CredentialId) -> Result<Secret, CredentialError> {
        self.values
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| CredentialError::Missing {
                id: id.as_str().to_owned(),
                hint: String::from("insert the credential into the store"),
            })
    }
}
