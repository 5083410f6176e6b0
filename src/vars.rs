//! Variable declarations and invocation-time bindings.
//!
//! A manifest declares variables with optional defaults; bindings supplied
//! at invocation override those defaults. The whole-manifest unbound check
//! runs before any provider call so a missing value never causes a partial
//! apply.

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;

use crate::graph::{AttrValue, Manifest};

/// A manifest-declared variable.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct VarDecl {
    /// Value used when no binding is supplied at invocation.
    #[serde(default)]
    pub default: Option<AttrValue>,
}

/// Errors raised while parsing or checking variable bindings.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum VarError {
    /// Raised when a `NAME=VALUE` binding argument has no `=`.
    #[error("invalid variable binding '{raw}': expected NAME=VALUE")]
    InvalidBinding {
        /// Argument that could not be split.
        raw: String,
    },
    /// Raised when a binding name is empty.
    #[error("variable binding with an empty name")]
    EmptyName,
    /// Raised when referenced variables have neither a binding nor a default.
    #[error("unbound variables: {}", variables.join(", "))]
    Unbound {
        /// Names of the unbound variables, sorted.
        variables: Vec<String>,
    },
}

/// A flat name → scalar binding set supplied at invocation time.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Bindings {
    values: BTreeMap<String, AttrValue>,
}

impl Bindings {
    /// Creates an empty binding set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    /// Parses repeated `NAME=VALUE` arguments into a binding set.
    ///
    /// Values that parse as integers or booleans become typed scalars;
    /// everything else stays a string.
    ///
    /// # Errors
    ///
    /// Returns [`VarError::InvalidBinding`] when an argument has no `=` and
    /// [`VarError::EmptyName`] when the name half is blank.
    pub fn from_args<I, S>(args: I) -> Result<Self, VarError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut bindings = Self::new();
        for arg in args {
            let raw = arg.as_ref();
            let Some((name, value)) = raw.split_once('=') else {
                return Err(VarError::InvalidBinding {
                    raw: raw.to_owned(),
                });
            };
            let trimmed = name.trim();
            if trimmed.is_empty() {
                return Err(VarError::EmptyName);
            }
            bindings.set(trimmed, parse_scalar(value));
        }
        Ok(bindings)
    }

    /// Inserts or replaces one binding.
    pub fn set(&mut self, name: impl Into<String>, value: AttrValue) {
        self.values.insert(name.into(), value);
    }

    /// Resolves `name` against bindings first, then manifest defaults.
    #[must_use]
    pub fn lookup(&self, manifest: &Manifest, name: &str) -> Option<AttrValue> {
        if let Some(value) = self.values.get(name) {
            return Some(value.clone());
        }
        manifest
            .vars()
            .get(name)
            .and_then(|decl| decl.default.clone())
    }

    /// Returns referenced variables with neither a binding nor a default.
    #[must_use]
    pub fn unbound(&self, manifest: &Manifest) -> Vec<String> {
        manifest
            .referenced_variables()
            .into_iter()
            .filter(|name| self.lookup(manifest, name).is_none())
            .collect()
    }

    /// Fails fast when any referenced variable is unbound.
    ///
    /// # Errors
    ///
    /// Returns [`VarError::Unbound`] naming every unbound variable.
    pub fn ensure_bound(&self, manifest: &Manifest) -> Result<(), VarError> {
        let variables = self.unbound(manifest);
        if variables.is_empty() {
            Ok(())
        } else {
            Err(VarError::Unbound { variables })
        }
    }
}

fn parse_scalar(raw: &str) -> AttrValue {
    if let Ok(value) = raw.parse::<i64>() {
        return AttrValue::Number(value);
    }
    match raw {
        "true" => AttrValue::Bool(true),
        "false" => AttrValue::Bool(false),
        _ => AttrValue::String(raw.to_owned()),
    }
}
