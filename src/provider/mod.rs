//! Provider abstraction for creating, updating, and deleting cloud
//! resources.

mod cli;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use crate::graph::AttrValue;

pub use cli::{CliProvider, CliProviderError};

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Snapshot of one resource as reported by the provider.
///
/// The attribute map merges the submitted inputs with the runtime values the
/// provider computed (identifier, assigned addresses), so the state record
/// can be diffed against desired attributes on the next run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceSnapshot {
    /// Provider-assigned identifier.
    pub id: String,
    /// Attribute snapshot, inputs merged with computed values.
    pub attrs: BTreeMap<String, AttrValue>,
}

/// Minimal interface implemented by cloud providers.
pub trait Provider {
    /// Provider specific error type returned by operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Creates a resource of `kind` named `name` with resolved attributes.
    fn create<'a>(
        &'a self,
        kind: &'a str,
        name: &'a str,
        attrs: &'a BTreeMap<String, AttrValue>,
    ) -> ProviderFuture<'a, ResourceSnapshot, Self::Error>;

    /// Converges an existing resource to the resolved attributes.
    fn update<'a>(
        &'a self,
        kind: &'a str,
        id: &'a str,
        attrs: &'a BTreeMap<String, AttrValue>,
    ) -> ProviderFuture<'a, ResourceSnapshot, Self::Error>;

    /// Deletes an existing resource.
    fn delete<'a>(&'a self, kind: &'a str, id: &'a str) -> ProviderFuture<'a, (), Self::Error>;
}
