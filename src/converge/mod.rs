//! Convergence of a declared manifest against the provider: dry-run
//! planning, ordered apply with per-action state persistence, and reverse
//! order teardown.
//!
//! Apply holds the environment lease for its whole duration and saves the
//! state record after every provider call, so a failed run leaves
//! per-declaration status flags rather than an opaque partial blob.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::graph::{AttrValue, Manifest, ResourceDecl, expr, expr::ExprSegment};
use crate::lock::{Lease, LeaseError, LeaseOptions};
use crate::provider::Provider;
use crate::state::{ResourceState, ResourceStatus, StateError, StateRecord, StateStore};
use crate::vars::Bindings;

/// One planned convergence action.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PlannedAction {
    /// The declaration has no recorded resource; create it.
    Create {
        /// Logical name of the declaration.
        name: String,
    },
    /// The recorded resource differs from the desired attributes.
    Update {
        /// Logical name of the declaration.
        name: String,
    },
    /// The recorded resource is no longer declared; delete it.
    Delete {
        /// Logical name of the recorded resource.
        name: String,
    },
    /// The recorded resource already matches the desired attributes.
    Noop {
        /// Logical name of the declaration.
        name: String,
    },
}

impl PlannedAction {
    /// Logical name the action applies to.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Create { name } | Self::Update { name } | Self::Delete { name } | Self::Noop { name } => {
                name
            }
        }
    }
}

impl fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create { name } => write!(f, "+ create {name}"),
            Self::Update { name } => write!(f, "~ update {name}"),
            Self::Delete { name } => write!(f, "- delete {name}"),
            Self::Noop { name } => write!(f, "  noop   {name}"),
        }
    }
}

/// The ordered action set produced by a dry run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConvergePlan {
    /// Actions in execution order: deletes first, then declarations in
    /// dependency order.
    pub actions: Vec<PlannedAction>,
}

impl ConvergePlan {
    /// Returns `true` when every action is a noop.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.actions
            .iter()
            .all(|action| matches!(action, PlannedAction::Noop { .. }))
    }

    /// Number of actions that would mutate the provider.
    #[must_use]
    pub fn pending_changes(&self) -> usize {
        self.actions
            .iter()
            .filter(|action| !matches!(action, PlannedAction::Noop { .. }))
            .count()
    }
}

/// Counters describing one completed convergence run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ConvergeSummary {
    /// Resources created.
    pub created: usize,
    /// Resources updated.
    pub updated: usize,
    /// Resources deleted.
    pub deleted: usize,
    /// Declarations already converged.
    pub unchanged: usize,
    /// State serial after the run.
    pub serial: u64,
}

/// Errors surfaced while planning or converging.
#[derive(Debug, Error)]
pub enum ConvergeError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised before any provider call when referenced variables are
    /// unbound.
    #[error("unbound variables: {}", variables.join(", "))]
    Unbound {
        /// Names of the unbound variables, sorted.
        variables: Vec<String>,
    },
    /// Raised when the state record cannot be loaded or saved.
    #[error(transparent)]
    State(#[from] StateError),
    /// Raised when the environment lease cannot be acquired.
    #[error(transparent)]
    Lease(#[from] LeaseError),
    /// Raised when an attribute expression cannot be resolved at apply
    /// time.
    #[error("cannot resolve {declaration}.{attribute}: {message}")]
    Resolve {
        /// Declaration holding the attribute.
        declaration: String,
        /// Attribute that failed to resolve.
        attribute: String,
        /// Description of the failure.
        message: String,
    },
    /// Raised when the provider rejects an operation; names the offending
    /// declaration.
    #[error("failed to converge {declaration}: {source}")]
    Apply {
        /// Declaration whose provider call failed.
        declaration: String,
        /// Provider error.
        #[source]
        source: E,
    },
    /// Raised when deleting a recorded resource fails.
    #[error("failed to delete {declaration}: {source}")]
    Delete {
        /// Recorded resource whose delete failed.
        declaration: String,
        /// Provider error.
        #[source]
        source: E,
    },
}

/// Converges manifests against a provider, owning the state record.
#[derive(Debug)]
pub struct Provisioner<P: Provider> {
    provider: P,
    store: StateStore,
    lease_options: LeaseOptions,
}

impl<P: Provider> Provisioner<P> {
    /// Creates a provisioner over the given provider and state store.
    #[must_use]
    pub fn new(provider: P, store: StateStore) -> Self {
        Self {
            provider,
            store,
            lease_options: LeaseOptions::default(),
        }
    }

    /// Overrides lease acquisition options.
    #[must_use]
    pub const fn with_lease_options(mut self, options: LeaseOptions) -> Self {
        self.lease_options = options;
        self
    }

    /// The state store backing this provisioner.
    #[must_use]
    pub const fn store(&self) -> &StateStore {
        &self.store
    }

    /// Computes the ordered action set without executing anything.
    ///
    /// Dry run: no lease is taken and the provider is never called.
    ///
    /// # Errors
    ///
    /// Returns [`ConvergeError::Unbound`] when referenced variables are
    /// unbound and [`ConvergeError::State`] when the record cannot be
    /// loaded.
    pub fn plan(
        &self,
        manifest: &Manifest,
        bindings: &Bindings,
    ) -> Result<ConvergePlan, ConvergeError<P::Error>> {
        ensure_bound(manifest, bindings)?;
        let record = self.store.load()?;
        Ok(compute_plan(manifest, bindings, &record))
    }

    /// Converges real infrastructure to the declared state.
    ///
    /// Refuses to proceed when any referenced variable is unbound; holds
    /// the environment lease for the duration; persists the state record
    /// after every action. On provider failure the offending declaration
    /// is recorded as failed and named in the returned error. Re-running
    /// against converged state performs no provider calls.
    ///
    /// # Errors
    ///
    /// Returns [`ConvergeError`] when the unbound check, lease, state IO,
    /// attribute resolution, or a provider call fails.
    pub async fn apply(
        &self,
        manifest: &Manifest,
        bindings: &Bindings,
    ) -> Result<ConvergeSummary, ConvergeError<P::Error>> {
        ensure_bound(manifest, bindings)?;
        let lease = Lease::acquire(
            self.store.dir(),
            self.store.environment(),
            &self.lease_options,
        )?;

        let mut record = self.store.load()?;
        let plan = compute_plan(manifest, bindings, &record);
        let mut summary = ConvergeSummary::default();

        for action in &plan.actions {
            match action {
                PlannedAction::Delete { name } => {
                    self.delete_recorded(&mut record, name).await?;
                    summary.deleted += 1;
                }
                PlannedAction::Create { name } => {
                    self.converge_declaration(manifest, bindings, &mut record, name, false)
                        .await?;
                    summary.created += 1;
                }
                PlannedAction::Update { name } => {
                    self.converge_declaration(manifest, bindings, &mut record, name, true)
                        .await?;
                    summary.updated += 1;
                }
                PlannedAction::Noop { name } => {
                    tracing::debug!(declaration = %name, "already converged");
                    summary.unchanged += 1;
                }
            }
        }

        record.serial += 1;
        summary.serial = record.serial;
        self.store.save(&record)?;
        lease.release()?;
        Ok(summary)
    }

    /// Deletes all recorded resources in reverse dependency order.
    ///
    /// Resources without a provider identifier (recorded pending or failed
    /// before creation) are pruned from the record without a provider
    /// call.
    ///
    /// # Errors
    ///
    /// Returns [`ConvergeError`] when the lease, state IO, or a provider
    /// delete fails.
    pub async fn destroy(
        &self,
        manifest: &Manifest,
    ) -> Result<ConvergeSummary, ConvergeError<P::Error>> {
        let lease = Lease::acquire(
            self.store.dir(),
            self.store.environment(),
            &self.lease_options,
        )?;

        let mut record = self.store.load()?;
        let mut summary = ConvergeSummary::default();

        for name in teardown_order(manifest, &record) {
            self.delete_recorded(&mut record, &name).await?;
            summary.deleted += 1;
        }

        record.serial += 1;
        summary.serial = record.serial;
        self.store.save(&record)?;
        lease.release()?;
        Ok(summary)
    }

    async fn delete_recorded(
        &self,
        record: &mut StateRecord,
        name: &str,
    ) -> Result<(), ConvergeError<P::Error>> {
        let Some(entry) = record.resources.get(name).cloned() else {
            return Ok(());
        };

        if let Some(id) = &entry.provider_id {
            tracing::info!(declaration = %name, id = %id, "deleting resource");
            self.provider
                .delete(&entry.kind, id)
                .await
                .map_err(|source| ConvergeError::Delete {
                    declaration: name.to_owned(),
                    source,
                })?;
        }
        record.resources.remove(name);
        self.store.save(record)?;
        Ok(())
    }

    async fn converge_declaration(
        &self,
        manifest: &Manifest,
        bindings: &Bindings,
        record: &mut StateRecord,
        name: &str,
        existing: bool,
    ) -> Result<(), ConvergeError<P::Error>> {
        let Some(decl) = manifest.resource(name) else {
            return Ok(());
        };
        let desired = resolve_attrs(decl, manifest, bindings, record).map_err(|failure| {
            ConvergeError::Resolve {
                declaration: decl.name.clone(),
                attribute: failure.attribute,
                message: failure.message,
            }
        })?;

        let previous_id = record
            .resources
            .get(name)
            .and_then(|entry| entry.provider_id.clone());
        record.resources.insert(
            name.to_owned(),
            ResourceState {
                kind: decl.kind.clone(),
                status: ResourceStatus::Pending,
                provider_id: previous_id.clone(),
                attrs: BTreeMap::new(),
            },
        );
        self.store.save(record)?;

        let call = if existing && previous_id.is_some() {
            let id = previous_id.clone().unwrap_or_default();
            tracing::info!(declaration = %name, id = %id, "updating resource");
            self.provider.update(&decl.kind, &id, &desired).await
        } else {
            tracing::info!(declaration = %name, kind = %decl.kind, "creating resource");
            self.provider.create(&decl.kind, &decl.name, &desired).await
        };

        match call {
            Ok(snapshot) => {
                record.resources.insert(
                    name.to_owned(),
                    ResourceState {
                        kind: decl.kind.clone(),
                        status: ResourceStatus::Applied,
                        provider_id: Some(snapshot.id),
                        attrs: snapshot.attrs,
                    },
                );
                self.store.save(record)?;
                Ok(())
            }
            Err(source) => {
                if let Some(entry) = record.resources.get_mut(name) {
                    entry.status = ResourceStatus::Failed;
                }
                self.store.save(record)?;
                Err(ConvergeError::Apply {
                    declaration: name.to_owned(),
                    source,
                })
            }
        }
    }
}

fn ensure_bound<E>(manifest: &Manifest, bindings: &Bindings) -> Result<(), ConvergeError<E>>
where
    E: std::error::Error + 'static,
{
    let variables = bindings.unbound(manifest);
    if variables.is_empty() {
        Ok(())
    } else {
        Err(ConvergeError::Unbound { variables })
    }
}

/// Computes the ordered action set for one run.
///
/// Recorded resources absent from the manifest are deleted first, in
/// reverse recorded order; declarations follow in dependency order.
fn compute_plan(manifest: &Manifest, bindings: &Bindings, record: &StateRecord) -> ConvergePlan {
    let mut actions = Vec::new();

    for name in record.resources.keys().rev() {
        if manifest.resource(name).is_none() {
            actions.push(PlannedAction::Delete { name: name.clone() });
        }
    }

    for decl in manifest.resources() {
        actions.push(action_for(decl, manifest, bindings, record));
    }

    ConvergePlan { actions }
}

fn action_for(
    decl: &ResourceDecl,
    manifest: &Manifest,
    bindings: &Bindings,
    record: &StateRecord,
) -> PlannedAction {
    let name = decl.name.clone();
    let Some(entry) = record.resource(&decl.name) else {
        return PlannedAction::Create { name };
    };
    if entry.provider_id.is_none() {
        return PlannedAction::Create { name };
    }
    if entry.status != ResourceStatus::Applied {
        return PlannedAction::Update { name };
    }

    // An expression that cannot be resolved from recorded snapshots means a
    // dependency will change this run; treat the dependent as changed too.
    match resolve_attrs(decl, manifest, bindings, record) {
        Ok(desired) => {
            let matches = desired
                .iter()
                .all(|(key, value)| entry.attrs.get(key) == Some(value));
            if matches {
                PlannedAction::Noop { name }
            } else {
                PlannedAction::Update { name }
            }
        }
        Err(_) => PlannedAction::Update { name },
    }
}

/// Teardown order: manifest declarations reversed, then recorded resources
/// that are no longer declared, newest name first.
fn teardown_order(manifest: &Manifest, record: &StateRecord) -> Vec<String> {
    let mut order: Vec<String> = manifest
        .resources()
        .iter()
        .rev()
        .filter(|decl| record.resources.contains_key(&decl.name))
        .map(|decl| decl.name.clone())
        .collect();

    for name in record.resources.keys().rev() {
        if manifest.resource(name).is_none() {
            order.push(name.clone());
        }
    }
    order
}

struct ResolveFailure {
    attribute: String,
    message: String,
}

/// Resolves a declaration's attributes against bindings and the snapshots
/// of already-applied resources.
fn resolve_attrs(
    decl: &ResourceDecl,
    manifest: &Manifest,
    bindings: &Bindings,
    record: &StateRecord,
) -> Result<BTreeMap<String, AttrValue>, ResolveFailure> {
    let mut resolved = BTreeMap::new();
    for (attribute, value) in &decl.attrs {
        let concrete = match value {
            AttrValue::String(raw) => {
                resolve_expression(raw, manifest, bindings, record).map_err(|message| {
                    ResolveFailure {
                        attribute: attribute.clone(),
                        message,
                    }
                })?
            }
            AttrValue::Bool(_) | AttrValue::Number(_) => value.clone(),
        };
        resolved.insert(attribute.clone(), concrete);
    }
    Ok(resolved)
}

fn resolve_expression(
    raw: &str,
    manifest: &Manifest,
    bindings: &Bindings,
    record: &StateRecord,
) -> Result<AttrValue, String> {
    let segments = expr::parse(raw).map_err(|err| err.to_string())?;

    // A lone expression keeps its scalar type; anything mixed with literal
    // text renders as a string.
    if let [segment] = segments.as_slice()
        && !matches!(segment, ExprSegment::Literal(_))
    {
        return resolve_segment(segment, manifest, bindings, record);
    }

    let mut rendered = String::new();
    for segment in &segments {
        match segment {
            ExprSegment::Literal(text) => rendered.push_str(text),
            _ => {
                let value = resolve_segment(segment, manifest, bindings, record)?;
                rendered.push_str(&value.to_string());
            }
        }
    }
    Ok(AttrValue::String(rendered))
}

fn resolve_segment(
    segment: &ExprSegment,
    manifest: &Manifest,
    bindings: &Bindings,
    record: &StateRecord,
) -> Result<AttrValue, String> {
    match segment {
        ExprSegment::Literal(text) => Ok(AttrValue::String(text.clone())),
        ExprSegment::Var(name) => bindings
            .lookup(manifest, name)
            .ok_or_else(|| format!("variable {name} is unbound")),
        ExprSegment::Ref {
            resource,
            attribute,
        } => {
            let entry = record
                .resource(resource)
                .filter(|entry| entry.status == ResourceStatus::Applied)
                .ok_or_else(|| format!("resource {resource} is not applied yet"))?;
            entry
                .attrs
                .get(attribute)
                .cloned()
                .ok_or_else(|| format!("resource {resource} has no attribute {attribute}"))
        }
    }
}
