//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ffi::OsString;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

use crate::exec::{CommandOutput, CommandRunner, EnvBinding, ExecError};
use crate::graph::AttrValue;
use crate::provider::{Provider, ProviderFuture, ResourceSnapshot};

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Environment bindings applied to the invocation.
    pub env: Vec<EnvBinding>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a specific exit code.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes a response with no exit code to simulate abnormal termination.
    pub fn push_missing_exit_code(&self) {
        self.push_output(None, "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(CommandOutput {
                code,
                stdout: stdout.into(),
                stderr: stderr.into(),
            });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        env: &[EnvBinding],
    ) -> Result<CommandOutput, ExecError> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CommandInvocation {
                program: program.to_owned(),
                args: args.to_vec(),
                env: env.to_vec(),
            });
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| ExecError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Error returned by [`ScriptedProvider`] failure injection.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("scripted provider failure for {declaration}")]
pub struct ScriptedProviderError {
    /// Declaration the failure was injected for.
    pub declaration: String,
}

/// One recorded provider call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProviderCall {
    /// A create operation.
    Create {
        /// Resource kind submitted.
        kind: String,
        /// Logical name submitted.
        name: String,
    },
    /// An update operation.
    Update {
        /// Resource kind submitted.
        kind: String,
        /// Provider identifier submitted.
        id: String,
    },
    /// A delete operation.
    Delete {
        /// Resource kind submitted.
        kind: String,
        /// Provider identifier submitted.
        id: String,
    },
}

#[derive(Debug, Default)]
struct ScriptedProviderInner {
    next_id: u64,
    computed: Vec<(String, String, AttrValue)>,
    fail_creates: BTreeSet<String>,
    calls: Vec<ProviderCall>,
}

/// Deterministic in-memory provider for convergence and workflow tests.
///
/// Created resources receive sequential `KIND-N` identifiers; configured
/// computed attributes are merged into snapshots by kind.
#[derive(Clone, Debug, Default)]
pub struct ScriptedProvider {
    inner: Arc<Mutex<ScriptedProviderInner>>,
}

impl ScriptedProvider {
    /// Creates a provider with no computed attributes or injected failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `key = value` into every snapshot of the given kind, standing
    /// in for provider-computed runtime attributes.
    pub fn push_computed(&self, kind: impl Into<String>, key: impl Into<String>, value: AttrValue) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .computed
            .push((kind.into(), key.into(), value));
    }

    /// Makes the next create for the named declaration fail.
    pub fn fail_create(&self, name: impl Into<String>) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_creates
            .insert(name.into());
    }

    /// Returns all recorded provider calls in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
            .clone()
    }

    /// Number of recorded calls of any operation.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    fn snapshot_for(
        inner: &ScriptedProviderInner,
        kind: &str,
        attrs: &BTreeMap<String, AttrValue>,
        id: String,
    ) -> ResourceSnapshot {
        let mut merged = attrs.clone();
        merged.insert(String::from("id"), AttrValue::String(id.clone()));
        for (computed_kind, key, value) in &inner.computed {
            if computed_kind == kind {
                merged.insert(key.clone(), value.clone());
            }
        }
        ResourceSnapshot { id, attrs: merged }
    }
}

impl Provider for ScriptedProvider {
    type Error = ScriptedProviderError;

    fn create<'a>(
        &'a self,
        kind: &'a str,
        name: &'a str,
        attrs: &'a BTreeMap<String, AttrValue>,
    ) -> ProviderFuture<'a, ResourceSnapshot, Self::Error> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.calls.push(ProviderCall::Create {
                kind: kind.to_owned(),
                name: name.to_owned(),
            });
            if inner.fail_creates.remove(name) {
                return Err(ScriptedProviderError {
                    declaration: name.to_owned(),
                });
            }
            inner.next_id += 1;
            let id = format!("{kind}-{}", inner.next_id);
            Ok(Self::snapshot_for(&inner, kind, attrs, id))
        })
    }

    fn update<'a>(
        &'a self,
        kind: &'a str,
        id: &'a str,
        attrs: &'a BTreeMap<String, AttrValue>,
    ) -> ProviderFuture<'a, ResourceSnapshot, Self::Error> {
        Box::pin(async move {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.calls.push(ProviderCall::Update {
                kind: kind.to_owned(),
                id: id.to_owned(),
            });
            Ok(Self::snapshot_for(&inner, kind, attrs, id.to_owned()))
        })
    }

    fn delete<'a>(&'a self, kind: &'a str, id: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.inner
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .calls
                .push(ProviderCall::Delete {
                    kind: kind.to_owned(),
                    id: id.to_owned(),
                });
            Ok(())
        })
    }
}
