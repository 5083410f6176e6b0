//! Provider implementation that drives a provider CLI with JSON output.
//!
//! Resource operations shell out to the configured binary through the
//! [`CommandRunner`] abstraction so tests can script responses. The CLI is
//! expected to print a JSON object with an `id` field and an `attributes`
//! map for create and update operations.

use std::collections::BTreeMap;
use std::ffi::OsString;

use serde::Deserialize;
use thiserror::Error;

use crate::config::ProviderConfig;
use crate::exec::{CommandOutput, CommandRunner, EnvBinding, ExecError, ProcessCommandRunner};
use crate::graph::AttrValue;

use super::{Provider, ProviderFuture, ResourceSnapshot};

/// Errors raised by the CLI provider.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CliProviderError {
    /// Raised when the provider CLI returns a non-zero exit status.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Program that failed.
        program: String,
        /// Exit status reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the command.
        stderr: String,
    },
    /// Raised when JSON output from the CLI cannot be parsed.
    #[error("failed to parse {operation} output: {message}")]
    Parse {
        /// Operation whose output was unparsable.
        operation: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when command execution fails.
    #[error(transparent)]
    Runner(#[from] ExecError),
}

#[derive(Debug, Deserialize)]
struct CliResource {
    id: String,
    #[serde(default)]
    attributes: BTreeMap<String, AttrValue>,
}

/// Drives a provider CLI for resource operations.
#[derive(Clone, Debug)]
pub struct CliProvider<R: CommandRunner> {
    config: ProviderConfig,
    runner: R,
    env: Vec<EnvBinding>,
}

impl CliProvider<ProcessCommandRunner> {
    /// Convenience constructor wiring the real process runner.
    #[must_use]
    pub fn with_process_runner(config: ProviderConfig) -> Self {
        Self::new(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> CliProvider<R> {
    /// Creates a provider using the given configuration and runner.
    #[must_use]
    pub const fn new(config: ProviderConfig, runner: R) -> Self {
        Self {
            config,
            runner,
            env: Vec::new(),
        }
    }

    /// Adds environment bindings applied to every spawned CLI invocation,
    /// such as the resolved credential token.
    #[must_use]
    pub fn with_env(mut self, env: Vec<EnvBinding>) -> Self {
        self.env = env;
        self
    }

    /// Returns a reference to the underlying configuration.
    #[must_use]
    pub const fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn run_json(&self, operation: &str, args: &[OsString]) -> Result<CliResource, CliProviderError> {
        let output = self.run_checked(args)?;
        serde_json::from_str(&output.stdout).map_err(|err| CliProviderError::Parse {
            operation: operation.to_owned(),
            message: err.to_string(),
        })
    }

    fn run_checked(&self, args: &[OsString]) -> Result<CommandOutput, CliProviderError> {
        let output = self
            .runner
            .run(&self.config.provider_bin, args, &self.env)?;
        if output.is_success() {
            return Ok(output);
        }

        let status_text = output
            .code
            .map_or_else(|| String::from("unknown"), |code| code.to_string());
        Err(CliProviderError::CommandFailure {
            program: self.config.provider_bin.clone(),
            status: output.code,
            status_text,
            stderr: output.stderr,
        })
    }

    fn scope_args(&self) -> Vec<OsString> {
        vec![
            OsString::from("--project"),
            OsString::from(&self.config.project_id),
            OsString::from("--zone"),
            OsString::from(&self.config.zone),
        ]
    }

    fn attr_args(attrs: &BTreeMap<String, AttrValue>) -> Vec<OsString> {
        let mut args = Vec::with_capacity(attrs.len().saturating_mul(2));
        for (key, value) in attrs {
            args.push(OsString::from("--attr"));
            args.push(OsString::from(format!("{key}={value}")));
        }
        args
    }

    fn create_args(
        &self,
        kind: &str,
        name: &str,
        attrs: &BTreeMap<String, AttrValue>,
    ) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("resource"),
            OsString::from("create"),
            OsString::from("--kind"),
            OsString::from(kind),
            OsString::from("--name"),
            OsString::from(name),
        ];
        args.extend(self.scope_args());
        args.extend(Self::attr_args(attrs));
        args.push(OsString::from("-o"));
        args.push(OsString::from("json"));
        args
    }

    fn update_args(&self, kind: &str, id: &str, attrs: &BTreeMap<String, AttrValue>) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("resource"),
            OsString::from("update"),
            OsString::from("--kind"),
            OsString::from(kind),
            OsString::from("--id"),
            OsString::from(id),
        ];
        args.extend(self.scope_args());
        args.extend(Self::attr_args(attrs));
        args.push(OsString::from("-o"));
        args.push(OsString::from("json"));
        args
    }

    fn delete_args(&self, kind: &str, id: &str) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("resource"),
            OsString::from("delete"),
            OsString::from("--kind"),
            OsString::from(kind),
            OsString::from("--id"),
            OsString::from(id),
        ];
        args.extend(self.scope_args());
        args
    }

    fn snapshot(inputs: &BTreeMap<String, AttrValue>, resource: CliResource) -> ResourceSnapshot {
        let mut attrs = inputs.clone();
        attrs.extend(resource.attributes);
        attrs.insert("id".to_owned(), AttrValue::String(resource.id.clone()));
        ResourceSnapshot {
            id: resource.id,
            attrs,
        }
    }
}

impl<R: CommandRunner + Send + Sync> Provider for CliProvider<R> {
    type Error = CliProviderError;

    fn create<'a>(
        &'a self,
        kind: &'a str,
        name: &'a str,
        attrs: &'a BTreeMap<String, AttrValue>,
    ) -> ProviderFuture<'a, ResourceSnapshot, Self::Error> {
        Box::pin(async move {
            let args = self.create_args(kind, name, attrs);
            let resource = self.run_json("create", &args)?;
            Ok(Self::snapshot(attrs, resource))
        })
    }

    fn update<'a>(
        &'a self,
        kind: &'a str,
        id: &'a str,
        attrs: &'a BTreeMap<String, AttrValue>,
    ) -> ProviderFuture<'a, ResourceSnapshot, Self::Error> {
        Box::pin(async move {
            let args = self.update_args(kind, id, attrs);
            let resource = self.run_json("update", &args)?;
            Ok(Self::snapshot(attrs, resource))
        })
    }

    fn delete<'a>(&'a self, kind: &'a str, id: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let args = self.delete_args(kind, id);
            self.run_checked(&args)?;
            Ok(())
        })
    }
}
