//! Persisted convergence state: logical resource name → provider identifier
//! plus last-known attribute snapshot and per-declaration status.
//!
//! The record is owned by the provisioner and saved after every action so a
//! crash mid-apply leaves resumable status flags rather than an opaque blob.
//! The output extractor only ever reads it.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::AttrValue;

/// Convergence status of one declaration.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Recorded but not yet created or updated in this run.
    Pending,
    /// Provider reports the resource converged to the desired attributes.
    Applied,
    /// The last provider call for this declaration failed.
    Failed,
}

/// Persisted view of one declaration.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ResourceState {
    /// Provider resource kind recorded at apply time.
    pub kind: String,
    /// Convergence status flag.
    pub status: ResourceStatus,
    /// Provider-assigned identifier, once the resource exists.
    pub provider_id: Option<String>,
    /// Last-known attribute snapshot returned by the provider.
    #[serde(default)]
    pub attrs: BTreeMap<String, AttrValue>,
}

/// The state record for one environment.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct StateRecord {
    /// Convergence generation, incremented on every successful apply.
    pub serial: u64,
    /// Per-declaration state keyed by logical name.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceState>,
}

impl StateRecord {
    /// Returns the state entry for `name`, if recorded.
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&ResourceState> {
        self.resources.get(name)
    }

    /// Returns `true` when `name` is recorded as applied.
    #[must_use]
    pub fn is_applied(&self, name: &str) -> bool {
        self.resources
            .get(name)
            .is_some_and(|entry| entry.status == ResourceStatus::Applied)
    }
}

/// Errors raised while loading or persisting the state record.
#[derive(Debug, Error)]
pub enum StateError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Operating system error message.
        message: String,
    },
    /// Raised when the persisted record cannot be parsed.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path holding the unparsable record.
        path: Utf8PathBuf,
        /// Parser error message.
        message: String,
    },
    /// Raised when the record cannot be serialized.
    #[error("failed to serialize state: {0}")]
    Serialize(String),
}

/// Loads and saves the state record for one environment.
#[derive(Clone, Debug)]
pub struct StateStore {
    dir: Utf8PathBuf,
    environment: String,
}

impl StateStore {
    /// Creates a store rooted at `dir` for the named environment.
    #[must_use]
    pub fn new(dir: impl Into<Utf8PathBuf>, environment: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            environment: environment.into(),
        }
    }

    /// Directory holding state and lease files.
    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Environment this store is keyed by.
    #[must_use]
    pub fn environment(&self) -> &str {
        &self.environment
    }

    fn file_name(&self) -> String {
        format!("{}.state.json", self.environment)
    }

    /// Loads the record, returning an empty one when no file exists yet.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the file exists but cannot be read or
    /// parsed.
    pub fn load(&self) -> Result<StateRecord, StateError> {
        let file_name = self.file_name();
        let dir = match Dir::open_ambient_dir(&self.dir, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StateRecord::default());
            }
            Err(err) => {
                return Err(StateError::Io {
                    path: self.dir.clone(),
                    message: err.to_string(),
                });
            }
        };

        let exists = dir.try_exists(&file_name).map_err(|err| StateError::Io {
            path: self.record_path(),
            message: err.to_string(),
        })?;
        if !exists {
            return Ok(StateRecord::default());
        }

        let contents = dir.read_to_string(&file_name).map_err(|err| StateError::Io {
            path: self.record_path(),
            message: err.to_string(),
        })?;
        serde_json::from_str(&contents).map_err(|err| StateError::Parse {
            path: self.record_path(),
            message: err.to_string(),
        })
    }

    /// Persists the record, creating the state directory when needed.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when serialization or writing fails.
    pub fn save(&self, record: &StateRecord) -> Result<(), StateError> {
        Dir::create_ambient_dir_all(&self.dir, ambient_authority()).map_err(|err| {
            StateError::Io {
                path: self.dir.clone(),
                message: err.to_string(),
            }
        })?;
        let dir =
            Dir::open_ambient_dir(&self.dir, ambient_authority()).map_err(|err| StateError::Io {
                path: self.dir.clone(),
                message: err.to_string(),
            })?;

        let rendered = serde_json::to_string_pretty(record)
            .map_err(|err| StateError::Serialize(err.to_string()))?;
        dir.write(self.file_name(), rendered)
            .map_err(|err| StateError::Io {
                path: self.record_path(),
                message: err.to_string(),
            })
    }

    fn record_path(&self) -> Utf8PathBuf {
        self.dir.join(self.file_name())
    }
}
