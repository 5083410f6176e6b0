//! Single-writer lease over an environment's state record.
//!
//! Convergence and teardown hold a file lease next to the state record for
//! the duration of the run, making the single-writer assumption explicit.
//! Acquisition is atomic (`create_new`); a stale lease may be broken, and
//! `force` overrides a live one.

use std::io::Write;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs::OpenOptions;
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Default age after which a lease is considered abandoned.
pub const DEFAULT_LEASE_STALE_AFTER: Duration = Duration::from_secs(3600);

/// Metadata recorded in the lease file.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LeaseInfo {
    /// Process id of the holder.
    pub pid: u32,
    /// Unique identifier for the holding run.
    pub run_id: String,
    /// Acquisition time as seconds since the Unix epoch.
    pub acquired_at_secs: u64,
}

impl LeaseInfo {
    fn for_current_process() -> Self {
        Self {
            pid: std::process::id(),
            run_id: Uuid::new_v4().simple().to_string(),
            acquired_at_secs: unix_now_secs(),
        }
    }

    /// Returns `true` when the lease is older than `stale_after`.
    #[must_use]
    pub fn is_stale(&self, stale_after: Duration) -> bool {
        let age = unix_now_secs().saturating_sub(self.acquired_at_secs);
        age >= stale_after.as_secs()
    }
}

/// Acquisition options for [`Lease::acquire`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LeaseOptions {
    /// Break a live lease held by someone else.
    pub force: bool,
    /// Age after which a lease is treated as abandoned and broken.
    pub stale_after: Duration,
}

impl Default for LeaseOptions {
    fn default() -> Self {
        Self {
            force: false,
            stale_after: DEFAULT_LEASE_STALE_AFTER,
        }
    }
}

/// Errors raised while acquiring or releasing a lease.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// Raised when another run holds the lease.
    #[error(
        "environment {environment} is locked by pid {pid} (acquired {acquired_at_secs}s epoch); \
         rerun with --force to break it"
    )]
    Held {
        /// Environment the lease guards.
        environment: String,
        /// Process id recorded in the lease.
        pid: u32,
        /// Acquisition time recorded in the lease.
        acquired_at_secs: u64,
    },
    /// Raised when a broken lease is re-acquired by another run mid-break.
    #[error("environment {environment} lease was re-acquired during break")]
    Contended {
        /// Environment the lease guards.
        environment: String,
    },
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Operating system error message.
        message: String,
    },
}

/// A held lease; released explicitly or best-effort on drop.
#[derive(Debug)]
pub struct Lease {
    dir: Utf8PathBuf,
    file_name: String,
    info: LeaseInfo,
    released: bool,
}

impl Lease {
    /// Acquires the lease for `environment` inside `dir`.
    ///
    /// A stale lease is broken automatically; `options.force` breaks a live
    /// one. A corrupt lease file is treated as abandoned.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Held`] when the lease is live and not forced,
    /// [`LeaseError::Contended`] when a break races another acquirer, and
    /// [`LeaseError::Io`] on file system failures.
    pub fn acquire(
        dir: &Utf8Path,
        environment: &str,
        options: &LeaseOptions,
    ) -> Result<Self, LeaseError> {
        let file_name = format!("{environment}.lease.json");
        let handle = open_state_dir(dir)?;

        match try_create(&handle, dir, &file_name)? {
            Some(lease) => Ok(lease.into_lease(dir, &file_name)),
            None => {
                let existing = read_info(&handle, dir, &file_name)?;
                let breakable = match &existing {
                    // Unreadable metadata counts as abandoned.
                    None => true,
                    Some(info) => options.force || info.is_stale(options.stale_after),
                };
                if !breakable {
                    let info = existing.unwrap_or(LeaseInfo {
                        pid: 0,
                        run_id: String::new(),
                        acquired_at_secs: 0,
                    });
                    return Err(LeaseError::Held {
                        environment: environment.to_owned(),
                        pid: info.pid,
                        acquired_at_secs: info.acquired_at_secs,
                    });
                }

                if let Some(info) = &existing {
                    tracing::warn!(
                        environment,
                        pid = info.pid,
                        "breaking stale or forced lease"
                    );
                }
                match handle.remove_file(&file_name) {
                    Ok(()) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => {
                        return Err(LeaseError::Io {
                            path: dir.join(&file_name),
                            message: err.to_string(),
                        });
                    }
                }

                match try_create(&handle, dir, &file_name)? {
                    Some(lease) => Ok(lease.into_lease(dir, &file_name)),
                    None => Err(LeaseError::Contended {
                        environment: environment.to_owned(),
                    }),
                }
            }
        }
    }

    /// Metadata recorded for this lease.
    #[must_use]
    pub const fn info(&self) -> &LeaseInfo {
        &self.info
    }

    /// Releases the lease, removing the file.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Io`] when the file cannot be removed.
    pub fn release(mut self) -> Result<(), LeaseError> {
        self.released = true;
        let handle = open_state_dir(&self.dir)?;
        handle
            .remove_file(&self.file_name)
            .map_err(|err| LeaseError::Io {
                path: self.dir.join(&self.file_name),
                message: err.to_string(),
            })
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Ok(handle) = open_state_dir(&self.dir) {
            handle.remove_file(&self.file_name).ok();
        }
    }
}

struct CreatedLease {
    info: LeaseInfo,
}

impl CreatedLease {
    fn into_lease(self, dir: &Utf8Path, file_name: &str) -> Lease {
        Lease {
            dir: dir.to_path_buf(),
            file_name: file_name.to_owned(),
            info: self.info,
            released: false,
        }
    }
}

fn open_state_dir(dir: &Utf8Path) -> Result<Dir, LeaseError> {
    Dir::create_ambient_dir_all(dir, ambient_authority()).map_err(|err| LeaseError::Io {
        path: dir.to_path_buf(),
        message: err.to_string(),
    })?;
    Dir::open_ambient_dir(dir, ambient_authority()).map_err(|err| LeaseError::Io {
        path: dir.to_path_buf(),
        message: err.to_string(),
    })
}

/// Attempts atomic creation; `Ok(None)` means the file already exists.
fn try_create(
    handle: &Dir,
    dir: &Utf8Path,
    file_name: &str,
) -> Result<Option<CreatedLease>, LeaseError> {
    let info = LeaseInfo::for_current_process();
    let rendered = serde_json::to_string(&info).map_err(|err| LeaseError::Io {
        path: dir.join(file_name),
        message: err.to_string(),
    })?;

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    match handle.open_with(file_name, &options) {
        Ok(mut file) => {
            file.write_all(rendered.as_bytes())
                .map_err(|err| LeaseError::Io {
                    path: dir.join(file_name),
                    message: err.to_string(),
                })?;
            Ok(Some(CreatedLease { info }))
        }
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(err) => Err(LeaseError::Io {
            path: dir.join(file_name),
            message: err.to_string(),
        }),
    }
}

fn read_info(handle: &Dir, dir: &Utf8Path, file_name: &str) -> Result<Option<LeaseInfo>, LeaseError> {
    match handle.read_to_string(file_name) {
        Ok(contents) => Ok(serde_json::from_str(&contents).ok()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(LeaseError::Io {
            path: dir.join(file_name),
            message: err.to_string(),
        }),
    }
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
