// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Run-wide locking. */

use {
    crate::error::{Result, UploadError},
    fs2::{lock_contended_error, FileExt},
    log::{debug, warn},
    std::{
        fs::File,
        path::{Path, PathBuf},
    },
};

/// Held for the duration of an upload processing run.
pub const RUN_LOCK: &str = "process-upload.lock";

/// Held exclusively by archive maintenance.
pub const MAINTENANCE_LOCK: &str = "archive-maintenance.lock";

fn is_contended(e: &std::io::Error) -> bool {
    e.raw_os_error().is_some() && e.raw_os_error() == lock_contended_error().raw_os_error()
}

fn open_lock(path: &Path) -> Result<File> {
    std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .map_err(UploadError::from)
}

/// Exclusive ownership of upload processing.
///
/// Unless bypassed, a shared lock on the maintenance lock file is also held so
/// maintenance cannot begin while uploads are processed.
pub struct RunLock {
    run: File,
    maintenance: Option<File>,
    path: PathBuf,
}

impl RunLock {
    /// Obtain the run lock without waiting.
    ///
    /// Fails with [UploadError::TransientRace] if another run is active or archive
    /// maintenance holds its lock. `bypass_maintenance` skips the maintenance check.
    pub fn acquire(lock_dir: &Path, bypass_maintenance: bool) -> Result<Self> {
        std::fs::create_dir_all(lock_dir)?;

        let path = lock_dir.join(RUN_LOCK);
        let run = open_lock(&path)?;
        FileExt::try_lock_exclusive(&run).map_err(|e| {
            if is_contended(&e) {
                UploadError::TransientRace(format!("{} is held by another run", path.display()))
            } else {
                e.into()
            }
        })?;

        let maintenance = if bypass_maintenance {
            warn!("not checking for archive maintenance");
            None
        } else {
            let maintenance_path = lock_dir.join(MAINTENANCE_LOCK);
            let file = open_lock(&maintenance_path)?;
            FileExt::try_lock_shared(&file).map_err(|e| {
                if is_contended(&e) {
                    UploadError::TransientRace(format!(
                        "archive maintenance holds {}",
                        maintenance_path.display()
                    ))
                } else {
                    e.into()
                }
            })?;
            Some(file)
        };

        debug!("acquired {}", path.display());

        Ok(Self {
            run,
            maintenance,
            path,
        })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Some(file) = &self.maintenance {
            if let Err(e) = FileExt::unlock(file) {
                warn!("error releasing maintenance lock: {}", e);
            }
        }

        if let Err(e) = FileExt::unlock(&self.run) {
            warn!("error releasing {}: {}", self.path.display(), e);
        }
    }
}
