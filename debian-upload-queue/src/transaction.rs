// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Filesystem changes that can be undone as a unit. */

use {
    crate::error::Result,
    log::{debug, warn},
    std::path::{Path, PathBuf},
    tempfile::TempDir,
};

#[derive(Debug)]
enum Action {
    CreatedDir(PathBuf),
    Created(PathBuf),
    /// A file was moved aside to `backup` before `path` was changed.
    Saved { path: PathBuf, backup: PathBuf },
}

/// Move a file, copying across filesystems.
fn move_file(source: &Path, dest: &Path) -> std::io::Result<()> {
    if std::fs::rename(source, dest).is_ok() {
        return Ok(());
    }

    std::fs::copy(source, dest)?;
    std::fs::remove_file(source)
}

/// Records filesystem changes so they can be rolled back.
///
/// Replaced and removed files are kept in a private backup directory until the
/// transaction finishes. A transaction dropped without [Self::commit()] rolls back.
pub struct FilesystemTransaction {
    backups: TempDir,
    actions: Vec<Action>,
    finished: bool,
}

impl FilesystemTransaction {
    /// Begin a transaction keeping backups below `scratch_dir`.
    ///
    /// `scratch_dir` should be on the same filesystem as the files being changed.
    pub fn new(scratch_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(scratch_dir)?;

        Ok(Self {
            backups: tempfile::Builder::new()
                .prefix("transaction-")
                .tempdir_in(scratch_dir)?,
            actions: vec![],
            finished: false,
        })
    }

    fn create_parents(&mut self, path: &Path) -> Result<()> {
        let mut missing = vec![];
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir.as_os_str().is_empty() || dir.exists() {
                break;
            }
            missing.push(dir.to_path_buf());
            current = dir.parent();
        }

        for dir in missing.into_iter().rev() {
            std::fs::create_dir(&dir)?;
            self.actions.push(Action::CreatedDir(dir));
        }

        Ok(())
    }

    fn save(&mut self, path: &Path) -> Result<()> {
        let backup = self.backups.path().join(self.actions.len().to_string());
        move_file(path, &backup)?;
        self.actions.push(Action::Saved {
            path: path.to_path_buf(),
            backup,
        });

        Ok(())
    }

    /// Prepare `dest` to receive new content.
    fn prepare(&mut self, dest: &Path) -> Result<()> {
        self.create_parents(dest)?;
        if dest.exists() {
            self.save(dest)?;
        }

        Ok(())
    }

    /// Copy `source` to `dest`, replacing any existing file.
    pub fn copy_file(&mut self, source: &Path, dest: &Path) -> Result<()> {
        self.prepare(dest)?;
        self.actions.push(Action::Created(dest.to_path_buf()));
        std::fs::copy(source, dest)?;

        Ok(())
    }

    /// Write `data` to `dest`, replacing any existing file.
    pub fn write_file(&mut self, dest: &Path, data: &[u8]) -> Result<()> {
        self.prepare(dest)?;
        self.actions.push(Action::Created(dest.to_path_buf()));
        std::fs::write(dest, data)?;

        Ok(())
    }

    /// Remove a file.
    pub fn remove_file(&mut self, path: &Path) -> Result<()> {
        self.save(path)
    }

    /// Keep all changes.
    pub fn commit(mut self) {
        debug!("committing {} filesystem changes", self.actions.len());
        self.finished = true;
    }

    /// Undo all changes, most recent first.
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.undo()
    }

    fn undo(&mut self) -> Result<()> {
        let mut first_error = None;

        while let Some(action) = self.actions.pop() {
            let res = match &action {
                Action::Created(path) => match std::fs::remove_file(path) {
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    res => res,
                },
                Action::CreatedDir(path) => std::fs::remove_dir(path),
                Action::Saved { path, backup } => move_file(backup, path),
            };

            if let Err(e) = res {
                warn!("rollback of {:?} failed: {}", action, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl Drop for FilesystemTransaction {
    fn drop(&mut self) {
        if !self.finished {
            warn!("rolling back unfinished filesystem transaction");
            if let Err(e) = self.undo() {
                warn!("rollback incomplete: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_restores_state() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();
        std::fs::write(root.join("source"), b"new")?;
        std::fs::write(root.join("existing"), b"old")?;
        std::fs::write(root.join("doomed"), b"doomed")?;

        let mut tx = FilesystemTransaction::new(&root.join("scratch"))?;
        tx.copy_file(&root.join("source"), &root.join("a/b/copied"))?;
        tx.write_file(&root.join("existing"), b"replaced")?;
        tx.remove_file(&root.join("doomed"))?;

        assert_eq!(std::fs::read(root.join("a/b/copied"))?, b"new");
        assert_eq!(std::fs::read(root.join("existing"))?, b"replaced");
        assert!(!root.join("doomed").exists());

        tx.rollback()?;

        assert!(!root.join("a").exists());
        assert_eq!(std::fs::read(root.join("existing"))?, b"old");
        assert_eq!(std::fs::read(root.join("doomed"))?, b"doomed");

        Ok(())
    }

    #[test]
    fn drop_rolls_back_and_commit_keeps() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path();

        {
            let mut tx = FilesystemTransaction::new(&root.join("scratch"))?;
            tx.write_file(&root.join("dropped"), b"x")?;
        }
        assert!(!root.join("dropped").exists());

        let mut tx = FilesystemTransaction::new(&root.join("scratch"))?;
        tx.write_file(&root.join("kept"), b"x")?;
        tx.remove_file(&root.join("kept"))?;
        tx.write_file(&root.join("kept"), b"y")?;
        tx.commit();
        assert_eq!(std::fs::read(root.join("kept"))?, b"y");

        Ok(())
    }
}
