// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Archive state consulted and updated by the pipeline.

The pipeline talks to persistence through [ArchiveDatabase] and [SignatureHistory].
[YamlArchiveDatabase] implements both on top of a YAML state file that is rewritten
atomically on every commit.
*/

use {
    crate::error::{Result, UploadError},
    chrono::{DateTime, Utc},
    debian_packaging::package_version::PackageVersion,
    log::debug,
    serde::{Deserialize, Serialize},
    std::{
        io::Write,
        path::{Path, PathBuf},
        sync::{Mutex, MutexGuard},
    },
    strum_macros::{Display, EnumString},
};

/// A person allowed to sign uploads.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Identity {
    /// Primary key fingerprint.
    pub fingerprint: String,
    pub name: String,
    pub email: String,
    /// May upload on behalf of others.
    #[serde(default)]
    pub may_sponsor: bool,
    /// May only upload sources that list them as allowed uploaders.
    #[serde(default)]
    pub restricted: bool,
}

/// The kind of package an override applies to.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, EnumString, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OverrideKind {
    Deb,
    Udeb,
    Dsc,
}

/// Classification of a package within a suite.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct OverrideEntry {
    pub package: String,
    pub suite: String,
    pub kind: OverrideKind,
    pub section: String,
    pub priority: String,
    #[serde(default = "default_component")]
    pub component: String,
}

fn default_component() -> String {
    "main".to_string()
}

/// A source package version present in a suite.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SourceRecord {
    pub source: String,
    pub version: String,
    pub suite: String,
    /// Fingerprints allowed to upload this source without being its maintainer.
    #[serde(default)]
    pub uploaders: Vec<String>,
}

/// A binary package present in a suite.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BinaryRecord {
    pub package: String,
    pub version: String,
    pub architecture: String,
    pub source: String,
    pub suite: String,
}

/// A file in permanent pool storage.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PoolFile {
    pub filename: String,
    /// Path relative to the pool root.
    pub path: String,
    pub size: u64,
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
}

/// A signature seen on a processed upload.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SignatureRecord {
    pub signature_id: String,
    pub manifest: String,
    pub seen: DateTime<Utc>,
}

/// Metadata of an accepted upload.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AcceptedUpload {
    pub manifest: String,
    pub source: String,
    pub version: String,
    pub architectures: Vec<String>,
    pub suites: Vec<String>,
    /// Suites the version must also be propagated to.
    #[serde(default)]
    pub propagations: Vec<String>,
    pub fingerprint: String,
    #[serde(default)]
    pub binaries: Vec<BinaryRecord>,
    #[serde(default)]
    pub files: Vec<PoolFile>,
    pub accepted: DateTime<Utc>,
}

/// Read and write access to archive state.
pub trait ArchiveDatabase {
    /// Resolve the identity owning a primary key fingerprint.
    fn identity_for_fingerprint(&self, fingerprint: &str) -> Result<Option<Identity>>;

    /// Versions of a source package present in a suite.
    fn source_versions(&self, source: &str, suite: &str) -> Result<Vec<PackageVersion>>;

    /// The override of a package in a suite.
    fn override_for(
        &self,
        package: &str,
        suite: &str,
        kind: OverrideKind,
    ) -> Result<Option<OverrideEntry>>;

    /// Fingerprints allowed to upload a source package already known in a suite.
    fn allowed_uploaders(&self, source: &str, suite: &str) -> Result<Vec<String>>;

    /// The source package the most recent build of a binary package came from.
    fn latest_binary_source(&self, package: &str, suite: &str) -> Result<Option<String>>;

    /// A file already in the pool.
    fn pool_file(&self, filename: &str) -> Result<Option<PoolFile>>;

    /// Record an accepted upload. This is the last step of accepting.
    fn record_accepted(&self, upload: AcceptedUpload) -> Result<()>;
}

/// Memory of signatures on processed uploads.
pub trait SignatureHistory {
    fn is_known(&self, signature_id: &str) -> Result<bool>;

    fn record(&self, signature_id: &str, manifest: &str) -> Result<()>;
}

/// Everything [YamlArchiveDatabase] persists.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveState {
    #[serde(default)]
    pub identities: Vec<Identity>,
    #[serde(default)]
    pub sources: Vec<SourceRecord>,
    #[serde(default)]
    pub binaries: Vec<BinaryRecord>,
    #[serde(default)]
    pub overrides: Vec<OverrideEntry>,
    #[serde(default)]
    pub pool: Vec<PoolFile>,
    #[serde(default)]
    pub signatures: Vec<SignatureRecord>,
    #[serde(default)]
    pub uploads: Vec<AcceptedUpload>,
}

/// An [ArchiveDatabase] and [SignatureHistory] backed by a YAML file.
///
/// Without a path, state lives in memory only.
pub struct YamlArchiveDatabase {
    path: Option<PathBuf>,
    state: Mutex<ArchiveState>,
}

impl YamlArchiveDatabase {
    /// Open a state file. A missing file is an empty archive.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let state = match std::fs::read_to_string(path) {
            Ok(data) => serde_yaml::from_str(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ArchiveState::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            state: Mutex::new(state),
        })
    }

    /// A database that never touches the filesystem.
    pub fn in_memory(state: ArchiveState) -> Self {
        Self {
            path: None,
            state: Mutex::new(state),
        }
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> Result<ArchiveState> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, ArchiveState>> {
        self.state
            .lock()
            .map_err(|_| UploadError::Database("state lock poisoned".to_string()))
    }

    fn save(&self, state: &ArchiveState) -> Result<()> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };

        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        temp.write_all(serde_yaml::to_string(state)?.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(path)?;

        debug!("wrote archive state to {}", path.display());

        Ok(())
    }

    /// Apply a mutation and persist it. Memory is only updated if the write succeeds.
    fn update(&self, f: impl FnOnce(&mut ArchiveState)) -> Result<()> {
        let mut state = self.lock()?;
        let mut next = state.clone();
        f(&mut next);
        self.save(&next)?;
        *state = next;

        Ok(())
    }
}

impl ArchiveDatabase for YamlArchiveDatabase {
    fn identity_for_fingerprint(&self, fingerprint: &str) -> Result<Option<Identity>> {
        Ok(self
            .lock()?
            .identities
            .iter()
            .find(|i| i.fingerprint.eq_ignore_ascii_case(fingerprint))
            .cloned())
    }

    fn source_versions(&self, source: &str, suite: &str) -> Result<Vec<PackageVersion>> {
        self.lock()?
            .sources
            .iter()
            .filter(|r| r.source == source && r.suite == suite)
            .map(|r| {
                PackageVersion::parse(&r.version).map_err(|e| {
                    UploadError::Database(format!("bad version of {}: {}", r.source, e))
                })
            })
            .collect()
    }

    fn override_for(
        &self,
        package: &str,
        suite: &str,
        kind: OverrideKind,
    ) -> Result<Option<OverrideEntry>> {
        Ok(self
            .lock()?
            .overrides
            .iter()
            .find(|o| o.package == package && o.suite == suite && o.kind == kind)
            .cloned())
    }

    fn allowed_uploaders(&self, source: &str, suite: &str) -> Result<Vec<String>> {
        let mut uploaders = self
            .lock()?
            .sources
            .iter()
            .filter(|r| r.source == source && r.suite == suite)
            .flat_map(|r| r.uploaders.iter().cloned())
            .collect::<Vec<_>>();
        uploaders.sort();
        uploaders.dedup();

        Ok(uploaders)
    }

    fn latest_binary_source(&self, package: &str, suite: &str) -> Result<Option<String>> {
        let state = self.lock()?;

        let mut latest: Option<(PackageVersion, &str)> = None;
        for record in state
            .binaries
            .iter()
            .filter(|b| b.package == package && b.suite == suite)
        {
            let version = PackageVersion::parse(&record.version).map_err(|e| {
                UploadError::Database(format!("bad version of {}: {}", record.package, e))
            })?;

            if latest.as_ref().map(|(v, _)| version > *v).unwrap_or(true) {
                latest = Some((version, record.source.as_str()));
            }
        }

        Ok(latest.map(|(_, source)| source.to_string()))
    }

    fn pool_file(&self, filename: &str) -> Result<Option<PoolFile>> {
        Ok(self
            .lock()?
            .pool
            .iter()
            .find(|f| f.filename == filename)
            .cloned())
    }

    fn record_accepted(&self, upload: AcceptedUpload) -> Result<()> {
        self.update(|state| {
            for suite in &upload.suites {
                let uploaders = state
                    .sources
                    .iter()
                    .filter(|r| r.source == upload.source && &r.suite == suite)
                    .flat_map(|r| r.uploaders.iter().cloned())
                    .collect::<Vec<_>>();

                if upload.architectures.iter().any(|a| a == "source") {
                    state.sources.push(SourceRecord {
                        source: upload.source.clone(),
                        version: upload.version.clone(),
                        suite: suite.clone(),
                        uploaders,
                    });
                }

                for binary in &upload.binaries {
                    state.binaries.push(BinaryRecord {
                        suite: suite.clone(),
                        ..binary.clone()
                    });
                }
            }

            for file in &upload.files {
                if !state.pool.iter().any(|f| f.filename == file.filename) {
                    state.pool.push(file.clone());
                }
            }

            state.uploads.push(upload);
        })
    }
}

impl SignatureHistory for YamlArchiveDatabase {
    fn is_known(&self, signature_id: &str) -> Result<bool> {
        Ok(self
            .lock()?
            .signatures
            .iter()
            .any(|s| s.signature_id == signature_id))
    }

    fn record(&self, signature_id: &str, manifest: &str) -> Result<()> {
        self.update(|state| {
            state.signatures.push(SignatureRecord {
                signature_id: signature_id.to_string(),
                manifest: manifest.to_string(),
                seen: Utc::now(),
            })
        })
    }
}
