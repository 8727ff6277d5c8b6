// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Archive configuration.

The archive is configured by a single YAML document. Unknown keys are errors: a
misspelled policy key must never silently fall back to a default.
*/

use {
    crate::{
        error::{Result, UploadError},
        routing::QueueKind,
    },
    serde::{Deserialize, Serialize},
    std::{
        collections::{BTreeMap, BTreeSet},
        path::{Path, PathBuf},
    },
};

/// An example configuration document.
pub const EXAMPLE_CONFIG: &str = r#"paths:
  incoming: /srv/archive/queue/unchecked
  disembargo: /srv/archive/queue/unchecked-disembargo
  queues: /srv/archive/queue
  pool: /srv/archive/ftp/pool
  lock_dir: /srv/archive/lock
  mail_spool: /srv/archive/mail
  templates: /srv/archive/templates
  database: /srv/archive/state.yaml
verifier:
  helper: gpg
  keyrings:
    - /srv/keyrings/uploaders.gpg
  timeout_seconds: 60
suites:
  - name: unstable
    architectures: [source, all, amd64, arm64]
    components: [main, contrib, non-free]
  - name: stable
    architectures: [source, all, amd64, arm64]
  - name: proposed-updates
    architectures: [source, all, amd64, arm64]
    override_suite: stable
    policy_queue: stable-update
    binary_upload_acl:
      arm64: [0123456789ABCDEF0123456789ABCDEF01234567]
distribution_mappings:
  - type: map
    from: stable
    to: proposed-updates
  - type: silent-map
    from: sid
    to: unstable
  - type: reject
    suite: testing
checks:
  future_grace_seconds: 86400
  past_cutoff_year: 1975
autobyhand:
  - package: debian-installer-images
    source: debian-installer
    extension: tar.gz
    command: [/srv/archive/scripts/byhand-di]
mail:
  from: Archive Installer <installer@archive.example>
"#;

fn default_verifier_helper() -> PathBuf {
    PathBuf::from("gpg")
}

fn default_verifier_timeout() -> u64 {
    60
}

fn default_components() -> Vec<String> {
    vec!["main".to_string()]
}

fn default_future_grace_seconds() -> i64 {
    86400
}

fn default_past_cutoff_year() -> i32 {
    1975
}

fn default_new_file_grace_seconds() -> u64 {
    300
}

fn default_signature_max_age_days() -> i64 {
    365 * 2
}

fn default_signature_future_grace_seconds() -> i64 {
    86400
}

fn default_mail_from() -> String {
    "Archive Installer <installer@localhost>".to_string()
}

fn default_true() -> bool {
    true
}

/// Filesystem locations of the archive.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    /// Directory uploads arrive in.
    pub incoming: PathBuf,
    /// Directory holding uploads released from embargo.
    #[serde(default)]
    pub disembargo: Option<PathBuf>,
    /// Root of the per-outcome holding directories.
    pub queues: PathBuf,
    /// Root of permanent pool storage.
    pub pool: PathBuf,
    pub lock_dir: PathBuf,
    pub mail_spool: PathBuf,
    #[serde(default)]
    pub templates: Option<PathBuf>,
    /// YAML archive state file.
    pub database: PathBuf,
}

impl PathsConfig {
    /// The holding directory of a queue kind.
    pub fn queue_dir(&self, kind: QueueKind) -> PathBuf {
        self.queues.join(kind.directory_name())
    }

    pub fn reject_dir(&self) -> PathBuf {
        self.queues.join("reject")
    }

    pub fn done_dir(&self) -> PathBuf {
        self.queues.join("done")
    }

    /// Parent directory of private per-upload staging areas.
    pub fn staging_dir(&self) -> PathBuf {
        self.queues.join("staging")
    }
}

/// How to run the signature verification helper.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VerifierConfig {
    /// The helper executable. Must speak the GnuPG status protocol.
    #[serde(default = "default_verifier_helper")]
    pub helper: PathBuf,
    /// Arguments inserted before the standard arguments, e.g. `--homedir`.
    #[serde(default)]
    pub helper_args: Vec<String>,
    /// Keyrings holding every key allowed to sign uploads.
    #[serde(default)]
    pub keyrings: Vec<PathBuf>,
    #[serde(default = "default_verifier_timeout")]
    pub timeout_seconds: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            helper: default_verifier_helper(),
            helper_args: vec![],
            keyrings: vec![],
            timeout_seconds: default_verifier_timeout(),
        }
    }
}

/// The policy queue a suite diverts uploads to.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyQueue {
    StableUpdate,
    OldstableUpdate,
}

/// A suite known to the archive.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SuiteConfig {
    pub name: String,
    #[serde(default)]
    pub architectures: BTreeSet<String>,
    #[serde(default = "default_components")]
    pub components: Vec<String>,
    /// Suite whose overrides apply to this suite.
    #[serde(default)]
    pub override_suite: Option<String>,
    #[serde(default)]
    pub policy_queue: Option<PolicyQueue>,
    /// Architecture to fingerprints allowed to upload binary-only builds.
    #[serde(default)]
    pub binary_upload_acl: BTreeMap<String, Vec<String>>,
}

impl SuiteConfig {
    /// The suite to consult for overrides.
    pub fn override_suite(&self) -> &str {
        self.override_suite.as_deref().unwrap_or(&self.name)
    }
}

/// A rule rewriting requested target suites.
///
/// Rules apply in order, each to the result of the previous one.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", deny_unknown_fields)]
pub enum DistributionRule {
    /// Rewrite `from` to `to` and warn about it.
    Map { from: String, to: String },
    /// Rewrite `from` to `to` quietly.
    SilentMap { from: String, to: String },
    /// Rewrite `from` to `to` if the upload has an architecture `from` does not build.
    MapUnreleased { from: String, to: String },
    /// Drop `suite` from the targets.
    Ignore { suite: String },
    /// Reject uploads targeting `suite`.
    Reject { suite: String },
    /// Uploads to `suite` must also satisfy the versions in `propup`.
    PropupVersion { suite: String, propup: Vec<String> },
}

/// Thresholds of structural checks.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChecksConfig {
    /// How far in the future an archived file may be timestamped.
    #[serde(default = "default_future_grace_seconds")]
    pub future_grace_seconds: i64,
    /// Archived files timestamped before January 1 of this year are rejected.
    #[serde(default = "default_past_cutoff_year")]
    pub past_cutoff_year: i32,
    /// Uploads with files modified more recently than this are left for the next run.
    #[serde(default = "default_new_file_grace_seconds")]
    pub new_file_grace_seconds: u64,
    #[serde(default = "default_signature_max_age_days")]
    pub signature_max_age_days: i64,
    #[serde(default = "default_signature_future_grace_seconds")]
    pub signature_future_grace_seconds: i64,
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            future_grace_seconds: default_future_grace_seconds(),
            past_cutoff_year: default_past_cutoff_year(),
            new_file_grace_seconds: default_new_file_grace_seconds(),
            signature_max_age_days: default_signature_max_age_days(),
            signature_future_grace_seconds: default_signature_future_grace_seconds(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EmbargoConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// A command processing byhand files automatically.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AutoByhandHandler {
    /// Package name encoded in the byhand filename.
    pub package: String,
    /// Source package the upload must be for.
    pub source: String,
    /// Required filename extension, without the leading dot.
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub architectures: Option<Vec<String>>,
    /// Program and leading arguments.
    pub command: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MailConfig {
    #[serde(default = "default_mail_from")]
    pub from: String,
    #[serde(default)]
    pub bcc: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from: default_mail_from(),
            bcc: vec![],
            enabled: true,
        }
    }
}

/// The complete archive configuration.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveConfig {
    pub paths: PathsConfig,
    #[serde(default)]
    pub verifier: VerifierConfig,
    #[serde(default)]
    pub suites: Vec<SuiteConfig>,
    #[serde(default)]
    pub distribution_mappings: Vec<DistributionRule>,
    #[serde(default)]
    pub checks: ChecksConfig,
    #[serde(default)]
    pub embargo: EmbargoConfig,
    #[serde(default)]
    pub autobyhand: Vec<AutoByhandHandler>,
    #[serde(default)]
    pub mail: MailConfig,
}

impl ArchiveConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(s)?;
        config.validate()?;

        Ok(config)
    }

    /// Load and validate a configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            UploadError::Config(format!("reading {}: {}", path.display(), e))
        })?;

        Self::from_yaml_str(&data)
    }

    /// Look up a suite by name.
    pub fn suite(&self, name: &str) -> Option<&SuiteConfig> {
        self.suites.iter().find(|s| s.name == name)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();

        for suite in &self.suites {
            if !seen.insert(suite.name.as_str()) {
                return Err(UploadError::Config(format!(
                    "suite {} defined more than once",
                    suite.name
                )));
            }
        }

        for suite in &self.suites {
            if let Some(other) = &suite.override_suite {
                if !seen.contains(other.as_str()) {
                    return Err(UploadError::Config(format!(
                        "suite {} takes overrides from unknown suite {}",
                        suite.name, other
                    )));
                }
            }
        }

        for handler in &self.autobyhand {
            if handler.command.is_empty() {
                return Err(UploadError::Config(format!(
                    "autobyhand handler for {} has an empty command",
                    handler.package
                )));
            }
        }

        Ok(())
    }
}
