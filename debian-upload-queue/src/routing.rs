// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Routing of checked uploads to their terminal outcome. */

use {
    crate::{
        cache::RunCache,
        config::{ArchiveConfig, AutoByhandHandler, PolicyQueue, SuiteConfig},
        database::{ArchiveDatabase, OverrideKind},
        diagnostic::Diagnostics,
        error::Result,
        manifest::{FileEntry, PackageType, UploadManifest},
        validation::binary::parse_binary_filename,
    },
    std::{
        collections::BTreeSet,
        fmt::{Display, Formatter},
    },
    strum_macros::{Display as StrumDisplay, EnumString},
};

/// Holding queues an upload may be diverted to.
#[derive(Clone, Copy, Debug, EnumString, Eq, Hash, Ord, PartialEq, PartialOrd, StrumDisplay)]
#[strum(serialize_all = "kebab-case")]
pub enum QueueKind {
    /// Some file lacks an override.
    New,
    /// Every byhand file has an automatic handler.
    Autobyhand,
    /// Byhand files need manual processing.
    Byhand,
    Embargo,
    Unembargo,
    StableUpdate,
    OldStableUpdate,
}

impl QueueKind {
    /// Name of the holding directory of this queue.
    ///
    /// Automatic byhand processing happens in place, so uploads waiting for it
    /// share the byhand directory.
    pub fn directory_name(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Autobyhand | Self::Byhand => "byhand",
            Self::Embargo => "embargoed",
            Self::Unembargo => "unembargoed",
            Self::StableUpdate => "proposed-updates",
            Self::OldStableUpdate => "oldproposed-updates",
        }
    }
}

impl From<PolicyQueue> for QueueKind {
    fn from(queue: PolicyQueue) -> Self {
        match queue {
            PolicyQueue::StableUpdate => Self::StableUpdate,
            PolicyQueue::OldstableUpdate => Self::OldStableUpdate,
        }
    }
}

/// The terminal outcome of an upload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Decision {
    Accept,
    Reject,
    Queue(QueueKind),
}

impl Display for Decision {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accept => f.write_str("accept"),
            Self::Reject => f.write_str("reject"),
            Self::Queue(kind) => write!(f, "queue to {}", kind),
        }
    }
}

/// The parts of a byhand filename, `package_version_architecture.extension`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ByhandName<'a> {
    pub package: &'a str,
    pub version: &'a str,
    pub architecture: &'a str,
    pub extension: &'a str,
}

impl<'a> ByhandName<'a> {
    pub fn parse(filename: &'a str) -> Option<Self> {
        let mut parts = filename.splitn(3, '_');
        let package = parts.next()?;
        let version = parts.next()?;
        let (architecture, extension) = parts.next()?.split_once('.')?;

        if package.is_empty() || version.is_empty() || architecture.is_empty() {
            return None;
        }

        Some(Self {
            package,
            version,
            architecture,
            extension,
        })
    }
}

/// Find the automatic handler of a byhand file.
pub fn find_handler<'h>(
    handlers: &'h [AutoByhandHandler],
    manifest: &UploadManifest,
    file: &FileEntry,
) -> Option<&'h AutoByhandHandler> {
    let name = ByhandName::parse(&file.filename)?;

    if name.version != manifest.version.without_epoch() {
        return None;
    }

    handlers.iter().find(|h| {
        h.package == name.package
            && h.source == manifest.source
            && h
                .extension
                .as_deref()
                .map(|ext| ext == name.extension)
                .unwrap_or(true)
            && h
                .architectures
                .as_ref()
                .map(|archs| archs.iter().any(|a| a == name.architecture))
                .unwrap_or(true)
    })
}

/// The suite whose overrides apply to `suite`.
fn override_suite<'s>(suites: &'s [SuiteConfig], suite: &'s str) -> &'s str {
    suites
        .iter()
        .find(|s| s.name == suite)
        .map(|s| s.override_suite())
        .unwrap_or(suite)
}

/// Files of `manifest` lacking an override in some target suite.
///
/// Byhand files never have overrides and are not considered.
pub fn missing_overrides(
    manifest: &UploadManifest,
    targets: &BTreeSet<String>,
    suites: &[SuiteConfig],
    db: &dyn ArchiveDatabase,
    cache: &RunCache,
) -> Result<BTreeSet<String>> {
    let mut missing = BTreeSet::new();

    for entry in manifest.files.values().filter(|e| !e.is_byhand()) {
        let (package, kind) = match entry.package_type() {
            Some(PackageType::SourceControl) => (manifest.source.as_str(), OverrideKind::Dsc),
            Some(t @ (PackageType::BinaryDeb | PackageType::BinaryUdeb)) => {
                let package = match entry.identity() {
                    Some(identity) => identity.package.as_str(),
                    None => match parse_binary_filename(&entry.filename) {
                        Some((package, _, _)) => package,
                        None => continue,
                    },
                };

                let kind = if t == PackageType::BinaryUdeb {
                    OverrideKind::Udeb
                } else {
                    OverrideKind::Deb
                };

                (package, kind)
            }
            _ => continue,
        };

        for target in targets {
            let suite = override_suite(suites, target);

            if cache.override_for(db, package, suite, kind)?.is_none() {
                missing.insert(entry.filename.clone());
            }
        }
    }

    Ok(missing)
}

/// Everything routing depends on besides the manifest.
#[derive(Clone, Copy, Debug)]
pub struct RoutingContext<'a> {
    pub diagnostics: &'a Diagnostics,
    pub new_files: &'a BTreeSet<String>,
    pub targets: &'a BTreeSet<String>,
    /// The upload was released from embargo.
    pub from_disembargo: bool,
}

/// Pick the terminal outcome of a checked upload.
///
/// The first matching rule wins: rejects, new files, byhand files, embargo, policy
/// queues, then acceptance.
pub fn route(
    manifest: &UploadManifest,
    config: &ArchiveConfig,
    context: RoutingContext<'_>,
) -> Decision {
    if context.diagnostics.has_rejects() {
        return Decision::Reject;
    }

    if !context.new_files.is_empty() {
        return Decision::Queue(QueueKind::New);
    }

    let byhand = manifest.byhand_files().collect::<Vec<_>>();
    if !byhand.is_empty() {
        let automatic = byhand
            .iter()
            .all(|f| find_handler(&config.autobyhand, manifest, f).is_some());

        return Decision::Queue(if automatic {
            QueueKind::Autobyhand
        } else {
            QueueKind::Byhand
        });
    }

    if config.embargo.enabled {
        return Decision::Queue(if context.from_disembargo {
            QueueKind::Unembargo
        } else {
            QueueKind::Embargo
        });
    }

    let policy_queues = context
        .targets
        .iter()
        .filter_map(|t| config.suite(t).and_then(|s| s.policy_queue))
        .map(QueueKind::from)
        .collect::<BTreeSet<_>>();

    for kind in [QueueKind::StableUpdate, QueueKind::OldStableUpdate] {
        if policy_queues.contains(&kind) {
            return Decision::Queue(kind);
        }
    }

    Decision::Accept
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            config::EXAMPLE_CONFIG,
            database::{ArchiveState, OverrideEntry, YamlArchiveDatabase},
            diagnostic::DiagnosticKind,
            testutil::UploadFixture,
        },
    };

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn hello(byhand: &[&str]) -> Result<UploadManifest> {
        let mut upload = UploadFixture::new("debian-installer", "20220101");
        upload.add_binary("debian-installer", "amd64")?;
        for name in byhand {
            upload.add_file(*name, b"images".to_vec(), "raw-installer");
        }

        let manifest = UploadManifest::parse(upload.changes_filename(), &upload.changes_text()?)?;
        for entry in manifest.files.values() {
            if let Some(t) = crate::validation::classify_file(entry) {
                entry.set_package_type(t)?;
            }
        }

        Ok(manifest)
    }

    fn context<'a>(
        diagnostics: &'a Diagnostics,
        new_files: &'a BTreeSet<String>,
        targets: &'a BTreeSet<String>,
    ) -> RoutingContext<'a> {
        RoutingContext {
            diagnostics,
            new_files,
            targets,
            from_disembargo: false,
        }
    }

    #[test]
    fn byhand_names() {
        assert_eq!(
            ByhandName::parse("debian-installer-images_20220101_amd64.tar.gz"),
            Some(ByhandName {
                package: "debian-installer-images",
                version: "20220101",
                architecture: "amd64",
                extension: "tar.gz",
            })
        );
        assert_eq!(ByhandName::parse("images_1.0_amd64"), None);
        assert_eq!(ByhandName::parse("images.tar.gz"), None);
    }

    #[test]
    fn routing_order() -> Result<()> {
        let mut config = ArchiveConfig::from_yaml_str(EXAMPLE_CONFIG)?;
        let empty = BTreeSet::new();
        let unstable = set(&["unstable"]);
        let clean = Diagnostics::new();

        let plain = hello(&[])?;
        assert_eq!(route(&plain, &config, context(&clean, &empty, &unstable)), Decision::Accept);

        let mut rejected = Diagnostics::new();
        rejected.reject(DiagnosticKind::Policy, "no");
        let new = set(&["debian-installer_20220101_amd64.deb"]);
        assert_eq!(
            route(&plain, &config, context(&rejected, &new, &unstable)),
            Decision::Reject
        );
        assert_eq!(
            route(&plain, &config, context(&clean, &new, &unstable)),
            Decision::Queue(QueueKind::New)
        );

        let handled = hello(&["debian-installer-images_20220101_amd64.tar.gz"])?;
        assert_eq!(
            route(&handled, &config, context(&clean, &empty, &unstable)),
            Decision::Queue(QueueKind::Autobyhand)
        );

        let unhandled = hello(&[
            "debian-installer-images_20220101_amd64.tar.gz",
            "other-images_20220101_amd64.tar.gz",
        ])?;
        assert_eq!(
            route(&unhandled, &config, context(&clean, &empty, &unstable)),
            Decision::Queue(QueueKind::Byhand)
        );

        let proposed = set(&["proposed-updates"]);
        assert_eq!(
            route(&plain, &config, context(&clean, &empty, &proposed)),
            Decision::Queue(QueueKind::StableUpdate)
        );

        config.embargo.enabled = true;
        assert_eq!(
            route(&plain, &config, context(&clean, &empty, &proposed)),
            Decision::Queue(QueueKind::Embargo)
        );
        let mut released = context(&clean, &empty, &proposed);
        released.from_disembargo = true;
        assert_eq!(
            route(&plain, &config, released),
            Decision::Queue(QueueKind::Unembargo)
        );

        Ok(())
    }

    #[test]
    fn overrides_follow_override_suite() -> Result<()> {
        let config = ArchiveConfig::from_yaml_str(EXAMPLE_CONFIG)?;
        let manifest = hello(&["debian-installer-images_20220101_amd64.tar.gz"])?;

        let db = YamlArchiveDatabase::in_memory(ArchiveState {
            overrides: vec![OverrideEntry {
                package: "debian-installer".to_string(),
                suite: "stable".to_string(),
                kind: OverrideKind::Deb,
                section: "devel".to_string(),
                priority: "optional".to_string(),
                component: "main".to_string(),
            }],
            ..Default::default()
        });
        let cache = RunCache::new();

        assert!(missing_overrides(
            &manifest,
            &set(&["proposed-updates"]),
            &config.suites,
            &db,
            &cache
        )?
        .is_empty());
        assert_eq!(
            missing_overrides(&manifest, &set(&["unstable"]), &config.suites, &db, &cache)?,
            set(&["debian-installer_20220101_amd64.deb"])
        );

        Ok(())
    }
}
