// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Structural validation of uploads.

[check_manifest_fields()] vets the raw `.changes` fields before an
[UploadManifest] is built from them. [StructuralValidator] then classifies every
file of the manifest and checks the staged copies: sizes and digests, the layout
and control data of binary packages and the file set of the source package.

Validation only records [Diagnostics]. An `Err` means the staging area itself
could not be read.
*/

pub mod binary;
pub mod checksums;
pub mod source;
pub mod timestamps;

use {
    self::timestamps::TimestampWindow,
    crate::{
        config::ChecksConfig,
        database::ArchiveDatabase,
        diagnostic::{DiagnosticKind, Diagnostics},
        error::Result,
        manifest::{FileEntry, PackageType, SourceControlFile, UploadManifest},
    },
    chrono::{DateTime, Utc},
    debian_packaging::{changes::ChangesFile, package_version::PackageVersion},
    log::debug,
    once_cell::sync::Lazy,
    regex::Regex,
    std::{collections::BTreeSet, path::Path},
};

static RE_PACKAGE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9+.-]+$").expect("package name regex is valid"));

static RE_ARCHITECTURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]*$").expect("architecture regex is valid"));

const SOURCE_TARBALL_SUFFIXES: &[&str] = &[
    ".tar.gz",
    ".tar.bz2",
    ".tar.xz",
    ".tar.lzma",
    ".tar.gz.asc",
    ".tar.bz2.asc",
    ".tar.xz.asc",
    ".tar.lzma.asc",
];

/// Whether a string is a valid package name.
pub fn is_valid_package_name(name: &str) -> bool {
    RE_PACKAGE_NAME.is_match(name)
}

/// Check the fields of a `.changes` file.
///
/// Returns whether an [UploadManifest] can be built from it.
pub fn check_manifest_fields(changes: &ChangesFile<'_>, diagnostics: &mut Diagnostics) -> bool {
    let mut buildable = true;

    for field in changes.missing_mandatory_fields() {
        diagnostics.reject(
            DiagnosticKind::MissingField,
            format!("missing mandatory field {}", field),
        );
        buildable = false;
    }

    if let Ok(source) = changes.source() {
        if !is_valid_package_name(source) {
            diagnostics.reject(
                DiagnosticKind::Parse,
                format!("invalid source name {}", source),
            );
            buildable = false;
        }
    }

    if let Ok(version) = changes.version_str() {
        if let Err(e) = PackageVersion::parse(version) {
            diagnostics.reject(
                DiagnosticKind::Parse,
                format!("invalid version {}: {}", version, e),
            );
            buildable = false;
        }
    }

    if let Some(binaries) = changes.binary() {
        for binary in binaries.filter(|b| !is_valid_package_name(b)) {
            diagnostics.reject(
                DiagnosticKind::Parse,
                format!("invalid binary package name {}", binary),
            );
        }
    }

    if let Some(architectures) = changes.architecture() {
        for arch in architectures.filter(|a| !RE_ARCHITECTURE.is_match(a)) {
            diagnostics.reject(
                DiagnosticKind::Parse,
                format!("invalid architecture {}", arch),
            );
        }
    }

    buildable
}

/// Determine the package type of a file from its section and name.
pub fn classify_file(entry: &FileEntry) -> Option<PackageType> {
    let name = entry.filename.as_str();

    if entry.is_byhand() {
        Some(PackageType::Byhand)
    } else if name.ends_with(".deb") {
        Some(PackageType::BinaryDeb)
    } else if name.ends_with(".udeb") {
        Some(PackageType::BinaryUdeb)
    } else if name.ends_with(".dsc") {
        Some(PackageType::SourceControl)
    } else if name.ends_with(".diff.gz") {
        Some(PackageType::SourceDiff)
    } else if SOURCE_TARBALL_SUFFIXES.iter().any(|s| name.ends_with(s)) {
        Some(PackageType::SourceTarball)
    } else {
        None
    }
}

/// What validation learned beyond its diagnostics.
#[derive(Clone, Debug, Default)]
pub struct ValidationOutcome {
    /// The parsed source control file, for sourceful uploads.
    pub source: Option<SourceControlFile>,
    /// Upstream files the source control file references that could not be found.
    pub missing_files: Vec<FileEntry>,
}

/// Checks an [UploadManifest] against its staged files.
///
/// Validating an unmodified manifest again yields the same diagnostics and leaves
/// its file entries unchanged.
pub struct StructuralValidator<'a> {
    db: &'a dyn ArchiveDatabase,
    window: TimestampWindow,
}

impl<'a> StructuralValidator<'a> {
    pub fn new(checks: &ChecksConfig, db: &'a dyn ArchiveDatabase) -> Self {
        Self::at_time(checks, db, Utc::now())
    }

    /// A validator judging file times relative to `now`.
    pub fn at_time(checks: &ChecksConfig, db: &'a dyn ArchiveDatabase, now: DateTime<Utc>) -> Self {
        Self {
            db,
            window: TimestampWindow::new(checks, now),
        }
    }

    /// Validate a manifest whose files are staged in `staged`.
    pub fn validate(
        &self,
        manifest: &UploadManifest,
        staged: &Path,
        diagnostics: &mut Diagnostics,
    ) -> Result<ValidationOutcome> {
        debug!("validating {}", manifest.filename);

        self.classify(manifest, diagnostics);

        let mut present = BTreeSet::new();
        for entry in manifest.files.values() {
            if checksums::check_staged(entry, &staged.join(&entry.filename), diagnostics)? {
                present.insert(entry.filename.as_str());
            }

            // A file already in the pool is never replaced, so it must be the same file.
            if let Some(pooled) = self.db.pool_file(&entry.filename)? {
                checksums::check_pool(entry, &pooled, diagnostics);
            }
        }

        for entry in manifest.files.values() {
            if entry.package_type().map(|t| t.is_binary()).unwrap_or(false)
                && present.contains(entry.filename.as_str())
            {
                binary::check_binary(
                    manifest,
                    entry,
                    &staged.join(&entry.filename),
                    &self.window,
                    diagnostics,
                )?;
            }
        }

        let mut outcome = ValidationOutcome::default();

        let dscs = manifest
            .files_of_type(PackageType::SourceControl)
            .collect::<Vec<_>>();

        if let [entry] = dscs.as_slice() {
            if present.contains(entry.filename.as_str()) {
                if let Some(dsc) = source::load_source_control(
                    entry,
                    &staged.join(&entry.filename),
                    diagnostics,
                )? {
                    outcome.missing_files =
                        source::check_source(manifest, &dsc, self.db, diagnostics)?;
                    outcome.source = Some(dsc);
                }
            }
        }

        Ok(outcome)
    }

    /// Assign package types and check the source/binary composition.
    fn classify(&self, manifest: &UploadManifest, diagnostics: &mut Diagnostics) {
        for entry in manifest.files.values() {
            match classify_file(entry) {
                Some(package_type) => {
                    if let Err(e) = entry.set_package_type(package_type) {
                        diagnostics.reject(DiagnosticKind::Integrity, e.to_string());
                    }
                }
                None => diagnostics.reject(
                    DiagnosticKind::Integrity,
                    format!("{}: unrecognized file type", entry.filename),
                ),
            }
        }

        let dsc_count = manifest.files_of_type(PackageType::SourceControl).count();

        if manifest.is_sourceful() {
            if dsc_count != 1 {
                diagnostics.reject(
                    DiagnosticKind::Integrity,
                    format!(
                        "source uploads must contain exactly one .dsc; found {}",
                        dsc_count
                    ),
                );
            }
        } else if manifest
            .files
            .values()
            .any(|e| e.package_type().map(|t| t.is_source()).unwrap_or(false))
        {
            diagnostics.reject(
                DiagnosticKind::Integrity,
                "source files uploaded but Architecture does not list source",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            database::{ArchiveState, YamlArchiveDatabase},
            testutil::UploadFixture,
        },
    };

    fn fixture() -> Result<UploadFixture> {
        let mut upload = UploadFixture::new("hello", "2.10-2");
        upload.add_quilt_source(true, &[])?;
        upload.add_binary("hello", "amd64")?;

        Ok(upload)
    }

    fn run(
        upload: &UploadFixture,
        db: &YamlArchiveDatabase,
    ) -> Result<(UploadManifest, Diagnostics, ValidationOutcome)> {
        let dir = tempfile::tempdir()?;
        upload.write_to(dir.path())?;

        let manifest = UploadManifest::parse(upload.changes_filename(), &upload.changes_text()?)?;
        let mut diagnostics = Diagnostics::new();
        let outcome = StructuralValidator::new(&ChecksConfig::default(), db).validate(
            &manifest,
            dir.path(),
            &mut diagnostics,
        )?;

        Ok((manifest, diagnostics, outcome))
    }

    #[test]
    fn valid_upload() -> Result<()> {
        let db = YamlArchiveDatabase::in_memory(ArchiveState::default());
        let (manifest, diagnostics, outcome) = run(&fixture()?, &db)?;

        assert!(diagnostics.is_empty(), "{}", diagnostics);
        assert!(outcome.missing_files.is_empty());
        assert_eq!(outcome.source.map(|s| s.format), Some("3.0 (quilt)".to_string()));

        let deb = &manifest.files["hello_2.10-2_amd64.deb"];
        assert_eq!(deb.package_type(), Some(PackageType::BinaryDeb));
        assert_eq!(deb.identity().map(|i| i.package.as_str()), Some("hello"));
        assert_eq!(
            manifest.files["hello_2.10.orig.tar.gz"].package_type(),
            Some(PackageType::SourceTarball)
        );

        Ok(())
    }

    #[test]
    fn revalidation_is_idempotent() -> Result<()> {
        let mut upload = fixture()?;
        upload.add_file("hello_2.10-2_all.bin", b"blob".to_vec(), "devel");

        let dir = tempfile::tempdir()?;
        upload.write_to(dir.path())?;
        let manifest = UploadManifest::parse(upload.changes_filename(), &upload.changes_text()?)?;

        let db = YamlArchiveDatabase::in_memory(ArchiveState::default());
        let validator = StructuralValidator::new(&ChecksConfig::default(), &db);

        let mut first = Diagnostics::new();
        validator.validate(&manifest, dir.path(), &mut first)?;
        let files = manifest.files.clone();

        let mut second = Diagnostics::new();
        validator.validate(&manifest, dir.path(), &mut second)?;

        assert!(first.has_rejects());
        assert_eq!(first, second);
        assert_eq!(files, manifest.files);

        Ok(())
    }

    #[test]
    fn missing_upstream_tarball() -> Result<()> {
        let mut upload = UploadFixture::new("hello", "2.10-2");
        upload.add_quilt_source(false, &[])?;

        let db = YamlArchiveDatabase::in_memory(ArchiveState::default());
        let (_, diagnostics, outcome) = run(&upload, &db)?;
        assert!(diagnostics.has_reject_of_kind(DiagnosticKind::Integrity));
        assert_eq!(
            outcome
                .missing_files
                .iter()
                .map(|e| e.filename.as_str())
                .collect::<Vec<_>>(),
            vec!["hello_2.10.orig.tar.gz"]
        );

        // The pool copy satisfies the reference.
        let orig = upload.orig();
        let db = YamlArchiveDatabase::in_memory(ArchiveState {
            pool: vec![crate::testutil::pool_file(&orig.name, &orig.data)?],
            ..Default::default()
        });
        let (_, diagnostics, outcome) = run(&upload, &db)?;
        assert!(diagnostics.is_empty(), "{}", diagnostics);
        assert!(outcome.missing_files.is_empty());

        Ok(())
    }

    #[test]
    fn pool_name_collision() -> Result<()> {
        let upload = fixture()?;
        let deb = upload
            .files
            .iter()
            .find(|f| f.name == "hello_2.10-2_amd64.deb")
            .cloned()
            .unwrap();

        // The identical file in the pool is accepted as a re-upload.
        let db = YamlArchiveDatabase::in_memory(ArchiveState {
            pool: vec![crate::testutil::pool_file(&deb.name, &deb.data)?],
            ..Default::default()
        });
        let (_, diagnostics, _) = run(&upload, &db)?;
        assert!(diagnostics.is_empty(), "{}", diagnostics);

        let db = YamlArchiveDatabase::in_memory(ArchiveState {
            pool: vec![crate::testutil::pool_file(&deb.name, b"some other deb")?],
            ..Default::default()
        });
        let (_, diagnostics, _) = run(&upload, &db)?;
        assert!(diagnostics.rejects().all(|d| d.kind == DiagnosticKind::Integrity));
        assert!(diagnostics
            .rejects()
            .any(|d| d.message.contains("hello_2.10-2_amd64.deb")
                && d.message.contains("copy in the pool")));

        Ok(())
    }

    #[test]
    fn binary_mismatches_manifest() -> Result<()> {
        let mut upload = fixture()?;
        upload.add_binary("hello-doc", "all")?;
        // Drop the declaration of the package while keeping the file.
        upload.binaries.retain(|b| b != "hello-doc");

        let db = YamlArchiveDatabase::in_memory(ArchiveState::default());
        let (_, diagnostics, _) = run(&upload, &db)?;

        assert!(diagnostics
            .rejects()
            .any(|d| d.message.contains("not in the manifest's Binary field")));

        Ok(())
    }

    #[test]
    fn corrupted_file() -> Result<()> {
        let upload = fixture()?;
        let dir = tempfile::tempdir()?;
        upload.write_to(dir.path())?;
        std::fs::write(dir.path().join("hello_2.10.orig.tar.gz"), b"tampered")?;

        let manifest = UploadManifest::parse(upload.changes_filename(), &upload.changes_text()?)?;
        let db = YamlArchiveDatabase::in_memory(ArchiveState::default());
        let mut diagnostics = Diagnostics::new();
        StructuralValidator::new(&ChecksConfig::default(), &db).validate(
            &manifest,
            dir.path(),
            &mut diagnostics,
        )?;

        assert!(diagnostics
            .rejects()
            .all(|d| d.kind == DiagnosticKind::Integrity));
        assert!(diagnostics
            .rejects()
            .any(|d| d.message.contains("hello_2.10.orig.tar.gz")));

        Ok(())
    }

    #[test]
    fn manifest_field_syntax() -> Result<()> {
        let changes = ChangesFile::parse_str("Source: Hello\nVersion: 1.0\n")?;
        let mut diagnostics = Diagnostics::new();

        assert!(!check_manifest_fields(&changes, &mut diagnostics));
        assert!(diagnostics.has_reject_of_kind(DiagnosticKind::MissingField));
        assert!(diagnostics
            .rejects()
            .any(|d| d.message == "invalid source name Hello"));

        Ok(())
    }
}
