// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Upload manifests and their file lists.

A `.changes` file is parsed into an [UploadManifest]. Its `Files` field, merged with
the `Checksums-*` fields, becomes an ordered map of [FileEntry]. The same expansion
turns the file list of a `.dsc` into the entries of a [SourceControlFile].
*/

use {
    crate::error::{Result, UploadError},
    debian_packaging::{
        changes::{ChangesFile, ChangesFileEntry},
        control::ControlParagraph,
        debian_source_control::{parse_checksum_row, DebianSourceControlFile},
        error::DebianError,
        io::{ChecksumType, MultiContentDigest},
        package_version::PackageVersion,
    },
    chrono::{DateTime, Utc},
    once_cell::sync::{Lazy, OnceCell},
    regex::Regex,
    std::collections::{BTreeMap, BTreeSet},
    strum_macros::Display,
};

/// What an uploaded file is.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[strum(serialize_all = "kebab-case")]
pub enum PackageType {
    BinaryDeb,
    BinaryUdeb,
    SourceControl,
    SourceTarball,
    SourceDiff,
    Byhand,
}

impl PackageType {
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::BinaryDeb | Self::BinaryUdeb)
    }

    pub fn is_source(&self) -> bool {
        matches!(
            self,
            Self::SourceControl | Self::SourceTarball | Self::SourceDiff
        )
    }
}

/// The flavor of file list being expanded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileCategory {
    /// `.changes` rows: checksum, size, section, priority, filename.
    Changes,
    /// `.dsc` rows: checksum, size, filename.
    SourceControl,
}

/// Package, version and architecture read from a binary package's own control file.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct BinaryIdentity {
    pub package: String,
    pub version: String,
    pub architecture: String,
}

/// Where a file entry came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileOrigin {
    /// Listed by the manifest itself.
    Manifest,
    /// Referenced by the source descriptor and found among other staged uploads.
    Spliced,
}

/// A file referenced by a manifest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileEntry {
    pub filename: String,
    pub size: u64,
    /// Lowercase hex digests by flavor.
    pub hashes: BTreeMap<ChecksumType, String>,
    pub section: String,
    pub priority: String,
    pub component: String,
    pub origin: FileOrigin,
    package_type: OnceCell<PackageType>,
    identity: OnceCell<BinaryIdentity>,
}

impl FileEntry {
    pub fn new(filename: impl ToString, size: u64) -> Self {
        Self {
            filename: filename.to_string(),
            size,
            hashes: BTreeMap::new(),
            section: "-".to_string(),
            priority: "-".to_string(),
            component: "main".to_string(),
            origin: FileOrigin::Manifest,
            package_type: OnceCell::new(),
            identity: OnceCell::new(),
        }
    }

    fn from_changes_row(row: &ChangesFileEntry<'_>) -> Self {
        let mut entry = Self::new(row.filename, row.size);
        entry
            .hashes
            .insert(ChecksumType::Md5, row.digest.digest_hex());
        entry.section = row.section.to_string();
        entry.priority = row.priority.to_string();
        entry.component = row.component().to_string();

        entry
    }

    /// Whether this file needs out-of-band processing.
    pub fn is_byhand(&self) -> bool {
        self.section == "byhand" || self.section.starts_with("raw-")
    }

    /// The package type, once assigned.
    pub fn package_type(&self) -> Option<PackageType> {
        self.package_type.get().copied()
    }

    /// Assign the package type.
    ///
    /// A type is assigned once. Assigning the same type again is a no-op and assigning
    /// a different one is an error.
    pub fn set_package_type(&self, package_type: PackageType) -> Result<()> {
        let current = self.package_type.get_or_init(|| package_type);

        if *current == package_type {
            Ok(())
        } else {
            Err(UploadError::Integrity(format!(
                "{} was already classified as {}, not {}",
                self.filename, current, package_type
            )))
        }
    }

    /// The identity read from the file's own control data, once validated.
    pub fn identity(&self) -> Option<&BinaryIdentity> {
        self.identity.get()
    }

    /// Attach the identity read from the package.
    pub fn set_identity(&self, identity: BinaryIdentity) -> Result<()> {
        let current = self.identity.get_or_init(|| identity.clone());

        if *current == identity {
            Ok(())
        } else {
            Err(UploadError::Integrity(format!(
                "{} already carries identity {}_{}_{}",
                self.filename, current.package, current.version, current.architecture
            )))
        }
    }

    /// Compare declared size and digests against actual ones.
    ///
    /// Returns a description of every mismatch.
    pub fn digest_mismatches(&self, size: u64, digests: &MultiContentDigest) -> Vec<String> {
        let mut mismatches = vec![];

        if size != self.size {
            mismatches.push(format!(
                "{}: size {} does not match declared size {}",
                self.filename, size, self.size
            ));
        }

        for (checksum, declared) in &self.hashes {
            let actual = digests.digest_from_checksum(*checksum).digest_hex();

            if !actual.eq_ignore_ascii_case(declared) {
                mismatches.push(format!(
                    "{}: {} {} does not match declared {}",
                    self.filename, checksum, actual, declared
                ));
            }
        }

        mismatches
    }

    /// Compare with another record of the same file.
    ///
    /// Only digest flavors present in both records are compared.
    pub fn record_mismatches(&self, other: &FileEntry, other_name: &str) -> Vec<String> {
        let mut mismatches = vec![];

        if self.size != other.size {
            mismatches.push(format!(
                "{}: size {} differs from {} in {}",
                self.filename, self.size, other.size, other_name
            ));
        }

        for (checksum, declared) in &self.hashes {
            if let Some(theirs) = other.hashes.get(checksum) {
                if !theirs.eq_ignore_ascii_case(declared) {
                    mismatches.push(format!(
                        "{}: {} {} differs from {} in {}",
                        self.filename, checksum, declared, theirs, other_name
                    ));
                }
            }
        }

        mismatches
    }
}

/// Names a file list may carry. Entries are joined onto queue directories, so anything
/// that is not a plain basename is refused.
static RE_FILENAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.+~-]*$").expect("filename regex is valid")
});

fn check_filename(field: &str, filename: &str) -> Result<()> {
    if RE_FILENAME.is_match(filename) {
        Ok(())
    } else {
        Err(UploadError::Parse(format!(
            "{}: invalid filename {:?}",
            field, filename
        )))
    }
}

fn list_error(e: DebianError) -> UploadError {
    match e {
        DebianError::ControlRequiredFieldMissing(field) => UploadError::MissingField(field),
        e => UploadError::Parse(e.to_string()),
    }
}

fn word_set<'a>(words: Option<Box<dyn Iterator<Item = &'a str> + 'a>>) -> BTreeSet<String> {
    words
        .map(|iter| iter.map(|s| s.to_string()).collect())
        .unwrap_or_default()
}

const CLEARSIGN_HEADER: &str = "-----BEGIN PGP SIGNED MESSAGE-----";
const SIGNATURE_HEADER: &str = "-----BEGIN PGP SIGNATURE-----";

/// Remove an inline OpenPGP clearsign wrapper, if present.
///
/// Dash-escaped lines are unescaped. The signature itself is not examined.
pub fn strip_clearsign(text: &str) -> String {
    if !text.trim_start().starts_with(CLEARSIGN_HEADER) {
        return text.to_string();
    }

    let mut lines = text
        .lines()
        .skip_while(|l| !l.starts_with(CLEARSIGN_HEADER))
        .skip(1);

    // Armor headers end at the first blank line.
    for line in lines.by_ref() {
        if line.trim().is_empty() {
            break;
        }
    }

    let mut content = String::new();
    for line in lines.take_while(|l| !l.starts_with(SIGNATURE_HEADER)) {
        content.push_str(line.strip_prefix("- ").unwrap_or(line));
        content.push('\n');
    }

    content
}

/// Parse manifest text into a paragraph of fields.
pub fn parse(text: &str) -> Result<ControlParagraph<'static>> {
    ControlParagraph::parse_str(text).map_err(|e| UploadError::Parse(e.to_string()))
}

/// Expand the file list of a paragraph into entries keyed by filename.
///
/// The `Files` field defines the set of files. `Checksums-Sha1` and `Checksums-Sha256`
/// add digests to those files and must agree with it on sizes and membership.
pub fn build_file_list(
    fields: &ControlParagraph<'_>,
    category: FileCategory,
) -> Result<BTreeMap<String, FileEntry>> {
    let files_field = ChecksumType::Md5.file_list_field();
    let lines = fields
        .iter_field_lines(files_field)
        .ok_or_else(|| UploadError::MissingField(files_field.to_string()))?;

    let mut entries = BTreeMap::new();

    for row in lines.filter(|l| !l.trim().is_empty()) {
        let entry = match category {
            FileCategory::Changes => {
                FileEntry::from_changes_row(&ChangesFileEntry::parse_row(row).map_err(list_error)?)
            }
            FileCategory::SourceControl => {
                let row = parse_checksum_row(files_field, ChecksumType::Md5, row)
                    .map_err(list_error)?;
                let mut entry = FileEntry::new(row.filename, row.size);
                entry
                    .hashes
                    .insert(ChecksumType::Md5, row.digest.digest_hex());
                entry
            }
        };

        check_filename(files_field, &entry.filename)?;

        if entries.contains_key(&entry.filename) {
            return Err(UploadError::Parse(format!(
                "{} is listed more than once in {}",
                entry.filename, files_field
            )));
        }

        entries.insert(entry.filename.clone(), entry);
    }

    for checksum in [ChecksumType::Sha1, ChecksumType::Sha256] {
        let field = checksum.file_list_field();

        let lines = match fields.iter_field_lines(field) {
            Some(lines) => lines,
            None => continue,
        };

        let mut listed = BTreeSet::new();

        for row in lines.filter(|l| !l.trim().is_empty()) {
            let row = parse_checksum_row(field, checksum, row).map_err(list_error)?;
            check_filename(field, row.filename)?;

            let entry = entries.get_mut(row.filename).ok_or_else(|| {
                UploadError::Integrity(format!(
                    "{} is listed in {} but not in {}",
                    row.filename, field, files_field
                ))
            })?;

            if entry.size != row.size {
                return Err(UploadError::Integrity(format!(
                    "{}: size {} in {} differs from {} in {}",
                    row.filename, row.size, field, entry.size, files_field
                )));
            }

            entry.hashes.insert(checksum, row.digest.digest_hex());
            listed.insert(row.filename.to_string());
        }

        if let Some(missing) = entries.keys().find(|name| !listed.contains(*name)) {
            return Err(UploadError::Integrity(format!(
                "{} is listed in {} but not in {}",
                missing, files_field, field
            )));
        }
    }

    Ok(entries)
}

/// A parsed upload manifest.
#[derive(Clone, Debug)]
pub struct UploadManifest {
    /// Filename of the manifest.
    pub filename: String,
    pub source: String,
    pub version: PackageVersion,
    pub architectures: BTreeSet<String>,
    pub distributions: BTreeSet<String>,
    pub binaries: BTreeSet<String>,
    pub maintainer: String,
    pub changed_by: Option<String>,
    pub urgency: Option<String>,
    pub closes: Vec<u64>,
    pub date: Option<DateTime<Utc>>,
    pub files: BTreeMap<String, FileEntry>,
    changes: ChangesFile<'static>,
}

impl UploadManifest {
    /// Build a manifest from a parsed `.changes` file.
    ///
    /// Fields are expected to have been checked already. Absent mandatory fields
    /// are still reported as [UploadError::MissingField].
    pub fn from_changes(filename: impl ToString, changes: ChangesFile<'static>) -> Result<Self> {
        let source = changes.source().map_err(list_error)?.to_string();
        let version = changes.version().map_err(list_error)?;
        let maintainer = changes.maintainer().map_err(list_error)?.to_string();

        let architectures = word_set(changes.architecture());
        let distributions = word_set(changes.distribution());
        let binaries = word_set(changes.binary());

        let closes = match changes.closes() {
            Some(iter) => iter
                .map(|bug| {
                    bug.parse::<u64>()
                        .ok()
                        .filter(|n| *n > 0)
                        .ok_or_else(|| UploadError::Parse(format!("invalid bug number in Closes: {}", bug)))
                })
                .collect::<Result<Vec<_>>>()?,
            None => vec![],
        };

        let date = if changes.has_field("Date") {
            Some(
                changes
                    .date()
                    .map_err(|e| UploadError::Parse(e.to_string()))?,
            )
        } else {
            None
        };

        let files = build_file_list(&changes, FileCategory::Changes)?;

        Ok(Self {
            filename: filename.to_string(),
            source,
            version,
            architectures,
            distributions,
            binaries,
            maintainer,
            changed_by: changes.changed_by().map(|s| s.to_string()),
            urgency: changes.urgency().map(|s| s.to_string()),
            closes,
            date,
            files,
            changes,
        })
    }

    /// Parse manifest text.
    pub fn parse(filename: impl ToString, text: &str) -> Result<Self> {
        Self::from_changes(filename, ChangesFile::from(parse(text)?))
    }

    /// The underlying `.changes` paragraph.
    pub fn changes(&self) -> &ChangesFile<'static> {
        &self.changes
    }

    /// Whether the upload contains source.
    pub fn is_sourceful(&self) -> bool {
        self.architectures.contains("source")
    }

    /// Binary architectures of the upload.
    pub fn binary_architectures(&self) -> impl Iterator<Item = &str> {
        self.architectures
            .iter()
            .map(|s| s.as_str())
            .filter(|a| *a != "source")
    }

    /// Entries of a given package type.
    pub fn files_of_type(&self, package_type: PackageType) -> impl Iterator<Item = &FileEntry> {
        self.files
            .values()
            .filter(move |f| f.package_type() == Some(package_type))
    }

    pub fn byhand_files(&self) -> impl Iterator<Item = &FileEntry> {
        self.files.values().filter(|f| f.is_byhand())
    }

    /// Add a file the manifest does not list itself.
    pub fn splice_file(&mut self, mut entry: FileEntry) {
        entry.origin = FileOrigin::Spliced;
        self.files.insert(entry.filename.clone(), entry);
    }
}

/// A parsed source control descriptor.
#[derive(Clone, Debug)]
pub struct SourceControlFile {
    pub filename: String,
    pub format: String,
    pub source: String,
    pub version: PackageVersion,
    /// Raw build dependency fields by name.
    pub build_dependencies: Vec<(String, String)>,
    pub files: BTreeMap<String, FileEntry>,
}

impl SourceControlFile {
    /// Build from a parsed `.dsc`.
    pub fn from_dsc(filename: impl ToString, dsc: &DebianSourceControlFile<'_>) -> Result<Self> {
        Ok(Self {
            filename: filename.to_string(),
            format: dsc.format().map_err(list_error)?.to_string(),
            source: dsc.source().map_err(list_error)?.to_string(),
            version: dsc.version().map_err(list_error)?,
            build_dependencies: dsc
                .build_dependencies()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            files: build_file_list(dsc, FileCategory::SourceControl)?,
        })
    }

    /// Parse descriptor text.
    pub fn parse(filename: impl ToString, text: &str) -> Result<Self> {
        Self::from_dsc(filename, &DebianSourceControlFile::from(parse(text)?))
    }
}
