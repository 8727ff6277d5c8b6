// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Source package checks. */

use {
    super::checksums,
    crate::{
        database::ArchiveDatabase,
        diagnostic::{DiagnosticKind, Diagnostics},
        error::Result,
        manifest::{strip_clearsign, FileEntry, SourceControlFile, UploadManifest},
    },
    debian_packaging::binary_package_control::is_empty_dependency_expression,
    std::{collections::BTreeMap, path::Path},
};

/// Source formats this archive can unpack.
pub const SUPPORTED_FORMATS: &[&str] = &["1.0", "3.0 (quilt)", "3.0 (native)"];

const TARBALL_COMPRESSIONS: &[&str] = &[".gz", ".bz2", ".xz", ".lzma"];

/// The role of a file referenced by a source control file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SourceFileKind {
    /// The upstream tarball.
    OrigTarball,
    /// An additional upstream tarball for a named component.
    OrigComponentTarball(String),
    /// Detached signature of an upstream tarball.
    OrigSignature,
    DebianTarball,
    NativeTarball,
    Diff,
}

impl SourceFileKind {
    /// Whether this is upstream content that may be shared between uploads.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::OrigTarball | Self::OrigComponentTarball(_) | Self::OrigSignature
        )
    }
}

/// Classify a file referenced by the source control file of `source`.
///
/// Returns [None] if the name does not follow any source file naming convention.
pub fn classify_source_file(source: &str, filename: &str) -> Option<SourceFileKind> {
    let rest = filename.strip_prefix(source)?.strip_prefix('_')?;

    if rest.ends_with(".diff.gz") {
        return Some(SourceFileKind::Diff);
    }

    let (rest, signature) = match rest.strip_suffix(".asc") {
        Some(rest) => (rest, true),
        None => (rest, false),
    };

    let base = TARBALL_COMPRESSIONS
        .iter()
        .find_map(|ext| rest.strip_suffix(ext))?
        .strip_suffix(".tar")?;

    let kind = if base.ends_with(".orig") {
        SourceFileKind::OrigTarball
    } else if let Some((_, component)) = base.rsplit_once(".orig-") {
        if component.is_empty()
            || !component
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return None;
        }
        SourceFileKind::OrigComponentTarball(component.to_string())
    } else if base.ends_with(".debian") {
        SourceFileKind::DebianTarball
    } else {
        SourceFileKind::NativeTarball
    };

    match (signature, kind) {
        (false, kind) => Some(kind),
        (true, SourceFileKind::OrigTarball | SourceFileKind::OrigComponentTarball(_)) => {
            Some(SourceFileKind::OrigSignature)
        }
        (true, _) => None,
    }
}

/// Load the source control file of an upload from the staging area.
pub fn load_source_control(
    entry: &FileEntry,
    path: &Path,
    diagnostics: &mut Diagnostics,
) -> Result<Option<SourceControlFile>> {
    let data = std::fs::read(path)?;
    let text = match String::from_utf8(data) {
        Ok(text) => text,
        Err(_) => {
            diagnostics.reject(
                DiagnosticKind::Parse,
                format!("{}: not valid UTF-8", entry.filename),
            );
            return Ok(None);
        }
    };

    match SourceControlFile::parse(&entry.filename, &strip_clearsign(&text)) {
        Ok(dsc) => Ok(Some(dsc)),
        Err(e) => {
            let kind = e.diagnostic_kind().unwrap_or(DiagnosticKind::Parse);
            diagnostics.reject(kind, format!("{}: {}", entry.filename, e));
            Ok(None)
        }
    }
}

/// Check the format and file set of a source control file.
///
/// A reject is recorded for every referenced file that is neither part of the upload
/// nor in the pool. Upstream files among them are returned, as another upload may
/// provide them.
pub fn check_source(
    manifest: &UploadManifest,
    dsc: &SourceControlFile,
    db: &dyn ArchiveDatabase,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<FileEntry>> {
    let name = dsc.filename.as_str();

    if !SUPPORTED_FORMATS.contains(&dsc.format.as_str()) {
        diagnostics.reject(
            DiagnosticKind::Integrity,
            format!("{}: unsupported source format {}", name, dsc.format),
        );
    }

    if dsc.source != manifest.source {
        diagnostics.reject(
            DiagnosticKind::Integrity,
            format!("{}: source {} does not match {}", name, dsc.source, manifest.source),
        );
    }
    if dsc.version != manifest.version {
        diagnostics.reject(
            DiagnosticKind::Integrity,
            format!("{}: version {} does not match {}", name, dsc.version, manifest.version),
        );
    }

    for (field, value) in &dsc.build_dependencies {
        if is_empty_dependency_expression(value) {
            diagnostics.reject(
                DiagnosticKind::Parse,
                format!("{}: empty dependency expression in {}", name, field),
            );
        }
    }

    let mut kinds = BTreeMap::new();
    for filename in dsc.files.keys() {
        match classify_source_file(&dsc.source, filename) {
            Some(kind) => {
                kinds.insert(filename.as_str(), kind);
            }
            None => diagnostics.reject(
                DiagnosticKind::Integrity,
                format!("{}: {} is not a recognized source file name", name, filename),
            ),
        }
    }

    check_file_set(name, &dsc.format, kinds.values(), diagnostics);

    let component = manifest
        .files
        .get(name)
        .map(|e| e.component.clone())
        .unwrap_or_else(|| "main".to_string());

    let mut missing = vec![];

    for (filename, dsc_entry) in &dsc.files {
        if let Some(entry) = manifest.files.get(filename) {
            checksums::cross_check(entry, dsc_entry, name, diagnostics);
        } else if let Some(pooled) = db.pool_file(filename)? {
            checksums::check_pool(dsc_entry, &pooled, diagnostics);
        } else {
            diagnostics.reject(
                DiagnosticKind::Integrity,
                format!(
                    "{}: references {} which is neither uploaded nor in the pool",
                    name, filename
                ),
            );

            if kinds.get(filename.as_str()).map(|k| k.is_upstream()).unwrap_or(false) {
                let mut entry = dsc_entry.clone();
                entry.component = component.clone();
                missing.push(entry);
            }
        }
    }

    for entry in manifest.files.values() {
        if entry.package_type().map(|t| t.is_source()).unwrap_or(false)
            && entry.filename != name
            && !dsc.files.contains_key(&entry.filename)
        {
            diagnostics.reject(
                DiagnosticKind::Integrity,
                format!("{} is not referenced by {}", entry.filename, name),
            );
        }
    }

    Ok(missing)
}

/// Enforce singleton categories and the files each source format needs.
fn check_file_set<'a>(
    name: &str,
    format: &str,
    kinds: impl Iterator<Item = &'a SourceFileKind>,
    diagnostics: &mut Diagnostics,
) {
    let mut orig = 0;
    let mut debian = 0;
    let mut native = 0;
    let mut diff = 0;
    let mut components = BTreeMap::<&str, usize>::new();

    for kind in kinds {
        match kind {
            SourceFileKind::OrigTarball => orig += 1,
            SourceFileKind::OrigComponentTarball(c) => *components.entry(c.as_str()).or_default() += 1,
            SourceFileKind::OrigSignature => {}
            SourceFileKind::DebianTarball => debian += 1,
            SourceFileKind::NativeTarball => native += 1,
            SourceFileKind::Diff => diff += 1,
        }
    }

    let mut reject = |message: String| diagnostics.reject(DiagnosticKind::Integrity, message);

    if orig > 1 {
        reject(format!("{}: multiple upstream tarballs", name));
    }
    for (component, count) in &components {
        if *count > 1 {
            reject(format!("{}: multiple upstream tarballs for component {}", name, component));
        }
    }
    if debian > 1 {
        reject(format!("{}: multiple debian tarballs", name));
    }
    if native > 1 {
        reject(format!("{}: multiple native tarballs", name));
    }
    if diff > 1 {
        reject(format!("{}: multiple diff files", name));
    }

    let has_components = !components.is_empty();

    match format {
        "1.0" => {
            if debian > 0 || has_components {
                reject(format!("{}: format 1.0 cannot contain debian or component tarballs", name));
            }
            match (native, orig, diff) {
                (1, 0, 0) | (0, 1, 1) => {}
                (0, 1, 0) => reject(format!("{}: format 1.0 with an upstream tarball needs a diff", name)),
                _ => reject(format!(
                    "{}: format 1.0 needs a native tarball or an upstream tarball with a diff",
                    name
                )),
            }
        }
        "3.0 (quilt)" => {
            if orig == 0 {
                reject(format!("{}: format 3.0 (quilt) needs an upstream tarball", name));
            }
            if debian == 0 {
                reject(format!("{}: format 3.0 (quilt) needs a debian tarball", name));
            }
            if native > 0 || diff > 0 {
                reject(format!("{}: format 3.0 (quilt) cannot contain native tarballs or diffs", name));
            }
        }
        "3.0 (native)" => {
            if native == 0 {
                reject(format!("{}: format 3.0 (native) needs a native tarball", name));
            }
            if orig > 0 || debian > 0 || diff > 0 || has_components {
                reject(format!("{}: format 3.0 (native) may only contain a native tarball", name));
            }
        }
        _ => {}
    }
}
