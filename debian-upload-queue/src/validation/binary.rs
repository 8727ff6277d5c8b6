// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Binary package checks. */

use {
    super::timestamps::TimestampWindow,
    crate::{
        diagnostic::{DiagnosticKind, Diagnostics},
        error::Result,
        manifest::{BinaryIdentity, FileEntry, UploadManifest},
    },
    debian_packaging::{deb::reader::inspect_deb, package_version::PackageVersion},
    once_cell::sync::Lazy,
    regex::Regex,
    std::path::Path,
};

static RE_BINARY_FILENAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-z0-9][a-z0-9+.-]+)_([^_]+)_([a-z0-9-]+)\.u?deb$")
        .expect("binary filename regex is valid")
});

const CONTROL_MEMBERS: &[&str] = &["control.tar", "control.tar.gz", "control.tar.xz"];
const DATA_MEMBERS: &[&str] = &["data.tar.gz", "data.tar.xz"];

/// Split a binary package filename into package, version and architecture.
pub fn parse_binary_filename(filename: &str) -> Option<(&str, &str, &str)> {
    let caps = RE_BINARY_FILENAME.captures(filename)?;

    Some((
        caps.get(1)?.as_str(),
        caps.get(2)?.as_str(),
        caps.get(3)?.as_str(),
    ))
}

/// Validate one staged binary package and attach its identity to `entry`.
pub fn check_binary(
    manifest: &UploadManifest,
    entry: &FileEntry,
    path: &Path,
    window: &TimestampWindow,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    let filename = entry.filename.as_str();

    let (name_package, name_version, name_arch) = match parse_binary_filename(filename) {
        Some(parts) => parts,
        None => {
            diagnostics.reject(
                DiagnosticKind::Parse,
                format!("{}: not a valid binary package filename", filename),
            );
            return Ok(());
        }
    };

    let inspection = match inspect_deb(std::fs::File::open(path)?) {
        Ok(inspection) => inspection,
        Err(e) => {
            diagnostics.reject(
                DiagnosticKind::Integrity,
                format!("{}: unreadable package: {}", filename, e),
            );
            return Ok(());
        }
    };

    let members = inspection.members.iter().map(|s| s.as_str()).collect::<Vec<_>>();
    let layout_ok = matches!(
        members.as_slice(),
        [first, control, data]
            if *first == "debian-binary"
                && CONTROL_MEMBERS.contains(control)
                && DATA_MEMBERS.contains(data)
    );
    if !layout_ok {
        diagnostics.reject(
            DiagnosticKind::Integrity,
            format!(
                "{}: archive members are [{}]; expected debian-binary, control.tar, data.tar.{{gz,xz}}",
                filename,
                members.join(", ")
            ),
        );
    }

    if inspection.format_version.as_deref() != Some("2.0") {
        diagnostics.reject(
            DiagnosticKind::Integrity,
            format!(
                "{}: unsupported package format {}",
                filename,
                inspection.format_version.as_deref().unwrap_or("(none)")
            ),
        );
    }

    window.check(filename, &inspection.file_times, diagnostics);

    let control = match &inspection.control {
        Some(control) => control,
        None => {
            diagnostics.reject(
                DiagnosticKind::Integrity,
                format!("{}: no control file", filename),
            );
            return Ok(());
        }
    };

    let (package, version, architecture) = match (
        control.package(),
        control.version_str(),
        control.architecture(),
    ) {
        (Ok(p), Ok(v), Ok(a)) => (p, v, a),
        (p, v, a) => {
            for err in [p.err(), v.err(), a.err()].into_iter().flatten() {
                diagnostics.reject(
                    DiagnosticKind::MissingField,
                    format!("{}: control file: {}", filename, err),
                );
            }
            return Ok(());
        }
    };

    let parsed_version = match PackageVersion::parse(version) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.reject(
                DiagnosticKind::Parse,
                format!("{}: invalid version {}: {}", filename, version, e),
            );
            return Ok(());
        }
    };

    if package != name_package {
        diagnostics.reject(
            DiagnosticKind::Integrity,
            format!("{}: control file names package {}", filename, package),
        );
    }
    if parsed_version.without_epoch() != name_version {
        diagnostics.reject(
            DiagnosticKind::Integrity,
            format!("{}: control file has version {}", filename, version),
        );
    }
    if architecture != name_arch {
        diagnostics.reject(
            DiagnosticKind::Integrity,
            format!("{}: control file has architecture {}", filename, architecture),
        );
    }

    if !manifest.binaries.contains(package) {
        diagnostics.reject(
            DiagnosticKind::Integrity,
            format!(
                "{}: package {} is not in the manifest's Binary field",
                filename, package
            ),
        );
    }
    if !manifest.architectures.contains(architecture) {
        diagnostics.reject(
            DiagnosticKind::Integrity,
            format!(
                "{}: architecture {} is not in the manifest's Architecture field",
                filename, architecture
            ),
        );
    }

    match control.source_name_and_version() {
        Ok((source, source_version)) => {
            if source != manifest.source {
                diagnostics.reject(
                    DiagnosticKind::Integrity,
                    format!(
                        "{}: built from source {}, not {}",
                        filename, source, manifest.source
                    ),
                );
            }

            let source_version = source_version.unwrap_or(version);
            if source_version != manifest.version.to_string() {
                diagnostics.reject(
                    DiagnosticKind::Integrity,
                    format!(
                        "{}: source version {} does not match {}",
                        filename, source_version, manifest.version
                    ),
                );
            }
        }
        Err(e) => {
            diagnostics.reject(
                DiagnosticKind::Parse,
                format!("{}: invalid Source field: {}", filename, e),
            );
        }
    }

    for field in control.empty_dependency_fields() {
        diagnostics.reject(
            DiagnosticKind::Parse,
            format!("{}: empty dependency expression in {}", filename, field),
        );
    }

    if let Err(e) = entry.set_identity(BinaryIdentity {
        package: package.to_string(),
        version: version.to_string(),
        architecture: architecture.to_string(),
    }) {
        diagnostics.reject(DiagnosticKind::Integrity, e.to_string());
    }

    Ok(())
}
