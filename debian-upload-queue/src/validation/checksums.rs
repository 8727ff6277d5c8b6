// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Size and digest verification. */

use {
    crate::{
        database::PoolFile,
        diagnostic::{DiagnosticKind, Diagnostics},
        error::Result,
        manifest::FileEntry,
    },
    debian_packaging::io::{digest_path, ChecksumType},
    std::path::Path,
};

/// Verify a staged file against its declared size and digests.
///
/// Returns whether the file exists.
pub fn check_staged(entry: &FileEntry, path: &Path, diagnostics: &mut Diagnostics) -> Result<bool> {
    if !path.is_file() {
        diagnostics.reject(
            DiagnosticKind::Integrity,
            format!("{} is listed but was not uploaded", entry.filename),
        );
        return Ok(false);
    }

    let (size, digests) = digest_path(path)?;

    for mismatch in entry.digest_mismatches(size, &digests) {
        diagnostics.reject(DiagnosticKind::Integrity, mismatch);
    }

    Ok(true)
}

/// Compare two records of the same file made by different manifests.
pub fn cross_check(
    entry: &FileEntry,
    other: &FileEntry,
    other_name: &str,
    diagnostics: &mut Diagnostics,
) {
    for mismatch in entry.record_mismatches(other, other_name) {
        diagnostics.reject(DiagnosticKind::Integrity, mismatch);
    }
}

/// Compare a declared file against the copy already in the pool.
pub fn check_pool(entry: &FileEntry, pool: &PoolFile, diagnostics: &mut Diagnostics) {
    if entry.size != pool.size {
        diagnostics.reject(
            DiagnosticKind::Integrity,
            format!(
                "{}: size {} differs from {} of the copy in the pool",
                entry.filename, entry.size, pool.size
            ),
        );
    }

    for (checksum, declared) in &entry.hashes {
        let pooled = match checksum {
            ChecksumType::Md5 => &pool.md5,
            ChecksumType::Sha1 => &pool.sha1,
            ChecksumType::Sha256 => &pool.sha256,
        };

        if !pooled.eq_ignore_ascii_case(declared) {
            diagnostics.reject(
                DiagnosticKind::Integrity,
                format!(
                    "{}: {} {} differs from {} of the copy in the pool",
                    entry.filename, checksum, declared, pooled
                ),
            );
        }
    }
}
