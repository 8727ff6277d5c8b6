// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian source control files. */

use {
    crate::{
        control::{ControlParagraph, ControlParagraphReader},
        error::{DebianError, Result},
        io::{ChecksumType, ContentDigest},
        package_version::PackageVersion,
    },
    std::{
        io::BufRead,
        ops::Deref,
        str::FromStr,
    },
};

/// Fields of a source control file holding build-time dependency expressions.
pub const BUILD_DEPENDENCY_FIELDS: &[&str] = &[
    "Build-Conflicts",
    "Build-Conflicts-Arch",
    "Build-Conflicts-Indep",
    "Build-Depends",
    "Build-Depends-Arch",
    "Build-Depends-Indep",
];

/// A single file as described by a `Files` or `Checksums-*` field in a [DebianSourceControlFile].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DebianSourceControlFileEntry<'a> {
    /// The filename/path.
    pub filename: &'a str,

    /// The content digest of this file.
    pub digest: ContentDigest,

    /// The size in bytes of the file.
    pub size: u64,
}

/// Parse a `<digest> <size> <filename>` row of a file list field.
pub fn parse_checksum_row<'a>(
    field: &str,
    checksum: ChecksumType,
    row: &'a str,
) -> Result<DebianSourceControlFileEntry<'a>> {
    let malformed = || DebianError::ControlFileListMalformed {
        field: field.to_string(),
        row: row.to_string(),
        expected: 3,
    };

    let parts = row.split_ascii_whitespace().collect::<Vec<_>>();
    let [digest, size, filename]: [&str; 3] = parts.try_into().map_err(|_| malformed())?;

    Ok(DebianSourceControlFileEntry {
        filename,
        digest: ContentDigest::from_hex_digest(checksum, digest)?,
        size: u64::from_str(size).map_err(|_| malformed())?,
    })
}

/// A Debian source control file/paragraph.
///
/// This control file consists of a single paragraph and defines a source package.
/// This paragraph is typically found in `.dsc` files.
///
/// The fields are defined at
/// <https://www.debian.org/doc/debian-policy/ch-controlfields.html#debian-source-control-files-dsc>.
#[derive(Clone, Debug, Default)]
pub struct DebianSourceControlFile<'a> {
    paragraph: ControlParagraph<'a>,
}

impl<'a> Deref for DebianSourceControlFile<'a> {
    type Target = ControlParagraph<'a>;

    fn deref(&self) -> &Self::Target {
        &self.paragraph
    }
}

impl<'a> From<ControlParagraph<'a>> for DebianSourceControlFile<'a> {
    fn from(paragraph: ControlParagraph<'a>) -> Self {
        Self { paragraph }
    }
}

impl DebianSourceControlFile<'static> {
    /// Construct an instance by reading data from a reader.
    ///
    /// The source must be a Debian source control file with exactly 1 paragraph.
    /// PGP armor must already have been removed.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut paragraphs = ControlParagraphReader::new(reader).collect::<Result<Vec<_>>>()?;

        match paragraphs.len() {
            0 => Err(DebianError::ControlFileNoParagraph),
            1 => Ok(Self {
                paragraph: paragraphs.remove(0),
            }),
            n => Err(DebianError::ControlParagraphMismatch(n)),
        }
    }

    /// Construct an instance from a string.
    pub fn parse_str(s: &str) -> Result<Self> {
        Self::from_reader(s.as_bytes())
    }
}

impl<'a> DebianSourceControlFile<'a> {
    /// The format of the source package.
    ///
    /// See <https://www.debian.org/doc/debian-policy/ch-controlfields.html#s-f-format>.
    pub fn format(&self) -> Result<&str> {
        self.required_single_line_str("Format")
    }

    /// The name of the source package.
    pub fn source(&self) -> Result<&str> {
        self.required_single_line_str("Source")
    }

    /// The version number of the package as a string.
    pub fn version_str(&self) -> Result<&str> {
        self.required_single_line_str("Version")
    }

    /// The parsed version of the source package.
    pub fn version(&self) -> Result<PackageVersion> {
        Ok(PackageVersion::parse(self.version_str()?)?)
    }

    /// Build-time dependency fields present in this file, with their raw expressions.
    pub fn build_dependencies(&self) -> Vec<(&'static str, &str)> {
        BUILD_DEPENDENCY_FIELDS
            .iter()
            .filter_map(|name| self.field_str(name).map(|value| (*name, value)))
            .collect()
    }

    /// List of associated files with MD5 checksums.
    ///
    /// See <https://www.debian.org/doc/debian-policy/ch-controlfields.html#s-f-files>.
    pub fn files(
        &self,
    ) -> Result<Box<(dyn Iterator<Item = Result<DebianSourceControlFileEntry<'_>>> + '_)>> {
        self.iter_files(ChecksumType::Md5)
            .ok_or_else(|| DebianError::ControlRequiredFieldMissing("Files".to_string()))
    }

    /// Iterate the file list of a given digest flavor.
    pub fn iter_files(
        &self,
        checksum: ChecksumType,
    ) -> Option<Box<(dyn Iterator<Item = Result<DebianSourceControlFileEntry<'_>>> + '_)>> {
        let field = checksum.file_list_field();

        self.iter_field_lines(field).map(|iter| {
            Box::new(
                iter.filter(|line| !line.trim().is_empty())
                    .map(move |row| parse_checksum_row(field, checksum, row)),
            ) as Box<dyn Iterator<Item = Result<DebianSourceControlFileEntry<'_>>> + '_>
        })
    }
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc};

    const HELLO_DSC: &str = indoc! {"
        Format: 3.0 (quilt)
        Source: hello
        Binary: hello, hello-doc
        Architecture: any all
        Version: 2.10-2
        Maintainer: Santiago Vila <sanvila@debian.org>
        Standards-Version: 4.5.0
        Build-Depends: debhelper-compat (= 13)
        Checksums-Sha1:
         f7bebf6f9c62a2295e889f66e05ce9bfaed9ace3 725946 hello_2.10.orig.tar.gz
         5b2b2f3a8c3c1d4f7b1e1c3e9a6b1f3e2d8c9a7b 12688 hello_2.10-2.debian.tar.xz
        Checksums-Sha256:
         31e066137a962676e89f69d1b65382de95a7ef7d914b8cb956f41ea72e0f516b 725946 hello_2.10.orig.tar.gz
         bd4d0d4ad7c4c1a8e9e0f56c5d8b8aa0bb5e3d6f7bd0b0e1d4ce62b3a1b0b1f2 12688 hello_2.10-2.debian.tar.xz
        Files:
         6cd0ffea3884a4e79330338dcc2987d6 725946 hello_2.10.orig.tar.gz
         e3b0c44298fc1c149afbf4c8996fb924 12688 hello_2.10-2.debian.tar.xz
    "};

    #[test]
    fn parse_simple() -> Result<()> {
        let cf = DebianSourceControlFile::parse_str(HELLO_DSC)?;

        assert_eq!(cf.format()?, "3.0 (quilt)");
        assert_eq!(cf.source()?, "hello");
        assert_eq!(cf.version()?.to_string(), "2.10-2");
        assert_eq!(
            cf.build_dependencies(),
            vec![("Build-Depends", "debhelper-compat (= 13)")]
        );

        let files = cf.files()?.collect::<Result<Vec<_>>>()?;
        assert_eq!(
            files,
            vec![
                DebianSourceControlFileEntry {
                    filename: "hello_2.10.orig.tar.gz",
                    digest: ContentDigest::md5_hex("6cd0ffea3884a4e79330338dcc2987d6")?,
                    size: 725946,
                },
                DebianSourceControlFileEntry {
                    filename: "hello_2.10-2.debian.tar.xz",
                    digest: ContentDigest::md5_hex("e3b0c44298fc1c149afbf4c8996fb924")?,
                    size: 12688,
                }
            ]
        );
        assert_eq!(cf.iter_files(ChecksumType::Sha256).unwrap().count(), 2);

        Ok(())
    }

    #[test]
    fn malformed_rows() -> Result<()> {
        let cf = DebianSourceControlFile::parse_str(indoc! {"
            Source: hello
            Files:
             6cd0ffea3884a4e79330338dcc2987d6 hello_2.10.orig.tar.gz
        "})?;

        assert!(matches!(
            cf.files()?.next(),
            Some(Err(DebianError::ControlFileListMalformed { expected: 3, .. }))
        ));

        let cf = DebianSourceControlFile::parse_str("Source: hello\n")?;
        assert!(matches!(
            cf.files(),
            Err(DebianError::ControlRequiredFieldMissing(_))
        ));

        Ok(())
    }
}
