// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian `.changes` upload manifests.

See <https://www.debian.org/doc/debian-policy/ch-controlfields.html#debian-changes-files-changes>.
*/

use {
    crate::{
        control::{ControlParagraph, ControlParagraphReader},
        debian_source_control::{parse_checksum_row, DebianSourceControlFileEntry},
        error::{DebianError, Result},
        io::{ChecksumType, ContentDigest},
        package_version::PackageVersion,
    },
    chrono::{DateTime, TimeZone, Utc},
    std::{
        io::BufRead,
        ops::{Deref, DerefMut},
        str::FromStr,
    },
};

/// Fields that must be present in every `.changes` file.
pub const MANDATORY_FIELDS: &[&str] = &[
    "Format",
    "Date",
    "Source",
    "Architecture",
    "Version",
    "Distribution",
    "Maintainer",
    "Changes",
    "Files",
];

/// A row in the `Files` field of a `.changes` file.
///
/// Rows have the form `<md5> <size> <section> <priority> <filename>`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChangesFileEntry<'a> {
    pub filename: &'a str,
    pub digest: ContentDigest,
    pub size: u64,
    pub section: &'a str,
    pub priority: &'a str,
}

impl<'a> ChangesFileEntry<'a> {
    /// Parse a 5 column `Files` row.
    pub fn parse_row(row: &'a str) -> Result<Self> {
        let malformed = || DebianError::ControlFileListMalformed {
            field: "Files".to_string(),
            row: row.to_string(),
            expected: 5,
        };

        let parts = row.split_ascii_whitespace().collect::<Vec<_>>();
        let [digest, size, section, priority, filename]: [&str; 5] =
            parts.try_into().map_err(|_| malformed())?;

        Ok(Self {
            filename,
            digest: ContentDigest::md5_hex(digest)?,
            size: u64::from_str(size).map_err(|_| malformed())?,
            section,
            priority,
        })
    }

    /// The component encoded in the section, e.g. `contrib` for `contrib/net`.
    ///
    /// Sections without a slash are in `main`.
    pub fn component(&self) -> &'a str {
        match self.section.split_once('/') {
            Some((component, _)) => component,
            None => "main",
        }
    }
}

/// A Debian `.changes` file.
///
/// This is a single paragraph control file. PGP armor must be removed before parsing.
#[derive(Clone, Debug, Default)]
pub struct ChangesFile<'a> {
    paragraph: ControlParagraph<'a>,
}

impl<'a> Deref for ChangesFile<'a> {
    type Target = ControlParagraph<'a>;

    fn deref(&self) -> &Self::Target {
        &self.paragraph
    }
}

impl<'a> DerefMut for ChangesFile<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.paragraph
    }
}

impl<'a> From<ControlParagraph<'a>> for ChangesFile<'a> {
    fn from(paragraph: ControlParagraph<'a>) -> Self {
        Self { paragraph }
    }
}

impl<'a> From<ChangesFile<'a>> for ControlParagraph<'a> {
    fn from(cf: ChangesFile<'a>) -> Self {
        cf.paragraph
    }
}

impl ChangesFile<'static> {
    /// Construct an instance by reading a single paragraph from a reader.
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

impl<'a> ChangesFile<'a> {
    /// Names of mandatory fields absent from this file.
    pub fn missing_mandatory_fields(&self) -> Vec<&'static str> {
        MANDATORY_FIELDS
            .iter()
            .filter(|name| !self.has_field(name))
            .copied()
            .collect()
    }

    /// The `Format` field.
    pub fn format(&self) -> Result<&str> {
        self.required_single_line_str("Format")
    }

    /// The raw `Date` field.
    pub fn date_str(&self) -> Result<&str> {
        self.required_field_str("Date")
    }

    /// The `Date` field parsed as an RFC 2822 date.
    pub fn date(&self) -> Result<DateTime<Utc>> {
        let value = self.date_str()?;
        let seconds = mailparse::dateparse(value)
            .map_err(|e| DebianError::DateParse(format!("{}: {}", value, e)))?;

        Utc.timestamp_opt(seconds, 0)
            .single()
            .ok_or_else(|| DebianError::DateParse(format!("{}: out of range", value)))
    }

    /// The source package name.
    ///
    /// The raw field may carry a version in parentheses. Only the name is returned.
    pub fn source(&self) -> Result<&str> {
        let value = self.required_single_line_str("Source")?;

        Ok(match value.split_once('(') {
            Some((name, _)) => name.trim(),
            None => value.trim(),
        })
    }

    /// Binary package names declared by this upload.
    pub fn binary(&self) -> Option<Box<(dyn Iterator<Item = &str> + '_)>> {
        self.iter_field_words("Binary")
    }

    /// Architectures in this upload. `source` denotes a source upload.
    pub fn architecture(&self) -> Option<Box<(dyn Iterator<Item = &str> + '_)>> {
        self.iter_field_words("Architecture")
    }

    /// The version as a string.
    pub fn version_str(&self) -> Result<&str> {
        self.required_single_line_str("Version")
    }

    /// The parsed version.
    pub fn version(&self) -> Result<PackageVersion> {
        Ok(PackageVersion::parse(self.version_str()?)?)
    }

    /// Target distributions.
    pub fn distribution(&self) -> Option<Box<(dyn Iterator<Item = &str> + '_)>> {
        self.iter_field_words("Distribution")
    }

    pub fn urgency(&self) -> Option<&str> {
        self.field_str("Urgency")
    }

    pub fn maintainer(&self) -> Result<&str> {
        self.required_field_str("Maintainer")
    }

    pub fn changed_by(&self) -> Option<&str> {
        self.field_str("Changed-By")
    }

    /// Bug numbers closed by this upload.
    pub fn closes(&self) -> Option<Box<(dyn Iterator<Item = &str> + '_)>> {
        self.iter_field_words("Closes")
    }

    /// The `Changes` text.
    pub fn changes(&self) -> Option<&str> {
        self.field_str("Changes")
    }

    /// Rows of the `Files` field.
    pub fn files(&self) -> Result<Box<(dyn Iterator<Item = Result<ChangesFileEntry<'_>>> + '_)>> {
        let lines = self
            .iter_field_lines("Files")
            .ok_or_else(|| DebianError::ControlRequiredFieldMissing("Files".to_string()))?;

        Ok(Box::new(
            lines
                .filter(|line| !line.trim().is_empty())
                .map(ChangesFileEntry::parse_row),
        ))
    }

    /// Rows of a `Checksums-*` field.
    pub fn checksums(
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
mod tests {
    use {super::*, indoc::indoc};

    const HELLO_CHANGES: &str = indoc! {"
        Format: 1.8
        Date: Sun, 04 Oct 2020 17:04:54 +0200
        Source: hello
        Binary: hello
        Architecture: source amd64
        Version: 2.10-2
        Distribution: unstable
        Urgency: medium
        Maintainer: Santiago Vila <sanvila@debian.org>
        Changed-By: Santiago Vila <sanvila@debian.org>
        Closes: 871622 893083
        Changes:
         hello (2.10-2) unstable; urgency=medium
         .
           * Fix things.
        Files:
         6cd0ffea3884a4e79330338dcc2987d6 1847 devel optional hello_2.10-2.dsc
         e3b0c44298fc1c149afbf4c8996fb924 56132 contrib/devel optional hello_2.10-2_amd64.deb
    "};

    #[test]
    fn parse_changes() -> Result<()> {
        let cf = ChangesFile::parse_str(HELLO_CHANGES)?;

        assert!(cf.missing_mandatory_fields().is_empty());
        assert_eq!(cf.source()?, "hello");
        assert_eq!(
            cf.architecture().unwrap().collect::<Vec<_>>(),
            vec!["source", "amd64"]
        );
        assert_eq!(cf.date()?.timestamp(), 1601823894);
        assert_eq!(
            cf.closes().unwrap().collect::<Vec<_>>(),
            vec!["871622", "893083"]
        );
        assert_eq!(cf.changes().map(|c| c.contains("Fix things")), Some(true));

        let files = cf.files()?.collect::<Result<Vec<_>>>()?;
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].filename, "hello_2.10-2.dsc");
        assert_eq!(files[0].component(), "main");
        assert_eq!(files[1].size, 56132);
        assert_eq!(files[1].component(), "contrib");

        Ok(())
    }

    #[test]
    fn source_with_version() -> Result<()> {
        let cf = ChangesFile::parse_str("Source: hello (2.10-1)\n")?;
        assert_eq!(cf.source()?, "hello");
        assert_eq!(
            cf.missing_mandatory_fields(),
            vec![
                "Format",
                "Date",
                "Architecture",
                "Version",
                "Distribution",
                "Maintainer",
                "Changes",
                "Files"
            ]
        );

        Ok(())
    }

    #[test]
    fn malformed_files_row() -> Result<()> {
        let cf = ChangesFile::parse_str(indoc! {"
            Files:
             6cd0ffea3884a4e79330338dcc2987d6 1847 hello_2.10-2.dsc
        "})?;

        assert!(matches!(
            cf.files()?.next(),
            Some(Err(DebianError::ControlFileListMalformed { expected: 5, .. }))
        ));

        Ok(())
    }
}
