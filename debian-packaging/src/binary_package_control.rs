// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian binary package control files. */

use {
    crate::{control::ControlParagraph, error::Result, package_version::PackageVersion},
    std::ops::{Deref, DerefMut},
};

/// Fields of a binary package control file holding dependency expressions.
pub const DEPENDENCY_FIELDS: &[&str] = &[
    "Breaks",
    "Conflicts",
    "Depends",
    "Enhances",
    "Pre-Depends",
    "Provides",
    "Recommends",
    "Replaces",
    "Suggests",
];

/// A Debian binary package control file/paragraph.
///
/// See <https://www.debian.org/doc/debian-policy/ch-controlfields.html#binary-package-control-files-debian-control>.
///
/// Binary package control files are defined by a single paragraph with well-defined
/// fields. This type is a low-level wrapper around an inner [ControlParagraph].
/// [Deref] and [DerefMut] can be used to operate on the inner [ControlParagraph].
/// [From] and [Into] are implemented in both directions to enable cheap coercion
/// between the types.
///
/// Fields annotated as *mandatory* in the Debian Policy Manual have getters that
/// return [Result] and will error if a field is not present. Non-mandatory fields
/// return [Option].
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BinaryPackageControlFile<'a> {
    paragraph: ControlParagraph<'a>,
}

impl<'a> Deref for BinaryPackageControlFile<'a> {
    type Target = ControlParagraph<'a>;

    fn deref(&self) -> &Self::Target {
        &self.paragraph
    }
}

impl<'a> DerefMut for BinaryPackageControlFile<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.paragraph
    }
}

impl<'a> From<ControlParagraph<'a>> for BinaryPackageControlFile<'a> {
    fn from(paragraph: ControlParagraph<'a>) -> Self {
        Self { paragraph }
    }
}

impl<'a> From<BinaryPackageControlFile<'a>> for ControlParagraph<'a> {
    fn from(cf: BinaryPackageControlFile<'a>) -> Self {
        cf.paragraph
    }
}

impl<'a> BinaryPackageControlFile<'a> {
    /// The `Package` field value.
    pub fn package(&self) -> Result<&str> {
        self.required_field_str("Package")
    }

    /// The `Version` field as its original string.
    pub fn version_str(&self) -> Result<&str> {
        self.required_field_str("Version")
    }

    /// The `Version` field parsed into a [PackageVersion].
    pub fn version(&self) -> Result<PackageVersion> {
        Ok(PackageVersion::parse(self.version_str()?)?)
    }

    /// The `Architecture` field.
    pub fn architecture(&self) -> Result<&str> {
        self.required_field_str("Architecture")
    }

    /// The `Maintainer` field.
    pub fn maintainer(&self) -> Result<&str> {
        self.required_field_str("Maintainer")
    }

    /// The `Section` field.
    pub fn section(&self) -> Option<&str> {
        self.field_str("Section")
    }

    /// The `Priority` field.
    pub fn priority(&self) -> Option<&str> {
        self.field_str("Priority")
    }

    /// The `Source` field.
    ///
    /// The raw value may carry a version in parentheses when the source version
    /// differs from the binary version, e.g. `glibc (2.31-13)`.
    pub fn source(&self) -> Option<&str> {
        self.field_str("Source")
    }

    /// The source package name and optional source version.
    ///
    /// If no `Source` field is present, the source package has the same name
    /// as the binary package.
    pub fn source_name_and_version(&self) -> Result<(&str, Option<&str>)> {
        match self.source() {
            Some(value) => match value.split_once('(') {
                Some((name, version)) => {
                    Ok((name.trim(), Some(version.trim_end_matches(')').trim())))
                }
                None => Ok((value.trim(), None)),
            },
            None => Ok((self.package()?, None)),
        }
    }

    /// Obtain the names of dependency fields that are present but hold an empty expression.
    ///
    /// An expression is empty if the field has no value or if any comma separated
    /// relation or `|` separated alternative is blank.
    pub fn empty_dependency_fields(&self) -> Vec<&'static str> {
        DEPENDENCY_FIELDS
            .iter()
            .filter(|name| {
                self.field_str(name)
                    .map(is_empty_dependency_expression)
                    .unwrap_or(false)
            })
            .copied()
            .collect()
    }
}

/// Whether a dependency expression has an empty relation or alternative.
pub fn is_empty_dependency_expression(value: &str) -> bool {
    value.trim().is_empty()
        || value
            .split(',')
            .any(|relation| relation.split('|').any(|alt| alt.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use {super::*, indoc::indoc};

    #[test]
    fn source_name_and_version() -> Result<()> {
        let cf = BinaryPackageControlFile::from(ControlParagraph::parse_str(indoc! {"
            Package: libc6
            Source: glibc (2.31-13)
            Version: 2.31-13+b1
            Architecture: amd64
        "})?);
        assert_eq!(cf.source_name_and_version()?, ("glibc", Some("2.31-13")));
        assert_eq!(cf.version()?.to_string(), "2.31-13+b1");

        let cf = BinaryPackageControlFile::from(ControlParagraph::parse_str(
            "Package: hello\nVersion: 1.0\nArchitecture: all\n",
        )?);
        assert_eq!(cf.source_name_and_version()?, ("hello", None));

        Ok(())
    }

    #[test]
    fn empty_dependency_fields() -> Result<()> {
        let cf = BinaryPackageControlFile::from(ControlParagraph::parse_str(indoc! {"
            Package: hello
            Depends: libc6 (>= 2.4), , foo
            Recommends: a | b
            Suggests: a |
            Breaks:
        "})?);

        assert_eq!(
            cf.empty_dependency_fields(),
            vec!["Breaks", "Depends", "Suggests"]
        );

        Ok(())
    }
}
