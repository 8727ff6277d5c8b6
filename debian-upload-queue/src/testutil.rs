// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Upload fixtures for tests. */

use {
    crate::{database::PoolFile, error::Result, manifest::FileEntry},
    debian_packaging::{
        control::{ControlFile, ControlParagraph},
        deb::{builder::DebBuilder, DebCompression},
        io::{digest_reader, ChecksumType},
    },
    std::{
        io::Cursor,
        path::{Path, PathBuf},
        time::SystemTime,
    },
};

pub const MAINTAINER: &str = "Jane Doe <jane@example.org>";
pub const FINGERPRINT: &str = "0123456789ABCDEF0123456789ABCDEF01234567";

/// A file belonging to a fixture upload.
#[derive(Clone, Debug)]
pub struct FixtureFile {
    pub name: String,
    pub data: Vec<u8>,
    pub section: String,
    pub priority: String,
}

fn digests(data: &[u8]) -> Result<Vec<(ChecksumType, String)>> {
    let (_, digests) = digest_reader(&mut Cursor::new(data.to_vec()))?;

    Ok(digests
        .iter_digests()
        .map(|d| (d.checksum_type(), d.digest_hex()))
        .collect())
}

fn digest_of(data: &[u8], checksum: ChecksumType) -> Result<String> {
    Ok(digests(data)?
        .into_iter()
        .find(|(c, _)| *c == checksum)
        .map(|(_, d)| d)
        .unwrap_or_default())
}

/// A file entry as a manifest would declare it.
pub fn file_entry(name: &str, data: &[u8]) -> Result<FileEntry> {
    let mut entry = FileEntry::new(name, data.len() as u64);
    for (checksum, digest) in digests(data)? {
        entry.hashes.insert(checksum, digest);
    }

    Ok(entry)
}

/// A pool record of a file.
pub fn pool_file(name: &str, data: &[u8]) -> Result<PoolFile> {
    Ok(PoolFile {
        filename: name.to_string(),
        path: format!("main/x/x/{}", name),
        size: data.len() as u64,
        md5: digest_of(data, ChecksumType::Md5)?,
        sha1: digest_of(data, ChecksumType::Sha1)?,
        sha256: digest_of(data, ChecksumType::Sha256)?,
    })
}

/// Render the checksum fields of a file list.
///
/// `sectioned` selects the 5 column `.changes` flavor of the `Files` field.
fn file_list_fields(files: &[FixtureFile], sectioned: bool) -> Result<String> {
    let mut text = String::new();

    for checksum in [ChecksumType::Sha1, ChecksumType::Sha256, ChecksumType::Md5] {
        text.push_str(checksum.file_list_field());
        text.push_str(":\n");

        for file in files {
            let digest = digest_of(&file.data, checksum)?;
            if sectioned && checksum == ChecksumType::Md5 {
                text.push_str(&format!(
                    " {} {} {} {} {}\n",
                    digest,
                    file.data.len(),
                    file.section,
                    file.priority,
                    file.name
                ));
            } else {
                text.push_str(&format!(" {} {} {}\n", digest, file.data.len(), file.name));
            }
        }
    }

    Ok(text)
}

/// The control paragraph of a binary package.
pub fn deb_control(
    package: &str,
    version: &str,
    architecture: &str,
    source: &str,
) -> ControlParagraph<'static> {
    let mut para = ControlParagraph::default();
    para.set_field_from_string("Package".into(), package.to_string().into());
    para.set_field_from_string("Version".into(), version.to_string().into());
    para.set_field_from_string("Architecture".into(), architecture.to_string().into());
    para.set_field_from_string("Maintainer".into(), MAINTAINER.into());
    if source != package {
        para.set_field_from_string("Source".into(), source.to_string().into());
    }
    para.set_field_from_string("Depends".into(), "libc6 (>= 2.31)".into());
    para.set_field_from_string("Description".into(), "fixture package".into());

    para
}

/// Build a binary package from its control paragraph.
pub fn build_deb(para: ControlParagraph<'static>, compression: DebCompression) -> Result<Vec<u8>> {
    let readme = format!(
        "usr/share/doc/{}/README",
        para.field_str("Package").unwrap_or("fixture")
    );

    let mut control = ControlFile::default();
    control.add_paragraph(para);

    let mut buffer = vec![];
    DebBuilder::new(control)
        .set_compression(compression)
        .set_mtime(Some(SystemTime::now()))
        .install_file(readme, b"fixture\n".to_vec(), false)
        .write(&mut buffer)?;

    Ok(buffer)
}

/// Build a binary package.
pub fn deb(package: &str, version: &str, architecture: &str, source: &str) -> Result<Vec<u8>> {
    build_deb(
        deb_control(package, version, architecture, source),
        DebCompression::Gzip,
    )
}

/// Render a source control file.
pub fn dsc(source: &str, version: &str, format: &str, files: &[FixtureFile]) -> Result<String> {
    Ok(format!(
        "Format: {}\nSource: {}\nBinary: {}\nArchitecture: any\nVersion: {}\nMaintainer: {}\nStandards-Version: 4.6.0\nBuild-Depends: debhelper-compat (= 13)\n{}",
        format,
        source,
        source,
        version,
        MAINTAINER,
        file_list_fields(files, false)?
    ))
}

/// A complete upload: manifest fields plus the files it lists.
#[derive(Clone, Debug)]
pub struct UploadFixture {
    pub source: String,
    pub version: String,
    pub distribution: String,
    pub maintainer: String,
    pub changed_by: Option<String>,
    pub architectures: Vec<String>,
    pub binaries: Vec<String>,
    pub files: Vec<FixtureFile>,
}

impl UploadFixture {
    pub fn new(source: &str, version: &str) -> Self {
        Self {
            source: source.to_string(),
            version: version.to_string(),
            distribution: "unstable".to_string(),
            maintainer: MAINTAINER.to_string(),
            changed_by: None,
            architectures: vec![],
            binaries: vec![],
            files: vec![],
        }
    }

    pub fn add_file(&mut self, name: impl ToString, data: Vec<u8>, section: &str) {
        self.files.push(FixtureFile {
            name: name.to_string(),
            data,
            section: section.to_string(),
            priority: "optional".to_string(),
        });
    }

    /// The upstream tarball of the source package.
    pub fn orig(&self) -> FixtureFile {
        let upstream = self.version.split('-').next().unwrap_or(&self.version);

        FixtureFile {
            name: format!("{}_{}.orig.tar.gz", self.source, upstream),
            data: format!("upstream sources of {}", self.source).into_bytes(),
            section: "devel".to_string(),
            priority: "optional".to_string(),
        }
    }

    /// Add a `3.0 (quilt)` source package.
    ///
    /// `extra_origs` are further upstream tarballs, listed by the descriptor and uploaded.
    pub fn add_quilt_source(
        &mut self,
        include_orig: bool,
        extra_origs: &[FixtureFile],
    ) -> Result<()> {
        let orig = self.orig();
        let debian = FixtureFile {
            name: format!("{}_{}.debian.tar.xz", self.source, self.version),
            data: format!("packaging of {}", self.source).into_bytes(),
            section: "devel".to_string(),
            priority: "optional".to_string(),
        };

        let mut dsc_files = vec![orig.clone(), debian.clone()];
        dsc_files.extend(extra_origs.iter().cloned());

        let text = dsc(&self.source, &self.version, "3.0 (quilt)", &dsc_files)?;
        self.add_file(
            format!("{}_{}.dsc", self.source, self.version),
            text.into_bytes(),
            "devel",
        );
        self.files.push(debian);
        if include_orig {
            self.files.push(orig);
        }
        self.files.extend(extra_origs.iter().cloned());

        self.architectures.insert(0, "source".to_string());

        Ok(())
    }

    /// Add a binary package built from this source.
    pub fn add_binary(&mut self, package: &str, architecture: &str) -> Result<()> {
        let data = deb(package, &self.version, architecture, &self.source)?;
        self.add_file(
            format!("{}_{}_{}.deb", package, self.version, architecture),
            data,
            "devel",
        );

        if !self.binaries.iter().any(|b| b == package) {
            self.binaries.push(package.to_string());
        }
        if !self.architectures.iter().any(|a| a == architecture) {
            self.architectures.push(architecture.to_string());
        }

        Ok(())
    }

    pub fn changes_filename(&self) -> String {
        let arch = self
            .architectures
            .iter()
            .find(|a| *a != "source")
            .map(|a| a.as_str())
            .unwrap_or("source");

        format!("{}_{}_{}.changes", self.source, self.version, arch)
    }

    pub fn changes_text(&self) -> Result<String> {
        let mut text = format!(
            "Format: 1.8\nDate: Sun, 04 Oct 2020 17:04:54 +0200\nSource: {}\n",
            self.source
        );
        if !self.binaries.is_empty() {
            text.push_str(&format!("Binary: {}\n", self.binaries.join(" ")));
        }
        text.push_str(&format!(
            "Architecture: {}\nVersion: {}\nDistribution: {}\nUrgency: medium\nMaintainer: {}\n",
            self.architectures.join(" "),
            self.version,
            self.distribution,
            self.maintainer,
        ));
        if let Some(changed_by) = &self.changed_by {
            text.push_str(&format!("Changed-By: {}\n", changed_by));
        }
        text.push_str(&format!(
            "Changes:\n {} ({}) {}; urgency=medium\n .\n   * Fixture upload.\n",
            self.source, self.version, self.distribution
        ));
        text.push_str(&file_list_fields(&self.files, true)?);

        Ok(text)
    }

    /// Write the manifest and every file into `dir`, returning the manifest path.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;

        for file in &self.files {
            std::fs::write(dir.join(&file.name), &file.data)?;
        }

        let path = dir.join(self.changes_filename());
        std::fs::write(&path, self.changes_text()?)?;

        Ok(path)
    }
}
