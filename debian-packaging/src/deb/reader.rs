// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! .deb file reading functionality. */

use {
    crate::{
        binary_package_control::BinaryPackageControlFile,
        control::ControlParagraphReader,
        error::{DebianError, Result},
    },
    std::io::{Cursor, Read},
};

fn reader_from_extension(extension: &str, data: Cursor<Vec<u8>>) -> Result<Box<dyn Read>> {
    match extension {
        "" => Ok(Box::new(data)),
        ".gz" => Ok(Box::new(libflate::gzip::Decoder::new(data)?)),
        ".xz" => Ok(Box::new(xz2::read::XzDecoder::new(data))),
        ".zst" => Ok(Box::new(zstd::Decoder::new(data)?)),
        _ => Err(DebianError::DebUnknownCompression(extension.to_string())),
    }
}

/// Represents an entry in a .deb archive.
pub enum BinaryPackageEntry {
    /// The `debian-binary` file.
    DebianBinary(Cursor<Vec<u8>>),
    /// The `control.tar[.<ext>]` tar archive.
    Control(tar::Archive<Box<dyn Read>>),
    /// The `data.tar[.<ext>]` tar archive.
    Data(tar::Archive<Box<dyn Read>>),
    /// A member this reader does not understand.
    ///
    /// Holds the member name.
    Other(String),
}

/// A reader of .deb files.
///
/// A .deb binary package file is an ar archive with 3 entries:
///
/// 1. `debian-binary` holding the version of the binary package format.
/// 2. `control.tar` holding package metadata.
/// 3. `data.tar[.<ext>]` holding file content.
///
/// The reader does not enforce this layout: every member is surfaced in archive
/// order so callers can judge it.
pub struct BinaryPackageReader<R: Read> {
    archive: ar::Archive<R>,
}

impl<R: Read> BinaryPackageReader<R> {
    /// Construct a new instance from a reader.
    pub fn new(reader: R) -> Self {
        Self {
            archive: ar::Archive::new(reader),
        }
    }

    /// Obtain the next entry from the underlying ar archive.
    ///
    /// The entry name is returned alongside an enum that richly represents its content.
    pub fn next_entry(&mut self) -> Option<Result<(String, BinaryPackageEntry)>> {
        let mut entry = match self.archive.next_entry()? {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e.into())),
        };

        // Member names should be ASCII, so converting to strings feels reasonably safe.
        let filename = String::from_utf8_lossy(entry.header().identifier()).to_string();

        let mut data = vec![];
        if let Err(e) = entry.read_to_end(&mut data) {
            return Some(Err(e.into()));
        }
        let data = Cursor::new(data);

        let res = if filename == "debian-binary" {
            Ok(BinaryPackageEntry::DebianBinary(data))
        } else if let Some(tail) = filename.strip_prefix("control.tar") {
            reader_from_extension(tail, data)
                .map(|r| BinaryPackageEntry::Control(tar::Archive::new(r)))
        } else if let Some(tail) = filename.strip_prefix("data.tar") {
            reader_from_extension(tail, data).map(|r| BinaryPackageEntry::Data(tar::Archive::new(r)))
        } else {
            Ok(BinaryPackageEntry::Other(filename.clone()))
        };

        Some(res.map(|entry| (filename, entry)))
    }
}

/// The modification time of a file inside one of the tar members of a `.deb`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArchivedFileTime {
    /// Name of the ar member holding the file, e.g. `data.tar.xz`.
    pub member: String,
    /// Path of the file within the tar archive.
    pub path: String,
    /// Modification time in seconds since the UNIX epoch.
    pub mtime: u64,
}

/// The result of walking an entire `.deb` file.
#[derive(Clone, Debug)]
pub struct DebInspection {
    /// Names of ar members in archive order.
    pub members: Vec<String>,
    /// Content of the `debian-binary` member, if present.
    pub format_version: Option<String>,
    /// The `control` file from `control.tar`, if found.
    pub control: Option<BinaryPackageControlFile<'static>>,
    /// Modification times of every file in the `control.tar` and `data.tar` members.
    pub file_times: Vec<ArchivedFileTime>,
}

fn collect_tar_times(
    member: &str,
    archive: &mut tar::Archive<Box<dyn Read>>,
    file_times: &mut Vec<ArchivedFileTime>,
    mut control: Option<&mut Option<BinaryPackageControlFile<'static>>>,
) -> Result<()> {
    for entry in archive.entries()? {
        let mut entry = entry?;

        let path = String::from_utf8_lossy(&entry.path_bytes()).to_string();
        let mtime = entry
            .header()
            .mtime()
            .map_err(|e| DebianError::DebTarHeader(format!("{}: {}", path, e)))?;

        file_times.push(ArchivedFileTime {
            member: member.to_string(),
            path: path.clone(),
            mtime,
        });

        if let Some(control) = control.as_mut() {
            if path.trim_start_matches("./") == "control" {
                let mut data = vec![];
                entry.read_to_end(&mut data)?;

                let mut reader = ControlParagraphReader::new(Cursor::new(data));
                let paragraph = reader.next().ok_or(DebianError::ControlFileNoParagraph)??;
                control.replace(BinaryPackageControlFile::from(paragraph));
            }
        }
    }

    Ok(())
}

/// Walk a `.deb` file, recording its layout, control file and file times.
pub fn inspect_deb(reader: impl Read) -> Result<DebInspection> {
    let mut reader = BinaryPackageReader::new(reader);

    let mut inspection = DebInspection {
        members: vec![],
        format_version: None,
        control: None,
        file_times: vec![],
    };

    while let Some(entry) = reader.next_entry() {
        let (name, entry) = entry?;

        match entry {
            BinaryPackageEntry::DebianBinary(data) => {
                inspection.format_version =
                    Some(String::from_utf8_lossy(data.get_ref()).trim().to_string());
            }
            BinaryPackageEntry::Control(mut archive) => {
                collect_tar_times(
                    &name,
                    &mut archive,
                    &mut inspection.file_times,
                    Some(&mut inspection.control),
                )?;
            }
            BinaryPackageEntry::Data(mut archive) => {
                collect_tar_times(&name, &mut archive, &mut inspection.file_times, None)?;
            }
            BinaryPackageEntry::Other(_) => {}
        }

        inspection.members.push(name);
    }

    Ok(inspection)
}

/// Resolve the `control` file from the `control.tar` file within a `.deb` archive.
pub fn resolve_control_file(reader: impl Read) -> Result<BinaryPackageControlFile<'static>> {
    inspect_deb(reader)?
        .control
        .ok_or(DebianError::ControlFileNotFound)
}
