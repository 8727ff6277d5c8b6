// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Create .deb package files and their components.

The archive uses this to stage fixtures and tooling uses it to produce
well-formed packages. Content is held in memory.
*/

use {
    crate::{control::ControlFile, deb::DebCompression, error::Result},
    digest::Digest,
    std::{
        collections::{BTreeMap, BTreeSet},
        io::{BufWriter, Read, Write},
        time::SystemTime,
    },
};

/// A file to be written into a tar archive.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArchiveFile {
    pub data: Vec<u8>,
    pub executable: bool,
}

/// Files keyed by their relative path. Iteration order is deterministic.
pub type ArchiveFiles = BTreeMap<String, ArchiveFile>;

fn epoch_seconds(time: Option<SystemTime>) -> u64 {
    time.unwrap_or_else(SystemTime::now)
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A builder for a `.deb` package file.
pub struct DebBuilder<'control> {
    control_builder: ControlTarBuilder<'control>,
    compression: DebCompression,
    install_files: ArchiveFiles,
    mtime: Option<SystemTime>,
}

impl<'control> DebBuilder<'control> {
    /// Construct a new instance using a control file.
    pub fn new(control_file: ControlFile<'control>) -> Self {
        Self {
            control_builder: ControlTarBuilder::new(control_file),
            compression: DebCompression::Gzip,
            install_files: ArchiveFiles::new(),
            mtime: None,
        }
    }

    /// Set the compression format to use.
    pub fn set_compression(mut self, compression: DebCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Set the modified time to use on archive members.
    ///
    /// If not called, the current time will be used.
    pub fn set_mtime(mut self, time: Option<SystemTime>) -> Self {
        self.mtime = time;
        self.control_builder = self.control_builder.set_mtime(time);
        self
    }

    /// Register a file as to be installed by this package.
    ///
    /// Filenames should be relative to the filesystem root. e.g. `usr/bin/myapp`.
    pub fn install_file(mut self, path: impl ToString, data: Vec<u8>, executable: bool) -> Self {
        let path = path.to_string();
        self.control_builder = self.control_builder.add_data_file(&path, &data);
        self.install_files
            .insert(path, ArchiveFile { data, executable });
        self
    }

    /// Write `.deb` file content to a writer.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mtime = epoch_seconds(self.mtime);
        let mut ar_builder = ar::Builder::new(writer);

        let mut append = |name: String, data: &[u8]| -> Result<()> {
            let mut header = ar::Header::new(name.into_bytes(), data.len() as _);
            header.set_mode(0o644);
            header.set_mtime(mtime);
            header.set_uid(0);
            header.set_gid(0);
            ar_builder.append(&header, data)?;

            Ok(())
        };

        append("debian-binary".to_string(), b"2.0\n")?;

        let mut control_writer = BufWriter::new(Vec::new());
        self.control_builder.write(&mut control_writer)?;
        let control_tar = self
            .compression
            .compress(&mut std::io::Cursor::new(control_writer.into_inner()?))?;
        append(
            format!("control.tar{}", self.compression.extension()),
            &control_tar,
        )?;

        let mut data_writer = BufWriter::new(Vec::new());
        write_deb_tar(&mut data_writer, &self.install_files, mtime)?;
        let data_tar = self
            .compression
            .compress(&mut std::io::Cursor::new(data_writer.into_inner()?))?;
        append(
            format!("data.tar{}", self.compression.extension()),
            &data_tar,
        )?;

        Ok(())
    }
}

fn new_tar_header(mtime: u64) -> Result<tar::Header> {
    let mut header = tar::Header::new_gnu();
    header.set_uid(0);
    header.set_gid(0);
    header.set_username("root")?;
    header.set_groupname("root")?;
    header.set_mtime(mtime);

    Ok(header)
}

fn set_header_path(
    builder: &mut tar::Builder<impl Write>,
    header: &mut tar::Header,
    path: &str,
    is_directory: bool,
) -> Result<()> {
    // Debian archives in the wild have filenames beginning with `./`. And
    // paths ending with `/` are directories. `header.set_path()` would normalize
    // away the leading `./`, so the name field is written directly.
    let value = format!("./{}{}", path, if is_directory { "/" } else { "" });
    let value_bytes = value.as_bytes();

    let name_buffer = &mut header.as_old_mut().name;

    if value_bytes.len() <= name_buffer.len() {
        name_buffer[0..value_bytes.len()].copy_from_slice(value_bytes);
    } else {
        // GNU long name extension entry.
        let mut header2 = tar::Header::new_gnu();
        let name = b"././@LongLink";
        header2.as_old_mut().name[..name.len()].clone_from_slice(&name[..]);
        header2.set_mode(0o644);
        header2.set_uid(0);
        header2.set_gid(0);
        header2.set_mtime(0);
        header2.set_size(value_bytes.len() as u64 + 1);
        header2.set_entry_type(tar::EntryType::new(b'L'));
        header2.set_cksum();
        let mut data = value_bytes.chain(std::io::repeat(0).take(1));
        builder.append(&header2, &mut data)?;

        let truncated_bytes = &value_bytes[0..name_buffer.len()];
        name_buffer[0..truncated_bytes.len()].copy_from_slice(truncated_bytes);
    }

    Ok(())
}

/// A builder for a `control.tar` file inside `.deb` packages.
pub struct ControlTarBuilder<'a> {
    control: ControlFile<'a>,
    /// Maintainer scripts and other extra files.
    extra_files: ArchiveFiles,
    /// `md5sums` lines of files that will be installed.
    md5sums: Vec<String>,
    mtime: Option<SystemTime>,
}

impl<'a> ControlTarBuilder<'a> {
    /// Create a new instance from a control file.
    pub fn new(control_file: ControlFile<'a>) -> Self {
        Self {
            control: control_file,
            extra_files: ArchiveFiles::new(),
            md5sums: vec![],
            mtime: None,
        }
    }

    /// Add an extra file to the control archive.
    pub fn add_extra_file(mut self, path: impl ToString, data: Vec<u8>, executable: bool) -> Self {
        self.extra_files
            .insert(path.to_string(), ArchiveFile { data, executable });
        self
    }

    /// Register a data file so an `md5sums` entry is written for it.
    pub fn add_data_file(mut self, path: &str, data: &[u8]) -> Self {
        let digest = md5::Md5::digest(data);
        self.md5sums
            .push(format!("{}  {}\n", hex::encode(digest), path));
        self
    }

    pub fn set_mtime(mut self, time: Option<SystemTime>) -> Self {
        self.mtime = time;
        self
    }

    /// Write the `control.tar` file to a writer.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut control_data = vec![];
        self.control.write(&mut control_data)?;

        let mut files = self.extra_files.clone();
        files.insert(
            "control".to_string(),
            ArchiveFile {
                data: control_data,
                executable: false,
            },
        );
        files.insert(
            "md5sums".to_string(),
            ArchiveFile {
                data: self.md5sums.concat().into_bytes(),
                executable: false,
            },
        );

        write_deb_tar(writer, &files, epoch_seconds(self.mtime))
    }
}

/// Write a tar archive suitable for inclusion in a `.deb` archive.
pub fn write_deb_tar<W: Write>(writer: W, files: &ArchiveFiles, mtime: u64) -> Result<()> {
    let mut builder = tar::Builder::new(writer);

    let mut header = new_tar_header(mtime)?;
    header.set_path("./")?;
    header.set_mode(0o755);
    header.set_size(0);
    header.set_cksum();
    builder.append(&header, std::io::empty())?;

    let directories = files
        .keys()
        .flat_map(|path| {
            path.match_indices('/')
                .map(move |(i, _)| path[0..i].to_string())
        })
        .collect::<BTreeSet<_>>();

    for directory in directories {
        let mut header = new_tar_header(mtime)?;
        set_header_path(&mut builder, &mut header, &directory, true)?;
        header.set_mode(0o755);
        header.set_size(0);
        header.set_cksum();
        builder.append(&header, std::io::empty())?;
    }

    for (path, file) in files {
        let mut header = new_tar_header(mtime)?;
        set_header_path(&mut builder, &mut header, path, false)?;
        header.set_mode(if file.executable { 0o755 } else { 0o644 });
        header.set_size(file.data.len() as _);
        header.set_cksum();
        builder.append(&header, file.data.as_slice())?;
    }

    builder.finish()?;

    Ok(())
}
