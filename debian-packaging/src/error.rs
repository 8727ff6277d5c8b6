// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use {crate::package_version::VersionError, thiserror::Error};

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum DebianError {
    #[error("date parsing error: {0}")]
    DateParse(String),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("version error: {0}")]
    Version(#[from] VersionError),

    #[error("control file parse error at line {line_number}: {message}: '{line}'")]
    ControlParseError {
        line_number: usize,
        line: String,
        message: &'static str,
    },

    #[error("Control file lacks a paragraph")]
    ControlFileNoParagraph,

    #[error("Control file not found")]
    ControlFileNotFound,

    #[error("expected 1 paragraph in control file; got {0}")]
    ControlParagraphMismatch(usize),

    #[error("required field missing in control file: {0}")]
    ControlRequiredFieldMissing(String),

    #[error("control field {0} can not be parsed as a simple single line value")]
    ControlSimpleValueNoMultiline(String),

    #[error("malformed row in {field} field: '{row}'; expected {expected} columns")]
    ControlFileListMalformed {
        field: String,
        row: String,
        expected: usize,
    },

    #[error("bad hex digest in {0}: {1:?}")]
    ContentDigestBadHex(String, hex::FromHexError),

    #[error("unknown compression in deb archive file: {0}")]
    DebUnknownCompression(String),

    #[error("tar header error: {0}")]
    DebTarHeader(String),
}

impl<W> From<std::io::IntoInnerError<W>> for DebianError {
    fn from(e: std::io::IntoInnerError<W>) -> Self {
        Self::Io(e.into())
    }
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, DebianError>;
