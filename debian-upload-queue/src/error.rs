// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use {
    crate::diagnostic::{Diagnostic, DiagnosticKind, Severity},
    debian_packaging::error::DebianError,
    thiserror::Error,
};

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("signature verifier protocol error: {0}")]
    Protocol(String),

    #[error("signature verifier process error: {0}")]
    VerifierProcess(String),

    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("missing field: {0}")]
    MissingField(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("policy violation: {0}")]
    Policy(String),

    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("transient condition, retry later: {0}")]
    TransientRace(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Debian packaging error: {0}")]
    Debian(#[from] DebianError),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("archive database error: {0}")]
    Database(String),

    #[error("notification error: {0}")]
    Notification(String),

    #[error("byhand handler failed: {0}")]
    Handler(String),
}

impl<W> From<std::io::IntoInnerError<W>> for UploadError {
    fn from(e: std::io::IntoInnerError<W>) -> Self {
        Self::Io(e.into())
    }
}

impl From<tempfile::PersistError> for UploadError {
    fn from(e: tempfile::PersistError) -> Self {
        Self::Io(e.error)
    }
}

impl UploadError {
    /// The diagnostic category of this error when it judges an upload.
    ///
    /// Returns [None] for errors that concern the archive itself rather than the
    /// upload, which need operator attention instead of a reject.
    pub fn diagnostic_kind(&self) -> Option<DiagnosticKind> {
        match self {
            Self::SignatureInvalid(_) => Some(DiagnosticKind::SignatureInvalid),
            Self::Parse(_) => Some(DiagnosticKind::Parse),
            Self::MissingField(_) => Some(DiagnosticKind::MissingField),
            Self::Integrity(_) => Some(DiagnosticKind::Integrity),
            Self::Policy(_) => Some(DiagnosticKind::Policy),
            Self::AuthorizationDenied(_) => Some(DiagnosticKind::AuthorizationDenied),
            Self::Debian(DebianError::Io(_)) => None,
            Self::Debian(_) => Some(DiagnosticKind::Parse),
            Self::Protocol(_)
            | Self::VerifierProcess(_)
            | Self::TransientRace(_)
            | Self::Io(_)
            | Self::Yaml(_)
            | Self::Config(_)
            | Self::Database(_)
            | Self::Notification(_)
            | Self::Handler(_) => None,
        }
    }

    /// Convert into a reject diagnostic, if this error judges the upload.
    pub fn to_diagnostic(&self) -> Option<Diagnostic> {
        self.diagnostic_kind().map(|kind| Diagnostic {
            severity: Severity::Reject,
            kind,
            message: self.to_string(),
        })
    }
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, UploadError>;
