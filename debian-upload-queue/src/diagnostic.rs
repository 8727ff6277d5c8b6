// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Accumulated findings about an upload.

Checks never stop at the first problem. Each finding is recorded as a [Diagnostic]
and the run decides afterwards whether any of them forbids acceptance.
*/

use {
    log::warn,
    serde::{Deserialize, Serialize},
    std::fmt::{Display, Formatter},
    strum_macros::{Display as StrumDisplay, EnumString},
};

/// How serious a diagnostic is.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, StrumDisplay,
)]
pub enum Severity {
    /// The upload cannot be accepted.
    #[strum(serialize = "REJECT")]
    Reject,
    /// Informational. Does not affect the decision.
    #[strum(serialize = "WARNING")]
    Warning,
}

/// The category of a diagnostic.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    EnumString,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    StrumDisplay,
)]
#[strum(serialize_all = "kebab-case")]
pub enum DiagnosticKind {
    Protocol,
    SignatureInvalid,
    Parse,
    MissingField,
    Integrity,
    Policy,
    AuthorizationDenied,
    TransientRace,
}

/// A single finding about an upload.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.severity, self.kind, self.message)
    }
}

/// An ordered collection of [Diagnostic].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diagnostic.
    ///
    /// Rejects are logged at warn level as they are recorded.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        if diagnostic.severity == Severity::Reject {
            warn!("{}", diagnostic);
        }

        self.items.push(diagnostic);
    }

    /// Record a reject-severity diagnostic.
    pub fn reject(&mut self, kind: DiagnosticKind, message: impl ToString) {
        self.push(Diagnostic {
            severity: Severity::Reject,
            kind,
            message: message.to_string(),
        });
    }

    /// Record a warning-severity diagnostic.
    pub fn warning(&mut self, kind: DiagnosticKind, message: impl ToString) {
        self.push(Diagnostic {
            severity: Severity::Warning,
            kind,
            message: message.to_string(),
        });
    }

    /// Append every diagnostic of another collection.
    pub fn extend(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    /// Whether any diagnostic forbids acceptance.
    pub fn has_rejects(&self) -> bool {
        self.items.iter().any(|d| d.severity == Severity::Reject)
    }

    /// Whether a reject of the given kind was recorded.
    pub fn has_reject_of_kind(&self, kind: DiagnosticKind) -> bool {
        self.items
            .iter()
            .any(|d| d.severity == Severity::Reject && d.kind == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn rejects(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(|d| d.severity == Severity::Reject)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }
}

impl Display for Diagnostics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for d in &self.items {
            writeln!(f, "{}", d)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_tracking() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.warning(DiagnosticKind::Policy, "mapping stable to proposed-updates");
        assert!(!diagnostics.has_rejects());

        diagnostics.reject(DiagnosticKind::Integrity, "size mismatch");
        assert!(diagnostics.has_rejects());
        assert!(diagnostics.has_reject_of_kind(DiagnosticKind::Integrity));
        assert!(!diagnostics.has_reject_of_kind(DiagnosticKind::Policy));
        assert_eq!(diagnostics.rejects().count(), 1);

        assert_eq!(
            diagnostics.to_string(),
            "WARNING (policy): mapping stable to proposed-updates\nREJECT (integrity): size mismatch\n"
        );
    }
}
