// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Notification of upload outcomes.

Messages are rendered from templates in which `__KEY__` placeholders are
substituted, then written as RFC 822 messages into a spool directory that a
separate mailer delivers from.
*/

use {
    crate::{
        config::MailConfig,
        diagnostic::Diagnostic,
        error::{Result, UploadError},
    },
    log::{debug, info},
    std::{
        io::Write,
        path::{Path, PathBuf},
    },
    strum_macros::{AsRefStr, Display},
};

/// Events uploaders are told about.
#[derive(AsRefStr, Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum NotificationKind {
    Accepted,
    New,
    Byhand,
    PolicyQueue,
    Rejected,
}

impl NotificationKind {
    /// Name of the template file rendering this kind.
    pub fn template_name(&self) -> &str {
        self.as_ref()
    }

    fn subject(&self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::New => "Queued for review (NEW)",
            Self::Byhand => "Queued for manual processing (BYHAND)",
            Self::PolicyQueue => "Queued for release team review",
            Self::Rejected => "Rejected",
        }
    }
}

/// Everything a notification may mention.
#[derive(Clone, Debug)]
pub struct Notification {
    pub kind: NotificationKind,
    /// Filename of the manifest.
    pub manifest: String,
    pub source: String,
    pub version: String,
    /// Target suites.
    pub distribution: String,
    pub maintainer: String,
    pub changed_by: Option<String>,
    /// Where the upload went, e.g. a queue name.
    pub destination: String,
    pub files: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
}

const FALLBACK_TEMPLATE: &str = "From: __FROM__
To: __MAINTAINER__
Cc: __CHANGED_BY__
Bcc: __BCC__
Subject: __SOURCE__ __VERSION__ (__DISTRIBUTION__): __SUBJECT__
X-Upload-Manifest: __MANIFEST__

__MANIFEST__: __SUBJECT__ (__DESTINATION__)

Files:
__FILES__

__DIAGNOSTICS__
";

impl Notification {
    fn substitutions(&self, mail: &MailConfig) -> Vec<(&'static str, String)> {
        let diagnostics = self
            .diagnostics
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("\n");

        vec![
            ("FROM", mail.from.clone()),
            ("MAINTAINER", self.maintainer.clone()),
            (
                "CHANGED_BY",
                self.changed_by
                    .clone()
                    .unwrap_or_else(|| self.maintainer.clone()),
            ),
            ("BCC", mail.bcc.join(", ")),
            ("SOURCE", self.source.clone()),
            ("VERSION", self.version.clone()),
            ("DISTRIBUTION", self.distribution.clone()),
            ("SUBJECT", self.kind.subject().to_string()),
            ("MANIFEST", self.manifest.clone()),
            ("DESTINATION", self.destination.clone()),
            ("FILES", self.files.join("\n")),
            ("DIAGNOSTICS", diagnostics),
        ]
    }

    /// Render a template.
    pub fn render(&self, template: &str, mail: &MailConfig) -> String {
        let mut text = template.to_string();
        for (key, value) in self.substitutions(mail) {
            text = text.replace(&format!("__{}__", key), &value);
        }

        // Headers without a value are dropped.
        let (headers, body) = text.split_once("\n\n").unwrap_or((text.as_str(), ""));
        let headers = headers
            .lines()
            .filter(|l| !l.trim_end().ends_with(':'))
            .collect::<Vec<_>>()
            .join("\n");

        format!("{}\n\n{}", headers, body)
    }
}

/// Delivers notifications.
pub trait Notifier {
    fn notify(&self, notification: &Notification) -> Result<()>;
}

/// A [Notifier] writing messages into a spool directory.
pub struct MailSpoolNotifier {
    spool: PathBuf,
    templates: Option<PathBuf>,
    mail: MailConfig,
}

impl MailSpoolNotifier {
    pub fn new(spool: impl Into<PathBuf>, templates: Option<PathBuf>, mail: MailConfig) -> Self {
        Self {
            spool: spool.into(),
            templates,
            mail,
        }
    }

    fn template(&self, kind: NotificationKind) -> Result<String> {
        if let Some(dir) = &self.templates {
            let path = dir.join(kind.template_name());

            match std::fs::read_to_string(&path) {
                Ok(template) => return Ok(template),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!("{} not found; using built-in template", path.display());
                }
                Err(e) => {
                    return Err(UploadError::Notification(format!(
                        "reading {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }

        Ok(FALLBACK_TEMPLATE.to_string())
    }

    /// The spool directory.
    pub fn spool(&self) -> &Path {
        &self.spool
    }
}

impl Notifier for MailSpoolNotifier {
    fn notify(&self, notification: &Notification) -> Result<()> {
        if !self.mail.enabled {
            debug!("mail disabled; not notifying about {}", notification.manifest);
            return Ok(());
        }

        let message = notification.render(&self.template(notification.kind)?, &self.mail);

        std::fs::create_dir_all(&self.spool)?;
        let mut file = tempfile::Builder::new()
            .prefix(&format!("{}-", notification.kind.template_name()))
            .suffix(".eml")
            .tempfile_in(&self.spool)?;
        file.write_all(message.as_bytes())?;
        let (_, path) = file.keep()?;

        info!(
            "queued {} notification for {} as {}",
            notification.kind,
            notification.manifest,
            path.display()
        );

        Ok(())
    }
}
