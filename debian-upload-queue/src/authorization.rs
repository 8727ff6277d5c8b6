// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Signer authorization. */

use {
    crate::{
        cache::RunCache,
        config::SuiteConfig,
        database::{ArchiveDatabase, Identity},
        diagnostic::{DiagnosticKind, Diagnostics},
        error::Result,
        manifest::UploadManifest,
    },
    log::debug,
    mailparse::{addrparse, MailAddr},
    std::collections::BTreeSet,
    strum_macros::Display,
};

/// Suite whose uploader lists always apply to non-maintainer uploads.
pub const UNSTABLE: &str = "unstable";

/// How the signer relates to the upload.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum UploadClass {
    /// The signer is the maintainer or the author of the change.
    SelfUpload,
    /// The signer uploads on behalf of the maintainer.
    Sponsored,
    /// The signer may only upload packages that list them as allowed uploaders.
    NonMaintainer,
}

/// Display names and addresses of a list of mailboxes.
fn mailboxes(value: &str) -> Vec<(String, String)> {
    let list = match addrparse(value) {
        Ok(list) => list,
        Err(_) => return vec![],
    };

    list.iter()
        .flat_map(|addr| match addr {
            MailAddr::Single(info) => vec![info.clone()],
            MailAddr::Group(group) => group.addrs.clone(),
        })
        .map(|info| (info.display_name.unwrap_or_default(), info.addr))
        .collect()
}

/// Classify an upload by comparing the signer with its Maintainer and Changed-By.
pub fn classify(manifest: &UploadManifest, identity: &Identity) -> UploadClass {
    let mut people = mailboxes(&manifest.maintainer);
    if let Some(changed_by) = &manifest.changed_by {
        people.extend(mailboxes(changed_by));
    }

    // A match on the address OR the display name is enough. Display names are
    // not verified, so this is looser than requiring both.
    let matches = people.iter().any(|(name, email)| {
        email.eq_ignore_ascii_case(&identity.email)
            || (!name.is_empty() && *name == identity.name)
    });

    if matches {
        UploadClass::SelfUpload
    } else if identity.restricted {
        UploadClass::NonMaintainer
    } else {
        UploadClass::Sponsored
    }
}

/// Decides whether a signer may contribute the packages of an upload.
pub struct AuthorizationEngine<'a> {
    db: &'a dyn ArchiveDatabase,
    cache: &'a RunCache,
    suites: &'a [SuiteConfig],
}

impl<'a> AuthorizationEngine<'a> {
    pub fn new(db: &'a dyn ArchiveDatabase, cache: &'a RunCache, suites: &'a [SuiteConfig]) -> Self {
        Self { db, cache, suites }
    }

    /// Check the signer `fingerprint` against the upload.
    ///
    /// `new_files` are the files lacking an override in some target suite. Every
    /// violation is recorded. Returns the upload class if the signer is known.
    pub fn authorize(
        &self,
        manifest: &UploadManifest,
        fingerprint: &str,
        targets: &BTreeSet<String>,
        new_files: &BTreeSet<String>,
        diagnostics: &mut Diagnostics,
    ) -> Result<Option<UploadClass>> {
        let identity = match self.cache.identity(self.db, fingerprint)? {
            Some(identity) => identity,
            None => {
                diagnostics.reject(
                    DiagnosticKind::AuthorizationDenied,
                    format!("key {} is not associated with any uploader", fingerprint),
                );
                return Ok(None);
            }
        };

        let class = classify(manifest, &identity);
        debug!(
            "{}: {} <{}> makes a {} upload",
            manifest.filename, identity.name, identity.email, class
        );

        match class {
            UploadClass::SelfUpload => {}
            UploadClass::Sponsored => {
                if !identity.may_sponsor {
                    diagnostics.reject(
                        DiagnosticKind::AuthorizationDenied,
                        format!("{} is not allowed to sponsor uploads", identity.name),
                    );
                }
            }
            UploadClass::NonMaintainer => {
                self.check_allowed_uploader(manifest, &identity, targets, diagnostics)?;
            }
        }

        self.check_hijacks(manifest, targets, diagnostics)?;

        if class != UploadClass::SelfUpload {
            if let Some(file) = manifest.byhand_files().next() {
                diagnostics.reject(
                    DiagnosticKind::AuthorizationDenied,
                    format!(
                        "{}: byhand files may only be uploaded by the maintainer",
                        file.filename
                    ),
                );
            }
            if let Some(file) = new_files.iter().next() {
                diagnostics.reject(
                    DiagnosticKind::AuthorizationDenied,
                    format!(
                        "{}: new packages may only be uploaded by the maintainer",
                        file
                    ),
                );
            }
        }

        if !manifest.is_sourceful() {
            self.check_binary_acl(manifest, &identity, targets, diagnostics);
        }

        Ok(Some(class))
    }

    fn check_allowed_uploader(
        &self,
        manifest: &UploadManifest,
        identity: &Identity,
        targets: &BTreeSet<String>,
        diagnostics: &mut Diagnostics,
    ) -> Result<()> {
        let mut suites = targets.iter().map(|s| s.as_str()).collect::<BTreeSet<_>>();
        suites.insert(UNSTABLE);

        for suite in suites {
            let allowed = self
                .cache
                .allowed_uploaders(self.db, &manifest.source, suite)?;

            if allowed
                .iter()
                .any(|f| f.eq_ignore_ascii_case(&identity.fingerprint))
            {
                return Ok(());
            }
        }

        diagnostics.reject(
            DiagnosticKind::AuthorizationDenied,
            format!(
                "{} may not upload source package {}",
                identity.name, manifest.source
            ),
        );

        Ok(())
    }

    fn check_hijacks(
        &self,
        manifest: &UploadManifest,
        targets: &BTreeSet<String>,
        diagnostics: &mut Diagnostics,
    ) -> Result<()> {
        for package in &manifest.binaries {
            for suite in targets {
                if let Some(source) = self.db.latest_binary_source(package, suite)? {
                    if source != manifest.source {
                        diagnostics.reject(
                            DiagnosticKind::AuthorizationDenied,
                            format!(
                                "binary package {} in {} belongs to source {}, not {}",
                                package, suite, source, manifest.source
                            ),
                        );
                    }
                }
            }
        }

        Ok(())
    }

    fn check_binary_acl(
        &self,
        manifest: &UploadManifest,
        identity: &Identity,
        targets: &BTreeSet<String>,
        diagnostics: &mut Diagnostics,
    ) {
        for suite in self.suites.iter().filter(|s| targets.contains(&s.name)) {
            for arch in manifest.binary_architectures() {
                if let Some(allowed) = suite.binary_upload_acl.get(arch) {
                    if !allowed
                        .iter()
                        .any(|f| f.eq_ignore_ascii_case(&identity.fingerprint))
                    {
                        diagnostics.reject(
                            DiagnosticKind::AuthorizationDenied,
                            format!(
                                "{} may not upload {} binaries to {}",
                                identity.name, arch, suite.name
                            ),
                        );
                    }
                }
            }
        }
    }
}
