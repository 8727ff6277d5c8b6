// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The upload admission pipeline.

[AdmissionPipeline] takes the path of a `.changes` manifest and drives it to one
terminal [Decision]. Processing happens in two steps so a caller can interpose:

1. [AdmissionPipeline::evaluate()] verifies the signature, copies the manifest and
   its files into a private staging directory, validates them, resolves target
   suites, authorizes the signer and routes the upload. Nothing outside the
   staging directory is touched.
2. [AdmissionPipeline::execute()] performs the terminal action: moving files into
   the pool, a holding queue or the reject area, recording the upload and sending
   notifications.

Every terminal action runs inside a [FilesystemTransaction]. Accepting records the
upload in the archive database as its final step, so an interrupted accept leaves
the upload in the incoming directory to be processed again.
*/

use {
    crate::{
        authorization::AuthorizationEngine,
        byhand::{ByhandRequest, ByhandRunner},
        cache::RunCache,
        config::ArchiveConfig,
        database::{AcceptedUpload, ArchiveDatabase, BinaryRecord, PoolFile, SignatureHistory},
        diagnostic::{DiagnosticKind, Diagnostics},
        distribution::{DistributionMapper, MappedDistributions},
        error::{Result, UploadError},
        manifest::{self, FileEntry, FileOrigin, UploadManifest},
        notify::{Notification, NotificationKind, Notifier},
        routing::{self, find_handler, missing_overrides, ByhandName, Decision, QueueKind, RoutingContext},
        signature::{SignatureResult, SignatureVerifier},
        transaction::FilesystemTransaction,
        validation::{check_manifest_fields, StructuralValidator},
    },
    chrono::{Duration, Utc},
    debian_packaging::{changes::ChangesFile, io::ChecksumType},
    log::{debug, error, info, warn},
    std::{
        collections::BTreeSet,
        fmt::{Display, Formatter},
        path::{Path, PathBuf},
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
    },
    tempfile::TempDir,
};

/// Validation, mapping and authorization run at most this many times per manifest.
pub const MAX_PASSES: usize = 2;

/// The collaborators a pipeline consults.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub verifier: &'a dyn SignatureVerifier,
    pub database: &'a dyn ArchiveDatabase,
    pub history: &'a dyn SignatureHistory,
    pub notifier: &'a dyn Notifier,
    pub byhand: &'a dyn ByhandRunner,
}

/// Switches altering what terminal actions do.
#[derive(Clone, Copy, Debug, Default)]
pub struct PipelineOptions {
    /// Decide but change nothing.
    pub dry_run: bool,
    /// Do not send notifications.
    pub no_mail: bool,
}

/// What happened to a manifest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The terminal action for the decision was performed.
    Completed(Decision),
    /// A decision was reached but not acted on.
    DryRun(Decision),
    /// Left in place to be processed by a later run.
    Skipped(String),
    /// Processing was cancelled before a terminal action began.
    Cancelled,
    /// An internal error stopped processing. The upload was left in place.
    Failed(String),
}

impl Display for Outcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed(decision) => write!(f, "{}", decision),
            Self::DryRun(decision) => write!(f, "{} (dry run)", decision),
            Self::Skipped(reason) => write!(f, "skipped: {}", reason),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// The result of processing one manifest.
#[derive(Clone, Debug)]
pub struct ProcessingReport {
    pub path: PathBuf,
    pub outcome: Outcome,
    pub diagnostics: Diagnostics,
    /// Number of validation passes used.
    pub passes: usize,
}

impl ProcessingReport {
    fn without_evaluation(path: &Path, outcome: Outcome) -> Self {
        Self {
            path: path.to_path_buf(),
            outcome,
            diagnostics: Diagnostics::new(),
            passes: 0,
        }
    }
}

/// What to do with an evaluated upload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    /// Carry out the proposed decision.
    Apply,
    /// Reject regardless of the proposed decision.
    Reject,
    /// Leave the upload for a later run.
    Skip,
}

/// A judged upload awaiting its terminal action.
///
/// Dropping an evaluation deletes its staged files.
pub struct Evaluation {
    /// The manifest in the incoming directory.
    pub path: PathBuf,
    /// Absent if the manifest could not be parsed.
    pub manifest: Option<UploadManifest>,
    pub decision: Decision,
    pub diagnostics: Diagnostics,
    pub passes: usize,
    pub targets: BTreeSet<String>,
    /// Auxiliary suites the accepted version propagates to.
    pub propagations: BTreeSet<String>,
    /// Primary key fingerprint of a valid signature.
    pub signer: Option<String>,
    /// Signature identifier to remember once a terminal action completes.
    signature_id: Option<String>,
    stage: TempDir,
}

impl Evaluation {
    /// Filename of the manifest.
    pub fn manifest_name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// The private directory holding copies of the upload's files.
    pub fn stage(&self) -> &Path {
        self.stage.path()
    }

    /// Files the upload itself brought, manifest first.
    ///
    /// Files spliced in from other uploads are not included.
    fn owned_files(&self) -> Vec<String> {
        let mut files = vec![self.manifest_name()];

        if let Some(manifest) = &self.manifest {
            files.extend(
                manifest
                    .files
                    .values()
                    .filter(|e| e.origin == FileOrigin::Manifest)
                    .filter(|e| self.stage().join(&e.filename).is_file())
                    .map(|e| e.filename.clone()),
            );
        }

        files
    }
}

/// Everything a validation pass establishes.
struct Checked {
    diagnostics: Diagnostics,
    missing: Vec<FileEntry>,
    mapped: MappedDistributions,
    propagations: BTreeSet<String>,
    new_files: BTreeSet<String>,
}

/// Drives uploads from the incoming directory to a terminal outcome.
pub struct AdmissionPipeline<'a> {
    config: &'a ArchiveConfig,
    collaborators: Collaborators<'a>,
    options: PipelineOptions,
    cancel: Arc<AtomicBool>,
    cache: RunCache,
}

impl<'a> AdmissionPipeline<'a> {
    pub fn new(config: &'a ArchiveConfig, collaborators: Collaborators<'a>) -> Self {
        Self {
            config,
            collaborators,
            options: PipelineOptions::default(),
            cancel: Arc::new(AtomicBool::new(false)),
            cache: RunCache::new(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Use a shared cancellation flag.
    ///
    /// Setting the flag stops processing before the next terminal action.
    pub fn with_cancellation(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Process manifests in order, applying every proposed decision.
    pub fn process_all(&self, paths: &[PathBuf]) -> Vec<ProcessingReport> {
        self.process_all_with(paths, |_| Action::Apply)
    }

    /// Process manifests in order, asking `choose` what to do with each evaluation.
    ///
    /// A failure on one manifest never stops processing of the others.
    pub fn process_all_with(
        &self,
        paths: &[PathBuf],
        mut choose: impl FnMut(&Evaluation) -> Action,
    ) -> Vec<ProcessingReport> {
        let mut reports = vec![];

        for path in paths {
            if self.cancelled() {
                reports.push(ProcessingReport::without_evaluation(path, Outcome::Cancelled));
                continue;
            }

            info!("processing {}", path.display());

            let evaluation = match self.evaluate(path) {
                Ok(evaluation) => evaluation,
                Err(UploadError::TransientRace(reason)) => {
                    info!("skipping {}: {}", path.display(), reason);
                    reports.push(ProcessingReport::without_evaluation(
                        path,
                        Outcome::Skipped(reason),
                    ));
                    continue;
                }
                Err(e) => {
                    error!("error processing {}: {}", path.display(), e);
                    reports.push(ProcessingReport::without_evaluation(
                        path,
                        Outcome::Failed(e.to_string()),
                    ));
                    continue;
                }
            };

            let report = match choose(&evaluation) {
                Action::Apply => self.execute(evaluation, false),
                Action::Reject => self.execute(evaluation, true),
                Action::Skip => ProcessingReport {
                    path: evaluation.path.clone(),
                    outcome: Outcome::Skipped("skipped by operator".to_string()),
                    diagnostics: evaluation.diagnostics.clone(),
                    passes: evaluation.passes,
                },
            };

            info!("{}: {}", path.display(), report.outcome);
            reports.push(report);
        }

        reports
    }

    fn recently_modified(&self, path: &Path) -> Result<bool> {
        let grace = std::time::Duration::from_secs(self.config.checks.new_file_grace_seconds);

        let modified = match std::fs::metadata(path) {
            Ok(metadata) => metadata.modified()?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        // A modification time in the future counts as recent.
        Ok(modified.elapsed().map(|age| age < grace).unwrap_or(true))
    }

    fn check_signature(
        &self,
        signed: &[u8],
        diagnostics: &mut Diagnostics,
    ) -> Result<Option<SignatureResult>> {
        let verified =
            self.collaborators
                .verifier
                .verify(signed, &self.config.verifier.keyrings, false);

        let result = match verified {
            Ok(result) => result,
            Err(UploadError::Protocol(message)) => {
                error!("signature verifier protocol error: {}", message);
                diagnostics.reject(DiagnosticKind::Protocol, message);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if !result.valid {
            diagnostics.reject(
                DiagnosticKind::SignatureInvalid,
                format!("signature invalid: {}", result.invalid_reasons.join("; ")),
            );
            return Ok(Some(result));
        }

        let checks = &self.config.checks;
        let now = Utc::now();

        match result.timestamp {
            Some(t) if t < now - Duration::days(checks.signature_max_age_days) => {
                diagnostics.reject(
                    DiagnosticKind::SignatureInvalid,
                    format!("signature made {} is too old", t),
                );
            }
            Some(t) if t > now + Duration::seconds(checks.signature_future_grace_seconds) => {
                diagnostics.reject(
                    DiagnosticKind::SignatureInvalid,
                    format!("signature made {} is in the future", t),
                );
            }
            Some(_) => {}
            None => diagnostics.reject(
                DiagnosticKind::SignatureInvalid,
                "signature carries no timestamp",
            ),
        }

        if result.weak_algorithm {
            diagnostics.warning(
                DiagnosticKind::SignatureInvalid,
                "signature uses a weak digest algorithm",
            );
        }

        if let Some(id) = &result.signature_id {
            if self.collaborators.history.is_known(id)? {
                diagnostics.reject(
                    DiagnosticKind::SignatureInvalid,
                    format!("signature already seen: {}", id),
                );
            }
        }

        Ok(Some(result))
    }

    /// Build the manifest from its verified text.
    fn build_manifest(
        &self,
        filename: &str,
        text: &str,
        diagnostics: &mut Diagnostics,
    ) -> Result<Option<UploadManifest>> {
        let paragraph = match manifest::parse(text) {
            Ok(paragraph) => paragraph,
            Err(e) => {
                diagnostics.push(e.to_diagnostic().ok_or(e)?);
                return Ok(None);
            }
        };

        let changes = ChangesFile::from(paragraph);
        if !check_manifest_fields(&changes, diagnostics) {
            return Ok(None);
        }

        match UploadManifest::from_changes(filename, changes) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e) => {
                diagnostics.push(e.to_diagnostic().ok_or(e)?);
                Ok(None)
            }
        }
    }

    /// Copy a file into the stage, returning whether it existed.
    fn stage_file(source: &Path, stage: &Path, filename: &str) -> Result<bool> {
        match std::fs::copy(source, stage.join(filename)) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Find missing upstream files among other uploads and splice them in.
    ///
    /// Returns whether anything was spliced.
    fn splice_missing(
        &self,
        manifest: &mut UploadManifest,
        missing: Vec<FileEntry>,
        incoming: &Path,
        stage: &Path,
    ) -> Result<bool> {
        let mut dirs = vec![incoming.to_path_buf()];
        if self.config.paths.incoming != incoming {
            dirs.push(self.config.paths.incoming.clone());
        }

        let mut spliced = false;

        for entry in missing {
            let found = dirs
                .iter()
                .map(|d| d.join(&entry.filename))
                .find(|p| p.is_file());

            if let Some(path) = found {
                if Self::stage_file(&path, stage, &entry.filename)? {
                    info!(
                        "{}: using {} from another upload",
                        manifest.filename,
                        path.display()
                    );
                    manifest.splice_file(entry);
                    spliced = true;
                }
            }
        }

        Ok(spliced)
    }

    fn check_versions(
        &self,
        manifest: &UploadManifest,
        mapped: &MappedDistributions,
        diagnostics: &mut Diagnostics,
    ) -> Result<BTreeSet<String>> {
        let db = self.collaborators.database;

        if manifest.is_sourceful() {
            for suite in &mapped.targets {
                for existing in db.source_versions(&manifest.source, suite)? {
                    if existing >= manifest.version {
                        diagnostics.reject(
                            DiagnosticKind::Policy,
                            format!(
                                "{} {} is not newer than {} in {}",
                                manifest.source, manifest.version, existing, suite
                            ),
                        );
                    }
                }
            }
        }

        let mut propagations = BTreeSet::new();
        for suite in &mapped.propup {
            if db
                .source_versions(&manifest.source, suite)?
                .iter()
                .any(|v| *v < manifest.version)
            {
                debug!("{}: propagating to {}", manifest.filename, suite);
                propagations.insert(suite.clone());
            }
        }

        Ok(propagations)
    }

    /// One pass of validation, distribution mapping, version checks and authorization.
    fn check(
        &self,
        manifest: &UploadManifest,
        stage: &Path,
        signer: Option<&str>,
        mut diagnostics: Diagnostics,
    ) -> Result<Checked> {
        let db = self.collaborators.database;

        let outcome = StructuralValidator::new(&self.config.checks, db).validate(
            manifest,
            stage,
            &mut diagnostics,
        )?;

        let mapped = DistributionMapper::new(self.config).map(
            &manifest.distributions,
            &manifest.architectures,
            &mut diagnostics,
        );

        let propagations = self.check_versions(manifest, &mapped, &mut diagnostics)?;

        let new_files = missing_overrides(
            manifest,
            &mapped.targets,
            &self.config.suites,
            db,
            &self.cache,
        )?;

        if let Some(fingerprint) = signer {
            AuthorizationEngine::new(db, &self.cache, &self.config.suites).authorize(
                manifest,
                fingerprint,
                &mapped.targets,
                &new_files,
                &mut diagnostics,
            )?;
        }

        Ok(Checked {
            diagnostics,
            missing: outcome.missing_files,
            mapped,
            propagations,
            new_files,
        })
    }

    /// Judge an upload without acting on it.
    ///
    /// Fails with [UploadError::TransientRace] if the upload is still being written.
    /// Other errors concern the archive rather than the upload.
    pub fn evaluate(&self, path: &Path) -> Result<Evaluation> {
        if self.recently_modified(path)? {
            return Err(UploadError::TransientRace(format!(
                "{} was modified recently",
                path.display()
            )));
        }

        let filename = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .ok_or_else(|| UploadError::Config(format!("{} is not a file", path.display())))?;
        let incoming = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let staging_root = self.config.paths.staging_dir();
        std::fs::create_dir_all(&staging_root)?;
        let stage = tempfile::Builder::new()
            .prefix("upload-")
            .tempdir_in(&staging_root)?;

        let signed = std::fs::read(path)?;
        std::fs::write(stage.path().join(&filename), &signed)?;

        let mut diagnostics = Diagnostics::new();

        let signature = self.check_signature(&signed, &mut diagnostics)?;
        let signer = signature
            .as_ref()
            .filter(|s| s.valid)
            .and_then(|s| s.signer())
            .map(|s| s.to_string());
        let signature_id = signature
            .as_ref()
            .filter(|_| !diagnostics.has_reject_of_kind(DiagnosticKind::SignatureInvalid))
            .and_then(|s| s.signature_id.clone());

        let text = match &signature {
            Some(s) if !s.content.is_empty() => String::from_utf8_lossy(&s.content).to_string(),
            _ => manifest::strip_clearsign(&String::from_utf8_lossy(&signed)),
        };

        let mut evaluation = Evaluation {
            path: path.to_path_buf(),
            manifest: None,
            decision: Decision::Reject,
            diagnostics: Diagnostics::new(),
            passes: 0,
            targets: BTreeSet::new(),
            propagations: BTreeSet::new(),
            signer: signer.clone(),
            signature_id,
            stage,
        };

        let mut manifest = match self.build_manifest(&filename, &text, &mut diagnostics)? {
            Some(manifest) => manifest,
            None => {
                evaluation.diagnostics = diagnostics;
                return Ok(evaluation);
            }
        };

        for entry in manifest.files.values() {
            if self.recently_modified(&incoming.join(&entry.filename))? {
                return Err(UploadError::TransientRace(format!(
                    "{} was modified recently",
                    entry.filename
                )));
            }
        }

        for entry in manifest.files.values() {
            Self::stage_file(
                &incoming.join(&entry.filename),
                evaluation.stage(),
                &entry.filename,
            )?;
        }

        if diagnostics.has_rejects() {
            evaluation.manifest = Some(manifest);
            evaluation.diagnostics = diagnostics;
            return Ok(evaluation);
        }

        let mut passes = 0;
        let checked = loop {
            passes += 1;

            let checked = self.check(
                &manifest,
                evaluation.stage(),
                signer.as_deref(),
                diagnostics.clone(),
            )?;

            if passes < MAX_PASSES
                && !checked.missing.is_empty()
                && self.splice_missing(
                    &mut manifest,
                    checked.missing.clone(),
                    &incoming,
                    evaluation.stage(),
                )?
            {
                info!("{}: checking again with spliced files", filename);
                continue;
            }

            break checked;
        };

        let from_disembargo = self
            .config
            .paths
            .disembargo
            .as_deref()
            .map(|d| d == incoming)
            .unwrap_or(false);

        evaluation.decision = routing::route(
            &manifest,
            self.config,
            RoutingContext {
                diagnostics: &checked.diagnostics,
                new_files: &checked.new_files,
                targets: &checked.mapped.targets,
                from_disembargo,
            },
        );
        evaluation.passes = passes;
        evaluation.targets = checked.mapped.targets;
        evaluation.propagations = checked.propagations;
        evaluation.diagnostics = checked.diagnostics;
        evaluation.manifest = Some(manifest);

        Ok(evaluation)
    }

    /// Perform the terminal action of an evaluation.
    ///
    /// `reject` rejects the upload regardless of its proposed decision.
    pub fn execute(&self, mut evaluation: Evaluation, reject: bool) -> ProcessingReport {
        if reject && evaluation.decision != Decision::Reject {
            evaluation
                .diagnostics
                .reject(DiagnosticKind::Policy, "rejected by the archive operator");
            evaluation.decision = Decision::Reject;
        }

        let outcome = if self.cancelled() {
            Outcome::Cancelled
        } else if self.options.dry_run {
            Outcome::DryRun(evaluation.decision)
        } else {
            match self.act(&mut evaluation) {
                Ok(decision) => {
                    self.finish(&evaluation, decision);
                    Outcome::Completed(decision)
                }
                Err(e) => {
                    error!("{}: terminal action failed: {}", evaluation.path.display(), e);
                    Outcome::Failed(e.to_string())
                }
            }
        };

        ProcessingReport {
            path: evaluation.path.clone(),
            outcome,
            diagnostics: evaluation.diagnostics.clone(),
            passes: evaluation.passes,
        }
    }

    /// Run the terminal action, returning the decision actually carried out.
    fn act(&self, evaluation: &mut Evaluation) -> Result<Decision> {
        let decision = match evaluation.decision {
            Decision::Queue(QueueKind::Autobyhand) => match self.run_byhand(evaluation) {
                Ok(()) => Decision::Accept,
                Err(e) => {
                    warn!("{}: {}", evaluation.path.display(), e);
                    evaluation.diagnostics.warning(
                        DiagnosticKind::Policy,
                        format!("automatic byhand processing failed: {}", e),
                    );
                    Decision::Queue(QueueKind::Byhand)
                }
            },
            decision => decision,
        };

        let mut transaction = FilesystemTransaction::new(&self.config.paths.staging_dir())?;

        let res = match decision {
            Decision::Accept => self.accept(evaluation, &mut transaction),
            Decision::Reject => self.reject(evaluation, &mut transaction),
            Decision::Queue(kind) => self.queue(evaluation, kind, &mut transaction),
        };

        match res {
            Ok(()) => {
                transaction.commit();
                Ok(decision)
            }
            Err(e) => {
                if let Err(rollback) = transaction.rollback() {
                    error!("rollback failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    fn run_byhand(&self, evaluation: &Evaluation) -> Result<()> {
        let manifest = evaluation
            .manifest
            .as_ref()
            .ok_or_else(|| UploadError::Handler("upload has no manifest".to_string()))?;
        let manifest_path = evaluation.stage().join(evaluation.manifest_name());

        for file in manifest.byhand_files() {
            let handler = find_handler(&self.config.autobyhand, manifest, file).ok_or_else(|| {
                UploadError::Handler(format!("no handler for {}", file.filename))
            })?;
            let name = ByhandName::parse(&file.filename).ok_or_else(|| {
                UploadError::Handler(format!("{} is not a byhand filename", file.filename))
            })?;

            self.collaborators.byhand.run(
                handler,
                &ByhandRequest {
                    file: &evaluation.stage().join(&file.filename),
                    package: name.package,
                    version: name.version,
                    architecture: name.architecture,
                    manifest: &manifest_path,
                },
            )?;
        }

        Ok(())
    }

    /// Remove the upload's own files from the incoming directory.
    fn remove_originals(
        &self,
        evaluation: &Evaluation,
        transaction: &mut FilesystemTransaction,
    ) -> Result<()> {
        let incoming = evaluation.path.parent().unwrap_or_else(|| Path::new("."));

        for filename in evaluation.owned_files() {
            let original = incoming.join(&filename);
            if original.is_file() {
                transaction.remove_file(&original)?;
            }
        }

        Ok(())
    }

    /// Move the upload's own files into `dest`.
    fn move_to(
        &self,
        evaluation: &Evaluation,
        dest: &Path,
        transaction: &mut FilesystemTransaction,
    ) -> Result<()> {
        for filename in evaluation.owned_files() {
            transaction.copy_file(&evaluation.stage().join(&filename), &dest.join(&filename))?;
        }

        self.remove_originals(evaluation, transaction)
    }

    fn reject(
        &self,
        evaluation: &Evaluation,
        transaction: &mut FilesystemTransaction,
    ) -> Result<()> {
        let dest = self.config.paths.reject_dir();
        self.move_to(evaluation, &dest, transaction)?;

        transaction.write_file(
            &dest.join(format!("{}.reason", evaluation.manifest_name())),
            evaluation.diagnostics.to_string().as_bytes(),
        )
    }

    fn queue(
        &self,
        evaluation: &Evaluation,
        kind: QueueKind,
        transaction: &mut FilesystemTransaction,
    ) -> Result<()> {
        self.move_to(evaluation, &self.config.paths.queue_dir(kind), transaction)
    }

    fn accept(
        &self,
        evaluation: &Evaluation,
        transaction: &mut FilesystemTransaction,
    ) -> Result<()> {
        let manifest = evaluation
            .manifest
            .as_ref()
            .ok_or_else(|| UploadError::Parse("cannot accept an unparsed manifest".to_string()))?;
        let signer = evaluation.signer.clone().ok_or_else(|| {
            UploadError::SignatureInvalid("cannot accept an unsigned upload".to_string())
        })?;
        let db = self.collaborators.database;
        let done = self.config.paths.done_dir();

        let mut pool_files = vec![];
        let mut binaries = vec![];

        for entry in manifest.files.values() {
            let staged = evaluation.stage().join(&entry.filename);

            if entry.is_byhand() {
                transaction.copy_file(&staged, &done.join(&entry.filename))?;
                continue;
            }

            if let Some(identity) = entry.identity() {
                binaries.push(BinaryRecord {
                    package: identity.package.clone(),
                    version: identity.version.clone(),
                    architecture: identity.architecture.clone(),
                    source: manifest.source.clone(),
                    suite: String::new(),
                });
            }

            if db.pool_file(&entry.filename)?.is_some() {
                debug!("{} is already in the pool", entry.filename);
                continue;
            }

            let relative = pool_path(&entry.component, &manifest.source, &entry.filename);
            transaction.copy_file(&staged, &self.config.paths.pool.join(&relative))?;

            let digest = |checksum: ChecksumType| {
                entry.hashes.get(&checksum).cloned().unwrap_or_default()
            };
            pool_files.push(PoolFile {
                filename: entry.filename.clone(),
                path: relative,
                size: entry.size,
                md5: digest(ChecksumType::Md5),
                sha1: digest(ChecksumType::Sha1),
                sha256: digest(ChecksumType::Sha256),
            });
        }

        let name = evaluation.manifest_name();
        transaction.copy_file(&evaluation.stage().join(&name), &done.join(&name))?;
        self.remove_originals(evaluation, transaction)?;

        db.record_accepted(AcceptedUpload {
            manifest: name,
            source: manifest.source.clone(),
            version: manifest.version.to_string(),
            architectures: manifest.architectures.iter().cloned().collect(),
            suites: evaluation.targets.iter().cloned().collect(),
            propagations: evaluation.propagations.iter().cloned().collect(),
            fingerprint: signer,
            binaries,
            files: pool_files,
            accepted: Utc::now(),
        })?;

        self.cache.clear();

        Ok(())
    }

    /// Bookkeeping after a terminal action completed.
    fn finish(&self, evaluation: &Evaluation, decision: Decision) {
        if let Some(id) = &evaluation.signature_id {
            if let Err(e) = self
                .collaborators
                .history
                .record(id, &evaluation.manifest_name())
            {
                error!("recording signature {}: {}", id, e);
            }
        }

        if self.options.no_mail {
            return;
        }

        match notification(evaluation, decision) {
            Some(n) => {
                if let Err(e) = self.collaborators.notifier.notify(&n) {
                    warn!("{}: notification failed: {}", evaluation.path.display(), e);
                }
            }
            None => debug!(
                "{}: nobody to notify about an unparsed manifest",
                evaluation.path.display()
            ),
        }
    }
}

/// Location of a file in the pool, relative to the pool root.
pub fn pool_path(component: &str, source: &str, filename: &str) -> String {
    let prefix_len = if source.starts_with("lib") && source.len() > 3 {
        4
    } else {
        1
    };
    let prefix = source.get(..prefix_len).unwrap_or(source);

    format!("{}/{}/{}/{}", component, prefix, source, filename)
}

fn notification(evaluation: &Evaluation, decision: Decision) -> Option<Notification> {
    let manifest = evaluation.manifest.as_ref()?;

    let (kind, destination) = match decision {
        Decision::Accept => (NotificationKind::Accepted, "pool".to_string()),
        Decision::Reject => (NotificationKind::Rejected, "reject".to_string()),
        Decision::Queue(QueueKind::New) => (NotificationKind::New, "new".to_string()),
        Decision::Queue(kind @ (QueueKind::Autobyhand | QueueKind::Byhand)) => {
            (NotificationKind::Byhand, kind.directory_name().to_string())
        }
        Decision::Queue(kind) => (NotificationKind::PolicyQueue, kind.directory_name().to_string()),
    };

    let distribution = if evaluation.targets.is_empty() {
        &manifest.distributions
    } else {
        &evaluation.targets
    };

    Some(Notification {
        kind,
        manifest: evaluation.manifest_name(),
        source: manifest.source.clone(),
        version: manifest.version.to_string(),
        distribution: distribution.iter().cloned().collect::<Vec<_>>().join(" "),
        maintainer: manifest.maintainer.clone(),
        changed_by: manifest.changed_by.clone(),
        destination,
        files: manifest.files.keys().cloned().collect(),
        diagnostics: evaluation.diagnostics.iter().cloned().collect(),
    })
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            config::{PathsConfig, EXAMPLE_CONFIG},
            database::{ArchiveState, Identity, OverrideEntry, OverrideKind, YamlArchiveDatabase},
            testutil::{FixtureFile, UploadFixture, FINGERPRINT},
        },
        debian_packaging::package_version::PackageVersion,
        filetime::FileTime,
        std::cell::RefCell,
    };

    #[derive(Clone, Copy)]
    enum Script {
        Good,
        Revoked,
        Md5,
    }

    struct ScriptedVerifier {
        script: Script,
        signature_id: &'static str,
    }

    impl SignatureVerifier for ScriptedVerifier {
        fn verify(
            &self,
            signed: &[u8],
            _keyrings: &[PathBuf],
            require_signature: bool,
        ) -> Result<SignatureResult> {
            let mut result = SignatureResult {
                fingerprint: Some(FINGERPRINT.to_string()),
                primary_fingerprint: Some(FINGERPRINT.to_string()),
                timestamp: Some(Utc::now() - Duration::hours(1)),
                signature_id: Some(self.signature_id.to_string()),
                content: signed.to_vec(),
                ..Default::default()
            };

            match self.script {
                Script::Good => result.valid = true,
                Script::Revoked => result
                    .invalid_reasons
                    .push("signing key has been revoked".to_string()),
                Script::Md5 => {
                    return Err(UploadError::Protocol(
                        "digest not trusted: signature uses MD5".to_string(),
                    ))
                }
            }

            if require_signature && !result.valid {
                return Err(UploadError::SignatureInvalid(result.invalid_reasons.join("; ")));
            }

            Ok(result)
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: RefCell<Vec<Notification>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notification: &Notification) -> Result<()> {
            self.sent.borrow_mut().push(notification.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingRunner {
        fail: bool,
        runs: RefCell<Vec<String>>,
    }

    impl ByhandRunner for RecordingRunner {
        fn run(
            &self,
            _handler: &crate::config::AutoByhandHandler,
            request: &ByhandRequest<'_>,
        ) -> Result<()> {
            self.runs
                .borrow_mut()
                .push(format!("{} {}", request.package, request.architecture));

            if self.fail {
                Err(UploadError::Handler("exit status 1".to_string()))
            } else {
                Ok(())
            }
        }
    }

    /// Delegates to a database but fails to record accepted uploads.
    struct FailingRecord<'a>(&'a YamlArchiveDatabase);

    impl ArchiveDatabase for FailingRecord<'_> {
        fn identity_for_fingerprint(&self, fingerprint: &str) -> Result<Option<Identity>> {
            self.0.identity_for_fingerprint(fingerprint)
        }

        fn source_versions(&self, source: &str, suite: &str) -> Result<Vec<PackageVersion>> {
            self.0.source_versions(source, suite)
        }

        fn override_for(
            &self,
            package: &str,
            suite: &str,
            kind: OverrideKind,
        ) -> Result<Option<OverrideEntry>> {
            self.0.override_for(package, suite, kind)
        }

        fn allowed_uploaders(&self, source: &str, suite: &str) -> Result<Vec<String>> {
            self.0.allowed_uploaders(source, suite)
        }

        fn latest_binary_source(&self, package: &str, suite: &str) -> Result<Option<String>> {
            self.0.latest_binary_source(package, suite)
        }

        fn pool_file(&self, filename: &str) -> Result<Option<PoolFile>> {
            self.0.pool_file(filename)
        }

        fn record_accepted(&self, _upload: AcceptedUpload) -> Result<()> {
            Err(UploadError::Database("disk full".to_string()))
        }
    }

    struct Archive {
        _dir: TempDir,
        config: ArchiveConfig,
        db: YamlArchiveDatabase,
        notifier: RecordingNotifier,
        runner: RecordingRunner,
        verifier: ScriptedVerifier,
    }

    fn jane(restricted: bool) -> Identity {
        Identity {
            fingerprint: FINGERPRINT.to_string(),
            name: "Jane Doe".to_string(),
            email: "jane@example.org".to_string(),
            may_sponsor: false,
            restricted,
        }
    }

    fn override_entry(package: &str, kind: OverrideKind) -> OverrideEntry {
        OverrideEntry {
            package: package.to_string(),
            suite: "unstable".to_string(),
            kind,
            section: "devel".to_string(),
            priority: "optional".to_string(),
            component: "main".to_string(),
        }
    }

    impl Archive {
        fn new(state: ArchiveState) -> Result<Self> {
            let dir = tempfile::tempdir()?;
            let root = dir.path();

            let mut config = ArchiveConfig::from_yaml_str(EXAMPLE_CONFIG)?;
            config.paths = PathsConfig {
                incoming: root.join("incoming"),
                disembargo: Some(root.join("disembargo")),
                queues: root.join("queue"),
                pool: root.join("pool"),
                lock_dir: root.join("lock"),
                mail_spool: root.join("mail"),
                templates: None,
                database: root.join("state.yaml"),
            };

            Ok(Self {
                _dir: dir,
                config,
                db: YamlArchiveDatabase::in_memory(state),
                notifier: RecordingNotifier::default(),
                runner: RecordingRunner::default(),
                verifier: ScriptedVerifier {
                    script: Script::Good,
                    signature_id: "sig-1",
                },
            })
        }

        /// An archive knowing Jane and overrides for `packages`.
        fn with_overrides(debs: &[&str], dscs: &[&str]) -> Result<Self> {
            let mut overrides = debs
                .iter()
                .map(|p| override_entry(p, OverrideKind::Deb))
                .collect::<Vec<_>>();
            overrides.extend(dscs.iter().map(|p| override_entry(p, OverrideKind::Dsc)));

            Self::new(ArchiveState {
                identities: vec![jane(false)],
                overrides,
                ..Default::default()
            })
        }

        fn pipeline(&self) -> AdmissionPipeline<'_> {
            AdmissionPipeline::new(
                &self.config,
                Collaborators {
                    verifier: &self.verifier,
                    database: &self.db,
                    history: &self.db,
                    notifier: &self.notifier,
                    byhand: &self.runner,
                },
            )
        }

        /// Write an upload into the incoming directory, aged past the grace window.
        fn upload(&self, upload: &UploadFixture) -> Result<PathBuf> {
            let incoming = &self.config.paths.incoming;
            let path = upload.write_to(incoming)?;
            age_files(incoming)?;

            Ok(path)
        }

        fn process(&self, path: &Path) -> ProcessingReport {
            let mut reports = self.pipeline().process_all(&[path.to_path_buf()]);
            reports.remove(0)
        }

        fn queue_dir(&self, name: &str) -> PathBuf {
            self.config.paths.queues.join(name)
        }
    }

    fn age_files(dir: &Path) -> Result<()> {
        let old = FileTime::from_unix_time(Utc::now().timestamp() - 3600, 0);
        for entry in std::fs::read_dir(dir)? {
            filetime::set_file_mtime(entry?.path(), old)?;
        }

        Ok(())
    }

    fn hello() -> Result<UploadFixture> {
        let mut upload = UploadFixture::new("hello", "1.0-1");
        upload.add_quilt_source(true, &[])?;
        upload.add_binary("hello", "amd64")?;

        Ok(upload)
    }

    fn messages(report: &ProcessingReport) -> String {
        report.diagnostics.to_string()
    }

    #[test]
    fn accepted_into_pool() -> Result<()> {
        let archive = Archive::with_overrides(&["hello"], &["hello"])?;
        let path = archive.upload(&hello()?)?;

        let report = archive.process(&path);
        assert_eq!(report.outcome, Outcome::Completed(Decision::Accept), "{}", messages(&report));
        assert_eq!(report.passes, 1);

        let pool = &archive.config.paths.pool;
        assert!(pool.join("main/h/hello/hello_1.0-1_amd64.deb").is_file());
        assert!(pool.join("main/h/hello/hello_1.0-1.dsc").is_file());
        assert!(pool.join("main/h/hello/hello_1.0.orig.tar.gz").is_file());
        assert!(archive
            .queue_dir("done")
            .join("hello_1.0-1_amd64.changes")
            .is_file());
        assert_eq!(std::fs::read_dir(&archive.config.paths.incoming)?.count(), 0);

        let state = archive.db.snapshot()?;
        assert_eq!(state.uploads.len(), 1);
        assert_eq!(state.uploads[0].suites, vec!["unstable".to_string()]);
        assert_eq!(state.uploads[0].fingerprint, FINGERPRINT);
        assert_eq!(state.sources[0].version, "1.0-1");
        assert_eq!(state.binaries[0].package, "hello");
        assert_eq!(state.pool.len(), 4);
        assert_eq!(state.signatures.len(), 1);

        {
            let sent = archive.notifier.sent.borrow();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].kind, NotificationKind::Accepted);
        }

        // The same signed upload submitted again is a replay.
        let path = archive.upload(&hello()?)?;
        let report = archive.process(&path);
        assert_eq!(report.outcome, Outcome::Completed(Decision::Reject));
        assert!(messages(&report).contains("signature already seen"));

        Ok(())
    }

    #[test]
    fn failed_record_rolls_back_accept() -> Result<()> {
        let archive = Archive::with_overrides(&["hello"], &["hello"])?;
        let upload = hello()?;
        let path = archive.upload(&upload)?;

        let db = FailingRecord(&archive.db);
        let pipeline = AdmissionPipeline::new(
            &archive.config,
            Collaborators {
                verifier: &archive.verifier,
                database: &db,
                history: &archive.db,
                notifier: &archive.notifier,
                byhand: &archive.runner,
            },
        );
        let report = pipeline.process_all(&[path.clone()]).remove(0);
        assert!(
            matches!(&report.outcome, Outcome::Failed(msg) if msg.contains("disk full")),
            "{:?}",
            report.outcome
        );

        let pool = &archive.config.paths.pool;
        assert!(!pool.join("main/h/hello/hello_1.0-1_amd64.deb").exists());
        assert!(!pool.join("main/h/hello/hello_1.0-1.dsc").exists());
        assert!(!archive
            .queue_dir("done")
            .join("hello_1.0-1_amd64.changes")
            .exists());

        assert!(path.is_file());
        for file in &upload.files {
            let original = archive.config.paths.incoming.join(&file.name);
            assert_eq!(std::fs::read(&original)?, file.data, "{}", file.name);
        }

        assert!(archive.notifier.sent.borrow().is_empty());
        assert!(archive.db.snapshot()?.uploads.is_empty());

        // Nothing was lost, so a later run accepts it.
        let report = archive.process(&path);
        assert_eq!(report.outcome, Outcome::Completed(Decision::Accept), "{}", messages(&report));
        assert!(pool.join("main/h/hello/hello_1.0-1_amd64.deb").is_file());

        Ok(())
    }

    #[test]
    fn pool_collision_rejected() -> Result<()> {
        let archive = Archive::new(ArchiveState {
            identities: vec![jane(false)],
            overrides: vec![
                override_entry("hello", OverrideKind::Deb),
                override_entry("hello", OverrideKind::Dsc),
            ],
            pool: vec![crate::testutil::pool_file("hello_1.0-1_amd64.deb", b"some other deb")?],
            ..Default::default()
        })?;
        let path = archive.upload(&hello()?)?;

        let report = archive.process(&path);
        assert_eq!(report.outcome, Outcome::Completed(Decision::Reject));
        assert!(report.diagnostics.has_reject_of_kind(DiagnosticKind::Integrity));
        assert!(messages(&report).contains("copy in the pool"));

        assert!(!archive.config.paths.pool.exists());
        let state = archive.db.snapshot()?;
        assert!(state.uploads.is_empty());
        assert!(state.binaries.is_empty());

        Ok(())
    }

    #[test]
    fn path_in_file_list_rejected() -> Result<()> {
        let mut archive = Archive::with_overrides(&["hello"], &["hello"])?;
        archive.verifier.script = Script::Revoked;

        // Writing the upload puts this file beside the incoming directory.
        let mut upload = hello()?;
        upload.add_file("../precious.txt", b"precious".to_vec(), "devel");
        let path = archive.upload(&upload)?;
        let outside = archive.config.paths.incoming.join("../precious.txt");
        assert!(outside.is_file());

        let report = archive.process(&path);
        assert_eq!(report.outcome, Outcome::Completed(Decision::Reject));
        assert!(messages(&report).contains("invalid filename"), "{}", messages(&report));

        assert_eq!(std::fs::read_to_string(&outside)?, "precious");
        assert!(!archive.config.paths.queues.join("precious.txt").exists());
        assert!(archive
            .config
            .paths
            .reject_dir()
            .join("hello_1.0-1_amd64.changes")
            .is_file());

        Ok(())
    }

    #[test]
    fn missing_override_goes_to_new() -> Result<()> {
        let archive = Archive::with_overrides(&[], &["hello"])?;
        let path = archive.upload(&hello()?)?;

        let report = archive.process(&path);
        assert_eq!(report.outcome, Outcome::Completed(Decision::Queue(QueueKind::New)));

        assert!(archive
            .queue_dir("new")
            .join("hello_1.0-1_amd64.deb")
            .is_file());
        assert!(!archive.config.paths.pool.exists());
        assert!(archive.db.snapshot()?.uploads.is_empty());

        let sent = archive.notifier.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::New);

        Ok(())
    }

    #[test]
    fn revoked_key_rejected() -> Result<()> {
        let mut archive = Archive::with_overrides(&["hello"], &["hello"])?;
        archive.verifier.script = Script::Revoked;
        let path = archive.upload(&hello()?)?;

        let report = archive.process(&path);
        assert_eq!(report.outcome, Outcome::Completed(Decision::Reject));
        assert!(messages(&report).contains("revoked"));

        let reject = archive.queue_dir("reject");
        assert!(reject.join("hello_1.0-1_amd64.deb").is_file());
        assert!(reject.join("hello_1.0-1_amd64.changes").is_file());
        let reason = std::fs::read_to_string(reject.join("hello_1.0-1_amd64.changes.reason"))?;
        assert!(reason.contains("revoked"));

        assert!(!archive.config.paths.pool.exists());
        assert_eq!(std::fs::read_dir(&archive.config.paths.incoming)?.count(), 0);
        assert!(archive.db.snapshot()?.signatures.is_empty());

        Ok(())
    }

    #[test]
    fn untrusted_digest_rejected() -> Result<()> {
        let mut archive = Archive::with_overrides(&["hello"], &["hello"])?;
        archive.verifier.script = Script::Md5;
        let path = archive.upload(&hello()?)?;

        let report = archive.process(&path);
        assert_eq!(report.outcome, Outcome::Completed(Decision::Reject));
        assert!(report.diagnostics.has_reject_of_kind(DiagnosticKind::Protocol));

        Ok(())
    }

    #[test]
    fn unauthorized_nmu_rejected() -> Result<()> {
        let mut archive = Archive::with_overrides(&["hello"], &["hello"])?;
        archive.db = YamlArchiveDatabase::in_memory(ArchiveState {
            identities: vec![jane(true)],
            ..archive.db.snapshot()?
        });

        let mut upload = hello()?;
        upload.maintainer = "John Roe <john@example.org>".to_string();
        let path = archive.upload(&upload)?;

        let report = archive.process(&path);
        assert_eq!(report.outcome, Outcome::Completed(Decision::Reject));
        assert!(report
            .diagnostics
            .rejects()
            .any(|d| d.kind == DiagnosticKind::AuthorizationDenied
                && d.message.contains("source package hello")));

        Ok(())
    }

    #[test]
    fn multiple_upstream_tarballs_rejected() -> Result<()> {
        let archive = Archive::with_overrides(&["hello"], &["hello"])?;

        let mut upload = UploadFixture::new("hello", "1.0-1");
        upload.add_quilt_source(
            true,
            &[FixtureFile {
                name: "hello_1.0.orig.tar.xz".to_string(),
                data: b"another upstream".to_vec(),
                section: "devel".to_string(),
                priority: "optional".to_string(),
            }],
        )?;
        let path = archive.upload(&upload)?;

        let report = archive.process(&path);
        assert_eq!(report.outcome, Outcome::Completed(Decision::Reject));
        assert!(messages(&report).contains("multiple"));

        Ok(())
    }

    #[test]
    fn upstream_tarball_from_other_upload() -> Result<()> {
        let archive = Archive::with_overrides(&["hello"], &["hello"])?;

        // Another upload waiting in the queue brought the upstream tarball.
        let first = hello()?;
        let orig = first.orig();
        std::fs::create_dir_all(&archive.config.paths.incoming)?;
        std::fs::write(archive.config.paths.incoming.join(&orig.name), &orig.data)?;

        let mut upload = UploadFixture::new("hello", "1.0-2");
        upload.add_quilt_source(false, &[])?;
        let path = archive.upload(&upload)?;

        let report = archive.process(&path);
        assert_eq!(report.outcome, Outcome::Completed(Decision::Accept), "{}", messages(&report));
        assert_eq!(report.passes, 2);

        assert!(archive
            .config
            .paths
            .pool
            .join("main/h/hello/hello_1.0.orig.tar.gz")
            .is_file());
        // The tarball still belongs to the other upload.
        assert!(archive.config.paths.incoming.join(&orig.name).is_file());

        Ok(())
    }

    #[test]
    fn reprocessing_is_bounded() -> Result<()> {
        let archive = Archive::with_overrides(&["hello"], &["hello"])?;

        let orig = hello()?.orig();
        std::fs::create_dir_all(&archive.config.paths.incoming)?;
        std::fs::write(archive.config.paths.incoming.join(&orig.name), &orig.data)?;

        let component = FixtureFile {
            name: "hello_1.0.orig-docs.tar.gz".to_string(),
            data: b"documentation".to_vec(),
            section: "devel".to_string(),
            priority: "optional".to_string(),
        };
        let mut upload = UploadFixture::new("hello", "1.0-2");
        upload.add_quilt_source(false, &[component.clone()])?;
        upload.files.retain(|f| f.name != component.name);
        let path = archive.upload(&upload)?;

        let report = archive.process(&path);
        assert_eq!(report.outcome, Outcome::Completed(Decision::Reject));
        assert_eq!(report.passes, MAX_PASSES);
        assert!(messages(&report).contains("hello_1.0.orig-docs.tar.gz"));

        Ok(())
    }

    #[test]
    fn empty_targets_rejected() -> Result<()> {
        let archive = Archive::with_overrides(&["hello"], &["hello"])?;

        let mut upload = hello()?;
        upload.distribution = "testing".to_string();
        let path = archive.upload(&upload)?;

        let report = archive.process(&path);
        assert_eq!(report.outcome, Outcome::Completed(Decision::Reject));
        assert!(report.diagnostics.has_reject_of_kind(DiagnosticKind::Policy));

        Ok(())
    }

    #[test]
    fn older_version_rejected() -> Result<()> {
        let archive = Archive::new(ArchiveState {
            identities: vec![jane(false)],
            overrides: vec![
                override_entry("hello", OverrideKind::Deb),
                override_entry("hello", OverrideKind::Dsc),
            ],
            sources: vec![crate::database::SourceRecord {
                source: "hello".to_string(),
                version: "1.0-1".to_string(),
                suite: "unstable".to_string(),
                uploaders: vec![],
            }],
            ..Default::default()
        })?;
        let path = archive.upload(&hello()?)?;

        let report = archive.process(&path);
        assert_eq!(report.outcome, Outcome::Completed(Decision::Reject));
        assert!(messages(&report).contains("is not newer than 1.0-1 in unstable"));

        Ok(())
    }

    #[test]
    fn autobyhand() -> Result<()> {
        let upload = || -> Result<UploadFixture> {
            let mut upload = UploadFixture::new("debian-installer", "20220101");
            upload.add_binary("debian-installer", "amd64")?;
            upload.add_file(
                "debian-installer-images_20220101_amd64.tar.gz",
                b"images".to_vec(),
                "raw-installer",
            );
            Ok(upload)
        };

        let archive = Archive::with_overrides(&["debian-installer"], &[])?;
        let path = archive.upload(&upload()?)?;
        let report = archive.process(&path);
        assert_eq!(report.outcome, Outcome::Completed(Decision::Accept), "{}", messages(&report));
        assert_eq!(
            archive.runner.runs.borrow().as_slice(),
            &["debian-installer-images amd64".to_string()]
        );
        assert!(archive
            .queue_dir("done")
            .join("debian-installer-images_20220101_amd64.tar.gz")
            .is_file());

        let mut archive = Archive::with_overrides(&["debian-installer"], &[])?;
        archive.runner.fail = true;
        let path = archive.upload(&upload()?)?;
        let report = archive.process(&path);
        assert_eq!(
            report.outcome,
            Outcome::Completed(Decision::Queue(QueueKind::Byhand))
        );
        assert!(archive
            .queue_dir("byhand")
            .join("debian-installer-images_20220101_amd64.tar.gz")
            .is_file());
        assert!(archive.db.snapshot()?.uploads.is_empty());

        Ok(())
    }

    #[test]
    fn fresh_uploads_skipped() -> Result<()> {
        let archive = Archive::with_overrides(&["hello"], &["hello"])?;
        let path = hello()?.write_to(&archive.config.paths.incoming)?;

        let report = archive.process(&path);
        assert!(matches!(report.outcome, Outcome::Skipped(_)));
        assert!(path.is_file());
        assert!(!archive.config.paths.reject_dir().exists());

        Ok(())
    }

    #[test]
    fn dry_run_and_cancellation_change_nothing() -> Result<()> {
        let archive = Archive::with_overrides(&["hello"], &["hello"])?;
        let path = archive.upload(&hello()?)?;

        let pipeline = archive.pipeline().with_options(PipelineOptions {
            dry_run: true,
            no_mail: false,
        });
        let reports = pipeline.process_all(&[path.clone()]);
        assert_eq!(reports[0].outcome, Outcome::DryRun(Decision::Accept));

        let pipeline = archive.pipeline();
        pipeline.cancellation().store(true, Ordering::SeqCst);
        let reports = pipeline.process_all(&[path.clone(), path.clone()]);
        assert!(reports.iter().all(|r| r.outcome == Outcome::Cancelled));

        assert!(path.is_file());
        assert!(!archive.config.paths.pool.exists());
        assert!(archive.notifier.sent.borrow().is_empty());
        let state = archive.db.snapshot()?;
        assert!(state.uploads.is_empty());
        assert!(state.signatures.is_empty());

        Ok(())
    }

    #[test]
    fn operator_choices() -> Result<()> {
        let archive = Archive::with_overrides(&["hello"], &["hello"])?;
        let path = archive.upload(&hello()?)?;

        let pipeline = archive.pipeline();
        let reports = pipeline.process_all_with(&[path.clone()], |_| Action::Skip);
        assert!(matches!(reports[0].outcome, Outcome::Skipped(_)));
        assert!(path.is_file());

        let reports = pipeline.process_all_with(&[path.clone()], |e| {
            assert_eq!(e.decision, Decision::Accept);
            Action::Reject
        });
        assert_eq!(reports[0].outcome, Outcome::Completed(Decision::Reject));
        assert!(archive
            .config
            .paths
            .reject_dir()
            .join("hello_1.0-1_amd64.changes")
            .is_file());

        Ok(())
    }

    #[test]
    fn pool_layout() {
        assert_eq!(pool_path("main", "hello", "hello_1.0.dsc"), "main/h/hello/hello_1.0.dsc");
        assert_eq!(
            pool_path("contrib", "libfoo", "libfoo_1.0.dsc"),
            "contrib/libf/libfoo/libfoo_1.0.dsc"
        );
        assert_eq!(pool_path("main", "lib", "lib_1.0.dsc"), "main/l/lib/lib_1.0.dsc");
    }
}
