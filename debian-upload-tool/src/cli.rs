// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    clap::{Arg, ArgMatches, Command},
    debian_upload_queue::{
        byhand::AutoByhandRunner,
        config::{ArchiveConfig, PathsConfig, EXAMPLE_CONFIG},
        database::YamlArchiveDatabase,
        error::UploadError,
        lock::RunLock,
        notify::MailSpoolNotifier,
        pipeline::{
            Action, AdmissionPipeline, Collaborators, Evaluation, Outcome, PipelineOptions,
            ProcessingReport,
        },
        signature::GpgVerifier,
    },
    log::{warn, LevelFilter},
    std::{
        path::{Path, PathBuf},
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Duration,
    },
    thiserror::Error,
};

const PROCESS_UPLOAD_ABOUT: &str = "\
Process uploads in the incoming queue.

Each upload is a signed .changes manifest plus the files it lists. Every
upload is checked and then accepted into the pool, moved to a holding queue
(new, byhand, embargoed, proposed-updates, ...) or rejected.

Manifests are given as arguments. Without arguments every .changes file in the
incoming and disembargo directories is processed, in name order.

By default the proposed decision of every upload is shown and you are asked
whether to apply it, reject the upload instead or skip it. With --automatic
every decision is applied without asking.

Uploads whose files were modified within the configured grace period are
skipped; they are probably still being written.

Only one run may be active at a time. A run does not start while archive
maintenance holds its lock unless --no-lock is given.

The exit code is non-zero only if an upload could not be processed because of
an error in the archive itself. Rejecting an upload is not an error.
";

const CONFIG_EXAMPLE_ABOUT: &str = "\
Print an example archive configuration.

The configuration is a YAML document with these sections:

paths
   Filesystem locations: incoming, disembargo, queues, pool, lock_dir,
   mail_spool, templates and database.

verifier
   The GnuPG compatible signature helper and the keyrings of allowed signers.

suites
   Known suites, their architectures, override suites, policy queues and
   binary upload restrictions.

distribution_mappings
   Ordered rules rewriting the suites uploads target.

checks
   Grace periods and cutoffs of timestamp and signature checks.

embargo, autobyhand, mail
   Embargo handling, automatic byhand handlers and notification settings.

Unknown keys are errors.
";

#[derive(Debug, Error)]
pub enum DutError {
    #[error("argument parsing error: {0:?}")]
    Clap(#[from] clap::Error),

    #[error("{0}")]
    Upload(#[from] UploadError),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0:?}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("invalid sub-command: {0}")]
    InvalidSubCommand(String),

    #[error("{0} upload(s) could not be processed")]
    ProcessingFailed(usize),
}

pub type Result<T> = std::result::Result<T, DutError>;

pub fn run_cli() -> Result<()> {
    let app = Command::new("Debian Upload Queue")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Process uploads into a Debian archive")
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        );

    let app = app.subcommand(
        Command::new("process-upload")
            .about("Process uploads in the incoming queue")
            .long_about(PROCESS_UPLOAD_ABOUT)
            .arg(
                Arg::new("config")
                    .long("config")
                    .short('c')
                    .takes_value(true)
                    .required(true)
                    .allow_invalid_utf8(true)
                    .help("Path to the YAML archive configuration"),
            )
            .arg(
                Arg::new("automatic")
                    .long("automatic")
                    .short('a')
                    .help("Apply every decision without asking"),
            )
            .arg(
                Arg::new("dry-run")
                    .long("dry-run")
                    .short('n')
                    .help("Report decisions without acting on them"),
            )
            .arg(
                Arg::new("no-mail")
                    .long("no-mail")
                    .help("Do not send notifications"),
            )
            .arg(
                Arg::new("no-lock")
                    .long("no-lock")
                    .help("Run even while archive maintenance holds its lock"),
            )
            .arg(
                Arg::new("manifest")
                    .multiple_values(true)
                    .allow_invalid_utf8(true)
                    .help(".changes files to process"),
            ),
    );

    let mut app = app.subcommand(
        Command::new("config-example")
            .about("Print an example archive configuration")
            .long_about(CONFIG_EXAMPLE_ABOUT),
    );

    let matches = app.clone().get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();

    match matches.subcommand() {
        Some(("process-upload", args)) => command_process_upload(args),
        Some(("config-example", _)) => {
            print!("{}", EXAMPLE_CONFIG);
            Ok(())
        }
        Some((command, _)) => Err(DutError::InvalidSubCommand(command.to_string())),
        None => {
            app.print_help()?;
            Ok(())
        }
    }
}

/// Every `.changes` file in the incoming directories, in name order.
fn discover_manifests(paths: &PathsConfig) -> Result<Vec<PathBuf>> {
    let mut manifests = vec![];

    for dir in std::iter::once(&paths.incoming).chain(paths.disembargo.iter()) {
        if !dir.is_dir() {
            warn!("{} does not exist", dir.display());
            continue;
        }

        let mut found = vec![];
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().map(|e| e == "changes").unwrap_or(false) {
                found.push(path);
            }
        }
        found.sort();
        manifests.extend(found);
    }

    Ok(manifests)
}

fn print_evaluation(evaluation: &Evaluation) {
    println!();
    println!("{}", evaluation.path.display());

    if let Some(manifest) = &evaluation.manifest {
        println!("  source: {} {}", manifest.source, manifest.version);
        println!("  maintainer: {}", manifest.maintainer);
        if let Some(changed_by) = &manifest.changed_by {
            println!("  changed by: {}", changed_by);
        }
        println!(
            "  architectures: {}",
            manifest
                .architectures
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(" ")
        );
    }
    if !evaluation.targets.is_empty() {
        println!(
            "  suites: {}",
            evaluation.targets.iter().cloned().collect::<Vec<_>>().join(" ")
        );
    }
    if let Some(signer) = &evaluation.signer {
        println!("  signed by: {}", signer);
    }
    for diagnostic in evaluation.diagnostics.iter() {
        println!("  {}", diagnostic);
    }
    println!("  proposed: {}", evaluation.decision);
}

/// Ask what to do with an upload. Quitting cancels the rest of the run.
fn prompt(evaluation: &Evaluation, cancel: &AtomicBool) -> Action {
    print_evaluation(evaluation);

    let items = [
        format!("apply ({})", evaluation.decision),
        "reject".to_string(),
        "skip".to_string(),
        "quit".to_string(),
    ];

    let choice = dialoguer::Select::new()
        .with_prompt("Action")
        .items(&items)
        .default(0)
        .interact();

    match choice {
        Ok(0) => Action::Apply,
        Ok(1) => Action::Reject,
        Ok(2) => Action::Skip,
        Ok(_) => {
            cancel.store(true, Ordering::SeqCst);
            Action::Skip
        }
        Err(e) => {
            warn!("unable to prompt ({}); skipping", e);
            Action::Skip
        }
    }
}

fn summary_line(report: &ProcessingReport) -> String {
    let name = report
        .path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| report.path.display().to_string());

    let mut line = format!("{}: {}", name, report.outcome);
    let rejects = report.diagnostics.rejects().count();
    if rejects > 0 {
        line.push_str(&format!(" ({} problem(s))", rejects));
    }
    if report.passes > 1 {
        line.push_str(&format!(" after {} passes", report.passes));
    }

    line
}

fn command_process_upload(args: &ArgMatches) -> Result<()> {
    let config_path = args
        .value_of_os("config")
        .expect("config argument is required");
    let config = ArchiveConfig::from_path(Path::new(config_path))?;

    let _lock = RunLock::acquire(&config.paths.lock_dir, args.is_present("no-lock"))?;

    let manifests = match args.values_of_os("manifest") {
        Some(values) => values.map(PathBuf::from).collect::<Vec<_>>(),
        None => discover_manifests(&config.paths)?,
    };

    if manifests.is_empty() {
        println!("nothing to process");
        return Ok(());
    }

    let database = YamlArchiveDatabase::open(&config.paths.database)?;
    let verifier = GpgVerifier::new(
        &config.verifier.helper,
        Duration::from_secs(config.verifier.timeout_seconds),
    )
    .leading_args(config.verifier.helper_args.clone());
    let notifier = MailSpoolNotifier::new(
        &config.paths.mail_spool,
        config.paths.templates.clone(),
        config.mail.clone(),
    );

    let cancel = Arc::new(AtomicBool::new(false));

    let pipeline = AdmissionPipeline::new(
        &config,
        Collaborators {
            verifier: &verifier,
            database: &database,
            history: &database,
            notifier: &notifier,
            byhand: &AutoByhandRunner,
        },
    )
    .with_options(PipelineOptions {
        dry_run: args.is_present("dry-run"),
        no_mail: args.is_present("no-mail"),
    })
    .with_cancellation(cancel.clone());

    let reports = if args.is_present("automatic") {
        pipeline.process_all(&manifests)
    } else {
        pipeline.process_all_with(&manifests, |evaluation| prompt(evaluation, &cancel))
    };

    println!();
    for report in &reports {
        println!("{}", summary_line(report));
    }

    let failed = reports
        .iter()
        .filter(|r| matches!(r.outcome, Outcome::Failed(_)))
        .count();

    if failed > 0 {
        Err(DutError::ProcessingFailed(failed))
    } else {
        Ok(())
    }
}
