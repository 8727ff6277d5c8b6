// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Automatic processing of byhand files. */

use {
    crate::{
        config::AutoByhandHandler,
        error::{Result, UploadError},
    },
    duct::cmd,
    log::{info, warn},
    std::{
        io::{BufRead, BufReader},
        path::Path,
    },
};

/// A byhand file to hand to its handler.
#[derive(Clone, Copy, Debug)]
pub struct ByhandRequest<'a> {
    pub file: &'a Path,
    pub package: &'a str,
    pub version: &'a str,
    pub architecture: &'a str,
    pub manifest: &'a Path,
}

/// Runs automatic byhand handlers.
pub trait ByhandRunner {
    /// Process one file. An error means the file still needs manual processing.
    fn run(&self, handler: &AutoByhandHandler, request: &ByhandRequest<'_>) -> Result<()>;
}

/// A [ByhandRunner] executing the configured handler commands.
///
/// The command receives the file path, package, version, architecture and manifest
/// path after its configured arguments. Its output is logged.
#[derive(Clone, Copy, Debug, Default)]
pub struct AutoByhandRunner;

impl ByhandRunner for AutoByhandRunner {
    fn run(&self, handler: &AutoByhandHandler, request: &ByhandRequest<'_>) -> Result<()> {
        let (program, leading) = handler
            .command
            .split_first()
            .ok_or_else(|| UploadError::Config("empty byhand handler command".to_string()))?;

        let mut args = leading.iter().map(|s| s.into()).collect::<Vec<std::ffi::OsString>>();
        args.push(request.file.as_os_str().to_os_string());
        args.push(request.package.into());
        args.push(request.version.into());
        args.push(request.architecture.into());
        args.push(request.manifest.as_os_str().to_os_string());

        info!("running {} for {}", program, request.file.display());

        let command = cmd(program, &args)
            .stderr_to_stdout()
            .unchecked()
            .reader()?;
        {
            let reader = BufReader::new(&command);
            for line in reader.lines() {
                warn!("{}: {}", program, line?);
            }
        }

        let output = command
            .try_wait()?
            .ok_or_else(|| UploadError::Handler(format!("unable to wait on {}", program)))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(UploadError::Handler(format!(
                "{} exited with {} for {}",
                program,
                output.status,
                request.file.display()
            )))
        }
    }
}
