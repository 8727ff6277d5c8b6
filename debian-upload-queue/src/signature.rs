// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Signature verification through an external helper.

The helper is a GnuPG compatible program. It is run once per verification with
the signed payload on stdin and its machine readable status lines on stdout.
Human readable diagnostics arrive on stderr and the recovered plaintext is
written to a file in a private temporary directory.

The child runs as a [duct] expression: stdin is fed and stdout and stderr are
captured on dedicated threads, so a full pipe buffer on one side can never
block progress on another. The child is bounded by a timeout and is killed and
reaped when it expires.

Status lines have the form `[GNUPG:] KEYWORD ARG...`. Any other marker is a
protocol error: a helper whose output cannot be understood is not trusted.
*/

use {
    crate::error::{Result, UploadError},
    chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc},
    duct::cmd,
    log::{debug, error, warn},
    std::{
        ffi::OsString,
        path::{Path, PathBuf},
        time::{Duration, Instant},
    },
};

const STATUS_MARKER: &str = "[GNUPG:]";

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Digest algorithm of a signature, by OpenPGP algorithm id.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Ripemd160,
    Sha256,
    Sha384,
    Sha512,
    Sha224,
}

impl DigestAlgorithm {
    /// Resolve an OpenPGP hash algorithm id.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Md5),
            2 => Some(Self::Sha1),
            3 => Some(Self::Ripemd160),
            8 => Some(Self::Sha256),
            9 => Some(Self::Sha384),
            10 => Some(Self::Sha512),
            11 => Some(Self::Sha224),
            _ => None,
        }
    }

    /// Whether signatures over this digest are accepted but flagged.
    pub fn is_weak(&self) -> bool {
        matches!(self, Self::Sha1 | Self::Ripemd160)
    }
}

/// The outcome of verifying a signed payload.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SignatureResult {
    /// Whether a good signature was found and nothing invalidated it.
    pub valid: bool,
    /// Fingerprint of the signing (sub)key.
    pub fingerprint: Option<String>,
    /// Fingerprint of the primary key.
    pub primary_fingerprint: Option<String>,
    /// The signature used a digest that is accepted but considered weak.
    pub weak_algorithm: bool,
    pub timestamp: Option<DateTime<Utc>>,
    /// Opaque identifier of the signature, for replay detection.
    pub signature_id: Option<String>,
    /// Why the signature is not valid. Empty when valid.
    pub invalid_reasons: Vec<String>,
    /// The verified plaintext.
    pub content: Vec<u8>,
}

impl SignatureResult {
    /// The fingerprint identifying the signer.
    ///
    /// This is the primary key fingerprint when the helper reported one.
    pub fn signer(&self) -> Option<&str> {
        self.primary_fingerprint
            .as_deref()
            .or(self.fingerprint.as_deref())
    }
}

/// Something that verifies signed payloads.
pub trait SignatureVerifier {
    /// Verify `signed` against the keys in `keyrings`.
    ///
    /// Fails with [UploadError::Protocol] when the helper's output cannot be trusted
    /// and with [UploadError::SignatureInvalid] when `require_signature` is set and
    /// no valid signature was found.
    fn verify(
        &self,
        signed: &[u8],
        keyrings: &[PathBuf],
        require_signature: bool,
    ) -> Result<SignatureResult>;
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(seconds) = value.parse::<i64>() {
        return Utc
            .timestamp_opt(seconds, 0)
            .single()
            .ok_or_else(|| UploadError::Protocol(format!("timestamp out of range: {}", value)));
    }

    if let Ok(t) = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S") {
        return Ok(Utc.from_utc_datetime(&t));
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| Utc.from_utc_datetime(&t))
        .ok_or_else(|| UploadError::Protocol(format!("unparsable timestamp: {}", value)))
}

fn handle_validsig(result: &mut SignatureResult, args: &[&str]) -> Result<()> {
    if args.len() < 8 {
        return Err(UploadError::Protocol(format!(
            "VALIDSIG with {} arguments",
            args.len()
        )));
    }

    let code = args[7]
        .parse::<u8>()
        .map_err(|_| UploadError::Protocol(format!("bad digest algorithm: {}", args[7])))?;

    match DigestAlgorithm::from_code(code) {
        Some(DigestAlgorithm::Md5) => {
            return Err(UploadError::Protocol(
                "digest not trusted: signature uses MD5".to_string(),
            ));
        }
        Some(algorithm) => {
            result.weak_algorithm |= algorithm.is_weak();
        }
        None => {
            return Err(UploadError::Protocol(format!(
                "unknown digest algorithm {}",
                code
            )));
        }
    }

    result.fingerprint = Some(args[0].to_string());
    result.timestamp = Some(parse_timestamp(args[2])?);
    result.primary_fingerprint = Some(args.get(9).unwrap_or(&args[0]).to_string());

    Ok(())
}

/// Interpret the status channel output of a verification.
///
/// The returned result carries no content.
pub fn parse_status_output(status: &str) -> Result<SignatureResult> {
    let mut result = SignatureResult::default();
    let mut seen_validsig = false;
    let mut seen_any = false;

    for line in status.lines().filter(|l| !l.trim().is_empty()) {
        seen_any = true;

        let mut words = line.split_ascii_whitespace();
        if words.next() != Some(STATUS_MARKER) {
            return Err(UploadError::Protocol(format!(
                "unrecognized status line: {}",
                line
            )));
        }

        let keyword = words
            .next()
            .ok_or_else(|| UploadError::Protocol(format!("status line lacks keyword: {}", line)))?;
        let args = words.collect::<Vec<_>>();

        match keyword {
            "VALIDSIG" => {
                handle_validsig(&mut result, &args)?;
                seen_validsig = true;
            }
            "SIG_ID" => {
                result.signature_id = args.first().map(|s| s.to_string());
            }
            "BADSIG" => result.invalid_reasons.push("bad signature".to_string()),
            "ERRSIG" => result
                .invalid_reasons
                .push("signature could not be checked".to_string()),
            "NO_PUBKEY" => result
                .invalid_reasons
                .push(format!("public key not found: {}", args.join(" "))),
            "KEYREVOKED" => result
                .invalid_reasons
                .push("signing key has been revoked".to_string()),
            "REVKEYSIG" => result
                .invalid_reasons
                .push("signature made by a revoked key".to_string()),
            "EXPSIG" => result
                .invalid_reasons
                .push("signature has expired".to_string()),
            "EXPKEYSIG" => result
                .invalid_reasons
                .push("signature made by an expired key".to_string()),
            "NODATA" | "BADARMOR" | "DECRYPTION_FAILED" => {
                return Err(UploadError::Protocol(format!(
                    "verifier reported {}",
                    line.trim()
                )));
            }
            _ => {}
        }
    }

    if !seen_any {
        return Err(UploadError::Protocol(
            "verifier produced no status output".to_string(),
        ));
    }

    if !seen_validsig && result.invalid_reasons.is_empty() {
        result
            .invalid_reasons
            .push("no valid signature found".to_string());
    }

    result.valid = seen_validsig && result.invalid_reasons.is_empty();

    Ok(result)
}

/// A [SignatureVerifier] running a GnuPG compatible helper program.
#[derive(Clone, Debug)]
pub struct GpgVerifier {
    program: PathBuf,
    leading_args: Vec<String>,
    timeout: Duration,
}

impl GpgVerifier {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            leading_args: vec![],
            timeout,
        }
    }

    /// Arguments passed before the standard ones.
    pub fn leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    fn args(&self, keyrings: &[PathBuf], output: &Path) -> Vec<OsString> {
        let mut args = self
            .leading_args
            .iter()
            .map(OsString::from)
            .collect::<Vec<_>>();
        args.extend(
            [
                "--no-default-keyring",
                "--batch",
                "--status-fd",
                "1",
                "--trust-model",
                "always",
            ]
            .iter()
            .map(OsString::from),
        );

        for keyring in keyrings {
            args.push("--keyring".into());
            args.push(keyring.as_os_str().to_os_string());
        }

        args.push("--output".into());
        args.push(output.as_os_str().to_os_string());
        args.push("--decrypt".into());
        args.push("-".into());

        args
    }

    fn run(&self, signed: &[u8], keyrings: &[PathBuf]) -> Result<(String, Vec<u8>)> {
        let output_dir = tempfile::Builder::new()
            .prefix("verify-")
            .tempdir()
            .map_err(|e| UploadError::VerifierProcess(format!("creating output directory: {}", e)))?;
        let output_path = output_dir.path().join("plaintext");

        let handle = cmd(self.program.as_os_str(), self.args(keyrings, &output_path))
            .stdin_bytes(signed.to_vec())
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .start()
            .map_err(|e| {
                UploadError::VerifierProcess(format!(
                    "spawning {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        let deadline = Instant::now() + self.timeout;

        let output = loop {
            match handle.try_wait() {
                Ok(Some(output)) => break output,
                Ok(None) if Instant::now() >= deadline => {
                    if let Err(e) = handle.kill() {
                        warn!("killing verifier: {}", e);
                    }
                    return Err(UploadError::Protocol(format!(
                        "verifier did not finish within {} seconds",
                        self.timeout.as_secs()
                    )));
                }
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    if let Err(e) = handle.kill() {
                        warn!("killing verifier: {}", e);
                    }
                    return Err(UploadError::VerifierProcess(format!(
                        "waiting for verifier: {}",
                        e
                    )));
                }
            }
        };

        debug!(
            "verifier exited with {}; diagnostics: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );

        let content = match std::fs::read(&output_path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => vec![],
            Err(e) => return Err(e.into()),
        };

        Ok((String::from_utf8_lossy(&output.stdout).to_string(), content))
    }
}

impl SignatureVerifier for GpgVerifier {
    fn verify(
        &self,
        signed: &[u8],
        keyrings: &[PathBuf],
        require_signature: bool,
    ) -> Result<SignatureResult> {
        let (status, content) = self.run(signed, keyrings).map_err(|e| {
            error!("signature verification failed: {}", e);
            e
        })?;

        let mut result = parse_status_output(&status).map_err(|e| {
            error!("{}", e);
            e
        })?;
        result.content = content;

        if require_signature && !result.valid {
            return Err(UploadError::SignatureInvalid(
                result.invalid_reasons.join("; "),
            ));
        }

        Ok(result)
    }
}
