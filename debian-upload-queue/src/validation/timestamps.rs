// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Sanity checks of file times inside binary packages. */

use {
    crate::{
        config::ChecksConfig,
        diagnostic::{DiagnosticKind, Diagnostics},
    },
    chrono::{DateTime, TimeZone, Utc},
    debian_packaging::deb::reader::ArchivedFileTime,
};

/// The window of acceptable file times.
#[derive(Clone, Copy, Debug)]
pub struct TimestampWindow {
    earliest: i64,
    latest: i64,
}

impl TimestampWindow {
    pub fn new(checks: &ChecksConfig, now: DateTime<Utc>) -> Self {
        let earliest = Utc
            .with_ymd_and_hms(checks.past_cutoff_year, 1, 1, 0, 0, 0)
            .single()
            .map(|t| t.timestamp())
            .unwrap_or(0);

        Self {
            earliest,
            latest: now.timestamp() + checks.future_grace_seconds,
        }
    }

    /// Record one reject per direction for the files of a package outside the window.
    pub fn check(&self, filename: &str, times: &[ArchivedFileTime], diagnostics: &mut Diagnostics) {
        let future = times
            .iter()
            .filter(|t| t.mtime as i64 > self.latest)
            .collect::<Vec<_>>();
        let ancient = times
            .iter()
            .filter(|t| (t.mtime as i64) < self.earliest)
            .collect::<Vec<_>>();

        for (offenders, direction) in [(future, "in the future"), (ancient, "too far in the past")] {
            if let Some(first) = offenders.first() {
                diagnostics.reject(
                    DiagnosticKind::Integrity,
                    format!(
                        "{}: {} file(s) timestamped {}, e.g. {} in {} at {}",
                        filename,
                        offenders.len(),
                        direction,
                        first.path,
                        first.member,
                        format_mtime(first.mtime)
                    ),
                );
            }
        }
    }
}

fn format_mtime(mtime: u64) -> String {
    Utc.timestamp_opt(mtime as i64, 0)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| mtime.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(path: &str, mtime: u64) -> ArchivedFileTime {
        ArchivedFileTime {
            member: "data.tar.gz".to_string(),
            path: path.to_string(),
            mtime,
        }
    }

    #[test]
    fn window_bounds() {
        let now = Utc.with_ymd_and_hms(2022, 6, 1, 0, 0, 0).unwrap();
        let window = TimestampWindow::new(&ChecksConfig::default(), now);

        let mut diagnostics = Diagnostics::new();
        window.check(
            "hello_1.0_amd64.deb",
            &[
                time("./usr/bin/hello", now.timestamp() as u64),
                time("./usr/share/doc/hello", (now.timestamp() + 3600) as u64),
            ],
            &mut diagnostics,
        );
        assert!(diagnostics.is_empty());

        window.check(
            "hello_1.0_amd64.deb",
            &[
                time("./a", (now.timestamp() + 2 * 86400) as u64),
                time("./b", (now.timestamp() + 3 * 86400) as u64),
                time("./c", 3600),
            ],
            &mut diagnostics,
        );
        assert_eq!(diagnostics.len(), 2);
        let messages = diagnostics.iter().map(|d| d.message.clone()).collect::<Vec<_>>();
        assert!(messages[0].contains("2 file(s) timestamped in the future"));
        assert!(messages[1].contains("too far in the past"));
    }
}
