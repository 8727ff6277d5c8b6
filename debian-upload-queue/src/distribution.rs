// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Resolution of requested target suites. */

use {
    crate::{
        config::{ArchiveConfig, DistributionRule, SuiteConfig},
        diagnostic::{DiagnosticKind, Diagnostics},
    },
    log::debug,
    std::collections::BTreeSet,
};

/// Target suites after mapping.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MappedDistributions {
    /// Suites the upload goes to.
    pub targets: BTreeSet<String>,
    /// Suites whose versions the upload must also supersede.
    pub propup: BTreeSet<String>,
}

/// Applies [DistributionRule]s to the suites an upload requests.
pub struct DistributionMapper<'a> {
    rules: &'a [DistributionRule],
    suites: &'a [SuiteConfig],
}

impl<'a> DistributionMapper<'a> {
    pub fn new(config: &'a ArchiveConfig) -> Self {
        Self {
            rules: &config.distribution_mappings,
            suites: &config.suites,
        }
    }

    fn suite(&self, name: &str) -> Option<&SuiteConfig> {
        self.suites.iter().find(|s| s.name == name)
    }

    /// Map requested suites to target suites.
    ///
    /// Every rule sees the output of the previous one. Afterwards at least one
    /// target must remain and every target must be a configured suite.
    pub fn map(
        &self,
        requested: &BTreeSet<String>,
        architectures: &BTreeSet<String>,
        diagnostics: &mut Diagnostics,
    ) -> MappedDistributions {
        let mut mapped = MappedDistributions {
            targets: requested.clone(),
            propup: BTreeSet::new(),
        };
        let targets = &mut mapped.targets;

        for rule in self.rules {
            match rule {
                DistributionRule::Map { from, to } => {
                    if targets.remove(from) {
                        diagnostics.warning(
                            DiagnosticKind::Policy,
                            format!("mapping {} to {}", from, to),
                        );
                        targets.insert(to.clone());
                    }
                }
                DistributionRule::SilentMap { from, to } => {
                    if targets.remove(from) {
                        debug!("silently mapping {} to {}", from, to);
                        targets.insert(to.clone());
                    }
                }
                DistributionRule::MapUnreleased { from, to } => {
                    let unreleased = self.suite(from).and_then(|suite| {
                        architectures
                            .iter()
                            .find(|a| !suite.architectures.contains(*a))
                    });

                    if let Some(arch) = unreleased {
                        if targets.remove(from) {
                            diagnostics.warning(
                                DiagnosticKind::Policy,
                                format!(
                                    "mapping {} to {}: architecture {} is not released in {}",
                                    from, to, arch, from
                                ),
                            );
                            targets.insert(to.clone());
                        }
                    }
                }
                DistributionRule::Ignore { suite } => {
                    if targets.remove(suite) {
                        diagnostics.warning(
                            DiagnosticKind::Policy,
                            format!("ignoring target suite {}", suite),
                        );
                    }
                }
                DistributionRule::Reject { suite } => {
                    if targets.contains(suite) {
                        diagnostics.reject(
                            DiagnosticKind::Policy,
                            format!("uploads to {} are not accepted", suite),
                        );
                    }
                }
                DistributionRule::PropupVersion { suite, propup } => {
                    if targets.contains(suite) {
                        mapped.propup.extend(propup.iter().cloned());
                    }
                }
            }
        }

        if mapped.targets.is_empty() {
            diagnostics.reject(
                DiagnosticKind::Policy,
                "no target suites remain after mapping",
            );
        }

        for target in &mapped.targets {
            if self.suite(target).is_none() {
                diagnostics.reject(
                    DiagnosticKind::Policy,
                    format!("unknown target suite {}", target),
                );
            }
        }

        mapped
    }
}
