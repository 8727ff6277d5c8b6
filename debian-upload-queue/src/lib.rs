// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Admission of signed uploads into a Debian archive.

An upload is a signed `.changes` manifest plus the source and binary files it
lists. This crate decides what happens to each upload: accepted into the pool,
diverted to a holding queue for review, or rejected.

# A Tour of Functionality

[pipeline::AdmissionPipeline] is the entry point. It sequences the other
components and carries out the terminal action of each upload.

[signature::SignatureVerifier] checks signatures. [signature::GpgVerifier] runs a
GnuPG compatible helper and interprets its status protocol.

[manifest::UploadManifest] is a parsed `.changes` file and
[manifest::SourceControlFile] a parsed `.dsc` file. Both hold
[manifest::FileEntry] records describing the files they reference.

[validation::StructuralValidator] checks staged files against their manifest:
sizes and digests, the layout and control data of `.deb` files, timestamps of
archived files and the file set of source packages.

[distribution::DistributionMapper] rewrites requested suites according to
[config::DistributionRule]s. [authorization::AuthorizationEngine] decides whether
the signer may upload the packages. [routing::route()] picks the
[routing::Decision].

Problems with an upload are recorded as [diagnostic::Diagnostics] rather than
returned as errors, so every problem of an upload is reported at once.
[error::UploadError] is reserved for failures of the archive itself.

Archive state is consumed through [database::ArchiveDatabase] and
[database::SignatureHistory]. [database::YamlArchiveDatabase] implements both on a
YAML file. Notifications go through [notify::Notifier].

[lock::RunLock] serializes runs and keeps archive maintenance out.
[transaction::FilesystemTransaction] makes terminal actions undoable.
*/

pub mod authorization;
pub mod byhand;
pub mod cache;
pub mod config;
pub mod database;
pub mod diagnostic;
pub mod distribution;
pub mod error;
pub mod lock;
pub mod manifest;
pub mod notify;
pub mod pipeline;
pub mod routing;
pub mod signature;
#[cfg(test)]
mod testutil;
pub mod transaction;
pub mod validation;
