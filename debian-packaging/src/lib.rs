// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian packaging primitives for processing archive uploads.

This crate defines pure Rust implementations of the Debian packaging primitives an archive
needs when it admits uploads: the control file syntax shared by `.changes`, `.dsc` and
`DEBIAN/control` files, package version strings, content digests and the `.deb` container
format.

# A Tour of Functionality

A common primitive within Debian packaging is *control files*. These consist of *paragraphs*
of key-value metadata. Low-level control file primitives are defined in the [control] module.
[control::ControlParagraph] defines a paragraph, which consists of [control::ControlField].
[control::ControlFile] provides an interface for a *control file*, which consists of multiple
paragraphs. [control::ControlParagraphReader] implements a streaming reader of control files.
Parse errors carry the line number and text of the offending line.

There are different flavors of *control files* within Debian packaging.
[changes::ChangesFile] represents a `.changes` upload manifest.
[debian_source_control::DebianSourceControlFile] represents a `.dsc` source package
descriptor. [binary_package_control::BinaryPackageControlFile] represents the `control`
file embedded in a `.deb`.

The [package_version] module implements Debian package version string parsing,
serialization, and comparison. [package_version::PackageVersion] is the main type used for this.

A `.deb` file defines a Debian package. Readers and writers of `.deb` files exist in the
[deb] module. [deb::reader::inspect_deb()] walks a `.deb` and reports its member layout,
its `control` paragraph and the modification times of every archived file.
[deb::builder::DebBuilder] creates new `.deb` files.

[io] defines content digest primitives: [io::ContentDigest], [io::MultiDigester] and
helpers to digest files on disk.
*/

pub mod binary_package_control;
pub mod changes;
pub mod control;
pub mod deb;
pub mod debian_source_control;
pub mod error;
pub mod io;
pub mod package_version;
