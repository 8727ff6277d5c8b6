// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! I/O helpers. */

use {
    crate::error::{DebianError, Result},
    digest::Digest,
    std::{
        fmt::Formatter,
        io::Read,
        path::Path,
    },
    strum_macros::{Display, EnumString},
};

/// A content digest flavor used by Debian control files.
#[derive(
    Clone, Copy, Debug, Display, EnumString, Eq, Hash, Ord, PartialEq, PartialOrd,
)]
pub enum ChecksumType {
    /// MD5.
    #[strum(serialize = "md5")]
    Md5,

    /// SHA-1.
    #[strum(serialize = "sha1")]
    Sha1,

    /// SHA-256.
    #[strum(serialize = "sha256")]
    Sha256,
}

impl ChecksumType {
    /// All variants, weakest first.
    pub fn all() -> impl Iterator<Item = ChecksumType> {
        [Self::Md5, Self::Sha1, Self::Sha256].into_iter()
    }

    /// Name of the field in `.changes` and `.dsc` files listing files with this digest.
    ///
    /// MD5 digests live in the `Files` field, which also defines the set of files.
    pub fn file_list_field(&self) -> &'static str {
        match self {
            Self::Md5 => "Files",
            Self::Sha1 => "Checksums-Sha1",
            Self::Sha256 => "Checksums-Sha256",
        }
    }

    /// Length in bytes of a digest of this flavor.
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }
}

/// Represents a content digest.
#[derive(Clone, Eq, Hash, PartialEq, PartialOrd)]
pub enum ContentDigest {
    /// An MD5 digest.
    Md5(Vec<u8>),
    /// A SHA-1 digest.
    Sha1(Vec<u8>),
    /// A SHA-256 digest.
    Sha256(Vec<u8>),
}

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Md5(data) => write!(f, "Md5({})", hex::encode(data)),
            Self::Sha1(data) => write!(f, "Sha1({})", hex::encode(data)),
            Self::Sha256(data) => write!(f, "Sha256({})", hex::encode(data)),
        }
    }
}

impl ContentDigest {
    /// Create a new MD5 instance by parsing a hex digest.
    pub fn md5_hex(digest: &str) -> Result<Self> {
        Self::from_hex_digest(ChecksumType::Md5, digest)
    }

    /// Create a new SHA-1 instance by parsing a hex digest.
    pub fn sha1_hex(digest: &str) -> Result<Self> {
        Self::from_hex_digest(ChecksumType::Sha1, digest)
    }

    /// Create a new SHA-256 instance by parsing a hex digest.
    pub fn sha256_hex(digest: &str) -> Result<Self> {
        Self::from_hex_digest(ChecksumType::Sha256, digest)
    }

    /// Obtain an instance by parsing a hex string as a [ChecksumType].
    ///
    /// The digest must have the length of the checksum flavor.
    pub fn from_hex_digest(checksum: ChecksumType, digest: &str) -> Result<Self> {
        let digest = hex::decode(digest)
            .map_err(|e| DebianError::ContentDigestBadHex(digest.to_string(), e))?;

        if digest.len() != checksum.digest_len() {
            return Err(DebianError::ContentDigestBadHex(
                hex::encode(&digest),
                hex::FromHexError::InvalidStringLength,
            ));
        }

        Ok(match checksum {
            ChecksumType::Md5 => Self::Md5(digest),
            ChecksumType::Sha1 => Self::Sha1(digest),
            ChecksumType::Sha256 => Self::Sha256(digest),
        })
    }

    /// Obtain the digest bytes for this content digest.
    pub fn digest_bytes(&self) -> &[u8] {
        match self {
            Self::Md5(x) => x,
            Self::Sha1(x) => x,
            Self::Sha256(x) => x,
        }
    }

    /// Obtain the hex encoded content digest.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest_bytes())
    }

    /// Obtain the [ChecksumType] for this digest.
    pub fn checksum_type(&self) -> ChecksumType {
        match self {
            Self::Md5(_) => ChecksumType::Md5,
            Self::Sha1(_) => ChecksumType::Sha1,
            Self::Sha256(_) => ChecksumType::Sha256,
        }
    }
}

/// Holds multiple flavors of content digests.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MultiContentDigest {
    pub md5: ContentDigest,
    pub sha1: ContentDigest,
    pub sha256: ContentDigest,
}

impl MultiContentDigest {
    /// Whether this digest matches another one.
    pub fn matches_digest(&self, other: &ContentDigest) -> bool {
        self.digest_from_checksum(other.checksum_type()) == other
    }

    /// Obtain the [ContentDigest] for a given [ChecksumType].
    pub fn digest_from_checksum(&self, checksum: ChecksumType) -> &ContentDigest {
        match checksum {
            ChecksumType::Md5 => &self.md5,
            ChecksumType::Sha1 => &self.sha1,
            ChecksumType::Sha256 => &self.sha256,
        }
    }

    /// Obtain an iterator of [ContentDigest] in this instance.
    pub fn iter_digests(&self) -> impl Iterator<Item = &ContentDigest> + '_ {
        [&self.md5, &self.sha1, &self.sha256].into_iter()
    }
}

/// A content digester that simultaneously computes multiple digest types.
#[derive(Default)]
pub struct MultiDigester {
    md5: md5::Md5,
    sha1: sha1::Sha1,
    sha256: sha2::Sha256,
    size: u64,
}

impl MultiDigester {
    /// Write content into the digesters.
    pub fn update(&mut self, data: &[u8]) {
        self.md5.update(data);
        self.sha1.update(data);
        self.sha256.update(data);
        self.size += data.len() as u64;
    }

    /// Finish digesting content.
    ///
    /// Consumes the instance and returns the number of bytes digested and a
    /// [MultiContentDigest] holding all the digests.
    pub fn finish(self) -> (u64, MultiContentDigest) {
        (
            self.size,
            MultiContentDigest {
                md5: ContentDigest::Md5(self.md5.finalize().to_vec()),
                sha1: ContentDigest::Sha1(self.sha1.finalize().to_vec()),
                sha256: ContentDigest::Sha256(self.sha256.finalize().to_vec()),
            },
        )
    }
}

/// Compute the size and all digests of content from a reader.
pub fn digest_reader(reader: &mut impl Read) -> Result<(u64, MultiContentDigest)> {
    let mut digester = MultiDigester::default();
    let mut buffer = [0; 32768];

    loop {
        let count = reader.read(&mut buffer)?;
        if count == 0 {
            break;
        }

        digester.update(&buffer[0..count]);
    }

    Ok(digester.finish())
}

/// Compute the size and all digests of a file on disk.
pub fn digest_path(path: impl AsRef<Path>) -> Result<(u64, MultiContentDigest)> {
    let mut fh = std::fs::File::open(path.as_ref())?;

    digest_reader(&mut fh)
}

#[cfg(test)]
mod tests {
    use {super::*, std::str::FromStr};

    #[test]
    fn digest_empty_content() -> Result<()> {
        let (size, digests) = digest_reader(&mut std::io::Cursor::new(b""))?;

        assert_eq!(size, 0);
        assert_eq!(digests.md5.digest_hex(), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(
            digests.sha1.digest_hex(),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
        assert_eq!(
            digests.sha256.digest_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert!(digests.matches_digest(&ContentDigest::md5_hex(
            "d41d8cd98f00b204e9800998ecf8427e"
        )?));

        Ok(())
    }

    #[test]
    fn hex_digest_length_enforced() {
        assert!(ContentDigest::md5_hex("abcd").is_err());
        assert!(ContentDigest::sha1_hex("d41d8cd98f00b204e9800998ecf8427e").is_err());
        assert!(ContentDigest::md5_hex("zz1d8cd98f00b204e9800998ecf8427e").is_err());
    }

    #[test]
    fn checksum_type_names() -> Result<()> {
        assert_eq!(ChecksumType::Sha256.file_list_field(), "Checksums-Sha256");
        assert_eq!(ChecksumType::from_str("sha1").unwrap(), ChecksumType::Sha1);
        assert_eq!(ChecksumType::Md5.to_string(), "md5");

        Ok(())
    }
}
