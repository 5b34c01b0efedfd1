//! Chain continuation point between consecutive archives.

use std::fmt;
use std::str::FromStr;

use crate::infra::error::VerifyError;
use crate::HashAlgorithm;

/// Previous chain digest an archive continues from.
///
/// `First` is an explicit sentinel for the first archive of a chain; it is
/// written as `-` in linking info and hashes as the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PrevDigest {
    First,
    Digest(String),
}

impl PrevDigest {
    /// Lenient parse of a value recorded in linking info. `-` and the empty
    /// string both mean "first in chain"; digests are normalised to
    /// lowercase. Caller input goes through [`FromStr`] instead.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value == "-" {
            PrevDigest::First
        } else {
            PrevDigest::Digest(value.to_ascii_lowercase())
        }
    }

    /// Seed value for the digest chain.
    #[must_use]
    pub fn as_chain_seed(&self) -> &str {
        match self {
            PrevDigest::First => "",
            PrevDigest::Digest(d) => d,
        }
    }

    #[must_use]
    pub fn is_first(&self) -> bool {
        matches!(self, PrevDigest::First)
    }
}

/// Strict form for caller input: `-` or a hex digest whose length fits one
/// of the supported algorithms.
impl FromStr for PrevDigest {
    type Err = VerifyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value == "-" {
            return Ok(PrevDigest::First);
        }
        let invalid = |reason: &str| {
            VerifyError::Configuration(format!("invalid previous digest '{value}': {reason}"))
        };
        if value.is_empty() {
            return Err(invalid("empty; use '-' for the first archive"));
        }
        if !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid("not hexadecimal"));
        }
        if !HashAlgorithm::ALL
            .iter()
            .any(|algo| algo.digest_size() * 2 == value.len())
        {
            return Err(invalid(&format!(
                "{} hex digits do not match SHA-256, SHA-384 or SHA-512",
                value.len()
            )));
        }
        Ok(PrevDigest::Digest(value.to_ascii_lowercase()))
    }
}

impl fmt::Display for PrevDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrevDigest::First => f.write_str("-"),
            PrevDigest::Digest(d) => f.write_str(d),
        }
    }
}
