//! Archive Verifier Library
//!
//! Verifies sealed message archives: the zip container format holding
//! signed ASiC-E message containers, the chained digests linking each archive
//! to its predecessor, and the PKI material (signature, certificate chain,
//! OCSP response, trusted timestamp) of every contained message.

pub mod domain;
pub mod infra;
pub mod pipelines;
pub mod services;

// Backward-compatible re-exports of the infra layer
pub use infra::{cancel, config, error};

pub use domain::chain::PrevDigest;
pub use domain::container::{ContainerContents, ContainerEntry};
pub use domain::linking::LinkingDescriptor;
pub use domain::trust::TrustContext;
pub use domain::verdict::{ArchiveVerdict, ContainerVerdict};
pub use infra::cancel::CancelToken;
pub use infra::error::{ErrorCategory, VerifyError, VerifyResult};
pub use pipelines::verify::{ArchiveVerifier, VerifierOptions};
pub use services::digest_chain::{chain_digest, ChainDigester};

use std::str::FromStr;

use der::oid::ObjectIdentifier;

/// Supported hash algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum HashAlgorithm {
    #[serde(rename = "SHA-256")]
    Sha256,
    #[serde(rename = "SHA-384")]
    Sha384,
    #[serde(rename = "SHA-512")]
    Sha512,
}

const SHA256_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");
const SHA384_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.2");
const SHA512_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.3");

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 3] = [
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha384,
        HashAlgorithm::Sha512,
    ];

    /// Algorithm identifier as written in linking info, e.g. `SHA-256`.
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha384 => "SHA-384",
            HashAlgorithm::Sha512 => "SHA-512",
        }
    }

    pub fn digest_size(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    /// Strict lookup by linking info identifier.
    pub fn from_id(id: &str) -> VerifyResult<Self> {
        match id {
            "SHA-256" => Ok(HashAlgorithm::Sha256),
            "SHA-384" => Ok(HashAlgorithm::Sha384),
            "SHA-512" => Ok(HashAlgorithm::Sha512),
            other => Err(VerifyError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    /// XML digest method URI.
    pub fn uri(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "http://www.w3.org/2001/04/xmlenc#sha256",
            HashAlgorithm::Sha384 => "http://www.w3.org/2001/04/xmldsig-more#sha384",
            HashAlgorithm::Sha512 => "http://www.w3.org/2001/04/xmlenc#sha512",
        }
    }

    pub fn from_uri(uri: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
        .find(|algo| algo.uri() == uri)
    }

    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            HashAlgorithm::Sha256 => SHA256_OID,
            HashAlgorithm::Sha384 => SHA384_OID,
            HashAlgorithm::Sha512 => SHA512_OID,
        }
    }

    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        Self::ALL
            .into_iter()
        .find(|algo| algo.oid() == *oid)
    }

    pub fn message_digest(&self) -> openssl::hash::MessageDigest {
        match self {
            HashAlgorithm::Sha256 => openssl::hash::MessageDigest::sha256(),
            HashAlgorithm::Sha384 => openssl::hash::MessageDigest::sha384(),
            HashAlgorithm::Sha512 => openssl::hash::MessageDigest::sha512(),
        }
    }

    /// One-shot digest of `data`.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        let mut digester = domain::crypto::Digester::new(*self);
        digester.update(data);
        digester.finalize().into_vec()
    }
}

impl FromStr for HashAlgorithm {
    type Err = VerifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha384" => Ok(HashAlgorithm::Sha384),
            "sha512" => Ok(HashAlgorithm::Sha512),
            _ => Err(VerifyError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_algorithm_ids() {
        assert_eq!(HashAlgorithm::from_id("SHA-256").unwrap(), HashAlgorithm::Sha256);
        assert_eq!(HashAlgorithm::from_id("SHA-512").unwrap(), HashAlgorithm::Sha512);
        assert!(matches!(
            HashAlgorithm::from_id("SHA-1"),
            Err(VerifyError::UnsupportedAlgorithm(id)) if id == "SHA-1"
        ));
        // linking info ids are case sensitive
        assert!(HashAlgorithm::from_id("sha-256").is_err());
    }

    #[test]
    fn test_hash_algorithm_from_str_is_lenient() {
        assert_eq!("sha384".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha384);
        assert_eq!("SHA-384".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha384);
        assert!("md5".parse::<HashAlgorithm>().is_err());
    }

    #[test]
    fn test_uri_and_oid_lookup() {
        for algo in [
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
        ] {
            assert_eq!(HashAlgorithm::from_uri(algo.uri()), Some(algo));
            assert_eq!(HashAlgorithm::from_oid(&algo.oid()), Some(algo));
            assert_eq!(algo.digest(b"abc").len(), algo.digest_size());
        }
        assert_eq!(HashAlgorithm::from_uri("http://www.w3.org/2000/09/xmldsig#sha1"), None);
    }
}
