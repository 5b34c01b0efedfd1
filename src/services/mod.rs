//! Service layer module root.
//! Stateless services: codecs, digest chaining and trust validation.

pub mod cert_validator;
pub mod container_codec;
pub mod container_verifier;
pub mod digest_chain;
pub mod hash_chain;
pub mod ocsp_verifier;
pub mod signature_verifier;
pub mod timestamp_verifier;

pub use cert_validator::{CertificateValidator, ValidatedSigner};
pub use container_codec::{encode_archive, seal_archive, ArchiveReader, ContainerCodec};
pub use container_verifier::{verify_container, verify_container_with_cancel};
pub use digest_chain::{chain_digest, ChainDigester};
pub use hash_chain::HashChainVerifier;
pub use ocsp_verifier::OcspVerifier;
pub use signature_verifier::SignatureVerifier;
pub use timestamp_verifier::{TimestampVerifier, TstInfo};
