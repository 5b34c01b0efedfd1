//! Foundational cryptographic domain types.
//!
//! Provides strongly-typed wrappers for cryptographic artifacts including:
//! - Streaming digest computation over the supported SHA-2 variants
//! - Digest values with size validation and hex encoding
//! - Signing certificate and chain representations taken from signatures

mod cert;
mod digest_bytes;
mod hash;

pub use cert::{CertChain, SigningCert};
pub use digest_bytes::{DigestBytes, DigestBytesError};
pub use hash::{Digester, HashAlgorithm, MultiDigester};
