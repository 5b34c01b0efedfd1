//! Digest chain calculator.
//!
//! `chain(i) = hex(H(hex(H(bytes_i)) ++ chain(i-1)))`, lowercase hex
//! throughout. Linking each container to its predecessor makes removal,
//! reordering or substitution of any container detectable.

use std::io;

use crate::domain::crypto::Digester;
use crate::infra::error::VerifyResult;
use crate::HashAlgorithm;

/// Computes the next chain link for `bytes` following `prev_hex`.
///
/// `algorithm_id` is a linking info identifier (`SHA-256`, `SHA-384`,
/// `SHA-512`); anything else fails with `UnsupportedAlgorithm`.
pub fn chain_digest(bytes: &[u8], prev_hex: &str, algorithm_id: &str) -> VerifyResult<String> {
    let algo = HashAlgorithm::from_id(algorithm_id)?;
    let mut digester = ChainDigester::new(algo);
    digester.update(bytes);
    Ok(digester.finish(prev_hex))
}

/// Streaming form of [`chain_digest`] for content read incrementally.
#[derive(Clone)]
pub struct ChainDigester {
    inner: Digester,
}

impl ChainDigester {
    #[must_use]
    pub fn new(algo: HashAlgorithm) -> Self {
        Self {
            inner: Digester::new(algo),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Completes the link with the previous chain digest.
    #[must_use]
    pub fn finish(self, prev_hex: &str) -> String {
        let algo = self.inner.algorithm();
        let content_hex = self.inner.finalize().to_hex();
        let mut outer = Digester::new(algo);
        outer.update(content_hex.as_bytes());
        outer.update(prev_hex.to_ascii_lowercase().as_bytes());
        outer.finalize().to_hex()
    }
}

impl io::Write for ChainDigester {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
