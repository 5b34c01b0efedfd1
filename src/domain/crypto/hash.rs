//! Hash algorithm domain type and streaming digester.
//!
//! `Digester` wraps the `sha2` hashers behind one type so callers can pick
//! the algorithm at runtime (from linking info or an XML digest method) and
//! feed it incrementally, either directly or through `io::Write`.

use std::io;

use sha2::{Digest, Sha256, Sha384, Sha512};

use super::DigestBytes;
pub use crate::HashAlgorithm;

/// Incremental digest over one of the supported algorithms.
#[derive(Clone)]
pub enum Digester {
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Digester {
    #[must_use]
    pub fn new(algo: HashAlgorithm) -> Self {
        match algo {
            HashAlgorithm::Sha256 => Digester::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => Digester::Sha384(Sha384::new()),
            HashAlgorithm::Sha512 => Digester::Sha512(Sha512::new()),
        }
    }

    #[must_use]
    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            Digester::Sha256(_) => HashAlgorithm::Sha256,
            Digester::Sha384(_) => HashAlgorithm::Sha384,
            Digester::Sha512(_) => HashAlgorithm::Sha512,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Digester::Sha256(h) => h.update(data),
            Digester::Sha384(h) => h.update(data),
            Digester::Sha512(h) => h.update(data),
        }
    }

    #[must_use]
    pub fn finalize(self) -> DigestBytes {
        let algo = self.algorithm();
        let bytes = match self {
            Digester::Sha256(h) => h.finalize().to_vec(),
            Digester::Sha384(h) => h.finalize().to_vec(),
            Digester::Sha512(h) => h.finalize().to_vec(),
        };
        DigestBytes::from_trusted(algo, bytes)
    }
}

impl io::Write for Digester {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Digests one stream with every supported algorithm at once.
///
/// Used for attachments, which are read exactly once but may later be
/// referenced under any digest method.
#[derive(Clone)]
pub struct MultiDigester {
    digesters: Vec<Digester>,
    size: u64,
}

impl MultiDigester {
    #[must_use]
    pub fn new() -> Self {
        Self {
            digesters: [
                HashAlgorithm::Sha256,
                HashAlgorithm::Sha384,
                HashAlgorithm::Sha512,
            ]
            .into_iter()
            .map(Digester::new)
            .collect(),
            size: 0,
        }
    }

    /// Returns the digests and the number of bytes consumed.
    #[must_use]
    pub fn finalize(self) -> (Vec<DigestBytes>, u64) {
        (
            self.digesters.into_iter().map(Digester::finalize).collect(),
            self.size,
        )
    }
}

impl Default for MultiDigester {
    fn default() -> Self {
        Self::new()
    }
}

impl io::Write for MultiDigester {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for d in &mut self.digesters {
            d.update(buf);
        }
        self.size += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
