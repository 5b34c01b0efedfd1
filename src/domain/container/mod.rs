//! Typed model of one signed message container (ASiC-E).
//!
//! A decoded [`ContainerEntry`] keeps textual entries as strings, the
//! timestamp token base64 encoded, and attachments only as digests.
//! [`ContainerContents`] is the raw, writable form used to produce containers.

pub mod schema;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::domain::crypto::DigestBytes;
use crate::HashAlgorithm;
pub use schema::{classify, EntryKind};

/// Hash chain result plus hash chain, always present together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashChainPair {
    pub result: String,
    pub chain: String,
}

/// Signature material of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureBlock {
    /// Entry name, e.g. `META-INF/signatures.xml`.
    pub entry_name: String,
    pub xml: String,
    pub hash_chain: Option<HashChainPair>,
}

/// Batch timestamp material of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampBlock {
    pub token_base64: String,
    pub hash_chain: Option<HashChainPair>,
}

impl TimestampBlock {
    pub fn token_der(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(self.token_base64.as_bytes())
    }
}

/// An attachment known only by its digests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub size: u64,
    digests: Vec<DigestBytes>,
}

impl Attachment {
    pub fn new(name: String, size: u64, digests: Vec<DigestBytes>) -> Self {
        Self {
            name,
            size,
            digests,
        }
    }

    #[must_use]
    pub fn digest(&self, algo: HashAlgorithm) -> Option<&DigestBytes> {
        self.digests.iter().find(|d| d.algorithm() == algo)
    }
}

/// One decoded container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEntry {
    pub name: String,
    pub mimetype: String,
    pub message: String,
    pub signature: SignatureBlock,
    pub timestamp: Option<TimestampBlock>,
    pub manifest: Option<String>,
    pub asic_manifest: Option<String>,
    pub attachments: Vec<Attachment>,
}

/// Content of a container entry as seen by reference resolution.
#[derive(Debug, Clone, Copy)]
pub enum EntryData<'a> {
    Bytes(&'a [u8]),
    Digested(&'a Attachment),
}

impl<'a> EntryData<'a> {
    /// Digest of the entry under `algo`.
    #[must_use]
    pub fn digest(&self, algo: HashAlgorithm) -> Option<Vec<u8>> {
        match self {
            EntryData::Bytes(bytes) => Some(algo.digest(bytes)),
            EntryData::Digested(att) => att.digest(algo).map(|d| d.as_slice().to_vec()),
        }
    }
}

impl ContainerEntry {
    /// Looks up an entry by its path inside the container (no leading `/`).
    ///
    /// Only entries of this container are reachable. The timestamp token is
    /// never a reference target.
    #[must_use]
    pub fn entry(&self, path: &str) -> Option<EntryData<'_>> {
        match classify(path)? {
            EntryKind::Mimetype => Some(EntryData::Bytes(self.mimetype.as_bytes())),
            EntryKind::Message => Some(EntryData::Bytes(self.message.as_bytes())),
            EntryKind::Signature if path == self.signature.entry_name => {
                Some(EntryData::Bytes(self.signature.xml.as_bytes()))
            }
            EntryKind::Signature => None,
            EntryKind::SigHashChainResult => self
                .signature
                .hash_chain
                .as_ref()
                .map(|p| EntryData::Bytes(p.result.as_bytes())),
            EntryKind::SigHashChain => self
                .signature
                .hash_chain
                .as_ref()
                .map(|p| EntryData::Bytes(p.chain.as_bytes())),
            EntryKind::TsHashChainResult => self
                .ts_hash_chain()
                .map(|p| EntryData::Bytes(p.result.as_bytes())),
            EntryKind::TsHashChain => self
                .ts_hash_chain()
                .map(|p| EntryData::Bytes(p.chain.as_bytes())),
            EntryKind::Manifest => self
                .manifest
                .as_ref()
                .map(|m| EntryData::Bytes(m.as_bytes())),
            EntryKind::AsicManifest => self
                .asic_manifest
                .as_ref()
                .map(|m| EntryData::Bytes(m.as_bytes())),
            EntryKind::Attachment => self
                .attachments
                .iter()
                .find(|a| a.name == path)
                .map(EntryData::Digested),
            EntryKind::Timestamp => None,
        }
    }

    fn ts_hash_chain(&self) -> Option<&HashChainPair> {
        self.timestamp.as_ref().and_then(|t| t.hash_chain.as_ref())
    }

    /// Names of the message parts that a signature must cover.
    pub fn message_part_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(schema::MESSAGE_ENTRY)
            .chain(self.attachments.iter().map(|a| a.name.as_str()))
    }
}

/// Raw container content, written by the codec's encoder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerContents {
    entries: Vec<(String, Vec<u8>)>,
}

impl ContainerContents {
    /// Container with the ASiC mimetype, a message and a signature.
    #[must_use]
    pub fn new(message: impl Into<Vec<u8>>, signature_xml: impl Into<Vec<u8>>) -> Self {
        Self::default()
            .with_entry(schema::MIMETYPE_ENTRY, schema::ASIC_MIMETYPE)
            .with_entry(schema::MESSAGE_ENTRY, message)
            .with_entry(schema::SIGNATURE_ENTRY, signature_xml)
    }

    /// Adds or replaces an entry.
    #[must_use]
    pub fn with_entry(mut self, name: &str, data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = data,
            None => self.entries.push((name.to_string(), data)),
        }
        self
    }

    #[must_use]
    pub fn without_entry(mut self, name: &str) -> Self {
        self.entries.retain(|(n, _)| n != name);
        self
    }

    /// Adds the next `attachmentN` entry.
    #[must_use]
    pub fn with_attachment(self, data: impl Into<Vec<u8>>) -> Self {
        let n = self
            .entries
            .iter()
            .filter(|(n, _)| classify(n) == Some(EntryKind::Attachment))
            .count()
            + 1;
        self.with_entry(&format!("attachment{n}"), data)
    }

    #[must_use]
    pub fn entry(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.as_slice())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(n, d)| (n.as_str(), d.as_slice()))
    }
}
