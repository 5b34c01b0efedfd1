//! Container codec: zip archives of containers, and the containers themselves.
//!
//! Decoding streams entries in storage order. Textual entries are kept as
//! UTF-8 strings, the timestamp token as base64, and attachments are piped
//! through digesters without being buffered. Structural validation happens
//! at decode time; a decoded `ContainerEntry` is always complete.

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tempfile::SpooledTempFile;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::domain::chain::PrevDigest;
use crate::domain::container::schema::{self, schema_rank, ASIC_COMMENT, ASIC_MIMETYPE};
use crate::domain::container::{
    classify, Attachment, ContainerContents, ContainerEntry, EntryKind, HashChainPair,
    SignatureBlock, TimestampBlock,
};
use crate::domain::crypto::MultiDigester;
use crate::domain::linking::{LinkingDescriptor, LINKING_INFO_ENTRY};
use crate::infra::cancel::CancelToken;
use crate::infra::error::StructuralError;
use crate::services::digest_chain::ChainDigester;
use crate::HashAlgorithm;

/// Decode accumulator threaded through the entries of one container.
#[derive(Default)]
struct DecodeState {
    mimetype: Option<String>,
    message: Option<String>,
    signature: Option<(String, String)>,
    sig_hash_chain_result: Option<String>,
    sig_hash_chain: Option<String>,
    timestamp: Option<String>,
    ts_hash_chain_result: Option<String>,
    ts_hash_chain: Option<String>,
    manifest: Option<String>,
    asic_manifest: Option<String>,
    attachments: Vec<Attachment>,
}

fn read_text<R: Read>(name: &str, reader: &mut R) -> Result<String, StructuralError> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    String::from_utf8(buf).map_err(|_| StructuralError::InvalidText {
        entry: name.to_string(),
    })
}

fn fill(slot: &mut Option<String>, name: &str, value: String) -> Result<(), StructuralError> {
    if slot.is_some() {
        return Err(StructuralError::DuplicateEntry {
            name: name.to_string(),
        });
    }
    *slot = Some(value);
    Ok(())
}

impl DecodeState {
    fn accept<R: Read>(
        mut self,
        kind: EntryKind,
        name: &str,
        reader: &mut R,
    ) -> Result<Self, StructuralError> {
        match kind {
            EntryKind::Attachment => {
                let mut digester = MultiDigester::new();
                io::copy(reader, &mut digester)?;
                let (digests, size) = digester.finalize();
                log::debug!("Digested attachment {name} ({size} bytes)");
                self.attachments
                    .push(Attachment::new(name.to_string(), size, digests));
            }
            EntryKind::Timestamp => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf)?;
                fill(&mut self.timestamp, name, STANDARD.encode(buf))?;
            }
            EntryKind::Signature => {
                if self.signature.is_some() {
                    return Err(StructuralError::DuplicateEntry {
                        name: name.to_string(),
                    });
                }
                self.signature = Some((name.to_string(), read_text(name, reader)?));
            }
            EntryKind::Mimetype => fill(&mut self.mimetype, name, read_text(name, reader)?)?,
            EntryKind::Message => fill(&mut self.message, name, read_text(name, reader)?)?,
            EntryKind::SigHashChainResult => {
                fill(&mut self.sig_hash_chain_result, name, read_text(name, reader)?)?;
            }
            EntryKind::SigHashChain => {
                fill(&mut self.sig_hash_chain, name, read_text(name, reader)?)?;
            }
            EntryKind::TsHashChainResult => {
                fill(&mut self.ts_hash_chain_result, name, read_text(name, reader)?)?;
            }
            EntryKind::TsHashChain => {
                fill(&mut self.ts_hash_chain, name, read_text(name, reader)?)?;
            }
            EntryKind::Manifest => fill(&mut self.manifest, name, read_text(name, reader)?)?,
            EntryKind::AsicManifest => {
                fill(&mut self.asic_manifest, name, read_text(name, reader)?)?;
            }
        }
        Ok(self)
    }

    fn finish(self, container: &str) -> Result<ContainerEntry, StructuralError> {
        let mimetype = self.mimetype.ok_or(StructuralError::MimetypeNotFound)?;
        if mimetype != ASIC_MIMETYPE {
            return Err(StructuralError::InvalidMimetype {
                expected: ASIC_MIMETYPE.to_string(),
                found: mimetype,
            });
        }

        let message = self
            .message
            .filter(|m| !m.trim().is_empty())
            .ok_or(StructuralError::MessageNotFound)?;

        let (signature_entry, signature_xml) = self
            .signature
            .filter(|(_, xml)| !xml.trim().is_empty())
            .ok_or(StructuralError::SignatureNotFound)?;

        let sig_hash_chain = pair(self.sig_hash_chain_result, self.sig_hash_chain).map_err(
            |(present, missing)| StructuralError::SignatureHashChainMismatch { present, missing },
        )?;
        let ts_hash_chain = pair(self.ts_hash_chain_result, self.ts_hash_chain).map_err(
            |(present, missing)| StructuralError::TimestampHashChainMismatch { present, missing },
        )?;

        let timestamp = match (self.timestamp, ts_hash_chain) {
            (Some(token_base64), hash_chain) => Some(TimestampBlock {
                token_base64,
                hash_chain,
            }),
            (None, None) => None,
            (None, Some(_)) => return Err(StructuralError::OrphanedTimestampHashChain),
        };

        if !self.attachments.is_empty() && self.manifest.is_none() {
            return Err(StructuralError::ManifestNotFound);
        }
        let needs_asic_manifest = timestamp.as_ref().is_some_and(|t| t.hash_chain.is_none());
        if needs_asic_manifest && self.asic_manifest.is_none() {
            return Err(StructuralError::AsicManifestNotFound);
        }

        Ok(ContainerEntry {
            name: container.to_string(),
            mimetype,
            message,
            signature: SignatureBlock {
                entry_name: signature_entry,
                xml: signature_xml,
                hash_chain: sig_hash_chain,
            },
            timestamp,
            manifest: self.manifest,
            asic_manifest: self.asic_manifest,
            attachments: self.attachments,
        })
    }
}

/// Both halves of a hash chain, or neither. Returns the present/missing names
/// for a partial pair.
fn pair(
    result: Option<String>,
    chain: Option<String>,
) -> Result<Option<HashChainPair>, (&'static str, &'static str)> {
    match (result, chain) {
        (Some(result), Some(chain)) => Ok(Some(HashChainPair { result, chain })),
        (None, None) => Ok(None),
        (Some(_), None) => Err(("hash chain result", "hash chain")),
        (None, Some(_)) => Err(("hash chain", "hash chain result")),
    }
}

/// Reads and writes individual containers.
pub struct ContainerCodec;

impl ContainerCodec {
    /// Decodes one container from a seekable zip stream.
    pub fn decode<R: Read + Seek>(
        name: &str,
        reader: R,
    ) -> Result<ContainerEntry, StructuralError> {
        let mut zip = ZipArchive::new(reader)?;
        if zip.comment() != ASIC_COMMENT.as_bytes() {
            log::debug!("Container {name} has no ASiC mimetype comment");
        }

        let mut state = DecodeState::default();
        for index in 0..zip.len() {
            let mut file = zip.by_index(index)?;
            if file.is_dir() {
                continue;
            }
            let entry_name = file.name().to_string();
            state = match classify(&entry_name) {
                Some(kind) => state.accept(kind, &entry_name, &mut file)?,
                None => {
                    log::warn!("Skipping unknown entry '{entry_name}' in container {name}");
                    state
                }
            };
        }
        state.finish(name)
    }

    /// Writes a container: `mimetype` first and stored, then the remaining
    /// entries in schema order, with the ASiC mimetype comment.
    pub fn encode(contents: &ContainerContents) -> Result<Vec<u8>, StructuralError> {
        let mut entries: Vec<(&str, &[u8])> = contents.entries().collect();
        entries.sort_by_key(|(name, _)| classify(name).map_or(usize::MAX, schema_rank));

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.set_comment(ASIC_COMMENT);
        for (name, data) in entries {
            let method = if name == schema::MIMETYPE_ENTRY {
                CompressionMethod::Stored
            } else {
                CompressionMethod::Deflated
            };
            let options = SimpleFileOptions::default()
                .compression_method(method)
                .last_modified_time(zip::DateTime::default());
            writer.start_file(name, options)?;
            writer.write_all(data)?;
        }
        Ok(writer.finish()?.into_inner())
    }
}

/// A container copied out of an archive, with its content digest running.
pub struct SpooledContainer {
    pub name: String,
    pub size: u64,
    file: SpooledTempFile,
    digester: ChainDigester,
}

impl SpooledContainer {
    /// Decodes the spooled bytes.
    pub fn decode(mut self) -> Result<(ContainerEntry, ChainDigester), StructuralError> {
        self.file.seek(SeekFrom::Start(0))?;
        let entry = ContainerCodec::decode(&self.name, &mut self.file)?;
        Ok((entry, self.digester))
    }
}

struct Tee<'a, A: Write, B: Write>(&'a mut A, &'a mut B);

impl<A: Write, B: Write> Write for Tee<'_, A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write_all(buf)?;
        self.1.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()?;
        self.1.flush()
    }
}

/// Reader over an archive: containers in storage order plus linking info.
pub struct ArchiveReader<R: Read + Seek> {
    zip: ZipArchive<R>,
    linking_text: String,
    containers: Vec<(usize, String)>,
}

impl<R: Read + Seek> ArchiveReader<R> {
    pub fn open(reader: R) -> Result<Self, StructuralError> {
        let mut zip = ZipArchive::new(reader)?;
        let mut containers = Vec::new();
        let mut linking_text = None;

        for index in 0..zip.len() {
            let mut file = zip.by_index(index)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            if name == LINKING_INFO_ENTRY {
                fill(&mut linking_text, &name, read_text(&name, &mut file)?)?;
            } else if containers.iter().any(|(_, n)| *n == name) {
                return Err(StructuralError::DuplicateEntry { name });
            } else {
                containers.push((index, name));
            }
        }

        Ok(Self {
            zip,
            linking_text: linking_text.ok_or(StructuralError::LinkingInfoNotFound)?,
            containers,
        })
    }

    #[must_use]
    pub fn linking_text(&self) -> &str {
        &self.linking_text
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// Copies the `position`-th container into a spool file, digesting it
    /// on the way.
    pub fn spool(
        &mut self,
        position: usize,
        algo: HashAlgorithm,
        threshold: usize,
    ) -> Result<SpooledContainer, StructuralError> {
        let (index, name) = self
            .containers
            .get(position)
            .cloned()
            .ok_or_else(|| StructuralError::MalformedZip(format!("no container #{position}")))?;
        let mut source = self.zip.by_index(index)?;
        let mut file = SpooledTempFile::new(threshold);
        let mut digester = ChainDigester::new(algo);
        let size = io::copy(&mut source, &mut Tee(&mut file, &mut digester))?;
        log::debug!("Spooled container {name} ({size} bytes)");
        Ok(SpooledContainer {
            name,
            size,
            file,
            digester,
        })
    }

    /// Decodes every container in storage order, returning each with its
    /// content digester. Stops early when `cancel` fires.
    pub fn decode_all(
        &mut self,
        algo: HashAlgorithm,
        threshold: usize,
        cancel: &CancelToken,
    ) -> Result<Option<Vec<(ContainerEntry, ChainDigester)>>, (String, StructuralError)> {
        let mut decoded = Vec::with_capacity(self.len());
        for position in 0..self.len() {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let name = self.containers[position].1.clone();
            let spooled = self
                .spool(position, algo, threshold)
                .map_err(|e| (name.clone(), e))?;
            decoded.push(spooled.decode().map_err(|e| (name, e))?);
        }
        Ok(Some(decoded))
    }
}

/// Writes an archive of already-encoded containers followed by linking info.
pub fn encode_archive(
    containers: &[(String, Vec<u8>)],
    linking: &LinkingDescriptor,
) -> Result<Vec<u8>, StructuralError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(zip::DateTime::default());
    for (name, data) in containers {
        writer.start_file(name.as_str(), options)?;
        writer.write_all(data)?;
    }
    writer.start_file(LINKING_INFO_ENTRY, options)?;
    writer.write_all(linking.to_text().as_bytes())?;
    Ok(writer.finish()?.into_inner())
}

/// Chains `containers` from `prev`, records the links in fresh linking info
/// and writes the archive. Returns the archive bytes and the final digest.
pub fn seal_archive(
    containers: &[(String, Vec<u8>)],
    prev: &PrevDigest,
    prev_archive_name: Option<&str>,
    algo: HashAlgorithm,
) -> Result<(Vec<u8>, String), StructuralError> {
    let mut linking =
        LinkingDescriptor::new(prev.clone(), prev_archive_name.map(str::to_string), algo);
    let mut link = prev.as_chain_seed().to_string();
    for (name, data) in containers {
        let mut digester = ChainDigester::new(algo);
        digester.update(data);
        link = digester.finish(&link);
        linking.push(name, &link)?;
    }
    Ok((encode_archive(containers, &linking)?, link))
}
