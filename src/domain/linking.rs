//! Linking info: the per-archive descriptor of expected chain digests.
//!
//! Text format, UTF-8, whitespace separated:
//!
//! ```text
//! <prevDigest|-> <prevArchiveName|-> <algorithmId>
//! <digest> <containerName>
//! ...
//! ```

use crate::domain::chain::PrevDigest;
use crate::infra::error::{StructuralError, VerifyError, VerifyResult};
use crate::HashAlgorithm;

/// Name of the linking info entry inside an archive.
pub const LINKING_INFO_ENTRY: &str = "linkinginfo";

/// Parsed linking info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkingDescriptor {
    pub prev_digest: PrevDigest,
    /// Advisory only; never part of any digest.
    pub prev_archive_name: Option<String>,
    pub algorithm: HashAlgorithm,
    /// `(container name, recorded chained digest)` in file order.
    file_digests: Vec<(String, String)>,
}

impl LinkingDescriptor {
    pub fn new(
        prev_digest: PrevDigest,
        prev_archive_name: Option<String>,
        algorithm: HashAlgorithm,
    ) -> Self {
        Self {
            prev_digest,
            prev_archive_name,
            algorithm,
            file_digests: Vec::new(),
        }
    }

    /// Adds a recorded digest. Fails on a duplicate container name.
    pub fn push(&mut self, name: &str, digest: &str) -> Result<(), StructuralError> {
        if self.digest_for(name).is_some() {
            return Err(StructuralError::DuplicateLinkingEntry {
                name: name.to_string(),
                line: self.file_digests.len() + 2,
            });
        }
        self.file_digests
            .push((name.to_string(), digest.to_ascii_lowercase()));
        Ok(())
    }

    /// Parses linking info text.
    ///
    /// Malformed lines and duplicate container names are structural errors;
    /// an unknown algorithm id is a configuration error.
    pub fn parse(text: &str) -> VerifyResult<Self> {
        let structural = |e| VerifyError::structural(LINKING_INFO_ENTRY, e);
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l))
            .filter(|(_, l)| !l.trim().is_empty());

        let (header_no, header) = lines.next().ok_or_else(|| {
            structural(StructuralError::MalformedLinkingInfo {
                line: 1,
                reason: "missing header line".to_string(),
            })
        })?;

        let tokens: Vec<&str> = header.split_whitespace().collect();
        let [prev, prev_name, algorithm_id] = tokens.as_slice() else {
            return Err(structural(StructuralError::MalformedLinkingInfo {
                line: header_no,
                reason: format!("header has {} fields, expected 3", tokens.len()),
            }));
        };

        let algorithm = HashAlgorithm::from_id(algorithm_id).map_err(|_| {
            VerifyError::Configuration(format!(
                "{LINKING_INFO_ENTRY} line {header_no}: unsupported digest algorithm '{algorithm_id}'"
            ))
        })?;
        let prev_archive_name = match *prev_name {
            "-" => None,
            name => Some(name.to_string()),
        };
        let mut descriptor = Self::new(PrevDigest::parse(prev), prev_archive_name, algorithm);

        for (line_no, line) in lines {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let [digest, name] = tokens.as_slice() else {
                return Err(structural(StructuralError::MalformedLinkingInfo {
                    line: line_no,
                    reason: format!("entry has {} fields, expected 2", tokens.len()),
                }));
            };
            descriptor.push(name, digest).map_err(|e| match e {
                StructuralError::DuplicateLinkingEntry { name, .. } => {
                    structural(StructuralError::DuplicateLinkingEntry {
                        name,
                        line: line_no,
                    })
                }
                other => structural(other),
            })?;
        }

        log::debug!(
            "Parsed linking info: prev={}, algorithm={}, {} entries",
            descriptor.prev_digest,
            descriptor.algorithm,
            descriptor.file_digests.len()
        );
        Ok(descriptor)
    }

    /// Renders the text form; used when producing test archives.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = format!(
            "{} {} {}\n",
            self.prev_digest,
            self.prev_archive_name.as_deref().unwrap_or("-"),
            self.algorithm.as_str()
        );
        for (name, digest) in &self.file_digests {
            out.push_str(digest);
            out.push(' ');
            out.push_str(name);
            out.push('\n');
        }
        out
    }

    #[must_use]
    pub fn digest_for(&self, name: &str) -> Option<&str> {
        self.file_digests
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.file_digests.iter().map(|(n, _)| n.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.file_digests.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.file_digests.is_empty()
    }
}
