//! `ArchiveVerifier`: end-to-end verification of one sealed archive.
//!
//! Runs the Start → Extracted → ChainRecomputed → CrossChecked state machine.
//! Structural and continuity failures abort immediately; trust failures are
//! collected for every container and reported together. A cancelled run never
//! yields a partial verdict.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::domain::chain::PrevDigest;
use crate::domain::container::ContainerEntry;
use crate::domain::linking::LinkingDescriptor;
use crate::domain::trust::TrustContext;
use crate::domain::verdict::{ArchiveVerdict, ContainerVerdict};
use crate::infra::cancel::CancelToken;
use crate::infra::config::{VerifierConfiguration, DEFAULT_SPOOL_THRESHOLD_BYTES};
use crate::infra::error::{ContinuityError, StructuralError, TrustError, VerifyError, VerifyResult};
use crate::services::container_codec::ArchiveReader;
use crate::services::container_verifier::verify_container_with_cancel;
use crate::services::digest_chain::ChainDigester;

/// Verification states, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyState {
    Start,
    Extracted,
    ChainRecomputed,
    CrossChecked,
    Verified,
    Rejected,
    Cancelled,
}

impl fmt::Display for VerifyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Run options that are not trust material.
#[derive(Debug, Clone)]
pub struct VerifierOptions {
    pub worker_threads: usize,
    pub spool_threshold: usize,
    pub expected_signer: Option<String>,
    pub cancel: CancelToken,
}

impl Default for VerifierOptions {
    fn default() -> Self {
        Self {
            worker_threads: thread::available_parallelism().map_or(1, |n| n.get()),
            spool_threshold: DEFAULT_SPOOL_THRESHOLD_BYTES,
            expected_signer: None,
            cancel: CancelToken::new(),
        }
    }
}

impl VerifierOptions {
    /// Options derived from a loaded configuration file.
    #[must_use]
    pub fn from_config(config: &VerifierConfiguration) -> Self {
        let cancel = match config.timeout_seconds {
            Some(secs) => CancelToken::with_timeout(std::time::Duration::from_secs(secs)),
            None => CancelToken::new(),
        };
        Self {
            worker_threads: config.worker_threads,
            spool_threshold: config.spool_threshold_bytes,
            expected_signer: config.expected_signer.clone(),
            cancel,
        }
    }
}

/// Data carried out of the Extracted state.
struct Extracted {
    linking: LinkingDescriptor,
    containers: Vec<(ContainerEntry, ChainDigester)>,
}

/// Orchestrates verification of archives against one trust context.
pub struct ArchiveVerifier {
    trust: Arc<TrustContext>,
    options: VerifierOptions,
}

impl ArchiveVerifier {
    #[must_use]
    pub fn new(trust: TrustContext) -> Self {
        Self::with_options(trust, VerifierOptions::default())
    }

    #[must_use]
    pub fn with_options(trust: TrustContext, options: VerifierOptions) -> Self {
        Self {
            trust: Arc::new(trust),
            options,
        }
    }

    /// Verifies the archive file at `path`; the file name names the archive.
    pub fn verify_path(&self, path: &Path, prev: &PrevDigest) -> VerifyResult<ArchiveVerdict> {
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        let file = File::open(path).map_err(|e| {
            VerifyError::Io(format!("cannot open archive {}: {e}", path.display()))
        })?;
        self.verify(&name, BufReader::new(file), prev)
    }

    /// Verifies one archive read from `reader` as continuing from `prev`.
    pub fn verify<R: Read + Seek>(
        &self,
        archive: &str,
        reader: R,
        prev: &PrevDigest,
    ) -> VerifyResult<ArchiveVerdict> {
        log::info!("Verifying archive {archive} (previous digest {prev})");
        let result = self.run(archive, reader, prev);
        match &result {
            Ok(verdict) => {
                transition(archive, VerifyState::CrossChecked, VerifyState::Verified);
                log::info!(
                    "Archive {archive} verified: {} container(s), final digest {}",
                    verdict.containers.len(),
                    verdict.final_digest
                );
            }
            Err(VerifyError::Cancelled { .. }) => {
                log::warn!("Verification of {archive} entered state {}", VerifyState::Cancelled);
            }
            Err(e) => {
                log::warn!("Archive {archive} {}: {e}", VerifyState::Rejected);
            }
        }
        result
    }

    fn run<R: Read + Seek>(
        &self,
        archive: &str,
        reader: R,
        prev: &PrevDigest,
    ) -> VerifyResult<ArchiveVerdict> {
        let extracted = self.extract(archive, reader)?;
        transition(archive, VerifyState::Start, VerifyState::Extracted);
        self.ensure_running(archive)?;

        let outcomes = self.validate_all(&extracted.containers);
        let chain = recompute_chain(extracted.containers.iter().map(|(e, d)| (e, d)), prev);
        transition(archive, VerifyState::Extracted, VerifyState::ChainRecomputed);
        self.ensure_running(archive)?;

        cross_check(archive, prev, &extracted.linking, &chain)?;
        transition(archive, VerifyState::ChainRecomputed, VerifyState::CrossChecked);

        let mut failures = Vec::new();
        let mut containers = Vec::with_capacity(outcomes.len());
        for ((entry, _), outcome) in extracted.containers.iter().zip(outcomes) {
            match outcome {
                Ok(verdict) => containers.push(verdict),
                Err(TrustError::Cancelled) => {
                    return Err(VerifyError::Cancelled {
                        archive: archive.to_string(),
                    })
                }
                Err(e) => {
                    log::warn!("Container {archive}/{} rejected: {e}", entry.name);
                    failures.push((entry.name.clone(), e));
                }
            }
        }
        if !failures.is_empty() {
            return Err(VerifyError::Trust {
                archive: archive.to_string(),
                failures,
            });
        }

        let final_digest = chain
            .last()
            .map(|(_, d)| d.clone())
            .unwrap_or_else(|| prev.as_chain_seed().to_string());
        Ok(ArchiveVerdict {
            archive: archive.to_string(),
            final_digest,
            chain,
            containers,
        })
    }

    fn ensure_running(&self, archive: &str) -> VerifyResult<()> {
        if self.options.cancel.is_cancelled() {
            return Err(VerifyError::Cancelled {
                archive: archive.to_string(),
            });
        }
        Ok(())
    }

    fn extract<R: Read + Seek>(&self, archive: &str, reader: R) -> VerifyResult<Extracted> {
        let mut zip =
            ArchiveReader::open(reader).map_err(|e| VerifyError::structural(archive, e))?;
        let linking =
            LinkingDescriptor::parse(zip.linking_text()).map_err(|e| in_archive(archive, e))?;
        if zip.is_empty() {
            return Err(VerifyError::structural(archive, StructuralError::EmptyArchive));
        }
        log::debug!(
            "Archive {archive}: {} container(s), algorithm {}",
            zip.len(),
            linking.algorithm
        );

        let containers = zip
            .decode_all(
                linking.algorithm,
                self.options.spool_threshold,
                &self.options.cancel,
            )
            .map_err(|(container, e)| {
                VerifyError::structural(format!("{archive}/{container}"), e)
            })?
            .ok_or_else(|| VerifyError::Cancelled {
                archive: archive.to_string(),
            })?;
        Ok(Extracted {
            linking,
            containers,
        })
    }

    /// Validates every container on a bounded pool of scoped workers.
    /// Results come back in archive order.
    fn validate_all(
        &self,
        containers: &[(ContainerEntry, ChainDigester)],
    ) -> Vec<Result<ContainerVerdict, TrustError>> {
        let next = AtomicUsize::new(0);
        let results: Mutex<Vec<Option<Result<ContainerVerdict, TrustError>>>> =
            Mutex::new((0..containers.len()).map(|_| None).collect());
        let workers = self.options.worker_threads.clamp(1, containers.len().max(1));
        let hint = self.options.expected_signer.as_deref();
        let trust = self.trust.as_ref();
        let cancel = &self.options.cancel;

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some((entry, _)) = containers.get(index) else {
                        break;
                    };
                    let outcome = verify_container_with_cancel(entry, trust, hint, cancel);
                    if let Ok(mut slots) = results.lock() {
                        slots[index] = Some(outcome);
                    }
                });
            }
        });

        results
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .into_iter()
            .map(|slot| slot.unwrap_or(Err(TrustError::Cancelled)))
            .collect()
    }
}

fn transition(archive: &str, from: VerifyState, to: VerifyState) {
    log::debug!("Archive {archive}: {from} -> {to}");
}

/// Prefixes contexts raised while parsing archive members with the archive.
fn in_archive(archive: &str, error: VerifyError) -> VerifyError {
    match error {
        VerifyError::Structural { context, source } => {
            VerifyError::structural(format!("{archive}/{context}"), source)
        }
        VerifyError::Configuration(reason) => {
            VerifyError::Configuration(format!("{archive}/{reason}"))
        }
        VerifyError::UnsupportedAlgorithm(id) => {
            VerifyError::Configuration(format!("{archive}: unsupported digest algorithm '{id}'"))
        }
        other => other,
    }
}

/// Folds the digest chain over containers in archive order.
fn recompute_chain<'a>(
    containers: impl Iterator<Item = (&'a ContainerEntry, &'a ChainDigester)>,
    prev: &PrevDigest,
) -> Vec<(String, String)> {
    let mut link = prev.as_chain_seed().to_string();
    containers
        .map(|(entry, digester)| {
            link = digester.clone().finish(&link);
            (entry.name.clone(), link.clone())
        })
        .collect()
}

fn cross_check(
    archive: &str,
    prev: &PrevDigest,
    linking: &LinkingDescriptor,
    chain: &[(String, String)],
) -> VerifyResult<()> {
    let fail = |e| VerifyError::continuity(archive, e);

    if *prev != linking.prev_digest {
        return Err(fail(ContinuityError::PrevDigestMismatch {
            supplied: prev.to_string(),
            recorded: linking.prev_digest.to_string(),
        }));
    }

    let unlisted: Vec<String> = chain
        .iter()
        .filter(|(name, _)| linking.digest_for(name).is_none())
        .map(|(name, _)| name.clone())
        .collect();
    let missing: Vec<String> = linking
        .names()
        .filter(|name| !chain.iter().any(|(n, _)| n == name))
        .map(str::to_string)
        .collect();
    if !unlisted.is_empty() || !missing.is_empty() {
        return Err(fail(ContinuityError::FileSetMismatch { unlisted, missing }));
    }

    for (name, actual) in chain {
        let expected = linking.digest_for(name).unwrap_or_default();
        if expected != actual {
            return Err(fail(ContinuityError::DigestMismatch {
                container: name.clone(),
                expected: expected.to_string(),
                actual: actual.clone(),
            }));
        }
    }
    Ok(())
}
