//! Per-container trust validation.
//!
//! Steps run in a fixed order and the first failure wins: signature,
//! certificate path, OCSP, timestamp. The cancel token is polled between
//! steps so long batches stop promptly.

use crate::domain::container::schema::TS_HASH_CHAIN_ENTRY;
use crate::domain::container::{ContainerEntry, TimestampBlock};
use crate::domain::signature::SignatureDocument;
use crate::domain::trust::TrustContext;
use crate::domain::verdict::{ContainerVerdict, OcspEvidence, TimestampEvidence};
use crate::domain::xml::XmlElement;
use crate::infra::cancel::CancelToken;
use crate::infra::error::TrustError;
use crate::services::cert_validator::{CertificateValidator, ValidatedSigner};
use crate::services::hash_chain::HashChainVerifier;
use crate::services::ocsp_verifier::OcspVerifier;
use crate::services::signature_verifier::SignatureVerifier;
use crate::services::timestamp_verifier::TimestampVerifier;
use crate::HashAlgorithm;

/// Validates one container against `trust`.
pub fn verify_container(
    entry: &ContainerEntry,
    trust: &TrustContext,
    expected_signer_hint: Option<&str>,
) -> Result<ContainerVerdict, TrustError> {
    verify_container_with_cancel(entry, trust, expected_signer_hint, &CancelToken::new())
}

/// [`verify_container`] with cooperative cancellation.
pub fn verify_container_with_cancel(
    entry: &ContainerEntry,
    trust: &TrustContext,
    expected_signer_hint: Option<&str>,
    cancel: &CancelToken,
) -> Result<ContainerVerdict, TrustError> {
    cancel.check()?;
    let doc = SignatureVerifier::new(entry).verify()?;

    cancel.check()?;
    let signer =
        CertificateValidator::validate(&doc.chain, trust, doc.signing_time, expected_signer_hint)?;

    cancel.check()?;
    let ocsp = verify_ocsp(&doc, &signer, trust)?;

    cancel.check()?;
    let timestamp = verify_timestamps(entry, &doc, trust)?;

    log::debug!(
        "Container {} signed by {} at {}",
        entry.name,
        signer.identity.common_name,
        doc.signing_time
    );
    Ok(ContainerVerdict {
        container: entry.name.clone(),
        signer: signer.identity,
        signing_time: doc.signing_time,
        ocsp,
        timestamp,
    })
}

/// The first embedded response that vouches for the signer wins. A revoked
/// status is final.
fn verify_ocsp(
    doc: &SignatureDocument,
    signer: &ValidatedSigner,
    trust: &TrustContext,
) -> Result<Option<OcspEvidence>, TrustError> {
    let verifier = OcspVerifier::new(trust);
    let mut first_error = None;
    for response in &doc.ocsp_responses {
        match verifier.verify(response, signer, doc.signing_time) {
            Ok(evidence) => return Ok(Some(evidence)),
            Err(e @ TrustError::CertificateRevoked { .. }) => return Err(e),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    first_error.map_or(Ok(None), Err)
}

fn verify_timestamps(
    entry: &ContainerEntry,
    doc: &SignatureDocument,
    trust: &TrustContext,
) -> Result<Option<TimestampEvidence>, TrustError> {
    let verifier = TimestampVerifier::new(trust);

    let container_ts = match &entry.timestamp {
        Some(block) => {
            let content = timestamped_content(entry, block)?;
            let token = block
                .token_der()
                .map_err(|e| TrustError::TimestampInvalid(format!("token encoding: {e}")))?;
            Some(verifier.verify(&token, &content, doc.signing_time)?)
        }
        None => None,
    };

    let mut embedded = None;
    for token in &doc.timestamps {
        let evidence = verifier.verify(token, &doc.signature_value, doc.signing_time)?;
        embedded.get_or_insert(evidence);
    }

    Ok(container_ts.or(embedded))
}

/// Bytes a container-level timestamp must cover.
fn timestamped_content(
    entry: &ContainerEntry,
    block: &TimestampBlock,
) -> Result<Vec<u8>, TrustError> {
    match &block.hash_chain {
        Some(pair) => {
            HashChainVerifier::new(
                entry,
                TS_HASH_CHAIN_ENTRY,
                vec![entry.signature.entry_name.clone()],
            )
            .verify(pair.result.as_bytes(), pair.chain.as_bytes())?;
            Ok(pair.result.as_bytes().to_vec())
        }
        None => {
            let manifest = entry.asic_manifest.as_deref().ok_or_else(|| {
                TrustError::TimestampMismatch("no ASiC manifest to timestamp".to_string())
            })?;
            check_asic_manifest(entry, manifest)?;
            Ok(manifest.as_bytes().to_vec())
        }
    }
}

/// The ASiC manifest must reference the signature entry with its digest.
fn check_asic_manifest(entry: &ContainerEntry, manifest: &str) -> Result<(), TrustError> {
    let root = XmlElement::parse(manifest.as_bytes())
        .map_err(|e| TrustError::TimestampMismatch(format!("ASiC manifest: {e}")))?;
    let signature = entry.signature.entry_name.as_str();

    let reference = root
        .find_all("DataObjectReference")
        .into_iter()
        .find(|r| {
            r.attr("URI")
                .map(|u| u.strip_prefix('/').unwrap_or(u) == signature)
                .unwrap_or(false)
        })
        .ok_or_else(|| {
            TrustError::TimestampMismatch(format!("ASiC manifest does not reference {signature}"))
        })?;

    let algo_uri = reference
        .child("DigestMethod")
        .and_then(|m| m.attr("Algorithm"))
        .unwrap_or_default();
    let algo = HashAlgorithm::from_uri(algo_uri)
        .ok_or_else(|| TrustError::UnsupportedAlgorithm(algo_uri.to_string()))?;
    let value = reference
        .child("DigestValue")
        .ok_or_else(|| TrustError::MissingElement("DigestValue".to_string()))?;
    let recorded = crate::domain::signature::decode_base64(value)?;
    if recorded != algo.digest(entry.signature.xml.as_bytes()) {
        return Err(TrustError::ReferenceDigestMismatch {
            uri: signature.to_string(),
        });
    }
    Ok(())
}
