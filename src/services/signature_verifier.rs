//! Signature verification for one container.
//!
//! References are resolved strictly inside the container: `#id` targets an
//! element of the signature document, `/path` targets a container entry.
//! Element targets and `SignedInfo` are digested in canonical form; entry
//! targets are digested over their stored bytes.

use std::collections::HashSet;

use openssl::bn::BigNum;
use openssl::ecdsa::EcdsaSig;
use openssl::sign::Verifier;
use openssl::x509::X509;

use crate::domain::container::schema::{SIG_HASH_CHAIN_ENTRY, SIG_HASH_CHAIN_RESULT_ENTRY};
use crate::domain::container::ContainerEntry;
use crate::domain::signature::{SignatureDocument, SignatureMethod, SignatureReference};
use crate::domain::xml::XmlElement;
use crate::infra::error::TrustError;
use crate::services::hash_chain::HashChainVerifier;

pub struct SignatureVerifier<'c> {
    container: &'c ContainerEntry,
}

impl<'c> SignatureVerifier<'c> {
    #[must_use]
    pub fn new(container: &'c ContainerEntry) -> Self {
        Self { container }
    }

    /// Parses and verifies the container signature. Returns the parsed
    /// document for the certificate checks that follow.
    pub fn verify(&self) -> Result<SignatureDocument, TrustError> {
        let doc = SignatureDocument::parse(self.container.signature.xml.as_bytes())?;

        let mut covered = HashSet::new();
        for reference in &doc.references {
            if let Some(path) = self.check_reference(&doc, reference)? {
                covered.insert(path);
            }
        }
        self.check_coverage(&covered)?;

        let leaf = doc.chain.leaf().to_x509()?;
        let signed_info = doc.signed_info_bytes()?;
        verify_value(&leaf, doc.method, &signed_info, &doc.signature_value)?;
        self.check_manifest()?;
        log::debug!(
            "Signature of {} verified ({} reference(s))",
            self.container.name,
            doc.references.len()
        );
        Ok(doc)
    }

    /// Checks one reference digest. Returns the container entry it covers,
    /// if any.
    fn check_reference(
        &self,
        doc: &SignatureDocument,
        reference: &SignatureReference,
    ) -> Result<Option<String>, TrustError> {
        let uri = reference.uri.as_str();
        let outside = || TrustError::ReferenceOutsideContainer {
            uri: uri.to_string(),
        };

        let (actual, covered) = if let Some(id) = uri.strip_prefix('#') {
            let bytes = doc
                .reference_bytes(id, &reference.transforms)?
                .ok_or_else(outside)?;
            (reference.algorithm.digest(&bytes), None)
        } else if let Some(path) = uri.strip_prefix('/') {
            if !reference.transforms.is_empty() {
                return Err(TrustError::UnsupportedAlgorithm(format!(
                    "transforms on entry reference {uri}"
                )));
            }
            let data = self.container.entry(path).ok_or_else(outside)?;
            let digest = data.digest(reference.algorithm).ok_or_else(outside)?;
            (digest, Some(path.to_string()))
        } else {
            return Err(outside());
        };

        if actual != reference.digest {
            return Err(TrustError::ReferenceDigestMismatch {
                uri: uri.to_string(),
            });
        }
        Ok(covered)
    }

    /// Every message part must be covered, directly or through the signature
    /// hash chain.
    fn check_coverage(&self, covered: &HashSet<String>) -> Result<(), TrustError> {
        let parts: Vec<String> = self
            .container
            .message_part_names()
            .map(str::to_string)
            .collect();

        match &self.container.signature.hash_chain {
            Some(pair) => {
                if !covered.contains(SIG_HASH_CHAIN_RESULT_ENTRY) {
                    return Err(TrustError::MessageNotCovered {
                        part: SIG_HASH_CHAIN_RESULT_ENTRY.to_string(),
                    });
                }
                HashChainVerifier::new(self.container, SIG_HASH_CHAIN_ENTRY, parts)
                    .verify(pair.result.as_bytes(), pair.chain.as_bytes())
            }
            None => match parts.into_iter().find(|p| !covered.contains(p)) {
                Some(part) => Err(TrustError::MessageNotCovered { part }),
                None => Ok(()),
            },
        }
    }

    fn check_manifest(&self) -> Result<(), TrustError> {
        let Some(manifest) = &self.container.manifest else {
            return Ok(());
        };
        let root = XmlElement::parse(manifest.as_bytes())
            .map_err(|e| TrustError::MalformedSignature(format!("manifest: {e}")))?;
        let listed: HashSet<&str> = root
            .find_all("file-entry")
            .into_iter()
            .filter_map(|e| e.attr("full-path"))
            .collect();
        match self
            .container
            .attachments
            .iter()
            .find(|a| !listed.contains(a.name.as_str()))
        {
            Some(missing) => Err(TrustError::AttachmentNotInManifest {
                name: missing.name.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Verifies `signature` over `data` with the certificate's public key.
pub fn verify_value(
    cert: &X509,
    method: SignatureMethod,
    data: &[u8],
    signature: &[u8],
) -> Result<(), TrustError> {
    let key = cert.public_key()?;
    let der;
    let signature = match method {
        SignatureMethod::Rsa(_) => signature,
        SignatureMethod::Ecdsa(_) => {
            // XML signatures carry r || s; OpenSSL wants DER.
            if signature.is_empty() || signature.len() % 2 != 0 {
                return Err(TrustError::InvalidSignatureValue);
            }
            let (r, s) = signature.split_at(signature.len() / 2);
            let (r, s) = (BigNum::from_slice(r)?, BigNum::from_slice(s)?);
            der = EcdsaSig::from_private_components(r, s)?.to_der()?;
            &der
        }
    };

    let mut verifier = Verifier::new(method.digest().message_digest(), &key)?;
    verifier.update(data)?;
    if verifier.verify(signature).unwrap_or(false) {
        Ok(())
    } else {
        Err(TrustError::InvalidSignatureValue)
    }
}
