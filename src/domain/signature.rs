//! XAdES-shaped signature document.
//!
//! Only the subset needed for verification is modelled: `SignedInfo` with its
//! canonicalization method and references, the signature value, the signing
//! certificate, the signing time from the `SignedProperties` that `SignedInfo`
//! references, and the unsigned properties carrying extra certificates, OCSP
//! responses and signature timestamps.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};

use crate::domain::c14n::Canonicalizer;
use crate::domain::crypto::{CertChain, SigningCert};
use crate::domain::xml::XmlElement;
use crate::infra::error::TrustError;
use crate::HashAlgorithm;

const ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

/// Signature algorithm from `ds:SignatureMethod`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureMethod {
    Rsa(HashAlgorithm),
    Ecdsa(HashAlgorithm),
}

impl SignatureMethod {
    pub fn from_uri(uri: &str) -> Result<Self, TrustError> {
        const BASE: &str = "http://www.w3.org/2001/04/xmldsig-more#";
        let method = uri
            .strip_prefix(BASE)
            .and_then(|m| match m {
                "rsa-sha256" => Some(SignatureMethod::Rsa(HashAlgorithm::Sha256)),
                "rsa-sha384" => Some(SignatureMethod::Rsa(HashAlgorithm::Sha384)),
                "rsa-sha512" => Some(SignatureMethod::Rsa(HashAlgorithm::Sha512)),
                "ecdsa-sha256" => Some(SignatureMethod::Ecdsa(HashAlgorithm::Sha256)),
                "ecdsa-sha384" => Some(SignatureMethod::Ecdsa(HashAlgorithm::Sha384)),
                "ecdsa-sha512" => Some(SignatureMethod::Ecdsa(HashAlgorithm::Sha512)),
                _ => None,
            });
        method.ok_or_else(|| TrustError::UnsupportedAlgorithm(uri.to_string()))
    }

    #[must_use]
    pub fn digest(&self) -> HashAlgorithm {
        match self {
            SignatureMethod::Rsa(h) | SignatureMethod::Ecdsa(h) => *h,
        }
    }
}

/// One `ds:Transform` of a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transform {
    EnvelopedSignature,
    Canonicalize(Canonicalizer),
}

impl Transform {
    fn parse(element: &XmlElement) -> Result<Self, TrustError> {
        let uri = element
            .attr("Algorithm")
            .ok_or_else(|| TrustError::MissingElement("Transform@Algorithm".into()))?;
        if uri == ENVELOPED_SIGNATURE {
            return Ok(Transform::EnvelopedSignature);
        }
        Canonicalizer::from_uri(uri, Some(element)).map(Transform::Canonicalize)
    }
}

/// One `ds:Reference` of `SignedInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureReference {
    pub uri: String,
    pub algorithm: HashAlgorithm,
    pub digest: Vec<u8>,
    pub transforms: Vec<Transform>,
}

/// Parsed signature document.
#[derive(Debug, Clone)]
pub struct SignatureDocument {
    root: XmlElement,
    canonicalizer: Canonicalizer,
    pub method: SignatureMethod,
    pub references: Vec<SignatureReference>,
    pub signature_value: Vec<u8>,
    pub chain: CertChain,
    /// `Id` of the signed `SignedProperties` element.
    pub signed_properties_id: String,
    pub signing_time: DateTime<Utc>,
    pub ocsp_responses: Vec<Vec<u8>>,
    pub timestamps: Vec<Vec<u8>>,
}

pub(crate) fn decode_base64(element: &XmlElement) -> Result<Vec<u8>, TrustError> {
    let compact: String = element.text().split_whitespace().collect();
    STANDARD.decode(compact.as_bytes()).map_err(|e| {
        TrustError::MalformedSignature(format!("{}: invalid base64: {e}", element.name))
    })
}

fn required<'a>(parent: &'a XmlElement, name: &str) -> Result<&'a XmlElement, TrustError> {
    parent
        .find(name)
        .ok_or_else(|| TrustError::MissingElement(name.to_string()))
}

fn algorithm_of<'a>(element: &'a XmlElement, what: &str) -> Result<&'a str, TrustError> {
    element
        .attr("Algorithm")
        .ok_or_else(|| TrustError::MissingElement(format!("{what}@Algorithm")))
}

fn parse_reference(reference: &XmlElement) -> Result<SignatureReference, TrustError> {
    let uri = reference
        .attr("URI")
        .ok_or_else(|| TrustError::MissingElement("Reference@URI".into()))?;
    let algo_uri = algorithm_of(required(reference, "DigestMethod")?, "DigestMethod")?;
    let algorithm = HashAlgorithm::from_uri(algo_uri)
        .ok_or_else(|| TrustError::UnsupportedAlgorithm(algo_uri.to_string()))?;
    let transforms = match reference.child("Transforms") {
        Some(list) => list
            .children_named("Transform")
            .map(Transform::parse)
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    Ok(SignatureReference {
        uri: uri.to_string(),
        algorithm,
        digest: decode_base64(required(reference, "DigestValue")?)?,
        transforms,
    })
}

impl SignatureDocument {
    pub fn parse(xml: &[u8]) -> Result<Self, TrustError> {
        let root = XmlElement::parse(xml)
            .map_err(|e| TrustError::MalformedSignature(e.to_string()))?;
        let signature = required(&root, "Signature")?;

        let signed_info = signature
            .child("SignedInfo")
            .ok_or_else(|| TrustError::MissingElement("SignedInfo".to_string()))?;
        let c14n = signed_info
            .child("CanonicalizationMethod")
            .ok_or_else(|| TrustError::MissingElement("CanonicalizationMethod".to_string()))?;
        let canonicalizer =
            Canonicalizer::from_uri(algorithm_of(c14n, "CanonicalizationMethod")?, Some(c14n))?;
        let method = SignatureMethod::from_uri(algorithm_of(
            required(signed_info, "SignatureMethod")?,
            "SignatureMethod",
        )?)?;

        let references = signed_info
            .children_named("Reference")
            .map(parse_reference)
            .collect::<Result<Vec<_>, _>>()?;
        if references.is_empty() {
            return Err(TrustError::MissingElement("Reference".to_string()));
        }

        // Only the SignedProperties covered by a reference count.
        let signed_properties_id = references
            .iter()
            .filter_map(|r| r.uri.strip_prefix('#'))
            .find(|id| {
                root.find_by_id(id)
                    .is_some_and(|e| e.name == "SignedProperties")
            })
            .ok_or_else(|| {
                TrustError::MissingElement("reference to SignedProperties".to_string())
            })?
            .to_string();
        let signed_properties = root
            .find_by_id(&signed_properties_id)
            .ok_or_else(|| TrustError::MissingElement("SignedProperties".to_string()))?;

        let signing_time_text = required(signed_properties, "SigningTime")?.text();
        let signing_time = DateTime::parse_from_rfc3339(signing_time_text)
            .map_err(|e| {
                TrustError::MalformedSignature(format!(
                    "SigningTime '{signing_time_text}': {e}"
                ))
            })?
            .with_timezone(&Utc);

        let signature_value = decode_base64(
            signature
                .child("SignatureValue")
                .ok_or_else(|| TrustError::MissingElement("SignatureValue".to_string()))?,
        )?;

        let key_info = required(signature, "KeyInfo")?;
        let leaf = SigningCert::from_der(decode_base64(required(key_info, "X509Certificate")?)?);
        let extra = match signature.find("CertificateValues") {
            Some(values) => values
                .children_named("EncapsulatedX509Certificate")
                .map(decode_base64)
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        let ocsp_responses = signature
            .find_all("EncapsulatedOCSPValue")
            .into_iter()
            .map(decode_base64)
            .collect::<Result<Vec<_>, _>>()?;
        let timestamps = signature
            .find_all("SignatureTimeStamp")
            .into_iter()
            .filter_map(|ts| ts.child("EncapsulatedTimeStamp"))
            .map(decode_base64)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            canonicalizer,
            method,
            references,
            signature_value,
            chain: CertChain::new(leaf).with_extra(extra),
            signed_properties_id,
            signing_time,
            ocsp_responses,
            timestamps,
            root,
        })
    }

    /// Canonical `ds:SignedInfo`, the data covered by the signature value.
    pub fn signed_info_bytes(&self) -> Result<Vec<u8>, TrustError> {
        let missing = |name: &str| TrustError::MissingElement(name.to_string());
        let mut path = self
            .root
            .path_to_first("Signature")
            .ok_or_else(|| missing("Signature"))?;
        let signed_info = path
            .last()
            .copied()
            .and_then(|signature| signature.child("SignedInfo"))
            .ok_or_else(|| missing("SignedInfo"))?;
        path.push(signed_info);
        self.canonicalizer.canonicalize(&path, None)
    }

    /// Octets a same-document `#id` reference digests: the element with that
    /// `Id`, transformed and canonicalized (Canonical XML 1.0 when no
    /// canonicalization transform is given). Comments never survive a
    /// bare-name reference. `None` when the id does not resolve to exactly
    /// one element.
    pub fn reference_bytes(
        &self,
        id: &str,
        transforms: &[Transform],
    ) -> Result<Option<Vec<u8>>, TrustError> {
        let Some(path) = self.root.path_by_id(id) else {
            return Ok(None);
        };
        let mut skip = None;
        let mut canonicalizer = Canonicalizer::default();
        for transform in transforms {
            match transform {
                Transform::EnvelopedSignature => skip = self.root.find("Signature"),
                Transform::Canonicalize(c) => canonicalizer = c.clone(),
            }
        }
        canonicalizer
            .without_comments()
            .canonicalize(&path, skip)
            .map(Some)
    }
}
