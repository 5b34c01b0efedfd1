//! Hash chain documents used by batch signatures and batch timestamps.
//!
//! A `HashChainResult` names the last step of a `HashChain` and carries the
//! signed digest of that step. Each step is a list of values; the step's
//! bytes are the DER encoding of the values as a `SEQUENCE OF DigestInfo`.

use der::asn1::OctetString;
use der::{Any, Encode, Sequence};
use x509_cert::spki::AlgorithmIdentifierOwned;

use crate::domain::signature::decode_base64;
use crate::domain::xml::XmlElement;
use crate::infra::error::TrustError;
use crate::HashAlgorithm;

const XMLDSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
const HASHCHAIN_NS: &str = "http://x-road.eu/xsd/hashchain.xsd";

fn malformed(reason: impl Into<String>) -> TrustError {
    TrustError::HashChain(reason.into())
}

fn algorithm_of(element: &XmlElement) -> Result<Option<HashAlgorithm>, TrustError> {
    let method = element
        .child("DigestMethod")
        .or_else(|| element.child("DefaultDigestMethod"));
    let Some(method) = method else {
        return Ok(None);
    };
    let uri = method.attr("Algorithm").unwrap_or_default();
    HashAlgorithm::from_uri(uri)
        .map(Some)
        .ok_or_else(|| TrustError::UnsupportedAlgorithm(uri.to_string()))
}

fn digest_of(element: &XmlElement) -> Result<Vec<u8>, TrustError> {
    let value = element
        .child("DigestValue")
        .ok_or_else(|| malformed(format!("{} without DigestValue", element.name)))?;
    decode_base64(value)
}

/// Signed summary of a hash chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashChainResult {
    pub algorithm: HashAlgorithm,
    pub digest: Vec<u8>,
    /// Reference to the last hash step, e.g. `/META-INF/hashchain.xml#STEP0`.
    pub uri: String,
}

impl HashChainResult {
    pub fn parse(xml: &[u8]) -> Result<Self, TrustError> {
        let root = XmlElement::parse(xml).map_err(|e| malformed(e.to_string()))?;
        if root.name != "HashChainResult" {
            return Err(malformed(format!("unexpected root element {}", root.name)));
        }
        let algorithm =
            algorithm_of(&root)?.ok_or_else(|| malformed("HashChainResult without DigestMethod"))?;
        let uri = root
            .attr("URI")
            .map(str::to_string)
            .or_else(|| root.child("URI").map(|u| u.text().to_string()))
            .ok_or_else(|| malformed("HashChainResult without URI"))?;
        Ok(Self {
            algorithm,
            digest: digest_of(&root)?,
            uri,
        })
    }

    #[must_use]
    pub fn to_xml(&self) -> String {
        format!(
            r#"<HashChainResult xmlns="{HASHCHAIN_NS}" xmlns:ds="{XMLDSIG_NS}" URI="{}"><ds:DigestMethod Algorithm="{}"/><ds:DigestValue>{}</ds:DigestValue></HashChainResult>"#,
            self.uri,
            self.algorithm.uri(),
            base64_text(&self.digest)
        )
    }
}

/// One value inside a hash step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashStepValue {
    /// Literal digest.
    Hash {
        algorithm: Option<HashAlgorithm>,
        digest: Vec<u8>,
    },
    /// Digest of another step's DigestList.
    StepRef {
        uri: String,
        algorithm: Option<HashAlgorithm>,
    },
    /// Digest of referenced data.
    DataRef {
        uri: String,
        algorithm: Option<HashAlgorithm>,
        digest: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashStep {
    pub id: String,
    pub values: Vec<HashStepValue>,
}

/// Parsed hash chain document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashChain {
    pub default_algorithm: HashAlgorithm,
    pub steps: Vec<HashStep>,
}

impl HashChain {
    pub fn parse(xml: &[u8]) -> Result<Self, TrustError> {
        let root = XmlElement::parse(xml).map_err(|e| malformed(e.to_string()))?;
        if root.name != "HashChain" {
            return Err(malformed(format!("unexpected root element {}", root.name)));
        }
        let default_algorithm =
            algorithm_of(&root)?.ok_or_else(|| malformed("HashChain without DefaultDigestMethod"))?;

        let mut steps = Vec::new();
        for step in root.children_named("HashStep") {
            let id = step
                .attr("id")
                .or_else(|| step.attr("Id"))
                .ok_or_else(|| malformed("HashStep without id"))?;
            let mut values = Vec::new();
            for value in &step.children {
                let uri = || {
                    value
                        .attr("URI")
                        .map(str::to_string)
                        .ok_or_else(|| malformed(format!("{} without URI", value.name)))
                };
                values.push(match value.name.as_str() {
                    "HashValue" => HashStepValue::Hash {
                        algorithm: algorithm_of(value)?,
                        digest: digest_of(value)?,
                    },
                    "StepRef" => HashStepValue::StepRef {
                        uri: uri()?,
                        algorithm: algorithm_of(value)?,
                    },
                    "DataRef" => {
                        if value.child("Transforms").is_some() {
                            return Err(malformed("DataRef transforms are not supported"));
                        }
                        HashStepValue::DataRef {
                            uri: uri()?,
                            algorithm: algorithm_of(value)?,
                            digest: digest_of(value)?,
                        }
                    }
                    other => return Err(malformed(format!("unexpected hash step value {other}"))),
                });
            }
            steps.push(HashStep {
                id: id.to_string(),
                values,
            });
        }
        Ok(Self {
            default_algorithm,
            steps,
        })
    }

    #[must_use]
    pub fn step(&self, id: &str) -> Option<&HashStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = format!(
            r#"<HashChain xmlns="{HASHCHAIN_NS}" xmlns:ds="{XMLDSIG_NS}"><DefaultDigestMethod Algorithm="{}"/>"#,
            self.default_algorithm.uri()
        );
        for step in &self.steps {
            out.push_str(&format!(r#"<HashStep id="{}">"#, step.id));
            for value in &step.values {
                let method = |algo: &Option<HashAlgorithm>| {
                    algo.map(|a| format!(r#"<ds:DigestMethod Algorithm="{}"/>"#, a.uri()))
                        .unwrap_or_default()
                };
                match value {
                    HashStepValue::Hash { algorithm, digest } => out.push_str(&format!(
                        "<HashValue>{}<ds:DigestValue>{}</ds:DigestValue></HashValue>",
                        method(algorithm),
                        base64_text(digest)
                    )),
                    HashStepValue::StepRef { uri, algorithm } => out.push_str(&format!(
                        r#"<StepRef URI="{uri}">{}</StepRef>"#,
                        method(algorithm)
                    )),
                    HashStepValue::DataRef {
                        uri,
                        algorithm,
                        digest,
                    } => out.push_str(&format!(
                        r#"<DataRef URI="{uri}">{}<ds:DigestValue>{}</ds:DigestValue></DataRef>"#,
                        method(algorithm),
                        base64_text(digest)
                    )),
                }
            }
            out.push_str("</HashStep>");
        }
        out.push_str("</HashChain>");
        out
    }
}

fn base64_text(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct DigestInfo {
    algorithm: AlgorithmIdentifierOwned,
    digest: OctetString,
}

/// DER `SEQUENCE OF DigestInfo` over the resolved values of a hash step.
pub fn digest_list(values: &[(HashAlgorithm, Vec<u8>)]) -> Result<Vec<u8>, TrustError> {
    let infos = values
        .iter()
        .map(|(algo, digest)| {
            Ok(DigestInfo {
                algorithm: AlgorithmIdentifierOwned {
                    oid: algo.oid(),
                    parameters: Some(Any::null()),
                },
                digest: OctetString::new(digest.clone())?,
            })
        })
        .collect::<Result<Vec<_>, der::Error>>()?;
    Ok(infos.to_der()?)
}
