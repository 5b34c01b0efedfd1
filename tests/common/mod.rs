//! Shared helpers for integration tests.
//!
//! Builds signed containers and sealed archives from the certificates in
//! `tests/fixtures`. The CA, signer, OCSP responder and TSA certificates
//! become valid at 2026-10-19T18:39:48Z; tests sign at 18:39:50Z and judge
//! freshness against a fixed clock of 2026-10-20T00:00:00Z.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use archive_verifier::domain::container::schema::{
    ASIC_MANIFEST_ENTRY, MANIFEST_ENTRY, SIGNATURE_ENTRY, SIG_HASH_CHAIN_ENTRY,
    SIG_HASH_CHAIN_RESULT_ENTRY, TIMESTAMP_ENTRY, TS_HASH_CHAIN_ENTRY,
    TS_HASH_CHAIN_RESULT_ENTRY,
};
use archive_verifier::domain::hashchain::{
    digest_list, HashChain, HashChainResult, HashStep, HashStepValue,
};
use archive_verifier::services::container_codec::{seal_archive, ContainerCodec};
use archive_verifier::{ContainerContents, HashAlgorithm, PrevDigest, TrustContext};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use der::asn1::{GeneralizedTime, OctetString};
use der::oid::ObjectIdentifier;
use der::{Any, Encode, Sequence};
use openssl::cms::{CMSOptions, CmsContentInfo};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::sign::Signer;
use openssl::x509::X509;
use x509_cert::spki::AlgorithmIdentifierOwned;

pub const SIGNING_TIME: &str = "2026-10-19T18:39:50Z";
pub const NOW: &str = "2026-10-20T00:00:00Z";

const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
const C14N_11: &str = "http://www.w3.org/2006/12/xml-c14n11";
const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

const ASIC_NS: &str = r#"xmlns:asic="http://uri.etsi.org/02918/v1.2.1#""#;
const DS_NS: &str = r#"xmlns:ds="http://www.w3.org/2000/09/xmldsig#""#;
const XADES_NS: &str = r#"xmlns:xades="http://uri.etsi.org/01903/v1.3.2#""#;
const ALGO: HashAlgorithm = HashAlgorithm::Sha256;

pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

pub fn fixture(name: &str) -> Vec<u8> {
    std::fs::read(fixture_path(name)).unwrap()
}

pub fn cert(name: &str) -> X509 {
    X509::from_pem(&fixture(&format!("{name}.pem"))).unwrap()
}

pub fn key(name: &str) -> PKey<Private> {
    PKey::private_key_from_pem(&fixture(&format!("{name}.key"))).unwrap()
}

pub fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

/// CA and TSA trusted, clock fixed at [`NOW`].
pub fn trust() -> TrustContext {
    TrustContext::new()
        .with_ca(cert("ca"))
        .with_tsa(cert("tsa"))
        .with_fixed_now(at(NOW))
}

fn b64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

#[derive(Sequence)]
struct Imprint {
    algorithm: AlgorithmIdentifierOwned,
    hashed: OctetString,
}

#[derive(Sequence)]
struct TstInfo {
    version: u8,
    policy: ObjectIdentifier,
    imprint: Imprint,
    serial: u32,
    gen_time: GeneralizedTime,
}

/// RFC 3161 style token over `content`, signed by the fixture TSA.
pub fn timestamp_token(content: &[u8], gen_time: DateTime<Utc>) -> Vec<u8> {
    timestamp_token_by(content, gen_time, "tsa")
}

pub fn timestamp_token_by(content: &[u8], gen_time: DateTime<Utc>, signer: &str) -> Vec<u8> {
    let tst = TstInfo {
        version: 1,
        policy: ObjectIdentifier::new_unwrap("1.2.3.4.1"),
        imprint: Imprint {
            algorithm: AlgorithmIdentifierOwned {
                oid: ALGO.oid(),
                parameters: Some(Any::null()),
            },
            hashed: OctetString::new(ALGO.digest(content)).unwrap(),
        },
        serial: 1,
        gen_time: GeneralizedTime::from_unix_duration(Duration::from_secs(
            gen_time.timestamp() as u64,
        ))
        .unwrap(),
    }
    .to_der()
    .unwrap();
    let cert = cert(signer);
    let key = key(signer);
    CmsContentInfo::sign(Some(&*cert), Some(&*key), None, Some(&tst), CMSOptions::BINARY)
        .unwrap()
        .to_der()
        .unwrap()
}

/// Where the container timestamp, if any, lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampMode {
    None,
    /// `SignatureTimeStamp` inside the signature's unsigned properties.
    Embedded,
    /// Container token over an ASiC manifest referencing the signature.
    AsicManifest,
    /// Container token over a timestamp hash chain result.
    HashChain,
}

/// Builder for a correctly signed container. Knobs break it on purpose.
#[derive(Debug, Clone)]
pub struct SignedContainer {
    message: String,
    attachments: Vec<Vec<u8>>,
    signer: &'static str,
    ocsp: Option<&'static str>,
    timestamp: TimestampMode,
    batch: bool,
    signing_time: String,
    gen_time: String,
    extra_reference: Option<String>,
    canonicalization: &'static str,
    forged_signing_time: Option<String>,
    reference_signed_properties: bool,
}

impl SignedContainer {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            attachments: Vec::new(),
            signer: "signer",
            ocsp: Some("ocsp-good.der"),
            timestamp: TimestampMode::AsicManifest,
            batch: false,
            signing_time: SIGNING_TIME.to_string(),
            gen_time: "2026-10-19T18:40:00Z".to_string(),
            extra_reference: None,
            canonicalization: C14N_11,
            forged_signing_time: None,
            reference_signed_properties: true,
        }
    }

    pub fn attachment(mut self, data: &[u8]) -> Self {
        self.attachments.push(data.to_vec());
        self
    }

    pub fn signer(mut self, signer: &'static str) -> Self {
        self.signer = signer;
        self
    }

    pub fn ocsp(mut self, ocsp: Option<&'static str>) -> Self {
        self.ocsp = ocsp;
        self
    }

    pub fn timestamp(mut self, mode: TimestampMode) -> Self {
        self.timestamp = mode;
        self
    }

    /// Signs a hash chain over the message parts instead of the parts.
    pub fn batch(mut self) -> Self {
        self.batch = true;
        self
    }

    pub fn gen_time(mut self, gen_time: &str) -> Self {
        self.gen_time = gen_time.to_string();
        self
    }

    /// Adds a signed reference with an arbitrary URI and digest of `data`.
    pub fn extra_reference(mut self, uri: &str) -> Self {
        self.extra_reference = Some(uri.to_string());
        self
    }

    /// `CanonicalizationMethod` of `SignedInfo`. Only inclusive 1.1 and
    /// exclusive c14n are signed correctly; anything else is left for the
    /// verifier to reject.
    pub fn canonicalization(mut self, uri: &'static str) -> Self {
        self.canonicalization = uri;
        self
    }

    /// Puts an unsigned `SigningTime` into `KeyInfo`, ahead of the signed one.
    pub fn forged_signing_time(mut self, time: &str) -> Self {
        self.forged_signing_time = Some(time.to_string());
        self
    }

    pub fn without_signed_properties_reference(mut self) -> Self {
        self.reference_signed_properties = false;
        self
    }

    fn attachment_names(&self) -> Vec<String> {
        (1..=self.attachments.len())
            .map(|n| format!("attachment{n}"))
            .collect()
    }

    /// Raw container entries, ready for the codec.
    pub fn contents(&self) -> ContainerContents {
        let mut contents = ContainerContents::new(self.message.clone(), Vec::new());
        for data in &self.attachments {
            contents = contents.with_attachment(data.clone());
        }
        if !self.attachments.is_empty() {
            contents = contents.with_entry(MANIFEST_ENTRY, self.manifest());
        }

        let mut references = Vec::new();
        if self.batch {
            let (result, chain) = self.message_hash_chain();
            references.push((
                format!("/{SIG_HASH_CHAIN_RESULT_ENTRY}"),
                ALGO.digest(result.as_bytes()),
            ));
            contents = contents
                .with_entry(SIG_HASH_CHAIN_RESULT_ENTRY, result)
                .with_entry(SIG_HASH_CHAIN_ENTRY, chain);
        } else {
            references.push(("/message.xml".to_string(), ALGO.digest(self.message.as_bytes())));
            for (name, data) in self.attachment_names().iter().zip(&self.attachments) {
                references.push((format!("/{name}"), ALGO.digest(data)));
            }
        }
        if let Some(uri) = &self.extra_reference {
            references.push((uri.clone(), ALGO.digest(b"elsewhere")));
        }

        let signature = self.signature_xml(&references);
        contents = contents.with_entry(SIGNATURE_ENTRY, signature.clone());

        match self.timestamp {
            TimestampMode::None | TimestampMode::Embedded => contents,
            TimestampMode::AsicManifest => {
                let manifest = asic_manifest(signature.as_bytes());
                let token = timestamp_token(manifest.as_bytes(), at(&self.gen_time));
                contents
                    .with_entry(ASIC_MANIFEST_ENTRY, manifest)
                    .with_entry(TIMESTAMP_ENTRY, token)
            }
            TimestampMode::HashChain => {
                let (result, chain) = hash_chain(vec![data_ref(
                    &format!("/{SIGNATURE_ENTRY}"),
                    signature.as_bytes(),
                )], TS_HASH_CHAIN_ENTRY);
                let token = timestamp_token(result.as_bytes(), at(&self.gen_time));
                contents
                    .with_entry(TIMESTAMP_ENTRY, token)
                    .with_entry(TS_HASH_CHAIN_RESULT_ENTRY, result)
                    .with_entry(TS_HASH_CHAIN_ENTRY, chain)
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        ContainerCodec::encode(&self.contents()).unwrap()
    }

    fn manifest(&self) -> String {
        let mut xml = String::from(
            r#"<manifest:manifest xmlns:manifest="urn:oasis:names:tc:opendocument:xmlns:manifest:1.0"><manifest:file-entry manifest:full-path="/" manifest:media-type="application/vnd.etsi.asic-e+zip"/><manifest:file-entry manifest:full-path="message.xml" manifest:media-type="text/xml"/>"#,
        );
        for name in self.attachment_names() {
            xml.push_str(&format!(
                r#"<manifest:file-entry manifest:full-path="{name}" manifest:media-type="application/octet-stream"/>"#
            ));
        }
        xml.push_str("</manifest:manifest>");
        xml
    }

    fn message_hash_chain(&self) -> (String, String) {
        let mut values = vec![data_ref("/message.xml", self.message.as_bytes())];
        for (name, data) in self.attachment_names().iter().zip(&self.attachments) {
            values.push(data_ref(&format!("/{name}"), data));
        }
        hash_chain(values, SIG_HASH_CHAIN_ENTRY)
    }

    /// `SignedProperties` as written, and in the canonical form its
    /// reference digests: c14n 1.0 with the document's namespaces.
    fn signed_properties(&self) -> (String, String) {
        let body = format!(
            "<xades:SignedSignatureProperties><xades:SigningTime>{}</xades:SigningTime>\
             </xades:SignedSignatureProperties></xades:SignedProperties>",
            self.signing_time
        );
        (
            format!(r#"<xades:SignedProperties Id="signed-properties">{body}"#),
            format!(
                r#"<xades:SignedProperties {ASIC_NS} {DS_NS} {XADES_NS} Id="signed-properties">{body}"#
            ),
        )
    }

    /// `SignedInfo` as written (`canonical == false`) or in the form the
    /// signature value covers.
    fn signed_info(&self, references: &[(String, Vec<u8>)], canonical: bool) -> String {
        let empty = |name: &str, attrs: String| {
            if canonical {
                format!("<{name} {attrs}></{name}>")
            } else {
                format!("<{name} {attrs}/>")
            }
        };
        let start = match (canonical, self.canonicalization) {
            (false, _) => "<ds:SignedInfo>".to_string(),
            (true, EXC_C14N) => format!("<ds:SignedInfo {DS_NS}>"),
            (true, _) => format!("<ds:SignedInfo {ASIC_NS} {DS_NS} {XADES_NS}>"),
        };

        let mut xml = start;
        xml.push_str(&empty(
            "ds:CanonicalizationMethod",
            format!(r#"Algorithm="{}""#, self.canonicalization),
        ));
        xml.push_str(&empty("ds:SignatureMethod", format!(r#"Algorithm="{RSA_SHA256}""#)));
        for (uri, digest) in references {
            xml.push_str(&format!(r#"<ds:Reference URI="{uri}">"#));
            xml.push_str(&empty("ds:DigestMethod", format!(r#"Algorithm="{}""#, ALGO.uri())));
            xml.push_str(&format!(
                "<ds:DigestValue>{}</ds:DigestValue></ds:Reference>",
                b64(digest)
            ));
        }
        xml.push_str("</ds:SignedInfo>");
        xml
    }

    fn signature_xml(&self, references: &[(String, Vec<u8>)]) -> String {
        let (signed_properties, canonical_properties) = self.signed_properties();
        let mut references = references.to_vec();
        if self.reference_signed_properties {
            references.push((
                "#signed-properties".to_string(),
                ALGO.digest(canonical_properties.as_bytes()),
            ));
        }
        let signed_info = self.signed_info(&references, false);

        let key = key(self.signer);
        let mut signer = Signer::new(MessageDigest::sha256(), &key).unwrap();
        signer
            .update(self.signed_info(&references, true).as_bytes())
            .unwrap();
        let signature_value = signer.sign_to_vec().unwrap();

        let mut unsigned = String::new();
        if self.timestamp == TimestampMode::Embedded {
            let token = timestamp_token(&signature_value, at(&self.gen_time));
            unsigned.push_str(&format!(
                "<xades:SignatureTimeStamp><xades:EncapsulatedTimeStamp>{}</xades:EncapsulatedTimeStamp></xades:SignatureTimeStamp>",
                b64(&token)
            ));
        }
        if let Some(ocsp) = self.ocsp {
            unsigned.push_str(&format!(
                "<xades:RevocationValues><xades:OCSPValues><xades:EncapsulatedOCSPValue>{}</xades:EncapsulatedOCSPValue></xades:OCSPValues></xades:RevocationValues>",
                b64(&fixture(ocsp))
            ));
        }
        let unsigned = if unsigned.is_empty() {
            unsigned
        } else {
            format!(
                "<xades:UnsignedProperties><xades:UnsignedSignatureProperties>{unsigned}</xades:UnsignedSignatureProperties></xades:UnsignedProperties>"
            )
        };

        let forged = self
            .forged_signing_time
            .as_ref()
            .map(|time| format!("<xades:SigningTime>{time}</xades:SigningTime>"))
            .unwrap_or_default();
        let cert = cert(self.signer).to_der().unwrap();
        format!(
            r#"<asic:XAdESSignatures {ASIC_NS} {DS_NS} {XADES_NS}><ds:Signature Id="signature">{signed_info}<ds:SignatureValue>{}</ds:SignatureValue><ds:KeyInfo>{forged}<ds:X509Data><ds:X509Certificate>{}</ds:X509Certificate></ds:X509Data></ds:KeyInfo><ds:Object><xades:QualifyingProperties Target="signature">{signed_properties}{unsigned}</xades:QualifyingProperties></ds:Object></ds:Signature></asic:XAdESSignatures>"#,
            b64(&signature_value),
            b64(&cert)
        )
    }
}

pub fn data_ref(uri: &str, data: &[u8]) -> HashStepValue {
    HashStepValue::DataRef {
        uri: uri.to_string(),
        algorithm: None,
        digest: ALGO.digest(data),
    }
}

/// Two-step chain: STEP0 holds `values` plus a reference to STEP1, which
/// holds an unrelated batch member. Returns `(result_xml, chain_xml)`.
pub fn hash_chain(mut values: Vec<HashStepValue>, chain_entry: &str) -> (String, String) {
    let sibling = HashStepValue::Hash {
        algorithm: None,
        digest: ALGO.digest(b"another batch member"),
    };
    let step1_bytes = digest_list(&[(ALGO, ALGO.digest(b"another batch member"))]).unwrap();
    values.push(HashStepValue::StepRef {
        uri: "#STEP1".to_string(),
        algorithm: None,
    });

    let resolved: Vec<(HashAlgorithm, Vec<u8>)> = values
        .iter()
        .map(|value| match value {
            HashStepValue::Hash { digest, .. } | HashStepValue::DataRef { digest, .. } => {
                (ALGO, digest.clone())
            }
            HashStepValue::StepRef { .. } => (ALGO, ALGO.digest(&step1_bytes)),
        })
        .collect();
    let step0_bytes = digest_list(&resolved).unwrap();

    let chain = HashChain {
        default_algorithm: ALGO,
        steps: vec![
            HashStep {
                id: "STEP0".to_string(),
                values,
            },
            HashStep {
                id: "STEP1".to_string(),
                values: vec![sibling],
            },
        ],
    };
    let result = HashChainResult {
        algorithm: ALGO,
        digest: ALGO.digest(&step0_bytes),
        uri: format!("/{chain_entry}#STEP0"),
    };
    (result.to_xml(), chain.to_xml())
}

/// ASiC manifest binding the container timestamp to the signature entry.
pub fn asic_manifest(signature: &[u8]) -> String {
    format!(
        r#"<asic:ASiCManifest xmlns:asic="http://uri.etsi.org/02918/v1.2.1#" xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><asic:SigReference URI="{TIMESTAMP_ENTRY}" MimeType="application/vnd.etsi.timestamp-token"/><asic:DataObjectReference URI="{SIGNATURE_ENTRY}"><ds:DigestMethod Algorithm="{}"/><ds:DigestValue>{}</ds:DigestValue></asic:DataObjectReference></asic:ASiCManifest>"#,
        ALGO.uri(),
        b64(&ALGO.digest(signature))
    )
}

/// Seals `containers` into an archive. Returns the bytes and final digest.
pub fn archive(containers: &[(&str, Vec<u8>)], prev: &PrevDigest) -> (Vec<u8>, String) {
    let owned: Vec<(String, Vec<u8>)> = containers
        .iter()
        .map(|(name, data)| (name.to_string(), data.clone()))
        .collect();
    seal_archive(&owned, prev, None, ALGO).unwrap()
}
