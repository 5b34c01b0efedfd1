//! Timestamp token verification service.
//!
//! A token is a CMS SignedData whose content is a DER `TSTInfo`. The
//! signature must verify under one of the trusted TSA certificates; the
//! message imprint must match the timestamped bytes.

use chrono::{DateTime, NaiveDateTime, Utc};
use der::asn1::OctetStringRef;
use der::oid::ObjectIdentifier;
use der::{AnyRef, Decode, Reader, SliceReader, Tag, Tagged};
use openssl::cms::{CMSOptions, CmsContentInfo};
use openssl::stack::Stack;
use x509_cert::spki::AlgorithmIdentifierRef;

use crate::domain::trust::TrustContext;
use crate::domain::verdict::TimestampEvidence;
use crate::infra::error::TrustError;
use crate::services::cert_validator::subject_label;
use crate::HashAlgorithm;

fn invalid(reason: impl Into<String>) -> TrustError {
    TrustError::TimestampInvalid(reason.into())
}

/// Fields of `TSTInfo` that verification uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TstInfo {
    pub policy: ObjectIdentifier,
    pub imprint_algorithm: ObjectIdentifier,
    pub imprint: Vec<u8>,
    pub gen_time: DateTime<Utc>,
}

impl TstInfo {
    pub fn from_der(der: &[u8]) -> Result<Self, TrustError> {
        let mut reader = SliceReader::new(der)?;
        let (policy, imprint_algorithm, imprint, gen_time) = reader.sequence(|r| {
            let _version = u8::decode(r)?;
            let policy = ObjectIdentifier::decode(r)?;
            let (algorithm, imprint) = r.sequence(|r| {
                let algorithm = AlgorithmIdentifierRef::decode(r)?;
                let hashed = OctetStringRef::decode(r)?;
                Ok((algorithm.oid, hashed.as_bytes().to_vec()))
            })?;
            let _serial = AnyRef::decode(r)?;
            let gen_time = AnyRef::decode(r)?;
            if gen_time.tag() != Tag::GeneralizedTime {
                return Err(gen_time.tag().unexpected_error(Some(Tag::GeneralizedTime)));
            }
            let gen_time = String::from_utf8_lossy(gen_time.value()).into_owned();
            while !r.is_finished() {
                AnyRef::decode(r)?;
            }
            Ok((policy, algorithm, imprint, gen_time))
        })?;
        reader.finish(())?;

        // Fractional seconds are allowed in TSTInfo, unlike plain DER times.
        let gen_time = NaiveDateTime::parse_from_str(&gen_time, "%Y%m%d%H%M%S%.fZ")
            .map_err(|e| invalid(format!("genTime '{gen_time}': {e}")))?
            .and_utc();

        Ok(Self {
            policy,
            imprint_algorithm,
            imprint,
            gen_time,
        })
    }
}

pub struct TimestampVerifier<'t> {
    trust: &'t TrustContext,
}

impl<'t> TimestampVerifier<'t> {
    #[must_use]
    pub fn new(trust: &'t TrustContext) -> Self {
        Self { trust }
    }

    /// Verifies `token_der` over `content` and the signing time bound.
    pub fn verify(
        &self,
        token_der: &[u8],
        content: &[u8],
        signing_time: DateTime<Utc>,
    ) -> Result<TimestampEvidence, TrustError> {
        let (tst_der, tsa) = self.open(token_der)?;
        let info = TstInfo::from_der(&tst_der)?;

        let algorithm = HashAlgorithm::from_oid(&info.imprint_algorithm)
            .ok_or_else(|| TrustError::UnsupportedAlgorithm(info.imprint_algorithm.to_string()))?;
        if algorithm.digest(content) != info.imprint {
            return Err(TrustError::TimestampMismatch(format!(
                "{algorithm} message imprint differs"
            )));
        }

        if info.gen_time < signing_time {
            return Err(invalid(format!(
                "genTime {} precedes signing time {signing_time}",
                info.gen_time
            )));
        }
        if info.gen_time > self.trust.now() {
            return Err(invalid(format!("genTime {} is in the future", info.gen_time)));
        }

        log::debug!("Timestamp from {tsa} at {}", info.gen_time);
        Ok(TimestampEvidence {
            tsa,
            gen_time: info.gen_time,
        })
    }

    /// Verifies the CMS signature against each trusted TSA in turn and
    /// returns the signed content with the matching TSA's name.
    fn open(&self, token_der: &[u8]) -> Result<(Vec<u8>, String), TrustError> {
        if self.trust.tsa_certificates().is_empty() {
            return Err(invalid("no trusted TSA certificates configured"));
        }
        for tsa in self.trust.tsa_certificates() {
            let mut cms = CmsContentInfo::from_der(token_der)
                .map_err(|e| invalid(format!("undecodable token: {e}")))?;
            let mut certs = Stack::new()?;
            certs.push(tsa.clone())?;
            let mut content = Vec::new();
            let verified = cms.verify(
                Some(&*certs),
                None,
                None,
                Some(&mut content),
                CMSOptions::NOINTERN | CMSOptions::NO_SIGNER_CERT_VERIFY,
            );
            if verified.is_ok() {
                return Ok((content, subject_label(tsa)));
            }
        }
        Err(invalid("token is not signed by a trusted TSA"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use der::asn1::{GeneralizedTime, OctetString};
    use der::{Any, Encode, Sequence};
    use openssl::pkey::PKey;
    use openssl::x509::X509;
    use std::path::Path;
    use std::time::Duration;
    use x509_cert::spki::AlgorithmIdentifierOwned;

    #[derive(Sequence)]
    struct Imprint {
        algorithm: AlgorithmIdentifierOwned,
        hashed: OctetString,
    }

    #[derive(Sequence)]
    struct Tst {
        version: u8,
        policy: ObjectIdentifier,
        imprint: Imprint,
        serial: u32,
        gen_time: GeneralizedTime,
    }

    fn fixture(name: &str) -> Vec<u8> {
        std::fs::read(
            Path::new(env!("CARGO_MANIFEST_DIR"))
                .join("tests/fixtures")
                .join(name),
        )
        .unwrap()
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn token(content: &[u8], gen_time: DateTime<Utc>, key: &str, cert: &str) -> Vec<u8> {
        let tst = Tst {
            version: 1,
            policy: ObjectIdentifier::new_unwrap("1.2.3.4.1"),
            imprint: Imprint {
                algorithm: AlgorithmIdentifierOwned {
                    oid: HashAlgorithm::Sha256.oid(),
                    parameters: Some(Any::null()),
                },
                hashed: OctetString::new(HashAlgorithm::Sha256.digest(content)).unwrap(),
            },
            serial: 7,
            gen_time: GeneralizedTime::from_unix_duration(Duration::from_secs(
                gen_time.timestamp() as u64,
            ))
            .unwrap(),
        }
        .to_der()
        .unwrap();
        let cert = X509::from_pem(&fixture(cert)).unwrap();
        let key = PKey::private_key_from_pem(&fixture(key)).unwrap();
        CmsContentInfo::sign(Some(&*cert), Some(&*key), None, Some(&tst), CMSOptions::BINARY)
            .unwrap()
            .to_der()
            .unwrap()
    }

    fn trust() -> TrustContext {
        TrustContext::new()
            .with_tsa(X509::from_pem(&fixture("tsa.pem")).unwrap())
            .with_fixed_now(at("2026-10-20T00:00:00Z"))
    }

    const SIGNED_AT: &str = "2026-10-19T18:39:50Z";

    #[test]
    fn accepts_token_over_content() {
        let der = token(b"content", at("2026-10-19T18:40:00Z"), "tsa.key", "tsa.pem");
        let evidence = TimestampVerifier::new(&trust())
            .verify(&der, b"content", at(SIGNED_AT))
            .unwrap();
        assert_eq!(evidence.tsa, "Archive Test TSA");
        assert_eq!(evidence.gen_time, at("2026-10-19T18:40:00Z"));
    }

    #[test]
    fn imprint_mismatch() {
        let der = token(b"content", at("2026-10-19T18:40:00Z"), "tsa.key", "tsa.pem");
        let err = TimestampVerifier::new(&trust())
            .verify(&der, b"other content", at(SIGNED_AT))
            .unwrap_err();
        assert!(matches!(err, TrustError::TimestampMismatch(_)));
    }

    #[test]
    fn token_from_untrusted_signer() {
        let der = token(b"content", at("2026-10-19T18:40:00Z"), "ocsp.key", "ocsp.pem");
        let err = TimestampVerifier::new(&trust())
            .verify(&der, b"content", at(SIGNED_AT))
            .unwrap_err();
        assert!(matches!(err, TrustError::TimestampInvalid(m) if m.contains("trusted TSA")));
    }

    #[test]
    fn gen_time_before_signing_time() {
        let der = token(b"content", at("2026-10-19T18:39:00Z"), "tsa.key", "tsa.pem");
        let err = TimestampVerifier::new(&trust())
            .verify(&der, b"content", at(SIGNED_AT))
            .unwrap_err();
        assert!(matches!(err, TrustError::TimestampInvalid(m) if m.contains("precedes")));
    }

    #[test]
    fn gen_time_in_the_future() {
        let der = token(b"content", at("2026-10-21T00:00:00Z"), "tsa.key", "tsa.pem");
        let err = TimestampVerifier::new(&trust())
            .verify(&der, b"content", at(SIGNED_AT))
            .unwrap_err();
        assert!(matches!(err, TrustError::TimestampInvalid(m) if m.contains("future")));
    }

    #[test]
    fn garbage_token() {
        let err = TimestampVerifier::new(&trust())
            .verify(&[0x30], b"content", at(SIGNED_AT))
            .unwrap_err();
        assert!(matches!(err, TrustError::TimestampInvalid(_)));
    }
}
