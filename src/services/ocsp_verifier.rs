//! OCSP response verification for the signing certificate.
//!
//! Responses are embedded in the signature; nothing is fetched.

use chrono::{DateTime, NaiveDateTime, Utc};
use der::asn1::OctetStringRef;
use der::oid::{AssociatedOid, ObjectIdentifier};
use der::{AnyRef, Decode, Encode, Sequence};
use openssl::asn1::Asn1GeneralizedTimeRef;
use openssl::hash::MessageDigest;
use openssl::ocsp::{
    OcspBasicResponse, OcspCertId, OcspCertStatus, OcspFlag, OcspResponse, OcspResponseStatus,
};
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::{X509VerifyResult, X509};
use x509_cert::ext::pkix::ExtendedKeyUsage;
use x509_cert::Certificate;

use crate::domain::trust::TrustContext;
use crate::domain::verdict::OcspEvidence;
use crate::infra::error::TrustError;
use crate::services::cert_validator::{subject_label, ValidatedSigner};

const OCSP_SIGNING: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.9");

/// Outer `OCSPResponse`, only as deep as needed to reach the embedded
/// responder certificates.
#[derive(Sequence)]
struct ResponseEnvelope<'a> {
    status: AnyRef<'a>,
    #[asn1(context_specific = "0", optional = "true")]
    response_bytes: Option<ResponseBytes<'a>>,
}

#[derive(Sequence)]
struct ResponseBytes<'a> {
    response_type: ObjectIdentifier,
    response: OctetStringRef<'a>,
}

#[derive(Sequence)]
struct BasicResponseCerts<'a> {
    tbs_response_data: AnyRef<'a>,
    signature_algorithm: AnyRef<'a>,
    signature: AnyRef<'a>,
    #[asn1(context_specific = "0", optional = "true")]
    certs: Option<Vec<AnyRef<'a>>>,
}

/// Certificates shipped inside a basic OCSP response.
fn embedded_certs(response_der: &[u8]) -> Result<Vec<X509>, TrustError> {
    let envelope = ResponseEnvelope::from_der(response_der)?;
    let Some(bytes) = envelope.response_bytes else {
        return Ok(Vec::new());
    };
    let basic = BasicResponseCerts::from_der(bytes.response.as_bytes())?;
    basic
        .certs
        .unwrap_or_default()
        .iter()
        .map(|any| Ok(X509::from_der(&any.to_der()?)?))
        .collect()
}

pub struct OcspVerifier<'t> {
    trust: &'t TrustContext,
}

impl<'t> OcspVerifier<'t> {
    #[must_use]
    pub fn new(trust: &'t TrustContext) -> Self {
        Self { trust }
    }

    pub fn verify(
        &self,
        response_der: &[u8],
        signer: &ValidatedSigner,
        signing_time: DateTime<Utc>,
    ) -> Result<OcspEvidence, TrustError> {
        let response = OcspResponse::from_der(response_der)
            .map_err(|e| TrustError::OcspInvalid(format!("undecodable response: {e}")))?;
        if response.status() != OcspResponseStatus::SUCCESSFUL {
            return Err(TrustError::OcspInvalid(format!(
                "response status {}",
                response.status().as_raw()
            )));
        }
        let basic = response.basic()?;

        let embedded = embedded_certs(response_der)?;
        let responder = self.find_responder(&basic, &signer.issuer, &embedded)?;
        self.authorize(&responder, &signer.issuer)?;

        let serial = signer.identity.certificate_serial.clone();
        let id = OcspCertId::from_cert(MessageDigest::sha1(), &signer.leaf, &signer.issuer)?;
        let status = basic
            .find_status(&id)
            .ok_or_else(|| TrustError::CertificateStatusUnknown {
                serial: serial.clone(),
            })?;
        if status.status == OcspCertStatus::REVOKED {
            return Err(TrustError::CertificateRevoked { serial });
        }
        if status.status != OcspCertStatus::GOOD {
            return Err(TrustError::CertificateStatusUnknown { serial });
        }

        let this_update = parse_time(status.this_update)?;
        let not_before = signing_time
            .checked_sub_signed(self.trust.ocsp_freshness())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        if this_update < not_before {
            return Err(TrustError::OcspStale {
                this_update: this_update.to_rfc3339(),
                not_before: not_before.to_rfc3339(),
            });
        }
        if this_update > self.trust.now() {
            return Err(TrustError::OcspInvalid(format!(
                "thisUpdate {this_update} is in the future"
            )));
        }
        // An absent nextUpdate means newer information is always available.
        match status.next_update() {
            Some(next_update) if self.trust.verify_ocsp_next_update() => {
                let next_update = parse_time(next_update)?;
                if next_update < signing_time {
                    return Err(TrustError::OcspInvalid(format!(
                        "nextUpdate {next_update} is before signing time {signing_time}"
                    )));
                }
            }
            _ => {}
        }

        let responder = subject_label(&responder);
        log::debug!("OCSP status good from {responder}, thisUpdate {this_update}");
        Ok(OcspEvidence {
            responder,
            this_update,
        })
    }

    /// The certificate whose key verifies the response signature.
    fn find_responder(
        &self,
        basic: &OcspBasicResponse,
        issuer: &X509,
        embedded: &[X509],
    ) -> Result<X509, TrustError> {
        let empty = X509StoreBuilder::new()?.build();
        let candidates = self
            .trust
            .ocsp_responders()
            .iter()
            .chain(std::iter::once(issuer))
            .chain(self.trust.ca_certificates())
            .chain(embedded);
        for candidate in candidates {
            let mut single = Stack::new()?;
            single.push(candidate.clone())?;
            if basic
                .verify(&single, &empty, OcspFlag::NO_INTERN | OcspFlag::NO_VERIFY)
                .is_ok()
            {
                return Ok(candidate.clone());
            }
        }
        Err(TrustError::OcspUntrustedResponder(
            "response signature does not verify with any known responder".to_string(),
        ))
    }

    /// Trusted responder, the issuer itself, or a delegate of the issuer
    /// carrying id-kp-OCSPSigning.
    fn authorize(&self, responder: &X509, issuer: &X509) -> Result<(), TrustError> {
        let der = responder.to_der()?;
        let same = |c: &X509| c.to_der().map(|d| d == der).unwrap_or(false);

        if self.trust.ocsp_responders().iter().any(same) || same(issuer) {
            return Ok(());
        }
        let issuer_key = issuer.public_key()?;
        let issued = issuer.issued(responder) == X509VerifyResult::OK
            && responder.verify(&issuer_key).unwrap_or(false);
        if issued && has_ocsp_signing(&der)? {
            return Ok(());
        }
        Err(TrustError::OcspUntrustedResponder(subject_label(responder)))
    }
}

fn has_ocsp_signing(der: &[u8]) -> Result<bool, TrustError> {
    let cert = Certificate::from_der(der)?;
    let Some(ext) = cert
        .tbs_certificate
        .extensions
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|e| e.extn_id == ExtendedKeyUsage::OID)
    else {
        return Ok(false);
    };
    let usage = ExtendedKeyUsage::from_der(ext.extn_value.as_bytes())?;
    Ok(usage.0.contains(&OCSP_SIGNING))
}

/// OpenSSL prints generalized times as `Oct 19 18:39:48 2026 GMT`.
fn parse_time(time: &Asn1GeneralizedTimeRef) -> Result<DateTime<Utc>, TrustError> {
    let text = time.to_string();
    NaiveDateTime::parse_from_str(&text, "%b %e %H:%M:%S%.f %Y GMT")
        .or_else(|_| NaiveDateTime::parse_from_str(&text, "%b %e %H:%M:%S %Y GMT"))
        .map(|t| t.and_utc())
        .map_err(|e| TrustError::OcspInvalid(format!("time '{text}': {e}")))
}
