//! Certificate validation service.
//!
//! Builds the signing certificate's path to a trusted CA at signing time,
//! then checks key usage and the caller's signer hint.

use chrono::{DateTime, Utc};
use der::oid::AssociatedOid;
use der::Decode;
use openssl::nid::Nid;
use openssl::stack::StackRef;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::verify::X509VerifyParam;
use openssl::x509::{X509NameRef, X509StoreContext, X509};
use x509_cert::ext::pkix::KeyUsage;
use x509_cert::Certificate;

use crate::domain::crypto::CertChain;
use crate::domain::trust::TrustContext;
use crate::domain::verdict::SignerIdentity;
use crate::infra::error::TrustError;

/// Signing certificate that passed path validation.
#[derive(Debug, Clone)]
pub struct ValidatedSigner {
    pub leaf: X509,
    /// Issuer from the built path; the leaf itself when it is a trust anchor.
    pub issuer: X509,
    pub identity: SignerIdentity,
}

pub struct CertificateValidator;

impl CertificateValidator {
    pub fn validate(
        chain: &CertChain,
        trust: &TrustContext,
        signing_time: DateTime<Utc>,
        signer_hint: Option<&str>,
    ) -> Result<ValidatedSigner, TrustError> {
        let leaf = chain.leaf().to_x509()?;
        let identity = Self::identity(&leaf)?;
        log::debug!(
            "Validating signing certificate CN={} serial={}",
            identity.common_name,
            identity.certificate_serial
        );

        let issuer = Self::verify_path(&leaf, chain, trust, signing_time)?;
        Self::check_key_usage(chain.leaf().as_der())?;

        if let Some(hint) = signer_hint {
            if !identity.matches(hint) {
                return Err(TrustError::SignerMismatch {
                    expected: hint.to_string(),
                    subject: identity.common_name.clone(),
                });
            }
        }

        Ok(ValidatedSigner {
            leaf,
            issuer,
            identity,
        })
    }

    /// Path validation against the trusted CAs, evaluated at `at`.
    fn verify_path(
        leaf: &X509,
        chain: &CertChain,
        trust: &TrustContext,
        at: DateTime<Utc>,
    ) -> Result<X509, TrustError> {
        if trust.ca_certificates().is_empty() {
            return Err(TrustError::UntrustedCertificate(
                "no trusted CA certificates configured".to_string(),
            ));
        }

        let mut builder = X509StoreBuilder::new()?;
        for ca in trust.ca_certificates() {
            builder.add_cert(ca.clone())?;
        }
        let mut param = X509VerifyParam::new()?;
        param.set_time(
            at.timestamp().try_into().map_err(|_| {
                TrustError::UntrustedCertificate(format!("signing time {at} out of range"))
            })?,
        );
        builder.set_param(&param)?;
        let store = builder.build();

        let extra = chain.extra_stack()?;
        let mut ctx = X509StoreContext::new()?;
        let (ok, reason, issuer) = ctx.init(&store, leaf, &extra, |c| {
            let ok = c.verify_cert()?;
            let issuer = c.chain().and_then(Self::issuer_of);
            Ok((ok, c.error().error_string().to_string(), issuer))
        })?;

        if !ok {
            return Err(TrustError::UntrustedCertificate(reason));
        }
        issuer.ok_or_else(|| TrustError::UntrustedCertificate("empty certificate path".to_string()))
    }

    fn issuer_of(path: &StackRef<X509>) -> Option<X509> {
        path.get(1).or_else(|| path.get(0)).map(|c| c.to_owned())
    }

    /// The certificate must allow digitalSignature or nonRepudiation.
    fn check_key_usage(der: &[u8]) -> Result<(), TrustError> {
        let cert = Certificate::from_der(der)?;
        let ext = cert
            .tbs_certificate
            .extensions
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|e| e.extn_id == KeyUsage::OID)
            .ok_or(TrustError::InvalidKeyUsage)?;
        let usage = KeyUsage::from_der(ext.extn_value.as_bytes())?;
        if usage.digital_signature() || usage.non_repudiation() {
            Ok(())
        } else {
            Err(TrustError::InvalidKeyUsage)
        }
    }

    pub fn identity(cert: &X509) -> Result<SignerIdentity, TrustError> {
        let subject = cert.subject_name();
        let serial = cert.serial_number().to_bn()?.to_hex_str()?.to_ascii_lowercase();
        Ok(SignerIdentity {
            common_name: name_entry(subject, Nid::COMMONNAME).unwrap_or_default(),
            serial_number: name_entry(subject, Nid::SERIALNUMBER),
            organization: name_entry(subject, Nid::ORGANIZATIONNAME),
            certificate_serial: serial,
        })
    }
}

/// First subject attribute with `nid`, as UTF-8.
pub fn name_entry(name: &X509NameRef, nid: Nid) -> Option<String> {
    name.entries_by_nid(nid)
        .next()
        .and_then(|e| e.data().as_utf8().ok())
        .map(|s| s.to_string())
}

/// Short human-readable subject, `CN` when present.
pub fn subject_label(cert: &X509) -> String {
    name_entry(cert.subject_name(), Nid::COMMONNAME).unwrap_or_else(|| "<no CN>".to_string())
}
