//! Trust material supplied by the caller for one or more verification runs.
//!
//! A `TrustContext` is immutable once built and is shared (behind `Arc`)
//! across all container validations of a run.

use std::fs;
use std::path::Path;

use chrono::{DateTime, TimeDelta, Utc};
use openssl::x509::X509;

use crate::infra::error::{VerifyError, VerifyResult};

/// Default maximum age of an OCSP response relative to signing time.
pub const DEFAULT_OCSP_FRESHNESS_SECONDS: u64 = 3600;

/// Upper bound accepted for the OCSP freshness window (100 years).
pub const MAX_OCSP_FRESHNESS_SECONDS: u64 = 100 * 365 * 24 * 3600;

#[derive(Clone)]
pub struct TrustContext {
    ca_certificates: Vec<X509>,
    ocsp_responders: Vec<X509>,
    tsa_certificates: Vec<X509>,
    ocsp_freshness: TimeDelta,
    verify_ocsp_next_update: bool,
    fixed_now: Option<DateTime<Utc>>,
}

impl Default for TrustContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TrustContext {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ca_certificates: Vec::new(),
            ocsp_responders: Vec::new(),
            tsa_certificates: Vec::new(),
            ocsp_freshness: TimeDelta::seconds(DEFAULT_OCSP_FRESHNESS_SECONDS as i64),
            verify_ocsp_next_update: false,
            fixed_now: None,
        }
    }

    #[must_use]
    pub fn with_ca(mut self, cert: X509) -> Self {
        self.ca_certificates.push(cert);
        self
    }

    #[must_use]
    pub fn with_ocsp_responder(mut self, cert: X509) -> Self {
        self.ocsp_responders.push(cert);
        self
    }

    #[must_use]
    pub fn with_tsa(mut self, cert: X509) -> Self {
        self.tsa_certificates.push(cert);
        self
    }

    #[must_use]
    pub fn with_ocsp_freshness(mut self, freshness: TimeDelta) -> Self {
        self.ocsp_freshness = freshness;
        self
    }

    /// Freshness window in seconds, bounded by [`MAX_OCSP_FRESHNESS_SECONDS`].
    pub fn with_ocsp_freshness_seconds(self, seconds: u64) -> VerifyResult<Self> {
        let freshness = (seconds <= MAX_OCSP_FRESHNESS_SECONDS)
            .then(|| i64::try_from(seconds).ok())
            .flatten()
            .and_then(TimeDelta::try_seconds)
            .ok_or_else(|| {
                VerifyError::Configuration(format!(
                    "OCSP freshness out of range: {seconds}s (maximum {MAX_OCSP_FRESHNESS_SECONDS}s)"
                ))
            })?;
        Ok(self.with_ocsp_freshness(freshness))
    }

    #[must_use]
    pub fn with_ocsp_next_update_check(mut self, enabled: bool) -> Self {
        self.verify_ocsp_next_update = enabled;
        self
    }

    /// Pins "now" for reproducible verification of old archives and tests.
    #[must_use]
    pub fn with_fixed_now(mut self, now: DateTime<Utc>) -> Self {
        self.fixed_now = Some(now);
        self
    }

    /// Loads every certificate from a PEM file (one or many per file).
    pub fn load_pem(path: &Path) -> VerifyResult<Vec<X509>> {
        let pem = fs::read(path).map_err(|e| {
            VerifyError::Configuration(format!(
                "Failed to read trust material {}: {e}",
                path.display()
            ))
        })?;
        let certs = X509::stack_from_pem(&pem).map_err(|e| {
            VerifyError::Configuration(format!(
                "Failed to parse certificates in {}: {e}",
                path.display()
            ))
        })?;
        if certs.is_empty() {
            return Err(VerifyError::Configuration(format!(
                "No certificates found in {}",
                path.display()
            )));
        }
        Ok(certs)
    }

    #[must_use]
    pub fn ca_certificates(&self) -> &[X509] {
        &self.ca_certificates
    }

    #[must_use]
    pub fn ocsp_responders(&self) -> &[X509] {
        &self.ocsp_responders
    }

    #[must_use]
    pub fn tsa_certificates(&self) -> &[X509] {
        &self.tsa_certificates
    }

    #[must_use]
    pub fn ocsp_freshness(&self) -> TimeDelta {
        self.ocsp_freshness
    }

    #[must_use]
    pub fn verify_ocsp_next_update(&self) -> bool {
        self.verify_ocsp_next_update
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.fixed_now.unwrap_or_else(Utc::now)
    }
}

impl std::fmt::Debug for TrustContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustContext")
            .field("ca_certificates", &self.ca_certificates.len())
            .field("ocsp_responders", &self.ocsp_responders.len())
            .field("tsa_certificates", &self.tsa_certificates.len())
            .field("ocsp_freshness", &self.ocsp_freshness.num_seconds())
            .field("verify_ocsp_next_update", &self.verify_ocsp_next_update)
            .field("fixed_now", &self.fixed_now)
            .finish()
    }
}
