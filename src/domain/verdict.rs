//! Verification verdicts for containers and archives.
//!
//! A `ContainerVerdict` records who signed a container and which trusted
//! third parties vouched for it; an `ArchiveVerdict` aggregates them with the
//! final chain digest that the next archive must continue from.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Identity of the signer, taken from the signing certificate.
///
/// Each field mirrors a subject attribute:
/// - `common_name`: subject CN
/// - `serial_number`: subject serialNumber attribute (member code), if any
/// - `organization`: subject O, if any
/// - `certificate_serial`: certificate serial number in hex
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignerIdentity {
    pub common_name: String,
    pub serial_number: Option<String>,
    pub organization: Option<String>,
    pub certificate_serial: String,
}

impl SignerIdentity {
    /// True if `hint` names this signer by CN or subject serialNumber.
    #[must_use]
    pub fn matches(&self, hint: &str) -> bool {
        self.common_name == hint || self.serial_number.as_deref() == Some(hint)
    }
}

/// OCSP response accepted for the signing certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OcspEvidence {
    pub responder: String,
    pub this_update: DateTime<Utc>,
}

/// Timestamp accepted for the signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimestampEvidence {
    pub tsa: String,
    pub gen_time: DateTime<Utc>,
}

/// Outcome of validating one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerVerdict {
    pub container: String,
    pub signer: SignerIdentity,
    pub signing_time: DateTime<Utc>,
    pub ocsp: Option<OcspEvidence>,
    pub timestamp: Option<TimestampEvidence>,
}

/// Outcome of a successful archive verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveVerdict {
    pub archive: String,
    /// Last link of the digest chain; the next archive's previous digest.
    pub final_digest: String,
    /// Per-container chained digests in archive order.
    pub chain: Vec<(String, String)>,
    pub containers: Vec<ContainerVerdict>,
}
