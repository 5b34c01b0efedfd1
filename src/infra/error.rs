//! Error taxonomy for archive verification.
//!
//! Failures fall into four closed categories: structural (the archive or a
//! container is malformed), continuity (the chain of custody is broken),
//! trust (PKI validation failed) and configuration (caller error). Every
//! variant carries enough context to act on it without access to logs.

use thiserror::Error;

/// Result type for archive verification.
pub type VerifyResult<T> = Result<T, VerifyError>;

/// Coarse classification of a [`VerifyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Structural,
    Continuity,
    Trust,
    Configuration,
    Cancelled,
}

/// A container or archive is malformed.
#[derive(Error, Debug, Clone, PartialEq, Eq, miette::Diagnostic)]
pub enum StructuralError {
    #[error("mimetype entry not found")]
    MimetypeNotFound,

    #[error("invalid mimetype: expected '{expected}', found '{found}'")]
    InvalidMimetype { expected: String, found: String },

    #[error("message entry not found or blank")]
    MessageNotFound,

    #[error("signature entry not found or blank")]
    SignatureNotFound,

    #[error("signature hash chain incomplete: {present} present without {missing}")]
    SignatureHashChainMismatch {
        present: &'static str,
        missing: &'static str,
    },

    #[error("timestamp hash chain incomplete: {present} present without {missing}")]
    TimestampHashChainMismatch {
        present: &'static str,
        missing: &'static str,
    },

    #[error("timestamp hash chain present without a timestamp token")]
    OrphanedTimestampHashChain,

    #[error("manifest entry not found")]
    ManifestNotFound,

    #[error("ASiC manifest entry not found")]
    AsicManifestNotFound,

    #[error("entry '{entry}' is not valid UTF-8 text")]
    InvalidText { entry: String },

    #[error("archive contains no containers")]
    EmptyArchive,

    #[error("linking info entry not found")]
    LinkingInfoNotFound,

    #[error("malformed linking info at line {line}: {reason}")]
    MalformedLinkingInfo { line: usize, reason: String },

    #[error("duplicate linking info entry for '{name}' at line {line}")]
    DuplicateLinkingEntry { name: String, line: usize },

    #[error("duplicate archive entry '{name}'")]
    DuplicateEntry { name: String },

    #[error("malformed zip: {0}")]
    MalformedZip(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// The chain of custody between or within archives is broken.
#[derive(Error, Debug, Clone, PartialEq, Eq, miette::Diagnostic)]
pub enum ContinuityError {
    #[error("previous digest mismatch: caller supplied '{supplied}', linking info records '{recorded}'")]
    #[diagnostic(help("verify the archives in the order they were produced"))]
    PrevDigestMismatch { supplied: String, recorded: String },

    #[error(
        "container set mismatch: not listed in linking info [{}], listed but missing [{}]",
        .unlisted.join(", "),
        .missing.join(", ")
    )]
    FileSetMismatch {
        unlisted: Vec<String>,
        missing: Vec<String>,
    },

    #[error("digest mismatch for '{container}': expected {expected}, computed {actual}")]
    DigestMismatch {
        container: String,
        expected: String,
        actual: String,
    },
}

/// A container failed PKI or signature validation.
#[derive(Error, Debug, Clone, PartialEq, Eq, miette::Diagnostic)]
pub enum TrustError {
    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    #[error("missing required element: {0}")]
    MissingElement(String),

    #[error("signature value does not verify with the signing certificate")]
    InvalidSignatureValue,

    #[error("digest of reference '{uri}' does not match")]
    ReferenceDigestMismatch { uri: String },

    #[error("reference '{uri}' points outside the container")]
    ReferenceOutsideContainer { uri: String },

    #[error("message part '{part}' is not covered by the signature")]
    MessageNotCovered { part: String },

    #[error("attachment '{name}' is not listed in the manifest")]
    AttachmentNotInManifest { name: String },

    #[error("hash chain verification failed: {0}")]
    HashChain(String),

    #[error("untrusted certificate: {0}")]
    UntrustedCertificate(String),

    #[error("signer mismatch: expected '{expected}', certificate subject is '{subject}'")]
    SignerMismatch { expected: String, subject: String },

    #[error("signing certificate lacks digitalSignature/nonRepudiation key usage")]
    InvalidKeyUsage,

    #[error("certificate {serial} is revoked")]
    CertificateRevoked { serial: String },

    #[error("certificate {serial} status is unknown")]
    CertificateStatusUnknown { serial: String },

    #[error("OCSP response is stale: thisUpdate {this_update}, required not before {not_before}")]
    OcspStale {
        this_update: String,
        not_before: String,
    },

    #[error("OCSP response is not valid: {0}")]
    OcspInvalid(String),

    #[error("OCSP response not signed by a trusted responder: {0}")]
    OcspUntrustedResponder(String),

    #[error("invalid timestamp token: {0}")]
    TimestampInvalid(String),

    #[error("timestamp does not match timestamped content: {0}")]
    TimestampMismatch(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("verification cancelled")]
    Cancelled,
}

/// Top-level verification failure.
#[derive(Error, Debug, miette::Diagnostic)]
pub enum VerifyError {
    #[error("{context}: {source}")]
    #[diagnostic(code(archive::structural))]
    Structural {
        context: String,
        #[source]
        source: StructuralError,
    },

    #[error("{archive}: {source}")]
    #[diagnostic(code(archive::continuity))]
    Continuity {
        archive: String,
        #[source]
        source: ContinuityError,
    },

    #[error(
        "{archive}: {} container(s) failed validation: {}",
        .failures.len(),
        summarize(.failures)
    )]
    #[diagnostic(code(archive::trust))]
    Trust {
        archive: String,
        failures: Vec<(String, TrustError)>,
    },

    #[error("unsupported digest algorithm: {0}")]
    #[diagnostic(
        code(archive::config),
        help("supported algorithms are SHA-256, SHA-384 and SHA-512")
    )]
    UnsupportedAlgorithm(String),

    #[error("configuration error: {0}")]
    #[diagnostic(code(archive::config))]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("verification of {archive} cancelled")]
    Cancelled { archive: String },
}

fn summarize(failures: &[(String, TrustError)]) -> String {
    failures
        .iter()
        .map(|(container, error)| format!("{container}: {error}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl VerifyError {
    pub fn structural(context: impl Into<String>, source: StructuralError) -> Self {
        VerifyError::Structural {
            context: context.into(),
            source,
        }
    }

    pub fn continuity(archive: impl Into<String>, source: ContinuityError) -> Self {
        VerifyError::Continuity {
            archive: archive.into(),
            source,
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            VerifyError::Structural { .. } | VerifyError::Io(_) => ErrorCategory::Structural,
            VerifyError::Continuity { .. } => ErrorCategory::Continuity,
            VerifyError::Trust { .. } => ErrorCategory::Trust,
            VerifyError::UnsupportedAlgorithm(_) | VerifyError::Configuration(_) => {
                ErrorCategory::Configuration
            }
            VerifyError::Cancelled { .. } => ErrorCategory::Cancelled,
        }
    }
}

impl From<zip::result::ZipError> for StructuralError {
    fn from(error: zip::result::ZipError) -> Self {
        match error {
            zip::result::ZipError::Io(e) => StructuralError::Io(e.to_string()),
            other => StructuralError::MalformedZip(other.to_string()),
        }
    }
}

impl From<std::io::Error> for StructuralError {
    fn from(error: std::io::Error) -> Self {
        StructuralError::Io(error.to_string())
    }
}

impl From<std::io::Error> for VerifyError {
    fn from(error: std::io::Error) -> Self {
        VerifyError::Io(error.to_string())
    }
}

impl From<openssl::error::ErrorStack> for TrustError {
    fn from(error: openssl::error::ErrorStack) -> Self {
        TrustError::MalformedSignature(error.to_string())
    }
}

impl From<der::Error> for TrustError {
    fn from(error: der::Error) -> Self {
        TrustError::MalformedSignature(format!("ASN.1: {error}"))
    }
}
