use std::fmt;

use openssl::stack::Stack;
use openssl::x509::X509;

use crate::infra::error::TrustError;

/// Signing certificate taken from a signature's `KeyInfo`.
#[derive(Clone)]
pub struct SigningCert {
    der: Box<[u8]>,
}

/// Signing certificate plus the extra certificates shipped in the
/// signature's `CertificateValues`. Trust anchors are never taken from here.
#[derive(Clone)]
pub struct CertChain {
    leaf: SigningCert,
    extra: Vec<Vec<u8>>,
}

impl SigningCert {
    #[must_use]
    pub fn from_der(der: Vec<u8>) -> Self {
        Self {
            der: der.into_boxed_slice(),
        }
    }
    #[must_use]
    pub fn as_der(&self) -> &[u8] {
        &self.der
    }
    pub fn to_x509(&self) -> Result<X509, TrustError> {
        X509::from_der(&self.der)
            .map_err(|e| TrustError::MalformedSignature(format!("signing certificate: {e}")))
    }
}

impl CertChain {
    #[must_use]
    pub fn new(leaf: SigningCert) -> Self {
        Self {
            leaf,
            extra: Vec::new(),
        }
    }
    #[must_use]
    pub fn with_extra(mut self, list: Vec<Vec<u8>>) -> Self {
        self.extra = list;
        self
    }
    #[must_use]
    pub fn leaf(&self) -> &SigningCert {
        &self.leaf
    }
    #[must_use]
    pub fn extra(&self) -> &[Vec<u8>] {
        &self.extra
    }

    /// Extra certificates as an OpenSSL stack for chain building.
    pub fn extra_stack(&self) -> Result<Stack<X509>, TrustError> {
        let mut stack = Stack::new()?;
        for der in &self.extra {
            let cert = X509::from_der(der)
                .map_err(|e| TrustError::MalformedSignature(format!("chain certificate: {e}")))?;
            stack.push(cert)?;
        }
        Ok(stack)
    }
}

impl fmt::Debug for SigningCert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningCert(len={})", self.der.len())
    }
}

impl fmt::Debug for CertChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CertChain(leaf={:?}, extra={})", self.leaf, self.extra.len())
    }
}
