//! Hash chain verification.
//!
//! A hash chain lets one signature (or one timestamp) cover many messages.
//! The verifier recomputes the referenced step's `SEQUENCE OF DigestInfo`,
//! checks it against the signed result, and requires that every declared
//! input was reached through a `DataRef`.

use std::collections::HashSet;

use crate::domain::container::ContainerEntry;
use crate::domain::hashchain::{digest_list, HashChain, HashChainResult, HashStepValue};
use crate::infra::error::TrustError;
use crate::HashAlgorithm;

fn fail(reason: impl Into<String>) -> TrustError {
    TrustError::HashChain(reason.into())
}

/// Verifies a hash chain stored in `chain_entry` of one container.
pub struct HashChainVerifier<'c> {
    container: &'c ContainerEntry,
    chain_entry: &'c str,
    inputs: Vec<String>,
}

impl<'c> HashChainVerifier<'c> {
    /// `inputs` are entry names (no leading `/`) the chain must reference.
    pub fn new(container: &'c ContainerEntry, chain_entry: &'c str, inputs: Vec<String>) -> Self {
        Self {
            container,
            chain_entry,
            inputs,
        }
    }

    pub fn verify(&self, result_xml: &[u8], chain_xml: &[u8]) -> Result<(), TrustError> {
        let result = HashChainResult::parse(result_xml)?;
        let chain = HashChain::parse(chain_xml)?;

        let step_id = self.step_id(&result.uri)?;
        let mut used = HashSet::new();
        let mut visiting = Vec::new();
        let step_bytes = self.step_bytes(&chain, step_id, &mut used, &mut visiting)?;

        if result.algorithm.digest(&step_bytes) != result.digest {
            return Err(fail(format!("digest of step {step_id} does not match result")));
        }

        if let Some(unused) = self.inputs.iter().find(|i| !used.contains(i.as_str())) {
            return Err(fail(format!("input '{unused}' is not referenced by the chain")));
        }
        log::debug!(
            "Hash chain {} verified for {} input(s)",
            self.chain_entry,
            self.inputs.len()
        );
        Ok(())
    }

    /// Step id from `#STEP` or `/<chain entry>#STEP`.
    fn step_id<'u>(&self, uri: &'u str) -> Result<&'u str, TrustError> {
        let (path, id) = uri
            .split_once('#')
            .ok_or_else(|| fail(format!("step reference '{uri}' has no fragment")))?;
        let path = path.strip_prefix('/').unwrap_or(path);
        if !path.is_empty() && path != self.chain_entry {
            return Err(TrustError::ReferenceOutsideContainer {
                uri: uri.to_string(),
            });
        }
        Ok(id)
    }

    fn step_bytes<'a>(
        &self,
        chain: &'a HashChain,
        id: &'a str,
        used: &mut HashSet<String>,
        visiting: &mut Vec<&'a str>,
    ) -> Result<Vec<u8>, TrustError> {
        if visiting.contains(&id) {
            return Err(fail(format!("cyclic step reference to {id}")));
        }
        let step = chain
            .step(id)
            .ok_or_else(|| fail(format!("step {id} not found")))?;
        visiting.push(id);

        let mut values = Vec::with_capacity(step.values.len());
        for value in &step.values {
            values.push(match value {
                HashStepValue::Hash { algorithm, digest } => {
                    (algorithm.unwrap_or(chain.default_algorithm), digest.clone())
                }
                HashStepValue::StepRef { uri, algorithm } => {
                    let algo = algorithm.unwrap_or(chain.default_algorithm);
                    let target = self.step_id(uri)?;
                    let bytes = self.step_bytes(chain, target, used, visiting)?;
                    (algo, algo.digest(&bytes))
                }
                HashStepValue::DataRef {
                    uri,
                    algorithm,
                    digest,
                } => {
                    let algo = algorithm.unwrap_or(chain.default_algorithm);
                    self.check_data(uri, algo, digest)?;
                    let name = uri.strip_prefix('/').unwrap_or(uri);
                    if self.inputs.iter().any(|i| i == name) {
                        used.insert(name.to_string());
                    }
                    (algo, digest.clone())
                }
            });
        }

        visiting.pop();
        digest_list(&values)
    }

    fn check_data(
        &self,
        uri: &str,
        algo: HashAlgorithm,
        expected: &[u8],
    ) -> Result<(), TrustError> {
        let outside = || TrustError::ReferenceOutsideContainer {
            uri: uri.to_string(),
        };
        let path = uri.strip_prefix('/').ok_or_else(outside)?;
        let actual = self
            .container
            .entry(path)
            .and_then(|data| data.digest(algo))
            .ok_or_else(outside)?;
        if actual != expected {
            return Err(TrustError::ReferenceDigestMismatch {
                uri: uri.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::container::schema::{
        MANIFEST_ENTRY, SIG_HASH_CHAIN_ENTRY, SIG_HASH_CHAIN_RESULT_ENTRY,
    };
    use crate::domain::hashchain::HashStep;
    use crate::services::container_codec::ContainerCodec;
    use crate::ContainerContents;
    use std::io::Cursor;

    const ALGO: HashAlgorithm = HashAlgorithm::Sha256;

    fn container() -> ContainerEntry {
        let contents = ContainerContents::new("<message>1</message>", "<signature/>")
            .with_attachment(b"attachment data".to_vec())
            .with_entry(MANIFEST_ENTRY, "<manifest/>")
            .with_entry(SIG_HASH_CHAIN_RESULT_ENTRY, "<r/>")
            .with_entry(SIG_HASH_CHAIN_ENTRY, "<c/>");
        let bytes = ContainerCodec::encode(&contents).unwrap();
        ContainerCodec::decode("c", Cursor::new(bytes)).unwrap()
    }

    fn data_ref(uri: &str, data: &[u8]) -> HashStepValue {
        HashStepValue::DataRef {
            uri: uri.into(),
            algorithm: None,
            digest: ALGO.digest(data),
        }
    }

    /// STEP0 = [message, attachment1, StepRef STEP1], STEP1 = [other batch member]
    fn chain(values: Vec<HashStepValue>) -> (String, String) {
        let chain = HashChain {
            default_algorithm: ALGO,
            steps: vec![
                HashStep {
                    id: "STEP0".into(),
                    values,
                },
                HashStep {
                    id: "STEP1".into(),
                    values: vec![HashStepValue::Hash {
                        algorithm: None,
                        digest: ALGO.digest(b"other message"),
                    }],
                },
            ],
        };
        let step1 = digest_list(&[(ALGO, ALGO.digest(b"other message"))]).unwrap();
        let step0_values: Vec<_> = chain.steps[0]
            .values
            .iter()
            .map(|v| match v {
                HashStepValue::DataRef { digest, .. } | HashStepValue::Hash { digest, .. } => {
                    (ALGO, digest.clone())
                }
                HashStepValue::StepRef { .. } => (ALGO, ALGO.digest(&step1)),
            })
            .collect();
        let result = HashChainResult {
            algorithm: ALGO,
            digest: ALGO.digest(&digest_list(&step0_values).unwrap()),
            uri: format!("/{SIG_HASH_CHAIN_ENTRY}#STEP0"),
        };
        (result.to_xml(), chain.to_xml())
    }

    fn inputs() -> Vec<String> {
        vec!["message.xml".into(), "attachment1".into()]
    }

    fn step_ref() -> HashStepValue {
        HashStepValue::StepRef {
            uri: "#STEP1".into(),
            algorithm: None,
        }
    }

    #[test]
    fn verifies_chain_covering_all_inputs() {
        let entry = container();
        let (result, chain) = chain(vec![
            data_ref("/message.xml", b"<message>1</message>"),
            data_ref("/attachment1", b"attachment data"),
            step_ref(),
        ]);
        HashChainVerifier::new(&entry, SIG_HASH_CHAIN_ENTRY, inputs())
            .verify(result.as_bytes(), chain.as_bytes())
            .unwrap();
    }

    #[test]
    fn unreferenced_input_fails() {
        let entry = container();
        let (result, chain) = chain(vec![
            data_ref("/message.xml", b"<message>1</message>"),
            step_ref(),
        ]);
        let err = HashChainVerifier::new(&entry, SIG_HASH_CHAIN_ENTRY, inputs())
            .verify(result.as_bytes(), chain.as_bytes())
            .unwrap_err();
        assert!(matches!(err, TrustError::HashChain(m) if m.contains("attachment1")));
    }

    #[test]
    fn tampered_data_fails() {
        let entry = container();
        let (result, chain) = chain(vec![
            data_ref("/message.xml", b"<message>2</message>"),
            data_ref("/attachment1", b"attachment data"),
        ]);
        let err = HashChainVerifier::new(&entry, SIG_HASH_CHAIN_ENTRY, inputs())
            .verify(result.as_bytes(), chain.as_bytes())
            .unwrap_err();
        assert_eq!(
            err,
            TrustError::ReferenceDigestMismatch {
                uri: "/message.xml".into()
            }
        );
    }

    #[test]
    fn data_outside_container_fails() {
        let entry = container();
        let (result, chain) = chain(vec![data_ref(
            "http://example.com/message.xml",
            b"<message>1</message>",
        )]);
        let err = HashChainVerifier::new(&entry, SIG_HASH_CHAIN_ENTRY, inputs())
            .verify(result.as_bytes(), chain.as_bytes())
            .unwrap_err();
        assert!(matches!(err, TrustError::ReferenceOutsideContainer { .. }));
    }

    #[test]
    fn result_digest_mismatch_fails() {
        let entry = container();
        let (result, _) = chain(vec![
            data_ref("/message.xml", b"<message>1</message>"),
            data_ref("/attachment1", b"attachment data"),
        ]);
        let (_, extended) = chain(vec![
            data_ref("/message.xml", b"<message>1</message>"),
            data_ref("/attachment1", b"attachment data"),
            step_ref(),
        ]);
        let err = HashChainVerifier::new(&entry, SIG_HASH_CHAIN_ENTRY, inputs())
            .verify(result.as_bytes(), extended.as_bytes())
            .unwrap_err();
        assert!(matches!(err, TrustError::HashChain(m) if m.contains("does not match")));
    }

    #[test]
    fn cyclic_step_reference_fails() {
        let entry = container();
        let (result, chain) = chain(vec![HashStepValue::StepRef {
            uri: "#STEP0".into(),
            algorithm: None,
        }]);
        let err = HashChainVerifier::new(&entry, SIG_HASH_CHAIN_ENTRY, Vec::new())
            .verify(result.as_bytes(), chain.as_bytes())
            .unwrap_err();
        assert!(matches!(err, TrustError::HashChain(m) if m.contains("cyclic")));
    }
}
