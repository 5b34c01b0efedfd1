//! End-to-end archive verification: chain continuity plus container trust.

mod common;

use std::io::{Cursor, Write};
use std::time::Duration;

use archive_verifier::error::{ContinuityError, StructuralError, TrustError};
use archive_verifier::services::container_codec::encode_archive;
use archive_verifier::{
    chain_digest, ArchiveVerifier, CancelToken, ErrorCategory, HashAlgorithm, LinkingDescriptor,
    PrevDigest, VerifierOptions, VerifyError,
};
use common::{archive, SignedContainer, TimestampMode};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

fn verifier() -> ArchiveVerifier {
    verifier_with(VerifierOptions::default())
}

fn verifier_with(options: VerifierOptions) -> ArchiveVerifier {
    ArchiveVerifier::with_options(common::trust(), options)
}

fn message(n: u32) -> Vec<u8> {
    SignedContainer::new(&format!("<message><id>{n}</id></message>")).encode()
}

mod chain_of_custody {
    use super::*;

    #[test]
    fn test_two_container_archive() {
        let first = message(1);
        let second = SignedContainer::new("<message><id>2</id></message>")
            .attachment(b"attachment")
            .timestamp(TimestampMode::HashChain)
            .encode();
        let (bytes, sealed) = archive(
            &[("msg-1.asice", first.clone()), ("msg-2.asice", second.clone())],
            &PrevDigest::First,
        );

        let verdict = verifier()
            .verify("arch-001.zip", Cursor::new(bytes), &PrevDigest::First)
            .unwrap();

        let d1 = chain_digest(&first, "", "SHA-256").unwrap();
        let d2 = chain_digest(&second, &d1, "SHA-256").unwrap();
        assert_eq!(verdict.archive, "arch-001.zip");
        assert_eq!(verdict.final_digest, d2);
        assert_eq!(verdict.final_digest, sealed);
        assert_eq!(
            verdict.chain,
            vec![
                ("msg-1.asice".to_string(), d1),
                ("msg-2.asice".to_string(), d2)
            ]
        );
        let names: Vec<_> = verdict.containers.iter().map(|c| c.container.as_str()).collect();
        assert_eq!(names, vec!["msg-1.asice", "msg-2.asice"]);
        assert!(verdict
            .containers
            .iter()
            .all(|c| c.signer.common_name == "Test Member"));
    }

    #[test]
    fn test_chain_continues_into_next_archive() {
        let (first_archive, first_digest) = archive(&[("a.asice", message(1))], &PrevDigest::First);
        let verdict = verifier()
            .verify("arch-001.zip", Cursor::new(first_archive), &PrevDigest::First)
            .unwrap();
        assert_eq!(verdict.final_digest, first_digest);

        let prev = PrevDigest::parse(&verdict.final_digest);
        let (second_archive, second_digest) = archive(&[("b.asice", message(2))], &prev);

        // Hex case of the caller's digest does not matter.
        let supplied = PrevDigest::parse(&verdict.final_digest.to_uppercase());
        let next = verifier()
            .verify("arch-002.zip", Cursor::new(second_archive), &supplied)
            .unwrap();
        assert_eq!(next.final_digest, second_digest);
        assert_ne!(next.final_digest, verdict.final_digest);
    }

    #[test]
    fn test_archives_verified_out_of_order() {
        let (_, first_digest) = archive(&[("a.asice", message(1))], &PrevDigest::First);
        let (second_archive, _) =
            archive(&[("b.asice", message(2))], &PrevDigest::parse(&first_digest));

        let err = verifier()
            .verify("arch-002.zip", Cursor::new(second_archive), &PrevDigest::First)
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Continuity);
        assert!(matches!(
            err,
            VerifyError::Continuity {
                source: ContinuityError::PrevDigestMismatch { supplied, recorded },
                ..
            } if supplied == "-" && recorded == first_digest
        ));
    }

    #[test]
    fn test_first_archive_given_a_previous_digest() {
        let (bytes, _) = archive(&[("a.asice", message(1))], &PrevDigest::First);
        let err = verifier()
            .verify("arch.zip", Cursor::new(bytes), &PrevDigest::parse("00ff"))
            .unwrap_err();
        assert!(matches!(
            err,
            VerifyError::Continuity {
                source: ContinuityError::PrevDigestMismatch { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_replaced_container() {
        let original = message(1);

        // Keep the recorded digest of the original, ship a different but
        // validly signed container under the same name.
        let mut linking = LinkingDescriptor::new(PrevDigest::First, None, HashAlgorithm::Sha256);
        linking
            .push("a.asice", &chain_digest(&original, "", "SHA-256").unwrap())
            .unwrap();
        let bytes = encode_archive(&[("a.asice".to_string(), message(2))], &linking).unwrap();

        let err = verifier()
            .verify("arch.zip", Cursor::new(bytes), &PrevDigest::First)
            .unwrap_err();
        assert!(matches!(
            err,
            VerifyError::Continuity {
                source: ContinuityError::DigestMismatch { container, .. },
                ..
            } if container == "a.asice"
        ));
    }

    #[test]
    fn test_reordered_containers() {
        let (a, b) = (message(1), message(2));
        let mut linking = LinkingDescriptor::new(PrevDigest::First, None, HashAlgorithm::Sha256);
        let d_a = chain_digest(&a, "", "SHA-256").unwrap();
        let d_b = chain_digest(&b, &d_a, "SHA-256").unwrap();
        linking.push("a.asice", &d_a).unwrap();
        linking.push("b.asice", &d_b).unwrap();
        let bytes = encode_archive(
            &[("b.asice".to_string(), b), ("a.asice".to_string(), a)],
            &linking,
        )
        .unwrap();

        let err = verifier()
            .verify("arch.zip", Cursor::new(bytes), &PrevDigest::First)
            .unwrap_err();
        assert!(matches!(
            err,
            VerifyError::Continuity {
                source: ContinuityError::DigestMismatch { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_unlisted_container() {
        let (a, b) = (message(1), message(2));
        let mut linking = LinkingDescriptor::new(PrevDigest::First, None, HashAlgorithm::Sha256);
        linking
            .push("a.asice", &chain_digest(&a, "", "SHA-256").unwrap())
            .unwrap();
        let bytes = encode_archive(
            &[("a.asice".to_string(), a), ("b.asice".to_string(), b)],
            &linking,
        )
        .unwrap();

        let err = verifier()
            .verify("arch.zip", Cursor::new(bytes), &PrevDigest::First)
            .unwrap_err();
        match err {
            VerifyError::Continuity {
                source: ContinuityError::FileSetMismatch { unlisted, missing },
                ..
            } => {
                assert_eq!(unlisted, vec!["b.asice".to_string()]);
                assert!(missing.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_listed_container_missing() {
        let a = message(1);
        let d_a = chain_digest(&a, "", "SHA-256").unwrap();
        let mut linking = LinkingDescriptor::new(PrevDigest::First, None, HashAlgorithm::Sha256);
        linking.push("a.asice", &d_a).unwrap();
        linking.push("gone.asice", &d_a).unwrap();
        let bytes = encode_archive(&[("a.asice".to_string(), a)], &linking).unwrap();

        let err = verifier()
            .verify("arch.zip", Cursor::new(bytes), &PrevDigest::First)
            .unwrap_err();
        match err {
            VerifyError::Continuity {
                source: ContinuityError::FileSetMismatch { unlisted, missing },
                ..
            } => {
                assert!(unlisted.is_empty());
                assert_eq!(missing, vec!["gone.asice".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

mod trust_failures {
    use super::*;

    #[test]
    fn test_failures_name_each_container() {
        let revoked = SignedContainer::new("<message/>")
            .signer("revoked")
            .ocsp(Some("ocsp-revoked.der"))
            .encode();
        let (bytes, _) = archive(
            &[
                ("good.asice", message(1)),
                ("revoked.asice", revoked),
                ("also-good.asice", message(2)),
            ],
            &PrevDigest::First,
        );

        let err = verifier()
            .verify("arch.zip", Cursor::new(bytes), &PrevDigest::First)
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Trust);
        match err {
            VerifyError::Trust { archive, failures } => {
                assert_eq!(archive, "arch.zip");
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, "revoked.asice");
                assert!(matches!(failures[0].1, TrustError::CertificateRevoked { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_continuity_reported_before_trust() {
        let revoked = SignedContainer::new("<message/>")
            .signer("revoked")
            .ocsp(Some("ocsp-revoked.der"))
            .encode();
        let (bytes, _) = archive(&[("revoked.asice", revoked)], &PrevDigest::First);
        let err = verifier()
            .verify("arch.zip", Cursor::new(bytes), &PrevDigest::parse("abcd"))
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Continuity);
    }

    #[test]
    fn test_expected_signer_option() {
        let (bytes, _) = archive(&[("a.asice", message(1))], &PrevDigest::First);
        let options = VerifierOptions {
            expected_signer: Some("Someone Else".to_string()),
            ..VerifierOptions::default()
        };
        let err = verifier_with(options)
            .verify("arch.zip", Cursor::new(bytes), &PrevDigest::First)
            .unwrap_err();
        assert!(matches!(
            err,
            VerifyError::Trust { ref failures, .. }
                if matches!(failures[0].1, TrustError::SignerMismatch { .. })
        ));
    }
}

mod structure {
    use super::*;

    fn raw_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_missing_linking_info() {
        let bytes = raw_zip(&[("a.asice", &message(1))]);
        let err = verifier()
            .verify("arch.zip", Cursor::new(bytes), &PrevDigest::First)
            .unwrap_err();
        assert!(matches!(
            err,
            VerifyError::Structural {
                source: StructuralError::LinkingInfoNotFound,
                ..
            }
        ));
    }

    #[test]
    fn test_empty_archive() {
        let bytes = raw_zip(&[("linkinginfo", b"- - SHA-256\n")]);
        let err = verifier()
            .verify("arch.zip", Cursor::new(bytes), &PrevDigest::First)
            .unwrap_err();
        assert!(matches!(
            err,
            VerifyError::Structural {
                source: StructuralError::EmptyArchive,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_algorithm_is_configuration_error() {
        let bytes = raw_zip(&[("linkinginfo", b"- - MD5\n"), ("a.asice", &message(1))]);
        let err = verifier()
            .verify("arch.zip", Cursor::new(bytes), &PrevDigest::First)
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration);
        let text = err.to_string();
        assert!(text.contains("arch.zip/linkinginfo line 1"), "{text}");
        assert!(text.contains("MD5"), "{text}");
    }

    #[test]
    fn test_container_error_names_the_container() {
        let bytes = raw_zip(&[("linkinginfo", b"- - SHA-256\n"), ("broken.asice", b"not a zip")]);
        let err = verifier()
            .verify("arch.zip", Cursor::new(bytes), &PrevDigest::First)
            .unwrap_err();
        match err {
            VerifyError::Structural { context, .. } => {
                assert_eq!(context, "arch.zip/broken.asice");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_not_a_zip() {
        let err = verifier()
            .verify("arch.zip", Cursor::new(b"plain text".to_vec()), &PrevDigest::First)
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Structural);
    }
}

mod execution {
    use super::*;

    fn three_containers() -> (Vec<u8>, String) {
        archive(
            &[
                ("1.asice", message(1)),
                ("2.asice", message(2)),
                ("3.asice", message(3)),
            ],
            &PrevDigest::First,
        )
    }

    #[test]
    fn test_worker_count_does_not_change_result() {
        let (bytes, sealed) = three_containers();
        let single = verifier_with(VerifierOptions {
            worker_threads: 1,
            ..VerifierOptions::default()
        })
        .verify("arch.zip", Cursor::new(bytes.clone()), &PrevDigest::First)
        .unwrap();
        let pooled = verifier_with(VerifierOptions {
            worker_threads: 8,
            ..VerifierOptions::default()
        })
        .verify("arch.zip", Cursor::new(bytes), &PrevDigest::First)
        .unwrap();
        assert_eq!(single, pooled);
        assert_eq!(pooled.final_digest, sealed);
    }

    #[test]
    fn test_spooling_to_disk_gives_same_digest() {
        let (bytes, sealed) = three_containers();
        let verdict = verifier_with(VerifierOptions {
            spool_threshold: 64,
            ..VerifierOptions::default()
        })
        .verify("arch.zip", Cursor::new(bytes), &PrevDigest::First)
        .unwrap();
        assert_eq!(verdict.final_digest, sealed);
    }

    #[test]
    fn test_cancelled_before_start() {
        let (bytes, _) = three_containers();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = verifier_with(VerifierOptions {
            cancel,
            ..VerifierOptions::default()
        })
        .verify("arch.zip", Cursor::new(bytes), &PrevDigest::First)
        .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Cancelled);
        assert!(matches!(err, VerifyError::Cancelled { archive } if archive == "arch.zip"));
    }

    #[test]
    fn test_elapsed_timeout() {
        let (bytes, _) = three_containers();
        let err = verifier_with(VerifierOptions {
            cancel: CancelToken::with_timeout(Duration::ZERO),
            ..VerifierOptions::default()
        })
        .verify("arch.zip", Cursor::new(bytes), &PrevDigest::First)
        .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Cancelled);
    }

    #[test]
    fn test_verify_path_names_archive_after_file() {
        let (bytes, sealed) = three_containers();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arch-042.zip");
        std::fs::write(&path, bytes).unwrap();

        let verdict = verifier().verify_path(&path, &PrevDigest::First).unwrap();
        assert_eq!(verdict.archive, "arch-042.zip");
        assert_eq!(verdict.final_digest, sealed);

        let report = serde_json::to_value(&verdict).unwrap();
        assert_eq!(report["final_digest"], sealed.as_str());
        assert_eq!(report["containers"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_verify_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = verifier()
            .verify_path(&dir.path().join("absent.zip"), &PrevDigest::First)
            .unwrap_err();
        assert!(matches!(err, VerifyError::Io(_)));
    }
}
