//! Fixed entry-name schema of a signed message container.
//!
//! The schema is an ordered table of `(matcher, kind)` pairs evaluated top to
//! bottom; the first match wins.

use std::sync::OnceLock;

use regex::Regex;

pub const MIMETYPE_ENTRY: &str = "mimetype";
pub const MESSAGE_ENTRY: &str = "message.xml";
pub const SIGNATURE_ENTRY: &str = "META-INF/signatures.xml";
pub const SIG_HASH_CHAIN_RESULT_ENTRY: &str = "META-INF/hashchainresult.xml";
pub const SIG_HASH_CHAIN_ENTRY: &str = "META-INF/hashchain.xml";
pub const TIMESTAMP_ENTRY: &str = "META-INF/timestamp.tst";
pub const TS_HASH_CHAIN_RESULT_ENTRY: &str = "META-INF/tshashchainresult.xml";
pub const TS_HASH_CHAIN_ENTRY: &str = "META-INF/tshashchain.xml";
pub const MANIFEST_ENTRY: &str = "META-INF/manifest.xml";
pub const ASIC_MANIFEST_ENTRY: &str = "META-INF/ASiCManifest.xml";

/// Expected content of the `mimetype` entry.
pub const ASIC_MIMETYPE: &str = "application/vnd.etsi.asic-e+zip";
/// Zip comment declaring the container type.
pub const ASIC_COMMENT: &str = "mimetype=application/vnd.etsi.asic-e+zip";

/// Role of a container entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Mimetype,
    Message,
    Signature,
    SigHashChainResult,
    SigHashChain,
    Timestamp,
    TsHashChainResult,
    TsHashChain,
    Manifest,
    AsicManifest,
    Attachment,
}

/// How an entry name is recognised.
#[derive(Debug)]
pub enum Matcher {
    Exact(&'static str),
    Pattern(Regex),
}

impl Matcher {
    fn matches(&self, name: &str) -> bool {
        match self {
            Matcher::Exact(expected) => *expected == name,
            Matcher::Pattern(re) => re.is_match(name),
        }
    }
}

// Patterns are literals; a failure here is a programming error caught by tests.
fn pattern(re: &str) -> Option<Matcher> {
    Regex::new(re).ok().map(Matcher::Pattern)
}

fn table() -> &'static [(Matcher, EntryKind)] {
    static TABLE: OnceLock<Vec<(Matcher, EntryKind)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = vec![
            (Matcher::Exact(MIMETYPE_ENTRY), EntryKind::Mimetype),
            (Matcher::Exact(MESSAGE_ENTRY), EntryKind::Message),
        ];
        table.extend(
            pattern(r"^META-INF/signatures\d*\.xml$").map(|m| (m, EntryKind::Signature)),
        );
        table.extend([
            (
                Matcher::Exact(SIG_HASH_CHAIN_RESULT_ENTRY),
                EntryKind::SigHashChainResult,
            ),
            (Matcher::Exact(SIG_HASH_CHAIN_ENTRY), EntryKind::SigHashChain),
            (Matcher::Exact(TIMESTAMP_ENTRY), EntryKind::Timestamp),
            (
                Matcher::Exact(TS_HASH_CHAIN_RESULT_ENTRY),
                EntryKind::TsHashChainResult,
            ),
            (Matcher::Exact(TS_HASH_CHAIN_ENTRY), EntryKind::TsHashChain),
            (Matcher::Exact(MANIFEST_ENTRY), EntryKind::Manifest),
            (Matcher::Exact(ASIC_MANIFEST_ENTRY), EntryKind::AsicManifest),
        ]);
        table.extend(pattern(r"^attachment\d+$").map(|m| (m, EntryKind::Attachment)));
        table
    })
}

/// Classifies an entry name, or `None` for entries outside the schema.
#[must_use]
pub fn classify(name: &str) -> Option<EntryKind> {
    table()
        .iter()
        .find(|(matcher, _)| matcher.matches(name))
        .map(|(_, kind)| *kind)
}

/// Position of a kind in the schema, used to order entries when encoding.
#[must_use]
pub fn schema_rank(kind: EntryKind) -> usize {
    table()
        .iter()
        .position(|(_, k)| *k == kind)
        .unwrap_or(usize::MAX)
}
