//! Domain layer: pure types and parsers for archives and containers.
//!
//! Contains:
//! - Digest primitives and certificate wrappers (`crypto`)
//! - Chain continuation sentinel (`chain`) and linking info (`linking`)
//! - Container schema and typed model (`container`)
//! - XML element tree and canonicalization, signature document and hash
//!   chain documents
//! - Trust material and verdict types

pub mod c14n;
pub mod chain;
pub mod container;
pub mod crypto;
pub mod hashchain;
pub mod linking;
pub mod signature;
pub mod trust;
pub mod verdict;
pub mod xml;
