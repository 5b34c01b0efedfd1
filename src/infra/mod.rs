//! Infrastructure layer for cross-cutting concerns.
//!
//! Provides foundational infrastructure including:
//! - Configuration management and validation
//! - Error taxonomy and result types
//! - Cooperative cancellation of verification runs

pub mod cancel;
pub mod config;
pub mod error;
