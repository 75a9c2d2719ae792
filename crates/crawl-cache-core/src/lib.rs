//! crawl-cache-core: Core types and traits for the crawl-cache engine
//!
//! This crate provides the data model (categories, fingerprints, entries,
//! activity records, training samples), the error taxonomy, the content
//! fingerprinter and the traits the tiers are built on.

pub mod compression;
mod error;
pub mod fingerprint;
mod traits;
mod types;

pub use error::{CacheError, Result};
pub use compression::Codec;
pub use fingerprint::{ContentFingerprinter, FingerprintInput};
pub use traits::*;
pub use types::*;
