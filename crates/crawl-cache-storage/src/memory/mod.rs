//! In-memory tier

mod lru;
mod tier;

pub use tier::MemoryTier;
