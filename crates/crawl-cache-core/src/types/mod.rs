//! Core types for cache operations

mod activity;
mod category;
mod entry;
mod key;
mod lookup;
mod policy;
mod sample;
mod stats;

pub use activity::{NetworkActivityRecord, OriginCache, Outcome};
pub use category::Category;
pub use entry::{CacheEntry, expiry_from, from_unix_millis, unix_millis};
pub use key::{CacheKey, Fingerprint};
pub use lookup::{Insertion, Lookup};
pub use policy::{CategoryPolicies, CategoryPolicy};
pub use sample::{NewSample, SampleInsert, TrainingSample};
pub use stats::{CategoryStats, DurableCategoryStats, MemoryTierStats};
