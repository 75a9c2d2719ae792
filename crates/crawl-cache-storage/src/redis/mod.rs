//! Redis durable store and lease provider

mod config;
mod lease;
mod store;

pub use config::RedisConfig;
pub use lease::RedisLeaseProvider;
pub use store::RedisDurableStore;
