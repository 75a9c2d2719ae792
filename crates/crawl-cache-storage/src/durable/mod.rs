//! Durable tier implementations

mod circuit_breaker;
mod guarded;
mod memory;

pub use circuit_breaker::CircuitBreaker;
pub use guarded::GuardedStore;
pub use memory::MemoryDurableStore;
