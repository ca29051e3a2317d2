//! Allocation engine: placement, concurrency protocol, idempotency.

mod engine;
mod strategy;

pub use engine::{AllocError, Allocator, AllocatorConfig, Placement, Release};
pub use strategy::{InvalidStrategy, Strategy, StrategyRegistry};
