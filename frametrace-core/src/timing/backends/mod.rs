//! Clock implementations
//!
//! - `MonotonicClock`: production clock backed by `std::time::Instant`
//! - `MockClock`: manually advanced clock for deterministic tests
//!
//! ## Choosing a Backend
//!
//! - **Tests**: Use `MockClock`
//! - **Everything else**: Use `MonotonicClock`

mod mock;
mod std_backend;

pub use mock::MockClock;
pub use std_backend::MonotonicClock;
