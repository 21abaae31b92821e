//! hookscope-core: in-memory model for assistant hook events.
//!
//! Holds the bounded event store, the time-bucketed aggregator and the
//! dense chart series derived from it. Everything here is synchronous and
//! clock-free: callers pass `now_ms` explicitly.

pub mod aggregator;
pub mod error;
pub mod series;
pub mod store;
pub mod types;

pub use error::HookscopeError;
