//! Result delivery backends.

pub mod memory;

pub use memory::{Collected, ResultAggregator, ResultSink, ResultStream};
