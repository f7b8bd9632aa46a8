//! Queue backends.

pub mod memory;

pub use memory::{Dequeued, TaskQueue};
