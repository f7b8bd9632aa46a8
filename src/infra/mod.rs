//! Infrastructure adapters for task intake and result delivery.

pub mod mailbox;
pub mod queue;
pub use mailbox::{Collected, ResultAggregator, ResultSink, ResultStream};
pub use queue::{Dequeued, TaskQueue};
