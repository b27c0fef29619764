//! Queue policies: task state, retry backoff, and dequeue priority.

mod priority;
mod retry;
mod state;

pub use priority::{PriorityPolicy, QueueSelector};
pub use retry::RetryPolicy;
pub use state::TaskState;
