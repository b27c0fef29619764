//! Domain model (IDs, task record, enqueue options, leases).

pub mod ids;
pub mod lease;
pub mod options;
pub mod task;

pub use ids::{IdParseError, TaskId, WorkerId};
pub use lease::{Lease, Leased};
pub use options::{EnqueueOptions, Uniqueness};
pub use task::{TaskMessage, TaskType};
