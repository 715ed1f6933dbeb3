pub mod ids;
pub mod stats;
pub mod task;

pub use ids::{TaskId, TaskType};
pub use stats::QueueStats;
pub use task::{Task, DEFAULT_PRIORITY};
