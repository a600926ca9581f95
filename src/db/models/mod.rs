pub mod message;
pub mod task;

pub use message::{MessageRow, NewMessageRow};
pub use task::{NewTaskRow, TaskQueryFilter, TaskRow};
