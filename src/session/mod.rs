pub mod core;
pub mod scheduler;
pub mod session_task;
pub mod types;
