pub mod inference;
pub mod queue;
pub mod scheduler;
pub mod storage;
