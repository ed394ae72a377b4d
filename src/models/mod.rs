pub mod analysis;
pub mod api;
pub mod job;
pub mod status;
