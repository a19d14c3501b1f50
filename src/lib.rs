//! promptd — queued prompt execution for a single shared accelerator.

pub mod config;
pub mod device;
pub mod error;
pub mod executor;
pub mod job;
pub mod progress;
pub mod queue;
pub mod server;
pub mod worker;
