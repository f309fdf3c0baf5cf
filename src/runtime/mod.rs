//! Worker-pool runtime for dispatching task blocks.

pub mod orchestrator;
