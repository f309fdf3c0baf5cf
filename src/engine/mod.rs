//! Run engine: the GMF computer, the single-threaded result aggregator, and
//! the calculator that drives the run state machine.

pub mod aggregator;
pub mod calculator;
pub mod gmf;
