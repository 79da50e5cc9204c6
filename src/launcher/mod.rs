//! Batch-script configuration and launch
//!
//! Builds the environment and launcher flags for a cluster, renders the
//! batch script and hands it to the scheduler.

pub mod affinity;
mod batch;
mod distconv;
mod environment;
mod tuning;

pub use batch::*;
pub use distconv::*;
pub use environment::*;
pub use tuning::*;
