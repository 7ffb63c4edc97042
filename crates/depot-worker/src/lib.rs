//! Depot reconcilers
//!
//! Periodic sweeps that drive parked state forward:
//!
//! - [`OutboxSweep`] dispatches `pending` jobs
//! - [`StaleUploadSweep`] fails uploads that were never completed
//! - [`StuckDispatchSweep`] re-arms jobs stuck in `sending`
//!
//! [`ReconcilerScheduler`] owns their timers and is started and stopped explicitly.

pub mod guard;
pub mod scheduler;
pub mod sweeps;

pub use guard::{SingleFlight, SingleFlightGuard};
pub use scheduler::ReconcilerScheduler;
pub use sweeps::{OutboxSweep, StaleUploadSweep, StuckDispatchSweep, Sweep, SweepReport};
