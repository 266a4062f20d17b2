//! Guardian runtime: the scan loop, its clock, signal handling and state snapshot.

pub mod clock;
#[cfg(feature = "daemon")]
pub mod loop_main;
pub mod self_monitor;
#[cfg(feature = "daemon")]
pub mod signals;
