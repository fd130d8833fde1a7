//! Reconcile Engine
//!
//! Logic shared by every module: the idempotence diff, bounded polling of
//! vendor tasks, parameter parsing, and size units.

pub mod helper;
pub mod params;
pub mod poll;
pub mod units;

pub use helper::*;
pub use params::*;
pub use poll::{PollPolicy, StatusSource, TaskStatus};
pub use units::*;
