//! Foundational low-level utilities shared across Hermes crates.
//!
//! Provides the wall-clock abstraction used by report windows and the
//! timezone helpers used for cutoff-hour decisions and artifact naming.

pub mod clock;
pub mod time_utils;

pub use clock::{Clock, ManualClock, SystemClock};
pub use time_utils::{local_hour, parse_timezone};
