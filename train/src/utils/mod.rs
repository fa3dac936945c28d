//! Misc utilities.

mod env_filter;
mod pretrained;
mod rate_counter;

pub use env_filter::*;
pub use pretrained::*;
pub use rate_counter::*;

/// The timestamp format naming the run directories.
pub const FILE_STRFTIME: &str = "%Y-%m-%d-%H-%M-%S.%3f%z";
