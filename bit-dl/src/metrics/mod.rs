//! Classification metrics.

mod accuracy;
mod average_precision;

pub use accuracy::*;
pub use average_precision::*;
