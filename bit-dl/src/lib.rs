//! The building blocks of BiT image classification fine-tuning.

mod common;
pub mod dataset;
pub mod hyperrule;
pub mod metrics;
pub mod model;
pub mod processor;
pub mod profiling;
pub mod utils;
