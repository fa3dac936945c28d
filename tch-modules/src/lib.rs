//! Neural network building blocks on top of tch.

mod common;
mod cross_entropy;
mod group_norm;
mod std_conv_2d;

pub use cross_entropy::*;
pub use group_norm::*;
pub use std_conv_2d::*;
