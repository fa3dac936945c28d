pub use anyhow::{ensure, Result};
pub use noisy_float::prelude::*;
pub use std::borrow::Borrow;
pub use tch::{
    nn::{self, Module as _, OptimizerConfig as _},
    Device, Kind, Reduction, Tensor,
};
