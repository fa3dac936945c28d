//! Image classification dataset toolkit.

mod archive;
mod descriptor;
mod info;
mod manifest;
mod record;
mod subsample;
mod wikipaintings;

pub use archive::*;
pub use descriptor::*;
pub use info::*;
pub use manifest::*;
pub use record::*;
pub use subsample::*;
pub use wikipaintings::*;
