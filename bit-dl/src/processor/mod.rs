//! Data preprocessing building blocks.

pub mod batch;
pub mod loader;
pub mod mixup;
pub mod transform;

pub use batch::*;
pub use loader::*;
pub use mixup::*;
pub use transform::*;
