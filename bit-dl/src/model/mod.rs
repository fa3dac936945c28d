//! The ResNet-v2 classifier and the pretrained checkpoint toolkit.

mod classifier;
mod resnet_v2;
mod weights;
mod zoo;

pub use classifier::*;
pub use resnet_v2::*;
pub use weights::*;
pub use zoo::*;

/// The variable namespace of the backbone, matching the checkpoint key prefix.
pub const BACKBONE_NAMESPACE: &str = "resnet";
/// The variable namespace of the classification head.
pub const HEAD_NAMESPACE: &str = "head";
