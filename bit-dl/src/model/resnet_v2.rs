use crate::common::*;
use tch_modules::{GroupNorm, GroupNormInit, StdConv2D, StdConv2DInit};

pub use backbone::*;
pub use unit::*;

mod unit {
    use super::*;

    /// Initializer of the pre-activation bottleneck unit.
    #[derive(Debug, Clone)]
    pub struct BottleneckInit {
        pub in_dim: usize,
        pub mid_dim: usize,
        pub out_dim: usize,
        pub stride: usize,
    }

    impl BottleneckInit {
        pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Result<Bottleneck> {
            let path = path.borrow();
            let Self {
                in_dim,
                mid_dim,
                out_dim,
                stride,
            } = self;

            let gn1 = GroupNormInit::default().build(&(path / "a") / "group_norm", in_dim)?;
            let conv1 =
                StdConv2DInit::new(1).build(&(path / "a") / "standardized_conv2d", in_dim, mid_dim)?;
            let gn2 = GroupNormInit::default().build(&(path / "b") / "group_norm", mid_dim)?;
            let conv2 = StdConv2DInit {
                stride,
                ..StdConv2DInit::new(3)
            }
            .build(&(path / "b") / "standardized_conv2d", mid_dim, mid_dim)?;
            let gn3 = GroupNormInit::default().build(&(path / "c") / "group_norm", mid_dim)?;
            let conv3 =
                StdConv2DInit::new(1).build(&(path / "c") / "standardized_conv2d", mid_dim, out_dim)?;

            let proj = (stride != 1 || in_dim != out_dim)
                .then(|| {
                    StdConv2DInit {
                        stride,
                        ..StdConv2DInit::new(1)
                    }
                    .build(
                        &(&(path / "a") / "proj") / "standardized_conv2d",
                        in_dim,
                        out_dim,
                    )
                })
                .transpose()?;

            Ok(Bottleneck {
                gn1,
                conv1,
                gn2,
                conv2,
                gn3,
                conv3,
                proj,
            })
        }
    }

    /// The pre-activation bottleneck unit.
    ///
    /// The projection shortcut, if present, takes the pre-activated input.
    #[derive(Debug)]
    pub struct Bottleneck {
        gn1: GroupNorm,
        conv1: StdConv2D,
        gn2: GroupNorm,
        conv2: StdConv2D,
        gn3: GroupNorm,
        conv3: StdConv2D,
        proj: Option<StdConv2D>,
    }

    impl nn::Module for Bottleneck {
        fn forward(&self, xs: &Tensor) -> Tensor {
            let Self {
                gn1,
                conv1,
                gn2,
                conv2,
                gn3,
                conv3,
                proj,
            } = self;

            let preact = gn1.forward(xs).relu();
            let shortcut = match proj {
                Some(proj) => proj.forward(&preact),
                None => xs.shallow_clone(),
            };

            let ys = conv1.forward(&preact);
            let ys = conv2.forward(&gn2.forward(&ys).relu());
            let ys = conv3.forward(&gn3.forward(&ys).relu());
            ys + shortcut
        }
    }
}

mod backbone {
    use super::*;

    /// Initializer of the ResNet-v2 feature extractor.
    #[derive(Debug, Clone)]
    pub struct BackboneInit {
        /// The number of units per block.
        pub num_units: [usize; 4],
        /// The channel multiplier, four times the network width.
        pub filters_factor: usize,
    }

    impl BackboneInit {
        pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Result<Backbone> {
            let path = path.borrow();
            let Self {
                num_units,
                filters_factor,
            } = self;

            ensure!(filters_factor > 0, "filters_factor must be positive");
            ensure!(
                num_units.iter().all(|&count| count > 0),
                "each block must have at least one unit"
            );

            let root_dim = 16 * filters_factor;
            let root = StdConv2DInit {
                stride: 2,
                ..StdConv2DInit::new(7)
            }
            .build(&(path / "root_block") / "standardized_conv2d", 3, root_dim)?;

            let mut in_dim = root_dim;
            let blocks: Vec<Vec<Bottleneck>> = num_units
                .into_iter()
                .zip([1, 2, 2, 2])
                .enumerate()
                .map(|(block_index, (num_units, block_stride))| -> Result<_> {
                    let block_path = path / format!("block{}", block_index + 1);
                    let mid_dim = 16 * filters_factor * 2usize.pow(block_index as u32);
                    let out_dim = mid_dim * 4;

                    let units: Vec<_> = (0..num_units)
                        .map(|unit_index| -> Result<_> {
                            let unit = BottleneckInit {
                                in_dim,
                                mid_dim,
                                out_dim,
                                stride: if unit_index == 0 { block_stride } else { 1 },
                            }
                            .build(&block_path / format!("unit{:02}", unit_index + 1))?;
                            in_dim = out_dim;
                            Ok(unit)
                        })
                        .collect::<Result<_>>()?;
                    Ok(units)
                })
                .collect::<Result<_>>()?;

            let pre_head_norm = GroupNormInit::default().build(path / "group_norm", in_dim)?;

            Ok(Backbone {
                root,
                blocks,
                pre_head_norm,
                out_dim: in_dim,
            })
        }
    }

    /// The ResNet-v2 feature extractor ending with global average pooling.
    ///
    /// It accepts images of any spatial size and outputs `[batch, out_dim]` features.
    #[derive(Debug)]
    pub struct Backbone {
        root: StdConv2D,
        blocks: Vec<Vec<Bottleneck>>,
        pre_head_norm: GroupNorm,
        out_dim: usize,
    }

    impl Backbone {
        pub fn out_dim(&self) -> usize {
            self.out_dim
        }
    }

    impl nn::Module for Backbone {
        fn forward(&self, xs: &Tensor) -> Tensor {
            let Self {
                root,
                blocks,
                pre_head_norm,
                ..
            } = self;

            let xs = root
                .forward(xs)
                .constant_pad_nd(&[1, 1, 1, 1])
                .max_pool2d(&[3, 3], &[2, 2], &[0, 0], &[1, 1], false);
            let xs = blocks
                .iter()
                .flatten()
                .fold(xs, |xs, unit| unit.forward(&xs));

            pre_head_norm
                .forward(&xs)
                .relu()
                .mean_dim(&[2, 3], false, Kind::Float)
        }
    }
}
