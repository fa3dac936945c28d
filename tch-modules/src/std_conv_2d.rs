use crate::common::*;

pub use std_conv_init::*;
pub use std_conv_::*;

mod std_conv_init {
    use super::*;

    /// Initializer of 2D convolution with weight standardization.
    #[derive(Debug, Clone)]
    pub struct StdConv2DInit {
        pub ksize: usize,
        pub stride: usize,
        pub padding: usize,
        pub groups: usize,
        pub bias: bool,
        /// The epsilon added to the kernel variance.
        pub eps: R64,
        pub ws_init: nn::Init,
        pub bs_init: nn::Init,
    }

    impl StdConv2DInit {
        pub fn new(ksize: usize) -> Self {
            Self {
                ksize,
                stride: 1,
                padding: ksize / 2,
                groups: 1,
                bias: false,
                eps: r64(1e-10),
                ws_init: nn::Init::KaimingUniform,
                bs_init: nn::Init::Const(0.0),
            }
        }

        pub fn build<'a>(
            self,
            path: impl Borrow<nn::Path<'a>>,
            in_dim: usize,
            out_dim: usize,
        ) -> Result<StdConv2D> {
            let Self {
                ksize,
                stride,
                padding,
                groups,
                bias,
                eps,
                ws_init,
                bs_init,
            } = self;

            ensure!(ksize > 0, "ksize must be positive");
            ensure!(stride > 0, "stride must be positive");
            ensure!(
                groups > 0 && in_dim % groups == 0 && out_dim % groups == 0,
                "in_dim and out_dim must be multiple of groups"
            );

            let path = path.borrow();
            let ksize = ksize as i64;
            let in_dim = in_dim as i64;
            let out_dim = out_dim as i64;
            let groups = groups as i64;

            let weight = path.var("weight", &[out_dim, in_dim / groups, ksize, ksize], ws_init);
            let bias = bias.then(|| path.var("bias", &[out_dim], bs_init));

            Ok(StdConv2D {
                stride: [stride as i64; 2],
                padding: [padding as i64; 2],
                groups,
                eps: eps.raw(),
                weight,
                bias,
            })
        }
    }
}

mod std_conv_ {
    use super::*;

    /// 2D convolution that standardizes its kernel per output channel on every call.
    #[derive(Debug)]
    pub struct StdConv2D {
        pub(super) stride: [i64; 2],
        pub(super) padding: [i64; 2],
        pub(super) groups: i64,
        pub(super) eps: f64,
        pub(super) weight: Tensor,
        pub(super) bias: Option<Tensor>,
    }

    impl StdConv2D {
        /// The kernel after zero-mean, unit-variance standardization.
        pub fn standardized_weight(&self) -> Tensor {
            let Self {
                ref weight, eps, ..
            } = *self;

            let mean = weight.mean_dim(&[1, 2, 3], true, Kind::Float);
            let centered = weight - &mean;
            let var = (&centered * &centered).mean_dim(&[1, 2, 3], true, Kind::Float);
            centered / (var + eps).sqrt()
        }
    }

    impl nn::Module for StdConv2D {
        fn forward(&self, input: &Tensor) -> Tensor {
            let Self {
                ref stride,
                ref padding,
                groups,
                ref bias,
                ..
            } = *self;

            input.conv2d(
                &self.standardized_weight(),
                bias.as_ref(),
                stride,
                padding,
                &[1, 1],
                groups,
            )
        }
    }
}
