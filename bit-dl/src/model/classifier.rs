use super::*;
use crate::common::*;

/// Initializer of the zero-initialized linear classification head.
#[derive(Debug, Clone)]
pub struct HeadInit {
    pub in_dim: usize,
    pub num_classes: usize,
}

impl HeadInit {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Result<Head> {
        let path = path.borrow();
        let Self {
            in_dim,
            num_classes,
        } = self;
        ensure!(num_classes > 0, "num_classes must be positive");

        let linear = nn::linear(
            path / "dense",
            in_dim as i64,
            num_classes as i64,
            nn::LinearConfig {
                ws_init: nn::Init::Const(0.0),
                bs_init: Some(nn::Init::Const(0.0)),
                bias: true,
            },
        );

        Ok(Head {
            linear,
            num_classes,
        })
    }
}

#[derive(Debug)]
pub struct Head {
    linear: nn::Linear,
    num_classes: usize,
}

impl Head {
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

impl nn::Module for Head {
    fn forward(&self, features: &Tensor) -> Tensor {
        self.linear.forward(features)
    }
}

/// Initializer of a backbone topped with a fresh head.
#[derive(Debug, Clone)]
pub struct ClassifierInit {
    pub backbone: BackboneInit,
    pub num_classes: usize,
}

impl ClassifierInit {
    /// The architecture of a registered pretrained model.
    pub fn new(model: ModelName, num_classes: usize) -> Self {
        Self {
            backbone: BackboneInit {
                num_units: model.num_units(),
                filters_factor: model.filters_factor(),
            },
            num_classes,
        }
    }

    /// Builds the backbone under the `resnet` namespace and the head under `head`.
    ///
    /// The backbone variable names follow the checkpoint naming, so that
    /// [load_bit_weights] can locate them.
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>) -> Result<ClassifierModel> {
        let path = path.borrow();
        let Self {
            backbone,
            num_classes,
        } = self;

        let backbone = backbone.build(path / BACKBONE_NAMESPACE)?;
        let head = HeadInit {
            in_dim: backbone.out_dim(),
            num_classes,
        }
        .build(path / HEAD_NAMESPACE)?;

        Ok(ClassifierModel { backbone, head })
    }
}

/// The image classifier producing logits.
#[derive(Debug)]
pub struct ClassifierModel {
    pub backbone: Backbone,
    pub head: Head,
}

impl ClassifierModel {
    pub fn num_classes(&self) -> usize {
        self.head.num_classes()
    }
}

impl nn::Module for ClassifierModel {
    fn forward(&self, images: &Tensor) -> Tensor {
        let features = self.backbone.forward(images);
        self.head.forward(&features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_initialized_head() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let head = HeadInit {
            in_dim: 16,
            num_classes: 5,
        }
        .build(&vs.root() / HEAD_NAMESPACE)?;

        let logits = tch::no_grad(|| head.forward(&Tensor::randn(&[3, 16], FLOAT_CPU)));
        assert_eq!(logits.size(), vec![3, 5]);
        assert_eq!(f64::from(logits.abs().max()), 0.0);
        assert!(vs.variables().contains_key("head.dense.weight"));
        Ok(())
    }

    #[test]
    fn registered_architecture() -> Result<()> {
        let init = ClassifierInit::new("BiT-M-R101x3".parse()?, 22);
        assert_eq!(init.backbone.num_units, [3, 4, 23, 3]);
        assert_eq!(init.backbone.filters_factor, 12);

        let vs = nn::VarStore::new(Device::Cpu);
        let model = ClassifierInit {
            backbone: BackboneInit {
                num_units: [1, 1, 1, 1],
                filters_factor: 2,
            },
            num_classes: 3,
        }
        .build(&vs.root())?;
        assert_eq!(model.num_classes(), 3);

        let logits = tch::no_grad(|| model.forward(&Tensor::randn(&[2, 3, 32, 32], FLOAT_CPU)));
        assert_eq!(logits.size(), vec![2, 3]);
        Ok(())
    }
}
