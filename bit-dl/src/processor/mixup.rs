//! The Mix-Up batch augmentation.

use crate::common::*;
use rand_distr::{Beta, Distribution as _};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MixUpInit {
    /// The concentration of the symmetric Beta distribution. Zero disables mixing.
    pub alpha: R64,
}

impl MixUpInit {
    pub fn build(self) -> Result<MixUp> {
        let Self { alpha } = self;
        ensure!(alpha >= 0.0, "alpha must be non-negative, but get {}", alpha);

        let beta = if alpha > 0.0 {
            let beta = Beta::new(alpha.raw(), alpha.raw())
                .map_err(|err| format_err!("invalid mixup alpha {}: {:?}", alpha, err))?;
            Some(beta)
        } else {
            None
        };

        Ok(MixUp { beta })
    }
}

/// Blends each example with its mirror in the batch by a Beta distributed factor.
#[derive(Debug, Clone)]
pub struct MixUp {
    beta: Option<Beta<f64>>,
}

impl MixUp {
    pub fn is_enabled(&self) -> bool {
        self.beta.is_some()
    }

    /// Mixes `[batch, ...]` images and `[batch, num_classes]` soft labels.
    pub fn forward<R>(&self, images: &Tensor, labels: &Tensor, rng: &mut R) -> (Tensor, Tensor)
    where
        R: Rng,
    {
        let beta = match &self.beta {
            Some(beta) => beta,
            None => return (images.shallow_clone(), labels.shallow_clone()),
        };
        let ratio = beta.sample(rng);

        tch::no_grad(|| {
            let mix = |tensor: &Tensor| tensor * ratio + tensor.flip(&[0]) * (1.0 - ratio);
            (mix(images), mix(labels))
        })
    }
}
