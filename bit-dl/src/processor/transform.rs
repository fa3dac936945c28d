//! Resizing, cropping and normalization of decoded images.

use crate::common::*;

/// The processing mode of [ImageTransform].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransformMode {
    /// Resize, random crop and random horizontal flip.
    Train,
    /// Resize to the crop size.
    Eval,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageTransformInit {
    pub mode: TransformMode,
    /// The square side length images are resized to before cropping.
    pub resize_size: usize,
    /// The square side length of output images.
    pub crop_size: usize,
    /// The probability of horizontal flip in training mode.
    pub flip_prob: R64,
}

impl ImageTransformInit {
    pub fn new(mode: TransformMode, resize_size: usize, crop_size: usize) -> Self {
        Self {
            mode,
            resize_size,
            crop_size,
            flip_prob: r64(0.5),
        }
    }

    pub fn build(self) -> Result<ImageTransform> {
        let Self {
            mode,
            resize_size,
            crop_size,
            flip_prob,
        } = self;

        ensure!(crop_size > 0, "crop_size must be positive");
        ensure!(
            resize_size >= crop_size,
            "resize_size {} must not be less than crop_size {}",
            resize_size,
            crop_size
        );
        ensure!(
            (0.0..=1.0).contains(&flip_prob.raw()),
            "flip_prob must be in range [0, 1]"
        );

        Ok(ImageTransform {
            mode,
            resize_size: resize_size as i64,
            crop_size: crop_size as i64,
            flip_prob: flip_prob.raw(),
        })
    }
}

/// Turns `[3, height, width]` uint8 images into normalized `[3, crop, crop]` float images.
#[derive(Debug, Clone)]
pub struct ImageTransform {
    mode: TransformMode,
    resize_size: i64,
    crop_size: i64,
    flip_prob: f64,
}

impl ImageTransform {
    pub fn crop_size(&self) -> usize {
        self.crop_size as usize
    }

    pub fn forward<R>(&self, image: &Tensor, rng: &mut R) -> Result<Tensor>
    where
        R: Rng,
    {
        tch::no_grad(|| -> Result<_> {
            let (channels, _height, _width) = image.size3()?;
            ensure!(
                channels == 3,
                "channel size must be 3, but get {}",
                channels
            );

            let output = match self.mode {
                TransformMode::Train => {
                    let Self {
                        resize_size,
                        crop_size,
                        flip_prob,
                        ..
                    } = *self;
                    let resized = vision::image::resize(image, resize_size, resize_size)?;
                    let top = rng.gen_range(0..=(resize_size - crop_size));
                    let left = rng.gen_range(0..=(resize_size - crop_size));
                    let cropped = resized
                        .narrow(1, top, crop_size)
                        .narrow(2, left, crop_size);

                    if rng.gen_bool(flip_prob) {
                        cropped.flip(&[2])
                    } else {
                        cropped
                    }
                }
                TransformMode::Eval => {
                    vision::image::resize(image, self.crop_size, self.crop_size)?
                }
            };

            Ok(normalize(&output))
        })
    }
}

/// Maps pixel values from `[0, 255]` to `[-1, 1]`.
pub fn normalize(image: &Tensor) -> Tensor {
    (image.to_kind(Kind::Float) - 127.5) / 127.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn train_and_eval_shapes() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(1);
        let image = Tensor::randint(256, &[3, 40, 30], (Kind::Uint8, Device::Cpu));

        let train = ImageTransformInit::new(TransformMode::Train, 20, 16).build()?;
        let output = train.forward(&image, &mut rng)?;
        assert_eq!(output.size(), vec![3, 16, 16]);
        assert_eq!(output.kind(), Kind::Float);
        assert!(f64::from(output.min()) >= -1.0);
        assert!(f64::from(output.max()) <= 1.0);

        let eval = ImageTransformInit::new(TransformMode::Eval, 20, 16).build()?;
        assert_eq!(eval.forward(&image, &mut rng)?.size(), vec![3, 16, 16]);

        assert!(ImageTransformInit::new(TransformMode::Train, 8, 16)
            .build()
            .is_err());
        Ok(())
    }

    #[test]
    fn normalized_range() {
        let pixels = Tensor::of_slice(&[0u8, 255]);
        let normalized = Vec::<f32>::from(&normalize(&pixels));
        assert_eq!(normalized, vec![-1.0, 1.0]);
    }
}
