//! Image file decoding.

use crate::common::*;

/// Decodes an image file into a `[3, height, width]` uint8 tensor.
///
/// Gray images are repeated to three channels and the alpha channel is dropped.
pub fn load_image(path: impl AsRef<Path>) -> Result<Tensor> {
    let path = path.as_ref();
    let image = vision::image::load(path)
        .with_context(|| format!("failed to decode image '{}'", path.display()))?;
    to_rgb(image).with_context(|| format!("unsupported image '{}'", path.display()))
}

pub(crate) fn to_rgb(image: Tensor) -> Result<Tensor> {
    let (channels, _height, _width) = image.size3()?;
    let rgb = match channels {
        3 => image,
        1 => image.repeat(&[3, 1, 1]),
        4 => image.narrow(0, 0, 3),
        _ => bail!("expect 1, 3 or 4 channels, but get {}", channels),
    };
    Ok(rgb.to_kind(Kind::Uint8))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_fix_up() -> Result<()> {
        let gray = Tensor::zeros(&[1, 4, 5], (Kind::Uint8, Device::Cpu));
        assert_eq!(to_rgb(gray)?.size(), vec![3, 4, 5]);

        let rgba = Tensor::zeros(&[4, 4, 5], (Kind::Uint8, Device::Cpu));
        assert_eq!(to_rgb(rgba)?.size(), vec![3, 4, 5]);

        let invalid = Tensor::zeros(&[2, 4, 5], (Kind::Uint8, Device::Cpu));
        assert!(to_rgb(invalid).is_err());
        Ok(())
    }

    #[test]
    fn load_saved_image() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("image.png");
        let image = Tensor::randint(256, &[3, 12, 9], (Kind::Uint8, Device::Cpu));
        vision::image::save(&image, &path)?;

        let loaded = load_image(&path)?;
        assert_eq!(loaded.size(), vec![3, 12, 9]);
        assert!(loaded.equal(&image));
        Ok(())
    }
}
