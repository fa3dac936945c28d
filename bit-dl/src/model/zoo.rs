//! The registry of published BiT checkpoints.

use crate::common::*;

/// The download location of the pretrained checkpoints.
pub const BIT_MODELS_URL: &str = "https://storage.googleapis.com/bit_models";

/// The upstream dataset the checkpoint is pretrained on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
pub enum Upstream {
    /// ImageNet-1k.
    S,
    /// ImageNet-21k.
    M,
}

/// The depth of the residual network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
pub enum Depth {
    R50,
    R101,
    R152,
}

impl Depth {
    /// The number of bottleneck units in each of the four blocks.
    pub fn num_units(&self) -> [usize; 4] {
        match self {
            Self::R50 => [3, 4, 6, 3],
            Self::R101 => [3, 4, 23, 3],
            Self::R152 => [3, 8, 36, 3],
        }
    }
}

/// A checkpoint name in the form of `BiT-<upstream>-<depth>x<width>`, e.g. `BiT-M-R50x1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelName {
    pub upstream: Upstream,
    pub depth: Depth,
    pub width: usize,
}

impl ModelName {
    const KNOWN_ARCHITECTURES: [(Depth, usize); 6] = [
        (Depth::R50, 1),
        (Depth::R50, 3),
        (Depth::R101, 1),
        (Depth::R101, 3),
        (Depth::R152, 2),
        (Depth::R152, 4),
    ];

    /// Lists all published checkpoints.
    pub fn known_models() -> impl Iterator<Item = Self> {
        [Upstream::S, Upstream::M]
            .into_iter()
            .cartesian_product(Self::KNOWN_ARCHITECTURES)
            .map(|(upstream, (depth, width))| Self {
                upstream,
                depth,
                width,
            })
    }

    pub fn num_units(&self) -> [usize; 4] {
        self.depth.num_units()
    }

    /// The number of classes of the upstream classification head.
    pub fn num_outputs(&self) -> usize {
        match self.upstream {
            Upstream::S => 1000,
            Upstream::M => 21843,
        }
    }

    /// The channel multiplier of the network.
    pub fn filters_factor(&self) -> usize {
        self.width * 4
    }

    pub fn file_name(&self) -> String {
        format!("{}.npz", self)
    }

    pub fn url(&self) -> String {
        format!("{}/{}", BIT_MODELS_URL, self.file_name())
    }
}

impl Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BiT-{}-{}x{}", self.upstream, self.depth, self.width)
    }
}

impl FromStr for ModelName {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let parse = || -> Option<Self> {
            let rest = text.strip_prefix("BiT-")?;
            let (upstream, arch) = rest.split_once('-')?;
            let (depth, width) = arch.split_once('x')?;
            Some(Self {
                upstream: upstream.parse().ok()?,
                depth: depth.parse().ok()?,
                width: width.parse().ok()?,
            })
        };

        let name = parse()
            .filter(|name| Self::KNOWN_ARCHITECTURES.contains(&(name.depth, name.width)))
            .ok_or_else(|| {
                format_err!(
                    "unknown model '{}', expect one of {}",
                    text,
                    Self::known_models().join(", ")
                )
            })?;
        Ok(name)
    }
}

impl Serialize for ModelName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ModelName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_model_names() {
        let name: ModelName = "BiT-M-R101x3".parse().unwrap();
        assert_eq!(name.upstream, Upstream::M);
        assert_eq!(name.num_units(), [3, 4, 23, 3]);
        assert_eq!(name.num_outputs(), 21843);
        assert_eq!(name.filters_factor(), 12);
        assert_eq!(
            name.url(),
            "https://storage.googleapis.com/bit_models/BiT-M-R101x3.npz"
        );
        assert_eq!(name.to_string(), "BiT-M-R101x3");

        assert!("BiT-M-R50x2".parse::<ModelName>().is_err());
        assert!("BiT-L-R50x1".parse::<ModelName>().is_err());
        assert!("R50x1".parse::<ModelName>().is_err());
        assert_eq!(ModelName::known_models().count(), 12);
    }
}
