use super::*;
use crate::common::*;

/// The download location of the Wikipaintings archive.
pub const WIKIPAINTINGS_URL: &str = "https://my.hidrive.com/api/sharelink/download?id=ErTgRlMv";
/// The size of the declared label space.
pub const WIKIPAINTINGS_NUM_CLASSES: usize = 22;

/// The percentage-of-full-data variants of the Wikipaintings dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WikipaintingsVariant {
    Pct5,
    Pct10,
    Pct20,
    Pct40,
    Pct60,
    Pct80,
    Pct100,
}

impl WikipaintingsVariant {
    pub const ALL: [Self; 7] = [
        Self::Pct5,
        Self::Pct10,
        Self::Pct20,
        Self::Pct40,
        Self::Pct60,
        Self::Pct80,
        Self::Pct100,
    ];

    pub fn percentage(&self) -> usize {
        match self {
            Self::Pct5 => 5,
            Self::Pct10 => 10,
            Self::Pct20 => 20,
            Self::Pct40 => 40,
            Self::Pct60 => 60,
            Self::Pct80 => 80,
            Self::Pct100 => 100,
        }
    }

    pub fn from_percentage(percentage: usize) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|variant| variant.percentage() == percentage)
    }

    pub fn descriptor_file_name(&self) -> String {
        format!("{}.yaml", self)
    }
}

impl Default for WikipaintingsVariant {
    fn default() -> Self {
        Self::Pct100
    }
}

impl Display for WikipaintingsVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Wikipaintings_{}", self.percentage())
    }
}

impl FromStr for WikipaintingsVariant {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let percentage = text.strip_prefix("Wikipaintings_").unwrap_or(text);
        let variant = percentage
            .parse()
            .ok()
            .and_then(Self::from_percentage)
            .ok_or_else(|| {
                format_err!(
                    "invalid dataset config '{}', expect one of {}",
                    text,
                    Self::ALL.iter().join(", ")
                )
            })?;
        Ok(variant)
    }
}

impl Serialize for WikipaintingsVariant {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WikipaintingsVariant {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// The Wikipaintings painting style dataset.
#[derive(Debug, Clone)]
pub struct Wikipaintings {
    variant: WikipaintingsVariant,
    dataset: ManifestDataset,
}

impl Wikipaintings {
    /// Loads the descriptor of `variant` from an extracted archive directory.
    pub fn open(root: impl AsRef<Path>, variant: WikipaintingsVariant) -> Result<Self> {
        let dataset = ManifestDataset::open(root, variant.descriptor_file_name())?;
        ensure!(
            dataset.num_classes() == WIKIPAINTINGS_NUM_CLASSES,
            "expect {} categories in {}, but get {}",
            WIKIPAINTINGS_NUM_CLASSES,
            variant,
            dataset.num_classes()
        );

        Ok(Self { variant, dataset })
    }

    /// Locates the dataset files, downloading the archive if needed, and loads the variant.
    pub async fn load(
        manual_dir: Option<&Path>,
        cache_dir: impl AsRef<Path>,
        variant: WikipaintingsVariant,
    ) -> Result<Self> {
        let descriptor_file = PathBuf::from(variant.descriptor_file_name());
        let root = DatasetArchive {
            name: "wikipaintings",
            url: WIKIPAINTINGS_URL,
            descriptor_file: &descriptor_file,
        }
        .locate_root(manual_dir, cache_dir)
        .await?;

        tokio::task::spawn_blocking(move || Self::open(root, variant)).await?
    }

    pub fn variant(&self) -> WikipaintingsVariant {
        self.variant
    }
}

impl ClassificationDataset for Wikipaintings {
    fn classes(&self) -> &IndexSet<String> {
        self.dataset.classes()
    }

    fn num_examples(&self, split: Split) -> usize {
        self.dataset.num_examples(split)
    }

    fn records(&self, split: Split) -> Box<dyn Iterator<Item = ExampleRecord> + Send + '_> {
        self.dataset.records(split)
    }

    fn labels(&self, split: Split) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        self.dataset.labels(split)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_names() {
        assert_eq!(WikipaintingsVariant::Pct5.to_string(), "Wikipaintings_5");
        assert_eq!(
            WikipaintingsVariant::Pct100.descriptor_file_name(),
            "Wikipaintings_100.yaml"
        );
        assert_eq!(
            "Wikipaintings_40".parse::<WikipaintingsVariant>().unwrap(),
            WikipaintingsVariant::Pct40
        );
        assert_eq!(
            "60".parse::<WikipaintingsVariant>().unwrap(),
            WikipaintingsVariant::Pct60
        );
        assert!("Wikipaintings_50".parse::<WikipaintingsVariant>().is_err());
    }

    #[test]
    fn reject_wrong_label_space() {
        let dir = tempfile::tempdir().unwrap();
        let text = r#"
categories: [cat, dog]
basepath: images
train:
  images: {0: a.jpg}
  gt: {cat: [0], dog: []}
val:
  images: {}
  gt: {cat: [], dog: []}
"#;
        fs::write(dir.path().join("Wikipaintings_5.yaml"), text).unwrap();
        assert!(Wikipaintings::open(dir.path(), WikipaintingsVariant::Pct5).is_err());
    }
}
