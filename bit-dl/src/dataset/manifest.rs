use super::*;
use crate::common::*;

/// A dataset of labeled image files.
pub trait ClassificationDataset
where
    Self: Debug + Send + Sync,
{
    /// The ordered label vocabulary.
    fn classes(&self) -> &IndexSet<String>;

    fn num_examples(&self, split: Split) -> usize;

    /// Enumerates records of a split in a fixed order.
    fn records(&self, split: Split) -> Box<dyn Iterator<Item = ExampleRecord> + Send + '_>;

    fn num_classes(&self) -> usize {
        self.classes().len()
    }

    /// Enumerates labels of a split in record order without touching image files.
    fn labels(&self, split: Split) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        Box::new(self.records(split).map(|record| record.label))
    }
}

/// The dataset described by a YAML descriptor file.
#[derive(Debug, Clone)]
pub struct ManifestDataset {
    image_dir: PathBuf,
    classes: IndexSet<String>,
    descriptor: Descriptor,
}

impl ManifestDataset {
    /// Loads the descriptor file located at `root/descriptor_file`.
    ///
    /// Image paths are resolved against `root` joined with the descriptor base path.
    pub fn open(root: impl AsRef<Path>, descriptor_file: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let descriptor = Descriptor::open(root.join(descriptor_file))?;
        Self::from_descriptor(root, descriptor)
    }

    pub fn from_descriptor(root: impl AsRef<Path>, descriptor: Descriptor) -> Result<Self> {
        descriptor.validate()?;
        let image_dir = root.as_ref().join(&descriptor.basepath);
        let classes: IndexSet<String> = descriptor.categories.iter().cloned().collect();

        Ok(Self {
            image_dir,
            classes,
            descriptor,
        })
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    fn category_ids(&self, split: Split) -> impl Iterator<Item = (usize, &String, u64)> + '_ {
        let gt = &self.descriptor.split(split).gt;

        self.classes
            .iter()
            .enumerate()
            .flat_map(move |(label, category)| {
                gt[category]
                    .iter()
                    .map(move |&id| (label, category, id))
            })
    }
}

impl ClassificationDataset for ManifestDataset {
    fn classes(&self) -> &IndexSet<String> {
        &self.classes
    }

    fn num_examples(&self, split: Split) -> usize {
        let gt = &self.descriptor.split(split).gt;
        self.classes.iter().map(|category| gt[category].len()).sum()
    }

    fn records(&self, split: Split) -> Box<dyn Iterator<Item = ExampleRecord> + Send + '_> {
        let images = &self.descriptor.split(split).images;

        let iter = self
            .category_ids(split)
            .map(move |(label, category, id)| ExampleRecord {
                id,
                path: self.image_dir.join(&images[&id]),
                category: category.clone(),
                label,
            });
        Box::new(iter)
    }

    fn labels(&self, split: Split) -> Box<dyn Iterator<Item = usize> + Send + '_> {
        Box::new(self.category_ids(split).map(|(label, _, _)| label))
    }
}
