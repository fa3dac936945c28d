use super::Split;
use crate::common::*;

/// Configuration errors found in a dataset descriptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    #[error("absolute image basepath '{}' is not supported, images must be located within the descriptor directory", .0.display())]
    AbsoluteBasePath(PathBuf),
    #[error("the category '{0}' is declared more than once")]
    DuplicateCategory(String),
    #[error("the category '{category}' has no ground truth entry in the '{split}' split")]
    MissingCategory { split: Split, category: String },
    #[error("the image id {id} of category '{category}' is not listed in the '{split}' split images")]
    UnknownImageId {
        split: Split,
        category: String,
        id: u64,
    },
    #[error("the image id {id} is assigned to both '{first}' and '{second}' in the '{split}' split")]
    DuplicateImageId {
        split: Split,
        id: u64,
        first: String,
        second: String,
    },
}

/// The YAML dataset descriptor.
///
/// ```yaml
/// categories: [cat, dog]
/// basepath: images
/// train:
///   images: {0: a.jpg, 1: b.jpg, 2: c.jpg}
///   gt: {cat: [0, 1], dog: [2]}
/// val:
///   images: {3: d.jpg}
///   gt: {cat: [3], dog: []}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Ordered category names, which form the label vocabulary.
    pub categories: Vec<String>,
    /// The image directory relative to the descriptor directory.
    pub basepath: PathBuf,
    pub train: SplitDescriptor,
    pub val: SplitDescriptor,
}

/// The images and the ground truth of one split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitDescriptor {
    /// Image ids mapped to image paths relative to the base path.
    pub images: IndexMap<u64, PathBuf>,
    /// Category names mapped to ids of images in that category.
    pub gt: IndexMap<String, Vec<u64>>,
}

impl Descriptor {
    /// Parses and validates a descriptor file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read descriptor file '{}'", path.display()))?;
        let descriptor: Self = serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse descriptor file '{}'", path.display()))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn split(&self, split: Split) -> &SplitDescriptor {
        match split {
            Split::Train => &self.train,
            Split::Validation => &self.val,
        }
    }

    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.basepath.is_absolute() {
            return Err(DescriptorError::AbsoluteBasePath(self.basepath.clone()));
        }

        let mut seen = HashSet::new();
        for category in &self.categories {
            if !seen.insert(category.as_str()) {
                return Err(DescriptorError::DuplicateCategory(category.clone()));
            }
        }

        [Split::Train, Split::Validation]
            .into_iter()
            .try_for_each(|split| self.validate_split(split))
    }

    fn validate_split(&self, split: Split) -> Result<(), DescriptorError> {
        let SplitDescriptor { images, gt } = self.split(split);
        let mut owners: HashMap<u64, &str> = HashMap::new();

        for category in &self.categories {
            let ids = gt
                .get(category)
                .ok_or_else(|| DescriptorError::MissingCategory {
                    split,
                    category: category.clone(),
                })?;

            for &id in ids {
                if !images.contains_key(&id) {
                    return Err(DescriptorError::UnknownImageId {
                        split,
                        category: category.clone(),
                        id,
                    });
                }

                if let Some(first) = owners.insert(id, category.as_str()) {
                    return Err(DescriptorError::DuplicateImageId {
                        split,
                        id,
                        first: first.to_owned(),
                        second: category.clone(),
                    });
                }
            }
        }

        gt.keys()
            .filter(|name| !self.categories.contains(name))
            .for_each(|name| {
                warn!(
                    "ignore ground truth of undeclared category '{}' in the '{}' split",
                    name, split
                );
            });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTOR: &str = r#"
categories: [cat, dog]
basepath: images
train:
  images: {0: a.jpg, 1: b.jpg, 2: c.jpg}
  gt: {cat: [0, 1], dog: [2]}
val:
  images: {3: d.jpg}
  gt: {cat: [3], dog: []}
"#;

    fn parse(text: &str) -> Descriptor {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn valid_descriptor() {
        let descriptor = parse(DESCRIPTOR);
        descriptor.validate().unwrap();
        assert_eq!(descriptor.categories, vec!["cat", "dog"]);
        assert_eq!(descriptor.train.images[&2], Path::new("c.jpg"));
        assert_eq!(descriptor.split(Split::Validation).gt["cat"], vec![3]);
    }

    #[test]
    fn absolute_basepath() {
        let text = DESCRIPTOR.replace("basepath: images", "basepath: /data/images");
        let err = parse(&text).validate().unwrap_err();
        assert_eq!(
            err,
            DescriptorError::AbsoluteBasePath(PathBuf::from("/data/images"))
        );
    }

    #[test]
    fn duplicate_category() {
        let text = DESCRIPTOR.replace("[cat, dog]", "[cat, dog, cat]");
        let err = parse(&text).validate().unwrap_err();
        assert_eq!(err, DescriptorError::DuplicateCategory("cat".into()));
    }

    #[test]
    fn missing_category() {
        let text = DESCRIPTOR.replace("gt: {cat: [3], dog: []}", "gt: {cat: [3]}");
        let err = parse(&text).validate().unwrap_err();
        assert_eq!(
            err,
            DescriptorError::MissingCategory {
                split: Split::Validation,
                category: "dog".into()
            }
        );
    }

    #[test]
    fn unknown_image_id() {
        let text = DESCRIPTOR.replace("dog: [2]", "dog: [2, 9]");
        let err = parse(&text).validate().unwrap_err();
        assert_eq!(
            err,
            DescriptorError::UnknownImageId {
                split: Split::Train,
                category: "dog".into(),
                id: 9
            }
        );
    }

    #[test]
    fn image_in_two_categories() {
        let text = DESCRIPTOR.replace("dog: [2]", "dog: [1, 2]");
        let err = parse(&text).validate().unwrap_err();
        assert!(matches!(
            err,
            DescriptorError::DuplicateImageId { id: 1, .. }
        ));
    }

    #[test]
    fn missing_key_is_parse_error() {
        let text = DESCRIPTOR.replace("basepath: images\n", "");
        assert!(serde_yaml::from_str::<Descriptor>(&text).is_err());
    }
}
