use super::*;
use crate::common::*;

/// Size and label metadata of a dataset split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub split: Split,
    pub num_examples: usize,
    pub num_classes: usize,
    pub class_names: Vec<String>,
}

impl DatasetInfo {
    /// Collects metadata of a split.
    ///
    /// If `examples_per_class` is set, the example count reflects the per-class
    /// subsampling of [subsample_per_class].
    pub fn new(
        dataset: &dyn ClassificationDataset,
        split: Split,
        examples_per_class: Option<usize>,
    ) -> Self {
        let num_examples = match examples_per_class {
            Some(limit) => dataset
                .labels(split)
                .counts()
                .into_values()
                .map(|count| count.min(limit))
                .sum(),
            None => dataset.num_examples(split),
        };

        Self {
            split,
            num_examples,
            num_classes: dataset.num_classes(),
            class_names: dataset.classes().iter().cloned().collect(),
        }
    }
}
