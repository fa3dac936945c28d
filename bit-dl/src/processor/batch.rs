use crate::common::*;

/// A batch of images and soft labels.
#[derive(Debug, TensorLike)]
pub struct ClassificationBatch {
    /// `[batch, 3, height, width]` float images.
    pub images: Tensor,
    /// `[batch, num_classes]` float labels.
    pub labels: Tensor,
}

impl ClassificationBatch {
    /// Stacks `[3, height, width]` images and one-hot encodes their labels.
    pub fn collate(examples: &[(Tensor, usize)], num_classes: usize) -> Result<Self> {
        ensure!(!examples.is_empty(), "cannot collate an empty batch");
        ensure!(
            examples.iter().all(|(_, label)| *label < num_classes),
            "label out of range of {} classes",
            num_classes
        );

        let images: Vec<_> = examples
            .iter()
            .map(|(image, _)| image.shallow_clone())
            .collect();
        let label_indexes: Vec<i64> = examples.iter().map(|(_, label)| *label as i64).collect();

        let images = Tensor::stack(&images, 0);
        let labels = one_hot(&label_indexes, num_classes);

        Ok(Self { images, labels })
    }

    pub fn batch_size(&self) -> usize {
        self.images.size()[0] as usize
    }

    /// Splits the batch into consecutive mini-batches of the given sizes.
    pub fn split(&self, sizes: &[usize]) -> Result<Vec<Self>> {
        ensure!(
            sizes.iter().sum::<usize>() == self.batch_size(),
            "mini-batch sizes {:?} do not sum up to batch size {}",
            sizes,
            self.batch_size()
        );

        let batches = sizes
            .iter()
            .scan(0, |begin, &size| {
                let batch = Self {
                    images: self.images.narrow(0, *begin, size as i64),
                    labels: self.labels.narrow(0, *begin, size as i64),
                };
                *begin += size as i64;
                Some(batch)
            })
            .collect();
        Ok(batches)
    }
}

/// Encodes class indexes into a `[batch, num_classes]` float tensor.
pub fn one_hot(label_indexes: &[i64], num_classes: usize) -> Tensor {
    Tensor::of_slice(label_indexes)
        .one_hot(num_classes as i64)
        .to_kind(Kind::Float)
}
