//! Validation statistics and prediction collection.

use crate::common::*;

/// Running loss and accuracy over validation batches.
#[derive(Debug, Clone, Default)]
pub struct ValidationSummary {
    loss_sum: f64,
    num_correct: f64,
    num_examples: usize,
}

impl ValidationSummary {
    /// Accumulates `[batch, num_classes]` logits against one-hot or soft labels.
    pub fn add(&mut self, logits: &Tensor, labels: &Tensor) -> Result<()> {
        let batch_size = logits.size()[0] as usize;
        let labels = labels.to_device(logits.device());
        let loss =
            tch::no_grad(|| CrossEntropyLoss::new(false, Reduction::Sum).forward(logits, &labels));
        let accuracy = metrics::accuracy(logits, &labels)?;

        self.loss_sum += f64::from(&loss);
        self.num_correct += accuracy * batch_size as f64;
        self.num_examples += batch_size;
        Ok(())
    }

    pub fn num_examples(&self) -> usize {
        self.num_examples
    }

    /// The mean loss per example.
    pub fn loss(&self) -> Option<f64> {
        (self.num_examples > 0).then(|| self.loss_sum / self.num_examples as f64)
    }

    pub fn accuracy(&self) -> Option<f64> {
        (self.num_examples > 0).then(|| self.num_correct / self.num_examples as f64)
    }
}

/// The number of evaluation batches that cover `num_examples` examples.
pub fn num_prediction_batches(num_examples: usize, batch_size: usize) -> usize {
    (num_examples + batch_size - 1) / batch_size
}

/// Concatenates per-batch scores and keeps the first `num_examples` rows.
///
/// The batches can overshoot because the evaluation stream repeats the split.
/// It is an error if the batches cover fewer rows than `num_examples`.
pub fn truncate_predictions(batches: &[Tensor], num_examples: usize) -> Result<Tensor> {
    ensure!(!batches.is_empty(), "no prediction batch is produced");
    let scores = Tensor::cat(batches, 0);
    let num_rows = scores.size()[0] as usize;
    ensure!(
        num_rows >= num_examples,
        "expect predictions for {} examples, but only {} are produced",
        num_examples,
        num_rows
    );
    Ok(scores.narrow(0, 0, num_examples as i64))
}
