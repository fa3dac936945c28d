use crate::common::*;

/// The fraction of examples whose top scored class matches the target.
///
/// The target is either a `[batch]` tensor of class indices or a
/// `[batch, num_classes]` tensor of soft labels, in which case its top class is used.
pub fn accuracy(logits: &Tensor, target: &Tensor) -> Result<f64> {
    ensure!(
        logits.dim() == 2,
        "expect [batch, num_classes] logits, but get {:?}",
        logits.size()
    );
    let batch_size = logits.size()[0];
    ensure!(batch_size > 0, "empty batch");

    let target_index = match target.dim() {
        1 => target.shallow_clone(),
        2 => target.argmax(1, false),
        _ => bail!("invalid target shape {:?}", target.size()),
    };
    ensure!(
        target_index.size() == [batch_size],
        "batch size mismatch between logits {:?} and target {:?}",
        logits.size(),
        target.size()
    );

    let num_correct = tch::no_grad(|| {
        logits
            .argmax(1, false)
            .eq_tensor(&target_index.to_device(logits.device()).to_kind(Kind::Int64))
            .sum(Kind::Int64)
    });
    Ok(i64::from(&num_correct) as f64 / batch_size as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_and_soft_targets() -> Result<()> {
        let logits = Tensor::of_slice(&[2f32, 1., 0., 3., 5., 4.]).view([3, 2]);
        let sparse = Tensor::of_slice(&[0i64, 1, 1]);
        assert_abs_diff_eq!(accuracy(&logits, &sparse)?, 2.0 / 3.0);

        let soft = Tensor::of_slice(&[0.9f32, 0.1, 0.2, 0.8, 0.7, 0.3]).view([3, 2]);
        assert_abs_diff_eq!(accuracy(&logits, &soft)?, 1.0);

        assert!(accuracy(&logits, &Tensor::of_slice(&[0i64])).is_err());
        Ok(())
    }
}
