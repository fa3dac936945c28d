use crate::common::*;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrecRec<T>
where
    T: Copy,
{
    pub precision: T,
    pub recall: T,
}

/// Integrates a precision/recall curve as the sum of precision weighted by
/// the recall increment at each threshold.
///
/// The input precision/recall list must be ordered by non-decreasing recall.
pub fn average_precision_by_prec_rec(sorted_prec_rec: &[impl Borrow<PrecRec<R64>>]) -> R64 {
    sorted_prec_rec
        .iter()
        .map(Borrow::<PrecRec<R64>>::borrow)
        .scan(r64(0.0), |prev_recall, prec_rec| {
            let PrecRec { precision, recall } = *prec_rec;
            let delta = recall - *prev_recall;
            *prev_recall = recall;
            Some(precision * delta)
        })
        .sum()
}

/// Compute average precision from scored examples.
///
/// Examples are ranked by decreasing score. Examples of equal score share
/// one threshold. It returns `None` if there is no positive example.
pub fn average_precision<I>(scored: I) -> Option<R64>
where
    I: IntoIterator<Item = (R64, bool)>,
{
    let mut scored: Vec<_> = scored.into_iter().collect();
    let num_positives = scored.iter().filter(|(_, positive)| *positive).count();
    if num_positives == 0 {
        return None;
    }

    // sort by decreasing score
    scored.sort_by_key(|(score, _)| -*score);

    // one curve point per distinct score
    let prec_rec: Vec<_> = scored
        .iter()
        .group_by(|(score, _)| *score)
        .into_iter()
        .scan((0, 0), |(acc_tp, acc_fp), (_score, group)| {
            group.for_each(|&(_, positive)| {
                if positive {
                    *acc_tp += 1;
                } else {
                    *acc_fp += 1;
                }
            });
            let acc_tp = r64(*acc_tp as f64);
            let acc_fp = r64(*acc_fp as f64);
            Some(PrecRec {
                precision: acc_tp / (acc_tp + acc_fp),
                recall: acc_tp / num_positives as f64,
            })
        })
        .collect();

    Some(average_precision_by_prec_rec(&prec_rec))
}

/// Computes the average precision of each class.
///
/// `ground_truth` is a `[num_examples, num_classes]` binary indicator matrix
/// and `scores` has the same shape. A class without positive examples gets
/// zero precision and a warning.
pub fn average_precision_per_class(ground_truth: &Tensor, scores: &Tensor) -> Result<Vec<R64>> {
    ensure!(
        ground_truth.dim() == 2 && ground_truth.size() == scores.size(),
        "expect ground truth and scores of the same [num_examples, num_classes] shape, but get {:?} and {:?}",
        ground_truth.size(),
        scores.size()
    );
    let num_classes = ground_truth.size()[1];
    let aps: Vec<_> = (0..num_classes)
        .map(|class| {
            let truth = Vec::<f64>::from(&ground_truth.select(1, class).to_kind(Kind::Double));
            let score = Vec::<f64>::from(&scores.select(1, class).to_kind(Kind::Double));
            ensure!(
                score.iter().all(|score| score.is_finite()),
                "non-finite score found for class {}",
                class
            );

            let scored = izip!(score, truth).map(|(score, truth)| (r64(score), truth > 0.5));
            let ap = average_precision(scored).unwrap_or_else(|| {
                warn!(
                    "class {} has no positive example, its average precision is set to zero",
                    class
                );
                r64(0.0)
            });
            Ok(ap)
        })
        .collect::<Result<_>>()?;

    Ok(aps)
}
