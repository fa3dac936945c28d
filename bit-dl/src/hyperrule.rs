//! The BiT hyper-parameter heuristics for fine-tuning.
//!
//! The resolution, the mixup strength and the learning rate schedule are
//! chosen from the dataset size and the batch size alone.

use crate::common::*;

/// The batch size the schedules are tuned for.
pub const REFERENCE_BATCH_SIZE: usize = 512;

/// The default base learning rate at the reference batch size.
pub const DEFAULT_BASE_LR: f64 = 0.003;

static KNOWN_DATASET_SIZES: Lazy<IndexMap<&'static str, (usize, usize)>> = Lazy::new(|| {
    IndexMap::from_iter([
        ("cifar10", (32, 32)),
        ("cifar100", (32, 32)),
        ("oxford_iiit_pet", (224, 224)),
        ("oxford_flowers102", (224, 224)),
        ("imagenet2012", (224, 224)),
        ("wikipaintings", (224, 224)),
    ])
});

/// Returns `(resize_size, crop_size)` for images of the original resolution.
pub fn get_resolution(height: usize, width: usize) -> (usize, usize) {
    if height * width < 96 * 96 {
        (160, 128)
    } else {
        (512, 480)
    }
}

/// Returns `(resize_size, crop_size)` for a known dataset.
pub fn get_resolution_from_dataset(dataset: &str) -> Result<(usize, usize)> {
    let (height, width) = *KNOWN_DATASET_SIZES.get(dataset).ok_or_else(|| {
        format_err!(
            "unsupported dataset '{}', expect one of {}",
            dataset,
            KNOWN_DATASET_SIZES.keys().join(", ")
        )
    })?;
    Ok(get_resolution(height, width))
}

/// Returns the mixup alpha.
pub fn get_mixup(num_examples: usize) -> f64 {
    if num_examples < 20_000 {
        0.0
    } else {
        0.1
    }
}

/// Returns the steps at which the learning rate changes.
///
/// The first support ends the warmup and the last one ends the training.
/// Steps are scaled inversely with the batch size.
pub fn get_schedule(num_examples: usize, batch_size: usize) -> Vec<usize> {
    let supports: [usize; 5] = if num_examples < 20_000 {
        [100, 200, 300, 400, 500]
    } else if num_examples < 500_000 {
        [500, 3000, 6000, 9000, 10_000]
    } else {
        [500, 6000, 12_000, 18_000, 20_000]
    };

    supports
        .into_iter()
        .map(|step| (step * REFERENCE_BATCH_SIZE / batch_size.max(1)).max(1))
        .collect()
}

/// Returns the learning rate at `step`, or `None` when the training ends.
pub fn get_lr(step: usize, num_examples: usize, base_lr: f64, batch_size: usize) -> Option<f64> {
    let supports = get_schedule(num_examples, batch_size);
    let base_lr = base_lr * batch_size as f64 / REFERENCE_BATCH_SIZE as f64;
    let (&warmup, &last) = (supports.first()?, supports.last()?);

    if step < warmup {
        Some(base_lr * step as f64 / warmup as f64)
    } else if step >= last {
        None
    } else {
        let num_decays = supports[1..].iter().filter(|&&support| support < step).count();
        Some(base_lr * 0.1f64.powi(num_decays as i32))
    }
}

/// The learning rate as a function of the training step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LrPolicy {
    /// Warmup followed by staircase decay, see [get_lr].
    BitHyperrule {
        base_lr: R64,
        num_examples: usize,
        batch_size: usize,
    },
    /// Fixed rate for `num_steps` steps.
    Constant { lr: R64, num_steps: usize },
    /// The rate of the last `(step, lr)` entry not after the current step.
    StepWise {
        steps: Vec<(usize, R64)>,
        num_steps: usize,
    },
}

impl LrPolicy {
    pub fn new_bit_hyperrule(base_lr: R64, num_examples: usize, batch_size: usize) -> Result<Self> {
        ensure!(batch_size > 0, "batch size must be positive");
        ensure!(base_lr >= 0.0, "the lr must be non-negative");
        Ok(Self::BitHyperrule {
            base_lr,
            num_examples,
            batch_size,
        })
    }

    pub fn new_constant(lr: R64, num_steps: usize) -> Result<Self> {
        ensure!(lr >= 0.0, "the lr must be non-negative");
        Ok(Self::Constant { lr, num_steps })
    }

    pub fn new_step_wise(steps: Vec<(usize, R64)>, num_steps: usize) -> Result<Self> {
        ensure!(
            !steps.is_empty() && steps[0].0 == 0,
            "the steps must start from zero"
        );
        ensure!(
            steps
                .iter()
                .tuple_windows()
                .all(|((lhs, _), (rhs, _))| lhs < rhs),
            "the steps must be monotonic"
        );
        ensure!(
            steps.iter().all(|(_, lr)| *lr >= 0.0),
            "the lr must be non-negative"
        );
        Ok(Self::StepWise { steps, num_steps })
    }

    /// The total number of training steps.
    pub fn schedule_length(&self) -> usize {
        match *self {
            Self::BitHyperrule {
                num_examples,
                batch_size,
                ..
            } => get_schedule(num_examples, batch_size)
                .last()
                .copied()
                .unwrap_or(0),
            Self::Constant { num_steps, .. } => num_steps,
            Self::StepWise { num_steps, .. } => num_steps,
        }
    }

    /// The learning rate at `step`, or `None` after the last step.
    pub fn lr(&self, step: usize) -> Option<R64> {
        match *self {
            Self::BitHyperrule {
                base_lr,
                num_examples,
                batch_size,
            } => get_lr(step, num_examples, base_lr.raw(), batch_size).map(r64),
            Self::Constant { lr, num_steps } => (step < num_steps).then(|| lr),
            Self::StepWise {
                ref steps,
                num_steps,
            } => {
                if step >= num_steps {
                    return None;
                }
                let index = match steps.binary_search_by_key(&step, |(begin, _)| *begin) {
                    Ok(index) => index,
                    Err(index) => index.saturating_sub(1),
                };
                Some(steps[index].1)
            }
        }
    }
}

/// The training progress that determines the learning rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LrState {
    pub step: usize,
}

impl LrState {
    /// Returns the state of the next step and the learning rate of the current step.
    pub fn advance(self, policy: &LrPolicy) -> (Self, Option<R64>) {
        let lr = policy.lr(self.step);
        let next = Self {
            step: self.step + 1,
        };
        (next, lr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution() {
        assert_eq!(get_resolution(32, 32), (160, 128));
        assert_eq!(get_resolution(96, 96), (512, 480));
        assert_eq!(get_resolution_from_dataset("cifar10").unwrap(), (160, 128));
        assert_eq!(
            get_resolution_from_dataset("wikipaintings").unwrap(),
            (512, 480)
        );
        assert!(get_resolution_from_dataset("mnist").is_err());
    }

    #[test]
    fn schedule_by_dataset_size() {
        assert_eq!(get_schedule(1000, 512), vec![100, 200, 300, 400, 500]);
        assert_eq!(
            get_schedule(20_000, 512),
            vec![500, 3000, 6000, 9000, 10_000]
        );
        assert_eq!(
            get_schedule(500_000, 512),
            vec![500, 6000, 12_000, 18_000, 20_000]
        );
        assert_eq!(get_schedule(1000, 128), vec![400, 800, 1200, 1600, 2000]);
        assert_eq!(get_mixup(19_999), 0.0);
        assert_eq!(get_mixup(20_000), 0.1);
    }

    #[test]
    fn lr_warmup_and_decay() {
        let lr = |step| get_lr(step, 1000, 0.003, 512);

        assert_eq!(lr(0), Some(0.0));
        assert_abs_diff_eq!(lr(50).unwrap(), 0.0015);
        assert_abs_diff_eq!(lr(100).unwrap(), 0.003);
        assert_abs_diff_eq!(lr(200).unwrap(), 0.003);
        assert_abs_diff_eq!(lr(201).unwrap(), 0.0003);
        assert_abs_diff_eq!(lr(399).unwrap(), 0.00003);
        assert_abs_diff_eq!(lr(401).unwrap(), 0.000003);
        assert_eq!(lr(500), None);
        assert_eq!(lr(10_000), None);
    }

    #[test]
    fn lr_non_increasing_after_warmup() {
        let lrs: Vec<_> = (100..500)
            .map(|step| get_lr(step, 1000, 0.003, 256).unwrap())
            .collect();
        assert!(lrs.iter().all(|&lr| lr >= 0.0));
        assert!(lrs.iter().tuple_windows().all(|(lhs, rhs)| lhs >= rhs));
    }

    #[test]
    fn lr_state_is_pure() {
        let policy = LrPolicy::new_bit_hyperrule(r64(0.003), 1000, 512).unwrap();
        let state = LrState { step: 150 };

        let (next1, lr1) = state.advance(&policy);
        let (next2, lr2) = state.advance(&policy);
        assert_eq!(next1, next2);
        assert_eq!(lr1, lr2);
        assert_eq!(next1.step, 151);
        assert_eq!(policy.schedule_length(), 500);
    }

    #[test]
    fn step_wise_policy() {
        let policy =
            LrPolicy::new_step_wise(vec![(0, r64(0.1)), (10, r64(0.01))], 20).unwrap();
        assert_eq!(policy.lr(0), Some(r64(0.1)));
        assert_eq!(policy.lr(9), Some(r64(0.1)));
        assert_eq!(policy.lr(10), Some(r64(0.01)));
        assert_eq!(policy.lr(20), None);

        assert!(LrPolicy::new_step_wise(vec![(1, r64(0.1))], 20).is_err());
        assert!(
            LrPolicy::new_step_wise(vec![(0, r64(0.1)), (5, r64(0.1)), (5, r64(0.1))], 20)
                .is_err()
        );
    }
}
