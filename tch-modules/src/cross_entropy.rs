use crate::common::*;

/// Categorical cross entropy computed from logits.
///
/// The target is either a `[batch_size]` int64 tensor of class indexes (sparse),
/// or a `[batch_size, n_classes]` float tensor of class probabilities. The
/// probability form accepts mixed labels produced by mix-up.
#[derive(Debug)]
pub struct CrossEntropyLoss {
    reduction: Reduction,
    sparse_target: bool,
}

impl CrossEntropyLoss {
    pub fn new(sparse_target: bool, reduction: Reduction) -> Self {
        Self {
            reduction,
            sparse_target,
        }
    }

    pub fn forward(&self, input: &Tensor, target: &Tensor) -> Tensor {
        // assume [batch_size, n_classes] input shape
        let (batch_size, num_classes) = input.size2().unwrap();

        // return zero tensor if (1) input is empty and (2) using mean reduction
        if input.numel() == 0 && self.reduction == Reduction::Mean {
            return Tensor::zeros(&[], (Kind::Float, input.device())).set_requires_grad(false);
        }

        let log_prob = input.log_softmax(1, Kind::Float);

        let loss = if self.sparse_target {
            debug_assert!(
                target.kind() == Kind::Int64 && target.size1().unwrap() == batch_size,
                "expect target a [{}] int64 tensor",
                batch_size
            );
            -log_prob.gather(1, &target.view([batch_size, 1]), false).view([batch_size])
        } else {
            debug_assert!(target.size2().unwrap() == (batch_size, num_classes));
            -(log_prob * target.to_kind(Kind::Float)).sum_dim_intlist(&[1], false, Kind::Float)
        };

        match self.reduction {
            Reduction::None => loss,
            Reduction::Sum => loss.sum(Kind::Float),
            Reduction::Mean => loss.mean(Kind::Float),
            Reduction::Other(_) => unimplemented!(),
        }
    }
}
