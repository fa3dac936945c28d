//! The fine-tuning loop over one or more devices.

mod worker;

use crate::{
    common::*,
    evaluate::{num_prediction_batches, truncate_predictions, ValidationSummary},
    input_pipeline::{InputPipeline, TrainingRecord},
    logging::LoggingMessage,
    utils::RateCounter,
};
use worker::*;

/// The number of passes over the test split the prediction stream spans.
const PREDICTION_REPEATS: usize = 2;

/// The partition of the schedule into validation epochs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochPlan {
    pub steps_per_epoch: usize,
    pub epochs: usize,
}

impl EpochPlan {
    /// Validates every `eval_every` steps, or once at the end of the schedule if unset.
    pub fn new(schedule_length: usize, eval_every: Option<usize>) -> Result<Self> {
        ensure!(schedule_length > 0, "the schedule has no training step");
        let steps_per_epoch = eval_every.unwrap_or(schedule_length);
        ensure!(steps_per_epoch > 0, "eval_every must be positive");
        let epochs = schedule_length / steps_per_epoch.min(schedule_length);

        Ok(Self {
            steps_per_epoch,
            epochs,
        })
    }
}

/// The validation result at the end of an epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochSummary {
    pub epoch: usize,
    /// The number of finished training steps.
    pub step: usize,
    pub loss: f64,
    pub accuracy: f64,
}

#[derive(Debug, Clone)]
pub struct FineTuneInit {
    pub classifier: ClassifierInit,
    /// The pretrained checkpoint loaded into the backbone, if any.
    pub weights_file: Option<Arc<Path>>,
    pub lr_policy: LrPolicy,
    pub plan: EpochPlan,
    /// Devices with their mini-batch sizes, the first is the master device.
    pub workers: Vec<(Device, usize)>,
    pub momentum: R64,
    pub weight_decay: R64,
    pub enable_training_scalars: bool,
}

#[derive(Debug)]
pub struct FineTuneOutput {
    pub history: Vec<EpochSummary>,
    /// `[num_test_examples, num_classes]` logits in test split order.
    pub scores: Tensor,
}

/// Fine-tunes the model on batches from `data_rx` and predicts the test split.
pub async fn fine_tune(
    init: FineTuneInit,
    pipeline: Arc<InputPipeline>,
    mut data_rx: mpsc::Receiver<TrainingRecord>,
    logging_tx: broadcast::Sender<LoggingMessage>,
) -> Result<FineTuneOutput> {
    let FineTuneInit {
        classifier,
        weights_file,
        lr_policy,
        plan:
            EpochPlan {
                steps_per_epoch,
                epochs,
            },
        workers,
        momentum,
        weight_decay,
        enable_training_scalars,
    } = init;
    ensure!(!workers.is_empty(), "worker list must not be empty");
    let batch_size: usize = workers.iter().map(|(_, size)| size).sum();

    info!(
        "use device configuration (device, minibatch_size): {:?}",
        workers
    );
    info!("steps_per_epoch={}, epochs={}", steps_per_epoch, epochs);

    let mut worker_contexts = initialize_worker_contexts(
        classifier,
        weights_file,
        momentum,
        weight_decay,
        &workers,
    )
    .await?;
    info!("initialization finished, start fine-tuning");

    let mut lr_state = LrState::default();
    let mut rate_counter = RateCounter::per_second();
    let mut history = vec![];
    let mut schedule_ended = false;

    for epoch in 0..epochs {
        for _ in 0..steps_per_epoch {
            let mut training_timing = Timing::new("training loop");
            let step = lr_state.step;

            // update learning rate
            let (next_state, lr) = lr_state.advance(&lr_policy);
            let lr = match lr {
                Some(lr) => lr,
                None => {
                    info!("the learning rate schedule ends at step {}", step);
                    schedule_ended = true;
                    break;
                }
            };
            lr_state = next_state;
            worker_contexts[0].optimizer.set_lr(lr.raw());

            // load input data
            let TrainingRecord {
                epoch: pass,
                batch,
                ..
            } = data_rx
                .recv()
                .await
                .ok_or_else(|| format_err!("the training data stream stopped unexpectedly"))?;
            ensure!(
                batch.batch_size() == batch_size,
                "expect a batch of {} examples, but get {}",
                batch_size,
                batch.batch_size()
            );
            training_timing.set_record("wait for data");

            // sync weights among workers
            worker_contexts = sync_weights(worker_contexts).await?;
            training_timing.set_record("sync weights");

            // forward step
            let (worker_contexts_, outputs) = forward_step(worker_contexts, &batch).await?;
            worker_contexts = worker_contexts_;
            training_timing.set_record("forward step");

            // backward step
            let (worker_contexts_, outputs) = tokio::task::spawn_blocking(move || -> Result<_> {
                backward_step(&mut worker_contexts, &outputs)?;
                Ok((worker_contexts, outputs))
            })
            .map(|result| Fallible::Ok(result??))
            .await?;
            worker_contexts = worker_contexts_;
            training_timing.set_record("backward step");

            let (loss, accuracy) = merge_outputs(&outputs);
            ensure!(loss.is_finite(), "non-finite loss detected at step {}", step);

            // send statistics to logger
            if enable_training_scalars {
                let _ = logging_tx.send(LoggingMessage::new_scalar("train/loss", step, loss));
                let _ = logging_tx.send(LoggingMessage::new_scalar(
                    "train/accuracy",
                    step,
                    accuracy,
                ));
                let _ = logging_tx.send(LoggingMessage::new_scalar(
                    "train/learning_rate",
                    step,
                    lr.raw(),
                ));
            }

            // print message
            rate_counter.add(1.0);
            match rate_counter.rate() {
                Some(batch_rate) => info!(
                    "epoch: {}\tpass: {}\tstep: {}\tlr: {:.5}\tloss: {:.4}\taccuracy: {:.3}\t{:.2} records/s",
                    epoch,
                    pass,
                    step,
                    lr,
                    loss,
                    accuracy,
                    batch_rate * batch_size as f64
                ),
                None => debug!(
                    "epoch: {}\tpass: {}\tstep: {}\tlr: {:.5}\tloss: {:.4}",
                    epoch, pass, step, lr, loss
                ),
            }

            training_timing.set_record("finalize");
            training_timing.report();
        }

        // validate at epoch boundary
        let master = worker_contexts.remove(0);
        let (master, summary) = validate(master, &pipeline)
            .instrument(info_span!("validate", epoch))
            .await?;
        worker_contexts.insert(0, master);

        let summary = EpochSummary {
            epoch,
            step: lr_state.step,
            loss: summary.loss().unwrap_or(f64::NAN),
            accuracy: summary.accuracy().unwrap_or(f64::NAN),
        };
        info!(
            "epoch: {}\tstep: {}\tval_loss: {:.4}\tval_accuracy: {:.3}",
            summary.epoch, summary.step, summary.loss, summary.accuracy
        );
        let _ = logging_tx.send(LoggingMessage::new_scalar(
            "val/loss",
            summary.step,
            summary.loss,
        ));
        let _ = logging_tx.send(LoggingMessage::new_scalar(
            "val/accuracy",
            summary.step,
            summary.accuracy,
        ));
        history.push(summary);

        if schedule_ended {
            break;
        }
    }

    // predict the test split
    info!("predicting the test split");
    let master = worker_contexts.remove(0);
    let (_master, scores) = predict(master, &pipeline)
        .instrument(info_span!("predict"))
        .await?;

    Ok(FineTuneOutput { history, scores })
}

/// Computes loss and accuracy over one pass of the validation split.
async fn validate(
    mut context: WorkerContext,
    pipeline: &InputPipeline,
) -> Result<(WorkerContext, ValidationSummary)> {
    let mut summary = ValidationSummary::default();
    let mut stream = pipeline.eval_stream(1);

    while let Some(batch) = stream.next().await {
        let ClassificationBatch { images, labels } = batch?;
        let (context_, logits) = predict_step(context, images).await?;
        context = context_;
        summary.add(&logits, &labels)?;
    }

    Ok((context, summary))
}

/// Collects logits of exactly the number of test examples in split order.
async fn predict(
    mut context: WorkerContext,
    pipeline: &InputPipeline,
) -> Result<(WorkerContext, Tensor)> {
    let num_examples = pipeline.num_eval_examples();
    let num_batches = num_prediction_batches(num_examples, pipeline.batch_eval());
    let mut stream = pipeline
        .eval_stream(PREDICTION_REPEATS)
        .take(num_batches);
    let mut batches = Vec::with_capacity(num_batches);

    while let Some(batch) = stream.next().await {
        let (context_, logits) = predict_step(context, batch?.images).await?;
        context = context_;
        batches.push(logits);
    }

    let scores = truncate_predictions(&batches, num_examples)?;
    Ok((context, scores))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_plan() -> Result<()> {
        assert_eq!(
            EpochPlan::new(500, None)?,
            EpochPlan {
                steps_per_epoch: 500,
                epochs: 1
            }
        );
        assert_eq!(
            EpochPlan::new(500, Some(100))?,
            EpochPlan {
                steps_per_epoch: 100,
                epochs: 5
            }
        );
        assert_eq!(
            EpochPlan::new(500, Some(300))?,
            EpochPlan {
                steps_per_epoch: 300,
                epochs: 1
            }
        );
        // a long epoch is cut short by the end of the schedule
        assert_eq!(
            EpochPlan::new(500, Some(800))?,
            EpochPlan {
                steps_per_epoch: 800,
                epochs: 1
            }
        );
        assert!(EpochPlan::new(0, None).is_err());
        Ok(())
    }

    fn tiny_classifier(num_classes: usize) -> ClassifierInit {
        ClassifierInit {
            backbone: bit_dl::model::BackboneInit {
                num_units: [1, 1, 1, 1],
                filters_factor: 2,
            },
            num_classes,
        }
    }

    #[tokio::test]
    async fn fine_tune_until_schedule_ends() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dataset = crate::input_pipeline::tests::prepare_dataset(dir.path())?;
        let pipeline = Arc::new(
            crate::input_pipeline::InputPipelineInit {
                resize_size: 36,
                crop_size: 32,
                ..crate::input_pipeline::tests::pipeline_init()
            }
            .build(dataset)?,
        );

        let (data_tx, data_rx) = mpsc::channel(4);
        let records: Vec<_> = pipeline.train_stream().take(3).try_collect().await?;
        for record in records {
            data_tx
                .send(record)
                .await
                .map_err(|_| format_err!("the training data stream is closed"))?;
        }
        drop(data_tx);

        let (logging_tx, mut logging_rx) = broadcast::channel(64);
        let init = FineTuneInit {
            classifier: tiny_classifier(2),
            weights_file: None,
            lr_policy: LrPolicy::new_constant(r64(0.01), 3)?,
            plan: EpochPlan::new(4, Some(2))?,
            workers: vec![(Device::Cpu, 2)],
            momentum: r64(0.9),
            weight_decay: r64(0.0),
            enable_training_scalars: true,
        };
        let FineTuneOutput { history, scores } =
            fine_tune(init, pipeline.clone(), data_rx, logging_tx).await?;

        // the second epoch is cut short by the end of the schedule
        let steps: Vec<_> = history.iter().map(|summary| summary.step).collect();
        assert_eq!(steps, vec![2, 3]);
        assert_eq!(scores.size(), vec![pipeline.num_eval_examples() as i64, 2]);

        let mut lr_scalars = vec![];
        while let Ok(msg) = logging_rx.try_recv() {
            if msg.tag == "train/learning_rate" {
                lr_scalars.extend(msg.scalars());
            }
        }
        let lr_steps: Vec<_> = lr_scalars.iter().map(|(_, step, _)| *step).collect();
        assert_eq!(lr_steps, vec![0, 1, 2]);
        lr_scalars
            .iter()
            .for_each(|(_, _, lr)| assert_abs_diff_eq!(*lr, 0.01, epsilon = 1e-7));
        Ok(())
    }

    #[tokio::test]
    async fn split_batch_matches_single_worker_update() -> Result<()> {
        let single = initialize_worker_contexts(
            tiny_classifier(3),
            None,
            r64(0.9),
            r64(1e-4),
            &[(Device::Cpu, 2)],
        )
        .await?;
        let mut split = initialize_worker_contexts(
            tiny_classifier(3),
            None,
            r64(0.9),
            r64(1e-4),
            &[(Device::Cpu, 1), (Device::Cpu, 1)],
        )
        .await?;

        // a non-zero head lets the gradients reach the backbone
        let head_weight = single[0].vs.variables()["head.dense.weight"].shallow_clone();
        tch::no_grad(|| {
            let noise = Tensor::randn(&head_weight.size(), FLOAT_CPU) * 0.1;
            let _ = head_weight.shallow_clone().copy_(&noise);
        });
        let initial_head_weight = head_weight.copy();
        split[0].vs.copy(&single[0].vs)?;
        let split = sync_weights(split).await?;

        let batch = ClassificationBatch {
            images: Tensor::randn(&[2, 3, 32, 32], FLOAT_CPU),
            labels: bit_dl::processor::one_hot(&[0, 2], 3),
        };

        let mut results = vec![];
        for mut contexts in [single, split] {
            contexts[0].optimizer.set_lr(0.1);
            let (mut contexts, outputs) = forward_step(contexts, &batch).await?;
            backward_step(&mut contexts, &outputs)?;
            results.push((contexts, merge_outputs(&outputs)));
        }
        let (split, (split_loss, split_accuracy)) = results.pop().unwrap();
        let (single, (single_loss, single_accuracy)) = results.pop().unwrap();

        assert_abs_diff_eq!(single_loss, split_loss, epsilon = 1e-5);
        assert_abs_diff_eq!(single_accuracy, split_accuracy);

        let split_vars = split[0].vs.variables();
        for (name, var) in single[0].vs.variables() {
            assert!(
                var.allclose(&split_vars[&name], 1e-4, 1e-6, false),
                "'{}' differs between the single and split updates",
                name
            );
        }
        assert!(!single[0].vs.variables()["head.dense.weight"].allclose(
            &initial_head_weight,
            1e-5,
            1e-8,
            false
        ));
        Ok(())
    }
}
