use crate::common::*;

/// A model replica on one device.
pub(crate) struct WorkerContext {
    pub device: Device,
    pub minibatch_size: usize,
    pub vs: nn::VarStore,
    pub model: ClassifierModel,
    pub optimizer: nn::Optimizer,
}

/// The statistics and scaled gradients of one mini-batch.
pub(crate) struct WorkerOutput {
    pub minibatch_size: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub gradients: Vec<Tensor>,
}

/// Builds one model replica per device and loads the pretrained backbone into the first.
///
/// Without a weights file the backbone keeps its random initialization.
pub(crate) async fn initialize_worker_contexts(
    classifier: ClassifierInit,
    weights_file: Option<Arc<Path>>,
    momentum: R64,
    weight_decay: R64,
    workers: &[(Device, usize)],
) -> Result<Vec<WorkerContext>> {
    const DUMMY_LR: f64 = 1.0;

    let mut init_timing = Timing::new("initialization");
    info!(
        "initializing a {:?} backbone with {} classes",
        classifier.backbone.num_units, classifier.num_classes
    );

    let mut worker_contexts =
        future::try_join_all(workers.iter().cloned().map(|(device, minibatch_size)| {
            let classifier = classifier.clone();
            tokio::task::spawn_blocking(move || {
                let vs = nn::VarStore::new(device);
                let model = classifier.build(&vs.root())?;
                let optimizer = nn::Sgd {
                    momentum: momentum.raw(),
                    wd: weight_decay.raw(),
                    ..Default::default()
                }
                .build(&vs, DUMMY_LR)?;

                Fallible::Ok(WorkerContext {
                    device,
                    minibatch_size,
                    vs,
                    model,
                    optimizer,
                })
            })
            .map(|result| Fallible::Ok(result??))
        }))
        .await?;
    init_timing.set_record("init worker contexts");

    // load pretrained weights (to first worker)
    if let Some(weights_file) = weights_file {
        worker_contexts = tokio::task::spawn_blocking(move || -> Result<_> {
            let master = worker_contexts
                .first()
                .ok_or_else(|| format_err!("worker list must not be empty"))?;
            bit_dl::model::load_bit_weights(&master.vs, &*weights_file)?;
            Ok(worker_contexts)
        })
        .map(|result| Fallible::Ok(result??))
        .await?;
        init_timing.set_record("load weights");
    }
    init_timing.report();

    Ok(worker_contexts)
}

/// Copies the master weights to the other replicas.
pub(crate) async fn sync_weights(
    worker_contexts: Vec<WorkerContext>,
) -> Result<Vec<WorkerContext>> {
    if worker_contexts.len() <= 1 {
        return Ok(worker_contexts);
    }

    let mut iter = worker_contexts.into_iter();
    let first_context = iter
        .next()
        .ok_or_else(|| format_err!("worker list must not be empty"))?;
    let first_vs = Arc::new(first_context.vs);

    let other_contexts = future::try_join_all(iter.map(|mut context| {
        let first_vs = first_vs.clone();
        tokio::task::spawn_blocking(move || -> Result<_> {
            context.vs.copy(&first_vs)?;
            Ok(context)
        })
        .map(|result| Fallible::Ok(result??))
    }))
    .await?;

    let first_context = WorkerContext {
        vs: Arc::try_unwrap(first_vs)
            .map_err(|_| format_err!("the master weights are still shared"))?,
        ..first_context
    };
    let worker_contexts: Vec<_> = iter::once(first_context).chain(other_contexts).collect();
    Ok(worker_contexts)
}

/// Runs forward and backward passes on every replica with its share of the batch.
pub(crate) async fn forward_step(
    worker_contexts: Vec<WorkerContext>,
    batch: &ClassificationBatch,
) -> Result<(Vec<WorkerContext>, Vec<WorkerOutput>)> {
    let sizes: Vec<_> = worker_contexts
        .iter()
        .map(|context| context.minibatch_size)
        .collect();
    let minibatches = batch.split(&sizes)?;

    let (worker_contexts, outputs): (Vec<_>, Vec<_>) = future::try_join_all(
        worker_contexts
            .into_iter()
            .zip_eq(minibatches)
            .map(|(mut context, minibatch)| {
                tokio::task::spawn_blocking(move || -> Result<_> {
                    let mut worker_timing = Timing::new("training worker");
                    let WorkerContext {
                        device,
                        minibatch_size,
                        ref vs,
                        ref model,
                        ref mut optimizer,
                    } = context;

                    let ClassificationBatch { images, labels } = minibatch.to_device(device);
                    worker_timing.set_record("to device");

                    let logits = model.forward(&images);
                    let loss =
                        CrossEntropyLoss::new(false, Reduction::Mean).forward(&logits, &labels);
                    worker_timing.set_record("forward");

                    optimizer.zero_grad();
                    loss.backward();
                    worker_timing.set_record("backward");

                    let gradients: Vec<_> = vs
                        .trainable_variables()
                        .iter()
                        .map(|tensor| tensor.grad() * minibatch_size as f64)
                        .collect();
                    optimizer.zero_grad();
                    worker_timing.set_record("extract gradients");
                    worker_timing.report();

                    let output = WorkerOutput {
                        minibatch_size,
                        loss: f64::from(&loss),
                        accuracy: metrics::accuracy(&logits, &labels)?,
                        gradients,
                    };
                    Ok((context, output))
                })
                .map(|result| Fallible::Ok(result??))
            }),
    )
    .await?
    .into_iter()
    .unzip();

    Ok((worker_contexts, outputs))
}

/// Averages the gradients on the master device and updates the master weights.
pub(crate) fn backward_step(
    worker_contexts: &mut [WorkerContext],
    outputs: &[WorkerOutput],
) -> Result<()> {
    tch::no_grad(|| {
        let batch_size: usize = outputs.iter().map(|output| output.minibatch_size).sum();
        let WorkerContext {
            device: master_device,
            ref vs,
            ref mut optimizer,
            ..
        } = *worker_contexts
            .first_mut()
            .ok_or_else(|| format_err!("worker list must not be empty"))?;

        // aggregate gradients
        let mut gradients_iter = outputs.iter().map(|output| &output.gradients);
        let init: Vec<_> = gradients_iter
            .next()
            .ok_or_else(|| format_err!("no worker output"))?
            .iter()
            .map(|grad| grad.to_device(master_device))
            .collect();
        let sum_gradients = gradients_iter.fold(init, |lhs, rhs| {
            lhs.into_iter()
                .zip_eq(rhs)
                .map(|(lhs, rhs)| lhs + rhs.to_device(master_device))
                .collect()
        });

        // optimize
        vs.trainable_variables()
            .into_iter()
            .zip_eq(sum_gradients)
            .for_each(|(var, grad)| {
                let _ = var.grad().copy_(&(grad / batch_size as f64));
            });
        optimizer.step();

        Ok(())
    })
}

/// Computes logits of a batch on the master replica.
pub(crate) async fn predict_step(
    context: WorkerContext,
    images: Tensor,
) -> Result<(WorkerContext, Tensor)> {
    tokio::task::spawn_blocking(move || {
        let logits = tch::no_grad(|| {
            context
                .model
                .forward(&images.to_device(context.device))
                .to_device(Device::Cpu)
        });
        (context, logits)
    })
    .await
    .map_err(Error::from)
}

/// Merges the mini-batch statistics weighted by mini-batch size.
pub(crate) fn merge_outputs(outputs: &[WorkerOutput]) -> (f64, f64) {
    let batch_size: usize = outputs.iter().map(|output| output.minibatch_size).sum();
    let (loss, accuracy) = outputs.iter().fold((0.0, 0.0), |(loss, accuracy), output| {
        let weight = output.minibatch_size as f64;
        (loss + output.loss * weight, accuracy + output.accuracy * weight)
    });
    (loss / batch_size as f64, accuracy / batch_size as f64)
}
