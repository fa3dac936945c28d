//! The BiT fine-tuning and evaluation program.

pub mod common;
pub mod config;
pub mod evaluate;
pub mod input_pipeline;
pub mod logging;
pub mod report;
pub mod train;
pub mod utils;

use crate::{
    common::*,
    config::Config,
    input_pipeline::InputPipelineInit,
    report::ApReport,
    train::{EpochPlan, FineTuneInit, FineTuneOutput},
};
use bit_dl::{dataset::Wikipaintings, hyperrule};

/// The entry of the fine-tuning program.
pub async fn start(config: Arc<Config>) -> Result<()> {
    let start_time = Local::now();
    let args = &config.args;
    let logging_dir: Arc<Path> = args
        .logdir
        .join(&args.name)
        .join(format!("{}", start_time.format(utils::FILE_STRFTIME)))
        .into_boxed_path()
        .into();

    ensure!(
        args.dataset == "wikipaintings",
        "unsupported dataset '{}'",
        args.dataset
    );

    // create dirs and save config
    {
        tokio::fs::create_dir_all(&*logging_dir).await?;
        let path = logging_dir.join("config.json5");
        let text = serde_json::to_string_pretty(&*config)?;
        tokio::fs::write(&path, text).await?;
    }

    // download pretrained weights
    let weights_file: Arc<Path> =
        utils::ensure_pretrained_weights(&args.bit_pretrained_dir, &args.model)
            .await?
            .into_boxed_path()
            .into();

    // load dataset
    info!("loading dataset {} ({})", args.dataset, args.dataset_config);
    let dataset: Arc<dyn ClassificationDataset> = Arc::new(
        Wikipaintings::load(
            args.tfds_manual_dir.as_deref(),
            config.cache_dir()?,
            args.dataset_config,
        )
        .await?,
    );
    let class_names: Vec<String> = dataset.classes().iter().cloned().collect();
    let train_info = DatasetInfo::new(
        &*dataset,
        Split::Train,
        args.examples_per_class.map(NonZeroUsize::get),
    );
    info!(
        "{} training examples in {} classes",
        train_info.num_examples, train_info.num_classes
    );

    // build input pipeline
    let workers = config.runtime.device_config.workers(args.batch.get())?;
    let (resize_size, crop_size) = hyperrule::get_resolution_from_dataset(&args.dataset)?;
    let pipeline = Arc::new(
        InputPipelineInit {
            batch_size: args.batch.get(),
            batch_eval: args.batch_eval.get(),
            resize_size,
            crop_size,
            mixup_alpha: r64(hyperrule::get_mixup(train_info.num_examples)),
            examples_per_class: args.examples_per_class.map(NonZeroUsize::get),
            examples_per_class_seed: args.examples_per_class_seed,
            worker_buf_size: config.runtime.pipeline.worker_buf_size,
        }
        .build(dataset.clone())?,
    );

    // plan the schedule
    let lr_policy = config.lr_policy(train_info.num_examples)?;
    let plan = EpochPlan::new(
        lr_policy.schedule_length(),
        args.eval_every.map(NonZeroUsize::get),
    )?;

    // create channels
    let (logging_tx, logging_rx) = broadcast::channel(64);
    let (data_tx, data_rx) = mpsc::channel(workers.len() * 2);

    // start logger
    let logging_future = logging::logging_worker(logging_dir.clone(), logging_rx)
        .await?
        .instrument(info_span!("logging"));

    // feeding worker
    let training_data_future = {
        let pipeline = pipeline.clone();

        tokio::task::spawn(async move {
            let mut train_stream = pipeline.train_stream();

            while let Some(result) = train_stream.next().await {
                let record = result?;
                if data_tx.send(record).await.is_err() {
                    // the training worker has finished
                    break;
                }
            }

            Fallible::Ok(())
        })
        .map(|result| Fallible::Ok(result??))
    };

    // training worker
    let training_worker_future = {
        let config = config.clone();
        let init = FineTuneInit {
            classifier: ClassifierInit::new(args.model, dataset.num_classes()),
            weights_file: Some(weights_file),
            lr_policy,
            plan,
            workers,
            momentum: config.runtime.optimizer.momentum,
            weight_decay: config.runtime.optimizer.weight_decay,
            enable_training_scalars: config.runtime.logging.enable_training_scalars,
        };

        tokio::task::spawn(async move {
            let output = train::fine_tune(init, pipeline.clone(), data_rx, logging_tx.clone())
                .instrument(info_span!("fine_tune"))
                .await?;
            let report = report_results(&config, &pipeline, class_names, output, &logging_tx)?;
            Fallible::Ok(report)
        })
        .map(|result| Fallible::Ok(result??))
    };

    let ((), report, ()) = futures::try_join!(
        training_data_future,
        training_worker_future,
        logging_future
    )?;

    let output_dir = config.output_dir()?;
    let path = report.save(&output_dir, &config.args.name)?;
    info!("average precision scores are saved to '{}'", path.display());

    Ok(())
}

/// Computes per-class AP of the test predictions and logs the results.
fn report_results(
    config: &Config,
    pipeline: &input_pipeline::InputPipeline,
    class_names: Vec<String>,
    output: FineTuneOutput,
    logging_tx: &broadcast::Sender<logging::LoggingMessage>,
) -> Result<ApReport> {
    let FineTuneOutput { history, scores } = output;
    let ground_truth = pipeline.eval_ground_truth();
    info!(
        "Num test examples: {}, num test classes: {}",
        ground_truth.size()[0],
        ground_truth.size()[1]
    );

    let report = ApReport::new(class_names, &ground_truth, &scores)?;

    for summary in &history {
        info!(
            "Step: {}, Test accuracy: {:.3}",
            summary.step, summary.accuracy
        );
    }

    info!("Average precision scores:");
    for (name, ap) in izip!(&report.class_names, &report.aps) {
        info!("{}\t{:.4}", name, ap);
    }

    let final_step = history.last().map(|summary| summary.step).unwrap_or(0);
    if config.runtime.logging.enable_per_class_ap {
        let _ = logging_tx.send(logging::LoggingMessage::new_class_scalars(
            "test/ap",
            final_step,
            izip!(report.class_names.clone(), report.aps.clone()),
        ));
    }
    if let Some(mean_ap) = report.mean_ap() {
        info!("mAP: {:.4}", mean_ap);
        let _ = logging_tx.send(logging::LoggingMessage::new_scalar(
            "test/mAP",
            final_step,
            mean_ap.raw(),
        ));
    }

    Ok(report)
}
