//! Streams of decoded, augmented and batched examples.

use crate::common::*;
use bit_dl::{
    dataset::subsample_per_class,
    processor::{load_image, ImageTransformInit, MixUpInit, TransformMode},
};

/// The batch accepted by the training worker.
#[derive(Debug, TensorLike)]
pub struct TrainingRecord {
    /// The epoch over the training split of the first example in the batch.
    pub epoch: usize,
    pub step: usize,
    pub batch: ClassificationBatch,
}

#[derive(Debug, Clone)]
pub struct InputPipelineInit {
    pub batch_size: usize,
    pub batch_eval: usize,
    pub resize_size: usize,
    pub crop_size: usize,
    pub mixup_alpha: R64,
    /// If set, the training split keeps this number of examples per class.
    pub examples_per_class: Option<usize>,
    pub examples_per_class_seed: u64,
    /// The maximum number of waiting records per stage.
    pub worker_buf_size: Option<usize>,
}

impl InputPipelineInit {
    pub fn build(self, dataset: Arc<dyn ClassificationDataset>) -> Result<InputPipeline> {
        let Self {
            batch_size,
            batch_eval,
            resize_size,
            crop_size,
            mixup_alpha,
            examples_per_class,
            examples_per_class_seed,
            worker_buf_size,
        } = self;
        ensure!(batch_size > 0, "batch size must be positive");
        ensure!(batch_eval > 0, "evaluation batch size must be positive");

        let train_records: Vec<_> = {
            let records: Vec<_> = dataset.records(Split::Train).collect();
            match examples_per_class {
                Some(limit) => subsample_per_class(records, limit, examples_per_class_seed),
                None => records,
            }
        };
        let eval_records: Vec<_> = dataset.records(Split::Validation).collect();
        ensure!(!train_records.is_empty(), "the training split is empty");
        ensure!(!eval_records.is_empty(), "the validation split is empty");

        let train_transform =
            ImageTransformInit::new(TransformMode::Train, resize_size, crop_size).build()?;
        let eval_transform =
            ImageTransformInit::new(TransformMode::Eval, resize_size, crop_size).build()?;
        let mixup = MixUpInit { alpha: mixup_alpha }.build()?;

        info!(
            "input pipeline with {} training and {} validation examples, crop size {}, mixup alpha {}",
            train_records.len(),
            eval_records.len(),
            crop_size,
            mixup_alpha
        );

        Ok(InputPipeline {
            num_classes: dataset.num_classes(),
            batch_size,
            batch_eval,
            worker_buf_size,
            train_records: Arc::new(train_records),
            eval_records: Arc::new(eval_records),
            train_transform: Arc::new(train_transform),
            eval_transform: Arc::new(eval_transform),
            mixup: Arc::new(mixup),
            dataset,
        })
    }
}

#[derive(Debug)]
pub struct InputPipeline {
    dataset: Arc<dyn ClassificationDataset>,
    num_classes: usize,
    batch_size: usize,
    batch_eval: usize,
    worker_buf_size: Option<usize>,
    train_records: Arc<Vec<ExampleRecord>>,
    eval_records: Arc<Vec<ExampleRecord>>,
    train_transform: Arc<ImageTransform>,
    eval_transform: Arc<ImageTransform>,
    mixup: Arc<MixUp>,
}

impl InputPipeline {
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn num_train_examples(&self) -> usize {
        self.train_records.len()
    }

    pub fn num_eval_examples(&self) -> usize {
        self.eval_records.len()
    }

    pub fn batch_eval(&self) -> usize {
        self.batch_eval
    }

    /// The one-hot `[num_eval_examples, num_classes]` labels in evaluation order.
    ///
    /// The labels come from the dataset descriptor without decoding images.
    pub fn eval_ground_truth(&self) -> Tensor {
        let labels: Vec<i64> = self
            .dataset
            .labels(Split::Validation)
            .map(|label| label as i64)
            .collect();
        bit_dl::processor::one_hot(&labels, self.num_classes)
    }

    fn par_config(&self) -> par_stream::ParParams {
        let buf_size: par_stream::BufSize = self
            .worker_buf_size
            .map(|buf_size| Some(buf_size).into())
            .unwrap_or_else(|| 2.0.into());

        Some(par_stream::ParParamsConfig::Manual {
            num_workers: par_stream::NumWorkers::Default,
            buf_size,
        })
        .into()
    }

    /// The endless stream of augmented training batches.
    ///
    /// Examples are reshuffled on every pass over the split. Each batch has
    /// exactly `batch_size` examples and mixed labels if mixup is enabled.
    pub fn train_stream(&self) -> BoxStream<'static, Result<TrainingRecord>> {
        let par_config = self.par_config();

        // repeat shuffled epochs
        let stream = {
            let num_records = self.train_records.len();

            stream::iter(0..).flat_map(move |epoch| {
                let mut indexes = (0..num_records).collect_vec();
                indexes.shuffle(&mut StdRng::from_entropy());
                stream::iter(indexes.into_iter().map(move |index| (epoch, index)))
            })
        };

        // load and augment images
        let stream = {
            let records = self.train_records.clone();
            let transform = self.train_transform.clone();

            stream.par_map(par_config.clone(), move |(epoch, index)| {
                let records = records.clone();
                let transform = transform.clone();
                let mut rng = StdRng::from_entropy();

                move || {
                    let record = &records[index];
                    let image = load_image(&record.path)?;
                    let image = transform.forward(&image, &mut rng)?;
                    Fallible::Ok((epoch, image, record.label))
                }
            })
        };

        // batch and mix
        let num_classes = self.num_classes;
        let mixup = self.mixup.clone();

        stream
            .chunks(self.batch_size)
            .enumerate()
            .par_map(par_config, move |(step, results)| {
                let mixup = mixup.clone();
                let mut rng = StdRng::from_entropy();

                move || {
                    let mut timing = Timing::new("training batch");
                    let examples: Vec<_> = results.into_iter().collect::<Result<_>>()?;
                    let epoch = examples
                        .iter()
                        .map(|(epoch, _, _)| *epoch)
                        .min()
                        .ok_or_else(|| format_err!("empty batch"))?;
                    let pairs: Vec<_> = examples
                        .into_iter()
                        .map(|(_, image, label)| (image, label))
                        .collect();
                    let batch = ClassificationBatch::collate(&pairs, num_classes)?;
                    timing.set_record("collate");

                    let (images, labels) = mixup.forward(&batch.images, &batch.labels, &mut rng);
                    timing.set_record("mixup");
                    timing.report();

                    Fallible::Ok(TrainingRecord {
                        epoch,
                        step,
                        batch: ClassificationBatch { images, labels },
                    })
                }
            })
            .boxed()
    }

    /// The ordered stream of validation batches over `repeats` passes of the split.
    ///
    /// Images are resized without augmentation. The last batch keeps the
    /// remaining examples and can be smaller than `batch_eval`.
    pub fn eval_stream(&self, repeats: usize) -> BoxStream<'static, Result<ClassificationBatch>> {
        let par_config = self.par_config();
        let num_records = self.eval_records.len();
        let stream = stream::iter((0..repeats).flat_map(move |_| 0..num_records));

        let stream = {
            let records = self.eval_records.clone();
            let transform = self.eval_transform.clone();

            stream.par_map(par_config.clone(), move |index| {
                let records = records.clone();
                let transform = transform.clone();
                let mut rng = StdRng::from_entropy();

                move || {
                    let record = &records[index];
                    let image = load_image(&record.path)?;
                    let image = transform.forward(&image, &mut rng)?;
                    Fallible::Ok((image, record.label))
                }
            })
        };

        let num_classes = self.num_classes;
        stream
            .chunks(self.batch_eval)
            .par_map(par_config, move |results| {
                move || {
                    let pairs: Vec<_> = results.into_iter().collect::<Result<_>>()?;
                    ClassificationBatch::collate(&pairs, num_classes)
                }
            })
            .boxed()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bit_dl::dataset::ManifestDataset;

    const DESCRIPTOR: &str = r#"
categories: [cat, dog]
basepath: images
train:
  images:
    0: a.png
    1: b.png
    2: c.png
  gt:
    cat: [0, 1]
    dog: [2]
val:
  images:
    3: d.png
    4: e.png
    5: f.png
  gt:
    cat: [3]
    dog: [4, 5]
"#;

    pub(crate) fn prepare_dataset(dir: &Path) -> Result<Arc<dyn ClassificationDataset>> {
        let image_dir = dir.join("images");
        std::fs::create_dir_all(&image_dir)?;
        for (index, name) in ["a", "b", "c", "d", "e", "f"].iter().enumerate() {
            let image = Tensor::full(&[3, 10, 12], index as i64 * 40, (Kind::Uint8, Device::Cpu));
            tch::vision::image::save(&image, image_dir.join(format!("{}.png", name)))?;
        }
        std::fs::write(dir.join("cat_dog.yaml"), DESCRIPTOR)?;

        let dataset = ManifestDataset::open(dir, "cat_dog.yaml")?;
        Ok(Arc::new(dataset))
    }

    pub(crate) fn pipeline_init() -> InputPipelineInit {
        InputPipelineInit {
            batch_size: 2,
            batch_eval: 2,
            resize_size: 8,
            crop_size: 6,
            mixup_alpha: r64(0.0),
            examples_per_class: None,
            examples_per_class_seed: 0,
            worker_buf_size: None,
        }
    }

    fn pipeline(dataset: Arc<dyn ClassificationDataset>) -> Result<InputPipeline> {
        InputPipelineInit {
            mixup_alpha: r64(0.1),
            ..pipeline_init()
        }
        .build(dataset)
    }

    #[tokio::test]
    async fn training_batches() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pipeline = pipeline(prepare_dataset(dir.path())?)?;

        // 3 examples per epoch, so the second batch spans two epochs
        let records: Vec<_> = pipeline.train_stream().take(3).try_collect().await?;
        let steps: Vec<_> = records.iter().map(|record| record.step).collect();
        assert_eq!(steps, vec![0, 1, 2]);
        assert_eq!(records[0].epoch, 0);
        assert_eq!(records[1].epoch, 0);
        assert_eq!(records[2].epoch, 1);

        for record in &records {
            assert_eq!(record.batch.images.size(), vec![2, 3, 6, 6]);
            assert_eq!(record.batch.labels.size(), vec![2, 2]);
            let label_sums = Vec::<f32>::from(&record.batch.labels.sum_dim_intlist(
                &[1],
                false,
                Kind::Float,
            ));
            label_sums
                .iter()
                .for_each(|&sum| assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-5));
        }
        Ok(())
    }

    #[tokio::test]
    async fn ordered_eval_batches() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dataset = prepare_dataset(dir.path())?;
        let pipeline = pipeline(dataset)?;

        let batches: Vec<_> = pipeline.eval_stream(1).try_collect().await?;
        let sizes: Vec<_> = batches.iter().map(|batch| batch.batch_size()).collect();
        assert_eq!(sizes, vec![2, 1]);

        let labels = Tensor::cat(
            &batches.iter().map(|batch| batch.labels.shallow_clone()).collect_vec(),
            0,
        );
        assert!(labels.equal(&pipeline.eval_ground_truth()));

        // uniform images keep their value after resizing
        let first_pixel = f64::from(batches[0].images.get(0).mean(Kind::Float));
        assert_abs_diff_eq!(first_pixel, (120.0 - 127.5) / 127.5, epsilon = 1e-4);

        let batches: Vec<_> = pipeline.eval_stream(2).try_collect().await?;
        let sizes: Vec<_> = batches.iter().map(|batch| batch.batch_size()).collect();
        assert_eq!(sizes, vec![2, 2, 2]);
        Ok(())
    }

    #[test]
    fn subsampled_training_split() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pipeline = InputPipelineInit {
            examples_per_class: Some(1),
            ..pipeline_init()
        }
        .build(prepare_dataset(dir.path())?)?;
        assert_eq!(pipeline.num_train_examples(), 2);
        assert_eq!(pipeline.num_eval_examples(), 3);
        Ok(())
    }
}
