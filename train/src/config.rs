//! Command line arguments and runtime configuration.

use crate::common::*;
use bit_dl::dataset::WikipaintingsVariant;

pub use args::*;
pub use runtime::*;

/// The effective configuration of a run, saved along with the logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub args: Args,
    pub runtime: RuntimeConfig,
}

impl Config {
    /// Combines the arguments with the runtime config file if given.
    pub fn new(args: Args) -> Result<Self> {
        let runtime = match &args.config_file {
            Some(path) => RuntimeConfig::open(path).with_context(|| {
                format!("failed to load config file '{}'", path.display())
            })?,
            None => RuntimeConfig::default(),
        };
        Ok(Self { args, runtime })
    }

    /// The directory where the AP report is written, and datasets are cached by default.
    pub fn output_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.args.output_dir {
            return Ok(dir.clone());
        }
        let home = env::var_os("HOME")
            .ok_or_else(|| format_err!("HOME is not set, please specify --output_dir"))?;
        Ok(PathBuf::from(home).join("tensorflow_datasets"))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        match &self.runtime.pipeline.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => self.output_dir(),
        }
    }

    /// The learning rate policy for a training split of `num_examples` examples.
    ///
    /// A schedule in the runtime config replaces the default rule. Its length
    /// defaults to the length of the default rule.
    pub fn lr_policy(&self, num_examples: usize) -> Result<LrPolicy> {
        let base_lr = self.args.base_lr;
        ensure!(
            base_lr.is_finite(),
            "the base learning rate must be finite, but get {}",
            base_lr
        );
        let hyperrule =
            LrPolicy::new_bit_hyperrule(r64(base_lr), num_examples, self.args.batch.get())?;
        let default_length = hyperrule.schedule_length();

        let policy = match &self.runtime.lr_schedule {
            None => hyperrule,
            Some(LearningRateSchedule::Constant { lr, num_steps }) => {
                LrPolicy::new_constant(*lr, num_steps.unwrap_or(default_length))?
            }
            Some(LearningRateSchedule::StepWise { steps, num_steps }) => {
                LrPolicy::new_step_wise(steps.clone(), num_steps.unwrap_or(default_length))?
            }
        };
        Ok(policy)
    }
}

mod args {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize, StructOpt)]
    #[structopt(rename_all = "snake_case")]
    /// Fine-tune a pretrained BiT model on an image classification dataset
    pub struct Args {
        #[structopt(long)]
        /// name of this run, which names the log directory and the report file
        pub name: String,
        #[structopt(long)]
        /// the pretrained model, such as BiT-M-R50x1
        pub model: ModelName,
        #[structopt(long)]
        /// the dataset name
        pub dataset: String,
        #[structopt(long, default_value = "Wikipaintings_100")]
        /// the dataset variant
        pub dataset_config: WikipaintingsVariant,
        #[structopt(long)]
        /// the directory to store logs
        pub logdir: PathBuf,
        #[structopt(long, default_value = ".")]
        /// the directory to store pretrained weights
        pub bit_pretrained_dir: PathBuf,
        #[structopt(long, default_value = "512")]
        /// the training batch size
        pub batch: NonZeroUsize,
        #[structopt(long, default_value = "32")]
        /// the evaluation batch size
        pub batch_eval: NonZeroUsize,
        #[structopt(long, default_value = "0.003")]
        /// the base learning rate for a batch of 512 examples
        pub base_lr: f64,
        #[structopt(long)]
        /// validate every this number of steps
        pub eval_every: Option<NonZeroUsize>,
        #[structopt(long)]
        /// keep this number of training examples per class
        pub examples_per_class: Option<NonZeroUsize>,
        #[structopt(long, default_value = "0")]
        /// the random seed to select examples per class
        pub examples_per_class_seed: u64,
        #[structopt(long)]
        /// the manually downloaded dataset directory
        pub tfds_manual_dir: Option<PathBuf>,
        #[structopt(long)]
        /// the directory of the report file, defaults to ~/tensorflow_datasets
        pub output_dir: Option<PathBuf>,
        #[structopt(long)]
        /// the json5 runtime configuration file
        pub config_file: Option<PathBuf>,
    }
}

mod runtime {
    use super::*;

    /// Options loaded from the optional json5 configuration file.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(default)]
    pub struct RuntimeConfig {
        pub device_config: DeviceConfig,
        pub optimizer: OptimizerConfig,
        /// If set, it replaces the learning rate rule.
        pub lr_schedule: Option<LearningRateSchedule>,
        pub pipeline: PipelineConfig,
        pub logging: LoggingConfig,
    }

    impl RuntimeConfig {
        pub fn open<P>(path: P) -> Result<Self>
        where
            P: AsRef<Path>,
        {
            let text = std::fs::read_to_string(path)?;
            Self::from_json5(&text)
        }

        pub fn from_json5(text: &str) -> Result<Self> {
            let config = json5::from_str(text)?;
            Ok(config)
        }
    }

    /// Training device options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub enum DeviceConfig {
        /// Use single device.
        SingleDevice {
            #[serde(with = "tch_serde::serde_device")]
            device: Device,
        },
        /// Split the batch evenly across devices.
        MultiDevice {
            #[serde(with = "serde_vec_device")]
            devices: Vec<Device>,
        },
        /// Use multiple device with mini-batch size set for each device.
        NonUniformMultiDevice { devices: Vec<WorkerConfig> },
    }

    impl Default for DeviceConfig {
        fn default() -> Self {
            Self::SingleDevice {
                device: Device::cuda_if_available(),
            }
        }
    }

    impl DeviceConfig {
        pub fn num_devices(&self) -> usize {
            match self {
                Self::SingleDevice { .. } => 1,
                Self::MultiDevice { devices } => devices.len(),
                Self::NonUniformMultiDevice { devices } => devices.len(),
            }
        }

        /// The devices paired with their mini-batch sizes.
        ///
        /// The first device is the master device that owns the optimizer.
        pub fn workers(&self, batch_size: usize) -> Result<Vec<(Device, usize)>> {
            let workers: Vec<_> = match self {
                Self::SingleDevice { device } => vec![(*device, batch_size)],
                Self::MultiDevice { devices } => {
                    ensure!(!devices.is_empty(), "the device list must not be empty");
                    let num_devices = devices.len();
                    ensure!(
                        batch_size % num_devices == 0,
                        "batch size {} must be a multiple of the number of devices {}",
                        batch_size,
                        num_devices
                    );
                    let minibatch_size = batch_size / num_devices;
                    devices
                        .iter()
                        .map(|&device| (device, minibatch_size))
                        .collect()
                }
                Self::NonUniformMultiDevice { devices } => {
                    ensure!(!devices.is_empty(), "the device list must not be empty");
                    let total: usize = devices.iter().map(|conf| conf.minibatch_size.get()).sum();
                    ensure!(
                        total == batch_size,
                        "the mini-batch sizes sum up to {}, but the batch size is {}",
                        total,
                        batch_size
                    );
                    devices
                        .iter()
                        .map(|conf| (conf.device, conf.minibatch_size.get()))
                        .collect()
                }
            };
            Ok(workers)
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct WorkerConfig {
        #[serde(with = "tch_serde::serde_device")]
        pub device: Device,
        pub minibatch_size: NonZeroUsize,
    }

    /// The SGD optimizer options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(default)]
    pub struct OptimizerConfig {
        pub momentum: R64,
        pub weight_decay: R64,
    }

    impl Default for OptimizerConfig {
        fn default() -> Self {
            Self {
                momentum: r64(0.9),
                weight_decay: r64(0.0),
            }
        }
    }

    /// The learning rate scheduling strategy replacing the default rule.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub enum LearningRateSchedule {
        /// Use constant learning rate.
        Constant {
            lr: R64,
            num_steps: Option<usize>,
        },
        /// Use specific learning rate at specified steps.
        StepWise {
            steps: Vec<(usize, R64)>,
            num_steps: Option<usize>,
        },
    }

    /// Input pipeline options.
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(default)]
    pub struct PipelineConfig {
        /// The maximum number of waiting records per preprocessing stage.
        pub worker_buf_size: Option<usize>,
        /// The directory of downloaded and extracted dataset archives.
        pub cache_dir: Option<PathBuf>,
    }

    /// Data logging options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(default)]
    pub struct LoggingConfig {
        /// Write per-step loss, accuracy and learning rate to the event file.
        pub enable_training_scalars: bool,
        /// Write the average precision of each class to the event file.
        pub enable_per_class_ap: bool,
    }

    impl Default for LoggingConfig {
        fn default() -> Self {
            Self {
                enable_training_scalars: true,
                enable_per_class_ap: true,
            }
        }
    }
}

mod serde_vec_device {
    use super::*;

    #[derive(Debug, Clone, Copy, Serialize, Deserialize)]
    struct DeviceWrapper(#[serde(with = "tch_serde::serde_device")] Device);

    pub fn serialize<S>(devices: &[Device], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let devices: Vec<_> = devices.iter().cloned().map(DeviceWrapper).collect();
        devices.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Device>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let devices = Vec::<DeviceWrapper>::deserialize(deserializer)?;
        let devices: Vec<_> = devices
            .into_iter()
            .map(|DeviceWrapper(device)| device)
            .collect();
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_args(extra: &[&str]) -> Args {
        let base = [
            "train",
            "--name",
            "run",
            "--model",
            "BiT-M-R50x1",
            "--dataset",
            "wikipaintings",
            "--logdir",
            "logs",
        ];
        Args::from_iter(base.iter().chain(extra))
    }

    #[test]
    fn default_args() {
        let args = parse_args(&[]);
        assert_eq!(args.batch.get(), 512);
        assert_eq!(args.batch_eval.get(), 32);
        assert_abs_diff_eq!(args.base_lr, 0.003);
        assert_eq!(args.dataset_config, WikipaintingsVariant::Pct100);
        assert_eq!(args.examples_per_class, None);
        assert_eq!(args.examples_per_class_seed, 0);
        assert_eq!(args.bit_pretrained_dir, Path::new("."));

        let args = parse_args(&["--dataset_config", "Wikipaintings_20", "--eval_every", "10"]);
        assert_eq!(args.dataset_config, WikipaintingsVariant::Pct20);
        assert_eq!(args.eval_every.map(NonZeroUsize::get), Some(10));
    }

    #[test]
    fn reject_unknown_model() {
        let base = [
            "train", "--name", "run", "--model", "BiT-X-R50x1", "--dataset", "wikipaintings",
            "--logdir", "logs",
        ];
        assert!(Args::from_iter_safe(base.iter()).is_err());
    }

    #[test]
    fn runtime_config_file() -> Result<()> {
        let config = RuntimeConfig::from_json5(
            r#"{
                device_config: { type: "MultiDevice", devices: ["cpu", "cpu"] },
                lr_schedule: { type: "Constant", lr: 0.01 },
                pipeline: { worker_buf_size: 4 },
            }"#,
        )?;

        assert_eq!(config.device_config.num_devices(), 2);
        assert_eq!(
            config.device_config.workers(8)?,
            vec![(Device::Cpu, 4), (Device::Cpu, 4)]
        );
        assert!(config.device_config.workers(7).is_err());
        assert!(matches!(
            config.lr_schedule,
            Some(LearningRateSchedule::Constant { num_steps: None, .. })
        ));
        assert_eq!(config.pipeline.worker_buf_size, Some(4));
        assert_abs_diff_eq!(config.optimizer.momentum.raw(), 0.9);
        assert!(config.logging.enable_training_scalars);
        Ok(())
    }

    #[test]
    fn optimizer_override() -> Result<()> {
        let config = RuntimeConfig::from_json5(
            r#"{
                optimizer: { momentum: 0.5, weight_decay: 0.0001 },
            }"#,
        )?;
        assert_abs_diff_eq!(config.optimizer.momentum.raw(), 0.5);
        assert_abs_diff_eq!(config.optimizer.weight_decay.raw(), 1e-4);

        // a partial table keeps the other default
        let config = RuntimeConfig::from_json5(r#"{ optimizer: { weight_decay: 0.001 } }"#)?;
        assert_abs_diff_eq!(config.optimizer.momentum.raw(), 0.9);
        Ok(())
    }

    #[test]
    fn non_uniform_devices() -> Result<()> {
        let config = RuntimeConfig::from_json5(
            r#"{
                device_config: {
                    type: "NonUniformMultiDevice",
                    devices: [
                        { device: "cpu", minibatch_size: 3 },
                        { device: "cpu", minibatch_size: 1 },
                    ],
                },
            }"#,
        )?;
        assert_eq!(
            config.device_config.workers(4)?,
            vec![(Device::Cpu, 3), (Device::Cpu, 1)]
        );
        assert!(config.device_config.workers(5).is_err());
        Ok(())
    }

    #[test]
    fn lr_policy_override() -> Result<()> {
        let mut config = Config::new(parse_args(&["--batch", "256"]))?;

        // 10k examples, supports scaled by 512 / 256
        let policy = config.lr_policy(10_000)?;
        assert_eq!(policy.schedule_length(), 1000);
        assert_abs_diff_eq!(policy.lr(200).unwrap().raw(), 0.0015);

        config.runtime.lr_schedule = Some(LearningRateSchedule::StepWise {
            steps: vec![(0, r64(0.1)), (10, r64(0.01))],
            num_steps: None,
        });
        let policy = config.lr_policy(10_000)?;
        assert_eq!(policy.schedule_length(), 1000);
        assert_eq!(policy.lr(9), Some(r64(0.1)));
        assert_eq!(policy.lr(10), Some(r64(0.01)));
        assert_eq!(policy.lr(1000), None);

        config.runtime.lr_schedule = Some(LearningRateSchedule::StepWise {
            steps: vec![(5, r64(0.1))],
            num_steps: Some(10),
        });
        assert!(config.lr_policy(10_000).is_err());
        Ok(())
    }

    #[test]
    fn output_dir_from_args() -> Result<()> {
        let config = Config::new(parse_args(&["--output_dir", "/tmp/report"]))?;
        assert_eq!(config.output_dir()?, Path::new("/tmp/report"));
        assert_eq!(config.cache_dir()?, Path::new("/tmp/report"));
        Ok(())
    }
}
