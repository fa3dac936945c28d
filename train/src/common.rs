//! Common imports from external crates.

pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use approx::{abs_diff_eq, assert_abs_diff_eq};
pub use bit_dl::{
    dataset::{ClassificationDataset, DatasetInfo, ExampleRecord, Split},
    hyperrule::{LrPolicy, LrState},
    metrics,
    model::{ClassifierInit, ClassifierModel, ModelName},
    processor::{ClassificationBatch, ImageTransform, MixUp},
    profiling::Timing,
};
pub use chrono::Local;
pub use futures::{
    future,
    future::FutureExt as _,
    stream::{self, BoxStream, Stream, StreamExt as _, TryStreamExt as _},
};
pub use itertools::{izip, Itertools as _};
pub use noisy_float::prelude::*;
pub use par_stream::{ParStreamExt as _, TryParStreamExt as _};
pub use rand::{prelude::*, rngs::StdRng};
pub use serde::{Deserialize, Deserializer, Serialize, Serializer};
pub use std::{
    env,
    fmt::Debug,
    future::Future,
    iter,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
pub use structopt::StructOpt;
pub use tch::{
    kind::FLOAT_CPU,
    nn::{self, Module as _, OptimizerConfig as _},
    Device, Kind, Reduction, Tensor,
};
pub use tch_modules::CrossEntropyLoss;
pub use tch_tensor_like::TensorLike;
pub use tfrecord::{EventWriter, EventWriterInit};
pub use tokio::sync::{broadcast, mpsc};
pub use tracing::{debug, info, info_span, warn, Instrument};
pub use tracing_subscriber::{filter::LevelFilter, EnvFilter};

pub type Fallible<T> = Result<T, Error>;
