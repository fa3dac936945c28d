//! Stage timing of the training loop and the input pipeline.
//!
//! Timings are recorded only when the `profiling` feature is enabled. Otherwise
//! [Timing] is a zero-sized no-op.

use crate::common::*;

#[cfg(feature = "profiling")]
static PROFILING_CONFIG: Lazy<ProfilingConfig> =
    Lazy::new(|| match envy::prefixed("BITDL_").from_env() {
        Ok(config) => config,
        Err(err) => {
            warn!(
                "invalid BITDL_ profiling variables, use default values: {:?}",
                err
            );
            Default::default()
        }
    });

#[cfg(feature = "profiling")]
static REGISTERED_TIMINGS: Lazy<dashmap::DashSet<&'static str>> =
    Lazy::new(dashmap::DashSet::new);

/// Profiling options loaded from `BITDL_` prefixed environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProfilingConfig {
    /// If set, only the listed timings are reported.
    pub profiling_whitelist: Option<HashSet<String>>,
    /// Skip reports of timings faster than this number of milliseconds.
    pub profiling_min_total_ms: Option<u64>,
}

impl ProfilingConfig {
    pub fn accepts(&self, name: &str, total: Duration) -> bool {
        let listed = self
            .profiling_whitelist
            .as_ref()
            .map(|whitelist| whitelist.contains(name))
            .unwrap_or(true);
        let slow_enough = self
            .profiling_min_total_ms
            .map(|min| total >= Duration::from_millis(min))
            .unwrap_or(true);
        listed && slow_enough
    }
}

/// Elapsed time of consecutive named stages.
#[cfg(feature = "profiling")]
#[derive(Debug)]
pub struct Timing {
    name: &'static str,
    start: Instant,
    last: Instant,
    stages: Vec<(&'static str, Duration)>,
}

#[cfg(not(feature = "profiling"))]
#[derive(Debug)]
pub struct Timing;

impl Timing {
    pub fn new(name: &'static str) -> Self {
        #[cfg(feature = "profiling")]
        {
            if REGISTERED_TIMINGS.insert(name) {
                info!("profiling '{}'", name);
            }
            let now = Instant::now();
            Self {
                name,
                start: now,
                last: now,
                stages: vec![],
            }
        }

        #[cfg(not(feature = "profiling"))]
        {
            let _ = name;
            Self
        }
    }

    /// Ends the current stage and names it.
    pub fn set_record(&mut self, stage: &'static str) {
        #[cfg(feature = "profiling")]
        {
            let now = Instant::now();
            self.stages.push((stage, now - self.last));
            self.last = now;
        }

        #[cfg(not(feature = "profiling"))]
        let _ = stage;
    }

    /// Logs the stages in one line.
    pub fn report(&self) {
        #[cfg(feature = "profiling")]
        {
            let total = self.last - self.start;
            if !PROFILING_CONFIG.accepts(self.name, total) {
                return;
            }
            let stages = self
                .stages
                .iter()
                .map(|(stage, elapsed)| format!("{} {:.2?}", stage, elapsed))
                .join(", ");
            info!("'{}' took {:.2?}: {}", self.name, total, stages);
        }
    }
}
