//! Pedestal table computation from a directory of raw data files
//!
//! The module and gain mode pairs are processed one at a time: the raw frames of a pair
//! are loaded once, handed to the estimators and dropped before the next pair is loaded.

use std::{env, fmt, path::Path, str::FromStr, time::Instant};

use indicatif::{ProgressBar, ProgressStyle};
use itertools::iproduct;
use strum::IntoEnumIterator;

use crate::{
    detector::{GainMode, Module},
    error::Result,
    moments::accumulate,
    robust::{trimmed_mean, TrimPolicy},
    source::{RawFrameSource, RawFrames},
    table::{PairStatistics, PedestalTable},
};

/// Environment variable with the path to the raw data directory
pub const DATA_ENV: &str = "PEDESTAL_DATA";

/// Pedestal estimators to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Estimators {
    /// streaming mean and variance
    Moments,
    /// interquartile mean
    Robust,
    #[default]
    Both,
}
impl Estimators {
    fn moments(&self) -> bool {
        matches!(self, Estimators::Moments | Estimators::Both)
    }
    fn robust(&self) -> bool {
        matches!(self, Estimators::Robust | Estimators::Both)
    }
}
impl FromStr for Estimators {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "moments" => Ok(Estimators::Moments),
            "robust" => Ok(Estimators::Robust),
            "both" => Ok(Estimators::Both),
            _ => Err(format!(
                r#"estimator {s} is not recognized, expected "moments", "robust" or "both""#
            )),
        }
    }
}
impl fmt::Display for Estimators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Estimators::Moments => write!(f, "moments"),
            Estimators::Robust => write!(f, "robust"),
            Estimators::Both => write!(f, "both"),
        }
    }
}

/// Pedestal table loader
#[derive(Debug, Clone, Default)]
pub struct PedestalLoader {
    source: RawFrameSource,
    estimators: Estimators,
    trim_policy: TrimPolicy,
    spike_threshold: Option<u64>,
    progress: bool,
}
impl PedestalLoader {
    /// Creates a loader for the raw data directory given by the env variable `PEDESTAL_DATA`
    pub fn from_env() -> Result<Self> {
        let path = env::var(DATA_ENV)?;
        Ok(Self::default().data_path(path))
    }
    pub fn data_path<P: AsRef<Path>>(self, data_path: P) -> Self {
        Self {
            source: self.source.data_path(data_path),
            ..self
        }
    }
    pub fn extension<S: Into<String>>(self, extension: S) -> Self {
        Self {
            source: self.source.extension(extension),
            ..self
        }
    }
    pub fn dataset<S: Into<String>>(self, dataset: S) -> Self {
        Self {
            source: self.source.dataset(dataset),
            ..self
        }
    }
    /// Sets the expected (rows, cols) frame shape
    pub fn sensor_shape(self, rows: usize, cols: usize) -> Self {
        Self {
            source: self.source.sensor_shape(Some((rows, cols))),
            ..self
        }
    }
    /// Accepts frames of any shape
    pub fn any_shape(self) -> Self {
        Self {
            source: self.source.sensor_shape(None),
            ..self
        }
    }
    pub fn estimators(self, estimators: Estimators) -> Self {
        Self { estimators, ..self }
    }
    pub fn trim_policy(self, trim_policy: TrimPolicy) -> Self {
        Self {
            trim_policy,
            ..self
        }
    }
    /// Looks for the first frame which sum is larger than `threshold` in each pair
    pub fn spike_threshold(self, spike_threshold: Option<u64>) -> Self {
        Self {
            spike_threshold,
            ..self
        }
    }
    /// Shows a progress bar while the pairs are processed
    pub fn progress(self, progress: bool) -> Self {
        Self { progress, ..self }
    }
    pub fn source(&self) -> &RawFrameSource {
        &self.source
    }
    /// Runs the estimators on the raw frames of a module and gain mode
    pub fn process(&self, frames: &RawFrames, gain: GainMode) -> PairStatistics {
        PairStatistics {
            moments: self
                .estimators
                .moments()
                .then(|| accumulate(frames.view(), gain)),
            robust: self
                .estimators
                .robust()
                .then(|| trimmed_mean(frames.view(), gain, self.trim_policy)),
            spikes: self
                .spike_threshold
                .map(|threshold| frames.spike_scan(threshold)),
        }
    }
    /// Computes the pedestal table of the 2 modules and 3 gain modes
    pub fn load(self) -> Result<PedestalTable> {
        log::info!(
            "Computing {} pedestals from {:?}",
            self.estimators,
            self.source.path()
        );
        let now = Instant::now();
        let pb = if self.progress {
            ProgressBar::new(6)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}") {
            pb.set_style(style.progress_chars("##-"));
        }
        let mut total_bytes = 0;
        let mut pairs = Vec::with_capacity(6);
        for (module, gain) in iproduct!(Module::iter(), GainMode::iter()) {
            pb.set_message(format!("{module} {gain}"));
            let frames = self.source.load(module, gain)?;
            total_bytes += frames.nbytes();
            let stats = self.process(&frames, gain);
            if let Some(spikes) = stats.spikes {
                log::info!("{module} {gain}: {spikes}");
            }
            drop(frames);
            pairs.push(((gain, module), stats));
            pb.inc(1);
        }
        pb.finish_and_clear();
        let table = PedestalTable::aggregate(pairs)?;
        log::info!(
            "... read {:.1}GB of raw data, pedestals computed in {:.1}s",
            total_bytes as f64 * 1e-9,
            now.elapsed().as_secs_f64()
        );
        Ok(table)
    }
}
