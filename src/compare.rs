//! Pedestal maps comparison
//!
//! Differences between the two estimators of a run, between the pedestals of two runs,
//! and the frame by frame distribution of the raw samples relative to a pedestal map.

use std::fmt;

use ndarray::{Array2, ArrayView3, Axis, Zip};
use rayon::prelude::*;

use crate::{
    detector::{classify, GainMode, Module, PackedSample},
    error::ShapeMismatch,
    table::{PairStatistics, PedestalTable},
};

type Result<T> = std::result::Result<T, ShapeMismatch>;

fn check_shape<A, B>(a: &Array2<A>, b: &Array2<B>) -> Result<()> {
    if a.dim() == b.dim() {
        Ok(())
    } else {
        let (rows, cols) = a.dim();
        Err(ShapeMismatch::new(format!("({rows}, {cols})"), b.shape()))
    }
}

/// Pixel by pixel difference `a - b`
pub fn difference(a: &Array2<f64>, b: &Array2<f64>) -> Result<Array2<f64>> {
    check_shape(a, b)?;
    Ok(a - b)
}

/// Statistics of a difference map
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifferenceSummary {
    /// number of pixels the statistics are computed from
    pub pixels: usize,
    pub mean: f64,
    pub rms: f64,
    pub min: f64,
    pub max: f64,
}
impl fmt::Display for DifferenceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>9} {:>10.3} {:>10.3} {:>10.3} {:>10.3}",
            self.pixels, self.mean, self.rms, self.min, self.max
        )
    }
}

/// Statistics of the difference map over the pixels where `mask` is true
///
/// Returns `None` if there is no such pixel
pub fn summarize(diff: &Array2<f64>, mask: &Array2<bool>) -> Result<Option<DifferenceSummary>> {
    check_shape(diff, mask)?;
    let (pixels, sum, sum_squares, min, max) = Zip::from(diff).and(mask).fold(
        (0usize, 0f64, 0f64, f64::INFINITY, f64::NEG_INFINITY),
        |(n, s, s2, min, max), &x, &valid| {
            if valid {
                (n + 1, s + x, s2 + x * x, min.min(x), max.max(x))
            } else {
                (n, s, s2, min, max)
            }
        },
    );
    Ok((pixels > 0).then(|| DifferenceSummary {
        pixels,
        mean: sum / pixels as f64,
        rms: (sum_squares / pixels as f64).sqrt(),
        min,
        max,
    }))
}

/// Difference statistics of a module and gain mode
#[derive(Debug, Clone, PartialEq)]
pub struct PairDifference {
    pub gain: GainMode,
    pub module: Module,
    pub summary: Option<DifferenceSummary>,
}
impl fmt::Display for PairDifference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<6} {:<4} ", self.module.to_string(), self.gain.to_string())?;
        match &self.summary {
            Some(summary) => write!(f, "{summary}"),
            None => write!(f, "{:>9}", 0),
        }
    }
}

/// Header line matching [PairDifference] display
pub const DIFFERENCE_HEADER: &str =
    "Module Gain     Pixels       Mean        RMS        Min        Max";

/// Interquartile mean minus moment mean of each module and gain mode
///
/// Only the pairs with both estimates are compared, over the pixels with data
pub fn compare_estimators(table: &PedestalTable) -> Result<Vec<PairDifference>> {
    let mut differences = vec![];
    for ((gain, module), stats) in table.iter() {
        if let (Some(moments), Some(robust)) = (&stats.moments, &stats.robust) {
            let diff = difference(&robust.robust_mean, &moments.mean)?;
            differences.push(PairDifference {
                gain,
                module,
                summary: summarize(&diff, &moments.has_data())?,
            });
        }
    }
    Ok(differences)
}

// Pedestal map and valid pixels, the moment mean is preferred
fn pedestal(stats: &PairStatistics) -> Option<(&Array2<f64>, Array2<bool>)> {
    stats
        .moments
        .as_ref()
        .map(|m| (&m.mean, m.has_data()))
        .or_else(|| stats.robust.as_ref().map(|r| (&r.robust_mean, r.has_data())))
}

/// Pedestal difference `a - b` between two runs for each module and gain mode
///
/// Only the pixels with data in both runs are compared
pub fn compare_tables(a: &PedestalTable, b: &PedestalTable) -> Result<Vec<PairDifference>> {
    let mut differences = vec![];
    for ((gain, module), stats_a) in a.iter() {
        if let (Some((map_a, mask_a)), Some((map_b, mask_b))) =
            (pedestal(stats_a), pedestal(&b[(gain, module)]))
        {
            let diff = difference(map_a, map_b)?;
            let mask = &mask_a & &mask_b;
            differences.push(PairDifference {
                gain,
                module,
                summary: summarize(&diff, &mask)?,
            });
        }
    }
    Ok(differences)
}

/// Histograms, frame by frame, of the ratio of the ADC values in gain mode `gain` to the pedestal
///
/// The histograms have `bins` bins spread uniformly over `range`; values outside the range
/// and pixels with a zero pedestal are ignored. The result has one row per frame.
pub fn ratio_histograms(
    frames: ArrayView3<'_, PackedSample>,
    pedestal: &Array2<f64>,
    gain: GainMode,
    range: (f64, f64),
    bins: usize,
) -> Result<Array2<u32>> {
    let (n_frame, rows, cols) = frames.dim();
    if (rows, cols) != pedestal.dim() {
        let (p_rows, p_cols) = pedestal.dim();
        return Err(ShapeMismatch::new(
            format!("(frames, {p_rows}, {p_cols})"),
            frames.shape(),
        ));
    }
    let mut histograms = Array2::<u32>::zeros((n_frame, bins));
    if bins == 0 {
        return Ok(histograms);
    }
    let (lo, hi) = range;
    let width = (hi - lo) / bins as f64;
    let gain_code = gain.code();
    histograms
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(frames.axis_iter(Axis(0)))
        .for_each(|(mut histogram, frame)| {
            Zip::from(&frame).and(pedestal).for_each(|&sample, &p| {
                let (code, adc) = classify(sample);
                if code != gain_code || p == 0. {
                    return;
                }
                let ratio = adc as f64 / p;
                if ratio >= lo && ratio < hi {
                    let bin = (((ratio - lo) / width) as usize).min(bins - 1);
                    histogram[bin] += 1;
                }
            });
        });
    Ok(histograms)
}
