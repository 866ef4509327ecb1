//! Interquartile mean pedestal
//!
//! For each pixel the samples are sorted along the frame axis, the lowest and highest
//! quarter are dropped and the remaining samples are averaged.

use ndarray::{Array2, ArrayView1, ArrayView3, Axis, Zip};
use rayon::prelude::*;

use crate::detector::{classify, GainMode, PackedSample};

/// Which samples take part in the interquartile mean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrimPolicy {
    /// only the samples in the requested gain mode, the quarter is taken on their number
    #[default]
    MatchedOnly,
    /// all the frames, samples in another gain mode are replaced by 0
    ///
    /// Pixels that are seldom in the requested gain mode are biased toward 0
    ZeroFilled,
}

/// Per-pixel interquartile pedestal mean
#[derive(Debug, Clone, PartialEq)]
pub struct RobustStatistics {
    /// number of samples in the requested gain mode
    pub hits: Array2<u32>,
    pub robust_mean: Array2<f64>,
    /// number of frames the statistics were computed from
    pub frames: usize,
    pub policy: TrimPolicy,
}
impl RobustStatistics {
    /// Pixels with at least one sample in the requested gain mode
    pub fn has_data(&self) -> Array2<bool> {
        self.hits.mapv(|n| n > 0)
    }
    /// The (rows, cols) shape of the statistics
    pub fn shape(&self) -> (usize, usize) {
        self.hits.dim()
    }
    /// Number of pixels which mean includes zero-filled samples
    ///
    /// Always 0 with [TrimPolicy::MatchedOnly]
    pub fn zero_fill_bias_pixels(&self) -> usize {
        match self.policy {
            TrimPolicy::MatchedOnly => 0,
            TrimPolicy::ZeroFilled => {
                let kept = (self.frames - self.frames / 4) as u32;
                self.hits.iter().filter(|&&n| n < kept).count()
            }
        }
    }
}

/// Interquartile mean of the samples in gain mode `gain`
pub fn trimmed_mean(
    frames: ArrayView3<'_, PackedSample>,
    gain: GainMode,
    policy: TrimPolicy,
) -> RobustStatistics {
    trimmed_mean_code(frames, gain.code(), policy)
}
/// Interquartile mean of the samples with the raw gain `code`
pub fn trimmed_mean_code(
    frames: ArrayView3<'_, PackedSample>,
    gain_code: u8,
    policy: TrimPolicy,
) -> RobustStatistics {
    let (n_frame, rows, cols) = frames.dim();
    let mut hits = Array2::<u32>::zeros((rows, cols));
    let mut robust_mean = Array2::<f64>::zeros((rows, cols));
    hits.axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(robust_mean.axis_iter_mut(Axis(0)))
        .zip(frames.axis_iter(Axis(1)))
        .for_each(|((hits, robust_mean), row)| {
            let mut values = Vec::with_capacity(n_frame);
            Zip::from(hits)
                .and(robust_mean)
                .and(row.columns())
                .for_each(|n, m, pixel| {
                    *n = select(pixel, gain_code, policy, &mut values);
                    *m = interquartile_mean(&mut values);
                });
        });
    log::debug!(
        "interquartile mean ({:?}) of {} frames of {}x{} pixels",
        policy,
        n_frame,
        rows,
        cols
    );
    RobustStatistics {
        hits,
        robust_mean,
        frames: n_frame,
        policy,
    }
}

// Fills `values` with the ADC values of a pixel and returns the number of gain hits
fn select(
    pixel: ArrayView1<'_, PackedSample>,
    gain_code: u8,
    policy: TrimPolicy,
    values: &mut Vec<u16>,
) -> u32 {
    values.clear();
    let mut hits = 0;
    for &sample in pixel {
        let (code, adc) = classify(sample);
        if code == gain_code {
            hits += 1;
            values.push(adc);
        } else if policy == TrimPolicy::ZeroFilled {
            values.push(0);
        }
    }
    hits
}

/// Mean of the values left after removing the lowest and highest `len / 4` values
///
/// Returns 0 for an empty slice. The slice is sorted in place.
pub fn interquartile_mean(values: &mut [u16]) -> f64 {
    if values.is_empty() {
        return 0.;
    }
    values.sort_unstable();
    let q = values.len() / 4;
    let kept = &values[q..values.len() - q];
    kept.iter().map(|&x| x as f64).sum::<f64>() / kept.len() as f64
}
