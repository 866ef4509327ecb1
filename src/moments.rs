//! Streaming pedestal mean and variance
//!
//! The frames are accumulated one after the other into per-pixel sample count,
//! sum and sum of squares, all in 64 bits floating point but the count.
//! A pixel that never reads in the requested gain mode ends up with a zero mean and
//! a zero variance, check [MomentStatistics::count] to tell it apart from a zero pedestal.

use ndarray::{Array2, ArrayView2, ArrayView3, Zip};

use crate::{
    detector::{classify, GainMode, PackedSample},
    error::ShapeMismatch,
};

/// Per-pixel pedestal moments
#[derive(Debug, Clone, PartialEq)]
pub struct MomentStatistics {
    /// number of samples in the requested gain mode
    pub count: Array2<u32>,
    /// pedestal mean
    pub mean: Array2<f64>,
    /// pedestal variance
    pub variance: Array2<f64>,
}
impl MomentStatistics {
    /// Pixels with at least one sample in the requested gain mode
    pub fn has_data(&self) -> Array2<bool> {
        self.count.mapv(|n| n > 0)
    }
    /// The (rows, cols) shape of the statistics
    pub fn shape(&self) -> (usize, usize) {
        self.count.dim()
    }
}

/// Single pass mean and variance accumulator
#[derive(Debug, Clone)]
pub struct MomentAccumulator {
    gain_code: u8,
    frames: usize,
    count: Array2<u32>,
    sum: Array2<f64>,
    sum_squares: Array2<f64>,
}
impl MomentAccumulator {
    /// Creates an accumulator for frames of `rows` x `cols` pixels
    pub fn new(rows: usize, cols: usize, gain: GainMode) -> Self {
        Self::with_code(rows, cols, gain.code())
    }
    /// Creates an accumulator selecting samples with the raw gain `code`
    pub fn with_code(rows: usize, cols: usize, gain_code: u8) -> Self {
        Self {
            gain_code,
            frames: 0,
            count: Array2::zeros((rows, cols)),
            sum: Array2::zeros((rows, cols)),
            sum_squares: Array2::zeros((rows, cols)),
        }
    }
    /// The number of frames accumulated so far
    pub fn frames(&self) -> usize {
        self.frames
    }
    /// Adds a frame
    pub fn push(&mut self, frame: ArrayView2<'_, PackedSample>) -> Result<(), ShapeMismatch> {
        if frame.dim() != self.count.dim() {
            let (rows, cols) = self.count.dim();
            return Err(ShapeMismatch::new(format!("({rows}, {cols})"), frame.shape()));
        }
        self.add(frame);
        Ok(())
    }
    fn add(&mut self, frame: ArrayView2<'_, PackedSample>) {
        let gain_code = self.gain_code;
        Zip::from(&mut self.count)
            .and(&mut self.sum)
            .and(&mut self.sum_squares)
            .and(&frame)
            .par_for_each(|n, s, s2, &sample| {
                let (code, adc) = classify(sample);
                if code == gain_code {
                    let x = adc as f64;
                    *n += 1;
                    *s += x;
                    *s2 += x * x;
                }
            });
        self.frames += 1;
    }
    /// Computes the mean and variance of the accumulated frames
    pub fn finalize(self) -> MomentStatistics {
        let mut mean = Array2::<f64>::zeros(self.count.dim());
        let mut variance = Array2::<f64>::zeros(self.count.dim());
        Zip::from(&mut mean)
            .and(&mut variance)
            .and(&self.count)
            .and(&self.sum)
            .and(&self.sum_squares)
            .par_for_each(|m, v, &n, &s, &s2| {
                let n = n.max(1) as f64;
                *m = s / n;
                *v = s2 / n - *m * *m;
            });
        MomentStatistics {
            count: self.count,
            mean,
            variance,
        }
    }
}

/// Pedestal mean and variance of the samples in gain mode `gain`
pub fn accumulate(frames: ArrayView3<'_, PackedSample>, gain: GainMode) -> MomentStatistics {
    accumulate_code(frames, gain.code())
}
/// Pedestal mean and variance of the samples with the raw gain `code`
pub fn accumulate_code(frames: ArrayView3<'_, PackedSample>, gain_code: u8) -> MomentStatistics {
    let (_, rows, cols) = frames.dim();
    let mut acc = MomentAccumulator::with_code(rows, cols, gain_code);
    for frame in frames.outer_iter() {
        acc.add(frame);
    }
    log::debug!("accumulated {} frames of {}x{} pixels", acc.frames(), rows, cols);
    acc.finalize()
}
