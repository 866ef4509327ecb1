//! Pedestal statistics of the 2 modules and 3 gain modes

use std::{fmt, ops::Index};

use itertools::iproduct;
use ndarray::{Array2, Zip};
use strum::IntoEnumIterator;

use crate::{
    detector::{GainMode, Module},
    moments::MomentStatistics,
    robust::RobustStatistics,
    source::SpikeScan,
};

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("the pedestal table is incomplete, missing: {}", list(.0))]
    IncompleteTable(Vec<(GainMode, Module)>),
    #[error("pedestal {1} {0} is given more than once")]
    DuplicatePair(GainMode, Module),
}
type Result<T> = std::result::Result<T, TableError>;

fn list(pairs: &[(GainMode, Module)]) -> String {
    pairs
        .iter()
        .map(|(gain, module)| format!("{module} {gain}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Statistics of a module and gain mode
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairStatistics {
    pub moments: Option<MomentStatistics>,
    pub robust: Option<RobustStatistics>,
    pub spikes: Option<SpikeScan>,
}
impl From<MomentStatistics> for PairStatistics {
    fn from(moments: MomentStatistics) -> Self {
        Self {
            moments: Some(moments),
            robust: None,
            spikes: None,
        }
    }
}
impl From<RobustStatistics> for PairStatistics {
    fn from(robust: RobustStatistics) -> Self {
        Self {
            moments: None,
            robust: Some(robust),
            spikes: None,
        }
    }
}

/// Pedestal statistics lookup table
///
/// The table is indexed either by `(GainMode, Module)` or by `(Module, GainMode)`
#[derive(Debug, Clone, PartialEq)]
pub struct PedestalTable([[PairStatistics; 3]; 2]);
impl PedestalTable {
    /// Builds the table from the statistics of all the modules and gain modes
    pub fn aggregate<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = ((GainMode, Module), PairStatistics)>,
    {
        let mut slots: [[Option<PairStatistics>; 3]; 2] = Default::default();
        for ((gain, module), stats) in pairs {
            let slot = &mut slots[module.index()][gain.index()];
            if slot.is_some() {
                return Err(TableError::DuplicatePair(gain, module));
            }
            *slot = Some(stats);
        }
        let missing: Vec<_> = iproduct!(Module::iter(), GainMode::iter())
            .filter(|(module, gain)| slots[module.index()][gain.index()].is_none())
            .map(|(module, gain)| (gain, module))
            .collect();
        if !missing.is_empty() {
            return Err(TableError::IncompleteTable(missing));
        }
        Ok(Self(slots.map(|row| row.map(Option::unwrap_or_default))))
    }
    pub fn get(&self, gain: GainMode, module: Module) -> &PairStatistics {
        &self.0[module.index()][gain.index()]
    }
    pub fn by_module(&self, module: Module, gain: GainMode) -> &PairStatistics {
        self.get(gain, module)
    }
    /// Iterator over the table entries, module after module
    pub fn iter(&self) -> impl Iterator<Item = ((GainMode, Module), &PairStatistics)> + '_ {
        iproduct!(Module::iter(), GainMode::iter())
            .map(move |(module, gain)| ((gain, module), self.get(gain, module)))
    }
    pub fn len(&self) -> usize {
        self.0.iter().map(|row| row.len()).sum()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Digest of the table entries
    pub fn summary(&self) -> TableSummary {
        TableSummary(
            self.iter()
                .map(|((gain, module), stats)| PairSummary::new(gain, module, stats))
                .collect(),
        )
    }
}
impl Index<(GainMode, Module)> for PedestalTable {
    type Output = PairStatistics;

    fn index(&self, (gain, module): (GainMode, Module)) -> &Self::Output {
        self.get(gain, module)
    }
}
impl Index<(Module, GainMode)> for PedestalTable {
    type Output = PairStatistics;

    fn index(&self, (module, gain): (Module, GainMode)) -> &Self::Output {
        self.get(gain, module)
    }
}

// mean of `values` where `mask` is true
fn masked_mean(values: &Array2<f64>, mask: &Array2<bool>) -> Option<f64> {
    let (n, sum) = Zip::from(values)
        .and(mask)
        .fold((0usize, 0f64), |(n, sum), &x, &valid| {
            if valid {
                (n + 1, sum + x)
            } else {
                (n, sum)
            }
        });
    (n > 0).then(|| sum / n as f64)
}

/// Digest of the statistics of a module and gain mode
#[derive(Debug, Clone, PartialEq)]
pub struct PairSummary {
    pub gain: GainMode,
    pub module: Module,
    pub pixels: usize,
    /// number of pixels with at least one sample in the gain mode
    pub with_data: usize,
    pub mean: Option<f64>,
    pub variance: Option<f64>,
    pub robust_mean: Option<f64>,
    pub zero_fill_bias_pixels: Option<usize>,
}
impl PairSummary {
    fn new(gain: GainMode, module: Module, stats: &PairStatistics) -> Self {
        let mask = stats
            .moments
            .as_ref()
            .map(|m| m.has_data())
            .or_else(|| stats.robust.as_ref().map(|r| r.has_data()));
        let pixels = mask.as_ref().map_or(0, |m| m.len());
        let with_data = mask.as_ref().map_or(0, |m| m.iter().filter(|&&d| d).count());
        let (mean, variance) = match (&stats.moments, &mask) {
            (Some(moments), Some(mask)) => (
                masked_mean(&moments.mean, mask),
                masked_mean(&moments.variance, mask),
            ),
            _ => (None, None),
        };
        let robust_mean = stats
            .robust
            .as_ref()
            .and_then(|robust| masked_mean(&robust.robust_mean, &robust.has_data()));
        Self {
            gain,
            module,
            pixels,
            with_data,
            mean,
            variance,
            robust_mean,
            zero_fill_bias_pixels: stats.robust.as_ref().map(|r| r.zero_fill_bias_pixels()),
        }
    }
}

/// Digest of a pedestal table
#[derive(Debug, Clone, PartialEq)]
pub struct TableSummary(pub Vec<PairSummary>);
impl fmt::Display for TableSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opt = |x: Option<f64>| x.map_or(String::from("-"), |x| format!("{x:.2}"));
        writeln!(
            f,
            "{:<6} {:<4} {:>9} {:>9} {:>10} {:>10} {:>10} {:>8}",
            "Module", "Gain", "Pixels", "w/ data", "Mean", "Variance", "IQR mean", "Biased"
        )?;
        for s in &self.0 {
            writeln!(
                f,
                "{:<6} {:<4} {:>9} {:>9} {:>10} {:>10} {:>10} {:>8}",
                s.module.to_string(),
                s.gain.to_string(),
                s.pixels,
                s.with_data,
                opt(s.mean),
                opt(s.variance),
                opt(s.robust_mean),
                s.zero_fill_bias_pixels
                    .map_or(String::from("-"), |n| n.to_string())
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moments::accumulate;
    use ndarray::Array3;

    fn pair(gain: GainMode, module: Module) -> PairStatistics {
        let adc = 100 * (module.id() as u16 + 1) + gain.code() as u16;
        let data = Array3::from_elem((4, 2, 2), ((gain.code() as u16) << 14) | adc);
        accumulate(data.view(), gain).into()
    }

    fn pairs() -> Vec<((GainMode, Module), PairStatistics)> {
        iproduct!(GainMode::iter(), Module::iter())
            .map(|(gain, module)| ((gain, module), pair(gain, module)))
            .collect()
    }

    #[test]
    fn complete_table() {
        let table = PedestalTable::aggregate(pairs()).unwrap();
        assert_eq!(table.len(), 6);
        assert_eq!(table.iter().count(), 6);
        for (gain, module) in iproduct!(GainMode::iter(), Module::iter()) {
            assert_eq!(&table[(gain, module)], &table[(module, gain)]);
            assert!(std::ptr::eq(
                table.get(gain, module),
                table.by_module(module, gain)
            ));
            assert_eq!(table[(module, gain)], pair(gain, module));
        }
        let mean = table[(Module::M418, GainMode::G2)].moments.as_ref().unwrap().mean[[0, 0]];
        assert_eq!(mean, 203.);
    }

    #[test]
    fn incomplete_table() {
        for skip in 0..6 {
            let mut pairs = pairs();
            let ((gain, module), _) = pairs.remove(skip);
            match PedestalTable::aggregate(pairs) {
                Err(TableError::IncompleteTable(missing)) => {
                    assert_eq!(missing, vec![(gain, module)])
                }
                other => panic!("expected an incomplete table, got {other:?}"),
            }
        }
        assert!(matches!(
            PedestalTable::aggregate(Vec::new()),
            Err(TableError::IncompleteTable(missing)) if missing.len() == 6
        ));
    }

    #[test]
    fn duplicate_pair() {
        let mut pairs = pairs();
        pairs.push(((GainMode::G1, Module::M420), PairStatistics::default()));
        assert!(matches!(
            PedestalTable::aggregate(pairs),
            Err(TableError::DuplicatePair(GainMode::G1, Module::M420))
        ));
    }

    #[test]
    fn summary() {
        let table = PedestalTable::aggregate(pairs()).unwrap();
        let summary = table.summary();
        assert_eq!(summary.0.len(), 6);
        let s = &summary.0[0];
        assert_eq!((s.module, s.gain), (Module::M420, GainMode::G0));
        assert_eq!(s.pixels, 4);
        assert_eq!(s.with_data, 4);
        assert_eq!(s.mean, Some(100.));
        assert_eq!(s.variance, Some(0.));
        assert_eq!(s.robust_mean, None);
        assert_eq!(summary.to_string().lines().count(), 7);
    }
}
