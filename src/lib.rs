//! # JUNGFRAU pedestals
//!
//! Per-pixel pedestal and noise statistics of the 2 modules (M420 and M418) of a JUNGFRAU
//! detector in each of its 3 gain modes (G0, G1 and G2), computed from raw frame files.
//!
//! Two estimators are available:
//!  - [moments::accumulate]: single pass mean and variance,
//!  - [robust::trimmed_mean]: interquartile mean, insensitive to spikes.
//!
//! ```no_run
//! use jungfrau_pedestal::{GainMode, Module, PedestalLoader};
//!
//! let table = PedestalLoader::default()
//!     .data_path("data/pedestal")
//!     .load()?;
//! let g0 = &table[(Module::M420, GainMode::G0)];
//! println!("{}", table.summary());
//! # Ok::<(), jungfrau_pedestal::Error>(())
//! ```

pub mod compare;
pub mod detector;
pub mod error;
pub mod moments;
pub mod pipeline;
pub mod robust;
pub mod source;
pub mod table;

pub use detector::{classify, GainMode, Module, PackedSample};
pub use error::{Error, Result, ShapeMismatch};
pub use moments::{MomentAccumulator, MomentStatistics};
pub use pipeline::{Estimators, PedestalLoader};
pub use robust::{RobustStatistics, TrimPolicy};
pub use source::{RawFrameSource, RawFrames, SpikeScan};
pub use table::{PairStatistics, PedestalTable};
