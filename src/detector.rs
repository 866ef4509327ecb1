//! Detector layout and packed sample decoding
//!
//! Every raw sample is a 16 bits word: the 2 most significant bits hold the gain mode
//! the pixel was read with and the 14 least significant bits hold the ADC value.

use std::{fmt, str::FromStr};
use strum_macros::EnumIter;

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error(r#"gain {0} is not recognized, expected "G0", "G1" or "G2""#)]
    Gain(String),
    #[error("gain code {0} is not used, expected 0, 1 or 3")]
    GainCode(u8),
    #[error(r#"module {0} is not recognized, expected "M420" or "M418""#)]
    Module(String),
    #[error("module id {0} is not recognized, expected 0 or 1")]
    ModuleId(u8),
}
type Result<T> = std::result::Result<T, DetectorError>;

/// Raw detector sample
pub type PackedSample = u16;

/// Bit position of the gain mode code
pub const GAIN_SHIFT: u32 = 14;
/// Mask of the ADC value bits
pub const ADC_MASK: PackedSample = 0x3FFF;
/// Number of pixel rows and columns of a detector module
pub const JUNGFRAU_SHAPE: (usize, usize) = (512, 1024);

/// Splits a sample into its gain mode code and ADC value
#[inline]
pub fn classify(sample: PackedSample) -> (u8, u16) {
    (gain_code(sample), adc_value(sample))
}
/// Gain mode code of a sample
#[inline]
pub fn gain_code(sample: PackedSample) -> u8 {
    (sample >> GAIN_SHIFT) as u8
}
/// ADC value of a sample
#[inline]
pub fn adc_value(sample: PackedSample) -> u16 {
    sample & ADC_MASK
}

/// Pixel gain mode
#[derive(EnumIter, Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum GainMode {
    G0,
    G1,
    G2,
}
impl GainMode {
    /// Gain mode code embedded in the samples
    pub fn code(&self) -> u8 {
        match self {
            GainMode::G0 => 0,
            GainMode::G1 => 1,
            GainMode::G2 => 3,
        }
    }
    /// Gain mode from an embedded code, code 2 is unused
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(GainMode::G0),
            1 => Some(GainMode::G1),
            3 => Some(GainMode::G2),
            _ => None,
        }
    }
    pub(crate) fn index(&self) -> usize {
        match self {
            GainMode::G0 => 0,
            GainMode::G1 => 1,
            GainMode::G2 => 2,
        }
    }
}
impl TryFrom<u8> for GainMode {
    type Error = DetectorError;

    fn try_from(code: u8) -> Result<Self> {
        GainMode::from_code(code).ok_or(DetectorError::GainCode(code))
    }
}
impl fmt::Display for GainMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GainMode::G0 => write!(f, "G0"),
            GainMode::G1 => write!(f, "G1"),
            GainMode::G2 => write!(f, "G2"),
        }
    }
}
impl FromStr for GainMode {
    type Err = DetectorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "G0" => Ok(GainMode::G0),
            "G1" => Ok(GainMode::G1),
            "G2" => Ok(GainMode::G2),
            _ => Err(DetectorError::Gain(s.to_string())),
        }
    }
}

/// Detector module
#[derive(EnumIter, Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Module {
    /// bottom module
    M420,
    /// top module
    M418,
}
impl Module {
    /// Get a new `Module` from its numeric id: 0 or 1
    pub fn new(id: u8) -> Result<Self> {
        match id {
            0 => Ok(Module::M420),
            1 => Ok(Module::M418),
            _ => Err(DetectorError::ModuleId(id)),
        }
    }
    /// Numeric id used in the raw data file names
    pub fn id(&self) -> u8 {
        match self {
            Module::M420 => 0,
            Module::M418 => 1,
        }
    }
    pub(crate) fn index(&self) -> usize {
        self.id() as usize
    }
}
impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Module::M420 => write!(f, "M420"),
            Module::M418 => write!(f, "M418"),
        }
    }
}
impl FromStr for Module {
    type Err = DetectorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "M420" => Ok(Module::M420),
            "M418" => Ok(Module::M418),
            _ => Err(DetectorError::Module(s.to_string())),
        }
    }
}
