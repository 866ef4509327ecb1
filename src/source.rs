//! Raw frame files
//!
//! There is one raw data file per module and gain mode, named `{gain}_{module id}_0.h5`,
//! possibly with a prefix. The file holds a dataset of packed samples with the shape
//! (frames, rows, columns). NPZ archives and NPY files are read as well.

use std::{
    fmt,
    fs::File,
    io::{self, BufReader, Read},
    path::{Path, PathBuf},
    time::Instant,
};

use glob::{glob_with, MatchOptions, Pattern};
use ndarray::{s, Array3, ArrayView2, ArrayView3, Axis, ShapeBuilder};
use npyz::{npz::NpzArchive, NpyFile, Order};
use rayon::prelude::*;

use crate::{
    detector::{GainMode, Module, PackedSample, JUNGFRAU_SHAPE},
    error::ShapeMismatch,
};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("no raw data file matching {0}")]
    SourceNotFound(String),
    #[error("more than one raw data file matching {pattern}: {candidates:?}")]
    AmbiguousSource {
        pattern: String,
        candidates: Vec<PathBuf>,
    },
    #[error("dataset {dataset:?} not found in {path:?}")]
    MissingDataset { dataset: String, path: PathBuf },
    #[error("raw data in {1:?} has the wrong shape")]
    ShapeMismatch(#[source] ShapeMismatch, PathBuf),
    #[error("the raw data file {0:?} has an unsupported extension")]
    UnsupportedFormat(PathBuf),
    #[error("the path {0:?} is not valid unicode")]
    InvalidPath(PathBuf),
    #[error("invalid file pattern")]
    Pattern(#[from] glob::PatternError),
    #[error("failed to list the raw data directory")]
    Glob(#[from] glob::GlobError),
    #[error("failed to read the raw data file")]
    Io(#[from] io::Error),
    #[error("failed to shape the raw data")]
    Array(#[from] ndarray::ShapeError),
    #[cfg(feature = "hdf5")]
    #[error("failed to read the HDF5 raw data file")]
    Hdf5(#[from] hdf5::Error),
}
type Result<T> = std::result::Result<T, SourceError>;

#[cfg(feature = "hdf5")]
const DEFAULT_EXTENSION: &str = "h5";
#[cfg(not(feature = "hdf5"))]
const DEFAULT_EXTENSION: &str = "npz";

/// Raw data files loader
#[derive(Debug, Clone)]
pub struct RawFrameSource {
    path: PathBuf,
    extension: String,
    dataset: String,
    sensor_shape: Option<(usize, usize)>,
}
impl Default for RawFrameSource {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
            extension: String::from(DEFAULT_EXTENSION),
            dataset: String::from("data"),
            sensor_shape: Some(JUNGFRAU_SHAPE),
        }
    }
}
impl RawFrameSource {
    /// Creates a new source from the directory with the raw data files
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self::default().data_path(path)
    }
    /// Sets the directory with the raw data files
    pub fn data_path<P: AsRef<Path>>(self, path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..self
        }
    }
    /// Sets the raw data file extension: "h5", "npz" or "npy"
    pub fn extension<S: Into<String>>(self, extension: S) -> Self {
        Self {
            extension: extension.into(),
            ..self
        }
    }
    /// Sets the name of the dataset holding the frames in a HDF5 file or a NPZ archive
    pub fn dataset<S: Into<String>>(self, dataset: S) -> Self {
        Self {
            dataset: dataset.into(),
            ..self
        }
    }
    /// Sets the expected frame shape, `None` accepts any frame shape
    pub fn sensor_shape(self, sensor_shape: Option<(usize, usize)>) -> Self {
        Self {
            sensor_shape,
            ..self
        }
    }
    /// Returns the directory with the raw data files
    pub fn path(&self) -> &Path {
        &self.path
    }
    /// Finds the raw data file of a module and gain mode
    pub fn locate(&self, module: Module, gain: GainMode) -> Result<PathBuf> {
        let name = format!("{}_{}_0.{}", gain, module.id(), self.extension);
        let filename = self.path.join(&name);
        if filename.is_file() {
            return Ok(filename);
        }
        let directory = self
            .path
            .to_str()
            .ok_or_else(|| SourceError::InvalidPath(self.path.clone()))?;
        let pattern = format!("{}/*{}", Pattern::escape(directory), name);
        log::debug!("{:?} not found, looking for {}", filename, pattern);
        let options = MatchOptions {
            require_literal_leading_dot: true,
            ..Default::default()
        };
        let mut candidates = glob_with(&pattern, options)?.collect::<std::result::Result<Vec<_>, _>>()?;
        match candidates.len() {
            0 => Err(SourceError::SourceNotFound(pattern)),
            1 => Ok(candidates.remove(0)),
            _ => {
                candidates.sort();
                Err(SourceError::AmbiguousSource {
                    pattern,
                    candidates,
                })
            }
        }
    }
    /// Loads the raw frames of a module and gain mode
    pub fn load(&self, module: Module, gain: GainMode) -> Result<RawFrames> {
        let path = self.locate(module, gain)?;
        self.load_file(path)
    }
    /// Loads the raw frames from a file
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<RawFrames> {
        let path = path.as_ref();
        log::info!("Loading {:?}...", path);
        let now = Instant::now();
        let data = match path.extension().and_then(|ext| ext.to_str()) {
            #[cfg(feature = "hdf5")]
            Some("h5" | "hdf5") => self.read_hdf5(path)?,
            Some("npy") => {
                let reader = BufReader::new(File::open(path)?);
                self.read_array(NpyFile::new(reader)?, path)?
            }
            Some("npz") => {
                let mut npz = NpzArchive::open(path)?;
                let npy = npz
                    .by_name(&self.dataset)?
                    .ok_or_else(|| self.missing_dataset(path))?;
                self.read_array(npy, path)?
            }
            _ => return Err(SourceError::UnsupportedFormat(path.to_path_buf())),
        };
        let frames = RawFrames {
            data,
            path: Some(path.to_path_buf()),
        };
        log::info!(
            "... read {:.0}MB in {:.1}s",
            frames.nbytes() as f64 * 1e-6,
            now.elapsed().as_secs_f64()
        );
        Ok(frames)
    }
    fn missing_dataset(&self, path: &Path) -> SourceError {
        SourceError::MissingDataset {
            dataset: self.dataset.clone(),
            path: path.to_path_buf(),
        }
    }
    #[cfg(feature = "hdf5")]
    fn read_hdf5(&self, path: &Path) -> Result<Array3<PackedSample>> {
        let file = hdf5::File::open(path)?;
        if !file.link_exists(&self.dataset) {
            return Err(self.missing_dataset(path));
        }
        let dataset = file.dataset(&self.dataset)?;
        self.check_shape(&dataset.shape(), path)?;
        Ok(dataset.read::<PackedSample, ndarray::Ix3>()?)
    }
    fn read_array<R: Read>(&self, npy: NpyFile<R>, path: &Path) -> Result<Array3<PackedSample>> {
        let shape: Vec<usize> = npy.shape().iter().map(|&n| n as usize).collect();
        let (n_frame, rows, cols) = self.check_shape(&shape, path)?;
        let order = npy.order();
        let samples: Vec<PackedSample> = npy.into_vec()?;
        let data = match order {
            Order::C => Array3::from_shape_vec((n_frame, rows, cols), samples)?,
            Order::Fortran => Array3::from_shape_vec((n_frame, rows, cols).f(), samples)?,
        };
        Ok(data)
    }
    // (frames, rows, cols) if the raw data is 3-D with the expected frame shape
    fn check_shape(&self, shape: &[usize], path: &Path) -> Result<(usize, usize, usize)> {
        let expected = match self.sensor_shape {
            Some((rows, cols)) => format!("(frames, {rows}, {cols})"),
            None => String::from("(frames, rows, cols)"),
        };
        match *shape {
            [n_frame, rows, cols]
                if self.sensor_shape.map_or(true, |sensor| sensor == (rows, cols)) =>
            {
                Ok((n_frame, rows, cols))
            }
            _ => Err(SourceError::ShapeMismatch(
                ShapeMismatch::new(expected, shape),
                path.to_path_buf(),
            )),
        }
    }
}

/// Raw frames of a module and gain mode
#[derive(Debug, Clone)]
pub struct RawFrames {
    data: Array3<PackedSample>,
    path: Option<PathBuf>,
}
impl From<Array3<PackedSample>> for RawFrames {
    fn from(data: Array3<PackedSample>) -> Self {
        Self { data, path: None }
    }
}
impl RawFrames {
    /// The number of frames
    pub fn frame_count(&self) -> usize {
        self.data.len_of(Axis(0))
    }
    /// The (rows, cols) shape of a frame
    pub fn frame_shape(&self) -> (usize, usize) {
        let (_, rows, cols) = self.data.dim();
        (rows, cols)
    }
    /// The size of the samples in bytes
    pub fn nbytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<PackedSample>()
    }
    /// The file the frames were loaded from
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
    pub fn view(&self) -> ArrayView3<'_, PackedSample> {
        self.data.view()
    }
    /// Returns the frame at `index`
    pub fn frame(&self, index: usize) -> ArrayView2<'_, PackedSample> {
        self.data.slice(s![index, .., ..])
    }
    /// Sums the raw samples, gain bits included, of each frame
    ///
    /// A frame where pixels switched to a higher gain mode stands out by 16384 per pixel
    pub fn frame_sums(&self) -> Vec<u64> {
        self.data
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|frame| frame.iter().map(|&s| s as u64).sum())
            .collect()
    }
    /// Index of the first frame which sum is larger than `threshold`
    pub fn first_spike(&self, threshold: u64) -> Option<usize> {
        self.frame_sums().into_iter().position(|sum| sum > threshold)
    }
    /// Looks for the first frame which sum is larger than `threshold`
    pub fn spike_scan(&self, threshold: u64) -> SpikeScan {
        SpikeScan {
            threshold,
            first_spike: self.first_spike(threshold),
        }
    }
}

/// Result of the search for the first spike in the raw frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpikeScan {
    pub threshold: u64,
    /// index of the first frame which sum is larger than the threshold
    pub first_spike: Option<usize>,
}
impl fmt::Display for SpikeScan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.first_spike {
            Some(frame) => write!(f, "first spike in frame #{frame}"),
            None => write!(f, "no frame sum above {}", self.threshold),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use npyz::WriterBuilder;
    use std::fs;

    pub(crate) fn write_npz(path: &Path, shape: &[u64], samples: &[u16]) {
        let mut npz = npyz::npz::NpzWriter::create(path).unwrap();
        let mut writer = npz
            .array("data", Default::default())
            .unwrap()
            .default_dtype()
            .shape(shape)
            .begin_nd()
            .unwrap();
        writer.extend(samples.iter().copied()).unwrap();
        writer.finish().unwrap();
    }

    fn write_npy(path: &Path, shape: &[u64], order: Order, samples: &[u16]) {
        let mut file = fs::File::create(path).unwrap();
        let mut writer = npyz::WriteOptions::new()
            .default_dtype()
            .shape(shape)
            .order(order)
            .writer(&mut file)
            .begin_nd()
            .unwrap();
        writer.extend(samples.iter().copied()).unwrap();
        writer.finish().unwrap();
    }

    fn npz_source(path: &Path) -> RawFrameSource {
        RawFrameSource::new(path).extension("npz")
    }

    #[test]
    fn locate_exact() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("G1_0_0.npz"), b"").unwrap();
        fs::write(dir.path().join("run2_G1_0_0.npz"), b"").unwrap();
        assert_eq!(
            npz_source(dir.path()).locate(Module::M420, GainMode::G1).unwrap(),
            dir.path().join("G1_0_0.npz")
        );
    }

    #[test]
    fn locate_wildcard() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("pedestal_G2_1_0.npz"), b"").unwrap();
        assert_eq!(
            npz_source(dir.path()).locate(Module::M418, GainMode::G2).unwrap(),
            dir.path().join("pedestal_G2_1_0.npz")
        );
    }

    #[test]
    fn locate_skips_hidden_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".run_G0_1_0.npz"), b"").unwrap();
        fs::write(dir.path().join("run_G0_1_0.npz"), b"").unwrap();
        assert_eq!(
            npz_source(dir.path()).locate(Module::M418, GainMode::G0).unwrap(),
            dir.path().join("run_G0_1_0.npz")
        );
        fs::remove_file(dir.path().join("run_G0_1_0.npz")).unwrap();
        assert!(matches!(
            npz_source(dir.path()).locate(Module::M418, GainMode::G0),
            Err(SourceError::SourceNotFound(_))
        ));
    }

    #[test]
    fn locate_missing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("G0_1_0.npz"), b"").unwrap();
        assert!(matches!(
            npz_source(dir.path()).locate(Module::M420, GainMode::G0),
            Err(SourceError::SourceNotFound(_))
        ));
    }

    #[test]
    fn locate_ambiguous() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a_G0_0_0.npz"), b"").unwrap();
        fs::write(dir.path().join("b_G0_0_0.npz"), b"").unwrap();
        match npz_source(dir.path()).locate(Module::M420, GainMode::G0) {
            Err(SourceError::AmbiguousSource { candidates, .. }) => assert_eq!(
                candidates,
                vec![dir.path().join("a_G0_0_0.npz"), dir.path().join("b_G0_0_0.npz")]
            ),
            other => panic!("expected an ambiguous source, got {other:?}"),
        }
    }

    #[test]
    fn load_npz() {
        let dir = tempfile::tempdir().unwrap();
        let samples: Vec<u16> = (0..24).map(|i| (1 << 14) | i).collect();
        write_npz(&dir.path().join("G1_1_0.npz"), &[4, 2, 3], &samples);
        let frames = npz_source(dir.path())
            .sensor_shape(Some((2, 3)))
            .load(Module::M418, GainMode::G1)
            .unwrap();
        assert_eq!(frames.frame_count(), 4);
        assert_eq!(frames.frame_shape(), (2, 3));
        assert_eq!(frames.nbytes(), 48);
        assert_eq!(frames.view()[[1, 0, 2]], (1 << 14) | 8);
        let g1 = 6 * (1 << 14);
        assert_eq!(
            frames.frame_sums(),
            vec![g1 + 15, g1 + 51, g1 + 87, g1 + 123]
        );
    }

    #[test]
    fn load_npy() {
        let dir = tempfile::tempdir().unwrap();
        let samples: Vec<u16> = (0..12).collect();
        write_npy(&dir.path().join("G0_0_0.npy"), &[2, 2, 3], Order::C, &samples);
        let frames = RawFrameSource::new(dir.path())
            .extension("npy")
            .sensor_shape(Some((2, 3)))
            .load(Module::M420, GainMode::G0)
            .unwrap();
        assert_eq!(frames.view().dim(), (2, 2, 3));
        assert_eq!(frames.view()[[1, 0, 2]], 8);
        assert_eq!(frames.frame(1).sum(), 51);
    }

    #[test]
    fn load_fortran_order() {
        let dir = tempfile::tempdir().unwrap();
        let samples: Vec<u16> = (0..12).collect();
        write_npy(
            &dir.path().join("G2_1_0.npy"),
            &[2, 2, 3],
            Order::Fortran,
            &samples,
        );
        let frames = RawFrameSource::new(dir.path())
            .extension("npy")
            .sensor_shape(Some((2, 3)))
            .load(Module::M418, GainMode::G2)
            .unwrap();
        // the frame index varies fastest
        assert_eq!(frames.view()[[1, 0, 0]], 1);
        assert_eq!(frames.view()[[0, 1, 0]], 2);
        assert_eq!(frames.view()[[0, 0, 1]], 4);
        assert_eq!(frames.view()[[1, 1, 2]], 11);
    }

    #[test]
    fn load_unsupported_format() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("G0_0_0.txt"), b"").unwrap();
        assert!(matches!(
            RawFrameSource::new(dir.path())
                .extension("txt")
                .load(Module::M420, GainMode::G0),
            Err(SourceError::UnsupportedFormat(_))
        ));
    }

    #[cfg(feature = "hdf5")]
    fn write_h5(path: &Path, dataset: &str, data: &Array3<u16>) {
        let file = hdf5::File::create(path).unwrap();
        file.new_dataset_builder()
            .with_data(data)
            .create(dataset)
            .unwrap();
    }

    #[cfg(feature = "hdf5")]
    #[test]
    fn load_h5() {
        let dir = tempfile::tempdir().unwrap();
        let data = Array3::from_shape_fn((3, 2, 3), |(f, r, c)| {
            (1 << 14) | (100 * f + 10 * r + c) as u16
        });
        write_h5(&dir.path().join("scan_G1_0_0.h5"), "data", &data);
        let source = RawFrameSource::new(dir.path())
            .extension("h5")
            .sensor_shape(Some((2, 3)));
        let frames = source.load(Module::M420, GainMode::G1).unwrap();
        assert_eq!(frames.view(), data.view());
        assert_eq!(frames.nbytes(), 36);
        assert!(matches!(
            source.dataset("frames").load(Module::M420, GainMode::G1),
            Err(SourceError::MissingDataset { .. })
        ));
    }

    #[cfg(feature = "hdf5")]
    #[test]
    fn load_h5_wrong_shape() {
        let dir = tempfile::tempdir().unwrap();
        write_h5(
            &dir.path().join("G2_1_0.h5"),
            "data",
            &Array3::zeros((2, 2, 2)),
        );
        assert!(matches!(
            RawFrameSource::new(dir.path())
                .extension("h5")
                .load(Module::M418, GainMode::G2),
            Err(SourceError::ShapeMismatch(..))
        ));
    }

    #[test]
    fn load_wrong_sensor_shape() {
        let dir = tempfile::tempdir().unwrap();
        write_npz(&dir.path().join("G0_0_0.npz"), &[2, 2, 2], &[0u16; 8]);
        let source = npz_source(dir.path()).sensor_shape(Some((512, 1024)));
        assert!(matches!(
            source.load(Module::M420, GainMode::G0),
            Err(SourceError::ShapeMismatch(..))
        ));
    }

    #[test]
    fn load_not_3d() {
        let dir = tempfile::tempdir().unwrap();
        write_npz(&dir.path().join("G0_0_0.npz"), &[2, 4], &[0u16; 8]);
        let source = npz_source(dir.path()).sensor_shape(None);
        assert!(matches!(
            source.load(Module::M420, GainMode::G0),
            Err(SourceError::ShapeMismatch(..))
        ));
    }

    #[test]
    fn load_missing_dataset() {
        let dir = tempfile::tempdir().unwrap();
        write_npz(&dir.path().join("G0_0_0.npz"), &[1, 2, 2], &[0u16; 4]);
        let source = npz_source(dir.path()).sensor_shape(None).dataset("frames");
        assert!(matches!(
            source.load(Module::M420, GainMode::G0),
            Err(SourceError::MissingDataset { .. })
        ));
    }

    #[test]
    fn first_spike() {
        let mut data = Array3::<u16>::from_elem((5, 2, 2), 10);
        data.slice_mut(s![3, .., ..]).fill((1 << 14) | 1000);
        let frames = RawFrames::from(data);
        assert_eq!(frames.frame_sums(), vec![40, 40, 40, 69536, 40]);
        assert_eq!(frames.first_spike(100), Some(3));
        assert_eq!(frames.first_spike(70000), None);
    }

    #[test]
    fn gain_switch_spike() {
        // a frame switched to G1 at a low ADC value still stands out
        let mut data = Array3::<u16>::from_elem((3, 2, 2), 3000);
        data.slice_mut(s![1, .., ..]).fill((1 << 14) | 500);
        let frames = RawFrames::from(data);
        assert_eq!(frames.frame_sums(), vec![12000, 67536, 12000]);
        assert_eq!(frames.first_spike(20000), Some(1));
        assert_eq!(
            frames.spike_scan(70000),
            SpikeScan {
                threshold: 70000,
                first_spike: None
            }
        );
        assert_eq!(frames.spike_scan(20000).to_string(), "first spike in frame #1");
    }
}
