use std::path::PathBuf;

use jungfrau_pedestal::{
    compare::{self, PairDifference, DIFFERENCE_HEADER},
    Estimators, PedestalLoader, TrimPolicy,
};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "pedestal-stats", about = "JUNGFRAU pedestal statistics")]
struct Opt {
    /// Path to the raw data directory, `PEDESTAL_DATA` env var if not given
    #[structopt(long)]
    path: Option<PathBuf>,
    /// Path to another raw data directory to compare the pedestals with
    #[structopt(long)]
    compare: Option<PathBuf>,
    /// Pedestal estimators: moments, robust or both
    #[structopt(short, long, default_value = "both")]
    estimator: Estimators,
    /// Interquartile mean over all the frames, zero filling the samples in other gain modes
    #[structopt(long)]
    zero_filled: bool,
    /// Number of pixel rows in a frame
    #[structopt(long, default_value = "512")]
    rows: usize,
    /// Number of pixel columns in a frame
    #[structopt(long, default_value = "1024")]
    cols: usize,
    /// Accept frames of any shape
    #[structopt(long)]
    any_shape: bool,
    /// Name of the frames array in the raw data files
    #[structopt(long, default_value = "data")]
    dataset: String,
    /// Raw data files extension: h5, npz or npy
    #[structopt(long)]
    extension: Option<String>,
    /// Reports the first frame which sum of raw samples is larger than the threshold
    #[structopt(long)]
    spikes: Option<u64>,
    /// Verbose output
    #[structopt(short, long)]
    verbose: bool,
}

fn loader(opt: &Opt, path: Option<&PathBuf>) -> jungfrau_pedestal::Result<PedestalLoader> {
    let loader = match path {
        Some(path) => PedestalLoader::default().data_path(path),
        None => PedestalLoader::from_env()?,
    };
    let loader = match opt.extension.as_deref() {
        Some(extension) => loader.extension(extension),
        None => loader,
    }
    .dataset(opt.dataset.as_str())
    .estimators(opt.estimator)
    .trim_policy(if opt.zero_filled {
        TrimPolicy::ZeroFilled
    } else {
        TrimPolicy::MatchedOnly
    })
    .progress(true);
    Ok(if opt.any_shape {
        loader.any_shape()
    } else {
        loader.sensor_shape(opt.rows, opt.cols)
    })
}

fn print_differences(title: &str, differences: &[PairDifference]) {
    println!("{title}");
    println!("{DIFFERENCE_HEADER}");
    differences.iter().for_each(|d| println!("{d}"));
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if opt.verbose { "debug" } else { "info" }),
    )
    .init();

    let table = loader(&opt, opt.path.as_ref())?
        .spike_threshold(opt.spikes)
        .load()?;
    println!("{}", table.summary());

    for ((gain, module), stats) in table.iter() {
        if let Some(spikes) = stats.spikes {
            println!("{module} {gain}: {spikes}");
        }
    }

    if opt.estimator == Estimators::Both {
        print_differences(
            "Interquartile mean - moment mean",
            &compare::compare_estimators(&table)?,
        );
    }

    if let Some(path) = opt.compare.as_ref() {
        let other = loader(&opt, Some(path))?.load()?;
        print_differences(
            &format!("Pedestal difference with {:?}", path),
            &compare::compare_tables(&table, &other)?,
        );
    }

    Ok(())
}
