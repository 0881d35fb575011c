use clap::Parser;

/// Clock Correction Simulator Configuration
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Number of timestamp-pair samples to process before stopping
    #[arg(long, default_value_t = 1000)]
    pub samples: u64,

    /// Sample rate in Hz (ignored with --fast)
    #[arg(long, default_value_t = 100.0)]
    pub rate: f64,

    /// Run as fast as possible instead of pacing samples in real time
    #[arg(long, default_value_t = false)]
    pub fast: bool,

    /// True relative drift of the simulated remote clock, in ppm
    #[arg(long, default_value_t = 4.0)]
    pub drift_ppm: f64,

    /// Per-sample timestamp jitter, in remote clock ticks (uniform, +/-)
    #[arg(long, default_value_t = 0.0)]
    pub jitter_ticks: f64,

    /// Effective bit width of the simulated remote timestamp counter
    #[arg(long, default_value_t = 40)]
    pub wrap_bits: u32,

    /// Probability of replacing a sample with a corrupted outlier
    #[arg(long, default_value_t = 0.0)]
    pub outlier_probability: f64,

    /// Simulated remote clock tick frequency in Hz
    #[arg(long, default_value_t = 499.2e6)]
    pub tick_freq: f64,

    /// RNG seed for reproducible runs
    #[arg(long, default_value_t = 1)]
    pub seed: u64,

    /// Write a JSON statistics summary to this file on exit
    #[arg(long, value_name = "FILE")]
    pub stats_file: Option<String>,

    /// Verbose logging (DEBUG level)
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
}
