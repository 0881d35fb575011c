// Clock Correction Simulator - Main Entry Point
//
// Drives the correction filter with synthetic timestamp pairs from a
// simulated remote clock: configurable true drift, sample jitter, counter
// wraparound width and outlier injection. Useful for tuning filter
// parameters against a known ground truth.

use clap::Parser;
use clock_correction::config::Config;
use clock_correction::correction::{
    calculate_correction, update_correction, CorrectionParams, CorrectionStorage,
    INVALID_CORRECTION,
};
use clock_correction::timestamp::{mask_from_width, truncate_timestamp};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, error, info, warn};

/// Simulated remote clock: a wrapped tick counter running at a slightly
/// different rate than the reference, read back with optional jitter.
struct SimulatedClock {
    /// True remote ticks elapsed per reference tick
    rate: f64,
    /// Truncation mask for the remote counter
    mask: u64,
    /// Reference ticks advanced per sample interval
    ticks_per_sample: f64,
    ref_time: f64,
    remote_time: f64,
}

impl SimulatedClock {
    fn new(config: &Config) -> Self {
        let interval = if config.fast { 0.01 } else { 1.0 / config.rate };
        let mask = mask_from_width(config.wrap_bits);
        let ticks_per_sample = interval * config.tick_freq;
        SimulatedClock {
            rate: 1.0 + config.drift_ppm * 1e-6,
            mask,
            ticks_per_sample,
            ref_time: 0.0,
            // Start the remote counter just short of its wrap point so
            // wraparound is exercised early in every run
            remote_time: mask as f64 - ticks_per_sample,
        }
    }

    /// Advance both clocks by one sample interval and read them back.
    /// Returns (reference timestamp, truncated remote timestamp).
    fn step(&mut self, rng: &mut StdRng, jitter_ticks: f64) -> (u64, u64) {
        self.ref_time += self.ticks_per_sample;
        self.remote_time += self.ticks_per_sample * self.rate;

        let jitter = if jitter_ticks > 0.0 {
            rng.gen_range(-jitter_ticks..=jitter_ticks)
        } else {
            0.0
        };

        let ref_ts = self.ref_time as u64;
        let remote_ts = truncate_timestamp((self.remote_time + jitter) as u64, self.mask);
        (ref_ts, remote_ts)
    }
}

/// Run statistics, dumped as JSON on exit
#[derive(Debug, Serialize)]
struct SimStats {
    samples: u64,
    accepted: u64,
    rejected: u64,
    invalid: u64,
    outliers_injected: u64,
    expected_correction: f64,
    final_correction: f64,
    final_error_ppm: f64,
    final_bucket: u32,
    params: CorrectionParams,
}

struct Simulator {
    clock: SimulatedClock,
    rng: StdRng,
    params: CorrectionParams,
    storage: CorrectionStorage,
    jitter_ticks: f64,
    outlier_probability: f64,
    last_ref: u64,
    last_remote: u64,
    accepted: u64,
    rejected: u64,
    invalid: u64,
    outliers_injected: u64,
}

impl Simulator {
    fn new(config: &Config) -> Self {
        let mut clock = SimulatedClock::new(config);
        let mut rng = StdRng::seed_from_u64(config.seed);
        let (first_ref, first_remote) = clock.step(&mut rng, config.jitter_ticks);

        Simulator {
            clock,
            rng,
            params: CorrectionParams::default(),
            storage: CorrectionStorage::default(),
            jitter_ticks: config.jitter_ticks,
            outlier_probability: config.outlier_probability,
            last_ref: first_ref,
            last_remote: first_remote,
            accepted: 0,
            rejected: 0,
            invalid: 0,
            outliers_injected: 0,
        }
    }

    /// Process one timestamp-pair sample through the filter
    fn step(&mut self) {
        let (new_ref, mut new_remote) = self.clock.step(&mut self.rng, self.jitter_ticks);

        if self.outlier_probability > 0.0 && self.rng.gen_bool(self.outlier_probability) {
            // Corrupt the remote reading the way a reflected or mis-decoded
            // packet would: a large bogus offset
            new_remote = truncate_timestamp(
                new_remote.wrapping_add(self.rng.gen_range(1_000_000..100_000_000)),
                self.clock.mask,
            );
            self.outliers_injected += 1;
        }

        let candidate = calculate_correction(
            new_ref,
            self.last_ref,
            new_remote,
            self.last_remote,
            self.clock.mask,
        );
        self.last_ref = new_ref;
        self.last_remote = new_remote;

        if candidate == INVALID_CORRECTION {
            self.invalid += 1;
            debug!("degenerate sample, no remote ticks elapsed");
            return;
        }

        if update_correction(&mut self.storage, candidate, &self.params) {
            self.accepted += 1;
        } else {
            self.rejected += 1;
        }
    }

    fn stats(&self, samples: u64) -> SimStats {
        let expected = 1.0 / self.clock.rate;
        let final_correction = self.storage.correction();
        SimStats {
            samples,
            accepted: self.accepted,
            rejected: self.rejected,
            invalid: self.invalid,
            outliers_injected: self.outliers_injected,
            expected_correction: expected,
            final_correction,
            final_error_ppm: (final_correction - expected) * 1e6,
            final_bucket: self.storage.bucket(),
            params: self.params,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();

    init_logging(config.verbose);

    info!("Starting clock correction simulator");
    info!(
        "True drift {} ppm, {} bit counter, jitter {} ticks, outlier probability {}",
        config.drift_ppm, config.wrap_bits, config.jitter_ticks, config.outlier_probability
    );

    if config.rate <= 0.0 && !config.fast {
        error!("Sample rate must be positive (or use --fast)");
        return Err("invalid sample rate".into());
    }
    if !(0.0..=1.0).contains(&config.outlier_probability) {
        error!("Outlier probability must be in [0, 1]");
        return Err("invalid outlier probability".into());
    }

    let mut sim = Simulator::new(&config);
    let mut processed: u64 = 0;

    if config.fast {
        while processed < config.samples {
            sim.step();
            processed += 1;
        }
    } else {
        let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / config.rate));
        while processed < config.samples {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("Received shutdown signal (Ctrl+C)");
                    break;
                }
                _ = interval.tick() => {
                    sim.step();
                    processed += 1;
                }
            }
        }
    }

    let stats = sim.stats(processed);
    info!(
        "Processed {} samples: {} accepted, {} rejected, {} invalid",
        stats.samples, stats.accepted, stats.rejected, stats.invalid
    );
    info!(
        "Final correction {:.9} (expected {:.9}, error {:.3} ppm), bucket {}/{}",
        stats.final_correction,
        stats.expected_correction,
        stats.final_error_ppm,
        stats.final_bucket,
        sim.params.bucket_max
    );
    if stats.final_error_ppm.abs() > 1.0 {
        warn!("Estimate is more than 1 ppm away from ground truth");
    }

    if let Some(path) = &config.stats_file {
        match serde_json::to_string_pretty(&stats) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    error!("Failed to write stats file {}: {}", path, e);
                } else {
                    info!("Wrote statistics to {}", path);
                }
            }
            Err(e) => error!("Failed to serialize statistics: {}", e),
        }
    }

    Ok(())
}

/// Initialize logging subsystem
fn init_logging(verbose: bool) {
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true);

    if verbose {
        subscriber.with_max_level(tracing::Level::DEBUG).init();
        info!("Verbose logging enabled (DEBUG level)");
    } else {
        subscriber.with_max_level(tracing::Level::INFO).init();
    }
}
