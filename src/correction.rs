// Clock correction estimation and filtering
//
// Estimates the relative drift ratio between a local reference clock and a
// remote clock whose timestamp counter wraps at a fixed bit width. Each
// candidate ratio computed from a pair of timestamp samples passes through a
// hysteresis filter: a bounded "trust bucket" counts how many recent samples
// have corroborated the running estimate, so a single outlier against a
// well-established estimate is rejected while a genuine drift change is
// absorbed once that trust runs out.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::constants::{
    CLOCK_CORRECTION_ACCEPTED_NOISE, CLOCK_CORRECTION_BUCKET_MAX, CLOCK_CORRECTION_FILTER,
    CLOCK_CORRECTION_SPEC_MAX,
};
use crate::timestamp::truncate_timestamp;

/// Sentinel returned by [`calculate_correction`] when the sample contains no
/// measurable elapsed remote-clock time. Never a legitimate ratio, and outside
/// every sane spec envelope, so feeding it to [`update_correction`] anyway is
/// harmless (it gets rejected there).
pub const INVALID_CORRECTION: f64 = -1.0;

/// Tuning constants for the correction filter, fixed per deployment.
///
/// Injected by the caller rather than hardwired so the same filter serves
/// clock hardware with different quality assumptions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CorrectionParams {
    /// Upper bound of the plausible drift envelope; the lower bound is the
    /// mirror image around 1.0 (`2.0 - spec_max`). Bounds are exclusive.
    pub spec_max: f64,
    /// Deviation from the current estimate treated as measurement jitter
    pub accepted_noise: f64,
    /// Low-pass weight kept on the old estimate when smoothing, in [0, 1]
    pub filter_weight: f64,
    /// Trust bucket ceiling
    pub bucket_max: u32,
}

impl Default for CorrectionParams {
    fn default() -> Self {
        CorrectionParams {
            spec_max: CLOCK_CORRECTION_SPEC_MAX,
            accepted_noise: CLOCK_CORRECTION_ACCEPTED_NOISE,
            filter_weight: CLOCK_CORRECTION_FILTER,
            bucket_max: CLOCK_CORRECTION_BUCKET_MAX,
        }
    }
}

impl CorrectionParams {
    /// Lower bound of the plausible drift envelope
    pub fn spec_min(&self) -> f64 {
        2.0 - self.spec_max
    }
}

/// Filter state for one tracked remote clock.
///
/// Caller-owned; one instance per remote clock, mutated only through
/// [`update_correction`]. No internal locking: a multi-threaded caller must
/// guarantee exclusive access per instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionStorage {
    correction: f64,
    bucket: u32,
}

impl Default for CorrectionStorage {
    /// Starts from the power-on assumption that both clocks run at the same
    /// rate, with no trust accumulated yet.
    fn default() -> Self {
        CorrectionStorage::new(1.0)
    }
}

impl CorrectionStorage {
    /// Create a storage with a best-guess initial correction and empty bucket
    pub fn new(initial_correction: f64) -> Self {
        CorrectionStorage {
            correction: initial_correction,
            bucket: 0,
        }
    }

    /// Current accepted drift ratio
    pub fn correction(&self) -> f64 {
        self.correction
    }

    /// Current trust bucket level
    pub fn bucket(&self) -> u32 {
        self.bucket
    }

    /// Add one unit of trust, clamped at `bucket_max`
    pub fn fill_bucket(&mut self, bucket_max: u32) {
        if self.bucket < bucket_max {
            self.bucket += 1;
        }
    }

    /// Spend one unit of trust, clamped at 0.
    ///
    /// Returns `true` iff the bucket was already empty before the call, i.e.
    /// trust in the current estimate is fully exhausted.
    pub fn empty_bucket(&mut self) -> bool {
        if self.bucket > 0 {
            self.bucket -= 1;
            false
        } else {
            true
        }
    }
}

/// Compute a candidate drift ratio from two timestamp pairs.
///
/// `new_ref`/`old_ref` are readings of the local reference clock taken at the
/// same instants as the `new_remote`/`old_remote` readings of the remote
/// clock. `mask` describes the remote counter's effective width; both
/// differences are taken modulo `mask + 1`, which transparently handles
/// counter wraparound as long as the true elapsed interval is shorter than
/// one full counter period.
///
/// The mask must match the true hardware counter width: if the counter wraps
/// at fewer bits than the mask covers, the modular subtraction under-masks
/// and the returned ratio is wrong. This is not detected here.
///
/// Returns [`INVALID_CORRECTION`] when no remote-clock time elapsed between
/// the two samples.
pub fn calculate_correction(
    new_ref: u64,
    old_ref: u64,
    new_remote: u64,
    old_remote: u64,
    mask: u64,
) -> f64 {
    let reference_ticks = truncate_timestamp(new_ref.wrapping_sub(old_ref), mask);
    let remote_ticks = truncate_timestamp(new_remote.wrapping_sub(old_remote), mask);

    if remote_ticks == 0 {
        return INVALID_CORRECTION;
    }

    reference_ticks as f64 / remote_ticks as f64
}

/// Outcome of classifying one candidate against the current filter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Outside the plausible drift envelope; ignore entirely
    OutOfSpec,
    /// Within accepted noise of the estimate; merge via the low-pass filter
    AcceptSmoothed,
    /// A real jump with no trust backing the old estimate; take it as-is
    AcceptRaw,
    /// A real jump contradicted by recent corroboration; reject, spend trust
    RejectDivergent,
}

/// Classify a candidate without touching the storage.
///
/// Split out from [`update_correction`] so the branch logic is testable in
/// isolation. Spec bounds are exclusive: a candidate exactly at `spec_max`
/// (or `spec_min`) is out of spec. The noise bound is exclusive too: a
/// candidate exactly `accepted_noise` away from the estimate routes to the
/// trust-based branch, not the smoothing one.
pub fn classify(
    storage: &CorrectionStorage,
    candidate: f64,
    params: &CorrectionParams,
) -> Decision {
    if !(params.spec_min() < candidate && candidate < params.spec_max) {
        return Decision::OutOfSpec;
    }

    let difference = candidate - storage.correction;
    if -params.accepted_noise < difference && difference < params.accepted_noise {
        Decision::AcceptSmoothed
    } else if storage.bucket == 0 {
        Decision::AcceptRaw
    } else {
        Decision::RejectDivergent
    }
}

/// Feed one candidate drift ratio into the filter.
///
/// Returns `true` if the stored correction changed, `false` if the candidate
/// was rejected. Rejection leaves the correction untouched; an out-of-spec
/// candidate leaves the bucket untouched as well, while an in-spec divergent
/// one spends a unit of trust.
pub fn update_correction(
    storage: &mut CorrectionStorage,
    candidate: f64,
    params: &CorrectionParams,
) -> bool {
    match classify(storage, candidate, params) {
        Decision::OutOfSpec => {
            debug!(
                candidate,
                spec_min = params.spec_min(),
                spec_max = params.spec_max,
                "correction candidate out of spec, ignored"
            );
            false
        }
        Decision::AcceptSmoothed => {
            storage.correction = storage.correction * params.filter_weight
                + candidate * (1.0 - params.filter_weight);
            storage.fill_bucket(params.bucket_max);
            trace!(
                candidate,
                correction = storage.correction,
                bucket = storage.bucket,
                "correction candidate smoothed in"
            );
            true
        }
        Decision::AcceptRaw => {
            storage.correction = candidate;
            storage.fill_bucket(params.bucket_max);
            debug!(
                candidate,
                bucket = storage.bucket,
                "correction reference replaced by divergent candidate"
            );
            true
        }
        Decision::RejectDivergent => {
            storage.empty_bucket();
            debug!(
                candidate,
                correction = storage.correction,
                bucket = storage.bucket,
                "divergent correction candidate rejected, trust spent"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TIMESTAMP_MASK_40BIT;

    /// Next representable f64 below `x`, for values of `x` above 1.0
    fn next_below(x: f64) -> f64 {
        assert!(x > 1.0);
        f64::from_bits(x.to_bits() - 1)
    }

    fn params() -> CorrectionParams {
        CorrectionParams::default()
    }

    #[test]
    fn test_read_correction() {
        let storage = CorrectionStorage::new(12345.6789);
        assert_eq!(storage.correction(), 12345.6789);
        assert_eq!(storage.bucket(), 0);
    }

    #[test]
    fn test_default_storage_assumes_equal_rates() {
        let storage = CorrectionStorage::default();
        assert_eq!(storage.correction(), 1.0);
        assert_eq!(storage.bucket(), 0);
    }

    #[test]
    fn test_fill_bucket_clamps_at_max() {
        let max = CLOCK_CORRECTION_BUCKET_MAX;
        let mut storage = CorrectionStorage::new(0.0);

        for i in 0..3 * max {
            storage.fill_bucket(max);
            if i < max {
                assert_eq!(storage.bucket(), i + 1);
            } else {
                assert_eq!(storage.bucket(), max);
            }
        }
    }

    #[test]
    fn test_empty_bucket_clamps_at_zero() {
        let max = CLOCK_CORRECTION_BUCKET_MAX;
        let mut storage = CorrectionStorage::new(0.0);
        for _ in 0..max {
            storage.fill_bucket(max);
        }

        for i in (1..=max).rev() {
            let was_empty = storage.empty_bucket();
            assert!(!was_empty);
            assert_eq!(storage.bucket(), i - 1);
        }

        // Further empties stay at zero and report exhaustion
        for _ in 0..2 * max {
            let was_empty = storage.empty_bucket();
            assert!(was_empty);
            assert_eq!(storage.bucket(), 0);
        }
    }

    #[test]
    fn test_calculate_without_wraparound() {
        let correction = 1.0057;
        let remote_elapsed: u64 = 10000;

        let old_remote: u64 = 1000;
        let new_remote = old_remote + remote_elapsed;
        let old_ref: u64 = 56789;
        let new_ref = old_ref + (correction * remote_elapsed as f64) as u64;

        let result = calculate_correction(
            new_ref,
            old_ref,
            new_remote,
            old_remote,
            TIMESTAMP_MASK_40BIT,
        );
        assert_eq!(result, correction);
    }

    #[test]
    fn test_calculate_with_wraparound() {
        let correction = 1.0057;
        let remote_elapsed: u64 = 10000;

        // Remote counter wraps across the 40-bit boundary mid-interval
        let old_remote = TIMESTAMP_MASK_40BIT - remote_elapsed / 2;
        let new_remote = (old_remote + remote_elapsed) & TIMESTAMP_MASK_40BIT;
        let old_ref: u64 = 56789;
        let new_ref = old_ref + (correction * remote_elapsed as f64) as u64;

        let result = calculate_correction(
            new_ref,
            old_ref,
            new_remote,
            old_remote,
            TIMESTAMP_MASK_40BIT,
        );
        assert_eq!(result, correction);

        // With a mask wider than the true counter the modular subtraction
        // under-masks and the recovered ratio is wrong. Documented limitation.
        let wrong_mask = 0x1FF_FFFF_FFFF; // 41 bits
        let wrong_result =
            calculate_correction(new_ref, old_ref, new_remote, old_remote, wrong_mask);
        assert_ne!(wrong_result, correction);
    }

    #[test]
    fn test_calculate_with_zero_remote_elapsed() {
        let result = calculate_correction(56789, 56789, 1000, 1000, TIMESTAMP_MASK_40BIT);
        assert_eq!(result, INVALID_CORRECTION);
    }

    #[test]
    fn test_sentinel_is_out_of_spec() {
        let storage = CorrectionStorage::new(1.0);
        assert_eq!(
            classify(&storage, INVALID_CORRECTION, &params()),
            Decision::OutOfSpec
        );
    }

    #[test]
    fn test_update_rejects_sample_at_outer_spec_limit() {
        let p = params();
        let mut storage = CorrectionStorage::new(5.0);
        for _ in 0..3 {
            storage.fill_bucket(p.bucket_max);
        }

        // spec_max itself is the first value out of spec
        let changed = update_correction(&mut storage, p.spec_max, &p);

        assert!(!changed);
        assert_eq!(storage.correction(), 5.0);
        assert_eq!(storage.bucket(), 3);
    }

    #[test]
    fn test_update_rejects_sample_at_lower_spec_limit() {
        let p = params();
        let mut storage = CorrectionStorage::new(1.0);
        storage.fill_bucket(p.bucket_max);

        let changed = update_correction(&mut storage, p.spec_min(), &p);

        assert!(!changed);
        assert_eq!(storage.correction(), 1.0);
        assert_eq!(storage.bucket(), 1);
    }

    #[test]
    fn test_update_accepts_sample_at_inner_spec_limit_with_empty_bucket() {
        let p = params();
        let mut storage = CorrectionStorage::new(1.0);

        // First representable value inside the envelope
        let candidate = next_below(p.spec_max);
        let changed = update_correction(&mut storage, candidate, &p);

        assert!(changed);
        assert_eq!(storage.correction(), candidate);
        assert_eq!(storage.bucket(), 1);
    }

    #[test]
    fn test_update_noise_outer_limit_with_empty_bucket() {
        let p = params();
        let mut storage = CorrectionStorage::new(1.0);

        // Exactly accepted_noise away: first value outside the noise band,
        // so it routes to the trust branch; empty bucket accepts it raw.
        let candidate = 1.0 + p.accepted_noise;
        let changed = update_correction(&mut storage, candidate, &p);

        assert!(changed);
        assert_eq!(storage.correction(), candidate);
        assert_eq!(storage.bucket(), 1);
    }

    #[test]
    fn test_update_noise_outer_limit_with_non_empty_bucket() {
        let p = params();
        let mut storage = CorrectionStorage::new(1.0);
        storage.fill_bucket(p.bucket_max);
        storage.fill_bucket(p.bucket_max);

        let candidate = 1.0 + p.accepted_noise;
        let changed = update_correction(&mut storage, candidate, &p);

        assert!(!changed);
        assert_eq!(storage.correction(), 1.0);
        assert_eq!(storage.bucket(), 1);
    }

    #[test]
    fn test_update_noise_inner_limit_applies_filter() {
        let p = params();
        let initial = 1.0 + 10e-6; // inside the spec envelope
        let mut storage = CorrectionStorage::new(initial);
        storage.fill_bucket(p.bucket_max);
        storage.fill_bucket(p.bucket_max);

        // First representable value inside the noise band
        let candidate = next_below(initial + p.accepted_noise);
        let changed = update_correction(&mut storage, candidate, &p);

        let expected = initial * p.filter_weight + candidate * (1.0 - p.filter_weight);
        assert!(changed);
        assert!((storage.correction() - expected).abs() < 1e-15);
        assert_eq!(storage.bucket(), 3);
    }

    #[test]
    fn test_repeated_divergence_exhausts_trust_then_jump_is_absorbed() {
        let p = params();
        let mut storage = CorrectionStorage::new(1.0);
        for _ in 0..3 {
            storage.fill_bucket(p.bucket_max);
        }

        // A real drift change: in spec, far outside the noise band
        let new_rate = 1.0 + 5e-6;
        for expected_bucket in (0..3).rev() {
            let changed = update_correction(&mut storage, new_rate, &p);
            assert!(!changed);
            assert_eq!(storage.correction(), 1.0);
            assert_eq!(storage.bucket(), expected_bucket);
        }

        // Trust exhausted: the next divergent sample replaces the estimate
        let changed = update_correction(&mut storage, new_rate, &p);
        assert!(changed);
        assert_eq!(storage.correction(), new_rate);
        assert_eq!(storage.bucket(), 1);
    }

    #[test]
    fn test_classify_decisions() {
        let p = params();
        let empty = CorrectionStorage::new(1.0);
        let mut trusted = CorrectionStorage::new(1.0);
        trusted.fill_bucket(p.bucket_max);

        let divergent = 1.0 + 5e-6;
        assert_eq!(classify(&empty, 1.5, &p), Decision::OutOfSpec);
        assert_eq!(classify(&empty, 0.5, &p), Decision::OutOfSpec);
        assert_eq!(classify(&empty, 1.0, &p), Decision::AcceptSmoothed);
        assert_eq!(classify(&empty, divergent, &p), Decision::AcceptRaw);
        assert_eq!(classify(&trusted, divergent, &p), Decision::RejectDivergent);

        // Classification alone never mutates
        assert_eq!(trusted.bucket(), 1);
        assert_eq!(trusted.correction(), 1.0);
    }
}
