// Default tuning constants for the clock correction filter
//
// These match the reference deployment: a ±10 ppm crystal driving a 40-bit
// DW1000 timestamp counter. Deployments with different clock hardware supply
// their own CorrectionParams instead of these defaults.

/// Maximum relative frequency deviation per the crystal spec (±10 ppm)
pub const MAX_CLOCK_DEVIATION_SPEC: f64 = 10e-6;

/// Upper bound of the plausible correction envelope. Two clocks each off by
/// the full spec deviation in opposite directions give a relative drift of
/// twice the per-clock spec, hence the factor 2. The lower bound is the mirror
/// image around 1.0: `2.0 - CLOCK_CORRECTION_SPEC_MAX`.
pub const CLOCK_CORRECTION_SPEC_MAX: f64 = 1.0 + MAX_CLOCK_DEVIATION_SPEC * 2.0;

/// Deviation from the current estimate treated as measurement jitter (30 ppb)
pub const CLOCK_CORRECTION_ACCEPTED_NOISE: f64 = 0.03e-6;

/// Low-pass filter weight kept on the old estimate when smoothing in a sample
pub const CLOCK_CORRECTION_FILTER: f64 = 0.1;

/// Trust bucket ceiling: samples of corroboration needed for full confidence
pub const CLOCK_CORRECTION_BUCKET_MAX: u32 = 4;

/// Truncation mask for the DW1000's 40-bit timestamp counter
pub const TIMESTAMP_MASK_40BIT: u64 = 0xFF_FFFF_FFFF;
