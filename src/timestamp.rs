// Timestamp truncation for fixed-width hardware counters
//
// Remote clocks report their time through a free-running counter of limited
// width (40 bits on the DW1000 radio, for example). Reading such a counter
// back into a u64 means the high bits are garbage once the counter has
// wrapped; masking them off models the hardware exactly.

/// Truncate a raw timestamp to the effective counter width described by `mask`.
///
/// `mask` must be a contiguous run of low-order set bits (e.g. `0xFF_FFFF_FFFF`
/// for a 40-bit counter). Pure function: `truncate_timestamp(t, m) == t & m`.
#[inline]
pub fn truncate_timestamp(timestamp: u64, mask: u64) -> u64 {
    timestamp & mask
}

/// Build the truncation mask for a counter of `bits` effective width.
///
/// `mask_from_width(40) == 0xFF_FFFF_FFFF`; `mask_from_width(64)` is all ones.
#[inline]
pub fn mask_from_width(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}
