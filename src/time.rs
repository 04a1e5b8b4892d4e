//! Timestamp helpers.
//!
//! Every stream carries PTS and durations in its own integer timescale
//! (ticks per second).  Cross-stream decisions (interleaving, normalization,
//! sync distance) go through the common unscaled unit [`TIME_SCALE`].

use std::cmp::Ordering;

/// Common unscaled time unit: microseconds.
pub const TIME_SCALE: u32 = 1_000_000;

/// Wire value of an undefined timestamp.
pub const PTS_UNDEFINED: i64 = i64::MIN;

/// Convert `time` from `from` ticks/s into `to` ticks/s, rounding toward
/// negative infinity.
pub fn rescale(from: u32, to: u32, time: i64) -> i64 {
    if from == to || from == 0 {
        return time;
    }
    let scaled = (time as i128 * to as i128).div_euclid(from as i128);
    scaled.clamp(i64::MIN as i128 + 1, i64::MAX as i128) as i64
}

/// Convert a stream timestamp into [`TIME_SCALE`] units.
#[inline]
pub fn unscale(timescale: u32, time: i64) -> i64 {
    rescale(timescale, TIME_SCALE, time)
}

/// Exact comparison of two timestamps that live in different timescales.
pub fn compare(a: i64, a_scale: u32, b: i64, b_scale: u32) -> Ordering {
    let lhs = a as i128 * b_scale.max(1) as i128;
    let rhs = b as i128 * a_scale.max(1) as i128;
    lhs.cmp(&rhs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescale_identity_and_units() {
        assert_eq!(rescale(48000, 48000, 1234), 1234);
        assert_eq!(rescale(48000, TIME_SCALE, 48000), 1_000_000);
        assert_eq!(rescale(1000, 90000, 2500), 225_000);
        assert_eq!(rescale(90000, 1000, -1), -1);
    }

    #[test]
    fn compare_across_timescales() {
        assert_eq!(compare(1, 2, 500, 1000), Ordering::Equal);
        assert_eq!(compare(3003, 30000, 4800, 48000), Ordering::Greater);
        assert_eq!(compare(0, 25, 0, 48000), Ordering::Equal);
    }
}
