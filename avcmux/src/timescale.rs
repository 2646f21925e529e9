//! Conversion of durations between timescales.

/// The timescale of durations given in milliseconds.
pub const MILLISECONDS: u32 = 1000;

/// Convert `value`, expressed in ticks of `from` per second, to ticks of `to` per second.
///
/// The result is rounded to the nearest tick, with halves rounded up, and saturates at [`u64::MAX`]. A `from` timescale
/// of zero converts every value to zero.
pub fn convert(value: u64, from: u32, to: u32) -> u64 {
    if from == 0 {
        return 0;
    }
    let from = u128::from(from);
    let converted = (u128::from(value) * u128::from(to) + from / 2) / from;
    u64::try_from(converted).unwrap_or(u64::MAX)
}

/// Convert a duration in milliseconds to ticks of `timescale`, saturating at [`u32::MAX`].
pub fn ms_to_sample_duration(duration_ms: u64, timescale: u32) -> u32 {
    let duration = convert(duration_ms, MILLISECONDS, timescale);
    u32::try_from(duration).unwrap_or_else(|_| {
        log::warn!("sample duration of {duration_ms} ms overflows timescale {timescale}");
        u32::MAX
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn milliseconds_to_video_timescales() {
        assert_eq!(convert(40, MILLISECONDS, 9000), 360);
        assert_eq!(convert(33, MILLISECONDS, 90000), 2970);
        assert_eq!(convert(50, MILLISECONDS, 9000), 450);
    }

    #[test]
    fn rounds_half_up() {
        assert_eq!(convert(1, 3, 2), 1);
        assert_eq!(convert(1, 4, 2), 1);
        assert_eq!(convert(1, 5, 2), 0);
    }

    #[test]
    fn zero_source_timescale() {
        assert_eq!(convert(1234, 0, 9000), 0);
    }

    #[test]
    fn no_intermediate_overflow() {
        assert_eq!(convert(u64::MAX, 90000, 90000), u64::MAX);
        assert_eq!(convert(u64::MAX / 2, 1000, 2000), u64::MAX - 1);
    }

    #[test]
    fn sample_duration_saturates() {
        assert_eq!(ms_to_sample_duration(40, 90000), 3600);
        assert_eq!(ms_to_sample_duration(u64::MAX, 90000), u32::MAX);
    }
}
