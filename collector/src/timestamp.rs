//! Device timestamp correction
//!
//! Device timers report cycle counts from a fixed-width counter (commonly
//! 32 bits) that wraps around during long runs. The corrector converts a
//! raw (start, end) tick pair into nanoseconds as if the counter continued
//! monotonically.

const NSEC_IN_SEC: u128 = 1_000_000_000;

/// Converts raw device ticks to nanoseconds, correcting for counter
/// wraparound.
#[derive(Debug, Clone, Copy)]
pub struct TimestampCorrector {
    timer_frequency: u64,
    valid_bits: u32,
}

impl TimestampCorrector {
    pub fn new(timer_frequency: u64, valid_bits: u32) -> Self {
        assert!(timer_frequency > 0, "device timer frequency must be nonzero");
        assert!(
            valid_bits >= 1 && valid_bits <= 64,
            "timestamp width of {valid_bits} bits is outside the device contract"
        );
        Self {
            timer_frequency,
            valid_bits,
        }
    }

    /// Convert a tick count to nanoseconds: ticks * 1e9 / frequency,
    /// truncating division.
    pub fn ticks_to_ns(&self, ticks: u64) -> u64 {
        self.wide_ticks_to_ns(ticks as u128)
    }

    // Wrapped end ticks can exceed u64 range for a 64-bit counter, so the
    // conversion is done in u128.
    fn wide_ticks_to_ns(&self, ticks: u128) -> u64 {
        (ticks * NSEC_IN_SEC / self.timer_frequency as u128) as u64
    }

    /// Convert a raw tick pair to a (start_ns, end_ns) pair.
    ///
    /// `end < start` means the counter wrapped between the two samples and
    /// the end tick is advanced by one full counter period before
    /// conversion, so the resulting duration is never negative. A start tick
    /// that does not fit the stated counter width is a driver contract
    /// violation and aborts.
    pub fn correct(&self, start_ticks: u64, end_ticks: u64) -> (u64, u64) {
        let period = 1u128 << self.valid_bits;
        assert!(
            (start_ticks as u128) < period,
            "start tick {start_ticks} not representable in {} bits",
            self.valid_bits
        );

        let start_ns = self.ticks_to_ns(start_ticks);
        let end_ns = if start_ticks <= end_ticks {
            self.ticks_to_ns(end_ticks)
        } else {
            self.wide_ticks_to_ns(period + end_ticks as u128)
        };
        (start_ns, end_ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_wraparound() {
        let corrector = TimestampCorrector::new(1_000_000_000, 32);
        let (start, end) = corrector.correct(100, 250);
        assert_eq!((start, end), (100, 250));
    }

    #[test]
    fn test_wraparound_corrected() {
        // end < start: the 32-bit counter wrapped. 4_294_967_290 + 16 ticks
        // lands on 10 after the wrap, so the duration is 16 ns at 1 GHz.
        let corrector = TimestampCorrector::new(1_000_000_000, 32);
        let (start, end) = corrector.correct(4_294_967_290, 10);
        assert_eq!(end - start, 16);
        assert!(end > start);
    }

    #[test]
    fn test_frequency_scaling_truncates() {
        // 3 ticks at 2 GHz is 1.5 ns; truncating division gives 1.
        let corrector = TimestampCorrector::new(2_000_000_000, 32);
        assert_eq!(corrector.ticks_to_ns(3), 1);
        assert_eq!(corrector.ticks_to_ns(4), 2);
    }

    #[test]
    fn test_full_width_counter() {
        let corrector = TimestampCorrector::new(1_000_000_000, 64);
        let (start, end) = corrector.correct(u64::MAX - 5, 4);
        assert_eq!(end - start, 10);
    }

    #[test]
    #[should_panic(expected = "not representable")]
    fn test_start_out_of_range_is_fatal() {
        let corrector = TimestampCorrector::new(1_000_000_000, 32);
        corrector.correct(1 << 32, 10);
    }

    #[test]
    fn test_equal_ticks_zero_duration() {
        let corrector = TimestampCorrector::new(1_000_000_000, 32);
        let (start, end) = corrector.correct(42, 42);
        assert_eq!(start, end);
    }
}
