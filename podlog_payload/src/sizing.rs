//! Conversion of byte targets into pod counts and per-pod line counts.
//!
//! All arithmetic is integral and rounds up: a pod never writes less than its
//! configured share and the run never aims for less than the configured total.

use std::num::NonZeroU32;

const BYTES_PER_KILOBYTE: u64 = 1024;
const KILOBYTES_PER_MEGABYTE: u64 = 1024;

/// Number of log lines a single pod must write to emit `kilobytes_per_log`
/// kilobytes when every line is `bytes_per_line` bytes wide.
#[must_use]
pub fn lines_per_unit(bytes_per_line: NonZeroU32, kilobytes_per_log: u32) -> u64 {
    (u64::from(kilobytes_per_log) * BYTES_PER_KILOBYTE).div_ceil(u64::from(bytes_per_line.get()))
}

/// Number of pods needed to reach `total_megabytes` when each pod emits
/// `kilobytes_per_unit` kilobytes.
#[must_use]
pub fn target_units(total_megabytes: u32, kilobytes_per_unit: NonZeroU32) -> u64 {
    (u64::from(total_megabytes) * KILOBYTES_PER_MEGABYTE)
        .div_ceil(u64::from(kilobytes_per_unit.get()))
}

/// The log output of a single pod. Invariant for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payload {
    /// Lines written by each pod
    pub lines_per_unit: u64,
    /// Width of each line in bytes, excluding the newline
    pub bytes_per_line: NonZeroU32,
}

/// What the run is aiming for, derived once before the loop starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    /// Total pods the run intends to have created
    pub units: u64,
    /// Shape of each pod's output
    pub payload: Payload,
}

impl Target {
    /// Resolve the run target from the configured sizes.
    #[must_use]
    pub fn resolve(
        bytes_per_log_line: NonZeroU32,
        kilobytes_per_pod_log: NonZeroU32,
        megabytes_total_log_size: u32,
    ) -> Self {
        Self {
            units: target_units(megabytes_total_log_size, kilobytes_per_pod_log),
            payload: Payload {
                lines_per_unit: lines_per_unit(bytes_per_log_line, kilobytes_per_pod_log.get()),
                bytes_per_line: bytes_per_log_line,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn nz(v: u32) -> NonZeroU32 {
        NonZeroU32::new(v).expect("test value must be non-zero")
    }

    #[test]
    fn zero_kilobytes_is_zero_lines() {
        assert_eq!(lines_per_unit(nz(10), 0), 0);
        assert_eq!(lines_per_unit(nz(1), 0), 0);
    }

    #[test]
    fn exact_division_does_not_round() {
        assert_eq!(lines_per_unit(nz(256), 1), 4);
        assert_eq!(lines_per_unit(nz(1024), 10), 10);
    }

    #[test]
    fn lines_round_up() {
        // 10240 / 3 = 3413.33..
        assert_eq!(lines_per_unit(nz(3), 10), 3414);
    }

    #[test]
    fn target_rounds_up() {
        assert_eq!(target_units(1, nz(300)), 4);
        assert_eq!(target_units(1, nz(10)), 103);
        assert_eq!(target_units(0, nz(10)), 0);
        assert_eq!(target_units(2, nz(1024)), 2);
    }

    #[test]
    fn resolve_small_run() {
        let target = Target::resolve(nz(10), nz(10), 1);
        assert_eq!(target.units, 103);
        assert_eq!(target.payload.lines_per_unit, 1024);
        assert_eq!(target.payload.bytes_per_line, nz(10));
    }

    proptest! {
        #[test]
        fn lines_is_ceiling(bytes in 1u32..=u32::MAX, kb in 0u32..=u32::MAX) {
            let lines = lines_per_unit(nz(bytes), kb);
            let want = u64::from(kb) * 1024;
            let bytes = u64::from(bytes);

            prop_assert!(lines * bytes >= want);
            if lines > 0 {
                prop_assert!((lines - 1) * bytes < want);
            }
        }

        #[test]
        fn target_is_ceiling(mb in 0u32..=u32::MAX, kb in 1u32..=u32::MAX) {
            let units = target_units(mb, nz(kb));
            let want = u64::from(mb) * 1024;
            let kb = u64::from(kb);

            prop_assert!(units * kb >= want);
            if units > 0 {
                prop_assert!((units - 1) * kb < want);
            }
        }
    }
}
