//! Time unit helpers.
//!
//! Cycle start times are unix seconds while record timestamps are unix
//! milliseconds.

/// Convert unix seconds to unix milliseconds, saturating at `i64::MAX`.
pub fn secs_to_millis(secs: u64) -> i64 {
    i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secs_to_millis() {
        assert_eq!(secs_to_millis(0), 0);
        assert_eq!(secs_to_millis(1_700_000_000), 1_700_000_000_000);
        assert_eq!(secs_to_millis(u64::MAX), i64::MAX);
    }
}
