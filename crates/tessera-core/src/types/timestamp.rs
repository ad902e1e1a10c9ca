use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

const NANOS_PER_SEC: i32 = 1_000_000_000;

/// A point in consensus time, as carried in block headers.
///
/// `nanos` is always normalized into `0..1_000_000_000`, so the derived
/// ordering (seconds first, then nanos) is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp {
        seconds: 0,
        nanos: 0,
    };

    pub fn new(seconds: i64, nanos: i32) -> Self {
        let carry = nanos.div_euclid(NANOS_PER_SEC);
        Timestamp {
            seconds: seconds + i64::from(carry),
            nanos: nanos.rem_euclid(NANOS_PER_SEC),
        }
    }

    pub fn from_secs(seconds: i64) -> Self {
        Timestamp { seconds, nanos: 0 }
    }

    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp {
            seconds: elapsed.as_secs() as i64,
            nanos: elapsed.subsec_nanos() as i32,
        }
    }

    pub fn checked_add(&self, duration: Duration) -> Result<Self, CoreError> {
        let secs = i64::try_from(duration.as_secs()).map_err(|_| CoreError::TimestampOverflow)?;
        let seconds = self
            .seconds
            .checked_add(secs)
            .ok_or(CoreError::TimestampOverflow)?;
        Ok(Timestamp::new(
            seconds,
            self.nanos + duration.subsec_nanos() as i32,
        ))
    }

    /// Whole seconds elapsed since `earlier`, saturating at zero
    pub fn secs_since(&self, earlier: &Timestamp) -> u64 {
        if self <= earlier {
            return 0;
        }
        let mut secs = self.seconds - earlier.seconds;
        if self.nanos < earlier.nanos {
            secs -= 1;
        }
        secs.max(0) as u64
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        let ts = Timestamp::new(10, 1_500_000_000);
        assert_eq!(ts, Timestamp { seconds: 11, nanos: 500_000_000 });
    }

    #[test]
    fn test_ordering_is_chronological() {
        let a = Timestamp::new(5, 999_999_999);
        let b = Timestamp::new(6, 0);
        assert!(a < b);
    }

    #[test]
    fn test_add_duration_carries() {
        let ts = Timestamp::new(1, 800_000_000);
        let later = ts.checked_add(Duration::from_millis(300)).unwrap();
        assert_eq!(later, Timestamp::new(2, 100_000_000));
        assert_eq!(later.secs_since(&ts), 0);
        assert_eq!(Timestamp::from_secs(30).secs_since(&Timestamp::from_secs(0)), 30);
    }
}
