//! User-facing durations
use crate::{error::CreateAlarmError, UTicks};

/// An alarm interval expressed in exactly one unit.
///
/// Converted to ticks by [`AlarmDuration::to_ticks`] using the port's
/// [`PortTimer::FREQUENCY`].
///
/// [`PortTimer::FREQUENCY`]: crate::PortTimer::FREQUENCY
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlarmDuration {
    /// Seconds. Rounded to the nearest tick.
    Secs(f64),
    /// Milliseconds. Truncated to whole ticks per millisecond.
    Millis(u32),
    /// Microseconds. Truncated to whole ticks per microsecond.
    Micros(u32),
}

impl AlarmDuration {
    /// Construct an `AlarmDuration` from optional per-unit values. Exactly one
    /// of them must be given, and it must be positive.
    ///
    /// # Examples
    ///
    /// ```
    /// use hwalarm_kernel::{AlarmDuration, CreateAlarmError};
    ///
    /// assert_eq!(
    ///     AlarmDuration::from_parts(None, Some(250), None),
    ///     Ok(AlarmDuration::Millis(250)),
    /// );
    /// assert_eq!(
    ///     AlarmDuration::from_parts(Some(1.0), Some(250), None),
    ///     Err(CreateAlarmError::InvalidDuration),
    /// );
    /// ```
    pub fn from_parts(
        secs: Option<f64>,
        millis: Option<u32>,
        micros: Option<u32>,
    ) -> Result<Self, CreateAlarmError> {
        let duration = match (secs, millis, micros) {
            (Some(x), None, None) => Self::Secs(x),
            (None, Some(x), None) => Self::Millis(x),
            (None, None, Some(x)) => Self::Micros(x),
            _ => return Err(CreateAlarmError::InvalidDuration),
        };

        if duration.is_positive() {
            Ok(duration)
        } else {
            Err(CreateAlarmError::InvalidDuration)
        }
    }

    fn is_positive(self) -> bool {
        match self {
            // Rejects NaN too
            Self::Secs(x) => x > 0.0 && x.is_finite(),
            Self::Millis(x) | Self::Micros(x) => x > 0,
        }
    }

    /// Convert `self` to a tick count at the given counter frequency (in
    /// hertz).
    ///
    /// Fails with `InvalidDuration` if the duration isn't positive, if the
    /// result rounds to zero ticks, or if it doesn't fit in [`UTicks`].
    pub fn to_ticks(self, frequency: u64) -> Result<UTicks, CreateAlarmError> {
        if !self.is_positive() {
            return Err(CreateAlarmError::InvalidDuration);
        }

        let ticks = match self {
            Self::Secs(x) => {
                let ticks = x * frequency as f64 + 0.5;
                // `UTicks::MAX as f64` rounds up to 2^64
                if ticks >= UTicks::MAX as f64 {
                    return Err(CreateAlarmError::InvalidDuration);
                }
                ticks as UTicks
            }
            Self::Millis(x) => (x as UTicks)
                .checked_mul(frequency / 1_000)
                .ok_or(CreateAlarmError::InvalidDuration)?,
            Self::Micros(x) => (x as UTicks)
                .checked_mul(frequency / 1_000_000)
                .ok_or(CreateAlarmError::InvalidDuration)?,
        };

        if ticks == 0 {
            Err(CreateAlarmError::InvalidDuration)
        } else {
            Ok(ticks)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FREQ: u64 = 40_000_000;

    #[test]
    fn exactly_one_unit() {
        assert_eq!(
            AlarmDuration::from_parts(Some(0.5), None, None),
            Ok(AlarmDuration::Secs(0.5))
        );
        assert_eq!(
            AlarmDuration::from_parts(None, None, Some(7)),
            Ok(AlarmDuration::Micros(7))
        );
        assert_eq!(
            AlarmDuration::from_parts(None, None, None),
            Err(CreateAlarmError::InvalidDuration)
        );
        assert_eq!(
            AlarmDuration::from_parts(Some(0.5), None, Some(7)),
            Err(CreateAlarmError::InvalidDuration)
        );
        assert_eq!(
            AlarmDuration::from_parts(None, Some(1), Some(7)),
            Err(CreateAlarmError::InvalidDuration)
        );
    }

    #[test]
    fn non_positive() {
        for secs in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert_eq!(
                AlarmDuration::from_parts(Some(secs), None, None),
                Err(CreateAlarmError::InvalidDuration),
                "{secs}"
            );
        }
        assert_eq!(
            AlarmDuration::from_parts(None, Some(0), None),
            Err(CreateAlarmError::InvalidDuration)
        );
        assert_eq!(
            AlarmDuration::Micros(0).to_ticks(FREQ),
            Err(CreateAlarmError::InvalidDuration)
        );
    }

    #[test]
    fn conversion() {
        assert_eq!(AlarmDuration::Secs(1.0).to_ticks(FREQ), Ok(40_000_000));
        assert_eq!(AlarmDuration::Secs(0.25).to_ticks(FREQ), Ok(10_000_000));
        assert_eq!(AlarmDuration::Millis(3).to_ticks(FREQ), Ok(120_000));
        assert_eq!(AlarmDuration::Micros(5).to_ticks(FREQ), Ok(200));
    }

    #[test]
    fn secs_rounds_to_nearest() {
        // 1.2 ticks and 1.6 ticks
        assert_eq!(AlarmDuration::Secs(0.03).to_ticks(40), Ok(1));
        assert_eq!(AlarmDuration::Secs(0.04).to_ticks(40), Ok(2));
    }

    #[test]
    fn rounds_to_zero() {
        // A 1 kHz counter can't express microseconds
        assert_eq!(
            AlarmDuration::Micros(999).to_ticks(1_000),
            Err(CreateAlarmError::InvalidDuration)
        );
        assert_eq!(
            AlarmDuration::Secs(1e-9).to_ticks(FREQ),
            Err(CreateAlarmError::InvalidDuration)
        );
    }

    #[test]
    fn overflow() {
        assert_eq!(
            AlarmDuration::Secs(1e30).to_ticks(FREQ),
            Err(CreateAlarmError::InvalidDuration)
        );
    }
}
