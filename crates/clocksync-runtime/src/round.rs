//! Berkeley averaging arithmetic
//!
//! Pure functions; the coordinator supplies the samples.

use clocksync_core::Timestamp;

/// How a fractional correction becomes whole milliseconds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Rounding {
    /// Round half away from zero
    #[default]
    Nearest,
    /// Drop the fraction
    Truncate,
}

impl Rounding {
    pub fn apply(self, value: f64) -> i64 {
        match self {
            Rounding::Nearest => value.round() as i64,
            Rounding::Truncate => value.trunc() as i64,
        }
    }
}

impl std::str::FromStr for Rounding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" | "round" => Ok(Rounding::Nearest),
            "truncate" | "trunc" => Ok(Rounding::Truncate),
            other => Err(format!("unknown rounding mode {:?}", other)),
        }
    }
}

/// One node's time reading
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sample {
    /// Time the node reported
    pub reported: Timestamp,
    /// Coordinator clock when the query was sent
    pub started: Timestamp,
    /// Coordinator clock when the reply arrived
    pub finished: Timestamp,
}

impl Sample {
    pub fn rtt_ms(&self) -> i64 {
        self.finished.millis_since(self.started)
    }

    /// Reported time shifted forward by half the round trip
    pub fn adjusted(&self) -> Timestamp {
        Timestamp(self.reported.as_millis().saturating_add(self.rtt_ms() / 2))
    }

    /// Signed skew against `reference`
    pub fn skew(&self, reference: Timestamp) -> i64 {
        self.adjusted().millis_since(reference)
    }
}

/// Mean of all skews. Empty input yields 0.
pub fn average_skew(skews: &[i64]) -> f64 {
    if skews.is_empty() {
        return 0.0;
    }
    let sum: i128 = skews.iter().map(|&s| s as i128).sum();
    sum as f64 / skews.len() as f64
}

/// Correction moving a participant with `skew` onto `average`
pub fn adjustment_for(average: f64, skew: i64, rounding: Rounding) -> i64 {
    rounding.apply(average - skew as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(reported: i64, started: i64, finished: i64) -> Sample {
        Sample {
            reported: Timestamp(reported),
            started: Timestamp(started),
            finished: Timestamp(finished),
        }
    }

    #[test]
    fn test_three_participant_round() {
        let reference = Timestamp(10_000);
        let a = sample(10_050, 10_000, 10_020);
        let b = sample(9_950, 10_000, 10_000);

        assert_eq!(a.rtt_ms(), 20);
        assert_eq!(a.skew(reference), 60);
        assert_eq!(b.skew(reference), -50);

        let avg = average_skew(&[0, 60, -50]);
        assert!((avg - 10.0 / 3.0).abs() < 1e-9);
        assert_eq!(adjustment_for(avg, 0, Rounding::Nearest), 3);
        assert_eq!(adjustment_for(avg, 60, Rounding::Nearest), -57);
        assert_eq!(adjustment_for(avg, -50, Rounding::Nearest), 53);
    }

    #[test]
    fn test_odd_rtt_halves_toward_zero() {
        assert_eq!(sample(100, 0, 7).adjusted(), Timestamp(103));
    }

    #[test]
    fn test_extreme_reports_saturate() {
        let late = sample(i64::MAX, 10_000, 10_020);
        assert_eq!(late.adjusted(), Timestamp(i64::MAX));
        assert_eq!(late.skew(Timestamp(10_000)), i64::MAX - 10_000);

        let early = sample(i64::MIN, 10_020, 10_000);
        assert_eq!(early.adjusted(), Timestamp(i64::MIN));
    }

    #[test]
    fn test_truncate_and_nearest_differ_on_fractions() {
        assert_eq!(Rounding::Nearest.apply(-56.67), -57);
        assert_eq!(Rounding::Truncate.apply(-56.67), -56);
        assert_eq!(Rounding::Nearest.apply(2.5), 3);
        assert_eq!(Rounding::Truncate.apply(2.5), 2);
    }

    #[test]
    fn test_self_only_round_is_zero() {
        let avg = average_skew(&[0]);
        assert_eq!(adjustment_for(avg, 0, Rounding::Nearest), 0);
        assert_eq!(average_skew(&[]), 0.0);
    }

    #[test]
    fn test_parse_rounding() {
        assert_eq!("truncate".parse::<Rounding>().unwrap(), Rounding::Truncate);
        assert_eq!("NEAREST".parse::<Rounding>().unwrap(), Rounding::Nearest);
        assert!("ceil".parse::<Rounding>().is_err());
    }

    proptest! {
        #[test]
        fn prop_corrections_converge(skews in proptest::collection::vec(-1_000_000i64..1_000_000, 1..32)) {
            let avg = average_skew(&skews);
            for &skew in &skews {
                let corrected = skew + adjustment_for(avg, skew, Rounding::Nearest);
                prop_assert!((corrected as f64 - avg).abs() <= 0.5 + 1e-6);
            }
        }

        #[test]
        fn prop_corrections_sum_near_zero(skews in proptest::collection::vec(-1_000_000i64..1_000_000, 1..32)) {
            let avg = average_skew(&skews);
            let total: i64 = skews.iter().map(|&s| adjustment_for(avg, s, Rounding::Nearest)).sum();
            prop_assert!((total.abs() as usize) <= skews.len() / 2 + 1);
        }
    }
}
