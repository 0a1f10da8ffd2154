//! Election timing configuration.
//!
//! All times are virtual: the scheduler advances a simulated clock by
//! `tick_interval` per step, so a run is deterministic regardless of how
//! fast the host executes it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Timing parameters for an election run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ElectionConfig {
    /// Virtual time advanced per scheduler step.
    #[serde(rename = "tickMs", with = "duration_ms")]
    pub tick_interval: Duration,

    /// Time a BPDU spends on a link.
    #[serde(rename = "transitDelayMs", with = "duration_ms")]
    pub transit_delay: Duration,

    /// How often a node that believes itself root re-advertises its claim.
    /// Scaled by `speed_factor`.
    #[serde(rename = "helloIntervalMs", with = "duration_ms")]
    pub hello_interval: Duration,

    /// How long a non-root node waits for a confirming BPDU before it
    /// re-broadcasts itself as root. Scaled by `speed_factor`.
    #[serde(rename = "reelectionIntervalMs", with = "duration_ms")]
    pub reelection_interval: Duration,

    /// Quiet period after which the election counts as converged.
    /// Defaults to the scaled re-election interval.
    #[serde(rename = "quiescenceWindowMs", with = "option_duration_ms")]
    pub quiescence_window: Option<Duration>,

    /// Multiplier applied to the hello and re-election intervals.
    pub speed_factor: f64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            transit_delay: Duration::from_millis(500),
            hello_interval: Duration::from_secs(10),
            reelection_interval: Duration::from_secs(100),
            quiescence_window: None,
            speed_factor: 1.0,
        }
    }
}

impl ElectionConfig {
    /// Short timings for tests and local runs.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            tick_interval: Duration::from_millis(1),
            transit_delay: Duration::from_millis(5),
            hello_interval: Duration::from_millis(50),
            reelection_interval: Duration::from_millis(500),
            quiescence_window: None,
            speed_factor: 1.0,
        }
    }

    #[must_use]
    pub fn with_tick_interval(mut self, tick: Duration) -> Self {
        self.tick_interval = tick;
        self
    }

    #[must_use]
    pub fn with_transit_delay(mut self, delay: Duration) -> Self {
        self.transit_delay = delay;
        self
    }

    #[must_use]
    pub fn with_hello_interval(mut self, interval: Duration) -> Self {
        self.hello_interval = interval;
        self
    }

    #[must_use]
    pub fn with_reelection_interval(mut self, interval: Duration) -> Self {
        self.reelection_interval = interval;
        self
    }

    #[must_use]
    pub fn with_quiescence_window(mut self, window: Duration) -> Self {
        self.quiescence_window = Some(window);
        self
    }

    #[must_use]
    pub fn with_speed_factor(mut self, factor: f64) -> Self {
        self.speed_factor = factor;
        self
    }

    /// Hello interval after applying the speed factor.
    pub fn effective_hello(&self) -> Duration {
        scale(self.hello_interval, self.speed_factor)
    }

    /// Re-election interval after applying the speed factor.
    pub fn effective_reelection(&self) -> Duration {
        scale(self.reelection_interval, self.speed_factor)
    }

    /// Quiescence window, defaulting to the effective re-election interval.
    pub fn effective_quiescence(&self) -> Duration {
        self.quiescence_window
            .unwrap_or_else(|| self.effective_reelection())
    }

    /// Reject timings that cannot drive a run.
    pub fn validate(&self) -> Result<()> {
        if !(self.speed_factor.is_finite() && self.speed_factor > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "speed factor must be a positive number, got {}",
                self.speed_factor
            )));
        }
        if self.speed_factor != 1.0
            && Duration::try_from_secs_f64(self.reelection_interval.as_secs_f64() * self.speed_factor).is_err()
        {
            return Err(Error::InvalidConfig(
                "scaled re-election interval overflows".into(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(Error::InvalidConfig("tick interval must be non-zero".into()));
        }
        if self.hello_interval.is_zero() {
            return Err(Error::InvalidConfig("hello interval must be non-zero".into()));
        }
        if self.hello_interval >= self.reelection_interval {
            return Err(Error::InvalidConfig(format!(
                "hello interval {:?} must be shorter than re-election interval {:?}",
                self.hello_interval, self.reelection_interval
            )));
        }
        Ok(())
    }
}

fn scale(interval: Duration, factor: f64) -> Duration {
    if factor == 1.0 {
        return interval;
    }
    Duration::try_from_secs_f64(interval.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod option_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
