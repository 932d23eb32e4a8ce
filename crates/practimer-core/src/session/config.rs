use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Work,
    Break,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Work => "work",
            Mode::Break => "break",
        }
    }
}

/// How the machine turns ticks into remaining time.
///
/// `Anchor` recomputes remaining time from the segment deadline on every
/// tick, so a late callback never loses time. `Decrement` counts each tick
/// as one second and re-syncs against the anchor when ticks were delayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickStrategy {
    Anchor,
    Decrement,
}

impl Default for TickStrategy {
    fn default() -> Self {
        TickStrategy::Anchor
    }
}

/// Durations and iteration count for a session, plus the transition policy.
///
/// Validated at the configuration boundary; the state machine only ever
/// sees values inside the documented bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Work segment length in minutes, 5..=60.
    pub work_minutes: u32,
    /// Break segment length in minutes, 1..=15.
    pub break_minutes: u32,
    /// Work/break pairs per cycle, 1..=8.
    pub iterations: u32,
    /// Chain straight into the next segment on completion instead of
    /// waiting for a manual start.
    #[serde(default)]
    pub auto_advance: bool,
    #[serde(default)]
    pub tick_strategy: TickStrategy,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            work_minutes: 25,
            break_minutes: 5,
            iterations: 4,
            auto_advance: false,
            tick_strategy: TickStrategy::Anchor,
        }
    }
}

impl TimerConfig {
    /// Check all values against their documented bounds.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(5..=60).contains(&self.work_minutes) {
            return Err(invalid("timer.work_minutes", self.work_minutes, "5..=60"));
        }
        if !(1..=15).contains(&self.break_minutes) {
            return Err(invalid("timer.break_minutes", self.break_minutes, "1..=15"));
        }
        if !(1..=8).contains(&self.iterations) {
            return Err(invalid("timer.iterations", self.iterations, "1..=8"));
        }
        Ok(())
    }

    /// Segment duration in seconds for the given mode.
    pub fn duration_secs(&self, mode: Mode) -> u64 {
        let minutes = match mode {
            Mode::Work => self.work_minutes,
            Mode::Break => self.break_minutes,
        };
        u64::from(minutes).saturating_mul(60)
    }
}

fn invalid(key: &str, value: u32, range: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{value} is outside {range}"),
    }
}
