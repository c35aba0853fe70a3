use std::time::Duration;

use crate::channel_model::{Calibration, ChannelConfig, ChannelRole};
use crate::source::DeviceSettings;

pub const MAX_CHANNELS: usize = 8;
pub const DISPLAY_POINTS_RANGE: std::ops::RangeInclusive<usize> = 10..=2000;
pub const REFRESH_INTERVAL_MS_RANGE: std::ops::RangeInclusive<u64> = 10..=1000;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("No channels selected")]
    NoChannels,

    #[error("At most {max} channels can be selected, got {actual}")]
    TooManyChannels { max: usize, actual: usize },

    #[error("{field} lists {actual} entries for {expected} channels")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Only one inductive channel is allowed, got {0}")]
    MultipleInductive(usize),

    #[error("Cycle mode requires an inductive channel")]
    CycleModeWithoutTrigger,

    #[error("Display points must be between 10 and 2000, got {0}")]
    DisplayPoints(usize),

    #[error("Refresh interval must be between 10 and 1000 ms, got {0} ms")]
    RefreshInterval(u64),

    #[error("Sample rate and decimation must be non-zero")]
    ZeroRate,

    #[error("Trigger thresholds must satisfy 0 <= low <= high <= 1")]
    Thresholds,
}

/// Timing and sizing policies of the two worker loops.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineTuning {
    /// Samples drained per processing wake.
    pub batch_size: usize,
    pub queue_capacity: usize,
    /// Longest the producer waits on a full queue before dropping a sample.
    pub enqueue_timeout: Duration,
    pub read_backoff: Duration,
    pub max_consecutive_failures: u32,
    /// Poll interval of the acquisition loop while not reading.
    pub idle_poll: Duration,
    /// Sleep of the processing loop when the queue is empty.
    pub consumer_idle_sleep: Duration,
    pub axis_margin_factor: f64,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    /// How long the orchestrator waits for the acquisition thread to answer.
    pub command_timeout: Duration,
}

impl Default for PipelineTuning {
    fn default() -> Self {
        Self {
            batch_size: 20,
            queue_capacity: 10_000,
            enqueue_timeout: Duration::from_millis(100),
            read_backoff: Duration::from_millis(10),
            max_consecutive_failures: 100,
            idle_poll: Duration::from_millis(100),
            consumer_idle_sleep: Duration::from_millis(1),
            axis_margin_factor: 1.2,
            reconnect_attempts: 2,
            reconnect_delay: Duration::from_millis(500),
            command_timeout: Duration::from_secs(5),
        }
    }
}

/// Everything a monitoring session needs, fixed for the session's lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub channels: Vec<u8>,
    pub roles: Vec<ChannelRole>,
    pub voltage_ranges: Vec<f64>,
    pub sample_rate_hz: u32,
    pub decimation: u32,
    pub display_points: usize,
    pub refresh_interval: Duration,
    pub cycle_mode: bool,
    /// Ignored in cycle mode.
    pub monitoring_duration: Duration,
    /// Minimum gap between a cycle end and the next cycle start.
    pub debounce: Duration,
    pub calibration: Calibration,
    pub tuning: PipelineTuning,
}

impl Default for SessionConfig {
    fn default() -> Self {
        use ChannelRole::{Inductive, Pressure, Temperature};
        Self {
            channels: vec![0, 1, 2, 3, 4],
            roles: vec![Temperature, Temperature, Pressure, Pressure, Inductive],
            voltage_ranges: vec![10.0; 5],
            sample_rate_hz: 6000,
            decimation: 100,
            display_points: 1600,
            refresh_interval: Duration::from_millis(50),
            cycle_mode: true,
            monitoring_duration: Duration::from_secs(300),
            debounce: Duration::from_secs(2),
            calibration: Calibration::default(),
            tuning: PipelineTuning::default(),
        }
    }
}

impl SessionConfig {
    /// A session over `roles`, on consecutive channel indices with a 10 V span.
    pub fn with_roles(roles: Vec<ChannelRole>) -> Self {
        let n = roles.len();
        let has_trigger = roles.contains(&ChannelRole::Inductive);
        Self {
            channels: (0..n as u8).collect(),
            voltage_ranges: vec![10.0; n],
            roles,
            cycle_mode: has_trigger,
            ..Self::default()
        }
    }

    /// Parse a role string such as `"TTPPI"`.
    pub fn parse_roles(codes: &str) -> Option<Vec<ChannelRole>> {
        codes
            .chars()
            .filter(|c| !c.is_whitespace() && *c != ',')
            .map(ChannelRole::from_code)
            .collect()
    }

    pub fn channel_configs(&self) -> Vec<ChannelConfig> {
        self.channels
            .iter()
            .zip(&self.roles)
            .zip(&self.voltage_ranges)
            .map(|((&index, &role), &range)| ChannelConfig::new(index, role, range))
            .collect()
    }

    pub fn device_settings(&self) -> DeviceSettings {
        DeviceSettings {
            channels: self.channels.clone(),
            voltage_ranges: self.voltage_ranges.clone(),
            sample_rate_hz: self.sample_rate_hz,
            decimation: self.decimation,
        }
    }

    pub fn inductive_position(&self) -> Option<usize> {
        self.roles.iter().position(|r| *r == ChannelRole::Inductive)
    }

    /// Check the configuration before a session uses it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let n = self.channels.len();
        if n == 0 {
            return Err(ConfigError::NoChannels);
        }
        if n > MAX_CHANNELS {
            return Err(ConfigError::TooManyChannels {
                max: MAX_CHANNELS,
                actual: n,
            });
        }
        for (field, actual) in [
            ("roles", self.roles.len()),
            ("voltage_ranges", self.voltage_ranges.len()),
        ] {
            if actual != n {
                return Err(ConfigError::LengthMismatch {
                    field,
                    expected: n,
                    actual,
                });
            }
        }

        let inductive = self
            .roles
            .iter()
            .filter(|r| **r == ChannelRole::Inductive)
            .count();
        if inductive > 1 {
            return Err(ConfigError::MultipleInductive(inductive));
        }
        if self.cycle_mode && inductive == 0 {
            return Err(ConfigError::CycleModeWithoutTrigger);
        }

        if !DISPLAY_POINTS_RANGE.contains(&self.display_points) {
            return Err(ConfigError::DisplayPoints(self.display_points));
        }
        let refresh_ms = self.refresh_interval.as_millis() as u64;
        if !REFRESH_INTERVAL_MS_RANGE.contains(&refresh_ms) {
            return Err(ConfigError::RefreshInterval(refresh_ms));
        }
        if self.sample_rate_hz == 0 || self.decimation == 0 {
            return Err(ConfigError::ZeroRate);
        }

        let cal = &self.calibration;
        if !(0.0..=1.0).contains(&cal.trigger_low_fraction)
            || !(0.0..=1.0).contains(&cal.trigger_high_fraction)
            || cal.trigger_low_fraction > cal.trigger_high_fraction
        {
            return Err(ConfigError::Thresholds);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.inductive_position(), Some(4));
        assert_eq!(config.channel_configs().len(), 5);
        assert_eq!(config.device_settings().sample_rate_hz, 6000);
    }

    #[test]
    fn test_parse_roles() {
        use ChannelRole::{Inductive, Pressure, Temperature};
        assert_eq!(
            SessionConfig::parse_roles("T,P i"),
            Some(vec![Temperature, Pressure, Inductive])
        );
        assert_eq!(SessionConfig::parse_roles("TX"), None);
    }

    #[test]
    fn test_validation_rules() {
        let mut config = SessionConfig::with_roles(vec![ChannelRole::Temperature]);
        assert!(!config.cycle_mode);
        assert!(config.validate().is_ok());

        config.cycle_mode = true;
        assert_eq!(config.validate(), Err(ConfigError::CycleModeWithoutTrigger));

        let config = SessionConfig::with_roles(vec![ChannelRole::Inductive; 2]);
        assert_eq!(config.validate(), Err(ConfigError::MultipleInductive(2)));

        let config = SessionConfig::with_roles(vec![ChannelRole::Pressure; 9]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooManyChannels { actual: 9, .. })
        ));

        let mut config = SessionConfig::default();
        config.display_points = 5;
        assert_eq!(config.validate(), Err(ConfigError::DisplayPoints(5)));

        let mut config = SessionConfig::default();
        config.refresh_interval = Duration::from_millis(5000);
        assert_eq!(config.validate(), Err(ConfigError::RefreshInterval(5000)));

        let mut config = SessionConfig::default();
        config.voltage_ranges.pop();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::LengthMismatch {
                field: "voltage_ranges",
                ..
            })
        ));

        let mut config = SessionConfig::default();
        config.decimation = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroRate));
    }
}
