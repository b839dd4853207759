use crate::error::ConfigError;
use crate::timing::LOOKAHEAD;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub bpm: f64,
    /// Steps per beat
    pub division: u32,
    /// Steps per pattern cycle
    pub total_steps: usize,
    /// Seconds
    pub lookahead: f64,
    pub tick_interval_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            division: 4,
            total_steps: 16,
            lookahead: LOOKAHEAD,
            tick_interval_ms: 25,
            poll_interval_ms: 16,
        }
    }
}

pub fn validate_bpm(bpm: f64) -> Result<(), ConfigError> {
    if bpm.is_finite() && bpm > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidTempo(bpm))
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_bpm(self.bpm)?;
        if self.division == 0 {
            return Err(ConfigError::InvalidDivision);
        }
        if self.total_steps == 0 {
            return Err(ConfigError::EmptyPattern);
        }
        if !(self.lookahead.is_finite() && self.lookahead > 0.0) {
            return Err(ConfigError::InvalidLookahead(self.lookahead));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidInterval { name: "Tick" });
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidInterval { name: "Poll" });
        }

        if self.tick_interval().as_secs_f64() >= self.lookahead {
            tracing::warn!(
                tick_interval_ms = self.tick_interval_ms,
                lookahead = self.lookahead,
                "tick interval exceeds lookahead, steps will be recognised late"
            );
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = EngineConfig {
            bpm: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTempo(_))));

        let config = EngineConfig {
            bpm: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTempo(_))));

        let config = EngineConfig {
            total_steps: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::EmptyPattern)));

        let config = EngineConfig {
            division: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidDivision)));

        let config = EngineConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidInterval { name: "Poll" })
        ));
    }

    #[test]
    fn test_partial_ron_uses_defaults() {
        let config: EngineConfig = ron::from_str("(bpm: 90.0, total_steps: 12)").unwrap();
        assert_eq!(config.bpm, 90.0);
        assert_eq!(config.total_steps, 12);
        assert_eq!(config.division, 4);
        assert_eq!(config.tick_interval(), Duration::from_millis(25));
    }
}
