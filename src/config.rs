//! # Player Configuration
//!
//! Settings for the playback scheduler, the control server and the client,
//! read from YAML. Every key is optional:
//!
//! ```yaml
//! tick-ms: 5
//! gap-ms: 500
//! queue-capacity: 64
//! active-note-capacity: 128
//! volume: 0.8
//! tempo: 1.0
//! listen: 127.0.0.1:7777
//! connect-timeout-ms: 2000
//! player-command: [abcplay, serve]
//! ```

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:7777";

/// Raw YAML form; validated into [`PlayerConfig`]
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawPlayerConfig {
    tick_ms: Option<u64>,
    gap_ms: Option<u64>,
    queue_capacity: Option<usize>,
    active_note_capacity: Option<usize>,
    volume: Option<f32>,
    tempo: Option<f64>,
    listen: Option<String>,
    connect_timeout_ms: Option<u64>,
    player_command: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerConfig {
    /// Timing loop sleep between ticks
    pub tick: Duration,
    /// Default silence between slots
    pub gap: Duration,
    pub queue_capacity: usize,
    /// Notes that may sound at once before the oldest is released
    pub active_note_capacity: usize,
    pub volume: f32,
    pub tempo_multiplier: f64,
    pub listen: String,
    pub connect_timeout: Duration,
    /// Program and arguments used to start a player when none is listening
    pub player_command: Option<Vec<String>>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        PlayerConfig {
            tick: Duration::from_millis(5),
            gap: Duration::ZERO,
            queue_capacity: 64,
            active_note_capacity: 128,
            volume: 1.0,
            tempo_multiplier: 1.0,
            listen: DEFAULT_LISTEN.to_string(),
            connect_timeout: Duration::from_millis(2000),
            player_command: None,
        }
    }
}

impl PlayerConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: RawPlayerConfig = serde_yaml::from_str(content)?;
        let defaults = Self::default();

        let tick = match raw.tick_ms {
            Some(ms) if !(1..=100).contains(&ms) => {
                return Err(ConfigError::Value(format!(
                    "tick-ms must be between 1 and 100, got {}",
                    ms
                )))
            }
            Some(ms) => Duration::from_millis(ms),
            None => defaults.tick,
        };

        let queue_capacity = positive(raw.queue_capacity, defaults.queue_capacity, "queue-capacity")?;
        let active_note_capacity = positive(
            raw.active_note_capacity,
            defaults.active_note_capacity,
            "active-note-capacity",
        )?;

        let volume = raw.volume.unwrap_or(defaults.volume);
        if !(0.0..=1.0).contains(&volume) {
            return Err(ConfigError::Value(format!(
                "volume must be between 0 and 1, got {}",
                volume
            )));
        }

        let tempo_multiplier = raw.tempo.unwrap_or(defaults.tempo_multiplier);
        if !(tempo_multiplier > 0.0 && tempo_multiplier.is_finite()) {
            return Err(ConfigError::Value(format!(
                "tempo must be positive, got {}",
                tempo_multiplier
            )));
        }

        if matches!(&raw.player_command, Some(command) if command.is_empty()) {
            return Err(ConfigError::Value("player-command is empty".to_string()));
        }

        Ok(PlayerConfig {
            tick,
            gap: raw.gap_ms.map_or(defaults.gap, Duration::from_millis),
            queue_capacity,
            active_note_capacity,
            volume,
            tempo_multiplier,
            listen: raw.listen.unwrap_or(defaults.listen),
            connect_timeout: raw
                .connect_timeout_ms
                .map_or(defaults.connect_timeout, Duration::from_millis),
            player_command: raw.player_command,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }
}

fn positive(value: Option<usize>, default: usize, key: &str) -> Result<usize, ConfigError> {
    match value {
        Some(0) => Err(ConfigError::Value(format!("{} must be at least 1", key))),
        Some(n) => Ok(n),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        assert_eq!(PlayerConfig::from_yaml_str("").unwrap(), PlayerConfig::default());
        assert_eq!(PlayerConfig::default().tick, Duration::from_millis(5));
    }

    #[test]
    fn test_kebab_case_keys() {
        let config = PlayerConfig::from_yaml_str(
            "tick-ms: 10\ngap-ms: 250\nqueue-capacity: 4\nvolume: 0.5\nplayer-command: [abcplay, serve]\n",
        )
        .unwrap();
        assert_eq!(config.tick, Duration::from_millis(10));
        assert_eq!(config.gap, Duration::from_millis(250));
        assert_eq!(config.queue_capacity, 4);
        assert_eq!(config.volume, 0.5);
        assert_eq!(
            config.player_command,
            Some(vec!["abcplay".to_string(), "serve".to_string()])
        );
        assert_eq!(config.listen, DEFAULT_LISTEN);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            PlayerConfig::from_yaml_str("volume: 1.5"),
            Err(ConfigError::Value(_))
        ));
        assert!(matches!(
            PlayerConfig::from_yaml_str("tick-ms: 0"),
            Err(ConfigError::Value(_))
        ));
        assert!(matches!(
            PlayerConfig::from_yaml_str("queue-capacity: 0"),
            Err(ConfigError::Value(_))
        ));
        assert!(matches!(
            PlayerConfig::from_yaml_str("tempo: -2"),
            Err(ConfigError::Value(_))
        ));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(matches!(
            PlayerConfig::from_yaml_str("tempo-multiplier: 2"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = PlayerConfig::load(Path::new("/nonexistent/abcplay.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
