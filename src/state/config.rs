//! Session timing and recovery configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default lobby disconnect grace period (300 seconds).
pub const DEFAULT_LOBBY_GRACE_PERIOD: Duration = Duration::from_secs(300);

/// Default in-session disconnect grace period (60 seconds).
pub const DEFAULT_PRESENCE_GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Default time an error is displayed before the session moves on (5 seconds).
pub const DEFAULT_ERROR_DISPLAY_DELAY: Duration = Duration::from_secs(5);

/// Per-session configuration.
///
/// Missing fields fall back to the defaults above, so a host can supply a
/// partial JSON document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Seconds a player removed from the lobby has to re-mark ready
    pub lobby_grace_secs: u64,

    /// Seconds a disconnected player has to reconnect
    pub presence_grace_secs: u64,

    /// Seconds an error stage is shown before resolving
    pub error_display_secs: u64,

    /// Whether a stage that fails to start is skipped (true) or ends the session
    pub recover_errors: bool,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            lobby_grace_secs: DEFAULT_LOBBY_GRACE_PERIOD.as_secs(),
            presence_grace_secs: DEFAULT_PRESENCE_GRACE_PERIOD.as_secs(),
            error_display_secs: DEFAULT_ERROR_DISPLAY_DELAY.as_secs(),
            recover_errors: false,
        }
    }
}

impl GameConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn lobby_grace(&self) -> Duration {
        Duration::from_secs(self.lobby_grace_secs)
    }

    pub fn presence_grace(&self) -> Duration {
        Duration::from_secs(self.presence_grace_secs)
    }

    pub fn error_display(&self) -> Duration {
        Duration::from_secs(self.error_display_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = GameConfig::default();
        assert_eq!(config.lobby_grace(), DEFAULT_LOBBY_GRACE_PERIOD);
        assert_eq!(config.presence_grace(), DEFAULT_PRESENCE_GRACE_PERIOD);
        assert_eq!(config.error_display(), DEFAULT_ERROR_DISPLAY_DELAY);
        assert!(!config.recover_errors);
    }

    #[test]
    fn test_partial_json() {
        let config = GameConfig::from_json(r#"{"recover_errors": true, "error_display_secs": 1}"#)
            .unwrap();
        assert_eq!(
            config,
            GameConfig {
                recover_errors: true,
                error_display_secs: 1,
                ..GameConfig::default()
            }
        );
    }

    #[test]
    fn test_invalid_json() {
        assert!(GameConfig::from_json(r#"{"lobby_grace_secs": "soon"}"#).is_err());
    }
}
