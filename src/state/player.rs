//! Session participants.
//!
//! A player is an identity plus the transient presence state the session
//! tracks for it. Connection changes are reported to the owning
//! [`Game`](super::game::Game) through `handle_connect`/`handle_disconnect`;
//! the player itself only records the outcome.

use serde::{Deserialize, Serialize};

/// A participant in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Stable player ID supplied by the transport
    pub id: String,

    /// Display name
    pub name: String,

    /// ID of the session this player belongs to (lookup only)
    pub game_id: String,

    /// In the roster but unconfirmed (lobby join, or disconnected)
    pub softly_present: bool,

    /// When the player joined the session
    pub joined_at: chrono::DateTime<chrono::Utc>,
}

impl Player {
    /// Create a confirmed player.
    pub fn new(id: impl Into<String>, name: impl Into<String>, game_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            game_id: game_id.into(),
            softly_present: false,
            joined_at: chrono::Utc::now(),
        }
    }

    /// Create a player that still has to confirm its presence.
    pub fn soft(
        id: impl Into<String>,
        name: impl Into<String>,
        game_id: impl Into<String>,
    ) -> Self {
        Self {
            softly_present: true,
            ..Self::new(id, name, game_id)
        }
    }

    /// Mark as unconfirmed. Returns whether the flag changed.
    pub fn mark_soft(&mut self) -> bool {
        !std::mem::replace(&mut self.softly_present, true)
    }

    /// Clear the soft-presence flag. Returns whether the flag changed.
    pub fn confirm(&mut self) -> bool {
        std::mem::replace(&mut self.softly_present, false)
    }

    /// Convert to JSON for sending to clients.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "name": self.name,
            "softly_present": self.softly_present,
            "joined_at": self.joined_at.to_rfc3339()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_player_is_confirmed() {
        let player = Player::new("p1", "Alice", "game-1");
        assert!(!player.softly_present);
        assert_eq!(player.game_id, "game-1");
    }

    #[test]
    fn test_presence_flag_transitions() {
        let mut player = Player::soft("p1", "Alice", "game-1");
        assert!(player.softly_present);

        assert!(player.confirm());
        assert!(!player.confirm());

        assert!(player.mark_soft());
        assert!(!player.mark_soft());
        assert!(player.softly_present);
    }

    #[test]
    fn test_to_json() {
        let player = Player::soft("p2", "Bob", "game-1");
        let json = player.to_json();
        assert_eq!(json["id"], "p2");
        assert_eq!(json["name"], "Bob");
        assert_eq!(json["softly_present"], true);
    }
}
