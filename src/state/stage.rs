//! Stage contract and per-stage outcome records.
//!
//! A session is an ordered sequence of stages. The active stage collects
//! responses for one round and decides, after every individual response,
//! whether the round is complete. When it is, the stage hands its
//! [`OnEnd`] continuation to the session and [`Game`](super::game::Game)
//! applies it once the stage call has returned.
//!
//! ```text
//!   start ──▶ on_start ──▶ respond / withdraw_response ──▶ ... ──▶ finish(OnEnd)
//!                              │                                      │
//!                              ▼                                      ▼
//!                   GameState[key] = StageState          Advance │ Goto(i) │ EndSession
//! ```

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::StageError;
use super::hooks::{HookCall, HookReply};
use super::player::Player;
use super::session::Session;
use super::timer::StageTimer;

/// Stable address of a stage within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKey {
    /// Index into the game's ordered stage list
    Sequence(usize),
    /// Index into the session's error stage history
    Error(usize),
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequence(index) => write!(f, "stage#{}", index),
            Self::Error(index) => write!(f, "error#{}", index),
        }
    }
}

/// Externally observable result of a stage at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageState<T = serde_json::Value> {
    pub complete: bool,
    pub data: T,
}

impl<T> StageState<T> {
    pub fn incomplete(data: T) -> Self {
        Self {
            complete: false,
            data,
        }
    }

    pub fn complete(data: T) -> Self {
        Self {
            complete: true,
            data,
        }
    }
}

/// Latest outcome of every stage that has reported one, keyed by stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameState {
    states: BTreeMap<StageKey, StageState>,
}

impl GameState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stage outcome, replacing the previous one.
    pub fn set(&mut self, key: StageKey, state: StageState) -> Option<StageState> {
        self.states.insert(key, state)
    }

    pub fn get(&self, key: StageKey) -> Option<&StageState> {
        self.states.get(&key)
    }

    pub fn is_complete(&self, key: StageKey) -> bool {
        self.states.get(&key).is_some_and(|s| s.complete)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StageKey, &StageState)> {
        self.states.iter().map(|(k, s)| (*k, s))
    }

    /// Convert to JSON, keyed by the stage's display form.
    pub fn to_json(&self) -> serde_json::Value {
        let states: serde_json::Map<String, serde_json::Value> = self
            .states
            .iter()
            .map(|(key, state)| {
                (
                    key.to_string(),
                    serde_json::json!({
                        "complete": state.complete,
                        "data": state.data
                    }),
                )
            })
            .collect();
        serde_json::Value::Object(states)
    }
}

/// What happens when a stage judges its round complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnEnd {
    /// Activate the next stage in sequence (ends the session after the last)
    #[default]
    Advance,
    /// Activate the stage at this index
    Goto(usize),
    /// Terminate the session
    EndSession,
}

/// Responses collected during one round, one per player.
#[derive(Debug, Clone, PartialEq)]
pub struct Responses<T> {
    by_player: HashMap<String, T>,
}

impl<T> Default for Responses<T> {
    fn default() -> Self {
        Self {
            by_player: HashMap::new(),
        }
    }
}

impl<T> Responses<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a response, overwriting the player's previous one.
    pub fn record(&mut self, player_id: &str, response: T) -> Option<T> {
        self.by_player.insert(player_id.to_string(), response)
    }

    pub fn withdraw(&mut self, player_id: &str) -> Option<T> {
        self.by_player.remove(player_id)
    }

    pub fn get(&self, player_id: &str) -> Option<&T> {
        self.by_player.get(player_id)
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.by_player.contains_key(player_id)
    }

    pub fn len(&self) -> usize {
        self.by_player.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_player.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_player.clear();
    }

    pub fn player_ids(&self) -> impl Iterator<Item = &str> {
        self.by_player.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.by_player.iter().map(|(id, r)| (id.as_str(), r))
    }
}

impl<T: Serialize> Responses<T> {
    /// Convert to a JSON object keyed by player ID.
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .by_player
            .iter()
            .map(|(id, r)| {
                (
                    id.clone(),
                    serde_json::to_value(r).unwrap_or(serde_json::Value::Null),
                )
            })
            .collect();
        serde_json::Value::Object(map)
    }
}

/// One node of a session's state machine.
///
/// Implementors own their round's responses and decide completeness in
/// [`on_response`](Stage::on_response). Every method that receives the
/// session is only called while this stage is the active one.
pub trait Stage: fmt::Debug {
    /// Resource token for the prompt shown while this stage is active.
    fn prompt(&self) -> &str;

    /// The concrete stage, for callers that know what sits at an index.
    fn as_any(&self) -> &dyn Any;

    /// Entry action: reset the round and perform any setup players need
    /// before they can respond. An error (or panic) here sends the session
    /// to an error stage.
    fn on_start(&mut self, session: &mut Session) -> Result<(), StageError>;

    /// Store `response` for `player`, overwriting any earlier one this round.
    fn record_response(
        &mut self,
        player: &Player,
        response: serde_json::Value,
    ) -> Result<(), StageError>;

    /// Drop the player's response for this round.
    fn remove_response(&mut self, player: &Player);

    /// Completion policy, evaluated after every recorded response. A stage
    /// that finds the round complete calls [`Session::finish`] before
    /// returning a complete state.
    fn on_response(&mut self, session: &mut Session, player: &Player) -> StageState;

    /// State after a withdrawal. Never complete.
    fn on_withdraw_response(&mut self, session: &mut Session, player: &Player) -> StageState;

    /// Override for a roster operation this stage installed a hook for.
    fn on_hook(&mut self, _session: &mut Session, _call: HookCall) -> HookReply {
        HookReply::Unhandled
    }

    /// A timer this stage scheduled has fired.
    fn on_timer(&mut self, _session: &mut Session, _timer: StageTimer) {}

    fn respond(
        &mut self,
        session: &mut Session,
        player: &Player,
        response: serde_json::Value,
    ) -> Result<StageState, StageError> {
        self.record_response(player, response)?;
        Ok(self.on_response(session, player))
    }

    fn withdraw_response(&mut self, session: &mut Session, player: &Player) -> StageState {
        self.remove_response(player);
        self.on_withdraw_response(session, player)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_game_state_overwrites_by_key() {
        let mut state = GameState::new();
        let key = StageKey::Sequence(0);

        assert!(state
            .set(key, StageState::incomplete(serde_json::json!(1)))
            .is_none());
        state.set(key, StageState::complete(serde_json::json!(2)));

        assert_eq!(state.len(), 1);
        assert!(state.is_complete(key));
        assert_eq!(state.get(key).unwrap().data, serde_json::json!(2));
        assert!(!state.is_complete(StageKey::Error(0)));
    }

    #[test]
    fn test_game_state_json() {
        let mut state = GameState::new();
        state.set(
            StageKey::Sequence(1),
            StageState::incomplete(serde_json::json!({"a": true})),
        );
        state.set(StageKey::Error(0), StageState::complete(serde_json::Value::Null));

        assert_eq!(
            state.to_json(),
            serde_json::json!({
                "stage#1": {"complete": false, "data": {"a": true}},
                "error#0": {"complete": true, "data": null}
            })
        );
    }

    #[test]
    fn test_responses_one_per_player() {
        let mut responses = Responses::new();
        assert!(responses.record("p1", 1).is_none());
        assert_eq!(responses.record("p1", 2), Some(1));
        responses.record("p2", 3);

        assert_eq!(responses.len(), 2);
        assert_eq!(responses.get("p1"), Some(&2));
        assert_eq!(responses.withdraw("p1"), Some(2));
        assert!(!responses.contains("p1"));
        assert_eq!(responses.to_json(), serde_json::json!({"p2": 3}));
    }

    #[test]
    fn test_stage_key_display() {
        assert_eq!(StageKey::Sequence(3).to_string(), "stage#3");
        assert_eq!(StageKey::Error(0).to_string(), "error#0");
    }
}
