//! Session state shared with the active stage.
//!
//! [`Session`] is everything in a game except the stages themselves: the
//! roster, the per-stage outcome table, the hook table, the timer queue and
//! the continuation the active stage has asked for. Stages receive it by
//! `&mut` and only ever act on behalf of the stage that is currently
//! running.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::config::GameConfig;
use super::error::StageError;
use super::hooks::{HookKind, HookTable};
use super::player::Player;
use super::stage::{GameState, OnEnd, StageKey, StageState};
use super::timer::{Scheduler, StageTimer, TimerId, TimerTask};

/// Game ID used until the session is started.
pub const UNINITIALIZED_GAME_ID: &str = "<uninitialized>";

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Constructed, `start` not called yet
    #[default]
    Waiting,
    /// A stage is active
    Running,
    /// Terminal
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Ended => "ended",
        }
    }
}

/// Errors reported to callers driving a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session has not started")]
    NotStarted,
    #[error("session already started")]
    AlreadyStarted,
    #[error("session has ended")]
    Ended,
    #[error("unknown player {0}")]
    UnknownPlayer(String),
    #[error("player {0} is already in the session")]
    DuplicatePlayer(String),
    #[error("session is full ({max} players)")]
    Full { max: usize },
    #[error(transparent)]
    Stage(#[from] StageError),
}

#[derive(Debug)]
pub struct Session {
    game_id: String,
    name: String,
    owner: Option<String>,
    min_players: usize,
    max_players: usize,
    config: GameConfig,
    status: SessionStatus,
    players: Vec<Player>,
    gamestate: GameState,
    hooks: HookTable,
    scheduler: Scheduler,
    /// Player ID -> pending disconnect grace timer
    presence_timers: HashMap<String, TimerId>,
    current: Option<StageKey>,
    /// Stage the game is currently calling into
    acting: StageKey,
    pending: Option<(StageKey, OnEnd)>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    ended_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Session {
    pub fn new(
        name: impl Into<String>,
        min_players: usize,
        max_players: usize,
        config: GameConfig,
        now: Instant,
    ) -> Self {
        Self {
            game_id: UNINITIALIZED_GAME_ID.to_string(),
            name: name.into(),
            owner: None,
            min_players,
            max_players,
            config,
            status: SessionStatus::Waiting,
            players: Vec::new(),
            gamestate: GameState::new(),
            hooks: HookTable::new(),
            scheduler: Scheduler::new(now),
            presence_timers: HashMap::new(),
            current: None,
            acting: StageKey::Sequence(0),
            pending: None,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn is_owner(&self, player_id: &str) -> bool {
        self.owner.as_deref() == Some(player_id)
    }

    pub fn min_players(&self) -> usize {
        self.min_players
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_ended(&self) -> bool {
        self.status == SessionStatus::Ended
    }

    pub fn current_stage(&self) -> Option<StageKey> {
        self.current
    }

    pub fn gamestate(&self) -> &GameState {
        &self.gamestate
    }

    pub fn hooks(&self) -> &HookTable {
        &self.hooks
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn now(&self) -> Instant {
        self.scheduler.now()
    }

    pub fn started_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.ended_at
    }

    // Roster (built-in, never hooked)

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn player(&self, player_id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == player_id)
    }

    pub fn player_mut(&mut self, player_id: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == player_id)
    }

    pub fn has_player(&self, player_id: &str) -> bool {
        self.player(player_id).is_some()
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Add a player to the roster.
    pub fn add_player_raw(&mut self, player: Player) -> Result<Player, SessionError> {
        if self.has_player(&player.id) {
            return Err(SessionError::DuplicatePlayer(player.id));
        }
        if self.players.len() >= self.max_players {
            return Err(SessionError::Full {
                max: self.max_players,
            });
        }

        debug!(game_id = %self.game_id, player_id = %player.id, "Player added to roster");
        self.players.push(player.clone());
        Ok(player)
    }

    /// Remove a player from the roster, dropping any presence timer.
    pub fn remove_player_raw(&mut self, player_id: &str) -> Option<Player> {
        let index = self.players.iter().position(|p| p.id == player_id)?;
        self.cancel_presence_timer(player_id);
        let player = self.players.remove(index);
        info!(game_id = %self.game_id, player_id, "Player removed from roster");
        Some(player)
    }

    // Stage outcomes

    /// Record the acting stage's current outcome.
    pub fn record_state(&mut self, state: StageState) {
        self.gamestate.set(self.acting, state);
    }

    /// Ask the game to apply `on_end` once the acting stage returns.
    pub fn finish(&mut self, on_end: OnEnd) {
        if let Some((source, previous)) = self.pending {
            warn!(
                game_id = %self.game_id,
                stage = %source,
                ?previous,
                ignored = ?on_end,
                "Stage already finished this dispatch"
            );
            return;
        }
        debug!(game_id = %self.game_id, stage = %self.acting, ?on_end, "Stage finished");
        self.pending = Some((self.acting, on_end));
    }

    /// Ask the game to end the session once the acting stage returns.
    pub fn end_session(&mut self) {
        self.finish(OnEnd::EndSession);
    }

    pub fn has_pending_transition(&self) -> bool {
        self.pending.is_some()
    }

    // Hooks

    /// Override `kind` on behalf of the acting stage.
    pub fn install_hook(&mut self, kind: HookKind) {
        if let Some(previous) = self.hooks.install(kind, self.acting) {
            if previous != self.acting {
                warn!(
                    game_id = %self.game_id,
                    hook = %kind,
                    %previous,
                    "Replacing hook owned by another stage"
                );
            }
        }
        debug!(game_id = %self.game_id, hook = %kind, stage = %self.acting, "Hook installed");
    }

    /// Remove an override, if the acting stage owns it.
    pub fn uninstall_hook(&mut self, kind: HookKind) -> bool {
        if self.hooks.owner(kind) != Some(self.acting) {
            return false;
        }
        self.hooks.uninstall(kind);
        debug!(game_id = %self.game_id, hook = %kind, stage = %self.acting, "Hook uninstalled");
        true
    }

    /// Remove every override the acting stage owns.
    pub fn uninstall_hooks(&mut self) -> Vec<HookKind> {
        let removed = self.hooks.uninstall_owned_by(self.acting);
        if !removed.is_empty() {
            debug!(game_id = %self.game_id, stage = %self.acting, ?removed, "Hooks uninstalled");
        }
        removed
    }

    // Timers

    /// Arm a timer for the acting stage.
    pub fn schedule(&mut self, delay: Duration, timer: StageTimer) -> TimerId {
        self.scheduler.schedule(
            delay,
            TimerTask::Stage {
                owner: self.acting,
                timer,
            },
        )
    }

    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        self.scheduler.cancel(id).is_some()
    }

    // Presence

    /// Mark a rostered player as disconnected and arm its grace timer,
    /// replacing any timer already running for it.
    pub fn mark_disconnected(&mut self, player_id: &str) -> bool {
        let grace = self.config.presence_grace();
        let Some(player) = self.player_mut(player_id) else {
            return false;
        };
        player.mark_soft();

        self.cancel_presence_timer(player_id);
        let id = self.scheduler.schedule(
            grace,
            TimerTask::Presence {
                player_id: player_id.to_string(),
            },
        );
        self.presence_timers.insert(player_id.to_string(), id);
        info!(
            game_id = %self.game_id,
            player_id,
            grace_secs = grace.as_secs(),
            "Player disconnected"
        );
        true
    }

    /// Confirm a reconnected player. Only soft presence caused by a
    /// disconnect is cleared.
    pub fn mark_connected(&mut self, player_id: &str) -> bool {
        let had_timer = self.cancel_presence_timer(player_id);
        let Some(player) = self.player_mut(player_id) else {
            return false;
        };
        if had_timer {
            player.confirm();
        }
        info!(game_id = %self.game_id, player_id, "Player connected");
        true
    }

    pub fn has_presence_timer(&self, player_id: &str) -> bool {
        self.presence_timers.contains_key(player_id)
    }

    fn cancel_presence_timer(&mut self, player_id: &str) -> bool {
        match self.presence_timers.remove(player_id) {
            Some(id) => self.scheduler.cancel(id).is_some(),
            None => false,
        }
    }

    /// Forget a presence timer that has just fired. Returns false when the
    /// fired timer is not the one currently armed for the player.
    pub(crate) fn take_fired_presence_timer(&mut self, player_id: &str, id: TimerId) -> bool {
        if self.presence_timers.get(player_id) == Some(&id) {
            self.presence_timers.remove(player_id);
            true
        } else {
            false
        }
    }

    // Lifecycle, driven by the game

    pub(crate) fn begin(&mut self, game_id: &str, owner: &str) {
        self.game_id = game_id.to_string();
        self.owner = Some(owner.to_string());
        self.status = SessionStatus::Running;
        self.started_at = Some(chrono::Utc::now());
        for player in &mut self.players {
            player.game_id = game_id.to_string();
        }
    }

    pub(crate) fn gamestate_mut(&mut self) -> &mut GameState {
        &mut self.gamestate
    }

    pub(crate) fn set_current(&mut self, key: StageKey) {
        self.current = Some(key);
        self.acting = key;
    }

    pub(crate) fn act_as(&mut self, key: StageKey) {
        self.acting = key;
    }

    pub(crate) fn take_pending(&mut self) -> Option<(StageKey, OnEnd)> {
        self.pending.take()
    }

    pub(crate) fn discard_stage(&mut self, key: StageKey) {
        let hooks = self.hooks.uninstall_owned_by(key);
        let timers = self
            .scheduler
            .cancel_where(|t| matches!(t, TimerTask::Stage { owner, .. } if *owner == key));
        if self.pending.is_some_and(|(source, _)| source == key) {
            self.pending = None;
        }
        debug!(game_id = %self.game_id, stage = %key, ?hooks, timers, "Discarded stage leftovers");
    }

    pub(crate) fn advance_clock(&mut self, now: Instant) {
        self.scheduler.advance_to(now);
    }

    pub(crate) fn pop_due_timer(&mut self) -> Option<(TimerId, TimerTask)> {
        self.scheduler.pop_due()
    }

    pub(crate) fn close(&mut self) {
        self.status = SessionStatus::Ended;
        self.ended_at = Some(chrono::Utc::now());
        self.current = None;
        self.pending = None;
        self.hooks.clear();
        self.scheduler.clear();
        self.presence_timers.clear();
    }

    /// Convert to a JSON snapshot for clients.
    pub fn to_json(&self) -> serde_json::Value {
        let players: Vec<serde_json::Value> = self.players.iter().map(|p| p.to_json()).collect();

        serde_json::json!({
            "game_id": self.game_id,
            "name": self.name,
            "owner": self.owner,
            "status": self.status.as_str(),
            "current_stage": self.current.map(|k| k.to_string()),
            "min_players": self.min_players,
            "max_players": self.max_players,
            "players": players,
            "hooks": self.hooks.kinds(),
            "gamestate": self.gamestate.to_json()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn make_session(max_players: usize) -> Session {
        Session::new("test", 1, max_players, GameConfig::default(), Instant::now())
    }

    #[test]
    fn test_roster_limits() {
        let mut session = make_session(2);

        session.add_player_raw(Player::new("p1", "A", "g")).unwrap();
        assert_eq!(
            session.add_player_raw(Player::new("p1", "A", "g")),
            Err(SessionError::DuplicatePlayer("p1".to_string()))
        );
        session.add_player_raw(Player::new("p2", "B", "g")).unwrap();
        assert_eq!(
            session.add_player_raw(Player::new("p3", "C", "g")),
            Err(SessionError::Full { max: 2 })
        );

        assert_eq!(session.remove_player_raw("p1").map(|p| p.id), Some("p1".to_string()));
        assert!(session.remove_player_raw("p1").is_none());
        assert_eq!(session.player_count(), 1);
    }

    #[test]
    fn test_finish_once_per_dispatch() {
        let mut session = make_session(4);
        session.set_current(StageKey::Sequence(1));

        session.finish(OnEnd::Advance);
        session.finish(OnEnd::EndSession);

        assert_eq!(
            session.take_pending(),
            Some((StageKey::Sequence(1), OnEnd::Advance))
        );
        assert!(!session.has_pending_transition());
    }

    #[test]
    fn test_hooks_are_owned_by_acting_stage() {
        let mut session = make_session(4);
        session.set_current(StageKey::Sequence(0));
        session.install_hook(HookKind::AddPlayer);

        session.act_as(StageKey::Sequence(1));
        assert!(!session.uninstall_hook(HookKind::AddPlayer));
        assert!(session.uninstall_hooks().is_empty());

        session.act_as(StageKey::Sequence(0));
        assert_eq!(session.uninstall_hooks(), vec![HookKind::AddPlayer]);
        assert!(session.hooks().is_empty());
    }

    #[test]
    fn test_disconnect_rearms_single_timer() {
        let mut session = make_session(4);
        session.add_player_raw(Player::new("p1", "A", "g")).unwrap();

        assert!(session.mark_disconnected("p1"));
        assert!(session.mark_disconnected("p1"));
        assert_eq!(session.scheduler().pending_count(), 1);
        assert!(session.player("p1").unwrap().softly_present);

        assert!(session.mark_connected("p1"));
        assert!(!session.player("p1").unwrap().softly_present);
        assert!(!session.has_presence_timer("p1"));
        assert_eq!(session.scheduler().pending_count(), 0);

        assert!(!session.mark_disconnected("ghost"));
    }

    #[test]
    fn test_connect_keeps_lobby_soft_presence() {
        let mut session = make_session(4);
        session.add_player_raw(Player::soft("p1", "A", "g")).unwrap();

        session.mark_connected("p1");
        assert!(session.player("p1").unwrap().softly_present);
    }

    #[test]
    fn test_discard_stage_drops_leftovers() {
        let mut session = make_session(4);
        session.set_current(StageKey::Sequence(2));
        session.install_hook(HookKind::GetPlayers);
        session.schedule(Duration::from_secs(1), StageTimer::Custom("tick".to_string()));
        session.finish(OnEnd::Advance);

        session.discard_stage(StageKey::Sequence(2));
        assert!(session.hooks().is_empty());
        assert_eq!(session.scheduler().pending_count(), 0);
        assert!(!session.has_pending_transition());
    }

    #[test]
    fn test_to_json() {
        let mut session = make_session(4);
        session.add_player_raw(Player::new("p1", "A", "g")).unwrap();
        session.begin("game-1", "p1");

        let json = session.to_json();
        assert_eq!(json["game_id"], "game-1");
        assert_eq!(json["owner"], "p1");
        assert_eq!(json["status"], "running");
        assert_eq!(json["players"][0]["id"], "p1");
        assert_eq!(session.player("p1").unwrap().game_id, "game-1");
    }
}
