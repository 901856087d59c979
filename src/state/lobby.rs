//! Lobby readiness gating.
//!
//! The lobby is usually stage 0. While it is active it takes over
//! `add_player` and `remove_player`: joining players enter the roster softly
//! present and not ready, and leaving players get a grace period to mark
//! themselves ready again before they are dropped. The owner leaving ends
//! the session outright.
//!
//! The round completes once the owner is ready and at least `min_players`
//! players are ready. At that point the lobby removes its hooks, confirms
//! every remaining member and hands control to its continuation.

use std::collections::HashMap;

use tracing::{debug, info};

use super::error::StageError;
use super::hooks::{HookCall, HookKind, HookReply};
use super::player::Player;
use super::session::Session;
use super::stage::{OnEnd, Responses, Stage, StageState};
use super::timer::{StageTimer, TimerId};

/// Prompt resource token for the lobby.
pub const LOBBY_PROMPT: &str = "__obg__.lobby.prompt";

/// Roster operations the lobby overrides while active.
const LOBBY_HOOKS: [HookKind; 2] = [HookKind::AddPlayer, HookKind::RemovePlayer];

#[derive(Debug, Clone, Default)]
pub struct LobbyStage {
    on_end: OnEnd,
    /// Player ID -> ready
    responses: Responses<bool>,
    /// Player ID -> removal grace timer
    grace: HashMap<String, TimerId>,
    finished: bool,
}

impl LobbyStage {
    pub fn new(on_end: OnEnd) -> Self {
        Self {
            on_end,
            ..Self::default()
        }
    }

    pub fn is_ready(&self, player_id: &str) -> bool {
        self.responses.get(player_id).copied().unwrap_or(false)
    }

    pub fn is_member(&self, player_id: &str) -> bool {
        self.responses.contains(player_id)
    }

    /// Count ready members.
    pub fn ready_count(&self) -> usize {
        self.responses.iter().filter(|(_, ready)| **ready).count()
    }

    pub fn member_count(&self) -> usize {
        self.responses.len()
    }

    pub fn has_grace_timer(&self, player_id: &str) -> bool {
        self.grace.contains_key(player_id)
    }

    fn snapshot(&self, session: &Session) -> serde_json::Value {
        serde_json::json!({
            "owner": session.owner(),
            "ready": self.responses.to_json(),
            "ready_count": self.ready_count(),
            "min_players": session.min_players()
        })
    }

    fn cancel_grace(&mut self, session: &mut Session, player_id: &str) {
        if let Some(id) = self.grace.remove(player_id) {
            session.cancel_timer(id);
            debug!(player_id, "Lobby grace timer cancelled");
        }
    }

    fn join(&mut self, session: &mut Session, id: String, name: String) -> HookReply {
        let player = Player::soft(id, name, session.game_id());
        match session.add_player_raw(player) {
            Ok(player) => {
                self.responses.record(&player.id, false);
                info!(game_id = %session.game_id(), player_id = %player.id, "Player joined lobby");
                HookReply::Added(Ok(player))
            }
            Err(e) => HookReply::Added(Err(e)),
        }
    }

    fn leave(&mut self, session: &mut Session, id: String) -> HookReply {
        if session.is_owner(&id) {
            info!(
                game_id = %session.game_id(),
                player_id = %id,
                "Owner left lobby, ending session"
            );
            session.end_session();
            return HookReply::Removed(None);
        }

        let Some(player) = session.player_mut(&id) else {
            return HookReply::Removed(None);
        };
        player.mark_soft();
        self.responses.record(&id, false);

        self.cancel_grace(session, &id);
        let grace = session.config().lobby_grace();
        let timer = session.schedule(grace, StageTimer::ReadyGrace(id.clone()));
        self.grace.insert(id.clone(), timer);

        info!(
            game_id = %session.game_id(),
            player_id = %id,
            grace_secs = grace.as_secs(),
            "Player left lobby"
        );
        HookReply::Removed(None)
    }

    fn finalize(&mut self, session: &mut Session) {
        session.uninstall_hooks();

        // Players who left and never re-readied do not carry into the game
        let departed: Vec<String> = self
            .grace
            .keys()
            .filter(|id| !self.is_ready(id))
            .cloned()
            .collect();
        for (_, timer) in self.grace.drain() {
            session.cancel_timer(timer);
        }
        for id in &departed {
            self.responses.withdraw(id);
            if session.remove_player_raw(id).is_some() {
                info!(
                    game_id = %session.game_id(),
                    player_id = %id,
                    "Departed player dropped at lobby completion"
                );
            }
        }

        let members: Vec<String> = self.responses.player_ids().map(str::to_string).collect();
        for id in &members {
            if let Some(player) = session.player_mut(id) {
                player.confirm();
            }
        }

        self.finished = true;
        info!(
            game_id = %session.game_id(),
            ready = self.ready_count(),
            members = members.len(),
            "Lobby complete"
        );
        session.finish(self.on_end);
    }
}

impl Stage for LobbyStage {
    fn prompt(&self) -> &str {
        LOBBY_PROMPT
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn on_start(&mut self, session: &mut Session) -> Result<(), StageError> {
        info!(game_id = %session.game_id(), "Starting lobby stage");
        for (_, timer) in self.grace.drain() {
            session.cancel_timer(timer);
        }
        self.responses.clear();
        self.finished = false;

        for kind in LOBBY_HOOKS {
            session.install_hook(kind);
        }
        let state = StageState::incomplete(self.snapshot(session));
        session.record_state(state);
        Ok(())
    }

    fn record_response(
        &mut self,
        player: &Player,
        response: serde_json::Value,
    ) -> Result<(), StageError> {
        let ready = response
            .as_bool()
            .ok_or(StageError::InvalidResponse { expected: "bool" })?;
        self.responses.record(&player.id, ready);
        Ok(())
    }

    fn remove_response(&mut self, player: &Player) {
        self.responses.withdraw(&player.id);
    }

    fn on_response(&mut self, session: &mut Session, player: &Player) -> StageState {
        if self.finished {
            return StageState::complete(self.snapshot(session));
        }

        if self.is_ready(&player.id) {
            self.cancel_grace(session, &player.id);
        }

        let owner_ready = session.owner().is_some_and(|owner| self.is_ready(owner));
        if !owner_ready {
            return StageState::incomplete(self.snapshot(session));
        }

        let ready = self.ready_count();
        if ready < session.min_players() {
            debug!(
                game_id = %session.game_id(),
                ready,
                min_players = session.min_players(),
                "Waiting for more ready players"
            );
            return StageState::incomplete(self.snapshot(session));
        }

        self.finalize(session);
        StageState::complete(self.snapshot(session))
    }

    fn on_withdraw_response(&mut self, session: &mut Session, player: &Player) -> StageState {
        self.responses.record(&player.id, false);
        StageState::incomplete(self.snapshot(session))
    }

    fn on_hook(&mut self, session: &mut Session, call: HookCall) -> HookReply {
        match call {
            HookCall::AddPlayer { id, name } => self.join(session, id, name),
            HookCall::RemovePlayer { id } => self.leave(session, id),
            _ => HookReply::Unhandled,
        }
    }

    fn on_timer(&mut self, session: &mut Session, timer: StageTimer) {
        let StageTimer::ReadyGrace(id) = timer else {
            return;
        };
        self.grace.remove(&id);

        if self.finished || self.is_ready(&id) {
            debug!(player_id = %id, "Lobby grace expired after player re-readied");
            return;
        }

        self.responses.withdraw(&id);
        if session.remove_player_raw(&id).is_some() {
            info!(
                game_id = %session.game_id(),
                player_id = %id,
                "Lobby grace expired, player removed"
            );
        }
    }
}
