//! The session container.
//!
//! [`Game`] owns the ordered stages of a concrete game, the error stages
//! created when one of them fails to start, and the [`Session`] they all
//! act on. It is the only entry point for the outside world: the transport
//! routes player input through [`Game::respond`] and
//! [`Game::withdraw_response`], reports connection changes through
//! [`Game::handle_connect`] / [`Game::handle_disconnect`], and drives timers
//! with [`Game::tick`].
//!
//! # Flow
//!
//! ```text
//! start ──▶ goto_stage_safe(0) ──▶ stage.on_start ──┬──▶ Ok: stage active
//!                                                   └──▶ Err/panic: ErrorStage
//!
//! respond ──▶ active stage ──▶ GameState[key] = state ──▶ apply OnEnd
//!                                                  ├─ Advance / Goto(i): goto_stage_safe
//!                                                  └─ EndSession: end()
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::config::GameConfig;
use super::error::{ErrorStage, Recovery, StageError};
use super::hooks::{HookCall, HookReply};
use super::player::Player;
use super::session::{Session, SessionError, SessionStatus};
use super::stage::{GameState, OnEnd, Stage, StageKey, StageState};
use super::timer::{TimerId, TimerTask};

/// A concrete game: its limits, its stages and its teardown.
pub trait GameDefinition {
    fn name(&self) -> &str;

    fn min_players(&self) -> usize;

    fn max_players(&self) -> usize;

    /// Build the ordered stage list for a new session.
    fn stages(&self) -> Vec<Box<dyn Stage>>;

    /// Session teardown (scoring, persistence handoff, notifying
    /// collaborators). Called exactly once, when the session ends.
    fn end(&mut self, session: &Session);
}

pub struct Game<D: GameDefinition> {
    definition: D,
    stages: Vec<Box<dyn Stage>>,
    errors: Vec<ErrorStage>,
    session: Session,
}

impl<D: GameDefinition> Game<D> {
    pub fn new(definition: D) -> Self {
        Self::with_config(definition, GameConfig::default(), Instant::now())
    }

    /// Create a game with explicit configuration and clock origin.
    pub fn with_config(definition: D, config: GameConfig, now: Instant) -> Self {
        let session = Session::new(
            definition.name(),
            definition.min_players(),
            definition.max_players(),
            config,
            now,
        );
        let stages = definition.stages();
        Self {
            definition,
            stages,
            errors: Vec::new(),
            session,
        }
    }

    pub fn definition(&self) -> &D {
        &self.definition
    }

    pub fn definition_mut(&mut self) -> &mut D {
        &mut self.definition
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn game_id(&self) -> &str {
        self.session.game_id()
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    pub fn gamestate(&self) -> &GameState {
        self.session.gamestate()
    }

    pub fn current_stage(&self) -> Option<StageKey> {
        self.session.current_stage()
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn stage(&self, index: usize) -> Option<&dyn Stage> {
        self.stages.get(index).map(|s| &**s)
    }

    /// The stage at `index`, if it is an `S`.
    pub fn stage_as<S: Stage + 'static>(&self, index: usize) -> Option<&S> {
        self.stage(index)?.as_any().downcast_ref::<S>()
    }

    /// Error stages created so far, oldest first.
    pub fn error_stages(&self) -> &[ErrorStage] {
        &self.errors
    }

    /// Prompt token of the active stage.
    pub fn prompt(&self) -> Option<&str> {
        match self.session.current_stage()? {
            StageKey::Sequence(index) => self.stages.get(index).map(|s| s.prompt()),
            StageKey::Error(index) => self.errors.get(index).map(|s| s.prompt()),
        }
    }

    pub fn now(&self) -> Instant {
        self.session.now()
    }

    // Lifecycle

    /// Start the session and activate stage 0.
    pub fn start(&mut self, game_id: &str, owner: &str) -> Result<(), SessionError> {
        match self.session.status() {
            SessionStatus::Waiting => {}
            SessionStatus::Running => return Err(SessionError::AlreadyStarted),
            SessionStatus::Ended => return Err(SessionError::Ended),
        }

        self.session.begin(game_id, owner);
        info!(game_id, owner, game = %self.session.name(), "Session started");
        self.goto_stage(0);
        Ok(())
    }

    /// Activate a stage, recovering according to the session configuration.
    pub fn goto_stage(&mut self, index: usize) {
        let recover = self.session.config().recover_errors;
        self.goto_stage_safe(index, recover);
    }

    /// Activate `stages[index]`. If it fails to start, an error stage takes
    /// its place and, once displayed, resumes at `index + 1` when
    /// `recover_errors` is set or ends the session otherwise.
    pub fn goto_stage_safe(&mut self, index: usize, recover_errors: bool) {
        if self.session.is_ended() {
            warn!(
                game_id = %self.session.game_id(),
                index,
                "Ignoring stage change on ended session"
            );
            return;
        }
        self.enter(index, recover_errors);
        self.apply_pending();
    }

    /// End the session. Terminal; later calls are no-ops.
    pub fn end(&mut self) {
        if self.session.is_ended() {
            return;
        }
        self.session.close();
        info!(game_id = %self.session.game_id(), "Session ended");
        self.definition.end(&self.session);
    }

    // Player input

    /// Route a player's response to the active stage and record the
    /// resulting state.
    pub fn respond(
        &mut self,
        player_id: &str,
        response: serde_json::Value,
    ) -> Result<StageState, SessionError> {
        let (key, player) = self.resolve_input(player_id)?;
        let Some(stage) = stage_slot(&mut self.stages, &mut self.errors, key) else {
            return Err(SessionError::NotStarted);
        };

        self.session.act_as(key);
        let state = stage
            .respond(&mut self.session, &player, response)
            .inspect_err(|e| {
                warn!(
                    game_id = %self.session.game_id(),
                    player_id,
                    stage = %key,
                    error = %e,
                    "Response rejected"
                );
            })?;

        debug!(
            game_id = %self.session.game_id(),
            player_id,
            stage = %key,
            complete = state.complete,
            "Response recorded"
        );
        self.session.gamestate_mut().set(key, state.clone());
        self.apply_pending();
        Ok(state)
    }

    /// Withdraw a player's response from the active stage.
    pub fn withdraw_response(&mut self, player_id: &str) -> Result<StageState, SessionError> {
        let (key, player) = self.resolve_input(player_id)?;
        let Some(stage) = stage_slot(&mut self.stages, &mut self.errors, key) else {
            return Err(SessionError::NotStarted);
        };

        self.session.act_as(key);
        let state = stage.withdraw_response(&mut self.session, &player);

        debug!(game_id = %self.session.game_id(), player_id, stage = %key, "Response withdrawn");
        self.session.gamestate_mut().set(key, state.clone());
        self.apply_pending();
        Ok(state)
    }

    /// Resolve the active stage and the sending player. The player lookup
    /// goes through hooks, so the active stage is read after it.
    fn resolve_input(&mut self, player_id: &str) -> Result<(StageKey, Player), SessionError> {
        let ready = match self.session.status() {
            SessionStatus::Waiting => Err(SessionError::NotStarted),
            SessionStatus::Ended => Err(SessionError::Ended),
            SessionStatus::Running => Ok(()),
        };
        ready.inspect_err(|e| {
            warn!(
                game_id = %self.session.game_id(),
                player_id,
                error = %e,
                "Dropping player input"
            );
        })?;

        let Some(player) = self.get_player(player_id) else {
            warn!(
                game_id = %self.session.game_id(),
                player_id,
                "Dropping input from unknown player"
            );
            return Err(SessionError::UnknownPlayer(player_id.to_string()));
        };

        let key = self.session.current_stage().ok_or(SessionError::Ended)?;
        Ok((key, player))
    }

    // Roster, with hook dispatch

    pub fn add_player(&mut self, id: &str, name: &str) -> Result<Player, SessionError> {
        if self.session.is_ended() {
            return Err(SessionError::Ended);
        }
        let call = HookCall::AddPlayer {
            id: id.to_string(),
            name: name.to_string(),
        };
        match self.hook(call) {
            HookReply::Added(result) => result,
            HookReply::Unhandled => {
                let player = Player::new(id, name, self.session.game_id());
                self.session.add_player_raw(player)
            }
            other => {
                self.mismatched_reply(&other);
                let player = Player::new(id, name, self.session.game_id());
                self.session.add_player_raw(player)
            }
        }
    }

    pub fn remove_player(&mut self, id: &str) -> Option<Player> {
        match self.hook(HookCall::RemovePlayer { id: id.to_string() }) {
            HookReply::Removed(player) => player,
            HookReply::Unhandled => self.session.remove_player_raw(id),
            other => {
                self.mismatched_reply(&other);
                self.session.remove_player_raw(id)
            }
        }
    }

    pub fn get_player(&mut self, id: &str) -> Option<Player> {
        match self.hook(HookCall::GetPlayer { id: id.to_string() }) {
            HookReply::Player(player) => player,
            HookReply::Unhandled => self.session.player(id).cloned(),
            other => {
                self.mismatched_reply(&other);
                self.session.player(id).cloned()
            }
        }
    }

    pub fn get_player_count(&mut self) -> usize {
        match self.hook(HookCall::GetPlayerCount) {
            HookReply::Count(count) => count,
            HookReply::Unhandled => self.session.player_count(),
            other => {
                self.mismatched_reply(&other);
                self.session.player_count()
            }
        }
    }

    pub fn get_players(&mut self) -> Vec<Player> {
        match self.hook(HookCall::GetPlayers) {
            HookReply::Players(players) => players,
            HookReply::Unhandled => self.session.players().to_vec(),
            other => {
                self.mismatched_reply(&other);
                self.session.players().to_vec()
            }
        }
    }

    /// Rename a rostered player.
    pub fn update_player(&mut self, id: &str, name: &str) -> bool {
        match self.session.player_mut(id) {
            Some(player) => {
                player.name = name.to_string();
                true
            }
            None => false,
        }
    }

    /// Route a roster call to the stage that overrides it, if any.
    fn hook(&mut self, call: HookCall) -> HookReply {
        let kind = call.kind();
        let Some(owner) = self.session.hooks().owner(kind) else {
            return HookReply::Unhandled;
        };
        let Some(stage) = stage_slot(&mut self.stages, &mut self.errors, owner) else {
            warn!(
                game_id = %self.session.game_id(),
                hook = %kind,
                stage = %owner,
                "Hook owner missing"
            );
            return HookReply::Unhandled;
        };

        self.session.act_as(owner);
        let reply = stage.on_hook(&mut self.session, call);
        self.apply_pending();
        reply
    }

    fn mismatched_reply(&self, reply: &HookReply) {
        warn!(game_id = %self.session.game_id(), ?reply, "Hook returned a reply of the wrong kind");
    }

    // Presence

    /// A player's connection came back.
    pub fn handle_connect(&mut self, player_id: &str) -> bool {
        !self.session.is_ended() && self.session.mark_connected(player_id)
    }

    /// A player's connection dropped. The player stays in the roster, softly
    /// present, until the presence grace period runs out.
    pub fn handle_disconnect(&mut self, player_id: &str) -> bool {
        !self.session.is_ended() && self.session.mark_disconnected(player_id)
    }

    // Timers

    /// Fire every timer due at `now`. Returns how many fired.
    pub fn tick(&mut self, now: Instant) -> usize {
        self.session.advance_clock(now);

        let mut fired = 0;
        while let Some((id, task)) = self.session.pop_due_timer() {
            fired += 1;
            self.fire(id, task);
        }
        fired
    }

    /// Advance the clock by `elapsed` and fire what is due.
    pub fn advance(&mut self, elapsed: Duration) -> usize {
        let now = self.session.now() + elapsed;
        self.tick(now)
    }

    fn fire(&mut self, id: TimerId, task: TimerTask) {
        match task {
            TimerTask::Presence { player_id } => self.expire_presence(id, &player_id),
            TimerTask::Stage { owner, timer } => {
                if self.session.current_stage() != Some(owner) {
                    debug!(
                        game_id = %self.session.game_id(),
                        stage = %owner,
                        ?timer,
                        "Dropping timer for inactive stage"
                    );
                    return;
                }
                let Some(stage) = stage_slot(&mut self.stages, &mut self.errors, owner) else {
                    return;
                };
                self.session.act_as(owner);
                stage.on_timer(&mut self.session, timer);
                self.apply_pending();
            }
        }
    }

    fn expire_presence(&mut self, id: TimerId, player_id: &str) {
        if !self.session.take_fired_presence_timer(player_id, id) {
            return;
        }
        let still_away = self
            .session
            .player(player_id)
            .is_some_and(|p| p.softly_present);
        if !still_away {
            debug!(
                game_id = %self.session.game_id(),
                player_id,
                "Presence grace expired after reconnect"
            );
            return;
        }

        info!(
            game_id = %self.session.game_id(),
            player_id,
            "Presence grace expired, removing player"
        );
        self.remove_player(player_id);
    }

    // Transitions

    fn enter(&mut self, index: usize, recover_errors: bool) {
        let key = StageKey::Sequence(index);
        let result = match self.stages.get_mut(index) {
            None => Err(StageError::NoSuchStage(index)),
            Some(stage) => {
                self.session.set_current(key);
                info!(
                    game_id = %self.session.game_id(),
                    stage = %key,
                    prompt = stage.prompt(),
                    "Stage started"
                );
                let session = &mut self.session;
                panic::catch_unwind(AssertUnwindSafe(|| stage.on_start(session)))
                    .unwrap_or_else(|payload| Err(StageError::from_panic(payload)))
            }
        };

        if let Err(e) = result {
            self.fail_stage(index, e, recover_errors);
        }
    }

    fn fail_stage(&mut self, index: usize, e: StageError, recover_errors: bool) {
        let recovery = Recovery::after(index, recover_errors);
        error!(
            game_id = %self.session.game_id(),
            stage = index,
            error = %e,
            ?recovery,
            "Stage failed to start"
        );
        self.session.discard_stage(StageKey::Sequence(index));

        let key = StageKey::Error(self.errors.len());
        self.errors.push(ErrorStage::new(recovery, e));
        self.session.set_current(key);

        let Some(stage) = self.errors.last_mut() else {
            return;
        };
        if let Err(e) = stage.on_start(&mut self.session) {
            error!(game_id = %self.session.game_id(), error = %e, "Error stage failed to start");
            self.end();
        }
    }

    fn apply_pending(&mut self) {
        while let Some((source, on_end)) = self.session.take_pending() {
            if self.session.is_ended() {
                return;
            }
            info!(game_id = %self.session.game_id(), stage = %source, ?on_end, "Stage ended");

            let recover = self.session.config().recover_errors;
            match (on_end, source) {
                (OnEnd::EndSession, _) => self.end(),
                (OnEnd::Advance, StageKey::Sequence(index)) => self.activate(index + 1, recover),
                (OnEnd::Goto(index), _) => self.activate(index, recover),
                (OnEnd::Advance, StageKey::Error(_)) => {
                    warn!(
                        game_id = %self.session.game_id(),
                        "Error stage cannot advance, ending session"
                    );
                    self.end();
                }
            }
        }
    }

    /// Activate a stage reached by a transition. Running past the last
    /// stage ends the session.
    fn activate(&mut self, index: usize, recover_errors: bool) {
        if index >= self.stages.len() {
            info!(game_id = %self.session.game_id(), index, "No stage left to activate");
            self.end();
            return;
        }
        self.enter(index, recover_errors);
    }
}

fn stage_slot<'a>(
    stages: &'a mut [Box<dyn Stage>],
    errors: &'a mut [ErrorStage],
    key: StageKey,
) -> Option<&'a mut (dyn Stage + 'static)> {
    match key {
        StageKey::Sequence(index) => stages.get_mut(index).map(|s| &mut **s),
        StageKey::Error(index) => errors
            .get_mut(index)
            .map(|s| s as &mut (dyn Stage + 'static)),
    }
}
