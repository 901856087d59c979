//! Stage failures and the error stage that displays them.
//!
//! When a stage fails to start, the game replaces it with an
//! [`ErrorStage`]. The error stage shows the failure for a fixed delay and
//! then either resumes the session at a later stage or ends it.

use std::any::Any;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::player::Player;
use super::session::Session;
use super::stage::{OnEnd, Responses, Stage, StageState};
use super::timer::{StageTimer, TimerId};

/// Why a stage could not start or accept a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    #[error("invalid response: expected {expected}")]
    InvalidResponse { expected: &'static str },
    #[error("no stage at index {0}")]
    NoSuchStage(usize),
    #[error("stage panicked: {0}")]
    Panicked(String),
    #[error("{0}")]
    Failed(String),
}

impl StageError {
    pub fn failed(message: impl std::fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }

    /// Coerce a panic payload into an error.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => message.to_string(),
                Err(_) => "non-string panic payload".to_string(),
            },
        };
        Self::Panicked(message)
    }
}

/// Where the session goes once an error has been displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recovery {
    /// Resume at this stage index
    Resume(usize),
    /// End the session
    Unrecoverable,
}

impl Recovery {
    /// Recovery target for a failure while starting stage `failed`. A failed
    /// stage is never replayed.
    pub fn after(failed: usize, recover_errors: bool) -> Self {
        if recover_errors {
            failed.checked_add(1).map_or(Self::Unrecoverable, Self::Resume)
        } else {
            Self::Unrecoverable
        }
    }

    fn on_end(&self) -> OnEnd {
        match self {
            Self::Resume(next) => OnEnd::Goto(*next),
            Self::Unrecoverable => OnEnd::EndSession,
        }
    }
}

/// Displays a stage failure, then resumes or ends the session.
#[derive(Debug, Clone)]
pub struct ErrorStage {
    prompt: String,
    recovery: Recovery,
    error: StageError,
    on_end: OnEnd,
    /// Player input is ignored while an error is shown
    responses: Responses<()>,
    state: StageState,
    timer: Option<TimerId>,
}

impl ErrorStage {
    pub fn new(recovery: Recovery, error: StageError) -> Self {
        let prompt = format!(
            "__obg__.error.prompt.prefix {} __obg__.error.prompt.suffix",
            error
        );
        let state = StageState::incomplete(Self::payload(recovery, &error));

        Self {
            prompt,
            recovery,
            on_end: recovery.on_end(),
            error,
            responses: Responses::new(),
            state,
            timer: None,
        }
    }

    fn payload(recovery: Recovery, error: &StageError) -> serde_json::Value {
        serde_json::json!({
            "next": recovery,
            "error": error.to_string()
        })
    }

    pub fn recovery(&self) -> Recovery {
        self.recovery
    }

    pub fn error(&self) -> &StageError {
        &self.error
    }

    pub fn state(&self) -> &StageState {
        &self.state
    }

    pub fn is_resolved(&self) -> bool {
        self.state.complete
    }

    /// Pending display timer, while the error is still shown.
    pub fn display_timer(&self) -> Option<TimerId> {
        self.timer
    }
}

impl Stage for ErrorStage {
    fn prompt(&self) -> &str {
        &self.prompt
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn on_start(&mut self, session: &mut Session) -> Result<(), StageError> {
        info!(
            game_id = %session.game_id(),
            error = %self.error,
            recovery = ?self.recovery,
            "Error stage started"
        );
        self.responses.clear();
        self.state = StageState::incomplete(Self::payload(self.recovery, &self.error));
        session.record_state(self.state.clone());

        let delay = session.config().error_display();
        self.timer = Some(session.schedule(delay, StageTimer::ErrorDisplay));
        Ok(())
    }

    fn record_response(
        &mut self,
        player: &Player,
        _response: serde_json::Value,
    ) -> Result<(), StageError> {
        debug!(player_id = %player.id, "Ignoring response during error display");
        Ok(())
    }

    fn remove_response(&mut self, player: &Player) {
        self.responses.withdraw(&player.id);
    }

    fn on_response(&mut self, _session: &mut Session, _player: &Player) -> StageState {
        self.state.clone()
    }

    fn on_withdraw_response(&mut self, _session: &mut Session, _player: &Player) -> StageState {
        self.state.clone()
    }

    fn on_timer(&mut self, session: &mut Session, timer: StageTimer) {
        if timer != StageTimer::ErrorDisplay || self.state.complete {
            return;
        }
        self.timer = None;
        self.state = StageState::complete(Self::payload(self.recovery, &self.error));
        session.record_state(self.state.clone());

        info!(game_id = %session.game_id(), recovery = ?self.recovery, "Error stage resolved");
        session.finish(self.on_end);
    }
}
