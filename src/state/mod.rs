//! Session state machine.
//!
//! - `player` - Session participants and their presence flag
//! - `stage` - The stage contract, per-stage outcomes and response maps
//! - `hooks` - Stage-installed overrides of roster operations
//! - `timer` - Deterministic, cancelable timers
//! - `lobby` - Readiness gating stage
//! - `error` - Stage failures and the error stage
//! - `session` - State shared with the active stage
//! - `game` - The session container and concrete-game trait
//! - `config` - Timing and recovery settings
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                             Game<D>                                  │
//! │                                                                      │
//! │  D: GameDefinition      stages: [Lobby, ..., ...]    errors: [...]   │
//! │                                   │                                  │
//! │                                   │ &mut Session                     │
//! │                                   ▼                                  │
//! │  ┌────────────────────────────────────────────────────────────────┐  │
//! │  │                           Session                              │  │
//! │  │                                                                │  │
//! │  │  players    gamestate     hooks          scheduler    pending  │  │
//! │  │  [Player]   key → state   kind → owner   timers       OnEnd    │  │
//! │  └────────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything runs on the caller's thread. Player input, connection
//! changes and clock ticks are processed one at a time, and a stage's
//! completion is applied before the call that caused it returns.

pub mod config;
pub mod error;
pub mod game;
pub mod hooks;
pub mod lobby;
pub mod player;
pub mod session;
pub mod stage;
pub mod timer;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use config::{
    GameConfig, DEFAULT_ERROR_DISPLAY_DELAY, DEFAULT_LOBBY_GRACE_PERIOD,
    DEFAULT_PRESENCE_GRACE_PERIOD,
};
pub use error::{ErrorStage, Recovery, StageError};
pub use game::{Game, GameDefinition};
pub use hooks::{HookCall, HookKind, HookReply, HookTable};
pub use lobby::{LobbyStage, LOBBY_PROMPT};
pub use player::Player;
pub use session::{Session, SessionError, SessionStatus, UNINITIALIZED_GAME_ID};
pub use stage::{GameState, OnEnd, Responses, Stage, StageKey, StageState};
pub use timer::{Scheduler, StageTimer, TimerId, TimerTask, MAX_TIMER_DELAY};
