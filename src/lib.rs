//! OBG Core
//!
//! Orchestration core for turn-based multiplayer games.
//!
//! # Overview
//!
//! A session runs an ordered sequence of **stages**. Each stage collects
//! one response per player for a round and decides, after every response,
//! whether the round is complete; when it is, the session moves on.
//!
//! - **Lobby** - Readiness gating with an owner, a player minimum and a
//!   grace period for players who leave.
//!
//! - **Error recovery** - A stage that fails to start is replaced by an
//!   error stage that resumes the session at a later stage or ends it.
//!
//! - **Hooks** - The active stage can take over roster operations
//!   (`add_player`, `remove_player`, ...) without a specialized game type.
//!
//! - **Presence** - Disconnected players stay in the roster, softly
//!   present, until a grace timer expires.
//!
//! # Design Principles
//!
//! 1. **No networking** - This crate is pure state. Input, connection
//!    changes and time are fed in by the host.
//!
//! 2. **Single-threaded** - Timers are explicit and driven by
//!    [`Game::tick`]; a fired timer re-checks the condition it guards.
//!
//! 3. **Serialization-ready** - Stage outcomes and snapshots are JSON.
//!
//! # Example
//!
//! ```rust
//! use obg_core::{Game, GameDefinition, LobbyStage, OnEnd, Session, Stage};
//! use serde_json::json;
//!
//! struct Party;
//!
//! impl GameDefinition for Party {
//!     fn name(&self) -> &str { "party" }
//!     fn min_players(&self) -> usize { 2 }
//!     fn max_players(&self) -> usize { 6 }
//!     fn stages(&self) -> Vec<Box<dyn Stage>> {
//!         vec![Box::new(LobbyStage::new(OnEnd::Advance))]
//!     }
//!     fn end(&mut self, _session: &Session) {}
//! }
//!
//! let mut game = Game::new(Party);
//! game.start("game-1", "alice").unwrap();
//! game.add_player("alice", "Alice").unwrap();
//! game.add_player("bob", "Bob").unwrap();
//!
//! game.respond("bob", json!(true)).unwrap();
//! let state = game.respond("alice", json!(true)).unwrap();
//! assert!(state.complete);
//! ```

pub mod state;

// Re-export everything from state module at crate root
pub use state::*;
