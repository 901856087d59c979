//! Per-session overrides of roster operations.
//!
//! While a stage is active it may take over any of the roster operations
//! below. The table only records which stage owns each override; the
//! [`Game`](super::game::Game) routes the call to that stage's
//! [`Stage::on_hook`](super::stage::Stage::on_hook) and treats its reply as
//! authoritative.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::player::Player;
use super::session::SessionError;
use super::stage::StageKey;

/// Roster operations that can be overridden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    AddPlayer,
    RemovePlayer,
    GetPlayer,
    GetPlayerCount,
    GetPlayers,
}

impl HookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AddPlayer => "add_player",
            Self::RemovePlayer => "remove_player",
            Self::GetPlayer => "get_player",
            Self::GetPlayerCount => "get_player_count",
            Self::GetPlayers => "get_players",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A roster operation routed to its override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookCall {
    AddPlayer { id: String, name: String },
    RemovePlayer { id: String },
    GetPlayer { id: String },
    GetPlayerCount,
    GetPlayers,
}

impl HookCall {
    pub fn kind(&self) -> HookKind {
        match self {
            Self::AddPlayer { .. } => HookKind::AddPlayer,
            Self::RemovePlayer { .. } => HookKind::RemovePlayer,
            Self::GetPlayer { .. } => HookKind::GetPlayer,
            Self::GetPlayerCount => HookKind::GetPlayerCount,
            Self::GetPlayers => HookKind::GetPlayers,
        }
    }
}

/// Result of an override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookReply {
    Added(Result<Player, SessionError>),
    Removed(Option<Player>),
    Player(Option<Player>),
    Count(usize),
    Players(Vec<Player>),
    /// The stage declined; the built-in behavior runs
    Unhandled,
}

/// Which stage currently owns each overridden operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookTable {
    owners: HashMap<HookKind, StageKey>,
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install an override, replacing any existing one for the same kind.
    /// Returns the previous owner.
    pub fn install(&mut self, kind: HookKind, owner: StageKey) -> Option<StageKey> {
        self.owners.insert(kind, owner)
    }

    pub fn uninstall(&mut self, kind: HookKind) -> Option<StageKey> {
        self.owners.remove(&kind)
    }

    /// Remove every override installed by `owner`.
    pub fn uninstall_owned_by(&mut self, owner: StageKey) -> Vec<HookKind> {
        let mut removed: Vec<HookKind> = self
            .owners
            .iter()
            .filter(|(_, o)| **o == owner)
            .map(|(kind, _)| *kind)
            .collect();
        removed.sort();
        for kind in &removed {
            self.owners.remove(kind);
        }
        removed
    }

    pub fn owner(&self, kind: HookKind) -> Option<StageKey> {
        self.owners.get(&kind).copied()
    }

    pub fn is_installed(&self, kind: HookKind) -> bool {
        self.owners.contains_key(&kind)
    }

    pub fn clear(&mut self) {
        self.owners.clear();
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Installed kinds in a stable order.
    pub fn kinds(&self) -> Vec<HookKind> {
        let mut kinds: Vec<HookKind> = self.owners.keys().copied().collect();
        kinds.sort();
        kinds
    }
}
