//! Test fixtures: a small concrete game built from the core stages.

use serde_json::Value;

use super::error::StageError;
use super::game::GameDefinition;
use super::lobby::LobbyStage;
use super::player::Player;
use super::session::Session;
use super::stage::{OnEnd, Responses, Stage, StageState};

/// Completes once every confirmed rostered player has responded.
#[derive(Debug, Default)]
pub struct CollectStage {
    pub on_end: OnEnd,
    pub responses: Responses<Value>,
    pub starts: usize,
}

impl CollectStage {
    fn state(&self, complete: bool) -> StageState {
        StageState {
            complete,
            data: self.responses.to_json(),
        }
    }
}

impl Stage for CollectStage {
    fn prompt(&self) -> &str {
        "test.collect.prompt"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn on_start(&mut self, _session: &mut Session) -> Result<(), StageError> {
        self.starts += 1;
        self.responses.clear();
        Ok(())
    }

    fn record_response(&mut self, player: &Player, response: Value) -> Result<(), StageError> {
        self.responses.record(&player.id, response);
        Ok(())
    }

    fn remove_response(&mut self, player: &Player) {
        self.responses.withdraw(&player.id);
    }

    fn on_response(&mut self, session: &mut Session, _player: &Player) -> StageState {
        let everyone = session
            .players()
            .iter()
            .filter(|p| !p.softly_present)
            .all(|p| self.responses.contains(&p.id));
        if everyone {
            session.finish(self.on_end);
        }
        self.state(everyone)
    }

    fn on_withdraw_response(&mut self, _session: &mut Session, _player: &Player) -> StageState {
        self.state(false)
    }
}

/// Fails on start, either with an error or a panic.
#[derive(Debug)]
pub struct FailingStage {
    pub panic: bool,
}

impl Stage for FailingStage {
    fn prompt(&self) -> &str {
        "test.failing.prompt"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn on_start(&mut self, _session: &mut Session) -> Result<(), StageError> {
        if self.panic {
            panic!("stage exploded");
        }
        Err(StageError::failed("could not deal cards"))
    }

    fn record_response(&mut self, _player: &Player, _response: Value) -> Result<(), StageError> {
        Ok(())
    }

    fn remove_response(&mut self, _player: &Player) {}

    fn on_response(&mut self, _session: &mut Session, _player: &Player) -> StageState {
        StageState::incomplete(Value::Null)
    }

    fn on_withdraw_response(&mut self, _session: &mut Session, _player: &Player) -> StageState {
        StageState::incomplete(Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fixture {
    Lobby,
    Collect,
    Fail,
    Panic,
}

/// Concrete game assembled from fixtures.
#[derive(Debug)]
pub struct TestGame {
    pub layout: Vec<Fixture>,
    pub min_players: usize,
    pub max_players: usize,
    pub ended: usize,
    pub final_roster: Vec<String>,
}

impl TestGame {
    pub fn new(layout: &[Fixture], min_players: usize) -> Self {
        Self {
            layout: layout.to_vec(),
            min_players,
            max_players: 4,
            ended: 0,
            final_roster: Vec::new(),
        }
    }
}

impl GameDefinition for TestGame {
    fn name(&self) -> &str {
        "test-game"
    }

    fn min_players(&self) -> usize {
        self.min_players
    }

    fn max_players(&self) -> usize {
        self.max_players
    }

    fn stages(&self) -> Vec<Box<dyn Stage>> {
        self.layout
            .iter()
            .map(|fixture| -> Box<dyn Stage> {
                match fixture {
                    Fixture::Lobby => Box::new(LobbyStage::new(OnEnd::Advance)),
                    Fixture::Collect => Box::new(CollectStage::default()),
                    Fixture::Fail => Box::new(FailingStage { panic: false }),
                    Fixture::Panic => Box::new(FailingStage { panic: true }),
                }
            })
            .collect()
    }

    fn end(&mut self, session: &Session) {
        self.ended += 1;
        self.final_roster = session.players().iter().map(|p| p.id.clone()).collect();
    }
}
