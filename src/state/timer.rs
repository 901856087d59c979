//! Deferred, cancelable session timers.
//!
//! Sessions are single-threaded: nothing fires on its own. The driver
//! reports monotonic time through [`Game::tick`](super::game::Game::tick)
//! and every timer whose deadline has passed is handed back, earliest
//! first. Each timer gets a [`TimerId`] that cancels it. Whoever handles a
//! fired task must re-check the condition it was armed for.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use super::stage::StageKey;

/// Longest delay a timer can be armed for. Longer delays are clamped.
pub const MAX_TIMER_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Cancellation token for a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Timers a stage can arm for itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageTimer {
    /// Lobby: remove the player unless they have re-marked ready
    ReadyGrace(String),
    /// Error stage: stop displaying the error and resolve
    ErrorDisplay,
    /// Game-specific timer
    Custom(String),
}

/// What to do when a timer fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerTask {
    /// A disconnected player did not come back in time
    Presence { player_id: String },
    /// Deliver to the owning stage, if it is still active
    Stage { owner: StageKey, timer: StageTimer },
}

/// Timer queue ordered by deadline.
#[derive(Debug, Clone)]
pub struct Scheduler {
    now: Instant,
    next_id: u64,
    queue: BTreeMap<(Instant, TimerId), TimerTask>,
    deadlines: HashMap<TimerId, Instant>,
}

impl Scheduler {
    pub fn new(now: Instant) -> Self {
        Self {
            now,
            next_id: 0,
            queue: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }

    /// Current scheduler time.
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Move the clock forward. Earlier instants are ignored.
    pub fn advance_to(&mut self, now: Instant) {
        if now > self.now {
            self.now = now;
        }
    }

    /// Schedule `task` to fire `delay` from now.
    pub fn schedule(&mut self, delay: Duration, task: TimerTask) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        let deadline = self
            .now
            .checked_add(delay.min(MAX_TIMER_DELAY))
            .unwrap_or(self.now);
        self.queue.insert((deadline, id), task);
        self.deadlines.insert(id, deadline);
        id
    }

    /// Cancel a pending timer, returning its task.
    pub fn cancel(&mut self, id: TimerId) -> Option<TimerTask> {
        let deadline = self.deadlines.remove(&id)?;
        self.queue.remove(&(deadline, id))
    }

    /// Cancel every pending timer whose task matches.
    pub fn cancel_where(&mut self, mut pred: impl FnMut(&TimerTask) -> bool) -> usize {
        let doomed: Vec<(Instant, TimerId)> = self
            .queue
            .iter()
            .filter(|(_, task)| pred(task))
            .map(|(key, _)| *key)
            .collect();

        for key in &doomed {
            self.queue.remove(key);
            self.deadlines.remove(&key.1);
        }

        doomed.len()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.deadlines.clear();
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id)
    }

    pub fn deadline(&self, id: TimerId) -> Option<Instant> {
        self.deadlines.get(&id).copied()
    }

    /// Time left before `id` fires.
    pub fn remaining(&self, id: TimerId) -> Option<Duration> {
        self.deadline(id)
            .map(|deadline| deadline.saturating_duration_since(self.now))
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Take the earliest timer that is due.
    pub fn pop_due(&mut self) -> Option<(TimerId, TimerTask)> {
        let key = *self.queue.keys().next()?;
        if key.0 > self.now {
            return None;
        }
        let task = self.queue.remove(&key)?;
        self.deadlines.remove(&key.1);
        Some((key.1, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn presence(id: &str) -> TimerTask {
        TimerTask::Presence {
            player_id: id.to_string(),
        }
    }

    #[test]
    fn test_fires_in_deadline_order() {
        let start = Instant::now();
        let mut scheduler = Scheduler::new(start);

        scheduler.schedule(Duration::from_secs(10), presence("late"));
        scheduler.schedule(Duration::from_secs(5), presence("early"));

        assert!(scheduler.pop_due().is_none());

        scheduler.advance_to(start + Duration::from_secs(10));
        assert_eq!(scheduler.pop_due().map(|(_, t)| t), Some(presence("early")));
        assert_eq!(scheduler.pop_due().map(|(_, t)| t), Some(presence("late")));
        assert!(scheduler.pop_due().is_none());
    }

    #[test]
    fn test_cancel() {
        let start = Instant::now();
        let mut scheduler = Scheduler::new(start);

        let id = scheduler.schedule(Duration::from_secs(1), presence("p1"));
        assert!(scheduler.is_pending(id));
        assert_eq!(scheduler.remaining(id), Some(Duration::from_secs(1)));

        assert_eq!(scheduler.cancel(id), Some(presence("p1")));
        assert!(scheduler.cancel(id).is_none());

        scheduler.advance_to(start + Duration::from_secs(2));
        assert!(scheduler.pop_due().is_none());
    }

    #[test]
    fn test_cancel_where() {
        let mut scheduler = Scheduler::new(Instant::now());
        scheduler.schedule(Duration::from_secs(1), presence("p1"));
        scheduler.schedule(
            Duration::from_secs(1),
            TimerTask::Stage {
                owner: StageKey::Sequence(0),
                timer: StageTimer::ErrorDisplay,
            },
        );

        let cancelled = scheduler.cancel_where(|t| {
            matches!(t, TimerTask::Stage { owner, .. } if *owner == StageKey::Sequence(0))
        });
        assert_eq!(cancelled, 1);
        assert_eq!(scheduler.pending_count(), 1);
    }

    #[test]
    fn test_huge_delay_is_clamped() {
        let start = Instant::now();
        let mut scheduler = Scheduler::new(start);

        let id = scheduler.schedule(Duration::from_secs(u64::MAX), presence("p1"));
        assert_eq!(scheduler.remaining(id), Some(MAX_TIMER_DELAY));

        scheduler.advance_to(start + Duration::from_secs(365 * 24 * 60 * 60));
        assert!(scheduler.pop_due().is_none());
        assert!(scheduler.is_pending(id));
    }

    #[test]
    fn test_clock_is_monotonic() {
        let start = Instant::now();
        let mut scheduler = Scheduler::new(start + Duration::from_secs(5));
        scheduler.advance_to(start);
        assert_eq!(scheduler.now(), start + Duration::from_secs(5));
    }
}
