//! Task scheduler.
//!
//! Two task classes share one wake timer:
//!
//! - one-shot tasks belong to the current login and are dropped on
//!   disconnect;
//! - keyed tasks are identified by a small integer, survive reconnects, and
//!   replace any earlier task with the same key.
//!
//! The scheduler itself is pure bookkeeping. The agent owns the timers and
//! asks it what is due and when to wake next.

use crate::config::ScheduleConfig;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};
use std::time::Duration;
use tokio::time::Instant;

/// A scheduled action run with mutable access to its owner.
pub type Task<C> = Box<dyn FnOnce(&mut C)>;

/// Timing parameters of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Tasks due within this window of "now" run in the current pass.
    pub tolerance: Duration,
    /// Keyed tasks further out than this do not hold the connection open.
    pub horizon: Duration,
    /// Idle countdown before the connection is closed.
    pub keep_alive: Duration,
    /// Lead time reserved for logging in before a keyed task is due.
    pub reserved_login: Duration,
    /// Floor on the delay before a relogin.
    pub min_retry: Duration,
    /// Relogin delay when no keyed task is pending.
    pub health_check: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self::from(&ScheduleConfig::default())
    }
}

impl From<&ScheduleConfig> for Timings {
    fn from(config: &ScheduleConfig) -> Self {
        Self {
            tolerance: config.tolerance(),
            horizon: config.max_pending(),
            keep_alive: config.keep_alive(),
            reserved_login: config.reserved_login(),
            min_retry: config.min_retry(),
            health_check: config.run_interval(),
        }
    }
}

struct OneShot<C> {
    at: Instant,
    /// Insertion order, breaking ties between equal fire times.
    seq: u64,
    task: Task<C>,
}

impl<C> PartialEq for OneShot<C> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<C> Eq for OneShot<C> {}

impl<C> PartialOrd for OneShot<C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<C> Ord for OneShot<C> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

struct Keyed<C> {
    at: Instant,
    task: Task<C>,
}

/// One-shot and keyed task queues.
pub struct Scheduler<C> {
    timings: Timings,
    one_shot: BinaryHeap<Reverse<OneShot<C>>>,
    keyed: BTreeMap<i32, Keyed<C>>,
    next_seq: u64,
}

impl<C> Scheduler<C> {
    pub fn new(timings: Timings) -> Self {
        Self {
            timings,
            one_shot: BinaryHeap::new(),
            keyed: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    /// Queues a one-shot task.
    pub fn add_task(&mut self, at: Instant, task: Task<C>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.one_shot.push(Reverse(OneShot { at, seq, task }));
    }

    /// Schedules the keyed task `id`, replacing any task with the same id.
    ///
    /// Returns whether an earlier task was replaced.
    pub fn add_keyed(&mut self, id: i32, at: Instant, task: Task<C>) -> bool {
        self.keyed.insert(id, Keyed { at, task }).is_some()
    }

    pub fn has_keyed(&self, id: i32) -> bool {
        self.keyed.contains_key(&id)
    }

    /// Removes and returns every task due at `now`.
    ///
    /// One-shot tasks come first in fire-time order, then keyed tasks. Tasks
    /// queued while the returned ones run wait for the next pass.
    pub fn take_due(&mut self, now: Instant) -> Vec<Task<C>> {
        let cutoff = now + self.timings.tolerance;
        let mut due = Vec::new();

        while self
            .one_shot
            .peek()
            .is_some_and(|Reverse(task)| task.at < cutoff)
        {
            if let Some(Reverse(task)) = self.one_shot.pop() {
                due.push(task.task);
            }
        }

        let due_keys: Vec<i32> = self
            .keyed
            .iter()
            .filter(|(_, task)| task.at < cutoff)
            .map(|(id, _)| *id)
            .collect();
        for id in due_keys {
            if let Some(task) = self.keyed.remove(&id) {
                due.push(task.task);
            }
        }

        due
    }

    /// Returns when the next pass should run, or `None` when nothing is due
    /// within the horizon.
    pub fn next_wake(&self, now: Instant) -> Option<Instant> {
        let horizon = now + self.timings.horizon;
        let one_shot = self.one_shot.peek().map(|Reverse(task)| task.at);
        let keyed = self
            .keyed
            .values()
            .map(|task| task.at)
            .filter(|at| *at < horizon)
            .min();
        match (one_shot, keyed) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fire time of the earliest keyed task.
    pub fn earliest_keyed(&self) -> Option<Instant> {
        self.keyed.values().map(|task| task.at).min()
    }

    /// Delay before logging in again after a disconnect.
    ///
    /// Without keyed work this is the health-check interval. Otherwise the
    /// login is placed ahead of the earliest keyed task, but never sooner
    /// than the minimum retry interval.
    pub fn relogin_delay(&self, now: Instant) -> Duration {
        match self.earliest_keyed() {
            None => self.timings.health_check,
            Some(at) => at
                .saturating_duration_since(now)
                .saturating_sub(self.timings.reserved_login)
                .max(self.timings.min_retry),
        }
    }

    /// Drops all one-shot tasks.
    pub fn discard_one_shot(&mut self) {
        self.one_shot.clear();
    }

    pub fn one_shot_len(&self) -> usize {
        self.one_shot.len()
    }

    pub fn keyed_len(&self) -> usize {
        self.keyed.len()
    }
}
