//! Cooperative timers
//!
//! Timers are deadlines, not threads. The owner asks for the next deadline,
//! sleeps until it, then collects whatever is due. Killing a timer is the only
//! cancellation; a fired callback always runs, so handlers re-check state.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// The timers the vote machine uses. At most one of each is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    /// Closes an RTV or override vote
    VoteClose,
    /// Chat reminder to participants who have not voted
    Reminder,
    /// Per-second center-text prompt
    Countdown,
    /// Applies the pending map after the match-end announcement
    MapChange,
    /// "You're playing ..." broadcast
    MapInfo,
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    deadline: Instant,
    period: Option<Duration>,
}

/// Set of armed timers keyed by kind
#[derive(Debug, Default)]
pub struct TimerSet {
    timers: HashMap<TimerKind, Timer>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a one-shot timer, replacing any armed timer of the same kind
    pub fn schedule_once(&mut self, kind: TimerKind, now: Instant, delay: Duration) {
        self.timers.insert(
            kind,
            Timer {
                deadline: now + delay,
                period: None,
            },
        );
    }

    /// Arm a repeating timer. A zero period is ignored.
    pub fn schedule_repeating(&mut self, kind: TimerKind, now: Instant, period: Duration) {
        if period.is_zero() {
            return;
        }
        self.timers.insert(
            kind,
            Timer {
                deadline: now + period,
                period: Some(period),
            },
        );
    }

    /// Disarm a timer. Returns whether it was armed.
    pub fn kill(&mut self, kind: TimerKind) -> bool {
        self.timers.remove(&kind).is_some()
    }

    pub fn kill_all(&mut self) {
        self.timers.clear();
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.timers.contains_key(&kind)
    }

    /// Deadline of a specific timer
    pub fn deadline(&self, kind: TimerKind) -> Option<Instant> {
        self.timers.get(&kind).map(|t| t.deadline)
    }

    /// Earliest armed deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(|t| t.deadline).min()
    }

    /// Collect every firing due at `now`, in deadline order.
    ///
    /// One-shot timers are disarmed. Repeating timers are re-armed and fire
    /// once per elapsed period, so a late caller sees every missed tick.
    pub fn take_due(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut fired: Vec<(Instant, TimerKind)> = Vec::new();

        self.timers.retain(|kind, timer| {
            while timer.deadline <= now {
                fired.push((timer.deadline, *kind));
                match timer.period {
                    Some(period) => timer.deadline += period,
                    None => return false,
                }
            }
            true
        });

        fired.sort();
        fired.into_iter().map(|(_, kind)| kind).collect()
    }
}
