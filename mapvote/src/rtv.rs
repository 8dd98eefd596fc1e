//! Rock-the-vote tracking
//!
//! Pure bookkeeping: the tracker counts distinct requesters and reports when
//! the threshold is reached. Starting the vote is the caller's job.

use std::collections::HashSet;

use crate::error::Denial;
use crate::ParticipantId;

/// Conditions under which requests are accepted, sampled by the caller
#[derive(Debug, Clone, Copy)]
pub struct RtvGate {
    pub enabled: bool,
    pub warmup: bool,
    /// The match is over and the map has not reloaded yet
    pub match_ended: bool,
    /// No vote is open or finished this cycle
    pub vote_idle: bool,
}

/// Progress after an accepted request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtvProgress {
    pub count: usize,
    pub needed: usize,
    /// The caller should start a vote
    pub threshold_reached: bool,
}

/// Distinct RTV requesters for the current cycle
#[derive(Debug, Default)]
pub struct RtvTracker {
    voters: HashSet<ParticipantId>,
}

impl RtvTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request.
    ///
    /// `needed` is recomputed from `eligible` on every call because players
    /// come and go between requests.
    pub fn request(
        &mut self,
        participant: ParticipantId,
        gate: RtvGate,
        eligible: usize,
        percentage: f64,
    ) -> Result<RtvProgress, Denial> {
        if gate.warmup {
            return Err(Denial::Warmup);
        }
        if !gate.enabled {
            return Err(Denial::RtvDisabled);
        }
        if gate.match_ended {
            return Err(Denial::MatchEnded);
        }
        if !gate.vote_idle {
            return Err(Denial::VoteNotIdle);
        }
        if !self.voters.insert(participant) {
            return Err(Denial::AlreadyRocked);
        }

        Ok(self.progress(eligible, percentage))
    }

    /// Current progress without registering anyone
    pub fn progress(&self, eligible: usize, percentage: f64) -> RtvProgress {
        let count = self.voters.len();
        let needed = votes_needed(eligible, percentage);
        RtvProgress {
            count,
            needed,
            threshold_reached: count >= needed,
        }
    }

    pub fn count(&self) -> usize {
        self.voters.len()
    }

    pub fn contains(&self, participant: ParticipantId) -> bool {
        self.voters.contains(&participant)
    }

    /// Drop a disconnected participant's request
    pub fn remove(&mut self, participant: ParticipantId) {
        self.voters.remove(&participant);
    }

    pub fn reset(&mut self) {
        self.voters.clear();
    }
}

/// `ceil(eligible * percentage)`, at least one.
///
/// The small epsilon keeps float noise (e.g. `10 * 0.6`) from rounding a
/// whole number up to the next integer.
pub fn votes_needed(eligible: usize, percentage: f64) -> usize {
    let raw = (eligible as f64 * percentage - 1e-6).ceil();
    (raw.max(0.0) as usize).max(1)
}
