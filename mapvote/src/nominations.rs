//! Nomination list for the current map cycle

use std::collections::HashSet;

use crate::catalog::MapEntry;
use crate::error::{Denial, DenialResult};
use crate::ParticipantId;

/// Ordered, capacity-bounded nominations plus the participants who have
/// nominated this cycle.
///
/// The nominator set is kept apart from the list so a participant cannot
/// nominate twice even if their map is later dropped. It survives
/// disconnects and is only cleared with the cycle.
#[derive(Debug, Clone)]
pub struct Nominations {
    maps: Vec<MapEntry>,
    nominators: HashSet<ParticipantId>,
    capacity: usize,
}

impl Nominations {
    pub fn new(capacity: usize) -> Self {
        Self {
            maps: Vec::new(),
            nominators: HashSet::new(),
            capacity,
        }
    }

    /// Checks that do not depend on which map is picked
    pub fn check_can_nominate(&self, participant: ParticipantId) -> DenialResult<()> {
        if self.is_full() {
            return Err(Denial::NominationListFull);
        }
        if self.nominators.contains(&participant) {
            return Err(Denial::AlreadyNominatedThisCycle);
        }
        Ok(())
    }

    /// Record a confirmed nomination
    pub fn add(&mut self, participant: ParticipantId, entry: MapEntry) -> DenialResult<()> {
        self.check_can_nominate(participant)?;
        if self.contains(&entry.id) {
            return Err(Denial::AlreadyNominatedMap);
        }
        self.maps.push(entry);
        self.nominators.insert(participant);
        Ok(())
    }

    pub fn contains(&self, map_id: &str) -> bool {
        self.maps.iter().any(|m| m.id == map_id)
    }

    pub fn has_nominated(&self, participant: ParticipantId) -> bool {
        self.nominators.contains(&participant)
    }

    pub fn maps(&self) -> &[MapEntry] {
        &self.maps
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.maps.len() >= self.capacity
    }

    pub fn clear(&mut self) {
        self.maps.clear();
        self.nominators.clear();
    }
}
