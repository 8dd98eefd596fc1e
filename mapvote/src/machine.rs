//! Vote lifecycle state machine
//!
//! [`VoteMachine`] owns every piece of per-map vote state: the phase, ballot
//! options and ballots, nominations, RTV requests, selection menus, timers
//! and the participant roster. All mutation goes through its methods, which
//! either succeed or return a [`Denial`] and leave state untouched.
//!
//! Effects are not performed directly. Chat lines, center text and map
//! changes are queued as [`Outbound`] values and drained by the runtime with
//! [`VoteMachine::drain_outbound`]; lifecycle records go to the optional
//! event bus.
//!
//! ```text
//!            start_vote            end_vote
//!   Idle ─────────────────▶ Open ───────────▶ Finished
//!    ▲                       ▲                   │
//!    │                       └───────────────────┤ start_vote(ForcedByAdmin)
//!    └───────────────── reset_for_new_map ◀──────┘
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::time::Instant;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::catalog::{filter_by_name, MapEntry, SharedCatalog};
use crate::config::VoteConfig;
use crate::context::SharedProcessContext;
use crate::error::{Denial, DenialResult};
use crate::events::{Outbound, Resolution, SharedEventBus, VoteEvent, VoteId, VoteTrigger};
use crate::nominations::Nominations;
use crate::reminder::{ballot_lines, ReminderScheduler};
use crate::rtv::{RtvGate, RtvProgress, RtvTracker};
use crate::selection::{MenuInput, OpenOutcome, SelectionFlow, SelectionMenu};
use crate::selector::select_candidates;
use crate::store::PlayHistory;
use crate::timer::{TimerKind, TimerSet};
use crate::ParticipantId;

/// Console command that turns off the game's own end-of-match map vote
pub const DISABLE_BUILTIN_VOTE: &str = "mp_endmatch_votenextmap 0";

const RULE: &str = "------------------------------";

/// A connected human player
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
}

/// How an open vote behaves and closes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteMode {
    /// Triggered by the round counter; closes on round ends
    Scheduled,
    /// Triggered by RTV; closes on the vote timer
    Rtv,
    /// Triggered by an admin. With a backup (a winner already existed) it
    /// closes on the timer and falls back to the backup if nobody votes;
    /// without one it behaves like a scheduled vote.
    Forced { backup: Option<MapEntry> },
}

impl VoteMode {
    /// Whether the vote closes on the timer rather than on round ends
    pub fn is_timed(&self) -> bool {
        matches!(self, VoteMode::Rtv | VoteMode::Forced { backup: Some(_) })
    }

    pub fn backup(&self) -> Option<&MapEntry> {
        match self {
            VoteMode::Forced { backup } => backup.as_ref(),
            _ => None,
        }
    }
}

/// A ballot in progress
#[derive(Debug, Clone)]
pub struct OpenVote {
    pub vote_id: VoteId,
    pub mode: VoteMode,
    /// Option `k` is `options[k - 1]`
    pub options: Vec<MapEntry>,
    pub ballots: HashMap<ParticipantId, usize>,
    /// Round ends seen while open (round-closed votes only)
    pub rounds_elapsed: u32,
}

impl OpenVote {
    /// Map for a 1-based option key
    pub fn option(&self, key: usize) -> Option<&MapEntry> {
        key.checked_sub(1).and_then(|i| self.options.get(i))
    }

    pub fn has_voted(&self, participant: ParticipantId) -> bool {
        self.ballots.contains_key(&participant)
    }
}

/// Result of a closed vote; the winner is the pending map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteOutcome {
    pub vote_id: VoteId,
    pub winner: MapEntry,
    pub resolution: Resolution,
    pub ballots: usize,
}

#[derive(Debug, Clone)]
pub enum VotePhase {
    Idle,
    Open(OpenVote),
    Finished(VoteOutcome),
}

impl VotePhase {
    pub fn is_idle(&self) -> bool {
        matches!(self, VotePhase::Idle)
    }

    pub fn is_open(&self) -> bool {
        matches!(self, VotePhase::Open(_))
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, VotePhase::Finished(_))
    }
}

impl fmt::Display for VotePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Open(_) => write!(f, "Open"),
            Self::Finished(_) => write!(f, "Finished"),
        }
    }
}

/// Largest ballot group as `(option key, votes)`; ties go to the lowest key
pub fn tally(ballots: &HashMap<ParticipantId, usize>) -> Option<(usize, usize)> {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for &key in ballots.values() {
        *counts.entry(key).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
}

/// The per-map vote orchestrator
pub struct VoteMachine {
    config: VoteConfig,
    context: SharedProcessContext,
    catalog: SharedCatalog,
    history: Box<dyn PlayHistory>,
    rng: StdRng,

    phase: VotePhase,
    match_ended: bool,
    warmup: bool,
    current_map: Option<String>,

    nominations: Nominations,
    rtv: RtvTracker,
    nominate_menu: SelectionMenu,
    forcemap_menu: SelectionMenu,
    participants: BTreeMap<ParticipantId, Participant>,

    timers: TimerSet,
    reminders: ReminderScheduler,

    outbox: Vec<Outbound>,
    bus: Option<SharedEventBus>,
}

impl VoteMachine {
    pub fn new(
        config: VoteConfig,
        context: SharedProcessContext,
        catalog: SharedCatalog,
        history: Box<dyn PlayHistory>,
    ) -> Self {
        let nominations = Nominations::new(config.vote_options_count);
        let nominate_menu = SelectionMenu::new(SelectionFlow::Nominate, config.nominate_per_page);
        let forcemap_menu = SelectionMenu::new(SelectionFlow::Forcemap, config.nominate_per_page);
        let reminders = ReminderScheduler::from_config(&config);

        Self {
            config,
            context,
            catalog,
            history,
            rng: StdRng::from_os_rng(),
            phase: VotePhase::Idle,
            match_ended: false,
            warmup: false,
            current_map: None,
            nominations,
            rtv: RtvTracker::new(),
            nominate_menu,
            forcemap_menu,
            participants: BTreeMap::new(),
            timers: TimerSet::new(),
            reminders,
            outbox: Vec::new(),
            bus: None,
        }
    }

    /// Use a deterministic RNG
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Publish lifecycle events on `bus`
    pub fn with_event_bus(mut self, bus: SharedEventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    // --- Accessors ---

    pub fn config(&self) -> &VoteConfig {
        &self.config
    }

    pub fn catalog(&self) -> &SharedCatalog {
        &self.catalog
    }

    pub fn phase(&self) -> &VotePhase {
        &self.phase
    }

    pub fn open_vote(&self) -> Option<&OpenVote> {
        match &self.phase {
            VotePhase::Open(vote) => Some(vote),
            _ => None,
        }
    }

    /// The map that will be applied at match end
    pub fn pending_map(&self) -> Option<&MapEntry> {
        match &self.phase {
            VotePhase::Finished(outcome) => Some(&outcome.winner),
            _ => None,
        }
    }

    pub fn match_ended(&self) -> bool {
        self.match_ended
    }

    pub fn is_warmup(&self) -> bool {
        self.warmup
    }

    pub fn current_map(&self) -> Option<&str> {
        self.current_map.as_deref()
    }

    pub fn nominations(&self) -> &Nominations {
        &self.nominations
    }

    pub fn rtv(&self) -> &RtvTracker {
        &self.rtv
    }

    pub fn timers(&self) -> &TimerSet {
        &self.timers
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn is_admin(&self, participant: ParticipantId) -> bool {
        self.config.is_admin(participant)
    }

    pub fn has_session(&self, flow: SelectionFlow, participant: ParticipantId) -> bool {
        self.menu(flow).is_open(participant)
    }

    /// Earliest armed timer deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Take every queued effect
    pub fn drain_outbound(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    /// Swap in a freshly fetched catalog
    pub fn replace_catalog(&mut self, catalog: SharedCatalog) {
        info!(maps = catalog.len(), "Map catalog replaced");
        self.catalog = catalog;
    }

    // --- Participants ---

    pub fn participant_connected(&mut self, id: ParticipantId, name: impl Into<String>) {
        let name = name.into();
        debug!(participant = id, name = %name, "Participant connected");
        self.participants.insert(id, Participant { id, name });
    }

    /// Purge the participant's RTV request, ballot and menu sessions.
    /// "Has nominated" is kept for the rest of the cycle.
    pub fn participant_disconnected(&mut self, id: ParticipantId) {
        self.participants.remove(&id);
        self.rtv.remove(id);
        if let VotePhase::Open(vote) = &mut self.phase {
            vote.ballots.remove(&id);
        }
        self.nominate_menu.close(id);
        self.forcemap_menu.close(id);
        debug!(participant = id, "Participant disconnected");
    }

    pub fn set_warmup(&mut self, warmup: bool) {
        if self.warmup != warmup {
            debug!(warmup, "Warmup changed");
        }
        self.warmup = warmup;
    }

    // --- Vote lifecycle ---

    /// Open a ballot.
    pub fn start_vote(&mut self, trigger: VoteTrigger, now: Instant) -> DenialResult<()> {
        if self.phase.is_open() {
            return Err(Denial::VoteInProgress);
        }
        if self.warmup {
            return Err(Denial::Warmup);
        }
        // No ballot until the next map load
        if self.match_ended {
            return Err(Denial::MatchEnded);
        }

        let current_id = self.current_map_id();
        let use_history = self.config.enable_recent_maps;
        let history = &self.history;
        let options = select_candidates(
            self.nominations.maps(),
            self.catalog.maps(),
            |id| use_history && history.is_recent(id),
            current_id.as_deref(),
            self.config.vote_options_count,
            &mut self.rng,
        );
        if options.is_empty() {
            warn!(%trigger, "No maps available for a vote");
            return Err(Denial::NoMapsAvailable { search: None });
        }

        let mode = match (trigger, &self.phase) {
            (VoteTrigger::ForcedByAdmin, VotePhase::Finished(outcome)) => VoteMode::Forced {
                backup: Some(outcome.winner.clone()),
            },
            (VoteTrigger::ForcedByAdmin, _) => VoteMode::Forced { backup: None },
            (VoteTrigger::Rtv, _) => VoteMode::Rtv,
            (VoteTrigger::ScheduledRound, _) => VoteMode::Scheduled,
        };

        self.nominate_menu.clear();
        self.rtv.reset();
        self.timers.kill(TimerKind::MapChange);

        self.chat_all("--- Vote for the Next Map! ---");
        let countdown = if mode.is_timed() {
            let secs = self.config.vote_duration_secs;
            self.chat_all(format!("Vote ending in {} seconds!", secs));
            self.timers
                .schedule_once(TimerKind::VoteClose, now, self.config.vote_duration());
            mode.backup().map(|_| secs)
        } else {
            let rounds = self.config.vote_open_for_rounds;
            if rounds > 1 {
                self.chat_all(format!("Vote will remain open for {} rounds.", rounds));
            } else {
                self.chat_all("Vote will remain open until the round ends.");
            }
            None
        };

        let lines = ballot_lines(&options);
        let ids: Vec<ParticipantId> = self.participants.keys().copied().collect();
        for id in ids {
            for line in &lines {
                self.outbox.push(Outbound::chat(id, line.clone()));
            }
        }

        self.reminders.arm(&mut self.timers, now, countdown);

        let vote_id = VoteEvent::new_vote_id();
        info!(
            vote_id = %vote_id,
            %trigger,
            options = options.len(),
            timed = mode.is_timed(),
            "Vote started"
        );
        self.publish(VoteEvent::VoteStarted {
            vote_id: vote_id.clone(),
            trigger,
            options: options.clone(),
            timestamp: Utc::now(),
        });
        self.transition(VotePhase::Open(OpenVote {
            vote_id,
            mode,
            options,
            ballots: HashMap::new(),
            rounds_elapsed: 0,
        }));
        Ok(())
    }

    /// Record or overwrite a ballot
    pub fn cast_vote(&mut self, participant: ParticipantId, key: usize) -> DenialResult<MapEntry> {
        let VotePhase::Open(vote) = &mut self.phase else {
            return Err(Denial::NoActiveVote);
        };
        let entry = vote.option(key).cloned().ok_or(Denial::InvalidOption)?;
        vote.ballots.insert(participant, key);
        let vote_id = vote.vote_id.clone();

        debug!(participant, option = key, map = %entry, "Ballot cast");
        self.outbox.push(Outbound::chat(
            participant,
            format!("You voted for: {}", entry.display_name),
        ));
        self.publish(VoteEvent::BallotCast {
            vote_id,
            participant,
            option: key,
            map_id: entry.id.clone(),
            timestamp: Utc::now(),
        });
        Ok(entry)
    }

    /// Close the open ballot and set the pending map. No-op unless `Open`.
    pub fn end_vote(&mut self) -> Option<VoteOutcome> {
        let VotePhase::Open(vote) = std::mem::replace(&mut self.phase, VotePhase::Idle) else {
            return None;
        };

        self.timers.kill(TimerKind::VoteClose);
        self.reminders.disarm(&mut self.timers);

        let decided = match (vote.mode.backup(), tally(&vote.ballots)) {
            (Some(backup), None) => Some((backup.clone(), Resolution::KeptPrevious)),
            (None, None) => vote
                .options
                .choose(&mut self.rng)
                .map(|entry| (entry.clone(), Resolution::Random)),
            (_, Some((key, votes))) => vote
                .option(key)
                .map(|entry| (entry.clone(), Resolution::Majority { votes })),
        };
        let Some((winner, resolution)) = decided else {
            // Open votes always have options; keep the machine usable anyway
            warn!(vote_id = %vote.vote_id, "Vote closed without a winner");
            self.transition(VotePhase::Idle);
            return None;
        };

        match resolution {
            Resolution::KeptPrevious => {
                self.chat_all("No votes cast! Keeping previously selected next map.")
            }
            Resolution::Random => self.chat_all("No votes cast! Randomly selecting a map..."),
            Resolution::Majority { .. } => {}
        }
        self.chat_all(RULE);
        match resolution {
            Resolution::Majority { votes } => self.chat_all(format!(
                "Winner: {} with {} votes!",
                winner.display_name, votes
            )),
            _ => self.chat_all(format!("Winner: {} (Random/Previous)", winner.display_name)),
        }
        self.chat_all(RULE);
        self.chat_all("Map will change at the end of the match.");

        self.nominations.clear();

        let outcome = VoteOutcome {
            vote_id: vote.vote_id,
            winner,
            resolution,
            ballots: vote.ballots.len(),
        };
        info!(
            vote_id = %outcome.vote_id,
            winner = %outcome.winner,
            %resolution,
            ballots = outcome.ballots,
            "Vote ended"
        );
        self.publish(VoteEvent::VoteEnded {
            vote_id: outcome.vote_id.clone(),
            winner: outcome.winner.clone(),
            resolution,
            ballots: outcome.ballots,
            timestamp: Utc::now(),
        });
        self.transition(VotePhase::Finished(outcome.clone()));
        Some(outcome)
    }

    /// Match over: close any open vote, block forced votes and schedule the
    /// pending map change.
    pub fn apply_pending_on_match_end(&mut self, now: Instant) -> Option<MapEntry> {
        self.match_ended = true;
        self.end_vote();

        let pending = self.pending_map().cloned()?;
        self.chat_all(format!("Changing map to {}!", pending.display_name));
        let delay = self.config.map_change_delay();
        self.timers.schedule_once(TimerKind::MapChange, now, delay);

        info!(map = %pending, delay_ms = delay.as_millis() as u64, "Map change scheduled");
        self.publish(VoteEvent::MapChangeScheduled {
            map: pending.clone(),
            delay_ms: delay.as_millis() as u64,
            timestamp: Utc::now(),
        });
        Some(pending)
    }

    /// New map loaded: drop all per-map state and start the next cycle
    pub fn reset_for_new_map(&mut self, map_name: impl Into<String>, now: Instant) {
        let map_name = map_name.into();

        self.transition(VotePhase::Idle);
        self.match_ended = false;
        self.nominations.clear();
        self.rtv.reset();
        self.nominate_menu.clear();
        self.forcemap_menu.clear();
        self.timers.kill_all();
        self.reminders.disarm(&mut self.timers);
        self.current_map = Some(map_name.clone());

        self.outbox.push(Outbound::server_command(DISABLE_BUILTIN_VOTE));

        if self.config.enable_recent_maps {
            if let Some(entry) = self.catalog.resolve_loaded_map(&map_name) {
                let id = entry.id.clone();
                self.history.record_played(&id);
            }
        }

        let interval = self.config.map_message_interval();
        if self.config.show_map_message && !interval.is_zero() {
            self.timers
                .schedule_repeating(TimerKind::MapInfo, now, interval);
        }

        info!(map = %map_name, "Map reset");
        self.publish(VoteEvent::MapReset {
            map_name,
            timestamp: Utc::now(),
        });

        if self.config.randomize_startup_map {
            self.randomize_startup_map();
        }
    }

    /// Switch away from the first map of the process lifetime, once
    fn randomize_startup_map(&mut self) {
        let current_id = self.current_map_id();
        let candidates: Vec<&MapEntry> = self
            .catalog
            .maps()
            .iter()
            .filter(|m| current_id.as_deref() != Some(m.id.as_str()))
            .collect();
        if candidates.is_empty() || !self.context.claim_startup_randomization() {
            return;
        }
        let Some(entry) = candidates.choose(&mut self.rng).map(|m| (*m).clone()) else {
            return;
        };

        info!(map = %entry, "Randomizing startup map");
        self.chat_all(format!("Randomizing startup map: {}", entry.display_name));
        self.outbox.push(Outbound::ChangeMap { map_id: entry.id });
    }

    // --- Game events ---

    /// Round start. Opens the scheduled vote when the upcoming round is the
    /// configured trigger round. Returns whether a vote opened.
    pub fn on_round_start(&mut self, rounds_played: u32, now: Instant) -> bool {
        if !self.phase.is_idle() || rounds_played.saturating_add(1) != self.config.vote_round {
            return false;
        }
        match self.start_vote(VoteTrigger::ScheduledRound, now) {
            Ok(()) => true,
            Err(denial) => {
                debug!(%denial, "Scheduled vote not started");
                false
            }
        }
    }

    /// Round end. Counts down round-closed votes.
    pub fn on_round_end(&mut self) {
        let limit = self.config.vote_open_for_rounds;
        let remaining = match &mut self.phase {
            VotePhase::Open(vote) if !vote.mode.is_timed() => {
                vote.rounds_elapsed += 1;
                limit.saturating_sub(vote.rounds_elapsed)
            }
            _ => return,
        };

        if remaining == 0 {
            self.end_vote();
        } else {
            self.chat_all(format!(
                "Map Vote continuing! {} rounds remaining.",
                remaining
            ));
        }
    }

    /// Fire every timer due at `now`. Each handler re-checks the phase, so a
    /// timer that outlived its vote does nothing.
    pub fn on_timer(&mut self, now: Instant) {
        for kind in self.timers.take_due(now) {
            debug!(?kind, "Timer fired");
            match kind {
                TimerKind::VoteClose => {
                    if self.open_vote().is_some_and(|v| v.mode.is_timed()) {
                        self.end_vote();
                    }
                }
                TimerKind::Reminder => {
                    if let Some(vote) = self.open_vote() {
                        let pending = self.pending_voters(vote);
                        let out = self.reminders.remind(&pending, &vote.options);
                        self.outbox.extend(out);
                    }
                }
                TimerKind::Countdown => {
                    if let Some(vote) = self.open_vote() {
                        let pending = self.pending_voters(vote);
                        let out = self.reminders.tick(&pending);
                        self.outbox.extend(out);
                    }
                }
                TimerKind::MapChange => {
                    if self.match_ended {
                        if let Some(entry) = self.pending_map().cloned() {
                            info!(map = %entry, "Changing map");
                            self.outbox.push(Outbound::ChangeMap { map_id: entry.id });
                        }
                    }
                }
                TimerKind::MapInfo => {
                    if let Some(map_name) = self.current_map.as_deref() {
                        let display = self
                            .catalog
                            .resolve_loaded_map(map_name)
                            .map(|m| m.display_name.clone())
                            .unwrap_or_else(|| map_name.to_string());
                        let message = format!(
                            "You're playing {} on {}!",
                            display, self.config.server_name
                        );
                        self.chat_all(message);
                    }
                }
            }
        }
    }

    // --- Player commands ---

    /// RTV request. Starts a vote when the threshold is reached.
    pub fn attempt_rtv(
        &mut self,
        participant: ParticipantId,
        now: Instant,
    ) -> DenialResult<RtvProgress> {
        let gate = RtvGate {
            enabled: self.config.enable_rtv,
            warmup: self.warmup,
            match_ended: self.match_ended,
            vote_idle: self.phase.is_idle(),
        };
        let eligible = self.participants.len();
        let progress =
            self.rtv
                .request(participant, gate, eligible, self.config.rtv_percentage)?;

        let name = self.name_of(participant);
        self.chat_all(format!(
            "{} wants to change the map! ({}/{})",
            name, progress.count, progress.needed
        ));
        info!(
            participant,
            count = progress.count,
            needed = progress.needed,
            "RTV accepted"
        );
        self.publish(VoteEvent::RtvProgress {
            participant,
            count: progress.count,
            needed: progress.needed,
            timestamp: Utc::now(),
        });

        if progress.threshold_reached {
            self.chat_all("RTV Threshold reached! Starting vote...");
            if let Err(denial) = self.start_vote(VoteTrigger::Rtv, now) {
                warn!(%denial, "RTV threshold reached but vote did not start");
                self.chat_all(denial.to_string());
            }
        }
        Ok(progress)
    }

    /// Open the nomination menu, or nominate directly on a single match
    pub fn attempt_nominate(
        &mut self,
        participant: ParticipantId,
        search: Option<&str>,
    ) -> DenialResult<()> {
        if !self.config.enable_nominate {
            return Err(Denial::NominationsDisabled);
        }
        if !self.phase.is_idle() {
            return Err(Denial::VotingClosed);
        }
        self.nominations.check_can_nominate(participant)?;

        let current_id = self.current_map_id();
        let candidates = self.catalog.maps().iter().filter(|m| {
            !self.nominations.contains(&m.id) && current_id.as_deref() != Some(m.id.as_str())
        });
        let search = search.map(str::trim).filter(|s| !s.is_empty());
        let candidates: Vec<MapEntry> = match search {
            Some(term) => filter_by_name(candidates.cloned(), term),
            None => candidates.cloned().collect(),
        };

        match self
            .nominate_menu
            .open(participant, candidates, search.is_some())
        {
            OpenOutcome::Empty => Err(Denial::NoMapsAvailable {
                search: search.map(String::from),
            }),
            OpenOutcome::Immediate(entry) => self.commit_nomination(participant, entry),
            OpenOutcome::Opened(page) => {
                self.chat_lines(participant, page.render());
                Ok(())
            }
        }
    }

    /// Record a confirmed nomination
    pub fn commit_nomination(
        &mut self,
        participant: ParticipantId,
        entry: MapEntry,
    ) -> DenialResult<()> {
        if !self.phase.is_idle() {
            return Err(Denial::VotingClosed);
        }
        self.nominations.add(participant, entry.clone())?;

        let name = self.name_of(participant);
        self.chat_all(format!("Player {} nominated {}.", name, entry.display_name));
        info!(participant, map = %entry, nominations = self.nominations.len(), "Map nominated");
        self.publish(VoteEvent::Nominated {
            participant,
            map: entry,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Admin map switch: open the forcemap menu or switch on a single match
    pub fn attempt_forcemap(
        &mut self,
        participant: ParticipantId,
        search: Option<&str>,
    ) -> DenialResult<()> {
        if !self.is_admin(participant) {
            return Err(Denial::PermissionDenied);
        }

        let search = search.map(str::trim).filter(|s| !s.is_empty());
        let candidates = match search {
            Some(term) => self.catalog.search(term),
            None => self.catalog.maps().to_vec(),
        };

        match self
            .forcemap_menu
            .open(participant, candidates, search.is_some())
        {
            OpenOutcome::Empty => Err(Denial::NoMapsAvailable {
                search: search.map(String::from),
            }),
            OpenOutcome::Immediate(entry) => {
                self.commit_forcemap(participant, entry);
                Ok(())
            }
            OpenOutcome::Opened(page) => {
                self.chat_lines(participant, page.render());
                Ok(())
            }
        }
    }

    /// Announce and switch immediately
    pub fn commit_forcemap(&mut self, participant: ParticipantId, entry: MapEntry) {
        let name = self.name_of(participant);
        self.chat_all(format!(
            "Admin {} forced map change to {}.",
            name, entry.display_name
        ));
        info!(participant, map = %entry, "Map forced");
        self.outbox.push(Outbound::ChangeMap {
            map_id: entry.id.clone(),
        });
        self.publish(VoteEvent::MapForced {
            participant,
            map: entry,
            timestamp: Utc::now(),
        });
    }

    /// Admin-initiated vote
    pub fn attempt_force_vote(
        &mut self,
        participant: ParticipantId,
        now: Instant,
    ) -> DenialResult<()> {
        if !self.is_admin(participant) {
            return Err(Denial::PermissionDenied);
        }

        let mark = self.outbox.len();
        self.start_vote(VoteTrigger::ForcedByAdmin, now)?;

        let name = self.name_of(participant);
        self.outbox.insert(
            mark,
            Outbound::chat_all(format!("Admin {} initiated a map vote.", name)),
        );
        Ok(())
    }

    /// Show the ballot again to one participant
    pub fn revote(&mut self, participant: ParticipantId) -> DenialResult<()> {
        let vote = self.open_vote().ok_or(Denial::NoActiveVote)?;
        let mut lines = vec!["Redisplaying vote options. You may recast your vote.".to_string()];
        lines.extend(ballot_lines(&vote.options));
        self.chat_lines(participant, lines);
        Ok(())
    }

    /// Announce the pending map
    pub fn nextmap(&mut self) -> DenialResult<MapEntry> {
        let entry = self.pending_map().cloned().ok_or(Denial::NextMapUndecided)?;
        self.chat_all(format!("The next map will be: {}", entry.display_name));
        Ok(entry)
    }

    /// Feed chat text to the participant's menu for `flow`. Returns whether
    /// the text was consumed.
    pub fn selection_input(
        &mut self,
        flow: SelectionFlow,
        participant: ParticipantId,
        text: &str,
    ) -> bool {
        match self.menu_mut(flow).input(participant, text) {
            MenuInput::Ignored => false,
            MenuInput::Cancelled => {
                let message = match flow {
                    SelectionFlow::Nominate => "Nomination cancelled.",
                    SelectionFlow::Forcemap => "Forcemap cancelled.",
                };
                self.outbox.push(Outbound::chat(participant, message));
                true
            }
            MenuInput::Page(page) => {
                self.chat_lines(participant, page.render());
                true
            }
            MenuInput::Selected(entry) => {
                match flow {
                    SelectionFlow::Nominate => {
                        if let Err(denial) = self.commit_nomination(participant, entry) {
                            self.deny(participant, &denial);
                        }
                    }
                    SelectionFlow::Forcemap => self.commit_forcemap(participant, entry),
                }
                true
            }
        }
    }

    /// Send a denial to the participant as chat
    pub fn deny(&mut self, participant: ParticipantId, denial: &Denial) {
        debug!(participant, %denial, "Denied");
        self.outbox
            .push(Outbound::chat(participant, denial.to_string()));
    }

    /// Queue chat lines for one participant
    pub fn chat_lines(&mut self, participant: ParticipantId, lines: Vec<String>) {
        self.outbox.extend(
            lines
                .into_iter()
                .map(|line| Outbound::chat(participant, line)),
        );
    }

    // --- Internals ---

    fn chat_all(&mut self, message: impl Into<String>) {
        self.outbox.push(Outbound::chat_all(message));
    }

    fn publish(&self, event: VoteEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }

    fn transition(&mut self, next: VotePhase) {
        if std::mem::discriminant(&self.phase) != std::mem::discriminant(&next) {
            debug!(from = %self.phase, to = %next, "Vote phase transition");
        }
        self.phase = next;
    }

    fn menu(&self, flow: SelectionFlow) -> &SelectionMenu {
        match flow {
            SelectionFlow::Nominate => &self.nominate_menu,
            SelectionFlow::Forcemap => &self.forcemap_menu,
        }
    }

    fn menu_mut(&mut self, flow: SelectionFlow) -> &mut SelectionMenu {
        match flow {
            SelectionFlow::Nominate => &mut self.nominate_menu,
            SelectionFlow::Forcemap => &mut self.forcemap_menu,
        }
    }

    fn current_map_id(&self) -> Option<String> {
        let name = self.current_map.as_deref()?;
        self.catalog.resolve_loaded_map(name).map(|m| m.id.clone())
    }

    fn name_of(&self, participant: ParticipantId) -> String {
        self.participants
            .get(&participant)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| format!("#{}", participant))
    }

    /// Connected participants without a ballot, in id order
    fn pending_voters(&self, vote: &OpenVote) -> Vec<ParticipantId> {
        let voted: BTreeSet<ParticipantId> = vote.ballots.keys().copied().collect();
        self.participants
            .keys()
            .copied()
            .filter(|id| !voted.contains(id))
            .collect()
    }
}

impl fmt::Debug for VoteMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoteMachine")
            .field("phase", &self.phase.to_string())
            .field("match_ended", &self.match_ended)
            .field("warmup", &self.warmup)
            .field("current_map", &self.current_map)
            .field("nominations", &self.nominations.len())
            .field("participants", &self.participants.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MapCatalog;
    use crate::context::ProcessContext;
    use crate::store::RecentMaps;
    use std::time::Duration;

    fn catalog(n: usize) -> SharedCatalog {
        MapCatalog::new(
            (1..=n)
                .map(|i| MapEntry::new(format!("{}", 100 + i), format!("Map {}", i)))
                .collect(),
        )
        .shared()
    }

    fn config() -> VoteConfig {
        VoteConfig {
            admins: vec![1],
            ..VoteConfig::default()
        }
    }

    fn machine_with(config: VoteConfig, maps: usize) -> VoteMachine {
        let history = Box::new(RecentMaps::in_memory(config.recent_maps_count));
        VoteMachine::new(config, ProcessContext::new().shared(), catalog(maps), history)
            .with_seed(11)
    }

    fn machine() -> VoteMachine {
        let mut m = machine_with(config(), 10);
        for id in 1..=4 {
            m.participant_connected(id, format!("p{}", id));
        }
        m
    }

    fn chats_all(out: &[Outbound]) -> Vec<String> {
        out.iter()
            .filter_map(|o| match o {
                Outbound::ChatAll { message } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_tally_ties_to_lowest_key() {
        let ballots: HashMap<ParticipantId, usize> =
            [(1, 3), (2, 2), (3, 3), (4, 2)].into_iter().collect();
        assert_eq!(tally(&ballots), Some((2, 2)));

        let ballots: HashMap<ParticipantId, usize> =
            [(1, 3), (2, 2), (3, 3)].into_iter().collect();
        assert_eq!(tally(&ballots), Some((3, 2)));
        assert_eq!(tally(&HashMap::new()), None);
    }

    #[test]
    fn test_start_vote_builds_contiguous_options() {
        let mut m = machine();
        let now = Instant::now();
        m.start_vote(VoteTrigger::Rtv, now).unwrap();

        let vote = m.open_vote().unwrap();
        assert_eq!(vote.options.len(), 8);
        assert!((1..=8).all(|k| vote.option(k).is_some()));
        assert!(vote.option(0).is_none());
        assert!(vote.option(9).is_none());
        assert!(m.timers().is_armed(TimerKind::VoteClose));
        assert!(m.timers().is_armed(TimerKind::Countdown));

        assert_eq!(
            m.start_vote(VoteTrigger::ForcedByAdmin, now),
            Err(Denial::VoteInProgress)
        );
    }

    #[test]
    fn test_start_vote_denials() {
        let mut m = machine();
        let now = Instant::now();
        m.set_warmup(true);
        assert_eq!(m.start_vote(VoteTrigger::Rtv, now), Err(Denial::Warmup));
        m.set_warmup(false);

        let mut empty = machine_with(config(), 0);
        assert_eq!(
            empty.start_vote(VoteTrigger::ScheduledRound, now),
            Err(Denial::NoMapsAvailable { search: None })
        );
        assert!(empty.phase().is_idle());
    }

    #[test]
    fn test_last_ballot_wins() {
        let mut m = machine();
        m.start_vote(VoteTrigger::ScheduledRound, Instant::now())
            .unwrap();
        m.cast_vote(1, 2).unwrap();
        m.cast_vote(1, 5).unwrap();
        assert_eq!(m.cast_vote(2, 42), Err(Denial::InvalidOption));

        let vote = m.open_vote().unwrap();
        assert_eq!(vote.ballots.len(), 1);
        let expected = vote.option(5).cloned().unwrap();

        let outcome = m.end_vote().unwrap();
        assert_eq!(outcome.winner, expected);
        assert_eq!(outcome.resolution, Resolution::Majority { votes: 1 });
    }

    #[test]
    fn test_end_vote_is_idempotent() {
        let mut m = machine();
        assert!(m.end_vote().is_none());

        m.start_vote(VoteTrigger::Rtv, Instant::now()).unwrap();
        m.cast_vote(2, 1).unwrap();
        let first = m.end_vote().unwrap();
        m.drain_outbound();

        assert!(m.end_vote().is_none());
        assert!(m.drain_outbound().is_empty());
        assert_eq!(m.pending_map(), Some(&first.winner));
        assert!(!m.timers().is_armed(TimerKind::Countdown));
        assert!(!m.timers().is_armed(TimerKind::VoteClose));
    }

    #[test]
    fn test_zero_ballots_picks_an_option() {
        let mut m = machine();
        m.start_vote(VoteTrigger::Rtv, Instant::now()).unwrap();
        let options = m.open_vote().unwrap().options.clone();
        m.drain_outbound();

        let outcome = m.end_vote().unwrap();
        assert_eq!(outcome.resolution, Resolution::Random);
        assert!(options.contains(&outcome.winner));
        let out = chats_all(&m.drain_outbound());
        assert_eq!(out[0], "No votes cast! Randomly selecting a map...");
        assert!(out.contains(&format!(
            "Winner: {} (Random/Previous)",
            outcome.winner.display_name
        )));
    }

    #[test]
    fn test_forced_vote_keeps_previous_winner() {
        let mut m = machine();
        let now = Instant::now();
        m.start_vote(VoteTrigger::ScheduledRound, now).unwrap();
        m.cast_vote(3, 4).unwrap();
        let first = m.end_vote().unwrap();

        m.attempt_force_vote(1, now).unwrap();
        let vote = m.open_vote().unwrap();
        assert_eq!(vote.mode.backup(), Some(&first.winner));
        assert!(vote.mode.is_timed());

        m.on_timer(now + Duration::from_secs(30));
        assert!(m.phase().is_finished());
        let outcome = match m.phase() {
            VotePhase::Finished(o) => o.clone(),
            _ => unreachable!(),
        };
        assert_eq!(outcome.winner, first.winner);
        assert_eq!(outcome.resolution, Resolution::KeptPrevious);
    }

    #[test]
    fn test_forced_vote_without_history_is_round_closed() {
        let mut m = machine();
        let now = Instant::now();
        m.attempt_force_vote(1, now).unwrap();

        let out = chats_all(&m.drain_outbound());
        assert_eq!(out[0], "Admin p1 initiated a map vote.");
        assert_eq!(out[1], "--- Vote for the Next Map! ---");
        assert!(!m.timers().is_armed(TimerKind::VoteClose));

        m.on_round_end();
        assert!(m.phase().is_finished());
    }

    #[test]
    fn test_force_vote_requires_admin_and_open_match() {
        let mut m = machine();
        let now = Instant::now();
        assert_eq!(m.attempt_force_vote(2, now), Err(Denial::PermissionDenied));

        m.apply_pending_on_match_end(now);
        assert_eq!(m.attempt_force_vote(1, now), Err(Denial::MatchEnded));
        assert!(m.phase().is_idle());
    }

    #[test]
    fn test_countdown_only_targets_non_voters() {
        let mut m = machine();
        let now = Instant::now();
        m.start_vote(VoteTrigger::ScheduledRound, now).unwrap();
        m.cast_vote(1, 1).unwrap();
        m.drain_outbound();

        m.on_timer(now + Duration::from_secs(1));
        let centers: Vec<ParticipantId> = m
            .drain_outbound()
            .into_iter()
            .filter_map(|o| match o {
                Outbound::Center {
                    participant,
                    message,
                } => {
                    assert_eq!(message, "VOTE NOW!");
                    Some(participant)
                }
                _ => None,
            })
            .collect();
        assert_eq!(centers, vec![2, 3, 4]);
    }

    #[test]
    fn test_round_closed_vote_counts_rounds() {
        let mut m = machine_with(
            VoteConfig {
                vote_open_for_rounds: 2,
                ..config()
            },
            10,
        );
        m.start_vote(VoteTrigger::ScheduledRound, Instant::now())
            .unwrap();
        m.drain_outbound();

        m.on_round_end();
        assert!(m.phase().is_open());
        assert_eq!(
            chats_all(&m.drain_outbound()),
            vec!["Map Vote continuing! 1 rounds remaining."]
        );
        m.on_round_end();
        assert!(m.phase().is_finished());
    }

    #[test]
    fn test_round_start_triggers_scheduled_vote() {
        let mut m = machine();
        let now = Instant::now();
        assert!(!m.on_round_start(5, now));
        assert!(m.on_round_start(9, now));
        assert!(m.phase().is_open());
        m.end_vote();
        assert!(!m.on_round_start(9, now));
    }

    #[test]
    fn test_rtv_threshold_starts_vote() {
        let mut m = machine();
        let now = Instant::now();
        // 4 participants at 60% need 3
        let p = m.attempt_rtv(1, now).unwrap();
        assert_eq!((p.count, p.needed), (1, 3));
        m.attempt_rtv(2, now).unwrap();
        assert_eq!(m.attempt_rtv(2, now), Err(Denial::AlreadyRocked));
        let p = m.attempt_rtv(3, now).unwrap();
        assert!(p.threshold_reached);

        let vote = m.open_vote().unwrap();
        assert_eq!(vote.mode, VoteMode::Rtv);
        assert_eq!(m.rtv().count(), 0);
        assert_eq!(m.attempt_rtv(4, now), Err(Denial::VoteNotIdle));
    }

    #[test]
    fn test_nomination_single_match_commits() {
        let mut m = machine();
        m.attempt_nominate(2, Some("Map 10")).unwrap();
        assert_eq!(m.nominations().len(), 1);
        assert_eq!(m.nominations().maps()[0].id, "110");
        assert_eq!(
            chats_all(&m.drain_outbound()),
            vec!["Player p2 nominated Map 10."]
        );

        assert_eq!(
            m.attempt_nominate(2, None),
            Err(Denial::AlreadyNominatedThisCycle)
        );
        assert_eq!(
            m.attempt_nominate(3, Some("nothing")),
            Err(Denial::NoMapsAvailable {
                search: Some("nothing".to_string())
            })
        );
    }

    #[test]
    fn test_nomination_menu_flow() {
        let mut m = machine();
        m.attempt_nominate(3, None).unwrap();
        assert!(m.has_session(SelectionFlow::Nominate, 3));

        assert!(m.selection_input(SelectionFlow::Nominate, 3, "1"));
        assert!(!m.has_session(SelectionFlow::Nominate, 3));
        assert_eq!(m.nominations().len(), 1);
    }

    #[test]
    fn test_nominated_maps_lead_the_ballot() {
        let mut m = machine();
        m.attempt_nominate(1, Some("Map 7")).unwrap();
        m.attempt_nominate(2, Some("Map 3")).unwrap();
        m.start_vote(VoteTrigger::Rtv, Instant::now()).unwrap();

        let vote = m.open_vote().unwrap();
        assert_eq!(vote.options[0].id, "107");
        assert_eq!(vote.options[1].id, "103");

        m.end_vote();
        assert!(m.nominations().is_empty());
        assert!(!m.nominations().has_nominated(1));
    }

    #[test]
    fn test_nomination_closed_while_voting() {
        let mut m = machine();
        m.start_vote(VoteTrigger::Rtv, Instant::now()).unwrap();
        assert_eq!(m.attempt_nominate(2, None), Err(Denial::VotingClosed));
    }

    #[test]
    fn test_forcemap_requires_admin() {
        let mut m = machine();
        assert_eq!(
            m.attempt_forcemap(2, Some("Map 2")),
            Err(Denial::PermissionDenied)
        );

        m.attempt_forcemap(1, Some("Map 2")).unwrap();
        let out = m.drain_outbound();
        assert!(out.contains(&Outbound::chat_all("Admin p1 forced map change to Map 2.")));
        assert!(out.contains(&Outbound::ChangeMap {
            map_id: "102".to_string()
        }));
    }

    #[test]
    fn test_disconnect_purges_participant_state() {
        let mut m = machine();
        let now = Instant::now();
        m.attempt_nominate(2, None).unwrap();
        m.attempt_rtv(2, now).unwrap();
        m.participant_disconnected(2);
        assert!(!m.has_session(SelectionFlow::Nominate, 2));
        assert!(!m.rtv().contains(2));

        m.participant_connected(2, "p2");
        m.start_vote(VoteTrigger::ScheduledRound, now).unwrap();
        m.cast_vote(2, 1).unwrap();
        m.participant_disconnected(2);
        assert!(m.open_vote().unwrap().ballots.is_empty());
    }

    #[test]
    fn test_match_end_schedules_map_change() {
        let mut m = machine();
        let now = Instant::now();
        m.start_vote(VoteTrigger::ScheduledRound, now).unwrap();
        m.cast_vote(1, 1).unwrap();
        let winner = m.open_vote().unwrap().options[0].clone();

        assert_eq!(m.apply_pending_on_match_end(now), Some(winner.clone()));
        assert!(m.match_ended());
        m.drain_outbound();

        m.on_timer(now + Duration::from_secs(7));
        assert!(m.drain_outbound().is_empty());
        m.on_timer(now + Duration::from_secs(8));
        assert_eq!(
            m.drain_outbound(),
            vec![Outbound::ChangeMap { map_id: winner.id }]
        );
    }

    #[test]
    fn test_map_reset_clears_everything() {
        let mut m = machine();
        let now = Instant::now();
        m.attempt_nominate(2, Some("Map 4")).unwrap();
        m.start_vote(VoteTrigger::ScheduledRound, now).unwrap();
        m.apply_pending_on_match_end(now);
        m.drain_outbound();

        m.reset_for_new_map("workshop/104/de_four", now);
        assert!(m.phase().is_idle());
        assert!(!m.match_ended());
        assert!(m.nominations().is_empty());
        assert!(!m.timers().is_armed(TimerKind::MapChange));
        assert!(m.timers().is_armed(TimerKind::MapInfo));
        assert_eq!(
            m.drain_outbound(),
            vec![Outbound::server_command(DISABLE_BUILTIN_VOTE)]
        );

        m.on_timer(now + Duration::from_secs(300));
        assert_eq!(
            chats_all(&m.drain_outbound()),
            vec!["You're playing Map 4 on My CS2 Server!"]
        );
    }

    #[test]
    fn test_current_map_excluded_from_ballot() {
        let mut m = machine_with(config(), 3);
        let now = Instant::now();
        m.reset_for_new_map("workshop/102/de_two", now);
        m.start_vote(VoteTrigger::Rtv, now).unwrap();
        let ids: Vec<&str> = m
            .open_vote()
            .unwrap()
            .options
            .iter()
            .map(|o| o.id.as_str())
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(!ids.contains(&"102"));
    }

    #[test]
    fn test_startup_randomization_runs_once_per_context() {
        let ctx = ProcessContext::new().shared();
        let config = VoteConfig {
            randomize_startup_map: true,
            ..config()
        };
        let mut m = VoteMachine::new(
            config,
            ctx.clone(),
            catalog(5),
            Box::new(RecentMaps::in_memory(5)),
        )
        .with_seed(3);
        let now = Instant::now();

        m.reset_for_new_map("workshop/101/de_one", now);
        let changes = m
            .drain_outbound()
            .into_iter()
            .filter(|o| matches!(o, Outbound::ChangeMap { map_id } if map_id != "101"))
            .count();
        assert_eq!(changes, 1);
        assert!(ctx.startup_randomized());

        m.reset_for_new_map("workshop/102/de_two", now);
        assert!(!m
            .drain_outbound()
            .iter()
            .any(|o| matches!(o, Outbound::ChangeMap { .. })));
    }

    #[test]
    fn test_nextmap_and_revote() {
        let mut m = machine();
        assert_eq!(m.nextmap(), Err(Denial::NextMapUndecided));
        assert_eq!(m.revote(1), Err(Denial::NoActiveVote));

        m.start_vote(VoteTrigger::Rtv, Instant::now()).unwrap();
        m.drain_outbound();
        m.revote(1).unwrap();
        let out = m.drain_outbound();
        assert_eq!(out.len(), 10);

        m.cast_vote(1, 1).unwrap();
        let outcome = m.end_vote().unwrap();
        assert_eq!(m.nextmap(), Ok(outcome.winner));
    }

    #[tokio::test]
    async fn test_lifecycle_events_published() {
        let bus = crate::events::EventBus::new().shared();
        let mut rx = bus.subscribe();
        let mut m = machine().with_event_bus(bus);

        m.start_vote(VoteTrigger::Rtv, Instant::now()).unwrap();
        m.cast_vote(2, 1).unwrap();
        m.end_vote();

        let types: Vec<&str> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .iter()
        .map(|e| e.event_type())
        .collect();
        assert_eq!(types, vec!["vote_started", "ballot_cast", "vote_ended"]);
    }
}
