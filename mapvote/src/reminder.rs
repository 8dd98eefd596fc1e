//! Open-vote prompts
//!
//! Two repeating prompts run while a ballot is open: a chat reminder with the
//! option list, and a per-second center-text nudge. Both only target
//! participants who have not voted yet.

use std::time::Duration;
use std::time::Instant;

use crate::catalog::MapEntry;
use crate::config::VoteConfig;
use crate::events::Outbound;
use crate::timer::{TimerKind, TimerSet};
use crate::ParticipantId;

const COUNTDOWN_PERIOD: Duration = Duration::from_secs(1);

/// Chat lines listing ballot options as `[key] Name`
pub fn ballot_lines(options: &[MapEntry]) -> Vec<String> {
    std::iter::once("Type the number to vote:".to_string())
        .chain(
            options
                .iter()
                .enumerate()
                .map(|(i, entry)| format!("[{}] {}", i + 1, entry.display_name)),
        )
        .collect()
}

#[derive(Debug, Clone)]
pub struct ReminderScheduler {
    enabled: bool,
    interval: Duration,
    /// Seconds left on a timed override vote; `None` for untimed prompts
    remaining: Option<u32>,
}

impl ReminderScheduler {
    pub fn new(enabled: bool, interval: Duration) -> Self {
        Self {
            enabled,
            interval,
            remaining: None,
        }
    }

    pub fn from_config(config: &VoteConfig) -> Self {
        Self::new(config.vote_reminder_enabled, config.reminder_interval())
    }

    /// Arm both prompts. `countdown` is the visible time limit, if any.
    pub fn arm(&mut self, timers: &mut TimerSet, now: Instant, countdown: Option<u32>) {
        if self.enabled {
            timers.schedule_repeating(TimerKind::Reminder, now, self.interval);
        }
        timers.schedule_repeating(TimerKind::Countdown, now, COUNTDOWN_PERIOD);
        self.remaining = countdown;
    }

    pub fn disarm(&mut self, timers: &mut TimerSet) {
        timers.kill(TimerKind::Reminder);
        timers.kill(TimerKind::Countdown);
        self.remaining = None;
    }

    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    /// Reminder chat for each participant still to vote
    pub fn remind(&self, pending: &[ParticipantId], options: &[MapEntry]) -> Vec<Outbound> {
        let lines = ballot_lines(options);
        pending
            .iter()
            .flat_map(|&participant| {
                std::iter::once(Outbound::chat(
                    participant,
                    "Reminder: Please vote for the next map!",
                ))
                .chain(lines.iter().map(move |l| Outbound::chat(participant, l.clone())))
            })
            .collect()
    }

    /// One countdown tick. The timed variant counts down even when nobody
    /// is left to prompt.
    pub fn tick(&mut self, pending: &[ParticipantId]) -> Vec<Outbound> {
        let message = match self.remaining.as_mut() {
            Some(remaining) => {
                *remaining = remaining.saturating_sub(1);
                format!("VOTE NOW! Time Remaining: {}s", remaining)
            }
            None => "VOTE NOW!".to_string(),
        };
        pending
            .iter()
            .map(|&participant| Outbound::center(participant, message.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Vec<MapEntry> {
        vec![MapEntry::new("1", "Dust"), MapEntry::new("2", "Nuke")]
    }

    #[test]
    fn test_ballot_lines() {
        assert_eq!(
            ballot_lines(&options()),
            vec!["Type the number to vote:", "[1] Dust", "[2] Nuke"]
        );
    }

    #[test]
    fn test_arm_and_disarm() {
        let now = Instant::now();
        let mut timers = TimerSet::new();
        let mut reminders = ReminderScheduler::new(true, Duration::from_secs(30));
        reminders.arm(&mut timers, now, Some(30));
        assert!(timers.is_armed(TimerKind::Reminder));
        assert!(timers.is_armed(TimerKind::Countdown));

        reminders.disarm(&mut timers);
        assert!(!timers.is_armed(TimerKind::Reminder));
        assert!(!timers.is_armed(TimerKind::Countdown));
        assert_eq!(reminders.remaining(), None);

        let mut quiet = ReminderScheduler::new(false, Duration::from_secs(30));
        quiet.arm(&mut timers, now, None);
        assert!(!timers.is_armed(TimerKind::Reminder));
        assert!(timers.is_armed(TimerKind::Countdown));
    }

    #[test]
    fn test_remind_targets_pending_only() {
        let reminders = ReminderScheduler::new(true, Duration::from_secs(30));
        let out = reminders.remind(&[5], &options());
        assert_eq!(out.len(), 4);
        assert_eq!(
            out[0],
            Outbound::chat(5, "Reminder: Please vote for the next map!")
        );
        assert_eq!(out[3], Outbound::chat(5, "[2] Nuke"));
        assert!(reminders.remind(&[], &options()).is_empty());
    }

    #[test]
    fn test_countdown_floors_at_zero() {
        let mut timers = TimerSet::new();
        let mut reminders = ReminderScheduler::new(true, Duration::from_secs(30));
        reminders.arm(&mut timers, Instant::now(), Some(2));

        assert_eq!(
            reminders.tick(&[1]),
            vec![Outbound::center(1, "VOTE NOW! Time Remaining: 1s")]
        );
        reminders.tick(&[]);
        reminders.tick(&[]);
        assert_eq!(
            reminders.tick(&[1]),
            vec![Outbound::center(1, "VOTE NOW! Time Remaining: 0s")]
        );
    }

    #[test]
    fn test_untimed_prompt() {
        let mut reminders = ReminderScheduler::new(true, Duration::from_secs(30));
        assert_eq!(
            reminders.tick(&[1, 2]),
            vec![Outbound::center(1, "VOTE NOW!"), Outbound::center(2, "VOTE NOW!")]
        );
    }
}
