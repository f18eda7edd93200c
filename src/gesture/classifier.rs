use std::time::{Duration, Instant};

use crate::models::{Command, FingerVector};

/// Exact finger-vector patterns and the command each one dispatches.
#[derive(Debug, Clone, Default)]
pub struct GestureTable {
    entries: Vec<(FingerVector, Command)>,
}

impl GestureTable {
    pub fn new(entries: Vec<(FingerVector, Command)>) -> Self {
        Self { entries }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact match only. A vector that is a subset or superset of a pattern
    /// does not match it.
    pub fn lookup(&self, fingers: FingerVector) -> Option<Command> {
        self.entries
            .iter()
            .find(|(pattern, _)| *pattern == fingers)
            .map(|(_, command)| *command)
    }
}

/// Debounces per-frame classifications so a held gesture fires once per
/// cooldown window.
#[derive(Debug, Clone)]
pub struct GestureClassifier {
    table: GestureTable,
    cooldown: Duration,
    last_dispatch: Option<Instant>,
}

impl GestureClassifier {
    pub fn new(table: GestureTable, cooldown: Duration) -> Self {
        Self {
            table,
            cooldown,
            last_dispatch: None,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn last_dispatch(&self) -> Option<Instant> {
        self.last_dispatch
    }

    /// Time left before another command may fire, if any.
    pub fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        let last = self.last_dispatch?;
        let elapsed = now.saturating_duration_since(last);
        (elapsed < self.cooldown).then(|| self.cooldown - elapsed)
    }

    /// Returns the command for `fingers` unless the cooldown is still running.
    /// Only a dispatched command restarts the cooldown.
    pub fn classify(&mut self, fingers: FingerVector, now: Instant) -> Option<Command> {
        if self.cooldown_remaining(now).is_some() {
            return None;
        }

        let command = self.table.lookup(fingers)?;
        self.last_dispatch = Some(now);
        Some(command)
    }
}
