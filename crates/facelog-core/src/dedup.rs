//! Log-once gate: at most one event per identity per window occurrence.

use crate::period::{Period, WindowName};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

/// What a stored "last logged" entry is compared on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupKey {
    /// Window name only. Someone seen in `morning` on one day and again in
    /// `morning` the next day, with no other window in between, is not
    /// logged a second time.
    #[default]
    Window,
    /// Window name plus calendar date; every day re-arms every window.
    WindowAndDate,
}

impl FromStr for DedupKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "window" => Ok(Self::Window),
            "window-and-date" | "window_and_date" | "daily" => Ok(Self::WindowAndDate),
            other => Err(format!("unknown dedup key: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LastLogged {
    window: WindowName,
    date: NaiveDate,
}

/// Identity name → window of its last emitted event.
#[derive(Debug, Default)]
pub struct DedupState {
    last: HashMap<String, LastLogged>,
}

impl DedupState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether `identity` should be logged for `period` and record
    /// the decision. Out-of-time periods are never logged and never
    /// touch the state.
    pub fn should_log(&mut self, key: DedupKey, identity: &str, period: Period, date: NaiveDate) -> bool {
        let Some(window) = period.window() else {
            return false;
        };
        let next = LastLogged { window, date };

        let already = match (self.last.get(identity), key) {
            (None, _) => false,
            (Some(prev), DedupKey::Window) => prev.window == window,
            (Some(prev), DedupKey::WindowAndDate) => *prev == next,
        };
        if already {
            return false;
        }

        self.last.insert(identity.to_string(), next);
        true
    }

    /// Window last logged for `identity`, if any.
    pub fn last_window(&self, identity: &str) -> Option<WindowName> {
        self.last.get(identity).map(|l| l.window)
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }

    pub fn clear(&mut self) {
        self.last.clear();
    }
}

/// Thread-safe wrapper around [`DedupState`].
///
/// The read-check-write for an identity is one critical section, so two
/// concurrent probes for the same person cannot both pass for one window.
#[derive(Debug, Default)]
pub struct DedupGate {
    key: DedupKey,
    state: Mutex<DedupState>,
}

impl DedupGate {
    pub fn new(key: DedupKey) -> Self {
        Self {
            key,
            state: Mutex::new(DedupState::new()),
        }
    }

    pub fn key(&self) -> DedupKey {
        self.key
    }

    pub fn should_log(&self, identity: &str, period: Period, date: NaiveDate) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.should_log(self.key, identity, period, date)
    }

    pub fn last_window(&self, identity: &str) -> Option<WindowName> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.last_window(identity)
    }

    /// Number of identities with a recorded window.
    pub fn tracked(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.len()
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.clear();
    }
}
