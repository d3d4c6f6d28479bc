//! Progress observer (component J).
//!
//! Listens to the events a [`crate::coinjoin::session::Session`] emits and
//! keeps the small set of counters a UI or CLI would want to poll: how many
//! sessions finished, how many timed out, and how far along the wallet's
//! current mixing target is.

use tokio::sync::mpsc::UnboundedReceiver;

use crate::coinjoin::interfaces::Balance;
use crate::coinjoin::status::AutoDenomResult;

/// Emitted by a session on its own lifecycle transitions (§4.J
/// "onStarted/onComplete/onMixingComplete").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Started { session_id: u64 },
    Completed { session_id: u64, success: bool },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub completed_sessions: u64,
    pub timed_out_sessions: u64,
    pub last_percent: u8,
}

pub struct ProgressObserver {
    rx: UnboundedReceiver<SessionEvent>,
    completed_sessions: u64,
    timed_out_sessions: u64,
    last_percent: u8,
}

impl ProgressObserver {
    pub fn new(rx: UnboundedReceiver<SessionEvent>) -> Self {
        Self {
            rx,
            completed_sessions: 0,
            timed_out_sessions: 0,
            last_percent: 0,
        }
    }

    /// Drains every event queued since the last call, updating counters.
    pub fn drain(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            match event {
                SessionEvent::Started { .. } => {}
                SessionEvent::Completed { success: true, .. } => self.completed_sessions += 1,
                SessionEvent::Completed { success: false, .. } => self.timed_out_sessions += 1,
            }
        }
    }

    /// Recomputes `last_percent = 100 * anonymized / denominated` from the
    /// wallet's current balance breakdown (§4.J).
    pub fn update_from_balance(&mut self, balance: &Balance) {
        let denominated = balance.denominated_confirmed + balance.denominated_unconfirmed;
        self.last_percent = if denominated == 0 {
            0
        } else {
            ((balance.anonymized as u128 * 100) / denominated as u128) as u8
        };
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            completed_sessions: self.completed_sessions,
            timed_out_sessions: self.timed_out_sessions,
            last_percent: self.last_percent,
        }
    }

    /// Resolves to `MSG_SUCCESS`-equivalent once mixing reaches 100%, or an
    /// error result if the session pipeline reports nothing but failures.
    pub fn outcome(&self) -> Option<AutoDenomResult> {
        if self.last_percent >= 100 {
            Some(AutoDenomResult::NothingToDo)
        } else if self.timed_out_sessions > 0 && self.completed_sessions == 0 {
            Some(AutoDenomResult::Error("all sessions failed".to_string()))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_counts_completions_and_timeouts_separately() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tx.send(SessionEvent::Started { session_id: 1 }).unwrap();
        tx.send(SessionEvent::Completed { session_id: 1, success: true }).unwrap();
        tx.send(SessionEvent::Completed { session_id: 2, success: false }).unwrap();

        let mut observer = ProgressObserver::new(rx);
        observer.drain();

        let snapshot = observer.snapshot();
        assert_eq!(snapshot.completed_sessions, 1);
        assert_eq!(snapshot.timed_out_sessions, 1);
    }

    #[test]
    fn percent_tracks_anonymized_over_denominated() {
        let (_tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let mut observer = ProgressObserver::new(rx);
        observer.update_from_balance(&Balance {
            anonymized: 50,
            anonymizable: 0,
            denominated_confirmed: 100,
            denominated_unconfirmed: 0,
            non_denom_anonymizable: 0,
        });
        assert_eq!(observer.snapshot().last_percent, 50);
    }
}
