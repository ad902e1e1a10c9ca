//! Sub-machines running next to the main application.

pub mod slashing;
pub mod termination;

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::abci_app::TransitionTable;
use crate::error::RoundError;
use crate::round::{Event, RoundId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundKind {
    /// Pre-empts the main table on its start event and hands control back
    /// on its end event
    Normal,
    /// Takes over for good on its start event
    Terminating,
    /// Runs every block in its own table without touching the main one
    EverRunning,
}

/// Declaration of a background app.
///
/// `round` is the round that runs alongside the main app until the start
/// event fires; the transition table must have an edge out of it.
#[derive(Debug, Clone)]
pub struct BackgroundApp {
    pub round: RoundId,
    pub start_event: Option<Event>,
    pub end_event: Option<Event>,
    pub transition_table: TransitionTable,
    pub final_rounds: BTreeSet<RoundId>,
    pub event_to_timeout: BTreeMap<Event, Duration>,
}

impl BackgroundApp {
    pub fn new(round: RoundId, transition_table: TransitionTable) -> Self {
        BackgroundApp {
            round,
            start_event: None,
            end_event: None,
            transition_table,
            final_rounds: BTreeSet::new(),
            event_to_timeout: BTreeMap::new(),
        }
    }

    pub fn start_event(mut self, event: Event) -> Self {
        self.start_event = Some(event);
        self
    }

    pub fn end_event(mut self, event: Event) -> Self {
        self.end_event = Some(event);
        self
    }

    pub fn final_round(mut self, round: RoundId) -> Self {
        self.final_rounds.insert(round);
        self
    }

    pub fn timeout(mut self, event: Event, duration: Duration) -> Self {
        self.event_to_timeout.insert(event, duration);
        self
    }

    pub fn kind(&self) -> Result<BackgroundKind, RoundError> {
        match (self.start_event, self.end_event) {
            (Some(_), Some(_)) => Ok(BackgroundKind::Normal),
            (Some(_), None) => Ok(BackgroundKind::Terminating),
            (None, None) => Ok(BackgroundKind::EverRunning),
            (None, Some(_)) => Err(RoundError::internal(format!(
                "background app '{}' has an end event but no start event",
                self.round
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_events() {
        let app = BackgroundApp::new(RoundId("bg"), TransitionTable::new());
        assert_eq!(app.kind().unwrap(), BackgroundKind::EverRunning);

        let app = app.start_event(Event("start"));
        assert_eq!(app.kind().unwrap(), BackgroundKind::Terminating);
        assert_eq!(
            app.end_event(Event("end")).kind().unwrap(),
            BackgroundKind::Normal
        );

        let app = BackgroundApp::new(RoundId("bg"), TransitionTable::new()).end_event(Event("end"));
        assert!(app.kind().is_err());
    }
}
