//! The application state machine.
//!
//! Rounds are the states and the transition table maps a round and an event
//! to the next round. Entering a round schedules a timeout for every timeout
//! event leaving it; the timeouts fire through [`AbciApp::update_time`].

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tessera_core::{Payload, Timestamp};
use tracing::{debug, info, warn};

use crate::background::{BackgroundApp, BackgroundKind};
use crate::error::RoundError;
use crate::registry::RoundRegistry;
use crate::round::{check_payload_kind, Event, Round, RoundId, RoundOutcome};
use crate::synchronized::{SynchronizedData, DEFAULT_CROSS_PERIOD_KEYS};
use crate::timeouts::Timeouts;

pub type TransitionTable = BTreeMap<RoundId, BTreeMap<Event, RoundId>>;

/// Static description of an application
#[derive(Debug, Clone)]
pub struct AppDefinition {
    pub initial_round: RoundId,
    pub initial_rounds: BTreeSet<RoundId>,
    pub transition_table: TransitionTable,
    pub final_rounds: BTreeSet<RoundId>,
    pub event_to_timeout: BTreeMap<Event, Duration>,
    pub cross_period_persisted_keys: BTreeSet<String>,
    pub background_apps: Vec<BackgroundApp>,
}

impl AppDefinition {
    pub fn new(initial_round: RoundId, transition_table: TransitionTable) -> Self {
        AppDefinition {
            initial_round,
            initial_rounds: BTreeSet::new(),
            transition_table,
            final_rounds: BTreeSet::new(),
            event_to_timeout: BTreeMap::new(),
            cross_period_persisted_keys: BTreeSet::new(),
            background_apps: Vec::new(),
        }
    }

    pub fn final_round(mut self, round: RoundId) -> Self {
        self.final_rounds.insert(round);
        self
    }

    pub fn timeout(mut self, event: Event, duration: Duration) -> Self {
        self.event_to_timeout.insert(event, duration);
        self
    }

    pub fn cross_period_key(mut self, key: impl Into<String>) -> Self {
        self.cross_period_persisted_keys.insert(key.into());
        self
    }

    pub fn background(mut self, app: BackgroundApp) -> Self {
        self.background_apps.push(app);
        self
    }

    /// Every round appearing in the transition table, as source or target
    pub fn rounds(&self) -> BTreeSet<RoundId> {
        table_rounds(&self.transition_table)
    }

    fn validate(&self, registry: &RoundRegistry) -> Result<(), RoundError> {
        let table = &self.transition_table;
        let initial = self.initial_round;
        let Some(initial_edges) = table.get(&initial) else {
            return Err(RoundError::internal(format!(
                "initial round '{}' is not in the transition table",
                initial
            )));
        };
        if !self.initial_rounds.is_empty() && !self.initial_rounds.contains(&initial) {
            return Err(RoundError::internal(format!(
                "initial round '{}' is not in the set of initial rounds",
                initial
            )));
        }
        if let Some(event) = initial_edges
            .keys()
            .find(|event| self.event_to_timeout.contains_key(*event))
        {
            return Err(RoundError::internal(format!(
                "initial round '{}' cannot have timeout event '{}'",
                initial, event
            )));
        }
        check_table(table, &self.final_rounds, &self.event_to_timeout, registry)?;

        let mut timeouts = self.event_to_timeout.clone();
        for app in &self.background_apps {
            for (event, duration) in &app.event_to_timeout {
                match timeouts.insert(*event, *duration) {
                    Some(existing) if existing != *duration => {
                        return Err(RoundError::internal(format!(
                            "timeout event '{}' of background round '{}' is {:?}, already declared as {:?}",
                            event, app.round, duration, existing
                        )));
                    }
                    _ => {}
                }
            }
        }

        for app in &self.background_apps {
            let kind = app.kind()?;
            if kind != BackgroundKind::EverRunning {
                let starts = app
                    .transition_table
                    .get(&app.round)
                    .is_some_and(|edges| app.start_event.is_some_and(|e| edges.contains_key(&e)));
                if !starts {
                    return Err(RoundError::internal(format!(
                        "background round '{}' has no transition for its start event",
                        app.round
                    )));
                }
            }
            if !registry.contains(app.round) {
                return Err(RoundError::internal(format!(
                    "round '{}' is not registered",
                    app.round
                )));
            }
            check_table(
                &app.transition_table,
                &app.final_rounds,
                &app.event_to_timeout,
                registry,
            )?;
        }
        Ok(())
    }
}

fn table_rounds(table: &TransitionTable) -> BTreeSet<RoundId> {
    let mut rounds: BTreeSet<RoundId> = table.keys().copied().collect();
    rounds.extend(table.values().flat_map(|edges| edges.values().copied()));
    rounds
}

fn check_table(
    table: &TransitionTable,
    final_rounds: &BTreeSet<RoundId>,
    event_to_timeout: &BTreeMap<Event, Duration>,
    registry: &RoundRegistry,
) -> Result<(), RoundError> {
    let rounds = table_rounds(table);
    let unknown: Vec<&RoundId> = final_rounds.difference(&rounds).collect();
    if !unknown.is_empty() {
        return Err(RoundError::internal(format!(
            "the following final states are not in the set of states: {:?}",
            unknown
        )));
    }
    for round in &rounds {
        if !registry.contains(*round) {
            return Err(RoundError::internal(format!(
                "round '{}' is not registered",
                round
            )));
        }
        if final_rounds.contains(round) {
            continue;
        }
        let has_exit = table.get(round).is_some_and(|edges| {
            edges
                .keys()
                .any(|event| !event_to_timeout.contains_key(event))
        });
        if !has_exit {
            return Err(RoundError::internal(format!(
                "round '{}' has no non-timeout outgoing transition",
                round
            )));
        }
    }
    Ok(())
}

struct BackgroundRunner {
    app: BackgroundApp,
    kind: BackgroundKind,
    round: Box<dyn Round>,
    running: bool,
}

impl BackgroundRunner {
    fn accepts(&self, kind: &str) -> bool {
        let idle = self.kind == BackgroundKind::EverRunning || !self.running;
        idle && self.round.payload_kind() == Some(kind)
    }
}

/// Main table and round put aside while a normal background app runs
struct Suspended {
    table: TransitionTable,
    round: RoundId,
    app: usize,
}

pub struct AbciApp {
    definition: AppDefinition,
    registry: RoundRegistry,
    final_rounds: BTreeSet<RoundId>,
    event_to_timeout: BTreeMap<Event, Duration>,
    transition_table: TransitionTable,
    suspended: Option<Suspended>,
    background: Vec<BackgroundRunner>,
    synchronized_data: SynchronizedData,
    current_round: Option<Box<dyn Round>>,
    last_round_id: Option<RoundId>,
    last_payload_kind: Option<&'static str>,
    previous_rounds: Vec<RoundId>,
    round_results: Vec<SynchronizedData>,
    current_round_height: u64,
    last_timestamp: Option<Timestamp>,
    timeouts: Timeouts<Event>,
    current_timeout_entries: Vec<u64>,
}

impl AbciApp {
    /// Validate `definition` against `registry` and wrap `synchronized_data`.
    ///
    /// The app starts without a current round; call [`AbciApp::setup`].
    pub fn new(
        definition: AppDefinition,
        registry: RoundRegistry,
        mut synchronized_data: SynchronizedData,
    ) -> Result<Self, RoundError> {
        definition.validate(&registry)?;

        let mut final_rounds = definition.final_rounds.clone();
        let mut event_to_timeout = definition.event_to_timeout.clone();
        let mut background = Vec::with_capacity(definition.background_apps.len());
        for app in &definition.background_apps {
            final_rounds.extend(app.final_rounds.iter().copied());
            event_to_timeout.extend(app.event_to_timeout.iter().map(|(e, d)| (*e, *d)));
            background.push(BackgroundRunner {
                kind: app.kind()?,
                round: registry.create(app.round)?,
                app: app.clone(),
                running: false,
            });
        }

        let db = synchronized_data.db_mut();
        db.add_cross_period_persisted_keys(DEFAULT_CROSS_PERIOD_KEYS);
        db.add_cross_period_persisted_keys(definition.cross_period_persisted_keys.iter().cloned());

        Ok(AbciApp {
            transition_table: definition.transition_table.clone(),
            definition,
            registry,
            final_rounds,
            event_to_timeout,
            suspended: None,
            background,
            synchronized_data,
            current_round: None,
            last_round_id: None,
            last_payload_kind: None,
            previous_rounds: Vec::new(),
            round_results: Vec::new(),
            current_round_height: 0,
            last_timestamp: None,
            timeouts: Timeouts::new(),
            current_timeout_entries: Vec::new(),
        })
    }

    /// Enter the initial round
    pub fn setup(&mut self) -> Result<(), RoundError> {
        self.schedule_round(self.definition.initial_round)
    }

    pub fn definition(&self) -> &AppDefinition {
        &self.definition
    }

    pub fn registry(&self) -> &RoundRegistry {
        &self.registry
    }

    pub fn transition_table(&self) -> &TransitionTable {
        &self.transition_table
    }

    pub fn synchronized_data(&self) -> &SynchronizedData {
        &self.synchronized_data
    }

    pub fn synchronized_data_mut(&mut self) -> &mut SynchronizedData {
        &mut self.synchronized_data
    }

    pub fn current_round(&self) -> Option<&dyn Round> {
        self.current_round.as_deref()
    }

    pub fn current_round_id(&self) -> Option<RoundId> {
        self.current_round.as_ref().map(|round| round.id())
    }

    pub fn last_round_id(&self) -> Option<RoundId> {
        self.last_round_id
    }

    pub fn previous_rounds(&self) -> &[RoundId] {
        &self.previous_rounds
    }

    pub fn round_results(&self) -> &[SynchronizedData] {
        &self.round_results
    }

    /// Number of completed transitions
    pub fn current_round_height(&self) -> u64 {
        self.current_round_height
    }

    pub fn last_timestamp(&self) -> Result<Timestamp, RoundError> {
        self.last_timestamp
            .ok_or_else(|| RoundError::internal("last timestamp is None"))
    }

    pub fn timeouts(&self) -> &Timeouts<Event> {
        &self.timeouts
    }

    /// Whether a normal background app currently owns the transition table
    pub fn is_background_running(&self) -> bool {
        self.suspended.is_some()
    }

    pub fn is_finished(&self) -> bool {
        match self.current_round_id() {
            None => true,
            Some(id) => self.final_rounds.contains(&id),
        }
    }

    fn background_for(&self, kind: &str) -> Option<usize> {
        self.background.iter().position(|runner| runner.accepts(kind))
    }

    pub fn check_payload(&self, payload: &Payload) -> Result<(), RoundError> {
        if let Some(index) = self.background_for(&payload.kind) {
            return self.background[index]
                .round
                .check_payload(&self.synchronized_data, payload);
        }
        let round = self
            .current_round
            .as_deref()
            .ok_or_else(|| RoundError::internal("current round is not set"))?;
        check_payload_kind(
            round,
            self.last_payload_kind,
            self.synchronized_data.round_count(),
            payload,
        )?;
        round.check_payload(&self.synchronized_data, payload)
    }

    pub fn process_payload(&mut self, payload: Payload) -> Result<(), RoundError> {
        if let Some(index) = self.background_for(&payload.kind) {
            return self.background[index]
                .round
                .process_payload(&self.synchronized_data, payload);
        }
        let round = self
            .current_round
            .as_deref_mut()
            .ok_or_else(|| RoundError::internal("current round is not set"))?;
        check_payload_kind(
            round,
            self.last_payload_kind,
            self.synchronized_data.round_count(),
            &payload,
        )?;
        round.process_payload(&self.synchronized_data, payload)
    }

    /// Collect this block's results.
    ///
    /// Ever-running apps apply their results directly. A normal or
    /// terminating app reaching its start event wins over the main round,
    /// whose `end_block` is then not consulted for this block.
    pub fn end_block(&mut self) -> Result<Option<RoundOutcome>, RoundError> {
        if self.is_finished() {
            return Ok(None);
        }

        for runner in self.background.iter_mut() {
            if runner.kind != BackgroundKind::EverRunning {
                continue;
            }
            if let Some((data, event)) = runner.round.end_block(&self.synchronized_data)? {
                let from = runner.round.id();
                let next = runner
                    .app
                    .transition_table
                    .get(&from)
                    .and_then(|edges| edges.get(&event))
                    .copied()
                    .unwrap_or(from);
                self.synchronized_data = data;
                runner.round = self.registry.create(next)?;
                debug!(from = %from, to = %next, event = %event, "ever-running app moved");
            }
        }

        for runner in self.background.iter_mut() {
            if runner.kind == BackgroundKind::EverRunning || runner.running {
                continue;
            }
            if let Some((data, event)) = runner.round.end_block(&self.synchronized_data)? {
                if runner.app.start_event == Some(event) {
                    return Ok(Some((data, event)));
                }
                debug!(round = %runner.app.round, event = %event, "background round restarted");
                runner.round = self.registry.create(runner.app.round)?;
            }
        }

        match self.current_round.as_mut() {
            Some(round) => round.end_block(&self.synchronized_data),
            None => Ok(None),
        }
    }

    /// Leave the current round on `event`, keeping `result` as the new
    /// synchronized data when given.
    pub fn process_event(
        &mut self,
        event: Event,
        result: Option<SynchronizedData>,
    ) -> Result<(), RoundError> {
        let Some(current) = self.current_round_id() else {
            info!("cannot process event '{}' as current state is not set", event);
            return Ok(());
        };

        self.previous_rounds.push(current);
        if let Some(data) = result {
            self.synchronized_data = data;
        }
        self.round_results.push(self.synchronized_data.clone());
        self.current_round_height += 1;
        info!("'{}' round is done with event: {}", current, event);

        if let Some(index) = self.background.iter().position(|runner| {
            runner.kind != BackgroundKind::EverRunning
                && !runner.running
                && runner.app.start_event == Some(event)
        }) {
            return self.start_background(index, current, event);
        }

        let ends_background = self
            .suspended
            .as_ref()
            .is_some_and(|s| self.background[s.app].app.end_event == Some(event));
        if ends_background {
            return self.resume_main();
        }

        let next = self
            .transition_table
            .get(&current)
            .and_then(|edges| edges.get(&event))
            .copied();
        match next {
            Some(next) => self.schedule_round(next),
            None => {
                warn!("AbciApp has reached a dead end.");
                self.cancel_current_timeouts();
                self.last_round_id = Some(current);
                self.current_round = None;
                Ok(())
            }
        }
    }

    fn start_background(
        &mut self,
        index: usize,
        interrupted: RoundId,
        event: Event,
    ) -> Result<(), RoundError> {
        let runner = &mut self.background[index];
        let next = runner
            .app
            .transition_table
            .get(&runner.app.round)
            .and_then(|edges| edges.get(&event))
            .copied()
            .ok_or_else(|| {
                RoundError::internal(format!(
                    "background round '{}' has no transition for '{}'",
                    runner.app.round, event
                ))
            })?;
        runner.running = true;
        runner.round = self.registry.create(runner.app.round)?;

        match runner.kind {
            BackgroundKind::Normal => {
                let main = std::mem::replace(
                    &mut self.transition_table,
                    runner.app.transition_table.clone(),
                );
                self.suspended = Some(Suspended {
                    table: main,
                    round: interrupted,
                    app: index,
                });
            }
            BackgroundKind::Terminating => {
                for (round, edges) in &runner.app.transition_table {
                    self.transition_table.insert(*round, edges.clone());
                }
            }
            BackgroundKind::EverRunning => {
                return Err(RoundError::internal(
                    "ever-running background apps have no start event",
                ));
            }
        }
        info!(app = %runner.app.round, interrupted = %interrupted, "background app started");
        self.schedule_round(next)
    }

    fn resume_main(&mut self) -> Result<(), RoundError> {
        let suspended = self
            .suspended
            .take()
            .ok_or_else(|| RoundError::internal("no background app is running"))?;
        self.transition_table = suspended.table;
        self.background[suspended.app].running = false;
        info!(round = %suspended.round, "background app finished, resuming main app");
        self.schedule_round(suspended.round)
    }

    fn cancel_current_timeouts(&mut self) {
        for entry in self.current_timeout_entries.drain(..) {
            self.timeouts.cancel_timeout(entry);
        }
    }

    /// Drop every scheduled timeout
    pub fn cleanup_timeouts(&mut self) {
        self.timeouts = Timeouts::new();
        self.current_timeout_entries.clear();
    }

    /// Make `round_id` the current round, scheduling its timeouts relative
    /// to the last seen timestamp.
    pub fn schedule_round(&mut self, round_id: RoundId) -> Result<(), RoundError> {
        self.cancel_current_timeouts();

        if let Some(edges) = self.transition_table.get(&round_id) {
            for event in edges.keys() {
                let Some(duration) = self.event_to_timeout.get(event) else {
                    continue;
                };
                let last = self
                    .last_timestamp
                    .ok_or_else(|| RoundError::internal("last timestamp is None"))?;
                let deadline = last.checked_add(*duration)?;
                let entry = self.timeouts.add_timeout(deadline, *event);
                debug!(round = %round_id, event = %event, deadline = %deadline, "timeout scheduled");
                self.current_timeout_entries.push(entry);
            }
        }

        let round = self.registry.create(round_id)?;
        if let Some(previous) = self.current_round.take() {
            self.last_round_id = Some(previous.id());
            self.last_payload_kind = previous.payload_kind();
        }
        self.current_round = Some(round);
        self.synchronized_data.db_mut().increment_round_count();
        info!(
            "Entered in the '{}' round for period {}",
            round_id,
            self.synchronized_data.period_count()
        );
        Ok(())
    }

    /// Advance the clock to `timestamp`, firing every expired timeout in
    /// deadline order.
    pub fn update_time(&mut self, timestamp: Timestamp) -> Result<(), RoundError> {
        self.timeouts.pop_earliest_cancelled_timeouts();
        if self.timeouts.is_empty() {
            self.last_timestamp = Some(timestamp);
            return Ok(());
        }

        while let Some((deadline, _)) = self.timeouts.get_earliest_timeout() {
            if deadline > timestamp {
                break;
            }
            let Some((_, event)) = self.timeouts.pop_timeout() else {
                break;
            };
            warn!(
                "expired deadline {} with event {} at AbciApp time {}",
                deadline, event, timestamp
            );
            self.last_timestamp = Some(timestamp);
            self.process_event(event, None)?;
            self.timeouts.pop_earliest_cancelled_timeouts();
        }
        self.last_timestamp = Some(timestamp);
        Ok(())
    }

    /// Keep the last `history_depth` rounds, results and database periods.
    /// A depth of zero keeps everything.
    pub fn cleanup(&mut self, history_depth: usize, current_history_depth: Option<usize>) {
        if history_depth > 0 {
            trim_front(&mut self.previous_rounds, history_depth);
            trim_front(&mut self.round_results, history_depth);
            self.synchronized_data
                .db_mut()
                .cleanup(history_depth, current_history_depth);
        } else if let Some(depth) = current_history_depth {
            self.cleanup_current_histories(depth);
        }
    }

    pub fn cleanup_current_histories(&mut self, depth: usize) {
        self.synchronized_data
            .db_mut()
            .cleanup_current_histories(depth);
    }
}

fn trim_front<T>(items: &mut Vec<T>, keep: usize) {
    if items.len() > keep {
        items.drain(..items.len() - keep);
    }
}

impl std::fmt::Debug for AbciApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbciApp")
            .field("current_round", &self.current_round_id())
            .field("round_count", &self.synchronized_data.round_count())
            .field("height", &self.current_round_height)
            .finish()
    }
}
