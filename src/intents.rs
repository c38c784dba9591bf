//! Actions the widget can trigger without the app running.
//!
//! Each intent opens its own connection to the shared store from a
//! [`StoreConfig`], does its work on a worker thread bounded by
//! `StoreConfig::intent_budget`, and asks the timeline host to reload
//! afterwards. The host cannot act on failures, so `perform` never returns an
//! error: problems are logged and reflected only in [`IntentResult`].
//!
//! The worker's store commits through a [`BudgetGate`]. Either the worker
//! claims the gate and its commit is waited for, or the caller closes it on
//! timeout and the worker's transaction is aborted. Nothing lands after the
//! result has been returned.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::city_store::{CityStore, CommitGate};
use crate::refresh::{refresh_selected, RefreshRanges, SimulatedWeather, WeatherSource};
use crate::selection::{reselect_by_name, SelectionChange};
use crate::snapshot::TimelineReloader;
use crate::store_config::StoreConfig;

/// What an intent did. Intents always "succeed" towards their invoker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentResult {
    pub intent: String,
    /// The store was written.
    pub applied: bool,
    /// The budget ran out before the worker finished.
    pub timed_out: bool,
    pub reload_requested: bool,
}

const GATE_OPEN: u8 = 0;
const GATE_COMMITTING: u8 = 1;
const GATE_ABANDONED: u8 = 2;

/// Decides, exactly once, whether an intent's write may land.
#[derive(Debug, Default)]
pub struct BudgetGate {
    state: AtomicU8,
}

impl BudgetGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Worker side: true if the write may commit. Also true for a second
    /// commit by a worker that already claimed the gate.
    pub fn claim_commit(&self) -> bool {
        match self.state.compare_exchange(
            GATE_OPEN,
            GATE_COMMITTING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(current) => current == GATE_COMMITTING,
        }
    }

    /// Caller side: true if the worker can no longer commit.
    pub fn abandon(&self) -> bool {
        match self.state.compare_exchange(
            GATE_OPEN,
            GATE_ABANDONED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(current) => current == GATE_ABANDONED,
        }
    }

    fn as_commit_gate(self: &Arc<Self>) -> CommitGate {
        let gate = Arc::clone(self);
        Arc::new(move || gate.claim_commit())
    }
}

/// Runs `work` on its own thread and waits at most `budget` for it.
///
/// `Err(true)` means the budget ran out and the gate was closed before any
/// commit. A worker that claimed the gate in time is waited for, since its
/// write is already on the way to disk.
fn run_with_budget<T, F>(name: &str, budget: Duration, work: F) -> Result<T, bool>
where
    T: Send + 'static,
    F: FnOnce(CommitGate) -> T + Send + 'static,
{
    let gate = BudgetGate::new();
    let commit_gate = gate.as_commit_gate();
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name(format!("intent-{name}"))
        .spawn(move || {
            let _ = tx.send(work(commit_gate));
        });
    if let Err(e) = spawned {
        warn!("Could not start {name} worker: {e}");
        return Err(false);
    }

    match rx.recv_timeout(budget) {
        Ok(value) => Ok(value),
        Err(RecvTimeoutError::Timeout) if gate.abandon() => {
            warn!("{name} exceeded its {budget:?} budget; abandoning");
            Err(true)
        }
        Err(RecvTimeoutError::Timeout) => {
            debug!("{name} is committing past its budget; waiting for it");
            rx.recv().map_err(|_| {
                warn!("{name} worker stopped without a result");
                false
            })
        }
        Err(RecvTimeoutError::Disconnected) => {
            warn!("{name} worker stopped without a result");
            Err(false)
        }
    }
}

fn finish(
    intent: &str,
    outcome: Result<bool, bool>,
    reloader: &dyn TimelineReloader,
) -> IntentResult {
    reloader.reload_timelines();
    let (applied, timed_out) = match outcome {
        Ok(applied) => (applied, false),
        Err(timed_out) => (false, timed_out),
    };
    info!("{intent} finished (applied: {applied}, timed out: {timed_out})");
    IntentResult {
        intent: intent.to_string(),
        applied,
        timed_out,
        reload_requested: true,
    }
}

/// Re-rolls the selected city's weather. No selection means nothing to do.
#[derive(Debug, Clone, Default)]
pub struct RefreshSelectedIntent {
    pub ranges: RefreshRanges,
}

impl RefreshSelectedIntent {
    pub const NAME: &'static str = "RefreshSelectedIntent";

    pub fn perform(&self, config: &StoreConfig, reloader: &dyn TimelineReloader) -> IntentResult {
        self.perform_with(config, SimulatedWeather::with_rng(StdRng::from_entropy()), reloader)
    }

    pub fn perform_with<S>(
        &self,
        config: &StoreConfig,
        mut source: S,
        reloader: &dyn TimelineReloader,
    ) -> IntentResult
    where
        S: WeatherSource + Send + 'static,
    {
        let owned = config.clone();
        let ranges = self.ranges.normalized();
        let outcome = run_with_budget(Self::NAME, config.intent_budget(), move |gate| {
            let store = match CityStore::init(&owned) {
                Ok(store) => store.with_commit_gate(gate),
                Err(e) => {
                    warn!("{} could not open the store: {e}", Self::NAME);
                    return false;
                }
            };
            refresh_selected(&store, &mut source, &ranges).is_some()
        });
        finish(Self::NAME, outcome, reloader)
    }
}

/// Moves the selection to the first city named `city_name`.
///
/// Every flag is cleared first, so an unknown name leaves no city selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeCityIntent {
    pub city_name: String,
}

impl ChangeCityIntent {
    pub const NAME: &'static str = "ChangeCityIntent";

    pub fn new(city_name: impl Into<String>) -> Self {
        Self { city_name: city_name.into() }
    }

    pub fn perform(&self, config: &StoreConfig, reloader: &dyn TimelineReloader) -> IntentResult {
        let owned = config.clone();
        let name = self.city_name.clone();
        let outcome = run_with_budget(Self::NAME, config.intent_budget(), move |gate| {
            let store = match CityStore::init(&owned) {
                Ok(store) => store.with_commit_gate(gate),
                Err(e) => {
                    warn!("{} could not open the store: {e}", Self::NAME);
                    return false;
                }
            };
            match reselect_by_name(&store, &name) {
                SelectionChange::Selected | SelectionChange::ClearedNoMatch => true,
                SelectionChange::Unchanged | SelectionChange::Failed => false,
            }
        });
        finish(Self::NAME, outcome, reloader)
    }
}
