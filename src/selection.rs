//! The single-selection rule.
//!
//! At most one stored city has `is_selected` set. Every operation here
//! re-applies the rule over the full collection inside one store transaction
//! instead of trusting whatever another process left behind, so a stray
//! second flag (for example from an older writer) is cleaned up by the next
//! selection.
//!
//! None of these functions return errors. Callers include remote intents that
//! have nowhere to surface a failure, so storage problems are logged and the
//! call degrades to "nothing changed" / "nothing selected".

use log::{debug, warn};
use uuid::Uuid;

use crate::city_record::CityRecord;
use crate::city_store::CityStore;

/// Outcome of a selection change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionChange {
    /// The target is now the only selected city.
    Selected,
    /// No record matched; every flag is now cleared.
    ClearedNoMatch,
    /// No record matched and nothing was touched.
    Unchanged,
    /// The store could not be updated.
    Failed,
}

fn apply_exclusive(records: &mut [CityRecord], target: Option<usize>) {
    for (index, record) in records.iter_mut().enumerate() {
        record.is_selected = Some(index) == target;
    }
}

/// Makes `id` the only selected city. An unknown id leaves no city
/// selected.
pub fn select_city(store: &CityStore, id: &Uuid) -> SelectionChange {
    let result = store.transact(|records| {
        let target = records.iter().position(|r| r.id == *id);
        apply_exclusive(records, target);
        target.is_some()
    });
    match result {
        Ok(true) => {
            debug!("Selected city {}", id);
            SelectionChange::Selected
        }
        Ok(false) => {
            debug!("Select target {} not found; selection cleared", id);
            SelectionChange::ClearedNoMatch
        }
        Err(e) => {
            warn!("Selecting city {} failed: {e}", id);
            SelectionChange::Failed
        }
    }
}

/// Selects the first city (in insertion order) named `name`. When nothing
/// matches the current selection stays as it is.
pub fn select_city_by_name(store: &CityStore, name: &str) -> SelectionChange {
    let result = store.transact(|records| {
        let target = records.iter().position(|r| r.name == name)?;
        apply_exclusive(records, Some(target));
        Some(())
    });
    match result {
        Ok(Some(())) => SelectionChange::Selected,
        Ok(None) => {
            debug!("No city named '{}'; selection unchanged", name);
            SelectionChange::Unchanged
        }
        Err(e) => {
            warn!("Selecting city '{}' failed: {e}", name);
            SelectionChange::Failed
        }
    }
}

/// Clears every selection flag, then selects the first city named `name` if
/// there is one. Both steps commit together.
pub fn reselect_by_name(store: &CityStore, name: &str) -> SelectionChange {
    let result = store.transact(|records| {
        let target = records.iter().position(|r| r.name == name);
        apply_exclusive(records, target);
        target.is_some()
    });
    match result {
        Ok(true) => SelectionChange::Selected,
        Ok(false) => SelectionChange::ClearedNoMatch,
        Err(e) => {
            warn!("Changing selection to '{}' failed: {e}", name);
            SelectionChange::Failed
        }
    }
}

/// Unselects every city. Returns `false` only when the store failed.
pub fn clear_selection(store: &CityStore) -> bool {
    match store.transact(|records| apply_exclusive(records, None)) {
        Ok(()) => true,
        Err(e) => {
            warn!("Clearing selection failed: {e}");
            false
        }
    }
}

/// The selected city, if any.
pub fn get_selected(store: &CityStore) -> Option<CityRecord> {
    match store.list_all() {
        Ok(records) => records.into_iter().find(|r| r.is_selected),
        Err(e) => {
            warn!("Reading the selected city failed: {e}");
            None
        }
    }
}
