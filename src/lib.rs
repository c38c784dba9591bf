//! # Weather Widget Core
//!
//! Storage and selection core shared by a weather app and its home-screen
//! widget. Both processes link this library and open the same LMDB store
//! under a shared group directory; the widget side also runs the remote
//! intents ("refresh selected city", "change city") and builds the timeline
//! the widget renders.
//!
//! ## Modules
//!
//! - [`city_record`]: the persisted [`CityRecord`](city_record::CityRecord),
//!   creation input and weather condition labels
//! - [`city_store`]: LMDB persistence, one write transaction per mutation
//! - [`selection`]: the at-most-one-selected rule
//! - [`refresh`]: bounded metric refresh behind a [`WeatherSource`](refresh::WeatherSource)
//! - [`snapshot`]: snapshot ladder, timelines and per-size widget content
//! - [`intents`]: widget-triggered actions with their own store connection
//!
//! ## FFI Functions
//!
//! Every function returns a JSON-serialized [`AppResponse`] as a C string
//! that must be released with [`free_response`].
//!
//! - [`create_store`] / [`close_store`] - open and release the app's connection
//! - [`add_city`], [`list_cities`], [`get_city`], [`delete_city`], [`clear_all_cities`]
//! - [`select_city`], [`clear_selection`], [`get_selected_city`]
//! - [`refresh_all_cities`]
//! - [`widget_timeline`] - snapshot for a widget size, on its own connection
//! - [`perform_refresh_intent`], [`perform_change_city_intent`]

pub mod app_response;
pub mod city_record;
pub mod city_store;
pub mod intents;
pub mod refresh;
pub mod selection;
pub mod snapshot;
pub mod store_config;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use chrono::Utc;
use log::{info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::app_response::AppResponse;
use crate::city_record::NewCity;
use crate::city_store::CityStore;
use crate::intents::{ChangeCityIntent, RefreshSelectedIntent};
use crate::refresh::{refresh_all, RefreshRanges, SimulatedWeather};
use crate::selection::SelectionChange;
use crate::snapshot::{ReloadSignal, SnapshotProvider, WidgetContent, WidgetFamily};
use crate::store_config::StoreConfig;

/// Opens the shared store for the calling process.
///
/// Every store opened in one process for the same directory shares a single
/// LMDB environment, so the app may keep this handle while the widget and
/// intent functions open their own.
///
/// # Parameters
///
/// * `config_json` - JSON [`StoreConfig`]; missing fields take their defaults
///   and an empty string means all defaults
///
/// # Returns
///
/// A pointer to the [`CityStore`] on success, or null if the pointer is null,
/// the JSON is invalid, or the store cannot be opened. The app treats null as
/// fatal at startup.
///
/// # Safety
///
/// `config_json` must be null or a valid null-terminated string. The returned
/// pointer is owned by the caller and must be released exactly once with
/// [`close_store`].
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn create_store(config_json: *const c_char) -> *mut CityStore {
    let config = match config_from_ptr(config_json) {
        Ok(config) => config,
        Err(e) => {
            warn!("create_store rejected its configuration: {e}");
            return std::ptr::null_mut();
        }
    };

    info!("Opening city store at: {}", config.store_path().display());

    match CityStore::init(&config) {
        Ok(store) => Box::into_raw(Box::new(store)),
        Err(e) => {
            warn!("Failed to open city store: {e}");
            warn!("Attempted path: {}", config.store_path().display());
            std::ptr::null_mut()
        }
    }
}

/// Adds a city from a JSON [`NewCity`].
///
/// ```json
/// {"name": "Ankara", "country": "Türkiye", "temperature": 18,
///  "condition": "Bulutlu", "humidity": 55, "windSpeed": 12}
/// ```
///
/// # Parameters
///
/// * `state` - Store pointer returned by [`create_store`]
/// * `json_ptr` - Null-terminated JSON of the new city; omitted fields take
///   the add-form defaults
///
/// # Returns
///
/// `Ok` with the stored record (new id, timestamp, not selected),
/// `SerializationError` for malformed JSON, `ValidationError` when the name or
/// country is blank or a value is outside the add-form bounds, or
/// `BadRequest` for null pointers.
///
/// # Safety
///
/// `state` must be null or a pointer from [`create_store`] that has not been
/// passed to [`close_store`]. The returned string must be released with
/// [`free_response`].
///
/// `json_ptr` must be null or a valid null-terminated string.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn add_city(state: *mut CityStore, json_ptr: *const c_char) -> *const c_char {
    let store = match store_from_ptr(state, "add_city") {
        Ok(store) => store,
        Err(err) => return err,
    };

    let json_str = match c_ptr_to_string(json_ptr, "JSON") {
        Ok(json) => json,
        Err(err) => return err,
    };

    let input: NewCity = match serde_json::from_str(&json_str) {
        Ok(input) => input,
        Err(e) => {
            let error = AppResponse::SerializationError(format!("Invalid JSON: {e}"));
            return response_to_c_string(&error);
        }
    };

    match store.insert(input) {
        Ok(record) => ok_json(&record),
        Err(e) => response_to_c_string(&e),
    }
}

/// Lists every city in insertion order.
///
/// # Parameters
///
/// * `state` - Store pointer returned by [`create_store`]
///
/// # Returns
///
/// `Ok` with a JSON array of records, `DatabaseError` if the store cannot be
/// read, or `BadRequest` for a null `state`.
///
/// # Safety
///
/// `state` must be null or a pointer from [`create_store`] that has not been
/// passed to [`close_store`]. The returned string must be released with
/// [`free_response`].
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn list_cities(state: *mut CityStore) -> *const c_char {
    let store = match store_from_ptr(state, "list_cities") {
        Ok(store) => store,
        Err(err) => return err,
    };

    match store.list_all() {
        Ok(records) => ok_json(&records),
        Err(e) => response_to_c_string(&e),
    }
}

/// Fetches one city by id.
///
/// # Parameters
///
/// * `state` - Store pointer returned by [`create_store`]
/// * `id` - Null-terminated hyphenated UUID of the city
///
/// # Returns
///
/// `Ok` with the record, `NotFound` for an unknown id, or `BadRequest` for a
/// null pointer or malformed id.
///
/// # Safety
///
/// `state` must be null or a pointer from [`create_store`] that has not been
/// passed to [`close_store`]. The returned string must be released with
/// [`free_response`].
///
/// `id` must be null or a valid null-terminated string.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_city(state: *mut CityStore, id: *const c_char) -> *const c_char {
    let store = match store_from_ptr(state, "get_city") {
        Ok(store) => store,
        Err(err) => return err,
    };
    let id = match uuid_from_ptr(id) {
        Ok(id) => id,
        Err(err) => return err,
    };

    match store.get_by_id(&id) {
        Ok(Some(record)) => ok_json(&record),
        Ok(None) => response_to_c_string(&AppResponse::NotFound(format!("No city with id: {id}"))),
        Err(e) => response_to_c_string(&e),
    }
}

/// Deletes one city. Deleting the selected city leaves no selection.
///
/// # Parameters
///
/// * `state` - Store pointer returned by [`create_store`]
/// * `id` - Null-terminated hyphenated UUID of the city
///
/// # Returns
///
/// `Ok` once removed, `NotFound` for an unknown id, or `BadRequest` for a
/// null pointer or malformed id.
///
/// # Safety
///
/// `state` must be null or a pointer from [`create_store`] that has not been
/// passed to [`close_store`]. The returned string must be released with
/// [`free_response`].
///
/// `id` must be null or a valid null-terminated string.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn delete_city(state: *mut CityStore, id: *const c_char) -> *const c_char {
    let store = match store_from_ptr(state, "delete_city") {
        Ok(store) => store,
        Err(err) => return err,
    };
    let id = match uuid_from_ptr(id) {
        Ok(id) => id,
        Err(err) => return err,
    };

    match store.delete(&id) {
        Ok(true) => response_to_c_string(&AppResponse::success("City deleted successfully")),
        Ok(false) => response_to_c_string(&AppResponse::NotFound(format!("No city with id: {id}"))),
        Err(e) => response_to_c_string(&e),
    }
}

/// Removes every city.
///
/// # Parameters
///
/// * `state` - Store pointer returned by [`create_store`]
///
/// # Returns
///
/// `Ok` with the number of cities removed, or `DatabaseError` if the write
/// fails.
///
/// # Safety
///
/// `state` must be null or a pointer from [`create_store`] that has not been
/// passed to [`close_store`]. The returned string must be released with
/// [`free_response`].
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn clear_all_cities(state: *mut CityStore) -> *const c_char {
    let store = match store_from_ptr(state, "clear_all_cities") {
        Ok(store) => store,
        Err(err) => return err,
    };

    match store.clear_all_records() {
        Ok(count) => response_to_c_string(&AppResponse::Ok(format!("{count} cities cleared"))),
        Err(e) => response_to_c_string(&e),
    }
}

/// Makes the city with `id` the widget's city, clearing every other flag in
/// the same commit.
///
/// # Parameters
///
/// * `state` - Store pointer returned by [`create_store`]
/// * `id` - Null-terminated hyphenated UUID of the city
///
/// # Returns
///
/// `Ok` both when the city was selected and when the id is unknown (nothing
/// stays selected then), `DatabaseError` if the selection could not be
/// stored, or `BadRequest` for a null pointer or malformed id.
///
/// # Safety
///
/// `state` must be null or a pointer from [`create_store`] that has not been
/// passed to [`close_store`]. The returned string must be released with
/// [`free_response`].
///
/// `id` must be null or a valid null-terminated string.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn select_city(state: *mut CityStore, id: *const c_char) -> *const c_char {
    let store = match store_from_ptr(state, "select_city") {
        Ok(store) => store,
        Err(err) => return err,
    };
    let id = match uuid_from_ptr(id) {
        Ok(id) => id,
        Err(err) => return err,
    };

    let response = match selection::select_city(store, &id) {
        SelectionChange::Selected => AppResponse::success(format!("City {id} selected")),
        SelectionChange::ClearedNoMatch | SelectionChange::Unchanged => {
            AppResponse::success("No matching city; selection cleared")
        }
        SelectionChange::Failed => {
            AppResponse::DatabaseError("Selection could not be stored".to_string())
        }
    };
    response_to_c_string(&response)
}

/// Clears the selection so no city is shown by the widget.
///
/// # Parameters
///
/// * `state` - Store pointer returned by [`create_store`]
///
/// # Returns
///
/// `Ok` once no city is selected, or `DatabaseError` if the write fails.
///
/// # Safety
///
/// `state` must be null or a pointer from [`create_store`] that has not been
/// passed to [`close_store`]. The returned string must be released with
/// [`free_response`].
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn clear_selection(state: *mut CityStore) -> *const c_char {
    let store = match store_from_ptr(state, "clear_selection") {
        Ok(store) => store,
        Err(err) => return err,
    };

    if selection::clear_selection(store) {
        response_to_c_string(&AppResponse::success("Selection cleared"))
    } else {
        response_to_c_string(&AppResponse::DatabaseError("Selection could not be cleared".to_string()))
    }
}

/// Returns the selected city.
///
/// # Parameters
///
/// * `state` - Store pointer returned by [`create_store`]
///
/// # Returns
///
/// `Ok` with the record, or `NotFound` when no city is selected.
///
/// # Safety
///
/// `state` must be null or a pointer from [`create_store`] that has not been
/// passed to [`close_store`]. The returned string must be released with
/// [`free_response`].
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_selected_city(state: *mut CityStore) -> *const c_char {
    let store = match store_from_ptr(state, "get_selected_city") {
        Ok(store) => store,
        Err(err) => return err,
    };

    match selection::get_selected(store) {
        Some(record) => ok_json(&record),
        None => response_to_c_string(&AppResponse::NotFound("No city selected".to_string())),
    }
}

/// Re-rolls the weather of every city in one commit.
///
/// # Parameters
///
/// * `state` - Store pointer returned by [`create_store`]
///
/// # Returns
///
/// `Ok` with the number of cities refreshed, or `DatabaseError` if the write
/// fails.
///
/// # Safety
///
/// `state` must be null or a pointer from [`create_store`] that has not been
/// passed to [`close_store`]. The returned string must be released with
/// [`free_response`].
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn refresh_all_cities(state: *mut CityStore) -> *const c_char {
    let store = match store_from_ptr(state, "refresh_all_cities") {
        Ok(store) => store,
        Err(err) => return err,
    };

    let mut source = SimulatedWeather::new();
    match refresh_all(store, &mut source, &RefreshRanges::default()) {
        Ok(count) => response_to_c_string(&AppResponse::Ok(format!("{count} cities refreshed"))),
        Err(e) => response_to_c_string(&e),
    }
}

/// Flushes and releases a store returned by [`create_store`].
///
/// The shared environment stays open while other stores in the process
/// still use it.
///
/// # Parameters
///
/// * `state` - Store pointer returned by [`create_store`]
///
/// # Returns
///
/// `Ok` once closed, `DatabaseError` if the final flush fails (the handle is
/// released either way), or `BadRequest` for a null pointer.
///
/// # Safety
///
/// `state` must be null or a pointer from [`create_store`] that has not been
/// closed yet. It must not be used after this call.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn close_store(state: *mut CityStore) -> *const c_char {
    if state.is_null() {
        let error = AppResponse::BadRequest("Null state pointer passed to close_store".to_string());
        return response_to_c_string(&error);
    }

    let store = *unsafe { Box::from_raw(state) };
    match store.close() {
        Ok(()) => response_to_c_string(&AppResponse::success("Store closed successfully")),
        Err(e) => response_to_c_string(&e),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WidgetTimelineResponse {
    timeline: snapshot::Timeline,
    content: WidgetContent,
}

/// Builds the widget timeline on its own store connection.
///
/// # Parameters
///
/// * `config_json` - JSON [`StoreConfig`] naming the shared store; empty means
///   all defaults
/// * `family` - `"small"`, `"medium"` or `"large"`; null or unknown values
///   mean small
///
/// # Returns
///
/// `Ok` with `{"timeline": ..., "content": ...}`. An unreadable store renders
/// as the "no cities" placeholder. Only a null or invalid config gives
/// `BadRequest`.
///
/// # Safety
///
/// Both pointers must be null or valid null-terminated strings. The returned
/// string must be released with [`free_response`].
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn widget_timeline(config_json: *const c_char, family: *const c_char) -> *const c_char {
    let config = match config_from_ptr(config_json) {
        Ok(config) => config,
        Err(e) => return response_to_c_string(&e),
    };
    let family = c_str_lossy(family)
        .map(|name| WidgetFamily::parse(&name))
        .unwrap_or(WidgetFamily::Small);

    let provider = SnapshotProvider::new(config, ReloadSignal::new());
    let timeline = provider.timeline(Utc::now());
    let content = timeline
        .entries
        .first()
        .map(|entry| WidgetContent::render(&entry.snapshot, family))
        .unwrap_or_else(|| WidgetContent::render(&snapshot::Snapshot::NoCities, family));

    ok_json(&WidgetTimelineResponse { timeline, content })
}

/// Widget button: refresh the selected city.
///
/// # Parameters
///
/// * `config_json` - JSON [`StoreConfig`] naming the shared store
///
/// # Returns
///
/// Always `Ok` with an [`intents::IntentResult`]. A bad config, a missing
/// selection, or an elapsed budget shows up as `applied: false`.
///
/// # Safety
///
/// `config_json` must be null or a valid null-terminated string. The returned
/// string must be released with [`free_response`].
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn perform_refresh_intent(config_json: *const c_char) -> *const c_char {
    let signal = ReloadSignal::new();
    let result = match config_from_ptr(config_json) {
        Ok(config) => RefreshSelectedIntent::default().perform(&config, &*signal),
        Err(e) => {
            warn!("perform_refresh_intent ignored: {e}");
            intents::IntentResult {
                intent: RefreshSelectedIntent::NAME.to_string(),
                applied: false,
                timed_out: false,
                reload_requested: false,
            }
        }
    };
    ok_json(&result)
}

/// Widget action: show the first city named `name`.
///
/// # Parameters
///
/// * `config_json` - JSON [`StoreConfig`] naming the shared store
/// * `name` - Null-terminated city name, matched exactly
///
/// # Returns
///
/// Always `Ok` with an [`intents::IntentResult`]. An unknown name still
/// clears the selection and counts as applied.
///
/// # Safety
///
/// Both pointers must be null or valid null-terminated strings. The returned
/// string must be released with [`free_response`].
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn perform_change_city_intent(
    config_json: *const c_char,
    name: *const c_char,
) -> *const c_char {
    let signal = ReloadSignal::new();
    let parsed = config_from_ptr(config_json).and_then(|config| {
        c_str_lossy(name)
            .map(|name| (config, name))
            .ok_or_else(|| AppResponse::BadRequest("Null city name pointer".to_string()))
    });
    let result = match parsed {
        Ok((config, name)) => ChangeCityIntent::new(name).perform(&config, &*signal),
        Err(e) => {
            warn!("perform_change_city_intent ignored: {e}");
            intents::IntentResult {
                intent: ChangeCityIntent::NAME.to_string(),
                applied: false,
                timed_out: false,
                reload_requested: false,
            }
        }
    };
    ok_json(&result)
}

/// Releases a string returned by any function in this library.
///
/// # Parameters
///
/// * `ptr` - String returned by this library; null is ignored
///
/// # Safety
///
/// `ptr` must come from this library and must not be freed twice or used
/// afterwards.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn free_response(ptr: *const c_char) {
    if ptr.is_null() {
        return;
    }
    unsafe {
        drop(CString::from_raw(ptr as *mut c_char));
    }
}

fn store_from_ptr<'a>(state: *mut CityStore, caller: &str) -> Result<&'a CityStore, *const c_char> {
    match unsafe { state.as_ref() } {
        Some(store) => Ok(store),
        None => {
            let error = AppResponse::BadRequest(format!("Null state pointer passed to {caller}"));
            Err(response_to_c_string(&error))
        }
    }
}

fn uuid_from_ptr(ptr: *const c_char) -> Result<Uuid, *const c_char> {
    let id = c_ptr_to_string(ptr, "id")?;
    Uuid::parse_str(id.trim()).map_err(|e| {
        let error = AppResponse::BadRequest(format!("Invalid city id '{id}': {e}"));
        response_to_c_string(&error)
    })
}

/// Reads an optional C string without building an error response.
fn c_str_lossy(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

/// A null pointer is rejected; an empty string means "all defaults".
fn config_from_ptr(ptr: *const c_char) -> Result<StoreConfig, AppResponse> {
    if ptr.is_null() {
        return Err(AppResponse::BadRequest("Null config pointer".to_string()));
    }
    let json = unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|e| AppResponse::BadRequest(format!("Invalid UTF-8 in config: {e}")))?;
    if json.trim().is_empty() {
        return Ok(StoreConfig::default());
    }
    StoreConfig::from_json(json)
}

fn ok_json<T: Serialize>(value: &T) -> *const c_char {
    match serde_json::to_string(value) {
        Ok(json) => response_to_c_string(&AppResponse::Ok(json)),
        Err(e) => {
            let error = AppResponse::SerializationError(format!("Failed to serialize result: {e}"));
            response_to_c_string(&error)
        }
    }
}

/// Serializes `response` into a heap C string owned by the caller.
/// Returns null only if serialization itself fails.
fn response_to_c_string(response: &AppResponse) -> *const c_char {
    let json = match serde_json::to_string(response) {
        Ok(j) => j,
        Err(e) => {
            warn!("Error serializing response: {e}");
            return std::ptr::null();
        }
    };

    match CString::new(json) {
        Ok(c_str) => c_str.into_raw(),
        Err(e) => {
            warn!("Error creating CString: {e}");
            std::ptr::null()
        }
    }
}

/// Converts a C string pointer to a Rust `String`. On failure the `Err`
/// holds a ready-to-return `BadRequest` response.
fn c_ptr_to_string(ptr: *const c_char, field_name: &str) -> Result<String, *const c_char> {
    if ptr.is_null() {
        let error = AppResponse::BadRequest(format!("Null {field_name} pointer"));
        return Err(response_to_c_string(&error));
    }

    match unsafe { CStr::from_ptr(ptr).to_str() } {
        Ok(s) => Ok(s.to_string()),
        Err(e) => {
            let error = AppResponse::BadRequest(format!("Invalid UTF-8 in {field_name}: {e}"));
            Err(response_to_c_string(&error))
        }
    }
}
