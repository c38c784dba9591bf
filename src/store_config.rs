//! Location and tuning of the shared store.
//!
//! Both the app and the widget extension build the same [`StoreConfig`]
//! (usually from the same JSON the host hands over) so they open the same
//! LMDB environment under the shared group directory.

use std::path::PathBuf;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::app_response::AppResponse;

pub const DEFAULT_GROUP_IDENTIFIER: &str = "group.com.weather.app";
pub const DEFAULT_MAP_SIZE_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_TIMELINE_CADENCE_MINUTES: i64 = 15;
pub const DEFAULT_INTENT_BUDGET_MS: u64 = 5_000;
/// One day. Hosts refresh at least that often anyway.
pub const MAX_TIMELINE_CADENCE_MINUTES: i64 = 24 * 60;
pub const MAX_INTENT_BUDGET_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    /// Shared namespace every process opens, e.g. an app group id.
    pub group_identifier: String,
    /// Directory the group container lives in.
    pub root_dir: PathBuf,
    pub map_size_bytes: usize,
    pub timeline_cadence_minutes: i64,
    pub intent_budget_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            group_identifier: DEFAULT_GROUP_IDENTIFIER.to_string(),
            root_dir: PathBuf::from("."),
            map_size_bytes: DEFAULT_MAP_SIZE_BYTES,
            timeline_cadence_minutes: DEFAULT_TIMELINE_CADENCE_MINUTES,
            intent_budget_ms: DEFAULT_INTENT_BUDGET_MS,
        }
    }
}

impl StoreConfig {
    /// Config rooted at `root_dir` with every other field defaulted.
    pub fn in_dir(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    /// Parses the JSON the host passes across the FFI boundary. Missing
    /// fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, AppResponse> {
        let config: StoreConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppResponse> {
        if self.group_identifier.trim().is_empty() {
            return Err(AppResponse::BadRequest("groupIdentifier must not be empty".to_string()));
        }
        if self.group_identifier.contains(['/', '\\', '\0']) {
            return Err(AppResponse::BadRequest(format!(
                "groupIdentifier '{}' contains path separators",
                self.group_identifier
            )));
        }
        if self.map_size_bytes == 0 {
            return Err(AppResponse::BadRequest("mapSizeBytes must be positive".to_string()));
        }
        if !(1..=MAX_TIMELINE_CADENCE_MINUTES).contains(&self.timeline_cadence_minutes) {
            return Err(AppResponse::BadRequest(format!(
                "timelineCadenceMinutes must be between 1 and {MAX_TIMELINE_CADENCE_MINUTES}, got {}",
                self.timeline_cadence_minutes
            )));
        }
        if !(1..=MAX_INTENT_BUDGET_MS).contains(&self.intent_budget_ms) {
            return Err(AppResponse::BadRequest(format!(
                "intentBudgetMs must be between 1 and {MAX_INTENT_BUDGET_MS}, got {}",
                self.intent_budget_ms
            )));
        }
        Ok(())
    }

    /// Directory holding the LMDB data and lock files.
    pub fn store_path(&self) -> PathBuf {
        self.root_dir.join(format!("{}.lmdb", self.group_identifier))
    }

    /// The configured cadence, or the default one when the value is out of
    /// range (a config built in code skips `validate`).
    pub fn timeline_cadence(&self) -> Duration {
        let minutes = if (1..=MAX_TIMELINE_CADENCE_MINUTES).contains(&self.timeline_cadence_minutes) {
            self.timeline_cadence_minutes
        } else {
            DEFAULT_TIMELINE_CADENCE_MINUTES
        };
        Duration::try_minutes(minutes).unwrap_or_else(default_cadence)
    }

    pub fn intent_budget(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.intent_budget_ms)
    }
}

pub(crate) fn default_cadence() -> Duration {
    Duration::minutes(DEFAULT_TIMELINE_CADENCE_MINUTES)
}
