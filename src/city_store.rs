//! LMDB-backed persistence for [`CityRecord`]s.
//!
//! The environment lives under the shared group directory from
//! [`StoreConfig::store_path`], so the app process and the widget/intent
//! process each open their own [`CityStore`] over the same files. LMDB
//! serializes writers across processes and gives every reader a consistent
//! snapshot; each public mutating call here is exactly one write transaction,
//! which makes it atomic from the caller's side and durable on return.
//!
//! Layout:
//!
//! - `cities`: key = record id (hyphenated UUID), value = JSON
//!   `{"seq": <u64>, "city": <CityRecord>}`. `seq` preserves insertion order
//!   because LMDB itself iterates in key order.
//! - `meta`: `next_seq` = big-endian `u64` sequence counter.
//!
//! LMDB must not open the same environment twice in one process, so every
//! [`CityStore`] for a given directory shares one [`Environment`] through a
//! process-wide registry. The environment closes when its last store drops.

use std::collections::HashMap;
use std::mem::ManuallyDrop;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};

use chrono::Utc;
use lmdb::{Cursor, Database, DatabaseFlags, Environment, RwTransaction, Transaction, WriteFlags};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_response::AppResponse;
use crate::city_record::{CityRecord, NewCity};
use crate::store_config::StoreConfig;

const CITIES_DB: &str = "cities";
const META_DB: &str = "meta";
const NEXT_SEQ_KEY: &str = "next_seq";

#[derive(Debug, Serialize, Deserialize)]
struct StoredCity {
    seq: u64,
    city: CityRecord,
}

/// One open LMDB environment and its database handles.
struct SharedEnv {
    env: Environment,
    cities: Database,
    meta: Database,
}

type EnvRegistry = Mutex<HashMap<PathBuf, Weak<SharedEnv>>>;

static ENVIRONMENTS: OnceLock<EnvRegistry> = OnceLock::new();

fn environments() -> &'static EnvRegistry {
    ENVIRONMENTS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Returns the live environment for `path` or opens it. The registry lock is
/// held while opening, and [`CityStore`]'s `Drop` holds it while releasing,
/// so an environment is never opened while its predecessor is closing.
fn shared_env(path: &Path, config: &StoreConfig) -> Result<Arc<SharedEnv>, AppResponse> {
    let mut registry = environments().lock();
    registry.retain(|_, env| env.strong_count() > 0);
    if let Some(env) = registry.get(path).and_then(Weak::upgrade) {
        debug!("Reusing open environment at {}", path.display());
        return Ok(env);
    }

    let env = Environment::new()
        .set_max_dbs(2)
        .set_map_size(config.map_size_bytes)
        .open(path)?;
    let cities = env.create_db(Some(CITIES_DB), DatabaseFlags::empty())?;
    let meta = env.create_db(Some(META_DB), DatabaseFlags::empty())?;

    let shared = Arc::new(SharedEnv { env, cities, meta });
    registry.insert(path.to_path_buf(), Arc::downgrade(&shared));
    Ok(shared)
}

/// Asked right before each commit; `false` aborts the write.
pub type CommitGate = Arc<dyn Fn() -> bool + Send + Sync>;

/// A connection to the shared city store.
pub struct CityStore {
    shared: ManuallyDrop<Arc<SharedEnv>>,
    cities: Database,
    meta: Database,
    path: PathBuf,
    commit_gate: Option<CommitGate>,
}

impl std::fmt::Debug for CityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CityStore")
            .field("path", &self.path)
            .field("gated", &self.commit_gate.is_some())
            .finish()
    }
}

impl Drop for CityStore {
    fn drop(&mut self) {
        let _registry = environments().lock();
        // SAFETY: `shared` is not touched again after this point.
        unsafe { ManuallyDrop::drop(&mut self.shared) };
    }
}

fn record_key(id: &Uuid) -> String {
    id.hyphenated().to_string()
}

impl CityStore {
    /// Opens (creating if needed) the store described by `config`.
    ///
    /// # Errors
    ///
    /// Fails if the config is invalid, the directory cannot be created, or
    /// LMDB refuses to open the environment.
    pub fn init(config: &StoreConfig) -> Result<Self, AppResponse> {
        config.validate()?;
        std::fs::create_dir_all(config.store_path())?;
        let path = std::fs::canonicalize(config.store_path())?;

        let shared = shared_env(&path, config)?;
        info!("City store opened at {}", path.display());
        Ok(Self {
            cities: shared.cities,
            meta: shared.meta,
            shared: ManuallyDrop::new(shared),
            path,
            commit_gate: None,
        })
    }

    /// Routes every later commit through `gate`. A refused commit is aborted
    /// and reported as a `DatabaseError`.
    pub fn with_commit_gate(mut self, gate: CommitGate) -> Self {
        self.commit_gate = Some(gate);
        self
    }

    /// Canonical directory of the environment.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when both stores sit on the same open environment.
    pub fn shares_environment_with(&self, other: &CityStore) -> bool {
        Arc::ptr_eq(&*self.shared, &*other.shared)
    }

    fn env(&self) -> &Environment {
        &self.shared.env
    }

    fn commit(&self, txn: RwTransaction<'_>) -> Result<(), AppResponse> {
        if let Some(gate) = &self.commit_gate {
            if !gate() {
                txn.abort();
                return Err(AppResponse::DatabaseError(
                    "Write abandoned before commit".to_string(),
                ));
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Every record, in insertion order.
    pub fn list_all(&self) -> Result<Vec<CityRecord>, AppResponse> {
        let txn = self.env().begin_ro_txn()?;
        let stored = self.read_stored(&txn)?;
        txn.commit()?;
        Ok(stored.into_iter().map(|s| s.city).collect())
    }

    pub fn get_by_id(&self, id: &Uuid) -> Result<Option<CityRecord>, AppResponse> {
        let txn = self.env().begin_ro_txn()?;
        let stored = self.read_one(&txn, id)?;
        txn.commit()?;
        Ok(stored.map(|s| s.city))
    }

    /// Validates `input`, assigns an id and creation time, and appends the
    /// record. New records are never selected.
    pub fn insert(&self, input: NewCity) -> Result<CityRecord, AppResponse> {
        input.validate()?;
        let record = CityRecord::create(input, Utc::now());

        let mut txn = self.env().begin_rw_txn()?;
        let seq = self.next_seq(&mut txn)?;
        let stored = StoredCity { seq, city: record };
        self.write_stored(&mut txn, &stored)?;
        self.commit(txn)?;

        debug!("Inserted city {} ({}) at seq {}", stored.city.name, stored.city.id, seq);
        Ok(stored.city)
    }

    /// Overwrites an existing record. Returns `None` when the id is gone,
    /// e.g. because another process deleted it first.
    pub fn put(&self, record: CityRecord) -> Result<Option<CityRecord>, AppResponse> {
        let mut txn = self.env().begin_rw_txn()?;
        let seq = match self.read_one(&txn, &record.id)? {
            Some(existing) => existing.seq,
            None => {
                txn.abort();
                return Ok(None);
            }
        };
        let stored = StoredCity { seq, city: record };
        self.write_stored(&mut txn, &stored)?;
        self.commit(txn)?;
        Ok(Some(stored.city))
    }

    /// Removes a record. `Ok(false)` when no record had that id.
    pub fn delete(&self, id: &Uuid) -> Result<bool, AppResponse> {
        let mut txn = self.env().begin_rw_txn()?;
        match txn.del(self.cities, &record_key(id), None) {
            Ok(()) => {
                self.commit(txn)?;
                debug!("Deleted city {}", id);
                Ok(true)
            }
            Err(lmdb::Error::NotFound) => {
                txn.abort();
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Runs `f` over all records (insertion order) inside one write
    /// transaction and writes back whichever records it changed.
    ///
    /// Records removed by another process before the transaction started are
    /// simply not visited.
    pub fn transact<R>(
        &self,
        f: impl FnOnce(&mut [CityRecord]) -> R,
    ) -> Result<R, AppResponse> {
        let mut txn = self.env().begin_rw_txn()?;
        let stored = self.read_stored(&txn)?;

        let (seqs, originals): (Vec<u64>, Vec<CityRecord>) =
            stored.into_iter().map(|s| (s.seq, s.city)).unzip();
        let mut records = originals.clone();
        let result = f(&mut records);

        let mut written = 0usize;
        for ((seq, before), after) in seqs.into_iter().zip(originals.iter()).zip(records) {
            if *before == after || before.id != after.id {
                continue;
            }
            self.write_stored(&mut txn, &StoredCity { seq, city: after })?;
            written += 1;
        }
        self.commit(txn)?;

        debug!("Store transaction committed, {} record(s) written", written);
        Ok(result)
    }

    /// Deletes every record; returns how many were removed.
    pub fn clear_all_records(&self) -> Result<usize, AppResponse> {
        let mut txn = self.env().begin_rw_txn()?;
        let count = self.read_stored(&txn)?.len();
        txn.clear_db(self.cities)?;
        self.commit(txn)?;
        info!("Cleared {} city record(s)", count);
        Ok(count)
    }

    /// Forces buffered data to disk. Every commit is already durable under
    /// the default environment flags; this is for hosts that want an explicit
    /// flush point before suspending.
    pub fn save(&self) -> Result<(), AppResponse> {
        self.env().sync(true)?;
        Ok(())
    }

    /// Flushes and releases this connection. The environment itself closes
    /// once no other store in the process uses it.
    pub fn close(self) -> Result<(), AppResponse> {
        self.save()?;
        info!("City store at {} closed", self.path.display());
        Ok(())
    }

    fn read_stored<T: Transaction>(&self, txn: &T) -> Result<Vec<StoredCity>, AppResponse> {
        let mut stored = Vec::new();
        {
            let mut cursor = txn.open_ro_cursor(self.cities)?;
            for (key, value) in cursor.iter() {
                match serde_json::from_slice::<StoredCity>(value) {
                    Ok(city) => stored.push(city),
                    Err(e) => warn!(
                        "Skipping unreadable record {}: {e}",
                        String::from_utf8_lossy(key)
                    ),
                }
            }
        }
        stored.sort_by_key(|s| s.seq);
        Ok(stored)
    }

    fn read_one<T: Transaction>(
        &self,
        txn: &T,
        id: &Uuid,
    ) -> Result<Option<StoredCity>, AppResponse> {
        match txn.get(self.cities, &record_key(id)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_stored(&self, txn: &mut RwTransaction, stored: &StoredCity) -> Result<(), AppResponse> {
        let json = serde_json::to_vec(stored)?;
        txn.put(self.cities, &record_key(&stored.city.id), &json, WriteFlags::empty())?;
        Ok(())
    }

    fn next_seq(&self, txn: &mut RwTransaction) -> Result<u64, AppResponse> {
        let current = match txn.get(self.meta, &NEXT_SEQ_KEY) {
            Ok(bytes) => {
                let raw: [u8; 8] = bytes.try_into().map_err(|_| {
                    AppResponse::DatabaseError("Sequence counter is corrupted".to_string())
                })?;
                u64::from_be_bytes(raw)
            }
            Err(lmdb::Error::NotFound) => 0,
            Err(e) => return Err(e.into()),
        };
        txn.put(self.meta, &NEXT_SEQ_KEY, &(current + 1).to_be_bytes(), WriteFlags::empty())?;
        Ok(current)
    }
}
