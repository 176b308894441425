use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    validate_date, validate_weight, DeleteOutcome, RecordStore, StoreError, StoreResult,
    WeightRecord,
};
use crate::calendar::YearMonth;

/// In-process [`RecordStore`] with the same ordering guarantees as the SQLite store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
}

#[derive(Debug, Default)]
struct MemoryState {
    initialized: bool,
    index_builds: usize,
    last_id: i64,
    records: BTreeMap<i64, WeightRecord>,
    by_date: BTreeMap<String, BTreeSet<i64>>,
}

impl MemoryState {
    fn push(&mut self, date: String, weight: f64) -> i64 {
        self.last_id += 1;
        let id = self.last_id;
        self.by_date.entry(date.clone()).or_default().insert(id);
        self.records.insert(id, WeightRecord { id, date, weight });
        id
    }

    fn collect<'a>(&self, ids: impl Iterator<Item = &'a i64>) -> Vec<WeightRecord> {
        ids.filter_map(|id| self.records.get(id).cloned()).collect()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails with [`StoreError::StorageUnavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// How many times the date index was built. Stays at one however often `init` runs.
    pub fn index_builds(&self) -> usize {
        self.state.lock().index_builds
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::StorageUnavailable {
                location: ":memory:".into(),
                reason: "store marked unavailable".into(),
            });
        }
        Ok(())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> StoreResult<T> {
        self.check_available()?;
        let mut state = self.state.lock();
        if !state.initialized {
            return Err(StoreError::NotInitialized);
        }
        Ok(f(&mut state))
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn init(&self) -> StoreResult<()> {
        self.check_available()?;
        let mut state = self.state.lock();
        if !state.initialized {
            state.initialized = true;
            state.index_builds += 1;
        }
        Ok(())
    }

    async fn insert(&self, date: &str, weight: f64) -> StoreResult<i64> {
        let date = validate_date(date)?;
        let weight = validate_weight(weight)?;
        self.with_state(|state| state.push(date, weight))
    }

    async fn upsert(&self, date: &str, weight: f64) -> StoreResult<i64> {
        let date = validate_date(date)?;
        let weight = validate_weight(weight)?;
        self.with_state(|state| {
            if let Some(ids) = state.by_date.remove(&date) {
                for id in ids {
                    state.records.remove(&id);
                }
            }
            state.push(date, weight)
        })
    }

    async fn get_by_date(&self, date: &str) -> StoreResult<Vec<WeightRecord>> {
        self.with_state(|state| match state.by_date.get(date) {
            Some(ids) => state.collect(ids.iter()),
            None => Vec::new(),
        })
    }

    async fn get_by_month(&self, month: YearMonth) -> StoreResult<Vec<WeightRecord>> {
        let (from, to) = month.key_range();
        self.with_state(|state| {
            state.collect(
                state
                    .by_date
                    .range(from..to)
                    .flat_map(|(_, ids)| ids.iter()),
            )
        })
    }

    async fn get_all(&self) -> StoreResult<Vec<WeightRecord>> {
        self.with_state(|state| state.collect(state.by_date.values().flatten()))
    }

    async fn delete_by_id(&self, id: i64) -> StoreResult<DeleteOutcome> {
        self.with_state(|state| match state.records.remove(&id) {
            Some(record) => {
                if let Some(ids) = state.by_date.get_mut(&record.date) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        state.by_date.remove(&record.date);
                    }
                }
                DeleteOutcome::Deleted
            }
            None => DeleteOutcome::NotFound,
        })
    }

    async fn clear_all(&self) -> StoreResult<usize> {
        self.with_state(|state| {
            let cleared = state.records.len();
            state.records.clear();
            state.by_date.clear();
            cleared
        })
    }
}
