use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::Result;
use crate::error::Error;
use crate::mutation::{ColumnList, Durability, Mutation, RowKey, build_mutations};
use crate::store::WriteClient;

/// A row of the in-memory table, cells and counters keyed by (family, qualifier).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    pub cells: BTreeMap<(Bytes, Bytes), Bytes>,
    pub counters: BTreeMap<(Bytes, Bytes), i64>,
}

impl Row {
    pub fn cell(&self, family: &str, qualifier: &str) -> Option<Bytes> {
        self.cells.get(&cell_key(family, qualifier)).cloned()
    }

    pub fn counter(&self, family: &str, qualifier: &str) -> Option<i64> {
        self.counters.get(&cell_key(family, qualifier)).copied()
    }
}

fn cell_key(family: &str, qualifier: &str) -> (Bytes, Bytes) {
    (
        Bytes::copy_from_slice(family.as_bytes()),
        Bytes::copy_from_slice(qualifier.as_bytes()),
    )
}

#[derive(Debug, Default)]
struct TableState {
    rows: BTreeMap<RowKey, Row>,
    /// every successfully committed batch, in commit order.
    commits: Vec<Vec<Mutation>>,
}

/// Controls failures of the [MemoryStore]. Each call to `fail_*` makes the next `n` matching
/// operations fail.
#[derive(Debug, Clone, Default)]
pub struct StoreErrorInjector {
    commits: Arc<AtomicUsize>,
    constructs: Arc<AtomicUsize>,
}

impl StoreErrorInjector {
    pub fn fail_commits(&self, n: usize) {
        self.commits.store(n, Ordering::SeqCst);
    }

    pub fn fail_constructs(&self, n: usize) {
        self.constructs.store(n, Ordering::SeqCst);
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// In-memory table. Clones share the same table, so a test can keep a handle while the sink owns
/// another one.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    table: Arc<str>,
    state: Arc<Mutex<TableState>>,
    injector: StoreErrorInjector,
}

impl MemoryStore {
    pub fn new(table: &str) -> Self {
        Self {
            table: Arc::from(table),
            state: Arc::new(Mutex::new(TableState::default())),
            injector: StoreErrorInjector::default(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn error_injector(&self) -> &StoreErrorInjector {
        &self.injector
    }

    pub fn row(&self, row_key: &RowKey) -> Option<Row> {
        self.state.lock().rows.get(row_key).cloned()
    }

    pub fn row_count(&self) -> usize {
        self.state.lock().rows.len()
    }

    /// Batches committed so far, oldest first.
    pub fn commits(&self) -> Vec<Vec<Mutation>> {
        self.state.lock().commits.clone()
    }

    fn apply(rows: &mut BTreeMap<RowKey, Row>, mutation: &Mutation) -> Result<()> {
        match mutation {
            Mutation::Put { row, columns, .. } => {
                let entry = rows.entry(row.clone()).or_default();
                for column in columns {
                    entry.cells.insert(
                        (column.family.clone(), column.qualifier.clone()),
                        column.value.clone(),
                    );
                }
            }
            Mutation::Increment { row, counters, .. } => {
                let entry = rows.entry(row.clone()).or_default();
                for counter in counters {
                    let current = entry
                        .counters
                        .entry((counter.family.clone(), counter.qualifier.clone()))
                        .or_insert(0);
                    *current = current.checked_add(counter.increment).ok_or_else(|| {
                        Error::Commit(format!(
                            "counter {}:{} overflows on row {}",
                            String::from_utf8_lossy(&counter.family),
                            String::from_utf8_lossy(&counter.qualifier),
                            String::from_utf8_lossy(row)
                        ))
                    })?;
                }
            }
            Mutation::Delete { row, columns, .. } => {
                if let Some(entry) = rows.get_mut(row) {
                    for column in columns {
                        let key = (column.family.clone(), column.qualifier.clone());
                        entry.cells.remove(&key);
                        entry.counters.remove(&key);
                    }
                    if entry.cells.is_empty() && entry.counters.is_empty() {
                        rows.remove(row);
                    }
                }
            }
        }
        Ok(())
    }
}

impl WriteClient for MemoryStore {
    fn construct_mutations(
        &self,
        row_key: &RowKey,
        cols: &ColumnList,
        durability: Durability,
    ) -> Result<Vec<Mutation>> {
        if StoreErrorInjector::take(&self.injector.constructs) {
            return Err(Error::Mutation("injected construct failure".to_string()));
        }
        build_mutations(row_key, cols, durability)
    }

    async fn batch_mutate(&mut self, mutations: &[Mutation]) -> Result<()> {
        if StoreErrorInjector::take(&self.injector.commits) {
            return Err(Error::Commit(format!(
                "injected commit failure on table {}",
                self.table
            )));
        }

        let mut state = self.state.lock();
        // stage on a copy so a failing mutation leaves the table untouched
        let mut staged = state.rows.clone();
        for mutation in mutations {
            Self::apply(&mut staged, mutation)?;
        }
        state.rows = staged;
        state.commits.push(mutations.to_vec());
        Ok(())
    }
}
