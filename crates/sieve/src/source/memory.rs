//! In-memory row source.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::data::{Row, RowId};
use crate::error::{Result, SieveError};
use crate::rules::RowFn;
use crate::validation::RowAlerts;

use super::{RemovalResult, RowBatches, RowSource, Scope};

#[derive(Default)]
struct Stored {
    fingerprint: String,
    alerts: Vec<RowAlerts>,
}

/// Rows held in memory, with an optional filter and stored alerts.
///
/// Every row or filter change bumps the data version and drops stored alerts.
/// Call counters make the engine's access pattern observable.
#[derive(Default)]
pub struct MemoryRowSource {
    rows: RwLock<Vec<Row>>,
    filter: RwLock<Option<RowFn>>,
    alerts: RwLock<HashMap<Scope, Stored>>,
    locked: RwLock<HashSet<RowId>>,
    stream_error: RwLock<Option<String>>,
    version: AtomicU64,
    stream_calls: AtomicUsize,
    alert_writes: AtomicUsize,
    removal_calls: AtomicUsize,
}

impl MemoryRowSource {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: RwLock::new(rows),
            ..Self::default()
        }
    }

    /// Restrict the `Filtered` scope to rows matching `filter`.
    pub fn with_filter<F>(self, filter: F) -> Self
    where
        F: Fn(&Row) -> bool + Send + Sync + 'static,
    {
        self.set_filter(Some(Arc::new(filter)));
        self
    }

    pub fn set_filter(&self, filter: Option<RowFn>) {
        *self.filter.write().unwrap_or_else(PoisonError::into_inner) = filter;
        self.version.fetch_add(1, Ordering::SeqCst);
        self.clear_alerts_for(Scope::Filtered);
    }

    /// Rows that refuse removal.
    pub fn lock_rows<I: IntoIterator<Item = RowId>>(&self, ids: I) {
        self.locked
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(ids);
    }

    /// Make subsequent streaming fail with a scope resolution error.
    pub fn set_stream_error(&self, message: Option<String>) {
        *self.stream_error.write().unwrap_or_else(PoisonError::into_inner) = message;
    }

    /// Replace all rows. Stored alerts are dropped.
    pub fn replace_rows(&self, rows: Vec<Row>) {
        *self.rows.write().unwrap_or_else(PoisonError::into_inner) = rows;
        self.data_changed();
    }

    /// Append a row. Stored alerts are dropped.
    pub fn push_row(&self, row: Row) {
        self.rows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(row);
        self.data_changed();
    }

    /// Snapshot of all rows in order.
    pub fn rows(&self) -> Vec<Row> {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.rows.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: RowId) -> Option<Row> {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    /// Alerts last written for `scope`.
    pub fn stored_alerts(&self, scope: Scope) -> Vec<RowAlerts> {
        self.alerts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&scope)
            .map(|s| s.alerts.clone())
            .unwrap_or_default()
    }

    /// Alerts last written for one row, across scopes.
    pub fn alerts_for(&self, id: RowId) -> Option<RowAlerts> {
        let alerts = self.alerts.read().unwrap_or_else(PoisonError::into_inner);
        [Scope::Whole, Scope::Filtered]
            .iter()
            .filter_map(|scope| alerts.get(scope))
            .flat_map(|s| s.alerts.iter())
            .find(|a| a.row_id == id)
            .cloned()
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn alert_writes(&self) -> usize {
        self.alert_writes.load(Ordering::SeqCst)
    }

    pub fn removal_calls(&self) -> usize {
        self.removal_calls.load(Ordering::SeqCst)
    }

    fn scoped_rows(&self, scope: Scope) -> Vec<Row> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        let filter = self.filter.read().unwrap_or_else(PoisonError::into_inner);
        match (scope, filter.as_ref()) {
            (Scope::Filtered, Some(keep)) => rows.iter().filter(|r| keep(r)).cloned().collect(),
            _ => rows.clone(),
        }
    }

    fn clear_alerts_for(&self, scope: Scope) {
        self.alerts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&scope);
    }

    fn data_changed(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
        self.alerts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl std::fmt::Debug for MemoryRowSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRowSource")
            .field("rows", &self.len())
            .field("has_filter", &self.has_active_filter())
            .field("stream_calls", &self.stream_calls())
            .finish()
    }
}

#[async_trait]
impl RowSource for MemoryRowSource {
    async fn stream_rows(&self, scope: Scope, batch_size: usize) -> Result<RowBatches> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self
            .stream_error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return Err(SieveError::ScopeResolution {
                scope: scope.label().to_string(),
                message,
            });
        }

        let rows = self.scoped_rows(scope);
        let batch_size = batch_size.max(1);
        let batches: Vec<Vec<Row>> = rows.chunks(batch_size).map(<[Row]>::to_vec).collect();
        debug!(scope = scope.label(), rows = rows.len(), batches = batches.len(), "Streaming rows");
        Ok(Box::new(batches.into_iter().map(Ok)))
    }

    async fn total_rows(&self, scope: Scope) -> Option<usize> {
        if scope == Scope::Filtered && self.has_active_filter() {
            Some(self.scoped_rows(scope).len())
        } else {
            Some(self.len())
        }
    }

    fn has_active_filter(&self) -> bool {
        self.filter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn data_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    async fn write_validation_alerts(
        &self,
        scope: Scope,
        fingerprint: &str,
        alerts: Vec<RowAlerts>,
    ) -> Result<()> {
        self.alert_writes.fetch_add(1, Ordering::SeqCst);
        self.alerts.write().unwrap_or_else(PoisonError::into_inner).insert(
            scope,
            Stored {
                fingerprint: fingerprint.to_string(),
                alerts,
            },
        );
        Ok(())
    }

    async fn has_cached_validation_state(&self, scope: Scope, fingerprint: &str) -> bool {
        self.alerts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&scope)
            .is_some_and(|s| s.fingerprint == fingerprint)
    }

    async fn cached_alerts(&self, scope: Scope) -> Vec<RowAlerts> {
        self.stored_alerts(scope)
    }

    async fn remove_rows(&self, ids: &[RowId]) -> Vec<RemovalResult> {
        self.removal_calls.fetch_add(1, Ordering::SeqCst);
        let locked = self.locked.read().unwrap_or_else(PoisonError::into_inner).clone();
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);

        let mut results = Vec::with_capacity(ids.len());
        for &id in ids {
            if locked.contains(&id) {
                results.push(RemovalResult::failed(id, "row is locked"));
                continue;
            }
            match rows.iter().position(|r| r.id == id) {
                Some(pos) => {
                    rows.remove(pos);
                    results.push(RemovalResult::removed(id));
                }
                None => results.push(RemovalResult::failed(id, "row not found")),
            }
        }
        drop(rows);

        if results.iter().any(|r| r.removed) {
            self.data_changed();
        }
        results
    }
}
