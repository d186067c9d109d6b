//! Keyed in-memory read model with duplicate suppression.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chronicle_core::event::Event;
use uuid::Uuid;

/// One entry of a read model.
#[derive(Debug, Clone, PartialEq)]
pub struct Row<V> {
    pub value: V,
    /// Id of the last event applied to this entry.
    pub last_event_id: Uuid,
    /// Global position of that event.
    pub last_position: u64,
}

/// Entries keyed by natural id, each remembering the last event applied.
///
/// An event whose id matches the entry's last event, or whose position is
/// not past it, is ignored; this is what makes at-least-once replay safe.
#[derive(Debug)]
pub struct ReadModel<V> {
    rows: RwLock<HashMap<String, Row<V>>>,
}

impl<V> Default for ReadModel<V> {
    fn default() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
        }
    }
}

impl<V: Clone> ReadModel<V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces the entry for `key` from `event`.
    ///
    /// `build` receives the current value, if any. Returns `false` when the
    /// event was already applied to this entry.
    pub fn upsert<F>(&self, key: &str, event: &Event, build: F) -> bool
    where
        F: FnOnce(Option<&V>) -> V,
    {
        let mut rows = self.write();
        let current = rows.get(key);
        if current.is_some_and(|row| already_applied(row, event)) {
            return false;
        }
        let value = build(current.map(|row| &row.value));
        rows.insert(
            key.to_owned(),
            Row {
                value,
                last_event_id: event.event_id,
                last_position: event.global_position,
            },
        );
        true
    }

    /// Mutates the existing entry for `key`.
    ///
    /// Returns `false` if there is no such entry or the event was already
    /// applied to it.
    pub fn update<F>(&self, key: &str, event: &Event, change: F) -> bool
    where
        F: FnOnce(&mut V),
    {
        let mut rows = self.write();
        let Some(row) = rows.get_mut(key) else {
            return false;
        };
        if already_applied(row, event) {
            return false;
        }
        change(&mut row.value);
        row.last_event_id = event.event_id;
        row.last_position = event.global_position;
        true
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<V> {
        self.read().get(key).map(|row| row.value.clone())
    }

    #[must_use]
    pub fn row(&self, key: &str) -> Option<Row<V>> {
        self.read().get(key).cloned()
    }

    /// All values, in no particular order.
    #[must_use]
    pub fn values(&self) -> Vec<V> {
        self.read().values().map(|row| row.value.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Row<V>>> {
        self.rows.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Row<V>>> {
        self.rows.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn already_applied<V>(row: &Row<V>, event: &Event) -> bool {
    row.last_event_id == event.event_id || event.global_position <= row.last_position
}
