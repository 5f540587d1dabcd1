// Copyright 2025 metrika
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Concurrent mapping from counter key to counter cell.
//!
//! Cell values are mutated lock-free; only structural mutation of the key
//! set takes the write lock. The common case (key already exists) holds the
//! read lock just long enough to clone the cell's `Arc`.

use crate::counter::cell::CounterCell;
use crate::counter::key::CounterKey;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A mutation to apply to a counter cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterOp {
    /// Add the value to the cell.
    Increment(i64),
    /// Subtract the value from the cell.
    Decrement(i64),
    /// Replace the cell value.
    Set(i64),
}

/// Thread-safe registry of counter cells, one per distinct key.
///
/// Cells are created lazily on first use and live until the registry is
/// dropped; there is no per-key deletion.
#[derive(Debug, Default)]
pub struct CounterRegistry {
    cells: RwLock<HashMap<CounterKey, Arc<CounterCell>>>,
}

impl CounterRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            cells: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cell for `key`, creating it if absent.
    ///
    /// Fast path: shared lock, lookup, return. Slow path (first use of a
    /// key): release the shared lock, take the exclusive lock, re-check, and
    /// insert if still absent. Concurrent first-use races resolve to exactly
    /// one cell; the loser gets the winner's.
    pub fn get_or_create(&self, key: &CounterKey) -> Arc<CounterCell> {
        if let Some(cell) = self.read_cells().get(key) {
            return Arc::clone(cell);
        }

        let mut cells = self.write_cells();
        Arc::clone(
            cells
                .entry(key.clone())
                .or_insert_with(|| Arc::new(CounterCell::new())),
        )
    }

    /// Resolves `key` to a cell and applies `op` to it.
    pub fn apply(&self, key: &CounterKey, op: CounterOp) {
        let cell = self.get_or_create(key);
        match op {
            CounterOp::Increment(v) => cell.increment(v),
            CounterOp::Decrement(v) => cell.decrement(v),
            CounterOp::Set(v) => cell.set(v),
        }
    }

    /// Returns a point-in-time copy of the addressing: every key paired with
    /// its cell. Export iteration works on this copy so it never races
    /// structural mutation. Iteration order is unspecified.
    pub fn snapshot(&self) -> Vec<(CounterKey, Arc<CounterCell>)> {
        self.read_cells()
            .iter()
            .map(|(key, cell)| (key.clone(), Arc::clone(cell)))
            .collect()
    }

    /// Zeroes every cell without removing any key.
    pub fn reset_all(&self) {
        for cell in self.read_cells().values() {
            cell.take();
        }
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.read_cells().len()
    }

    /// Whether the registry holds no keys.
    pub fn is_empty(&self) -> bool {
        self.read_cells().is_empty()
    }

    // Poison recovery: a panic in another thread must not take the whole
    // metrics subsystem down with it, so a poisoned lock is used as-is.
    fn read_cells(&self) -> RwLockReadGuard<'_, HashMap<CounterKey, Arc<CounterCell>>> {
        match self.cells.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_cells(&self) -> RwLockWriteGuard<'_, HashMap<CounterKey, Arc<CounterCell>>> {
        match self.cells.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
