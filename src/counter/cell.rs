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

//! A single counter slot: one signed 64-bit atomic.

use std::sync::atomic::{AtomicI64, Ordering};

/// One mutable counter value, safe for unbounded concurrent callers with no
/// external locking.
///
/// Relaxed ordering is used throughout: counters do not establish
/// happens-before relationships with other memory, and read-modify-write
/// operations on a single atomic are totally ordered regardless.
#[derive(Debug, Default)]
pub struct CounterCell {
    value: AtomicI64,
}

impl CounterCell {
    /// Creates a cell holding zero.
    pub fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
        }
    }

    /// Adds `v` to the cell.
    pub fn increment(&self, v: i64) {
        self.value.fetch_add(v, Ordering::Relaxed);
    }

    /// Subtracts `v` from the cell.
    pub fn decrement(&self, v: i64) {
        self.value.fetch_sub(v, Ordering::Relaxed);
    }

    /// Replaces the cell value unconditionally.
    pub fn set(&self, v: i64) {
        self.value.store(v, Ordering::Relaxed);
    }

    /// Returns the current value without mutating it.
    pub fn read(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Returns the current value and resets the cell to zero in one atomic
    /// step. A mutation racing with `take` lands entirely in the returned
    /// value or entirely in the fresh window, never half in each.
    pub fn take(&self) -> i64 {
        self.value.swap(0, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn increment_decrement_set_read() {
        let cell = CounterCell::new();
        assert_eq!(cell.read(), 0);

        cell.increment(5);
        cell.increment(2);
        assert_eq!(cell.read(), 7);

        cell.decrement(3);
        assert_eq!(cell.read(), 4);

        cell.set(-10);
        assert_eq!(cell.read(), -10);
    }

    #[test]
    fn take_returns_value_and_zeroes() {
        let cell = CounterCell::new();
        cell.increment(42);
        assert_eq!(cell.take(), 42);
        assert_eq!(cell.read(), 0);
        assert_eq!(cell.take(), 0);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        const THREADS: usize = 8;
        const PER_THREAD: i64 = 10_000;

        let cell = Arc::new(CounterCell::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let cell = Arc::clone(&cell);
                thread::spawn(move || {
                    for _ in 0..PER_THREAD {
                        cell.increment(1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cell.read(), THREADS as i64 * PER_THREAD);
    }

    #[test]
    fn concurrent_takes_partition_updates() {
        // Increments racing with takes must be counted exactly once: either
        // by some take or in the final residue.
        const PER_THREAD: i64 = 50_000;

        let cell = Arc::new(CounterCell::new());
        let writer = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    cell.increment(1);
                }
            })
        };
        let reaper = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                let mut harvested = 0;
                for _ in 0..1_000 {
                    harvested += cell.take();
                }
                harvested
            })
        };

        writer.join().unwrap();
        let harvested = reaper.join().unwrap();
        assert_eq!(harvested + cell.read(), PER_THREAD);
    }
}
