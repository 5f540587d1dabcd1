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

//! Read-only process memory and thread introspection via `sysinfo`.

use std::sync::Mutex;
use sysinfo::{ProcessesToUpdate, System};

/// Snapshot of the current process's memory footprint and thread count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessStats {
    /// Resident set size in bytes.
    pub resident_bytes: u64,
    /// Virtual memory size in bytes.
    pub virtual_bytes: u64,
    /// System-wide swap in use, in bytes.
    pub swap_used_bytes: u64,
    /// System memory still available, in bytes.
    pub available_bytes: u64,
    /// Live OS threads in this process, where the platform exposes it.
    pub thread_count: Option<u64>,
}

/// Stateful sampler for [`ProcessStats`].
///
/// Holds the `sysinfo` system handle across samples so repeated polling only
/// refreshes what the snapshot needs.
#[derive(Debug)]
pub struct ProcessStatsSource {
    system: Mutex<System>,
}

impl ProcessStatsSource {
    /// Creates a sampler for the current process.
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// Polls the platform and returns a fresh snapshot. Returns zeroed stats
    /// if the current process cannot be resolved.
    pub fn sample(&self) -> ProcessStats {
        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        system.refresh_memory();

        let mut stats = ProcessStats {
            swap_used_bytes: system.used_swap(),
            available_bytes: system.available_memory(),
            ..ProcessStats::default()
        };

        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => pid,
            Err(e) => {
                log::warn!("cannot resolve current process id: {e}");
                return stats;
            }
        };
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

        if let Some(process) = system.process(pid) {
            stats.resident_bytes = process.memory();
            stats.virtual_bytes = process.virtual_memory();
            #[cfg(any(target_os = "linux", target_os = "android"))]
            {
                stats.thread_count = process.tasks().map(|tasks| tasks.len() as u64);
            }
        } else {
            log::warn!("current process {pid} not visible to sysinfo");
        }

        stats
    }
}

impl Default for ProcessStatsSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_reports_own_process() {
        let source = ProcessStatsSource::new();
        let stats = source.sample();

        // A running test binary has a nonzero footprint.
        assert!(stats.resident_bytes > 0);
        assert!(stats.virtual_bytes >= stats.resident_bytes);
    }

    #[test]
    fn repeated_samples_share_the_handle() {
        let source = ProcessStatsSource::new();
        let first = source.sample();
        let second = source.sample();
        assert!(first.resident_bytes > 0);
        assert!(second.resident_bytes > 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn thread_count_available_on_linux() {
        let source = ProcessStatsSource::new();
        let stats = source.sample();
        assert!(stats.thread_count.unwrap_or(0) >= 1);
    }
}
