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

//! Drains counter registries into the two emission sinks.
//!
//! Every export cycle snapshots a registry's key space, converts each cell's
//! value, and forwards `(name, tags, value)` to the log facade and, when
//! configured, the metrics agent. Resettable drains zero each cell as they
//! read it and append process-memory gauges; persistent drains read without
//! zeroing. Emission order across distinct keys is unspecified.

use crate::counter::registry::CounterRegistry;
use crate::export::statsd::AgentSink;
use crate::memory::{ProcessStats, ProcessStatsSource};

/// Routes drained counter values to the logging and agent sinks.
pub struct Exporter {
    agent: Option<Box<dyn AgentSink>>,
    stats: ProcessStatsSource,
}

impl Exporter {
    /// Creates an exporter. `agent` is `None` when the metrics agent is not
    /// configured or its setup failed; emission then degrades to
    /// logging-only.
    pub fn new(agent: Option<Box<dyn AgentSink>>) -> Self {
        Self {
            agent,
            stats: ProcessStatsSource::new(),
        }
    }

    /// Whether the agent half of emission is active.
    pub fn has_agent(&self) -> bool {
        self.agent.is_some()
    }

    /// Drains the resettable registry: each cell is read-and-zeroed, then
    /// process gauges are appended to the cycle.
    pub fn drain_resettable(&self, registry: &CounterRegistry) {
        for (key, cell) in registry.snapshot() {
            let value = cell.take();
            match key.decode() {
                Ok((name, tags)) => self.emit(&name, &tags, value),
                Err(e) => log::error!("skipping undecodable counter key: {e}"),
            }
        }
        self.emit_process_stats();
    }

    /// Reads every persistent cell without zeroing it, so accumulated totals
    /// survive across cycles until an explicit reset.
    pub fn drain_persistent(&self, registry: &CounterRegistry) {
        for (key, cell) in registry.snapshot() {
            let value = cell.read();
            match key.decode() {
                Ok((name, tags)) => self.emit(&name, &tags, value),
                Err(e) => log::error!("skipping undecodable counter key: {e}"),
            }
        }
    }

    /// Emits one triple: always a formatted log line, plus a gauge to the
    /// agent when configured.
    pub fn emit(&self, name: &str, tags: &[String], value: i64) {
        if tags.is_empty() {
            log::info!("{name}: {value}");
        } else {
            log::info!("{name}#{}: {value}", tags.join(","));
        }
        if let Some(agent) = &self.agent {
            agent.gauge(name, tags, value as f64, 1.0);
        }
    }

    fn emit_process_stats(&self) {
        let stats = self.stats.sample();
        self.emit("memusage.resident", &[], stats.resident_bytes as i64);
        self.emit("memusage.virtual", &[], stats.virtual_bytes as i64);
        self.emit("memusage.swapused", &[], stats.swap_used_bytes as i64);
        self.emit("memusage.available", &[], stats.available_bytes as i64);
        if let Some(threads) = stats.thread_count {
            self.emit("threads.live", &[], threads as i64);
        }
    }

    /// One-line process summary for the optional dump task.
    pub(crate) fn log_process_summary(stats: &ProcessStats) {
        log::info!(
            "process: resident {} B, virtual {} B, threads {}",
            stats.resident_bytes,
            stats.virtual_bytes,
            stats
                .thread_count
                .map(|t| t.to_string())
                .unwrap_or_else(|| "?".to_string()),
        );
    }
}

impl std::fmt::Debug for Exporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exporter")
            .field("agent", &self.agent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::key::CounterKey;
    use crate::counter::registry::CounterOp;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingSink {
        emitted: Arc<Mutex<Vec<(String, Vec<String>, f64)>>>,
    }

    impl AgentSink for RecordingSink {
        fn gauge(&self, name: &str, tags: &[String], value: f64, _sample_rate: f64) {
            self.emitted
                .lock()
                .unwrap()
                .push((name.to_string(), tags.to_vec(), value));
        }
    }

    impl RecordingSink {
        fn take(&self) -> Vec<(String, Vec<String>, f64)> {
            std::mem::take(&mut self.emitted.lock().unwrap())
        }
    }

    fn key(name: &str, tags: &[&str]) -> CounterKey {
        CounterKey::encode(name, tags).unwrap()
    }

    #[test]
    fn resettable_drain_zeroes_cells() {
        let sink = RecordingSink::default();
        let exporter = Exporter::new(Some(Box::new(sink.clone())));
        let registry = CounterRegistry::new();

        registry.apply(&key("hits", &["a"]), CounterOp::Increment(5));
        exporter.drain_resettable(&registry);

        let emitted = sink.take();
        let hit = emitted.iter().find(|(name, _, _)| name == "hits").unwrap();
        assert_eq!(hit.1, vec!["a"]);
        assert_eq!(hit.2, 5.0);

        // Cell is zeroed; a second drain reports 0.
        exporter.drain_resettable(&registry);
        let again = sink.take();
        let hit = again.iter().find(|(name, _, _)| name == "hits").unwrap();
        assert_eq!(hit.2, 0.0);
    }

    #[test]
    fn resettable_drain_appends_process_gauges_with_empty_tags() {
        let sink = RecordingSink::default();
        let exporter = Exporter::new(Some(Box::new(sink.clone())));
        let registry = CounterRegistry::new();

        exporter.drain_resettable(&registry);
        let emitted = sink.take();

        for gauge in [
            "memusage.resident",
            "memusage.virtual",
            "memusage.swapused",
            "memusage.available",
        ] {
            let entry = emitted
                .iter()
                .find(|(name, _, _)| name == gauge)
                .unwrap_or_else(|| panic!("missing {gauge}"));
            assert!(entry.1.is_empty());
        }
    }

    #[test]
    fn persistent_drain_reads_without_zeroing() {
        let sink = RecordingSink::default();
        let exporter = Exporter::new(Some(Box::new(sink.clone())));
        let registry = CounterRegistry::new();

        registry.apply(&key("total", &[]), CounterOp::Increment(9));
        exporter.drain_persistent(&registry);
        exporter.drain_persistent(&registry);

        let emitted = sink.take();
        let totals: Vec<_> = emitted
            .iter()
            .filter(|(name, _, _)| name == "total")
            .collect();
        assert_eq!(totals.len(), 2);
        assert!(totals.iter().all(|(_, _, value)| *value == 9.0));

        // No process gauges on the persistent drain.
        assert!(!emitted
            .iter()
            .any(|(name, _, _)| name.starts_with("memusage.")));
    }

    #[test]
    fn missing_agent_degrades_to_logging_only() {
        let exporter = Exporter::new(None);
        assert!(!exporter.has_agent());

        let registry = CounterRegistry::new();
        registry.apply(&key("hits", &[]), CounterOp::Increment(1));
        // Must not panic; log emission alone.
        exporter.drain_resettable(&registry);
        assert_eq!(registry.get_or_create(&key("hits", &[])).read(), 0);
    }
}
