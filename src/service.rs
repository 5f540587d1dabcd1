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

//! The aggregation service: registries, schedulers, and the counter API.
//!
//! A [`MetricsService`] is an explicitly constructed instance, owned by
//! whoever assembles the process; there is no ambient global state. The two
//! registries and the export schedulers are created on the first
//! [`ensure_started`](MetricsService::ensure_started) call and live until
//! [`stop`](MetricsService::stop) or drop.

use crate::config::MetricsConfig;
use crate::counter::key::CounterKey;
use crate::counter::registry::{CounterOp, CounterRegistry};
use crate::counter::trace::Trace;
use crate::export::exporter::Exporter;
use crate::export::statsd::{AgentSink, StatsdClient};
use crate::memory::ProcessStatsSource;
use crate::scheduler::PeriodicTask;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Instant;

/// Which counter lifecycle an entry point targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CounterClass {
    /// Zeroed by every export cycle.
    Resettable,
    /// Survives export cycles until an explicit reset.
    Persistent,
}

/// State created by the one-time start gate.
struct Started {
    resettable: CounterRegistry,
    persistent: CounterRegistry,
    exporter: Exporter,
}

/// In-process metrics aggregation: concurrent counters drained on a fixed
/// interval into the log facade and an optional metrics agent.
///
/// Counter mutation before [`ensure_started`](Self::ensure_started) never
/// blocks or panics: the first offense is logged as an error and every such
/// mutation is dropped.
pub struct MetricsService {
    config: MetricsConfig,
    sink_override: Mutex<Option<Box<dyn AgentSink>>>,
    dump_hook: Option<Arc<dyn Fn() + Send + Sync>>,
    state: OnceLock<Arc<Started>>,
    tasks: Mutex<Vec<PeriodicTask>>,
    unstarted_warned: AtomicBool,
}

impl MetricsService {
    /// Creates a service. Nothing runs until
    /// [`ensure_started`](Self::ensure_started).
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            sink_override: Mutex::new(None),
            dump_hook: None,
            state: OnceLock::new(),
            tasks: Mutex::new(Vec::new()),
            unstarted_warned: AtomicBool::new(false),
        }
    }

    /// Creates a service that emits to `sink` instead of connecting to the
    /// configured agent address. Used for tests and embedders with their own
    /// transport.
    pub fn with_agent_sink(config: MetricsConfig, sink: Box<dyn AgentSink>) -> Self {
        let service = Self::new(config);
        *lock(&service.sink_override) = Some(sink);
        service
    }

    /// Replaces the default process-dump task body. Only takes effect when
    /// the config enables the dump task, and only before the first start.
    pub fn with_dump_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.dump_hook = Some(Arc::new(hook));
        self
    }

    /// Starts the registries and export schedulers. Idempotent: the first
    /// call wins, later calls (including concurrent ones) are no-ops and
    /// never create duplicate schedulers.
    pub fn ensure_started(&self) {
        let mut started_now = false;
        let started = Arc::clone(self.state.get_or_init(|| {
            started_now = true;
            Arc::new(Started {
                resettable: CounterRegistry::new(),
                persistent: CounterRegistry::new(),
                exporter: Exporter::new(self.build_agent_sink()),
            })
        }));
        if !started_now {
            return;
        }

        let interval = self.config.interval();
        let mut tasks = lock(&self.tasks);
        {
            let s = Arc::clone(&started);
            tasks.push(PeriodicTask::spawn("histogram-export", interval, move || {
                s.exporter.drain_resettable(&s.resettable);
            }));
        }
        {
            let s = Arc::clone(&started);
            tasks.push(PeriodicTask::spawn("persistent-export", interval, move || {
                s.exporter.drain_persistent(&s.persistent);
            }));
        }
        if self.config.dump_process {
            match self.dump_hook.clone() {
                Some(hook) => {
                    tasks.push(PeriodicTask::spawn("process-dump", interval, move || hook()));
                }
                None => {
                    let source = ProcessStatsSource::new();
                    tasks.push(PeriodicTask::spawn("process-dump", interval, move || {
                        Exporter::log_process_summary(&source.sample());
                    }));
                }
            }
        }
        log::info!("metrics service started, export interval {interval:?}");
    }

    /// Whether [`ensure_started`](Self::ensure_started) has run.
    pub fn is_started(&self) -> bool {
        self.state.get().is_some()
    }

    /// Cancels all export schedulers and joins their threads. Counters stay
    /// readable and mutable; they are just no longer exported.
    pub fn stop(&self) {
        let mut tasks = lock(&self.tasks);
        for task in tasks.iter_mut() {
            task.stop();
        }
        tasks.clear();
    }

    /// Runs both drains synchronously on the calling thread, exactly as one
    /// scheduled cycle of each would.
    pub fn flush_now(&self) {
        if let Some(started) = self.state.get() {
            started.exporter.drain_resettable(&started.resettable);
            started.exporter.drain_persistent(&started.persistent);
        }
    }

    // Resettable ("histogram") counters.

    /// Increments the named counter, creating it on first use.
    pub fn inc_counter(&self, name: &str, value: i64) {
        self.inc_tagged_counter(name, &[], value);
    }

    /// Increments the named tagged counter, creating it on first use.
    pub fn inc_tagged_counter(&self, name: &str, tags: &[&str], value: i64) {
        self.modify(CounterClass::Resettable, name, tags, CounterOp::Increment(value));
    }

    /// Decrements the named counter, creating it on first use.
    pub fn dec_counter(&self, name: &str, value: i64) {
        self.dec_tagged_counter(name, &[], value);
    }

    /// Decrements the named tagged counter, creating it on first use.
    pub fn dec_tagged_counter(&self, name: &str, tags: &[&str], value: i64) {
        self.modify(CounterClass::Resettable, name, tags, CounterOp::Decrement(value));
    }

    /// Sets the named counter, creating it on first use.
    pub fn set_counter(&self, name: &str, value: i64) {
        self.set_tagged_counter(name, &[], value);
    }

    /// Sets the named tagged counter, creating it on first use.
    pub fn set_tagged_counter(&self, name: &str, tags: &[&str], value: i64) {
        self.modify(CounterClass::Resettable, name, tags, CounterOp::Set(value));
    }

    // Persistent counters.

    /// Increments the named persistent counter, creating it on first use.
    pub fn inc_pcounter(&self, name: &str, value: i64) {
        self.inc_tagged_pcounter(name, &[], value);
    }

    /// Increments the named tagged persistent counter, creating it on first
    /// use.
    pub fn inc_tagged_pcounter(&self, name: &str, tags: &[&str], value: i64) {
        self.modify(CounterClass::Persistent, name, tags, CounterOp::Increment(value));
    }

    /// Decrements the named persistent counter, creating it on first use.
    pub fn dec_pcounter(&self, name: &str, value: i64) {
        self.dec_tagged_pcounter(name, &[], value);
    }

    /// Decrements the named tagged persistent counter, creating it on first
    /// use.
    pub fn dec_tagged_pcounter(&self, name: &str, tags: &[&str], value: i64) {
        self.modify(CounterClass::Persistent, name, tags, CounterOp::Decrement(value));
    }

    /// Sets the named persistent counter, creating it on first use.
    pub fn set_pcounter(&self, name: &str, value: i64) {
        self.set_tagged_pcounter(name, &[], value);
    }

    /// Sets the named tagged persistent counter, creating it on first use.
    pub fn set_tagged_pcounter(&self, name: &str, tags: &[&str], value: i64) {
        self.modify(CounterClass::Persistent, name, tags, CounterOp::Set(value));
    }

    /// Zeroes every persistent counter. The only way persistent totals go
    /// back to zero.
    pub fn reset_persistent_counters(&self) {
        if let Some(started) = self.state.get() {
            started.persistent.reset_all();
        }
    }

    /// Begins timing an operation. When the returned [`Trace`] is dropped it
    /// records `<name>processed` (+1) and `<name>processingtime` (+elapsed
    /// milliseconds) as resettable counters.
    pub fn start_trace(&self, name: &str, tags: &[&str]) -> Trace<'_> {
        Trace::start(self, name, tags)
    }

    fn modify(&self, class: CounterClass, name: &str, tags: &[&str], op: CounterOp) {
        let Some(started) = self.state.get() else {
            self.warn_unstarted();
            return;
        };
        let key = match CounterKey::encode(name, tags) {
            Ok(key) => key,
            Err(e) => {
                log::error!("dropping counter update for {name:?}: {e}");
                return;
            }
        };
        let registry = match class {
            CounterClass::Resettable => &started.resettable,
            CounterClass::Persistent => &started.persistent,
        };
        registry.apply(&key, op);
    }

    fn warn_unstarted(&self) {
        if !self.unstarted_warned.swap(true, Ordering::Relaxed) {
            log::error!("counter mutated before ensure_started(); updates are dropped");
        }
    }

    fn build_agent_sink(&self) -> Option<Box<dyn AgentSink>> {
        if let Some(sink) = lock(&self.sink_override).take() {
            return Some(sink);
        }
        let addr = self.config.agent_addr.as_deref()?;
        match StatsdClient::connect(addr, &self.config.namespace, &self.config.global_tags) {
            Ok(client) => {
                log::info!(
                    "metrics agent ready at {addr}, namespace {:?}",
                    self.config.namespace
                );
                Some(Box::new(client))
            }
            Err(e) => {
                log::error!("metrics agent at {addr} unavailable ({e}), exporting to log only");
                None
            }
        }
    }
}

impl Drop for MetricsService {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for MetricsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsService")
            .field("config", &self.config)
            .field("started", &self.is_started())
            .finish()
    }
}

/// Info-logs the time elapsed since `start` under the given label.
pub fn log_time_taken(name: &str, start: Instant) {
    log::info!("{name} took {:?}", start.elapsed());
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

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

        fn value_of(&self, name: &str) -> Option<f64> {
            self.emitted
                .lock()
                .unwrap()
                .iter()
                .find(|(n, _, _)| n == name)
                .map(|(_, _, v)| *v)
        }
    }

    fn recording_service() -> (MetricsService, RecordingSink) {
        let sink = RecordingSink::default();
        let service =
            MetricsService::with_agent_sink(MetricsConfig::default(), Box::new(sink.clone()));
        service.ensure_started();
        (service, sink)
    }

    #[test]
    fn ensure_started_is_idempotent() {
        let service = MetricsService::new(MetricsConfig::default());
        service.ensure_started();
        service.ensure_started();
        assert!(service.is_started());
        // Exactly one scheduler pair, no dump task by default.
        assert_eq!(lock(&service.tasks).len(), 2);
    }

    #[test]
    fn concurrent_starts_create_one_scheduler_pair() {
        let service = Arc::new(MetricsService::new(MetricsConfig::default()));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let service = Arc::clone(&service);
                thread::spawn(move || service.ensure_started())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(lock(&service.tasks).len(), 2);
    }

    #[test]
    fn dump_task_spawns_when_enabled() {
        let config = MetricsConfig {
            dump_process: true,
            ..MetricsConfig::default()
        };
        let service = MetricsService::new(config);
        service.ensure_started();
        assert_eq!(lock(&service.tasks).len(), 3);
    }

    #[test]
    fn mutation_before_start_is_dropped_not_fatal() {
        let service = MetricsService::new(MetricsConfig::default());
        service.inc_counter("early", 1);
        service.dec_counter("early", 1);
        service.set_pcounter("early", 7);
        assert!(!service.is_started());

        service.ensure_started();
        let started = service.state.get().unwrap();
        assert!(started.resettable.is_empty());
        assert!(started.persistent.is_empty());
    }

    #[test]
    fn invalid_name_is_dropped() {
        let (service, sink) = recording_service();
        let oversized = "n".repeat(300);
        service.inc_counter(&oversized, 1);
        service.flush_now();
        assert!(sink.value_of(&oversized).is_none());
    }

    #[test]
    fn concurrent_increments_drain_to_exact_totals() {
        let (service, sink) = recording_service();
        let service = Arc::new(service);

        let handles: Vec<_> = (0..2)
            .map(|i| {
                let service = Arc::clone(&service);
                thread::spawn(move || {
                    let own = format!("worker{i}");
                    for _ in 0..1_000 {
                        service.inc_counter(&own, 1);
                        service.inc_counter("shared", 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        service.flush_now();
        assert_eq!(sink.value_of("worker0"), Some(1_000.0));
        assert_eq!(sink.value_of("worker1"), Some(1_000.0));
        assert_eq!(sink.value_of("shared"), Some(2_000.0));
    }

    #[test]
    fn histogram_counters_reset_on_drain() {
        let (service, sink) = recording_service();
        service.inc_counter("requests", 5);

        service.flush_now();
        assert_eq!(sink.value_of("requests"), Some(5.0));
        sink.take();

        service.flush_now();
        assert_eq!(sink.value_of("requests"), Some(0.0));
    }

    #[test]
    fn persistent_counters_survive_drain_until_reset() {
        let (service, sink) = recording_service();
        service.inc_pcounter("total", 9);

        service.flush_now();
        assert_eq!(sink.value_of("total"), Some(9.0));
        sink.take();

        service.flush_now();
        assert_eq!(sink.value_of("total"), Some(9.0));
        sink.take();

        service.reset_persistent_counters();
        service.flush_now();
        assert_eq!(sink.value_of("total"), Some(0.0));
    }

    #[test]
    fn tag_sets_address_distinct_cells() {
        let (service, sink) = recording_service();
        service.inc_tagged_counter("x", &["a"], 1);
        service.inc_tagged_counter("x", &["a", "b"], 1);

        service.flush_now();
        let emitted = sink.take();
        let cells: Vec<_> = emitted.iter().filter(|(n, _, _)| n == "x").collect();
        assert_eq!(cells.len(), 2);
        assert!(cells.iter().any(|(_, tags, v)| tags == &["a"] && *v == 1.0));
        assert!(cells
            .iter()
            .any(|(_, tags, v)| tags == &["a", "b"] && *v == 1.0));
    }

    #[test]
    fn set_and_decrement_through_the_service() {
        let (service, sink) = recording_service();
        service.set_counter("gaugeish", 10);
        service.dec_counter("gaugeish", 3);
        service.set_tagged_pcounter("ptotal", &["k:v"], 50);
        service.dec_tagged_pcounter("ptotal", &["k:v"], 20);

        service.flush_now();
        assert_eq!(sink.value_of("gaugeish"), Some(7.0));
        assert_eq!(sink.value_of("ptotal"), Some(30.0));
    }

    #[test]
    fn stop_cancels_all_schedulers() {
        let service = MetricsService::new(MetricsConfig::default());
        service.ensure_started();
        service.stop();
        assert!(lock(&service.tasks).is_empty());
    }

    #[test]
    fn flush_before_start_is_a_no_op() {
        let service = MetricsService::new(MetricsConfig::default());
        service.flush_now();
        service.reset_persistent_counters();
    }
}
