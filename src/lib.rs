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

//! metrika: in-process metrics aggregation.
//!
//! Counters are mutated from hot paths with lock-free atomics, aggregated in
//! two registries (resettable per-interval "histogram" counters and
//! persistent totals), and drained on a fixed interval to the log facade and
//! an optional DogStatsD-compatible agent.
//!
//! # Quick start
//!
//! ```no_run
//! use metrika::{MetricsConfig, MetricsService};
//!
//! let config = MetricsConfig {
//!     agent_addr: Some("127.0.0.1:8125".to_string()),
//!     namespace: "myapp".to_string(),
//!     ..MetricsConfig::default()
//! };
//! let service = MetricsService::new(config);
//! service.ensure_started();
//!
//! service.inc_counter("requests", 1);
//! service.inc_tagged_pcounter("bytes.total", &["direction:in"], 4096);
//!
//! {
//!     let _trace = service.start_trace("handle", &[]);
//!     // ... work ...
//! } // records handleprocessed and handleprocessingtime
//! ```
//!
//! The service is plain data: embedders construct it, share it behind an
//! `Arc`, and stop it on shutdown. Mutating counters before
//! [`MetricsService::ensure_started`] is safe; those updates are dropped and
//! the first one is logged.

pub mod config;
pub mod counter;
pub mod export;
pub mod memory;
pub mod scheduler;
pub mod service;

pub use config::MetricsConfig;
pub use counter::{CounterCell, CounterKey, CounterOp, CounterRegistry, KeyError, Trace};
pub use export::{AgentSink, Exporter, StatsdClient};
pub use memory::{ProcessStats, ProcessStatsSource};
pub use scheduler::PeriodicTask;
pub use service::{log_time_taken, MetricsService};
