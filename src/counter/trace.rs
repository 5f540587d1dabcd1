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

//! Scope-based operation timing.

use crate::service::MetricsService;
use std::time::Instant;

/// Times one operation from construction to drop.
///
/// On drop, two resettable counters are recorded under the traced name:
/// `<name>processed` is incremented by one and `<name>processingtime` by the
/// elapsed wall-clock milliseconds. Early returns and unwinding both count,
/// since drop runs either way.
///
/// ```no_run
/// # use metrika::{MetricsConfig, MetricsService};
/// # let service = MetricsService::new(MetricsConfig::default());
/// # service.ensure_started();
/// # fn handle_request() {}
/// {
///     let _trace = service.start_trace("ingest", &["source:kafka"]);
///     handle_request();
/// } // records ingestprocessed and ingestprocessingtime here
/// ```
#[derive(Debug)]
pub struct Trace<'a> {
    service: &'a MetricsService,
    name: String,
    tags: Vec<String>,
    start: Instant,
}

impl<'a> Trace<'a> {
    pub(crate) fn start(service: &'a MetricsService, name: &str, tags: &[&str]) -> Self {
        Self {
            service,
            name: name.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            start: Instant::now(),
        }
    }

    /// The name this trace records under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Milliseconds elapsed so far, saturating at `i64::MAX`.
    pub fn elapsed_millis(&self) -> i64 {
        self.start.elapsed().as_millis().min(i64::MAX as u128) as i64
    }
}

impl Drop for Trace<'_> {
    fn drop(&mut self) {
        let elapsed = self.elapsed_millis();
        let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
        self.service
            .inc_tagged_counter(&format!("{}processed", self.name), &tags, 1);
        self.service
            .inc_tagged_counter(&format!("{}processingtime", self.name), &tags, elapsed);
    }
}
