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

//! Service configuration, consumed at start time.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`MetricsService`](crate::service::MetricsService).
///
/// The service consumes this; whoever assembles the process owns it
/// (flag parsing, env, file).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Export interval in seconds for both counter classes.
    pub interval_secs: u64,
    /// Address of the metrics agent as `host:port`; `None` disables the
    /// agent half of emission.
    pub agent_addr: Option<String>,
    /// Namespace prefixed to every metric sent to the agent.
    pub namespace: String,
    /// Tags attached to every metric sent to the agent.
    pub global_tags: Vec<String>,
    /// Enables the periodic process-dump task.
    pub dump_process: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            agent_addr: None,
            namespace: String::new(),
            global_tags: Vec::new(),
            dump_process: false,
        }
    }
}

impl MetricsConfig {
    /// The export interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Parses a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Loads a configuration from a JSON file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading metrics config {path}"))?;
        Self::from_json(&content).with_context(|| format!("parsing metrics config {path}"))
    }

    /// Writes the configuration to a JSON file.
    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing metrics config {path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = MetricsConfig::default();
        assert_eq!(config.interval_secs, 60);
        assert_eq!(config.interval(), Duration::from_secs(60));
        assert!(config.agent_addr.is_none());
        assert!(config.namespace.is_empty());
        assert!(config.global_tags.is_empty());
        assert!(!config.dump_process);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config = MetricsConfig::from_json(r#"{"interval_secs": 5}"#).unwrap();
        assert_eq!(config.interval_secs, 5);
        assert!(config.agent_addr.is_none());
    }

    #[test]
    fn json_roundtrip() {
        let config = MetricsConfig {
            interval_secs: 30,
            agent_addr: Some("127.0.0.1:8125".to_string()),
            namespace: "myapp".to_string(),
            global_tags: vec!["env:test".to_string()],
            dump_process: true,
        };

        let json = serde_json::to_string(&config).unwrap();
        let parsed = MetricsConfig::from_json(&json).unwrap();
        assert_eq!(parsed.interval_secs, 30);
        assert_eq!(parsed.agent_addr.as_deref(), Some("127.0.0.1:8125"));
        assert_eq!(parsed.namespace, "myapp");
        assert_eq!(parsed.global_tags, vec!["env:test"]);
        assert!(parsed.dump_process);
    }
}
