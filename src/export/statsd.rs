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

//! Thin DogStatsD-style gauge client over UDP.
//!
//! This is deliberately a fire-and-forget line writer: batching, retry, and
//! aggregation are the agent's concern. Send failures are logged at debug
//! level and otherwise ignored so a missing agent never slows producers.

use std::fmt::Write as _;
use std::io;
use std::net::UdpSocket;

/// Destination for exported metric triples.
///
/// Implemented by [`StatsdClient`] for the real agent; tests inject
/// recording implementations.
pub trait AgentSink: Send + Sync {
    /// Reports `name` as a gauge with the given tags and sample rate.
    fn gauge(&self, name: &str, tags: &[String], value: f64, sample_rate: f64);
}

/// UDP client speaking the DogStatsD line protocol.
#[derive(Debug)]
pub struct StatsdClient {
    socket: UdpSocket,
    namespace: String,
    global_tags: Vec<String>,
}

impl StatsdClient {
    /// Connects to the agent at `addr` (`host:port`).
    ///
    /// `namespace` is prefixed to every metric name; `global_tags` are
    /// appended to every line, after the per-process identity tags
    /// (`binary:` and `hostname:`).
    pub fn connect(addr: &str, namespace: &str, global_tags: &[String]) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(addr)?;

        let mut tags = instance_tags();
        tags.extend(global_tags.iter().cloned());

        Ok(Self {
            socket,
            namespace: namespace.to_string(),
            global_tags: tags,
        })
    }

    /// The tags attached to every line this client sends.
    pub fn global_tags(&self) -> &[String] {
        &self.global_tags
    }
}

impl AgentSink for StatsdClient {
    fn gauge(&self, name: &str, tags: &[String], value: f64, sample_rate: f64) {
        let line = format_gauge(&self.namespace, &self.global_tags, name, tags, value, sample_rate);
        if let Err(e) = self.socket.send(line.as_bytes()) {
            log::debug!("statsd send failed: {e}");
        }
    }
}

/// Builds one DogStatsD gauge line:
/// `namespace.name:value|g[|@rate][|#tag1,tag2]`.
fn format_gauge(
    namespace: &str,
    global_tags: &[String],
    name: &str,
    tags: &[String],
    value: f64,
    sample_rate: f64,
) -> String {
    let mut line = String::new();
    if !namespace.is_empty() {
        line.push_str(namespace);
        line.push('.');
    }
    let _ = write!(line, "{name}:{value}|g");
    if sample_rate != 1.0 {
        let _ = write!(line, "|@{sample_rate}");
    }
    if !global_tags.is_empty() || !tags.is_empty() {
        line.push_str("|#");
        for (i, tag) in global_tags.iter().chain(tags.iter()).enumerate() {
            if i != 0 {
                line.push(',');
            }
            line.push_str(tag);
        }
    }
    line
}

/// Identity tags for this process: binary name and hostname, where known.
fn instance_tags() -> Vec<String> {
    let mut tags = Vec::new();
    if let Ok(exe) = std::env::current_exe() {
        if let Some(binary) = exe.file_name().and_then(|n| n.to_str()) {
            tags.push(format!("binary:{binary}"));
        }
    }
    if let Some(hostname) = sysinfo::System::host_name() {
        tags.push(format!("hostname:{hostname}"));
    }
    tags
}
