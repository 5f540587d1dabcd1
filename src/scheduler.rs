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

//! Cancellable fixed-interval background tasks.
//!
//! Each [`PeriodicTask`] owns one worker thread that waits on a shutdown
//! channel with the interval as timeout: a timeout runs the task, a shutdown
//! signal (or a dropped sender) ends the loop. The task runs synchronously
//! in the loop, so a slow run delays the next tick instead of overlapping
//! with it.

use crossbeam_channel::{RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// A background timer loop: Stopped → Running → Stopped.
///
/// [`stop`](Self::stop) is the only transition back to Stopped; dropping the
/// task stops it too, so shutdown is deterministic.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    shutdown: Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl PeriodicTask {
    /// Spawns a worker thread that invokes `task` every `interval`.
    pub fn spawn<F>(name: &'static str, interval: Duration, task: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let running = Arc::new(AtomicBool::new(true));
        let worker_running = Arc::clone(&running);

        let handle = thread::spawn(move || {
            log::debug!("periodic task '{name}' started");
            loop {
                match shutdown_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => task(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            worker_running.store(false, Ordering::SeqCst);
            log::debug!("periodic task '{name}' stopped");
        });

        Self {
            name,
            shutdown: shutdown_tx,
            handle: Some(handle),
            running,
        }
    }

    /// Signals the worker to stop and joins it. Idempotent.
    pub fn stop(&mut self) {
        let _ = self.shutdown.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("periodic task '{}' panicked", self.name);
            }
        }
    }

    /// Whether the worker loop is still alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The name this task was spawned with.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}
