//! Seed liveness pings
//!
//! Every seed gets its own interval task that re-connects over PING.
//! Failures are logged and retried on the next tick; a seed is never
//! evicted. `stop` aborts all tasks on leave.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::net::Overlay;
use crate::types::Contact;

#[derive(Debug, Default)]
pub struct SeedLiveness {
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SeedLiveness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ping `seed` every `interval` until stopped. The first tick fires
    /// after one interval; the join path does its own initial connect.
    pub fn watch(&self, overlay: Arc<Overlay>, seed: Contact, interval: Duration) {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = overlay.connect(&seed).await {
                    debug!(seed = %seed, error = %e, "seed ping failed");
                }
            }
        });
        self.tasks.lock().push(task);
    }

    pub fn watching(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Cancel every ping task.
    pub fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for SeedLiveness {
    fn drop(&mut self) {
        self.stop();
    }
}
