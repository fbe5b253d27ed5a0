//! Consumer loop and looper threads.
//!
//! A [`Looper`] owns a [`MessageQueue`] and is the only thing that drains it. Producers never look
//! a queue up implicitly: they are handed an `Arc<MessageQueue>` (usually wrapped in a
//! [`crate::handler::Handler`]) by whoever created the looper.

use crate::error::QueueError;
use crate::queue::MessageQueue;
use crate::threading::{pin_to_core, set_thread_priority, ThreadPriority};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Looper configuration used at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LooperConfig {
    /// Thread name, also used in log lines.
    pub name: String,
    /// Whether `quit` may stop this looper. A main-thread style looper sets this to `false`.
    pub quit_allowed: bool,
    /// Scheduling class of the looper thread.
    pub priority: ThreadPriority,
    /// Optional core to pin the looper thread to.
    pub core: Option<usize>,
    /// Warn when a single dispatch runs longer than this.
    pub slow_dispatch_threshold_ms: Option<u64>,
    /// Warn when a message is dispatched this long after its due-time.
    pub slow_delivery_threshold_ms: Option<u64>,
}

impl Default for LooperConfig {
    fn default() -> Self {
        Self {
            name: "looper".to_string(),
            quit_allowed: true,
            priority: ThreadPriority::Default,
            core: None,
            slow_dispatch_threshold_ms: Some(100),
            slow_delivery_threshold_ms: Some(200),
        }
    }
}

/// Counters reported when a looper exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopStats {
    pub dispatched: u64,
    pub slow_dispatches: u64,
    pub slow_deliveries: u64,
}

/// Drains one message queue on the calling thread.
pub struct Looper {
    name: String,
    queue: Arc<MessageQueue>,
    slow_dispatch: Option<Duration>,
    slow_delivery: Option<u64>,
}

impl Looper {
    /// Create a looper with a fresh queue.
    pub fn new(config: &LooperConfig) -> Self {
        Self::with_queue(config, Arc::new(MessageQueue::new(config.quit_allowed)))
    }

    /// Create a looper around an existing queue, e.g. one built with a custom clock.
    pub fn with_queue(config: &LooperConfig, queue: Arc<MessageQueue>) -> Self {
        Self {
            name: config.name.clone(),
            queue,
            slow_dispatch: config.slow_dispatch_threshold_ms.map(Duration::from_millis),
            slow_delivery: config.slow_delivery_threshold_ms,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle for producers.
    pub fn queue(&self) -> Arc<MessageQueue> {
        self.queue.clone()
    }

    /// Dispatch messages until the queue quits. Consumes the looper so a queue can only ever have
    /// one consumer.
    pub fn run(self) -> LoopStats {
        debug!("looper {} started", self.name);
        let mut stats = LoopStats::default();

        while let Some(message) = self.queue.next() {
            let Some(target) = message.target() else {
                continue;
            };

            let start = Instant::now();
            if let Some(threshold) = self.slow_delivery {
                let when = message.when();
                let lag = self.queue.now_millis().saturating_sub(when);
                if when != 0 && lag >= threshold {
                    stats.slow_deliveries += 1;
                    warn!(
                        "looper {}: slow delivery to {} what={} ({}ms late)",
                        self.name,
                        target.name(),
                        message.what,
                        lag
                    );
                }
            }

            target.dispatch_message(&message);
            stats.dispatched += 1;

            let elapsed = start.elapsed();
            if let Some(threshold) = self.slow_dispatch {
                if elapsed >= threshold {
                    stats.slow_dispatches += 1;
                    warn!(
                        "looper {}: slow dispatch to {} what={} took {}ms",
                        self.name,
                        target.name(),
                        message.what,
                        elapsed.as_millis()
                    );
                }
            }
        }

        debug!(
            "looper {} exited after {} messages",
            self.name, stats.dispatched
        );
        stats
    }
}

/// A named thread running a [`Looper`].
pub struct LooperThread {
    name: String,
    queue: Arc<MessageQueue>,
    handle: JoinHandle<LoopStats>,
}

impl LooperThread {
    /// Spawn a thread that applies the configured priority/affinity and runs a fresh looper.
    pub fn spawn(config: LooperConfig) -> io::Result<Self> {
        let looper = Looper::new(&config);
        Self::spawn_looper(config, looper)
    }

    /// Spawn a thread running `looper`; `config` supplies the thread attributes.
    pub fn spawn_looper(config: LooperConfig, looper: Looper) -> io::Result<Self> {
        let queue = looper.queue();
        let name = config.name.clone();
        let handle = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || {
                if let Err(err) = set_thread_priority(config.priority) {
                    debug!(
                        "looper {}: could not apply priority {:?}: {err}",
                        config.name, config.priority
                    );
                }
                if let Some(core) = config.core {
                    if let Err(err) = pin_to_core(core) {
                        debug!("looper {}: could not pin to core {core}: {err}", config.name);
                    }
                }
                looper.run()
            })?;

        Ok(Self {
            name,
            queue,
            handle,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> Arc<MessageQueue> {
        self.queue.clone()
    }

    /// Discard all pending messages and stop the looper.
    pub fn quit(&self) -> Result<(), QueueError> {
        self.queue.quit(false)
    }

    /// Let already-due messages run, discard the rest, and stop the looper.
    pub fn quit_safely(&self) -> Result<(), QueueError> {
        self.queue.quit(true)
    }

    /// Wait for the looper thread to exit.
    pub fn join(self) -> thread::Result<LoopStats> {
        self.handle.join()
    }
}
