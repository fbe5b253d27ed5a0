//! Scheduled message queue.
//!
//! A single consumer drains the queue through [`MessageQueue::next`], which blocks on the
//! [`Parker`] until the earliest dispatchable message is due. Any number of producers insert and
//! remove messages concurrently. All mutable state sits behind one `parking_lot` mutex; the only
//! operation that ever blocks is the consumer's park, which happens with the mutex released.
//!
//! Ordering rules:
//! - the chain is sorted by due-time, FIFO among equal due-times;
//! - a due-time of 0 jumps to the front of the queue;
//! - a sync barrier (a message without a target) holds back every synchronous message behind it,
//!   while asynchronous messages keep flowing until the barrier is removed.

use crate::chain::{MessageChain, NodeId};
use crate::clock::{Clock, MonotonicClock};
use crate::dump::{MessageSummary, QueueDump};
use crate::error::QueueError;
use crate::idle::{self, SharedIdleHandler};
use crate::message::{same_object, BarrierToken, Message, MessageFilter, Payload, Target};
use crate::parker::{Parker, PollTimeout, ThreadParker};
use log::{debug, error, trace, warn};
use parking_lot::Mutex;
use std::sync::Arc;

/// Longest single park; longer waits are split into several polls.
const MAX_POLL_MILLIS: u64 = i32::MAX as u64;

/// State guarded by the queue mutex.
#[derive(Default)]
struct QueueState {
    chain: MessageChain,
    idle_handlers: Vec<SharedIdleHandler>,
    /// Scratch buffer reused for idle handler snapshots.
    pending_idle: Vec<SharedIdleHandler>,
    next_barrier_token: i32,
    quitting: bool,
    /// Consumer is about to park (or parked) with a non-zero timeout.
    blocked: bool,
    disposed: bool,
}

impl QueueState {
    /// Link `message` at its due position. Returns whether a blocked consumer must be woken for
    /// it to be observed in time.
    fn link_sorted(&mut self, message: Message) -> bool {
        let when = message.when();
        let asynchronous = message.is_asynchronous();

        let head = match self.chain.head() {
            Some(head) if when != 0 && when >= self.chain.get(head).when() => head,
            _ => {
                self.chain.push_front(message);
                return self.blocked;
            }
        };

        // Mid-chain inserts only matter when a barrier stalls the head and this is the earliest
        // asynchronous message.
        let mut need_wake = self.blocked && asynchronous && self.chain.get(head).is_barrier();
        let mut prev = head;
        while let Some(next) = self.chain.next_of(prev) {
            let candidate = self.chain.get(next);
            if when < candidate.when() {
                break;
            }
            if need_wake && candidate.is_asynchronous() {
                need_wake = false;
            }
            prev = next;
        }
        self.chain.insert_after(prev, message);
        need_wake
    }

    /// First message the consumer may run, with its predecessor. Behind a barrier only
    /// asynchronous messages qualify.
    fn find_dispatchable(&self) -> Option<(Option<NodeId>, NodeId)> {
        let head = self.chain.head()?;
        if !self.chain.get(head).is_barrier() {
            return Some((None, head));
        }
        let mut prev = head;
        let mut cursor = self.chain.next_of(head);
        while let Some(id) = cursor {
            if self.chain.get(id).is_asynchronous() {
                return Some((Some(prev), id));
            }
            prev = id;
            cursor = self.chain.next_of(id);
        }
        None
    }

    /// True when nothing at the head of the chain is due at `now`.
    fn head_is_idle(&self, now: u64) -> bool {
        self.chain
            .head()
            .map_or(true, |head| now < self.chain.get(head).when())
    }

    /// Drop every message due strictly after `now`.
    fn remove_future(&mut self, now: u64) -> usize {
        let Some(head) = self.chain.head() else {
            return 0;
        };
        if self.chain.get(head).when() > now {
            return self.chain.clear();
        }
        let mut last_due = head;
        while let Some(next) = self.chain.next_of(last_due) {
            if self.chain.get(next).when() > now {
                break;
            }
            last_due = next;
        }
        self.chain.truncate_after(last_due)
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.chain.release_storage();
        self.idle_handlers.clear();
        self.pending_idle = Vec::new();
    }
}

/// Time-ordered message queue drained by exactly one consumer thread.
pub struct MessageQueue {
    quit_allowed: bool,
    clock: Arc<dyn Clock>,
    parker: Arc<dyn Parker>,
    state: Mutex<QueueState>,
}

impl MessageQueue {
    /// Queue using the process monotonic clock and a condvar parker.
    pub fn new(quit_allowed: bool) -> Self {
        Self::with_parts(
            quit_allowed,
            Arc::new(MonotonicClock::new()),
            Arc::new(ThreadParker::new()),
        )
    }

    /// Queue with an explicit clock and parker.
    pub fn with_parts(quit_allowed: bool, clock: Arc<dyn Clock>, parker: Arc<dyn Parker>) -> Self {
        Self {
            quit_allowed,
            clock,
            parker,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Current reading of the queue's clock; the timeline all due-times refer to.
    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Insert `message` to become due at `when`.
    ///
    /// # Returns
    /// - `Ok(true)` once the message is linked;
    /// - `Ok(false)` when the queue is quitting (the message is dropped and a warning logged);
    /// - `Err(InvalidArgument)` for a message without a target;
    /// - `Err(InvalidState)` for a message that is still in use.
    pub fn enqueue(&self, mut message: Message, when: u64) -> Result<bool, QueueError> {
        let Some(target) = message.target() else {
            return Err(QueueError::InvalidArgument("message must have a target"));
        };
        if message.is_in_use() {
            return Err(QueueError::InvalidState(format!(
                "{message:?} is already in use"
            )));
        }

        let mut state = self.state.lock();
        if state.quitting {
            warn!(
                "{} sending message to a handler on a dead thread",
                target.name()
            );
            drop(state);
            message.recycle();
            return Ok(false);
        }

        message.mark_in_use();
        message.set_when(when);
        if state.link_sorted(message) {
            self.parker.unpark();
        }
        Ok(true)
    }

    /// Insert a sync barrier due at `when`.
    ///
    /// Synchronous messages due after the barrier are held back until
    /// [`MessageQueue::remove_sync_barrier`] is called with the returned token. Posting a barrier
    /// never wakes the consumer. Returns `None` when the queue is quitting.
    pub fn post_sync_barrier(&self, when: u64) -> Option<BarrierToken> {
        let mut state = self.state.lock();
        if state.quitting {
            warn!("sync barrier posted to a queue that is quitting");
            return None;
        }
        let token = BarrierToken(state.next_barrier_token);
        state.next_barrier_token = state.next_barrier_token.wrapping_add(1);
        state.link_sorted(Message::barrier(token, when));
        trace!("posted sync barrier {token} at {when}");
        Some(token)
    }

    /// Remove the barrier identified by `token`, waking the consumer when it was stalling the
    /// head of the queue.
    pub fn remove_sync_barrier(&self, token: BarrierToken) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        let (prev, id) = state
            .chain
            .find(|message| message.barrier_token() == Some(token))
            .ok_or(QueueError::BarrierNotFound(token))?;
        let need_wake = prev.is_none()
            && state
                .chain
                .next_of(id)
                .map_or(true, |next| !state.chain.get(next).is_barrier());
        state.chain.remove(prev, id);
        trace!("removed sync barrier {token}");

        // A quitting consumer is already awake.
        if need_wake && !state.quitting {
            self.parker.unpark();
        }
        Ok(())
    }

    /// Block until a message is due and return it, or return `None` once the queue has quit.
    ///
    /// Must only be called from the consumer thread. The returned message is still flagged in use;
    /// it cannot be enqueued again, only [`Message::duplicate`]d.
    pub fn next(&self) -> Option<Message> {
        if self.state.lock().disposed {
            return None;
        }

        // `None` until the first idle pass of this call.
        let mut pending_idle_count: Option<usize> = None;
        let mut timeout = PollTimeout::Immediate;

        loop {
            self.parker.park(timeout);

            let mut batch = {
                let mut state = self.state.lock();
                if state.disposed {
                    return None;
                }
                let now = self.clock.now_millis();

                match state.find_dispatchable() {
                    Some((prev, id)) => {
                        let when = state.chain.get(id).when();
                        if now < when {
                            timeout = PollTimeout::Millis((when - now).min(MAX_POLL_MILLIS));
                        } else {
                            state.blocked = false;
                            let message = state.chain.unlink(prev, id);
                            trace!("dispatching {message:?}");
                            return Some(message);
                        }
                    }
                    None => timeout = PollTimeout::Indefinite,
                }

                // Pending messages have all been handled; finish quitting.
                if state.quitting {
                    state.dispose();
                    debug!("message queue quit and disposed");
                    return None;
                }

                if pending_idle_count.is_none() && state.head_is_idle(now) {
                    pending_idle_count = Some(state.idle_handlers.len());
                }
                if pending_idle_count.unwrap_or(0) == 0 {
                    state.blocked = true;
                    continue;
                }

                let mut batch = std::mem::take(&mut state.pending_idle);
                batch.clear();
                batch.extend(state.idle_handlers.iter().cloned());
                batch
            };

            self.run_idle_handlers(&batch);
            batch.clear();
            self.state.lock().pending_idle = batch;

            // Idle handlers run once per call; a message may have arrived meanwhile, so look
            // again without blocking.
            pending_idle_count = Some(0);
            timeout = PollTimeout::Immediate;
        }
    }

    fn run_idle_handlers(&self, batch: &[SharedIdleHandler]) {
        for handler in batch {
            let keep = match idle::invoke(handler) {
                Ok(keep) => keep,
                Err(fault) => {
                    error!("{fault}");
                    true
                }
            };
            if !keep {
                self.remove_idle_handler(handler);
            }
        }
    }

    /// Stop the queue.
    ///
    /// A safe quit keeps every message that is already due so in-flight work finishes; otherwise
    /// everything pending is discarded. Either way the consumer is woken, drains what is left and
    /// then receives `None`. Calling `quit` again is a no-op.
    pub fn quit(&self, safe: bool) -> Result<(), QueueError> {
        if !self.quit_allowed {
            return Err(QueueError::InvalidState(
                "this queue is not allowed to quit".to_string(),
            ));
        }

        let mut state = self.state.lock();
        if state.quitting {
            return Ok(());
        }
        state.quitting = true;

        let removed = if safe {
            let now = self.clock.now_millis();
            state.remove_future(now)
        } else {
            state.chain.clear()
        };
        debug!(
            "quitting message queue (safe={safe}, discarded={removed}, remaining={})",
            state.chain.len()
        );

        self.parker.unpark();
        Ok(())
    }

    /// Remove every pending message matching `filter`. Returns how many were removed.
    pub fn remove_messages(&self, filter: &MessageFilter) -> usize {
        let mut state = self.state.lock();
        state.chain.remove_matching(|message| filter.matches(message))
    }

    /// Remove every pending message and callback for `target`, optionally restricted to those
    /// carrying `obj`.
    pub fn remove_callbacks_and_messages(&self, target: &Target, obj: Option<&Payload>) -> usize {
        let filter = match obj {
            Some(obj) => MessageFilter::any(target).with_object(obj),
            None => MessageFilter::any(target),
        };
        self.remove_messages(&filter)
    }

    /// Whether any pending message matches `filter`.
    pub fn has_messages(&self, filter: &MessageFilter) -> bool {
        let state = self.state.lock();
        let found = state
            .chain
            .iter()
            .any(|(_, message)| filter.matches(message));
        found
    }

    /// Register a handler to run whenever the queue goes idle. Safe from any thread.
    pub fn add_idle_handler(&self, handler: SharedIdleHandler) {
        self.state.lock().idle_handlers.push(handler);
    }

    /// Unregister `handler`. Does nothing when it is not registered.
    pub fn remove_idle_handler(&self, handler: &SharedIdleHandler) {
        let mut state = self.state.lock();
        if let Some(index) = state
            .idle_handlers
            .iter()
            .position(|registered| same_object(registered, handler))
        {
            state.idle_handlers.remove(index);
        }
    }

    /// Whether the consumer is parked waiting for work.
    pub fn is_idling(&self) -> bool {
        let state = self.state.lock();
        !state.quitting && self.parker.is_parked()
    }

    pub fn is_quitting(&self) -> bool {
        self.state.lock().quitting
    }

    /// Number of pending messages, barriers included.
    pub fn len(&self) -> usize {
        self.state.lock().chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().chain.is_empty()
    }

    /// Snapshot of the pending messages and consumer flags.
    pub fn dump(&self) -> QueueDump {
        let state = self.state.lock();
        let now = self.clock.now_millis();
        let messages = state
            .chain
            .iter()
            .enumerate()
            .map(|(index, (_, message))| MessageSummary::describe(index, message, now))
            .collect();
        QueueDump {
            messages,
            idling: !state.quitting && self.parker.is_parked(),
            quitting: state.quitting,
            free_slots: state.chain.free_slots(),
        }
    }

    #[cfg(test)]
    fn idle_handler_count(&self) -> usize {
        self.state.lock().idle_handlers.len()
    }
}
