//! Handlers: message targets bound to a queue.
//!
//! A [`Handler`] is both the producer-side API for one queue (send, post, remove, query) and the
//! [`MessageTarget`] its messages are dispatched to. Every message sent through a handler is
//! addressed to that handler, so handler-scoped removal only touches its own work.

use crate::error::QueueError;
use crate::message::{Message, MessageFilter, MessageTarget, Payload, Runnable, Target};
use crate::queue::MessageQueue;
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked for messages that carry no runnable of their own.
pub type HandlerCallback = Box<dyn Fn(&Message) + Send + Sync>;

pub struct Handler {
    name: String,
    queue: Arc<MessageQueue>,
    callback: Option<HandlerCallback>,
    asynchronous: bool,
}

impl Handler {
    /// Handler whose messages are handled by `callback`.
    pub fn new(
        queue: Arc<MessageQueue>,
        name: impl Into<String>,
        callback: impl Fn(&Message) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            queue,
            callback: Some(Box::new(callback)),
            asynchronous: false,
        })
    }

    /// Like [`Handler::new`], but every message sent through it bypasses sync barriers.
    pub fn new_async(
        queue: Arc<MessageQueue>,
        name: impl Into<String>,
        callback: impl Fn(&Message) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            queue,
            callback: Some(Box::new(callback)),
            asynchronous: true,
        })
    }

    /// Handler used only to post runnables.
    pub fn for_runnables(queue: Arc<MessageQueue>, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            queue,
            callback: None,
            asynchronous: false,
        })
    }

    pub fn queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }

    pub fn is_asynchronous(&self) -> bool {
        self.asynchronous
    }

    fn target(self: &Arc<Self>) -> Target {
        self.clone()
    }

    /// Due-time `delay` from now. 0 is reserved for front-of-queue inserts.
    fn due_after(&self, delay: Duration) -> u64 {
        let delay = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.queue.now_millis().saturating_add(delay).max(1)
    }

    /// A message addressed to this handler.
    pub fn obtain_message(self: &Arc<Self>, what: i32) -> Message {
        Message::with_what(self.target(), what)
    }

    pub fn send_message(self: &Arc<Self>, message: Message) -> Result<bool, QueueError> {
        self.send_message_delayed(message, Duration::ZERO)
    }

    pub fn send_empty_message(self: &Arc<Self>, what: i32) -> Result<bool, QueueError> {
        self.send_message(self.obtain_message(what))
    }

    pub fn send_message_delayed(
        self: &Arc<Self>,
        message: Message,
        delay: Duration,
    ) -> Result<bool, QueueError> {
        let when = self.due_after(delay);
        self.send_message_at_time(message, when)
    }

    /// Enqueue `message` for this handler at absolute uptime `when`.
    ///
    /// # Returns
    /// `Ok(false)` when the looper has quit; see [`MessageQueue::enqueue`].
    pub fn send_message_at_time(
        self: &Arc<Self>,
        mut message: Message,
        when: u64,
    ) -> Result<bool, QueueError> {
        message.set_target(self.target());
        if self.asynchronous {
            message.set_asynchronous(true);
        }
        self.queue.enqueue(message, when)
    }

    /// Enqueue ahead of everything already pending, due-time notwithstanding.
    pub fn send_message_at_front_of_queue(
        self: &Arc<Self>,
        message: Message,
    ) -> Result<bool, QueueError> {
        self.send_message_at_time(message, 0)
    }

    pub fn post(self: &Arc<Self>, runnable: Runnable) -> Result<bool, QueueError> {
        self.post_delayed(runnable, Duration::ZERO)
    }

    pub fn post_delayed(
        self: &Arc<Self>,
        runnable: Runnable,
        delay: Duration,
    ) -> Result<bool, QueueError> {
        let when = self.due_after(delay);
        self.post_at_time(runnable, when)
    }

    pub fn post_at_time(self: &Arc<Self>, runnable: Runnable, when: u64) -> Result<bool, QueueError> {
        self.send_message_at_time(Message::with_callback(self.target(), runnable), when)
    }

    pub fn post_at_front_of_queue(self: &Arc<Self>, runnable: Runnable) -> Result<bool, QueueError> {
        self.post_at_time(runnable, 0)
    }

    /// Remove pending messages with this `what` code.
    pub fn remove_messages(self: &Arc<Self>, what: i32) -> usize {
        self.queue
            .remove_messages(&MessageFilter::what(&self.target(), what))
    }

    /// Remove pending messages with this `what` code carrying exactly `obj`.
    pub fn remove_messages_with_object(self: &Arc<Self>, what: i32, obj: &Payload) -> usize {
        self.queue
            .remove_messages(&MessageFilter::what(&self.target(), what).with_object(obj))
    }

    /// Remove pending posts of `runnable`.
    pub fn remove_callbacks(self: &Arc<Self>, runnable: &Runnable) -> usize {
        self.queue
            .remove_messages(&MessageFilter::callback(&self.target(), runnable))
    }

    /// Remove everything pending for this handler, optionally only entries carrying `obj`.
    pub fn remove_callbacks_and_messages(self: &Arc<Self>, obj: Option<&Payload>) -> usize {
        self.queue
            .remove_callbacks_and_messages(&self.target(), obj)
    }

    pub fn has_messages(self: &Arc<Self>, what: i32) -> bool {
        self.queue
            .has_messages(&MessageFilter::what(&self.target(), what))
    }

    pub fn has_callbacks(self: &Arc<Self>, runnable: &Runnable) -> bool {
        self.queue
            .has_messages(&MessageFilter::callback(&self.target(), runnable))
    }
}

impl MessageTarget for Handler {
    /// Runnables take precedence over the handler callback.
    fn dispatch_message(&self, message: &Message) {
        if let Some(runnable) = message.callback() {
            runnable();
        } else if let Some(callback) = &self.callback {
            callback(message);
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
