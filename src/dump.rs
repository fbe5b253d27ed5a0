//! Diagnostic snapshot of a queue.

use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One pending message as seen by [`QueueDump`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSummary {
    /// Position in the chain (0 = head).
    pub index: usize,
    /// Due-time relative to the snapshot; negative when overdue.
    pub due_in_ms: i64,
    pub what: i32,
    pub arg1: i32,
    pub arg2: i32,
    pub target: Option<String>,
    pub barrier: bool,
    pub asynchronous: bool,
    pub callback: bool,
}

impl MessageSummary {
    pub(crate) fn describe(index: usize, message: &Message, now: u64) -> Self {
        let due_in_ms = i128::from(message.when()) - i128::from(now);
        Self {
            index,
            due_in_ms: due_in_ms.clamp(i64::MIN as i128, i64::MAX as i128) as i64,
            what: message.what,
            arg1: message.arg1,
            arg2: message.arg2,
            target: message.target().map(|target| target.name().to_string()),
            barrier: message.is_barrier(),
            asynchronous: message.is_asynchronous(),
            callback: message.callback().is_some(),
        }
    }
}

impl fmt::Display for MessageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ when={}ms", self.due_in_ms)?;
        match &self.target {
            Some(target) => {
                if self.callback {
                    write!(f, " callback")?;
                } else {
                    write!(f, " what={}", self.what)?;
                }
                if self.arg1 != 0 {
                    write!(f, " arg1={}", self.arg1)?;
                }
                if self.arg2 != 0 {
                    write!(f, " arg2={}", self.arg2)?;
                }
                write!(f, " target={target}")?;
            }
            None => write!(f, " barrier={}", self.arg1)?,
        }
        if self.asynchronous {
            write!(f, " async")?;
        }
        write!(f, " }}")
    }
}

/// Ordered listing of pending messages plus the consumer's state flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDump {
    pub messages: Vec<MessageSummary>,
    pub idling: bool,
    pub quitting: bool,
    /// Arena slots currently parked on the free list.
    pub free_slots: usize,
}

impl QueueDump {
    pub fn total(&self) -> usize {
        self.messages.len()
    }
}

impl fmt::Display for QueueDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for message in &self.messages {
            writeln!(f, "Message {}: {}", message.index, message)?;
        }
        write!(
            f,
            "(Total messages: {}, idling={}, quitting={})",
            self.total(),
            self.idling,
            self.quitting
        )
    }
}
