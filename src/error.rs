//! Error taxonomy shared by the queue, the looper and handlers.

use crate::message::BarrierToken;
use thiserror::Error;

/// Misuse and fault conditions reported by [`crate::queue::MessageQueue`].
///
/// Sending to a queue that is already quitting is deliberately absent: that condition is
/// reported as a `false`/`None` return value because producers racing a shutdown is expected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// A caller passed something the queue cannot accept (e.g. a message without a target).
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The operation is not legal in the current state of the message or queue.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The barrier token was never posted or has already been removed.
    #[error("sync barrier {0} has not been posted or has already been removed")]
    BarrierNotFound(BarrierToken),

    /// An idle handler panicked while running.
    #[error("idle handler faulted: {0}")]
    CallbackFault(String),
}
