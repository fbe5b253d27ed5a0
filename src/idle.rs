//! Idle handlers: low-priority callbacks run when the consumer has nothing due.

use crate::error::QueueError;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Callback invoked when the queue runs out of due messages and is about to block.
///
/// It may also run while messages are pending, as long as none of them is due yet. Return `true`
/// to stay registered, `false` to be removed after this run.
pub trait IdleHandler: Send + Sync {
    fn queue_idle(&self) -> bool;
}

impl<F> IdleHandler for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn queue_idle(&self) -> bool {
        self()
    }
}

/// Shared idle handler; registration and removal are by identity.
pub type SharedIdleHandler = Arc<dyn IdleHandler>;

/// Run one handler, converting a panic into [`QueueError::CallbackFault`].
pub(crate) fn invoke(handler: &SharedIdleHandler) -> Result<bool, QueueError> {
    panic::catch_unwind(AssertUnwindSafe(|| handler.queue_idle()))
        .map_err(|payload| QueueError::CallbackFault(panic_message(payload.as_ref())))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
