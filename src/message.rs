//! Message representation shared by the queue and the dispatch layer.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Receiver of dispatched messages.
///
/// The queue treats targets as opaque identities: it only ever asks whether two targets are the
/// same object. The looper calls [`MessageTarget::dispatch_message`] on the consumer thread.
pub trait MessageTarget: Send + Sync {
    fn dispatch_message(&self, message: &Message);

    /// Label used by diagnostics.
    fn name(&self) -> &str {
        "target"
    }
}

/// Shared handle to a message target; identity is the allocation.
pub type Target = Arc<dyn MessageTarget>;

/// Arbitrary payload attached to a message, compared by identity in filters.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Work item run in place of the target's callback, compared by identity in filters.
pub type Runnable = Arc<dyn Fn() + Send + Sync>;

/// Identity comparison for shared handles, ignoring vtable metadata.
pub fn same_object<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Token identifying a posted sync barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BarrierToken(pub i32);

impl fmt::Display for BarrierToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

const FLAG_IN_USE: u8 = 1 << 0;
const FLAG_ASYNCHRONOUS: u8 = 1 << 1;

/// A unit of scheduled work.
///
/// A message with no target is a sync barrier; its `arg1` carries the barrier token. The queue owns
/// `when` and the in-use flag while the message is linked; every other field is content the queue
/// never looks at beyond filter matching.
#[derive(Clone, Default)]
pub struct Message {
    /// User-defined code identifying what the message is about.
    pub what: i32,
    pub arg1: i32,
    pub arg2: i32,
    pub obj: Option<Payload>,
    target: Option<Target>,
    callback: Option<Runnable>,
    when: u64,
    flags: u8,
}

impl Message {
    /// Empty message with no target.
    pub fn new() -> Self {
        Self::default()
    }

    /// Message addressed to `target`.
    pub fn for_target(target: Target) -> Self {
        Self {
            target: Some(target),
            ..Self::default()
        }
    }

    /// Message addressed to `target` with the given `what` code.
    pub fn with_what(target: Target, what: i32) -> Self {
        Self {
            what,
            ..Self::for_target(target)
        }
    }

    /// Message whose dispatch runs `callback` instead of the target's own handling.
    pub fn with_callback(target: Target, callback: Runnable) -> Self {
        Self {
            callback: Some(callback),
            ..Self::for_target(target)
        }
    }

    pub(crate) fn barrier(token: BarrierToken, when: u64) -> Self {
        Self {
            arg1: token.0,
            when,
            flags: FLAG_IN_USE,
            ..Self::default()
        }
    }

    /// Copy of the content fields, neither in use nor scheduled. Use this to re-send a message
    /// that is currently being dispatched.
    pub fn duplicate(&self) -> Self {
        Self {
            what: self.what,
            arg1: self.arg1,
            arg2: self.arg2,
            obj: self.obj.clone(),
            target: self.target.clone(),
            callback: self.callback.clone(),
            when: 0,
            flags: self.flags & FLAG_ASYNCHRONOUS,
        }
    }

    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    pub fn set_target(&mut self, target: Target) {
        self.target = Some(target);
    }

    pub fn callback(&self) -> Option<&Runnable> {
        self.callback.as_ref()
    }

    pub fn set_callback(&mut self, callback: Runnable) {
        self.callback = Some(callback);
    }

    pub fn with_object(mut self, obj: Payload) -> Self {
        self.obj = Some(obj);
        self
    }

    /// Due-time assigned when the message was enqueued.
    pub fn when(&self) -> u64 {
        self.when
    }

    pub(crate) fn set_when(&mut self, when: u64) {
        self.when = when;
    }

    /// Asynchronous messages are not held back by sync barriers.
    pub fn is_asynchronous(&self) -> bool {
        self.flags & FLAG_ASYNCHRONOUS != 0
    }

    pub fn set_asynchronous(&mut self, asynchronous: bool) {
        if asynchronous {
            self.flags |= FLAG_ASYNCHRONOUS;
        } else {
            self.flags &= !FLAG_ASYNCHRONOUS;
        }
    }

    /// Set from enqueue until the consumer has finished with the message.
    pub fn is_in_use(&self) -> bool {
        self.flags & FLAG_IN_USE != 0
    }

    pub(crate) fn mark_in_use(&mut self) {
        self.flags |= FLAG_IN_USE;
    }

    pub fn is_barrier(&self) -> bool {
        self.target.is_none()
    }

    /// Barrier token carried by a barrier message.
    pub fn barrier_token(&self) -> Option<BarrierToken> {
        self.is_barrier().then_some(BarrierToken(self.arg1))
    }

    /// Clear every field so payloads are released while the slot sits on the free list.
    pub(crate) fn recycle(&mut self) {
        *self = Self::default();
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Message");
        out.field("when", &self.when);
        match &self.target {
            Some(target) => {
                out.field("target", &target.name());
                if self.callback.is_some() {
                    out.field("callback", &true);
                } else {
                    out.field("what", &self.what);
                }
                out.field("arg1", &self.arg1).field("arg2", &self.arg2);
            }
            None => {
                out.field("barrier", &self.arg1);
            }
        }
        out.field("asynchronous", &self.is_asynchronous())
            .field("in_use", &self.is_in_use())
            .finish()
    }
}

#[derive(Clone)]
enum Selector {
    What(i32),
    Callback(Runnable),
    Any,
}

/// Match criteria for `has_messages`/`remove_messages`.
///
/// A filter always names a target; barriers (no target) never match.
#[derive(Clone)]
pub struct MessageFilter {
    target: Target,
    selector: Selector,
    object: Option<Payload>,
}

impl MessageFilter {
    /// Messages for `target` with the given `what` code.
    pub fn what(target: &Target, what: i32) -> Self {
        Self {
            target: target.clone(),
            selector: Selector::What(what),
            object: None,
        }
    }

    /// Messages for `target` carrying exactly this callback.
    pub fn callback(target: &Target, callback: &Runnable) -> Self {
        Self {
            target: target.clone(),
            selector: Selector::Callback(callback.clone()),
            object: None,
        }
    }

    /// Every message for `target`, callbacks included.
    pub fn any(target: &Target) -> Self {
        Self {
            target: target.clone(),
            selector: Selector::Any,
            object: None,
        }
    }

    /// Additionally require the message payload to be this very object.
    pub fn with_object(mut self, obj: &Payload) -> Self {
        self.object = Some(obj.clone());
        self
    }

    pub fn matches(&self, message: &Message) -> bool {
        let Some(target) = message.target.as_ref() else {
            return false;
        };
        if !same_object(target, &self.target) {
            return false;
        }
        let selected = match &self.selector {
            Selector::What(what) => message.what == *what,
            Selector::Callback(callback) => message
                .callback
                .as_ref()
                .is_some_and(|candidate| same_object(candidate, callback)),
            Selector::Any => true,
        };
        selected
            && match &self.object {
                None => true,
                Some(obj) => message
                    .obj
                    .as_ref()
                    .is_some_and(|candidate| same_object(candidate, obj)),
            }
    }
}
