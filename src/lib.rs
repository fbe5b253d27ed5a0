mod chain;
pub mod clock;
pub mod dump;
pub mod error;
pub mod handler;
pub mod idle;
pub mod looper;
pub mod message;
pub mod parker;
pub mod queue;
pub mod threading;

// Re-export for easier use from binaries and tests
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use dump::{MessageSummary, QueueDump};
pub use error::QueueError;
pub use handler::Handler;
pub use idle::{IdleHandler, SharedIdleHandler};
pub use looper::{LoopStats, Looper, LooperConfig, LooperThread};
pub use message::{BarrierToken, Message, MessageFilter, MessageTarget, Payload, Runnable, Target};
pub use parker::{Parker, PollTimeout, ThreadParker};
pub use queue::MessageQueue;
pub use threading::ThreadPriority;
