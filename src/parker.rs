//! Consumer-side parking primitive.
//!
//! The queue never sleeps on its own mutex. The consumer releases the queue lock, then parks here
//! with a timeout derived from the earliest due-time; producers call [`Parker::unpark`] after
//! linking a message that the consumer must look at.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// How long a single park may last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTimeout {
    /// Poll: consume a pending wake if there is one, never block.
    Immediate,
    /// Block until woken.
    Indefinite,
    /// Block for at most this many milliseconds, returning early when woken.
    Millis(u64),
}

/// Park/unpark seam the queue consumes from its environment.
///
/// `unpark` is level-triggered: a wake delivered while nobody is parked is remembered and makes
/// the next `park` return immediately.
pub trait Parker: Send + Sync {
    /// Called only from the consumer thread.
    fn park(&self, timeout: PollTimeout);
    /// Callable from any thread, any number of times.
    fn unpark(&self);
    /// Whether the consumer is currently blocked inside [`Parker::park`].
    fn is_parked(&self) -> bool;
}

#[derive(Debug, Default)]
struct ParkState {
    notified: bool,
    parked: bool,
}

/// [`Parker`] built on a `parking_lot` mutex/condvar pair.
#[derive(Debug, Default)]
pub struct ThreadParker {
    state: Mutex<ParkState>,
    condvar: Condvar,
}

impl ThreadParker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Parker for ThreadParker {
    fn park(&self, timeout: PollTimeout) {
        let mut state = self.state.lock();
        if !state.notified {
            match timeout {
                PollTimeout::Immediate => {}
                PollTimeout::Indefinite => {
                    state.parked = true;
                    while !state.notified {
                        self.condvar.wait(&mut state);
                    }
                    state.parked = false;
                }
                PollTimeout::Millis(millis) => {
                    // Checked add: a huge timeout degrades to an indefinite wait.
                    let deadline = Instant::now().checked_add(Duration::from_millis(millis));
                    state.parked = true;
                    while !state.notified {
                        match deadline {
                            Some(deadline) => {
                                if self.condvar.wait_until(&mut state, deadline).timed_out() {
                                    break;
                                }
                            }
                            None => self.condvar.wait(&mut state),
                        }
                    }
                    state.parked = false;
                }
            }
        }
        state.notified = false;
    }

    fn unpark(&self) {
        let mut state = self.state.lock();
        state.notified = true;
        if state.parked {
            self.condvar.notify_one();
        }
    }

    fn is_parked(&self) -> bool {
        self.state.lock().parked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn immediate_poll_never_blocks() {
        let parker = ThreadParker::new();
        let start = Instant::now();
        parker.park(PollTimeout::Immediate);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn wake_before_park_is_not_lost() {
        let parker = ThreadParker::new();
        parker.unpark();
        let start = Instant::now();
        parker.park(PollTimeout::Indefinite);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn immediate_poll_consumes_pending_wake() {
        let parker = ThreadParker::new();
        parker.unpark();
        parker.park(PollTimeout::Immediate);
        let start = Instant::now();
        parker.park(PollTimeout::Millis(30));
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn timed_park_expires() {
        let parker = ThreadParker::new();
        let start = Instant::now();
        parker.park(PollTimeout::Millis(20));
        assert!(start.elapsed() >= Duration::from_millis(15));
        assert!(!parker.is_parked());
    }

    #[test]
    fn unpark_from_other_thread_releases_indefinite_park() {
        let parker = Arc::new(ThreadParker::new());
        let waker = parker.clone();
        let handle = std::thread::spawn(move || {
            while !waker.is_parked() {
                std::thread::yield_now();
            }
            waker.unpark();
        });
        parker.park(PollTimeout::Indefinite);
        handle.join().unwrap();
        assert!(!parker.is_parked());
    }
}
