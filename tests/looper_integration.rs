// End-to-end tests: a real looper thread draining its queue while the test thread produces.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use looper_queue::{
    Handler, LooperConfig, LooperThread, Message, MessageFilter, MessageTarget, QueueError,
    Runnable, Target,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct Forward(Sender<i32>);

impl MessageTarget for Forward {
    fn dispatch_message(&self, message: &Message) {
        let _ = self.0.send(message.what);
    }

    fn name(&self) -> &str {
        "forward"
    }
}

fn spawn(name: &str) -> LooperThread {
    LooperThread::spawn(LooperConfig {
        name: name.to_string(),
        ..LooperConfig::default()
    })
    .expect("spawn looper thread")
}

fn forward() -> (Target, Receiver<i32>) {
    let (tx, rx) = unbounded();
    (Arc::new(Forward(tx)), rx)
}

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + RECV_TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[test]
fn barrier_holds_synchronous_messages_until_removed() {
    let looper = spawn("barrier");
    let queue = looper.queue();
    let (target, rx) = forward();

    let token = queue.post_sync_barrier(queue.now_millis()).unwrap();
    queue
        .enqueue(Message::with_what(target.clone(), 1), queue.now_millis())
        .unwrap();
    let mut asynchronous = Message::with_what(target.clone(), 2);
    asynchronous.set_asynchronous(true);
    queue.enqueue(asynchronous, queue.now_millis()).unwrap();

    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), 2);
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    queue.remove_sync_barrier(token).unwrap();
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), 1);

    looper.quit().unwrap();
    assert_eq!(looper.join().unwrap().dispatched, 2);
}

#[test]
fn earlier_message_wakes_consumer_waiting_on_later_one() {
    let looper = spawn("wake");
    let queue = looper.queue();
    let (target, rx) = forward();

    queue
        .enqueue(
            Message::with_what(target.clone(), 1),
            queue.now_millis() + 60_000,
        )
        .unwrap();
    assert!(wait_for(|| queue.is_idling()));

    let start = Instant::now();
    queue
        .enqueue(Message::with_what(target, 2), queue.now_millis())
        .unwrap();
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), 2);
    assert!(start.elapsed() < Duration::from_secs(2));

    looper.quit().unwrap();
    let stats = looper.join().unwrap();
    assert_eq!(stats.dispatched, 1);
}

#[test]
fn handler_delivers_messages_and_runnables() {
    let looper = spawn("handler");
    let (tx, rx) = unbounded();
    let handler = Handler::new(looper.queue(), "events", move |message: &Message| {
        let _ = tx.send(message.what);
    });

    let ran = Arc::new(AtomicUsize::new(0));
    let runnable: Runnable = {
        let ran = ran.clone();
        Arc::new(move || {
            ran.fetch_add(1, Ordering::SeqCst);
        })
    };

    let sent_at = Instant::now();
    handler
        .send_message_delayed(handler.obtain_message(10), Duration::from_millis(30))
        .unwrap();
    handler.post(runnable).unwrap();
    handler.send_empty_message(11).unwrap();

    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), 11);
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), 10);
    assert!(sent_at.elapsed() >= Duration::from_millis(25));
    assert_eq!(ran.load(Ordering::SeqCst), 1);

    looper.quit_safely().unwrap();
    assert_eq!(looper.join().unwrap().dispatched, 3);
}

#[test]
fn removed_messages_are_never_delivered() {
    let looper = spawn("remove");
    let (tx, rx) = unbounded();
    let handler = Handler::new(looper.queue(), "removable", move |message: &Message| {
        let _ = tx.send(message.what);
    });

    handler
        .send_message_delayed(handler.obtain_message(1), Duration::from_millis(50))
        .unwrap();
    handler
        .send_message_delayed(handler.obtain_message(2), Duration::from_millis(60))
        .unwrap();
    assert!(handler.has_messages(1));
    assert_eq!(handler.remove_messages(1), 1);
    assert!(!handler.has_messages(1));

    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), 2);
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    looper.quit().unwrap();
    looper.join().unwrap();
}

#[test]
fn quit_safely_runs_due_work_and_drops_future_work() {
    let looper = spawn("quit-safely");
    let queue = looper.queue();
    let (target, rx) = forward();

    let token = queue.post_sync_barrier(queue.now_millis()).unwrap();
    queue
        .enqueue(Message::with_what(target.clone(), 1), queue.now_millis())
        .unwrap();
    queue
        .enqueue(
            Message::with_what(target.clone(), 2),
            queue.now_millis() + 60_000,
        )
        .unwrap();

    looper.quit_safely().unwrap();
    // The consumer may already have disposed the queue, taking the barrier with it.
    let _ = queue.remove_sync_barrier(token);

    let stats = looper.join().unwrap();
    let delivered: Vec<i32> = rx.try_iter().collect();
    assert!(!delivered.contains(&2));
    assert_eq!(stats.dispatched as usize, delivered.len());

    assert_eq!(
        queue.enqueue(Message::with_what(target, 3), queue.now_millis()),
        Ok(false)
    );
    assert!(queue.post_sync_barrier(queue.now_millis()).is_none());
    assert!(!queue.is_idling());
}

#[test]
fn quit_discards_pending_messages() {
    let looper = spawn("quit");
    let queue = looper.queue();
    let (target, rx) = forward();
    for what in 0..10 {
        queue
            .enqueue(
                Message::with_what(target.clone(), what),
                queue.now_millis() + 10_000,
            )
            .unwrap();
    }
    looper.quit().unwrap();
    looper.quit().unwrap();
    assert_eq!(looper.join().unwrap().dispatched, 0);
    assert!(rx.try_recv().is_err());
    assert!(queue.is_empty());
}

#[test]
fn non_quittable_looper_rejects_quit() {
    let looper = LooperThread::spawn(LooperConfig {
        name: "main".to_string(),
        quit_allowed: false,
        ..LooperConfig::default()
    })
    .unwrap();
    assert!(matches!(looper.quit(), Err(QueueError::InvalidState(_))));
    assert!(!looper.queue().is_quitting());
    // The thread keeps running; it is detached when the handle drops.
}

#[test]
fn idle_handler_runs_once_per_idle_period() {
    let looper = spawn("idle");
    let queue = looper.queue();
    let runs = Arc::new(AtomicUsize::new(0));
    {
        let runs = runs.clone();
        queue.add_idle_handler(Arc::new(move || {
            runs.fetch_add(1, Ordering::SeqCst);
            true
        }));
    }

    // Registration alone does not wake a parked consumer; a message does.
    let (target, rx) = forward();
    queue
        .enqueue(Message::with_what(target.clone(), 1), queue.now_millis())
        .unwrap();
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), 1);
    assert!(wait_for(|| runs.load(Ordering::SeqCst) >= 1));
    assert!(wait_for(|| queue.is_idling()));

    let settled = runs.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(runs.load(Ordering::SeqCst), settled);

    queue
        .enqueue(Message::with_what(target, 2), queue.now_millis())
        .unwrap();
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap(), 2);
    assert!(wait_for(|| runs.load(Ordering::SeqCst) > settled));

    looper.quit().unwrap();
    looper.join().unwrap();
}

#[test]
fn concurrent_producers_keep_per_producer_order() {
    const PRODUCERS: i32 = 4;
    const PER_PRODUCER: i32 = 200;

    let looper = spawn("producers");
    let queue = looper.queue();
    let (target, rx) = forward();
    // Everything shares one due-time in the past, so dispatch order is insertion order.
    let when = queue.now_millis();

    let handles: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let queue = queue.clone();
            let target = target.clone();
            std::thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let what = producer * PER_PRODUCER + i;
                    queue
                        .enqueue(Message::with_what(target.clone(), what), when)
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut received = Vec::new();
    while received.len() < (PRODUCERS * PER_PRODUCER) as usize {
        received.push(rx.recv_timeout(RECV_TIMEOUT).unwrap());
    }
    for producer in 0..PRODUCERS {
        let own: Vec<i32> = received
            .iter()
            .copied()
            .filter(|what| what / PER_PRODUCER == producer)
            .collect();
        assert!(own.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(own.len(), PER_PRODUCER as usize);
    }

    assert!(!queue.has_messages(&MessageFilter::any(&target)));
    looper.quit().unwrap();
    looper.join().unwrap();
}
