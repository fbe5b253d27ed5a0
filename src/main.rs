// Demo binary - drives a looper thread from several producer threads
//
// The binary spawns a looper, posts delayed messages from a configurable number of producers
// (optionally behind a sync barrier that only asynchronous messages may pass), then quits the
// looper and prints dispatch statistics as JSON.

use clap::Parser;
use crossbeam_channel::unbounded;
use log::info;
use looper_queue::{Handler, LooperConfig, LooperThread, Message};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Command-line options.
#[derive(Debug, Parser)]
#[command(name = "looper-demo", about = "Exercise a message looper from producer threads")]
struct CliOptions {
    /// Number of producer threads.
    #[arg(long, default_value_t = 4)]
    producers: usize,

    /// Messages sent by each producer.
    #[arg(long, default_value_t = 250)]
    messages: usize,

    /// Upper bound for per-message delays, in milliseconds.
    #[arg(long, default_value_t = 50)]
    max_delay_ms: u64,

    /// Hold synchronous messages behind a sync barrier for this long.
    #[arg(long)]
    barrier_ms: Option<u64>,

    /// Send every other message through an asynchronous handler.
    #[arg(long)]
    mix_async: bool,

    /// Quit safely (finish due messages) instead of discarding pending work.
    #[arg(long)]
    quit_safely: bool,

    /// Print the queue dump just before quitting.
    #[arg(long)]
    dump: bool,

    /// JSON file with a `LooperConfig`.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
struct Dispatch {
    what: i32,
    when: u64,
    asynchronous: bool,
}

#[derive(Debug, Serialize)]
struct Report {
    sent: usize,
    dispatched: usize,
    asynchronous: usize,
    idle_passes: u64,
    out_of_order: usize,
    looper: looper_queue::LoopStats,
}

fn load_config(path: Option<&PathBuf>) -> Result<LooperConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&text)?)
        }
        None => Ok(LooperConfig {
            name: "demo-looper".to_string(),
            ..LooperConfig::default()
        }),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let options = CliOptions::parse();
    let config = load_config(options.config.as_ref())?;
    info!("starting looper {} ({:?})", config.name, config.priority);

    let looper = LooperThread::spawn(config)?;
    let queue = looper.queue();

    let idle_passes = Arc::new(AtomicU64::new(0));
    {
        let idle_passes = idle_passes.clone();
        queue.add_idle_handler(Arc::new(move || {
            idle_passes.fetch_add(1, Ordering::Relaxed);
            true
        }));
    }

    let (tx, rx) = unbounded();
    let sync_handler = {
        let tx = tx.clone();
        Handler::new(queue.clone(), "demo-sync", move |message: &Message| {
            let _ = tx.send(Dispatch {
                what: message.what,
                when: message.when(),
                asynchronous: false,
            });
        })
    };
    let async_handler = Handler::new_async(queue.clone(), "demo-async", move |message: &Message| {
        let _ = tx.send(Dispatch {
            what: message.what,
            when: message.when(),
            asynchronous: true,
        });
    });

    let barrier = options
        .barrier_ms
        .and_then(|_| queue.post_sync_barrier(queue.now_millis()));

    let mut producers = Vec::with_capacity(options.producers);
    for producer in 0..options.producers {
        let sync_handler = sync_handler.clone();
        let async_handler = async_handler.clone();
        let messages = options.messages;
        let max_delay = options.max_delay_ms.max(1);
        let mix_async = options.mix_async;
        producers.push(
            std::thread::Builder::new()
                .name(format!("producer-{producer}"))
                .spawn(move || {
                    let mut sent: usize = 0;
                    for i in 0..messages {
                        let what = (producer * messages + i) as i32;
                        let delay =
                            Duration::from_millis((i as u64 * 7 + producer as u64 * 3) % max_delay);
                        let handler = if mix_async && i % 2 == 1 {
                            &async_handler
                        } else {
                            &sync_handler
                        };
                        let message = handler.obtain_message(what);
                        if let Ok(true) = handler.send_message_delayed(message, delay) {
                            sent += 1;
                        }
                    }
                    sent
                })?,
        );
    }

    let mut sent: usize = 0;
    for producer in producers {
        sent += producer
            .join()
            .map_err(|_| "producer thread panicked")?;
    }

    if let (Some(token), Some(hold)) = (barrier, options.barrier_ms) {
        std::thread::sleep(Duration::from_millis(hold));
        queue.remove_sync_barrier(token)?;
    }

    let mut dispatched = Vec::with_capacity(sent);
    let deadline = Duration::from_millis(options.max_delay_ms + 1_000);
    while dispatched.len() < sent {
        match rx.recv_timeout(deadline) {
            Ok(event) => dispatched.push(event),
            Err(_) => break,
        }
    }

    if options.dump {
        println!("{}", serde_json::to_string_pretty(&queue.dump())?);
    }

    if options.quit_safely {
        looper.quit_safely()?;
    } else {
        looper.quit()?;
    }
    let stats = looper.join().map_err(|_| "looper thread panicked")?;

    let out_of_order = dispatched
        .windows(2)
        .filter(|pair| pair[1].when < pair[0].when && !pair[1].asynchronous)
        .count();
    let report = Report {
        sent,
        dispatched: dispatched.len(),
        asynchronous: dispatched.iter().filter(|event| event.asynchronous).count(),
        idle_passes: idle_passes.load(Ordering::Relaxed),
        out_of_order,
        looper: stats,
    };
    info!(
        "last dispatched what={:?}",
        dispatched.last().map(|event| event.what)
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
