//! # Frame Driver Demo
//!
//! Drives a core thread the way an engine main loop would:
//! - Producer threads record draw commands into their own accessors
//! - Command arguments go into the active frame arena
//! - The driver sweeps every accessor once per tick, then advances the arenas
//!
//! Usage: `frame_driver [config.toml]`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

use ember_core::{CoreThread, CoreThreadConfig, WorkerSlots};

/// Frames to simulate.
const FRAMES: u64 = 240;
/// Producer threads recording commands.
const PRODUCERS: usize = 4;
/// Draw commands per producer per frame.
const DRAWS_PER_FRAME: usize = 64;

fn load_config() -> Result<CoreThreadConfig, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            let source = std::fs::read_to_string(&path)?;
            Ok(CoreThreadConfig::from_toml_str(&source)?)
        }
        None => Ok(CoreThreadConfig::default()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let slots = Arc::new(WorkerSlots::new(
        thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get),
    ));
    let core = CoreThread::with_worker_pool(config, slots.clone())?;

    let draws = Arc::new(AtomicU64::new(0));
    let stale = Arc::new(AtomicU64::new(0));
    let exhausted = Arc::new(AtomicU64::new(0));
    // Producers + driver meet twice a frame: after recording, after the sweep.
    let barrier = Arc::new(Barrier::new(PRODUCERS + 1));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let core = Arc::clone(&core);
            let draws = Arc::clone(&draws);
            let stale = Arc::clone(&stale);
            let exhausted = Arc::clone(&exhausted);
            let barrier = Arc::clone(&barrier);

            thread::spawn(move || {
                let accessor = core.get_accessor();

                for frame in 0..FRAMES {
                    for draw in 0..DRAWS_PER_FRAME {
                        #[allow(clippy::cast_precision_loss)]
                        let transform = [producer as f32, frame as f32, draw as f32, 1.0f32];
                        // Only failure here is an arena out of room this frame.
                        let Ok(handle) = core.get_frame_alloc().alloc(&transform) else {
                            exhausted.fetch_add(1, Ordering::Relaxed);
                            continue;
                        };

                        let reader = Arc::clone(&core);
                        let draws = Arc::clone(&draws);
                        let stale = Arc::clone(&stale);
                        accessor.queue_command(
                            move || match reader.frame_allocs().read::<[f32; 4]>(handle) {
                                Ok(_) => {
                                    draws.fetch_add(1, Ordering::Relaxed);
                                }
                                Err(_) => {
                                    stale.fetch_add(1, Ordering::Relaxed);
                                }
                            },
                            false,
                        );
                    }

                    barrier.wait(); // recorded
                    barrier.wait(); // swept and advanced
                }
            })
        })
        .collect();

    let start = Instant::now();
    for _ in 0..FRAMES {
        barrier.wait();
        core.submit_accessors(true)?;
        core.update();
        barrier.wait();
    }
    let elapsed = start.elapsed();

    for p in producers {
        p.join().map_err(|_| "producer thread panicked")?;
    }
    core.shutdown()?;

    let stats = core.stats();
    println!("=== Frame Driver ===");
    println!("Frames: {FRAMES}");
    println!("Total time: {elapsed:?}");
    println!("Draws executed: {}", draws.load(Ordering::Relaxed));
    println!("Stale argument reads: {}", stale.load(Ordering::Relaxed));
    println!("Arena exhausted allocations: {}", exhausted.load(Ordering::Relaxed));
    println!("Batches played: {}", stats.batches_played);
    println!("Average batch size: {:.1}", stats.avg_batch_size);
    println!("Largest batch: {}", stats.largest_batch);
    println!("Failed commands: {}", stats.failed_commands);
    println!("Worker slots available: {}/{}", slots.available(), slots.total());

    Ok(())
}
