//! hostlink Runtime - Single-threaded event loops
//!
//! An event loop owns one worker thread that runs queued tasks in FIFO
//! order, and one timer thread that turns due timers into queued tasks.
//! - Fire-and-forget enqueue from any thread
//! - One-shot and repeating timers with iteration bounds
//! - Pause/resume of every timer without drift
//! - Blocking rendezvous (`do_blocking`, `do_get`) from other threads
//! - Generators stepped once per loop iteration

pub mod event_loop;
pub mod pause;
pub mod queue;
pub mod rendezvous;
pub mod signal;
pub mod timer;
pub mod yielded;

pub use event_loop::{EventLoop, LoopConfig, LoopStats, PumpOutcome};
pub use pause::PauseController;
pub use queue::TaskQueue;
pub use signal::WakeSignal;
pub use timer::{RepeatingAction, TimerInfo, TimerRegistry, TimerSpec};
pub use yielded::{Generator, GeneratorState};
