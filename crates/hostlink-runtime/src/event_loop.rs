//! Event loop - one worker thread draining a task queue
//!
//! Any thread may hand work to a loop; only the loop's worker runs it.
//! Tasks run one at a time in FIFO order. Timers fire through the same queue,
//! so a loop never runs two pieces of work concurrently.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use hostlink_core::{ErrorSink, HostlinkError, HostlinkResult, Task, TaskResult, TimerId, TracingSink};
use hostlink_time::Iterations;
use parking_lot::Mutex;

use crate::queue::TaskQueue;
use crate::signal::WakeSignal;
use crate::timer::{run_timer_thread, RepeatingAction, TimerInfo, TimerRegistry, TimerSpec};
use crate::yielded;

/// Event loop configuration
#[derive(Clone, Debug)]
pub struct LoopConfig {
    /// Name used for thread names and log fields
    pub name: String,
    /// Longest sleep while the queue is empty
    pub idle_wait: Duration,
    /// Sleep between generator steps while generators are pending
    pub yield_tick: Duration,
    /// Period of the exhausted-timer sweep
    pub gc_interval: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        LoopConfig {
            name: "hostlink-loop".to_string(),
            idle_wait: Duration::from_millis(200),
            yield_tick: Duration::from_millis(1),
            gc_interval: Duration::from_secs(30),
        }
    }
}

impl LoopConfig {
    pub fn named(name: impl Into<String>) -> Self {
        LoopConfig {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Loop counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub tasks_enqueued: u64,
    pub tasks_run: u64,
    pub starts: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    run: AtomicU64,
    starts: AtomicU64,
}

/// Result of pumping the loop while waiting for a condition
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PumpOutcome<T> {
    Ready(T),
    TimedOut,
    /// The loop was stopped while waiting
    Stopped,
}

/// State shared between loop handles and the loop's threads
pub(crate) struct LoopShared {
    pub(crate) config: LoopConfig,
    pub(crate) queue: TaskQueue,
    pub(crate) wake: WakeSignal,
    pub(crate) running: AtomicBool,
    pub(crate) timers: Arc<TimerRegistry>,
    pub(crate) sink: Arc<dyn ErrorSink>,
    worker: Mutex<Option<ThreadId>>,
    counters: Counters,
}

impl LoopShared {
    pub(crate) fn enqueue(&self, task: Task) {
        self.queue.push(task);
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        self.wake.set();
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn run_one(&self) -> bool {
        let ran = self.queue.try_run_one(self.sink.as_ref());
        if ran {
            self.counters.run.fetch_add(1, Ordering::Relaxed);
        }
        ran
    }

    fn halt(&self) -> bool {
        if !self.running.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.timers.shutdown();
        let discarded = self.queue.clear();
        self.wake.set();
        tracing::debug!(event_loop = %self.config.name, discarded, "loop stopped");
        true
    }
}

#[derive(Default)]
struct LoopThreads {
    worker: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
}

struct LoopInner {
    shared: Arc<LoopShared>,
    threads: Mutex<LoopThreads>,
}

impl Drop for LoopInner {
    fn drop(&mut self) {
        self.shared.halt();
    }
}

/// Handle to an event loop; clones refer to the same loop
#[derive(Clone)]
pub struct EventLoop {
    inner: Arc<LoopInner>,
}

impl EventLoop {
    /// Create a stopped loop that logs task failures
    pub fn new(config: LoopConfig) -> Self {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    /// Create a stopped loop reporting task failures to `sink`
    pub fn with_sink(config: LoopConfig, sink: Arc<dyn ErrorSink>) -> Self {
        let shared = Arc::new(LoopShared {
            config,
            queue: TaskQueue::new(),
            wake: WakeSignal::new(),
            running: AtomicBool::new(false),
            timers: Arc::new(TimerRegistry::new()),
            sink,
            worker: Mutex::new(None),
            counters: Counters::default(),
        });
        EventLoop {
            inner: Arc::new(LoopInner {
                shared,
                threads: Mutex::new(LoopThreads::default()),
            }),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<LoopShared> {
        &self.inner.shared
    }

    pub fn name(&self) -> &str {
        &self.inner.shared.config.name
    }

    pub fn config(&self) -> &LoopConfig {
        &self.inner.shared.config
    }

    pub fn is_running(&self) -> bool {
        self.inner.shared.is_running()
    }

    /// Whether the calling thread is this loop's worker
    pub fn is_loop_thread(&self) -> bool {
        *self.inner.shared.worker.lock() == Some(thread::current().id())
    }

    /// Start the worker and timer threads. Idempotent while running.
    /// A previous worker still finishing its last task is joined first.
    pub fn start(&self) -> HostlinkResult<()> {
        let shared = self.shared();
        let mut threads = self.inner.threads.lock();
        if shared.is_running() {
            return Ok(());
        }
        if self.is_loop_thread() {
            return Err(HostlinkError::invalid_state(
                "cannot restart a loop from its own worker thread",
            ));
        }

        if let Some(worker) = threads.worker.take() {
            let _ = worker.join();
        }
        if let Some(timer) = threads.timer.take() {
            let _ = timer.join();
        }

        shared.timers.reset();
        shared.wake.reset();
        shared.running.store(true, Ordering::Release);

        let name = shared.config.name.clone();
        let timer_shared = shared.clone();
        let timer = thread::Builder::new()
            .name(format!("{}-timer", name))
            .spawn(move || {
                let registry = timer_shared.timers.clone();
                run_timer_thread(registry, |task| {
                    if timer_shared.is_running() {
                        timer_shared.enqueue(task);
                    }
                });
            })
            .map_err(|e| {
                shared.running.store(false, Ordering::Release);
                HostlinkError::invalid_state(format!("failed to spawn timer thread: {}", e))
            })?;

        let worker_shared = shared.clone();
        let worker = match thread::Builder::new()
            .name(format!("{}-worker", name))
            .spawn(move || run_worker(worker_shared))
        {
            Ok(worker) => worker,
            Err(e) => {
                shared.halt();
                threads.timer = Some(timer);
                return Err(HostlinkError::invalid_state(format!(
                    "failed to spawn worker thread: {}",
                    e
                )));
            }
        };

        *shared.worker.lock() = Some(worker.thread().id());
        threads.worker = Some(worker);
        threads.timer = Some(timer);
        shared.counters.starts.fetch_add(1, Ordering::Relaxed);

        let registry = shared.timers.clone();
        let stale_after = shared.config.gc_interval;
        let mut gc = TimerSpec::repeating(Iterations::Unbounded, stale_after, stale_after)
            .labeled("timer-gc");
        gc.internal = true;
        shared.timers.register(
            Arc::new(move || {
                let evicted = registry.collect_garbage(Instant::now(), stale_after);
                if evicted > 0 {
                    tracing::debug!(evicted, "timer sweep");
                }
                Ok(())
            }),
            gc,
            Instant::now(),
        );

        tracing::info!(event_loop = %name, "loop started");
        Ok(())
    }

    /// Stop the loop: cancel every timer and discard pending tasks.
    /// Idempotent; does not wait for a task already running.
    pub fn stop(&self) {
        self.shared().halt();
    }

    /// Join the worker and timer threads of a stopped loop
    pub fn join(&self) -> HostlinkResult<()> {
        if self.is_loop_thread() {
            return Err(HostlinkError::invalid_state(
                "cannot join a loop from its own worker thread",
            ));
        }
        let mut threads = self.inner.threads.lock();
        if self.is_running() {
            return Err(HostlinkError::invalid_state("cannot join a running loop"));
        }
        if let Some(worker) = threads.worker.take() {
            let _ = worker.join();
        }
        if let Some(timer) = threads.timer.take() {
            let _ = timer.join();
        }
        Ok(())
    }

    /// Queue work. Safe from any thread; work queued on a stopped loop
    /// runs once the loop starts.
    pub fn enqueue(&self, task: impl Into<Task>) {
        self.shared().enqueue(task.into());
    }

    /// Run `task` once after `delay`
    pub fn do_in(&self, delay: Duration, task: impl Into<Task>) -> HostlinkResult<TimerId> {
        let slot = Mutex::new(Some(task.into()));
        let action: RepeatingAction = Arc::new(move || {
            let task = slot.lock().take();
            task.map_or(Ok(()), Task::run)
        });
        self.schedule(action, TimerSpec::once(delay))
    }

    /// Run `action` every `interval` after an initial `delay`, `iterations` times
    pub fn do_repeating<F>(
        &self,
        iterations: Iterations,
        delay: Duration,
        interval: Duration,
        action: F,
    ) -> HostlinkResult<TimerId>
    where
        F: Fn() -> TaskResult + Send + Sync + 'static,
    {
        self.schedule(
            Arc::new(action),
            TimerSpec::repeating(iterations, delay, interval),
        )
    }

    /// Register a repeating event described by `spec`
    pub fn schedule(&self, action: RepeatingAction, spec: TimerSpec) -> HostlinkResult<TimerId> {
        if !self.is_running() {
            return Err(HostlinkError::invalid_state(format!(
                "loop {} is not running; cannot schedule {}",
                self.name(),
                spec.label
            )));
        }
        Ok(self.shared().timers.register(action, spec, Instant::now()))
    }

    /// Cancel a repeating event; false if it already finished or was cancelled
    pub fn cancel_repeating(&self, id: TimerId) -> bool {
        self.shared().timers.cancel(id)
    }

    /// Cancel every repeating event
    pub fn stop_timers(&self) -> usize {
        self.shared().timers.cancel_all()
    }

    pub fn has_timer(&self, id: TimerId) -> bool {
        self.shared().timers.contains(id)
    }

    pub fn timer_info(&self, id: TimerId) -> Option<TimerInfo> {
        self.shared().timers.info(id)
    }

    /// Live timers, housekeeping excluded
    pub fn timer_count(&self) -> usize {
        self.shared().timers.len()
    }

    pub fn queue_len(&self) -> usize {
        self.shared().queue.len()
    }

    pub fn stats(&self) -> LoopStats {
        let counters = &self.shared().counters;
        LoopStats {
            tasks_enqueued: counters.enqueued.load(Ordering::Relaxed),
            tasks_run: counters.run.load(Ordering::Relaxed),
            starts: counters.starts.load(Ordering::Relaxed),
        }
    }

    /// Keep this loop working until `poll` yields a value, `deadline` passes,
    /// or the loop stops. Between polls other queued tasks run one at a time.
    ///
    /// Only callable from the loop's own worker.
    pub fn pump_until<T, F>(&self, deadline: Instant, mut poll: F) -> HostlinkResult<PumpOutcome<T>>
    where
        F: FnMut() -> Option<T>,
    {
        if !self.is_loop_thread() {
            return Err(HostlinkError::invalid_state(
                "pump_until must run on the loop's own worker",
            ));
        }
        let shared = self.shared();
        loop {
            if let Some(value) = poll() {
                return Ok(PumpOutcome::Ready(value));
            }
            if !shared.is_running() {
                return Ok(PumpOutcome::Stopped);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(PumpOutcome::TimedOut);
            }
            yielded::step_pending(shared.sink.as_ref());
            if !shared.run_one() {
                let wait = if yielded::has_pending() {
                    shared.config.yield_tick
                } else {
                    shared.config.idle_wait
                };
                shared.wake.wait_until_and_clear(deadline.min(now + wait));
            }
        }
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("name", &self.name())
            .field("running", &self.is_running())
            .field("queued", &self.queue_len())
            .finish()
    }
}

fn run_worker(shared: Arc<LoopShared>) {
    tracing::debug!(event_loop = %shared.config.name, "worker started");
    while shared.is_running() {
        yielded::step_pending(shared.sink.as_ref());
        if shared.run_one() {
            continue;
        }
        let wait = if yielded::has_pending() {
            shared.config.yield_tick
        } else {
            shared.config.idle_wait
        };
        shared.wake.wait_and_clear(wait);
    }
    tracing::debug!(event_loop = %shared.config.name, "worker exiting");
}
