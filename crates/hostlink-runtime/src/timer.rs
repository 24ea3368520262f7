//! Timer registry - repeating events and the timer thread that fires them
//!
//! Every scheduled event (one-shot delays included) lives in the registry.
//! A dedicated timer thread sleeps until the earliest due instant, then turns
//! each due firing into a delivery task on the owning loop's queue. The
//! action itself only ever runs on the loop thread.
//!
//! Two counters track an event:
//! - `delivered`: firings handed to the queue by the timer thread
//! - `executed`: firings actually run on the loop
//!
//! An event unregisters itself when `executed` reaches its bound. Deliveries
//! for a cancelled or missing event are no-ops.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hostlink_core::{Task, TaskResult, TimerId};
use hostlink_time::{Iterations, TimerSchedule};
use parking_lot::{Condvar, Mutex};

/// Action run on every firing of a repeating event
pub type RepeatingAction = Arc<dyn Fn() -> TaskResult + Send + Sync + 'static>;

/// Parameters of a new repeating event
#[derive(Clone, Copy, Debug)]
pub struct TimerSpec {
    pub iterations: Iterations,
    pub delay: Duration,
    /// Period between firings (None = fire once)
    pub interval: Option<Duration>,
    pub label: &'static str,
    /// Housekeeping events are hidden from `timer_count`
    pub internal: bool,
}

impl TimerSpec {
    pub fn repeating(iterations: Iterations, delay: Duration, interval: Duration) -> Self {
        TimerSpec {
            iterations,
            delay,
            interval: Some(interval),
            label: "repeating",
            internal: false,
        }
    }

    pub fn once(delay: Duration) -> Self {
        TimerSpec {
            iterations: Iterations::Times(1),
            delay,
            interval: None,
            label: "delayed",
            internal: false,
        }
    }

    pub fn labeled(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }
}

struct RepeatingEvent {
    action: RepeatingAction,
    spec: TimerSpec,
    schedule: TimerSchedule,
    delivered: u32,
    executed: u32,
    last_delivery: Option<Instant>,
}

impl RepeatingEvent {
    fn is_delivery_exhausted(&self) -> bool {
        self.spec.iterations.is_exhausted(self.delivered)
    }
}

/// Snapshot of one registered event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerInfo {
    pub id: TimerId,
    pub label: &'static str,
    pub delivered: u32,
    pub executed: u32,
    pub suspended: bool,
}

#[derive(Default)]
struct RegistryState {
    events: BTreeMap<TimerId, RepeatingEvent>,
    next_id: TimerId,
    paused: bool,
    shutdown: bool,
}

/// Registry of live repeating events, shared by the loop and its timer thread
#[derive(Default)]
pub struct TimerRegistry {
    state: Mutex<RegistryState>,
    changed: Condvar,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an event armed at `now` (suspended if the registry is paused)
    pub fn register(&self, action: RepeatingAction, spec: TimerSpec, now: Instant) -> TimerId {
        let mut state = self.state.lock();
        let id = state.next_id.next();
        let schedule = if state.paused {
            TimerSchedule::suspended(spec.delay, spec.interval, now)
        } else {
            TimerSchedule::armed(spec.delay, spec.interval, now)
        };
        state.events.insert(
            id,
            RepeatingEvent {
                action,
                spec,
                schedule,
                delivered: 0,
                executed: 0,
                last_delivery: None,
            },
        );
        tracing::trace!(timer = ?id, label = spec.label, delay = ?spec.delay, interval = ?spec.interval, "timer registered");
        self.changed.notify_all();
        id
    }

    /// Cancel and unregister an event; later deliveries become no-ops
    pub fn cancel(&self, id: TimerId) -> bool {
        let removed = self.state.lock().events.remove(&id);
        self.changed.notify_all();
        removed.is_some()
    }

    /// Cancel every event
    pub fn cancel_all(&self) -> usize {
        let removed = std::mem::take(&mut self.state.lock().events);
        self.changed.notify_all();
        removed.len()
    }

    pub fn contains(&self, id: TimerId) -> bool {
        self.state.lock().events.contains_key(&id)
    }

    /// Number of registered events, housekeeping events excluded
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .events
            .values()
            .filter(|e| !e.spec.internal)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn info(&self, id: TimerId) -> Option<TimerInfo> {
        let state = self.state.lock();
        state.events.get(&id).map(|e| TimerInfo {
            id,
            label: e.spec.label,
            delivered: e.delivered,
            executed: e.executed,
            suspended: e.schedule.is_suspended(),
        })
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Suspend every schedule, preserving the time to each next firing.
    /// Returns false if already paused.
    pub fn pause(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        if state.paused {
            return false;
        }
        state.paused = true;
        for (id, event) in state.events.iter_mut() {
            let remaining = event.schedule.suspend(now);
            tracing::trace!(timer = ?id, remaining = ?remaining, "timer suspended");
        }
        self.changed.notify_all();
        true
    }

    /// Re-arm every suspended schedule at `now`.
    /// Returns false if not paused.
    pub fn resume(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        if !state.paused {
            return false;
        }
        state.paused = false;
        for event in state.events.values_mut() {
            event.schedule.resume(now);
        }
        self.changed.notify_all();
        true
    }

    /// Evict events whose delivery bound was reached but whose final
    /// deliveries never ran, with the last delivery older than `stale_after`
    pub fn collect_garbage(&self, now: Instant, stale_after: Duration) -> usize {
        let mut state = self.state.lock();
        let before = state.events.len();
        state.events.retain(|id, event| {
            let stale = event.is_delivery_exhausted()
                && event
                    .last_delivery
                    .map_or(true, |at| now.saturating_duration_since(at) >= stale_after);
            if stale {
                tracing::debug!(timer = ?id, label = event.spec.label, "evicting exhausted timer");
            }
            !stale
        });
        before - state.events.len()
    }

    /// Run one delivered firing on the loop thread
    pub(crate) fn execute(&self, id: TimerId) -> TaskResult {
        let action = {
            let mut state = self.state.lock();
            let Some(event) = state.events.get_mut(&id) else {
                return Ok(());
            };
            event.executed += 1;
            let action = event.action.clone();
            if event.spec.iterations.is_exhausted(event.executed) {
                state.events.remove(&id);
                tracing::trace!(timer = ?id, "timer completed");
                self.changed.notify_all();
            }
            action
        };
        action()
    }

    /// Allow a fresh timer thread to run, dropping leftover events
    pub(crate) fn reset(&self) {
        let mut state = self.state.lock();
        state.events.clear();
        state.paused = false;
        state.shutdown = false;
    }

    /// Cancel every event and release the timer thread
    pub(crate) fn shutdown(&self) {
        let removed = {
            let mut state = self.state.lock();
            state.shutdown = true;
            std::mem::take(&mut state.events)
        };
        self.changed.notify_all();
        drop(removed);
    }

    /// Collect firings due at `now`, advancing their schedules.
    /// Returned in due order.
    fn take_due(state: &mut RegistryState, now: Instant) -> Vec<TimerId> {
        let mut due = Vec::new();
        for (id, event) in state.events.iter_mut() {
            let Some(at) = event.schedule.next_due() else {
                continue;
            };
            if at > now {
                continue;
            }
            if event.is_delivery_exhausted() {
                event.schedule.finish();
                continue;
            }
            event.delivered += 1;
            event.last_delivery = Some(now);
            if event.is_delivery_exhausted() {
                event.schedule.finish();
            } else {
                event.schedule.advance(now);
            }
            due.push((at, *id));
        }
        due.sort();
        due.into_iter().map(|(_, id)| id).collect()
    }

    fn next_wakeup(state: &RegistryState) -> Option<Instant> {
        state
            .events
            .values()
            .filter_map(|e| e.schedule.next_due())
            .min()
    }
}

/// Body of the timer thread. Runs until `shutdown`.
pub(crate) fn run_timer_thread<F>(registry: Arc<TimerRegistry>, enqueue: F)
where
    F: Fn(Task),
{
    let mut state = registry.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        let due = TimerRegistry::take_due(&mut state, Instant::now());
        if !due.is_empty() {
            let reg = registry.clone();
            parking_lot::MutexGuard::unlocked(&mut state, || {
                for id in due {
                    let reg = reg.clone();
                    enqueue(Task::fallible(move || reg.execute(id)).labeled("timer"));
                }
            });
            continue;
        }
        match TimerRegistry::next_wakeup(&state) {
            Some(at) => {
                registry.changed.wait_until(&mut state, at);
            }
            None => registry.changed.wait(&mut state),
        }
    }
    tracing::debug!("timer thread exiting");
}
