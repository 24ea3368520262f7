//! Pause control - suspend every timer on a loop, resume without drift
//!
//! Pausing only freezes schedules. Work already queued keeps draining, and a
//! firing handed to the queue just before the pause may still run.

use std::sync::Arc;
use std::time::Instant;

use crate::event_loop::EventLoop;
use crate::timer::TimerRegistry;

/// Pause switch over one loop's timers
#[derive(Clone)]
pub struct PauseController {
    timers: Arc<TimerRegistry>,
}

impl PauseController {
    /// Suspend every timer. Returns false if already paused.
    pub fn pause(&self) -> bool {
        let changed = self.timers.pause(Instant::now());
        if changed {
            tracing::debug!("timers paused");
        }
        changed
    }

    /// Re-arm every timer with its remaining time. Returns false if not paused.
    pub fn resume(&self) -> bool {
        let changed = self.timers.resume(Instant::now());
        if changed {
            tracing::debug!("timers resumed");
        }
        changed
    }

    pub fn set_paused(&self, paused: bool) -> bool {
        if paused {
            self.pause()
        } else {
            self.resume()
        }
    }

    pub fn is_paused(&self) -> bool {
        self.timers.is_paused()
    }
}

impl EventLoop {
    /// Controller sharing this loop's timer registry
    pub fn pause_controller(&self) -> PauseController {
        PauseController {
            timers: self.shared().timers.clone(),
        }
    }

    /// Pause (true) or resume (false) every timer on this loop
    pub fn pause(&self, paused: bool) -> bool {
        self.pause_controller().set_paused(paused)
    }

    pub fn is_paused(&self) -> bool {
        self.shared().timers.is_paused()
    }
}

#[cfg(test)]
mod tests {
    use crate::{EventLoop, LoopConfig};
    use hostlink_time::Iterations;
    use std::sync::{mpsc, Arc};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_pause_defers_firing_by_pause_length() {
        let lp = EventLoop::new(LoopConfig::named("pause"));
        lp.start().unwrap();

        let armed = Instant::now();
        let (tx, rx) = mpsc::channel();
        lp.do_in(ms(60), move || {
            let _ = tx.send(Instant::now());
        })
        .unwrap();

        thread::sleep(ms(20));
        assert!(lp.pause(true));
        assert!(lp.is_paused());
        thread::sleep(ms(100));
        assert!(rx.try_recv().is_err());
        assert!(lp.pause(false));

        let fired = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        // 60ms of schedule plus ~100ms paused
        assert!(fired.duration_since(armed) >= ms(150));
        lp.stop();
    }

    #[test]
    fn test_queue_drains_while_paused() {
        let lp = EventLoop::new(LoopConfig::named("pause-drain"));
        lp.start().unwrap();
        lp.pause(true);

        assert_eq!(lp.do_get(|| "still running"), Ok("still running"));
        lp.stop();
    }

    #[test]
    fn test_repeating_counts_survive_pause() {
        let lp = EventLoop::new(LoopConfig::named("pause-repeat"));
        lp.start().unwrap();
        let controller = lp.pause_controller();

        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let id = lp
            .do_repeating(Iterations::Times(4), ms(0), ms(10), move || {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        thread::sleep(ms(15));
        controller.pause();
        lp.do_blocking(|| {}).unwrap();
        let during = count.load(Ordering::SeqCst);
        thread::sleep(ms(50));
        assert_eq!(count.load(Ordering::SeqCst), during);
        assert!(lp.timer_info(id).map_or(true, |info| info.suspended));

        controller.resume();
        thread::sleep(ms(100));
        lp.do_blocking(|| {}).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 4);
        assert!(!lp.has_timer(id));
        lp.stop();
    }

    #[test]
    fn test_double_pause_and_resume_report_no_change() {
        let lp = EventLoop::new(LoopConfig::named("pause-twice"));
        assert!(!lp.pause(false));
        assert!(lp.pause(true));
        assert!(!lp.pause(true));
        assert!(lp.pause(false));
    }
}
