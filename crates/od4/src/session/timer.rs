// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Periodic time triggers.

use crate::error::{Error, Result};
use crate::metrics::SessionMetrics;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Next deadline after `deadline`, skipping ticks already in the past so a
/// slow handler delays later firings instead of causing a burst.
pub(crate) fn next_deadline(deadline: Instant, period: Duration, now: Instant) -> Instant {
    let next = deadline + period;
    if next > now {
        next
    } else {
        now + period
    }
}

pub(crate) fn validate_period(period: Duration) -> Result<()> {
    if period.is_zero() {
        return Err(Error::InvalidArgument("time trigger period must be > 0".into()));
    }
    Ok(())
}

/// Background thread firing a handler at a fixed period.
///
/// Dropping the value disconnects the stop channel and joins the thread,
/// unless the drop happens on the trigger thread itself.
pub(crate) struct TimeTrigger {
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl TimeTrigger {
    /// Fire `handler(elapsed)` every `period`, counted from now.
    ///
    /// The trigger ends when the handler returns `false`, panics, or
    /// `session_running` is cleared.
    pub(crate) fn spawn<F>(
        period: Duration,
        mut handler: F,
        session_running: Arc<AtomicBool>,
        metrics: Arc<SessionMetrics>,
    ) -> Result<Self>
    where
        F: FnMut(Duration) -> bool + Send + 'static,
    {
        validate_period(period)?;
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("od4-time-trigger".to_string())
            .spawn(move || {
                let mut last_fire = Instant::now();
                let mut deadline = last_fire + period;
                loop {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match stop_rx.recv_timeout(wait) {
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                        Err(mpsc::RecvTimeoutError::Timeout) => {}
                    }
                    if !session_running.load(Ordering::Acquire) {
                        break;
                    }

                    let now = Instant::now();
                    let elapsed = now.duration_since(last_fire);
                    last_fire = now;

                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        handler(elapsed)
                    }));
                    match result {
                        Ok(true) => {}
                        Ok(false) => {
                            log::debug!("[OD4] time trigger finished");
                            break;
                        }
                        Err(_) => {
                            metrics.record_handler_panic();
                            log::warn!("[OD4] time trigger panicked, stopping it");
                            break;
                        }
                    }
                    deadline = next_deadline(deadline, period, Instant::now());
                }
            })
            .map_err(Error::ThreadSpawn)?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// `true` once the trigger thread has exited.
    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    pub(crate) fn stop(&mut self) {
        drop(self.stop_tx.take());
        if let Some(handle) = self.thread.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for TimeTrigger {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run `handler` every `1 / freq_hz` seconds on the calling thread until it
/// returns `false` or `running` is cleared.
pub(crate) fn run_blocking<F>(freq_hz: f32, mut handler: F, running: &AtomicBool) -> Result<()>
where
    F: FnMut() -> bool,
{
    if !(freq_hz.is_finite() && freq_hz > 0.0) {
        return Err(Error::InvalidArgument(format!(
            "time trigger frequency must be > 0 (got {})",
            freq_hz
        )));
    }
    let period = Duration::from_secs_f64(1.0 / f64::from(freq_hz));
    validate_period(period)?;

    let mut deadline = Instant::now();
    while running.load(Ordering::Acquire) {
        if !handler() {
            break;
        }
        let now = Instant::now();
        deadline = next_deadline(deadline, period, now);
        thread::sleep(deadline.saturating_duration_since(now));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_next_deadline_skips_missed_ticks() {
        let t0 = Instant::now();
        let p = Duration::from_millis(10);
        assert_eq!(next_deadline(t0, p, t0), t0 + p);
        let late = t0 + Duration::from_millis(35);
        assert_eq!(next_deadline(t0, p, late), late + p);
    }

    #[test]
    fn test_fires_until_false() {
        let running = Arc::new(AtomicBool::new(true));
        let metrics = Arc::new(SessionMetrics::new());
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let trigger = TimeTrigger::spawn(
            Duration::from_millis(5),
            move |elapsed| {
                assert!(elapsed >= Duration::from_millis(4));
                c.fetch_add(1, Ordering::SeqCst) < 2
            },
            running,
            metrics,
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !trigger.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(trigger.is_finished());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_stop_joins_promptly() {
        let running = Arc::new(AtomicBool::new(true));
        let mut trigger = TimeTrigger::spawn(
            Duration::from_secs(60),
            |_| true,
            running,
            Arc::new(SessionMetrics::new()),
        )
        .unwrap();
        let start = Instant::now();
        trigger.stop();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_panic_counted_and_stops() {
        let metrics = Arc::new(SessionMetrics::new());
        let trigger = TimeTrigger::spawn(
            Duration::from_millis(1),
            |_| panic!("tick"),
            Arc::new(AtomicBool::new(true)),
            Arc::clone(&metrics),
        )
        .unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !trigger.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(metrics.snapshot().handler_panics, 1);
    }

    #[test]
    fn test_zero_period_rejected() {
        let r = TimeTrigger::spawn(
            Duration::ZERO,
            |_| true,
            Arc::new(AtomicBool::new(true)),
            Arc::new(SessionMetrics::new()),
        );
        assert!(matches!(r, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_run_blocking() {
        let running = AtomicBool::new(true);
        let mut n = 0;
        run_blocking(
            200.0,
            || {
                n += 1;
                n < 4
            },
            &running,
        )
        .unwrap();
        assert_eq!(n, 4);

        assert!(run_blocking(0.0, || true, &running).is_err());
        assert!(run_blocking(f32::NAN, || true, &running).is_err());
    }

    #[test]
    fn test_run_blocking_stops_with_session() {
        let running = AtomicBool::new(false);
        let mut n = 0;
        run_blocking(
            100.0,
            || {
                n += 1;
                true
            },
            &running,
        )
        .unwrap();
        assert_eq!(n, 0);
    }
}
