//! Fixed-period poll loop.
//!
//! Everything runs on the calling thread. Between ticks the loop can either
//! sleep ([`Poller::run_until`]) or wait on a request channel
//! ([`Poller::serve`]) so operator commands slot in between ticks without any
//! locking around the dome state.

use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};

use crate::capability::Dome;
use crate::controller::TickReport;

/// Shortest period accepted.
const MIN_PERIOD: Duration = Duration::from_millis(1);

pub struct Poller {
    period: Duration,
    next_tick: Instant,
    ticks: u64,
}

impl Poller {
    /// First tick is due one period from now.
    pub fn new(period: Duration) -> Self {
        let period = period.max(MIN_PERIOD);
        Self {
            period,
            next_tick: Instant::now() + period,
            ticks: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Ticks run so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn time_until_tick(&self) -> Duration {
        self.next_tick.saturating_duration_since(Instant::now())
    }

    pub fn is_due(&self) -> bool {
        Instant::now() >= self.next_tick
    }

    /// Run one tick now and schedule the next.
    ///
    /// Missed periods are skipped rather than run back to back.
    pub fn tick<D: Dome + ?Sized>(&mut self, dome: &mut D) -> TickReport {
        let report = dome.poll();
        self.ticks += 1;
        if report.failed_queries > 0 {
            debug!("Tick {}: {} queries failed", self.ticks, report.failed_queries);
        }

        self.next_tick += self.period;
        let now = Instant::now();
        if self.next_tick <= now {
            let mut skipped = 0u32;
            while self.next_tick <= now {
                self.next_tick += self.period;
                skipped += 1;
            }
            warn!("Poll loop fell behind, skipped {skipped} tick(s)");
        }
        report
    }

    /// Tick until `done` says stop or `timeout` runs out.
    ///
    /// Returns true if `done` was satisfied.
    pub fn run_until<D, F>(&mut self, dome: &mut D, timeout: Duration, mut done: F) -> bool
    where
        D: Dome + ?Sized,
        F: FnMut(&D, &TickReport) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let wait = self.time_until_tick();
            if Instant::now() + wait > deadline {
                return false;
            }
            std::thread::sleep(wait);

            let report = self.tick(dome);
            if done(dome, &report) {
                return true;
            }
        }
    }

    /// Tick on schedule and hand each request from `requests` to `handle`
    /// in between.
    ///
    /// Stops when `handle` breaks or every sender has hung up.
    pub fn serve<D, R, H>(&mut self, dome: &mut D, requests: &Receiver<R>, mut handle: H)
    where
        D: Dome + ?Sized,
        H: FnMut(&mut D, R) -> ControlFlow<()>,
    {
        loop {
            match requests.recv_timeout(self.time_until_tick()) {
                Ok(request) => {
                    if handle(dome, request).is_break() {
                        info!("Poll loop stopped after {} ticks", self.ticks);
                        return;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Request channel closed, stopping poll loop");
                    return;
                }
            }

            if self.is_due() {
                self.tick(dome);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::ActuatorState;
    use crate::calibration::DomeStatus;
    use crate::config::{DomeConfig, SimConfig};
    use crate::controller::DomeController;
    use crate::request::Request;

    fn fast_config() -> DomeConfig {
        DomeConfig {
            poll_interval_ms: 1,
            simulation: SimConfig {
                shutter_ticks: 2,
                flap_ticks: 2,
                ..SimConfig::default()
            },
            ..DomeConfig::default()
        }
    }

    #[test]
    fn test_tick_counts_and_reschedules() {
        let mut dome = DomeController::simulated(fast_config()).unwrap();
        let mut poller = Poller::new(Duration::from_millis(1));
        poller.tick(&mut dome);
        poller.tick(&mut dome);
        assert_eq!(poller.ticks(), 2);
        assert!(poller.time_until_tick() <= poller.period());
    }

    #[test]
    fn test_zero_period_is_clamped() {
        assert_eq!(Poller::new(Duration::ZERO).period(), MIN_PERIOD);
    }

    #[test]
    fn test_run_until_calibrated() {
        let mut dome = DomeController::simulated(fast_config()).unwrap();
        let _ = dome.start_calibration().unwrap();

        let mut poller = Poller::new(Duration::from_millis(1));
        let done = poller.run_until(&mut dome, Duration::from_secs(30), |d, _| {
            d.status() == DomeStatus::Ready
        });
        assert!(done);
        assert!(poller.ticks() > 3);
    }

    #[test]
    fn test_run_until_times_out() {
        let mut dome = DomeController::simulated(fast_config()).unwrap();
        let mut poller = Poller::new(Duration::from_millis(1));
        let done = poller.run_until(&mut dome, Duration::from_millis(20), |_, _| false);
        assert!(!done);
    }

    #[test]
    fn test_serve_runs_requests_between_ticks() {
        let mut dome = DomeController::simulated(fast_config()).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(Request::Flap(crate::actuator::ActuatorTarget::Open))
            .unwrap();

        let mut poller = Poller::new(Duration::from_millis(1));
        let mut replies = Vec::new();
        poller.serve(&mut dome, &rx, |d, request: Request| {
            replies.push(request.apply(d));
            if d.flap_state() == ActuatorState::Open {
                return ControlFlow::Break(());
            }
            let _ = tx.send(Request::Status);
            std::thread::sleep(Duration::from_millis(1));
            ControlFlow::Continue(())
        });

        assert_eq!(replies[0], "flap Open: accepted");
        assert_eq!(dome.flap().state(), ActuatorState::Open);
    }

    #[test]
    fn test_serve_stops_when_senders_drop() {
        let mut dome = DomeController::simulated(fast_config()).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded::<Request>();
        drop(tx);

        let mut poller = Poller::new(Duration::from_millis(1));
        poller.serve(&mut dome, &rx, |_, _| ControlFlow::Continue(()));
        assert_eq!(poller.ticks(), 0);
    }
}
