//! Acquisition worker: owns the register link and publishes one sample per tick.
//!
//! The worker is the only code that talks to the transport, so at most one Modbus
//! transaction is ever in flight. Everything other threads need goes through
//! [`Shared`]: the latest sample together with the link state (one mutex plus a
//! condvar for "new sample" wake-ups) and the bias offset (its own mutex).

use crate::backoff::Backoff;
use crate::bias::BiasManager;
use crate::calib::CalibrationProfile;
use crate::decode::{self, RegisterMap};
use crate::metrics::AcquisitionMetrics;
use crate::types::{LinkState, Reading, Sample, Timestamp, Wrench};
use crate::{Result, SensorError};
use modbus_transport::{RegisterLink, TransportError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Opens a fresh link; called once at start and again after every link loss.
pub type Connector =
    Box<dyn FnMut() -> modbus_transport::Result<Box<dyn RegisterLink>> + Send + 'static>;

pub(crate) type Subscriber = Box<dyn Fn(&Reading) + Send + Sync + 'static>;

#[derive(Debug)]
struct Published {
    sample: Option<Sample>,
    link: LinkState,
    last_error: Option<SensorError>,
    /// Highest seq published before the current link came up.
    connected_after: u64,
}

/// A published sample plus what was known about the link when it was read.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Snapshot {
    pub sample: Sample,
    pub link: LinkState,
    /// Sampled on the current link; false for anything carried over an outage.
    pub live: bool,
}

pub(crate) struct Shared {
    profile: CalibrationProfile,
    pub(crate) bias: BiasManager,
    state: Mutex<Published>,
    fresh: Condvar,
    subscribers: Mutex<Vec<Subscriber>>,
    metrics: Option<AcquisitionMetrics>,
}

impl Shared {
    pub(crate) fn new(profile: CalibrationProfile, metrics: Option<AcquisitionMetrics>) -> Self {
        Self {
            profile,
            bias: BiasManager::new(),
            state: Mutex::new(Published {
                sample: None,
                link: LinkState::Disconnected,
                last_error: None,
                connected_after: 0,
            }),
            fresh: Condvar::new(),
            subscribers: Mutex::new(Vec::new()),
            metrics,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, Published> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn profile(&self) -> &CalibrationProfile {
        &self.profile
    }

    pub(crate) fn link_state(&self) -> LinkState {
        self.lock_state().link
    }

    pub(crate) fn last_error(&self) -> Option<SensorError> {
        self.lock_state().last_error.clone()
    }

    pub(crate) fn latest_seq(&self) -> Option<u64> {
        self.lock_state().sample.map(|s| s.seq)
    }

    pub(crate) fn subscribe(&self, subscriber: Subscriber) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscriber);
    }

    pub(crate) fn reading_of(&self, sample: &Sample, stale: bool) -> Reading {
        Reading {
            seq: sample.seq,
            timestamp: sample.timestamp,
            wrench: self.bias.correct(&sample.calibrated),
            stale,
        }
    }

    /// Connected clears the recorded error and marks every earlier sample as
    /// carried over; any other state keeps the error that caused the first
    /// transition away from Connected.
    pub(crate) fn set_link(&self, link: LinkState, error: Option<SensorError>) {
        let mut st = self.lock_state();
        st.link = link;
        match (link, error) {
            (LinkState::Connected, _) => {
                st.last_error = None;
                st.connected_after = st.sample.map_or(0, |s| s.seq);
            }
            (_, Some(e)) => st.last_error = Some(e),
            (_, None) => {}
        }
        drop(st);
        if let Some(m) = &self.metrics {
            m.link_up.set(i64::from(link == LinkState::Connected));
        }
        self.fresh.notify_all();
    }

    fn publish(&self, counts: [i16; 6], calibrated: Wrench) -> u64 {
        let mut st = self.lock_state();
        let seq = st.sample.map_or(1, |s| s.seq + 1);
        let sample = Sample {
            seq,
            timestamp: Timestamp::now(),
            counts,
            calibrated,
        };
        st.sample = Some(sample);
        drop(st);
        self.fresh.notify_all();

        if let Some(m) = &self.metrics {
            m.samples.inc();
        }
        let reading = self.reading_of(&sample, false);
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|notify| {
            match panic::catch_unwind(AssertUnwindSafe(|| notify(&reading))) {
                Ok(()) => true,
                Err(_) => {
                    error!(seq, "subscriber panicked, unsubscribing it");
                    false
                }
            }
        });
        seq
    }

    /// Wait up to `timeout` for a sample with `seq > after` (any sample for `None`).
    ///
    /// An existing sample is returned even while the link is down; the snapshot
    /// says whether it was taken on the current link. Without a matching sample a
    /// down link fails right away with the error that took it down.
    pub(crate) fn wait_sample(&self, after: Option<u64>, timeout: Duration) -> Result<Snapshot> {
        let deadline = Instant::now() + timeout;
        let mut st = self.lock_state();
        loop {
            if let Some(sample) = st.sample {
                if after.map_or(true, |a| sample.seq > a) {
                    return Ok(Snapshot {
                        sample,
                        link: st.link,
                        live: st.link == LinkState::Connected && sample.seq > st.connected_after,
                    });
                }
            }
            match st.link {
                LinkState::Connected => {}
                LinkState::Stopped => return Err(SensorError::Stopped),
                LinkState::Disconnected => {
                    return Err(st.last_error.clone().unwrap_or_else(|| {
                        SensorError::Transport(TransportError::Connection(
                            "link is down".to_string(),
                        ))
                    }))
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SensorError::NoSample);
            }
            st = self
                .fresh
                .wait_timeout(st, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Settings {
    pub period: Duration,
    pub register_map: RegisterMap,
    pub max_consecutive_failures: u32,
    pub backoff: Backoff,
}

/// Marks the link stopped if the worker unwinds, so readers stop treating the
/// last sample as live.
struct UnwindGuard(Arc<Shared>);

impl Drop for UnwindGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("acquisition worker panicked");
            self.0.set_link(LinkState::Stopped, Some(SensorError::Stopped));
        }
    }
}

/// Outcome of one worker step.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Step {
    Sampled(u64),
    Skipped(SensorError),
    LinkLost(SensorError),
    Reconnected,
    ReconnectFailed(SensorError),
}

/// One tick's worth of work: read the map, decode, calibrate.
fn acquire(
    link: &mut dyn RegisterLink,
    map: RegisterMap,
    profile: &CalibrationProfile,
) -> Result<([i16; 6], Wrench)> {
    let words = map.read(link)?;
    let counts = decode::decode(&words)?;
    Ok((counts, profile.apply(&counts)))
}

pub(crate) struct Engine {
    shared: Arc<Shared>,
    connector: Connector,
    link: Option<Box<dyn RegisterLink>>,
    settings: Settings,
    failures: u32,
}

impl Engine {
    pub(crate) fn new(
        shared: Arc<Shared>,
        connector: Connector,
        link: Box<dyn RegisterLink>,
        settings: Settings,
    ) -> Self {
        Self {
            shared,
            connector,
            link: Some(link),
            settings,
            failures: 0,
        }
    }

    pub(crate) fn step(&mut self) -> Step {
        let Some(link) = self.link.as_deref_mut() else {
            return self.reconnect();
        };
        match acquire(link, self.settings.register_map, &self.shared.profile) {
            Ok((counts, calibrated)) => {
                self.failures = 0;
                Step::Sampled(self.shared.publish(counts, calibrated))
            }
            Err(err) if err.is_transient() => {
                self.failures += 1;
                self.count_failure(&err);
                if self.failures >= self.settings.max_consecutive_failures {
                    warn!(
                        failures = self.failures,
                        error = %err,
                        "failure budget exhausted, dropping link"
                    );
                    self.drop_link(err.clone());
                    Step::LinkLost(err)
                } else {
                    Step::Skipped(err)
                }
            }
            Err(err) => {
                warn!(error = %err, "sensor link lost");
                self.drop_link(err.clone());
                Step::LinkLost(err)
            }
        }
    }

    fn count_failure(&self, err: &SensorError) {
        match err {
            SensorError::Transport(TransportError::Timeout) => {
                info!(failures = self.failures, "sensor did not answer, sample skipped");
                if let Some(m) = &self.shared.metrics {
                    m.timeouts.inc();
                }
            }
            other => {
                // Usually a register map that does not match the device.
                warn!(failures = self.failures, error = %other, "malformed response, sample skipped");
                if let Some(m) = &self.shared.metrics {
                    m.malformed.inc();
                }
            }
        }
    }

    fn drop_link(&mut self, err: SensorError) {
        if let Some(mut link) = self.link.take() {
            link.close();
        }
        self.failures = 0;
        self.shared.set_link(LinkState::Disconnected, Some(err));
    }

    fn reconnect(&mut self) -> Step {
        match (self.connector)() {
            Ok(link) => {
                self.link = Some(link);
                self.settings.backoff.reset();
                self.shared.set_link(LinkState::Connected, None);
                if let Some(m) = &self.shared.metrics {
                    m.reconnects.inc();
                }
                info!("sensor link re-established");
                Step::Reconnected
            }
            Err(e) => {
                debug!(error = %e, "reconnect attempt failed");
                Step::ReconnectFailed(e.into())
            }
        }
    }

    /// Time to wait before the next step, given how long the last one took.
    pub(crate) fn delay_after(&mut self, step: &Step, elapsed: Duration) -> Duration {
        match step {
            Step::Sampled(_) | Step::Skipped(_) => self.settings.period.saturating_sub(elapsed),
            Step::Reconnected => Duration::ZERO,
            Step::LinkLost(_) | Step::ReconnectFailed(_) => {
                let delay = self.settings.backoff.next_delay();
                debug!(delay_ms = delay.as_millis() as u64, "waiting before reconnect");
                delay
            }
        }
    }

    pub(crate) fn shutdown(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
        }
        self.shared.set_link(LinkState::Stopped, None);
        info!("acquisition stopped");
    }

    /// Run until a stop message arrives or the sender is dropped.
    pub(crate) fn run(mut self, stop: Receiver<()>) {
        let _guard = UnwindGuard(self.shared.clone());
        debug!(
            period_ms = self.settings.period.as_millis() as u64,
            map = ?self.settings.register_map,
            "acquisition loop running"
        );
        loop {
            let started = Instant::now();
            let step = self.step();
            let delay = self.delay_after(&step, started.elapsed());
            match stop.recv_timeout(delay) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    error!("acquisition handle dropped without shutdown");
                    break;
                }
            }
        }
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modbus_transport::{MockLink, MockScript};

    const BLOCK: [u16; 6] = [16384, 0xC000, 0, 8192, 0, 0xE000];

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn connector(script: &MockScript) -> Connector {
        let script = script.clone();
        Box::new(move || {
            MockLink::attach(&script).map(|l| Box::new(l) as Box<dyn RegisterLink>)
        })
    }

    fn make_engine(script: &MockScript, max_failures: u32) -> (Engine, Arc<Shared>) {
        let profile = CalibrationProfile::uniform(100.0, 10.0).unwrap();
        let shared = Arc::new(Shared::new(profile, None));
        let link = Box::new(MockLink::attach(script).unwrap());
        shared.set_link(LinkState::Connected, None);
        let settings = Settings {
            period: ms(20),
            register_map: RegisterMap::SixAxisBlock,
            max_consecutive_failures: max_failures,
            backoff: Backoff::new(ms(100), ms(400)),
        };
        let engine = Engine::new(shared.clone(), connector(script), link, settings);
        (engine, shared)
    }

    fn block_script() -> MockScript {
        let script = MockScript::new();
        script.set_registers(1, &BLOCK);
        script
    }

    #[test]
    fn test_tick_publishes_calibrated_sample() {
        let script = block_script();
        let (mut engine, shared) = make_engine(&script, 3);
        assert_eq!(engine.step(), Step::Sampled(1));
        let snap = shared.wait_sample(None, ms(0)).unwrap();
        assert_eq!(snap.link, LinkState::Connected);
        assert!(snap.live);
        let sample = snap.sample;
        assert_eq!(sample.counts, [16384, -16384, 0, 8192, 0, -8192]);
        assert_eq!(sample.calibrated.as_array(), [50.0, -50.0, 0.0, 2.5, 0.0, -2.5]);
    }

    #[test]
    fn test_timeout_keeps_previous_sample() {
        let script = block_script();
        let (mut engine, shared) = make_engine(&script, 3);
        assert_eq!(engine.step(), Step::Sampled(1));
        let before = shared.wait_sample(None, ms(0)).unwrap().sample;

        script.fail_next(TransportError::Timeout);
        assert_eq!(
            engine.step(),
            Step::Skipped(SensorError::Transport(TransportError::Timeout))
        );
        let snap = shared.wait_sample(None, ms(0)).unwrap();
        assert_eq!(snap.sample, before);
        assert_eq!(snap.link, LinkState::Connected);
        assert!(snap.live);

        script.set_registers(1, &[0, 0, 16384, 0, 0, 0]);
        assert_eq!(engine.step(), Step::Sampled(2));
        let fresh = shared.wait_sample(Some(1), ms(0)).unwrap().sample;
        assert_eq!(fresh.calibrated.fz, 50.0);
    }

    #[test]
    fn test_failure_budget_drops_link() {
        let script = block_script();
        let (mut engine, shared) = make_engine(&script, 2);
        script.fail_next(TransportError::Timeout);
        script.fail_next(TransportError::Protocol("exception".into()));
        assert!(matches!(engine.step(), Step::Skipped(_)));
        let lost = engine.step();
        assert_eq!(
            lost,
            Step::LinkLost(SensorError::Transport(TransportError::Protocol(
                "exception".into()
            )))
        );
        assert_eq!(shared.link_state(), LinkState::Disconnected);
        assert_eq!(script.closes(), 1);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let script = block_script();
        let (mut engine, shared) = make_engine(&script, 2);
        for _ in 0..3 {
            script.fail_next(TransportError::Timeout);
            assert!(matches!(engine.step(), Step::Skipped(_)));
            assert!(matches!(engine.step(), Step::Sampled(_)));
        }
        assert_eq!(shared.link_state(), LinkState::Connected);
    }

    #[test]
    fn test_fatal_error_drops_link_immediately() {
        let script = block_script();
        let (mut engine, shared) = make_engine(&script, 5);
        script.set_online(false);
        let step = engine.step();
        assert!(matches!(
            step,
            Step::LinkLost(SensorError::Transport(TransportError::Connection(_)))
        ));
        assert_eq!(shared.link_state(), LinkState::Disconnected);
        assert!(shared.last_error().is_some());
    }

    #[test]
    fn test_reconnect_with_backoff() {
        let script = block_script();
        let (mut engine, shared) = make_engine(&script, 5);
        script.set_online(false);
        let lost = engine.step();
        assert_eq!(engine.delay_after(&lost, ms(0)), ms(100));

        let failed = engine.step();
        assert!(matches!(failed, Step::ReconnectFailed(_)));
        assert_eq!(engine.delay_after(&failed, ms(0)), ms(200));
        let failed = engine.step();
        assert_eq!(engine.delay_after(&failed, ms(0)), ms(400));
        let failed = engine.step();
        assert_eq!(engine.delay_after(&failed, ms(0)), ms(400));

        script.set_online(true);
        let back = engine.step();
        assert_eq!(back, Step::Reconnected);
        assert_eq!(engine.delay_after(&back, ms(0)), Duration::ZERO);
        assert_eq!(shared.link_state(), LinkState::Connected);
        assert_eq!(shared.last_error(), None);
        assert!(matches!(engine.step(), Step::Sampled(_)));

        // backoff starts over after a successful reconnect
        script.set_online(false);
        let lost = engine.step();
        assert_eq!(engine.delay_after(&lost, ms(0)), ms(100));
    }

    #[test]
    fn test_disconnect_error_survives_failed_reconnects() {
        let script = block_script();
        let (mut engine, shared) = make_engine(&script, 5);
        script.set_online(false);
        let Step::LinkLost(cause) = engine.step() else {
            panic!("expected link loss");
        };
        assert!(matches!(engine.step(), Step::ReconnectFailed(_)));
        assert_eq!(shared.last_error(), Some(cause.clone()));
        assert_eq!(shared.wait_sample(None, ms(0)).unwrap_err(), cause);
    }

    #[test]
    fn test_sample_from_before_outage_is_not_live_after_reconnect() {
        let script = block_script();
        let (mut engine, shared) = make_engine(&script, 5);
        assert_eq!(engine.step(), Step::Sampled(1));

        script.set_online(false);
        assert!(matches!(engine.step(), Step::LinkLost(_)));
        script.set_registers(1, &[0; 6]);
        script.set_online(true);
        assert_eq!(engine.step(), Step::Reconnected);

        script.fail_next(TransportError::Timeout);
        script.fail_next(TransportError::Timeout);
        assert!(matches!(engine.step(), Step::Skipped(_)));
        assert!(matches!(engine.step(), Step::Skipped(_)));
        let snap = shared.wait_sample(None, ms(0)).unwrap();
        assert_eq!(snap.link, LinkState::Connected);
        assert_eq!(snap.sample.seq, 1);
        assert!(!snap.live);
        assert_eq!(snap.sample.calibrated.fx, 50.0);

        assert_eq!(engine.step(), Step::Sampled(2));
        let snap = shared.wait_sample(None, ms(0)).unwrap();
        assert!(snap.live);
        assert_eq!(snap.sample.calibrated, Wrench::ZERO);
    }

    #[test]
    fn test_panicking_subscriber_is_dropped() {
        let script = block_script();
        let (mut engine, shared) = make_engine(&script, 5);
        let calls = Arc::new(Mutex::new(0u32));
        let counter = calls.clone();
        shared.subscribe(Box::new(|_: &Reading| panic!("subscriber failure")));
        shared.subscribe(Box::new(move |_: &Reading| {
            if let Ok(mut n) = counter.lock() {
                *n += 1;
            }
        }));
        assert_eq!(engine.step(), Step::Sampled(1));
        assert_eq!(engine.step(), Step::Sampled(2));
        assert_eq!(*calls.lock().unwrap(), 2);
        assert_eq!(shared.subscribers.lock().unwrap().len(), 1);
        assert_eq!(shared.link_state(), LinkState::Connected);
    }

    #[test]
    fn test_unwinding_worker_marks_link_stopped() {
        let profile = CalibrationProfile::uniform(1.0, 1.0).unwrap();
        let shared = Arc::new(Shared::new(profile, None));
        shared.set_link(LinkState::Connected, None);
        let guarded = shared.clone();
        let res = thread::spawn(move || {
            let _guard = UnwindGuard(guarded);
            panic!("worker failure");
        })
        .join();
        assert!(res.is_err());
        assert_eq!(shared.link_state(), LinkState::Stopped);
        assert_eq!(shared.last_error(), Some(SensorError::Stopped));
    }

    #[test]
    fn test_period_accounts_for_elapsed_time() {
        let script = block_script();
        let (mut engine, _shared) = make_engine(&script, 5);
        let step = engine.step();
        assert_eq!(engine.delay_after(&step, ms(5)), ms(15));
        assert_eq!(engine.delay_after(&step, ms(50)), Duration::ZERO);
    }

    #[test]
    fn test_subscribers_get_corrected_readings() {
        let script = block_script();
        let (mut engine, shared) = make_engine(&script, 5);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        shared.subscribe(Box::new(move |r: &Reading| {
            if let Ok(mut v) = sink.lock() {
                v.push(*r);
            }
        }));
        shared
            .bias
            .set(Wrench::from_array([50.0, -50.0, 0.0, 2.5, 0.0, -2.5]));
        engine.step();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].seq, 1);
        assert!(!seen[0].stale);
        assert!(seen[0].wrench.max_abs_diff(&Wrench::ZERO) < 1e-12);
    }

    #[test]
    fn test_shutdown_closes_link_and_stops() {
        let script = block_script();
        let (mut engine, shared) = make_engine(&script, 5);
        engine.step();
        engine.shutdown();
        assert_eq!(shared.link_state(), LinkState::Stopped);
        assert_eq!(script.closes(), 1);
        // last sample is still readable
        assert!(shared.wait_sample(None, ms(0)).is_ok());
        assert_eq!(
            shared.wait_sample(Some(1), ms(0)).unwrap_err(),
            SensorError::Stopped
        );
    }

    #[test]
    fn test_wait_for_first_sample_times_out() {
        let profile = CalibrationProfile::uniform(1.0, 1.0).unwrap();
        let shared = Shared::new(profile, None);
        shared.set_link(LinkState::Connected, None);
        let started = Instant::now();
        assert_eq!(
            shared.wait_sample(None, ms(30)).unwrap_err(),
            SensorError::NoSample
        );
        assert!(started.elapsed() >= ms(30));
    }
}
