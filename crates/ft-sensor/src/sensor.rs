use crate::acquisition::{Connector, Engine, Settings, Shared};
use crate::bias;
use crate::calib::CalibrationProfile;
use crate::config::SensorConfig;
use crate::metrics::AcquisitionMetrics;
use crate::types::{LinkState, Reading, Wrench};
use crate::{Result, SensorError};
use modbus_transport::{Endpoint, LinkParams, RegisterLink, TransportError};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info};

/// Open a link with whichever backend serves `endpoint` in this build.
pub fn open_link(
    endpoint: &Endpoint,
    params: &LinkParams,
) -> modbus_transport::Result<Box<dyn RegisterLink>> {
    match endpoint {
        #[cfg(feature = "tcp")]
        Endpoint::Tcp { .. } => {
            let link = modbus_transport::TcpLink::connect(endpoint, params)?;
            Ok(Box::new(link))
        }
        #[cfg(feature = "rtu")]
        Endpoint::Serial { .. } => {
            let link = modbus_transport::RtuLink::connect(endpoint, params)?;
            Ok(Box::new(link))
        }
        #[allow(unreachable_patterns)]
        _ => {
            let _ = params;
            Err(TransportError::Unsupported(
                "no backend for this endpoint kind in this build",
            ))
        }
    }
}

/// A running six-axis sensor.
///
/// A dedicated worker thread owns the Modbus link and samples it every poll period;
/// all accessors here read what the worker last published and never touch the wire.
pub struct ForceTorqueSensor {
    shared: Arc<Shared>,
    period: Duration,
    sample_wait: Duration,
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl ForceTorqueSensor {
    /// Connect to the endpoint in `config` and start sampling.
    pub fn connect(config: &SensorConfig) -> Result<Self> {
        Self::connect_with_metrics(config, None)
    }

    pub fn connect_with_metrics(
        config: &SensorConfig,
        metrics: Option<AcquisitionMetrics>,
    ) -> Result<Self> {
        let endpoint = config.endpoint.clone();
        let params = config.link_params();
        let connector: Connector = Box::new(move || open_link(&endpoint, &params));
        Self::start(config, connector, metrics)
    }

    /// Start sampling with a caller-supplied connector (alternate backends, tests).
    ///
    /// The first connect runs on the calling thread, so an unreachable device fails
    /// here instead of in the background.
    pub fn start(
        config: &SensorConfig,
        mut connector: Connector,
        metrics: Option<AcquisitionMetrics>,
    ) -> Result<Self> {
        config.validate()?;
        let profile = config.profile()?;
        let link = connector().map_err(|e| {
            error!(endpoint = %config.endpoint, error = %e, "sensor connect failed");
            SensorError::from(e)
        })?;

        let shared = Arc::new(Shared::new(profile, metrics));
        shared.set_link(LinkState::Connected, None);

        let period = config.poll_interval();
        let ops = config.register_map.ops().len() as u32;
        let sample_wait = period * 2 + config.link_params().timeout * ops;
        let settings = Settings {
            period,
            register_map: config.register_map,
            max_consecutive_failures: config.max_consecutive_failures,
            backoff: config.backoff(),
        };
        let engine = Engine::new(shared.clone(), connector, link, settings);
        let (stop_tx, stop_rx) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("ft-acquisition".to_string())
            .spawn(move || engine.run(stop_rx))
            .map_err(|e| SensorError::Spawn(e.to_string()))?;

        info!(
            endpoint = %config.endpoint,
            map = ?config.register_map,
            period_ms = period.as_millis() as u64,
            "force/torque acquisition started"
        );
        Ok(Self {
            shared,
            period,
            sample_wait,
            stop_tx: Some(stop_tx),
            worker: Some(worker),
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn profile(&self) -> &CalibrationProfile {
        self.shared.profile()
    }

    /// Latest bias-corrected reading.
    ///
    /// `stale` is set while the link is down and after a reconnect until the new
    /// link has produced a sample. Waits a couple of poll periods if nothing has
    /// been sampled yet.
    pub fn latest_reading(&self) -> Result<Reading> {
        let snap = self.shared.wait_sample(None, self.sample_wait)?;
        Ok(self.shared.reading_of(&snap.sample, !snap.live))
    }

    pub fn get_wrench(&self) -> Result<Wrench> {
        Ok(self.latest_reading()?.wrench)
    }

    pub fn get_forces(&self) -> Result<[f64; 3]> {
        Ok(self.get_wrench()?.forces())
    }

    /// Latest calibrated wrench without bias correction.
    pub fn get_wrench_unbiased(&self) -> Result<Wrench> {
        Ok(self.shared.wait_sample(None, self.sample_wait)?.sample.calibrated)
    }

    /// Zero the sensor on the last published sample and return the new offset.
    ///
    /// Only a sample taken on the current link is used; right after a reconnect
    /// this waits for the first one. Fails without touching the offset while the
    /// link is down.
    pub fn bias(&self) -> Result<Wrench> {
        let mut snap = self.shared.wait_sample(None, self.sample_wait)?;
        if !snap.live && snap.link == LinkState::Connected {
            snap = self
                .shared
                .wait_sample(Some(snap.sample.seq), self.sample_wait)?;
        }
        if !snap.live {
            return Err(self.link_error(snap.link));
        }
        let sample = snap.sample;
        self.shared.bias.set(sample.calibrated);
        info!(seq = sample.seq, offset = %sample.calibrated, "sensor biased");
        Ok(sample.calibrated)
    }

    /// Zero the sensor on the mean of the next `samples` fresh samples.
    pub fn bias_averaged(&self, samples: usize) -> Result<Wrench> {
        if samples == 0 {
            return Err(SensorError::InvalidArgument("samples must be > 0"));
        }
        let mut after = self.shared.latest_seq();
        let mut collected = Vec::with_capacity(samples);
        for _ in 0..samples {
            let sample = self.shared.wait_sample(after, self.sample_wait)?.sample;
            after = Some(sample.seq);
            collected.push(sample.calibrated);
        }
        let offset = bias::average(&collected).ok_or(SensorError::NoSample)?;
        self.shared.bias.set(offset);
        info!(samples, offset = %offset, "sensor biased on averaged samples");
        Ok(offset)
    }

    pub fn unbias(&self) {
        self.shared.bias.clear();
        info!("sensor bias cleared");
    }

    pub fn bias_offset(&self) -> Wrench {
        self.shared.bias.offset()
    }

    pub fn is_biased(&self) -> bool {
        self.shared.bias.is_biased()
    }

    pub fn link_state(&self) -> LinkState {
        self.shared.link_state()
    }

    /// Error that took the link down, if it is down.
    pub fn last_error(&self) -> Option<SensorError> {
        self.shared.last_error()
    }

    /// Call `f` from the acquisition thread after every published sample.
    ///
    /// `f` runs on the sampling path and must not block or subscribe again. A
    /// subscriber that panics is removed; sampling carries on.
    pub fn subscribe<F>(&self, f: F)
    where
        F: Fn(&Reading) + Send + Sync + 'static,
    {
        self.shared.subscribe(Box::new(f));
    }

    fn link_error(&self, link: LinkState) -> SensorError {
        match link {
            LinkState::Stopped => SensorError::Stopped,
            _ => self.shared.last_error().unwrap_or_else(|| {
                SensorError::Transport(TransportError::Connection("link is down".to_string()))
            }),
        }
    }

    /// Stop sampling and release the link.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("acquisition worker panicked");
            }
        }
    }
}

impl Drop for ForceTorqueSensor {
    fn drop(&mut self) {
        self.stop();
    }
}
