use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct AcquisitionMetrics {
    pub samples: IntCounter,
    pub timeouts: IntCounter,
    pub malformed: IntCounter,
    pub reconnects: IntCounter,
    pub link_up: IntGauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub acq: AcquisitionMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let samples = IntCounter::new("ft_samples_total", "Samples published by the acquisition loop")
            .map_err(|e| format!("metrics init error: {e}"))?;
        let timeouts = IntCounter::new("ft_timeouts_total", "Modbus transactions without a reply")
            .map_err(|e| format!("metrics init error: {e}"))?;
        let malformed = IntCounter::new(
            "ft_malformed_total",
            "Protocol exceptions and frames with the wrong word count",
        )
        .map_err(|e| format!("metrics init error: {e}"))?;
        let reconnects = IntCounter::new("ft_reconnects_total", "Successful reconnects after link loss")
            .map_err(|e| format!("metrics init error: {e}"))?;
        let link_up = IntGauge::new("ft_link_up", "1 while the sensor link is connected")
            .map_err(|e| format!("metrics init error: {e}"))?;
        let acq = AcquisitionMetrics {
            samples,
            timeouts,
            malformed,
            reconnects,
            link_up,
        };
        let collectors: [Box<dyn prometheus::core::Collector>; 5] = [
            Box::new(acq.samples.clone()),
            Box::new(acq.timeouts.clone()),
            Box::new(acq.malformed.clone()),
            Box::new(acq.reconnects.clone()),
            Box::new(acq.link_up.clone()),
        ];
        for collector in collectors {
            registry
                .register(collector)
                .map_err(|e| format!("metrics register error: {e}"))?;
        }
        Ok(Self { registry, acq })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
