use crate::backoff::Backoff;
use crate::calib::CalibrationProfile;
use crate::decode::RegisterMap;
use crate::{Result, SensorError};
use modbus_transport::{Endpoint, LinkParams};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fastest poll rate accepted from configuration (100 Hz).
pub const MIN_POLL_INTERVAL_MS: u64 = 10;

fn default_timeout_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_max_failures() -> u32 {
    5
}

fn default_force_n() -> f64 {
    20.0
}

fn default_torque_nm() -> f64 {
    1.0
}

fn default_backoff_initial_ms() -> u64 {
    200
}

fn default_backoff_max_ms() -> u64 {
    5000
}

/// Everything needed to run one sensor, validated once at load time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct SensorConfig {
    #[cfg_attr(feature = "schema", schemars(with = "serde_json::Value"))]
    pub endpoint: Endpoint,
    #[serde(default)]
    pub register_map: RegisterMap,
    #[serde(default)]
    pub ranges: RangeConfig,
    /// Per-transaction timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Overrides `poll_interval_ms` when present.
    #[serde(default)]
    pub poll_hz: Option<f64>,
    /// Consecutive skipped ticks tolerated before the link is dropped.
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

/// Full-scale ranges; `axes` (Fx..Tz) wins over the uniform values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct RangeConfig {
    #[serde(default = "default_force_n")]
    pub force_n: f64,
    #[serde(default = "default_torque_nm")]
    pub torque_nm: f64,
    #[serde(default)]
    pub axes: Option<[f64; 6]>,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            force_n: default_force_n(),
            torque_nm: default_torque_nm(),
            axes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_initial_ms")]
    pub initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_backoff_initial_ms(),
            max_ms: default_backoff_max_ms(),
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::tcp("10.10.10.2", 502),
            register_map: RegisterMap::default(),
            ranges: RangeConfig::default(),
            timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_hz: None,
            max_consecutive_failures: default_max_failures(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl SensorConfig {
    pub fn validate(&self) -> Result<()> {
        match &self.endpoint {
            Endpoint::Tcp { host, port } => {
                if host.trim().is_empty() {
                    return Err(SensorError::Config("endpoint host is empty".into()));
                }
                if *port == 0 {
                    return Err(SensorError::Config("endpoint port must be 1..=65535".into()));
                }
            }
            Endpoint::Serial {
                path, baud_rate, ..
            } => {
                if path.trim().is_empty() {
                    return Err(SensorError::Config("serial path is empty".into()));
                }
                if *baud_rate == 0 {
                    return Err(SensorError::Config("baud_rate must be > 0".into()));
                }
            }
        }
        if self.timeout_ms == 0 {
            return Err(SensorError::Config("timeout_ms must be > 0".into()));
        }
        if let Some(hz) = self.poll_hz {
            if !hz.is_finite() || hz <= 0.0 {
                return Err(SensorError::Config(format!("poll_hz must be > 0, got {hz}")));
            }
        }
        let interval = self.poll_interval();
        if interval < Duration::from_millis(MIN_POLL_INTERVAL_MS) {
            return Err(SensorError::Config(format!(
                "poll interval {} ms is below the {MIN_POLL_INTERVAL_MS} ms minimum",
                interval.as_millis()
            )));
        }
        if self.max_consecutive_failures == 0 {
            return Err(SensorError::Config(
                "max_consecutive_failures must be >= 1".into(),
            ));
        }
        if self.backoff.initial_ms == 0 || self.backoff.max_ms < self.backoff.initial_ms {
            return Err(SensorError::Config(
                "backoff needs 0 < initial_ms <= max_ms".into(),
            ));
        }
        self.profile().map(|_| ())
    }

    pub fn profile(&self) -> Result<CalibrationProfile> {
        match self.ranges.axes {
            Some(axes) => CalibrationProfile::from_ranges(axes),
            None => CalibrationProfile::uniform(self.ranges.force_n, self.ranges.torque_nm),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        match self.poll_hz {
            Some(hz) if hz.is_finite() && hz > 0.0 => {
                Duration::from_millis((1000.0 / hz).round() as u64)
            }
            _ => Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn link_params(&self) -> LinkParams {
        LinkParams {
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff.initial_ms),
            Duration::from_millis(self.backoff.max_ms),
        )
    }
}
