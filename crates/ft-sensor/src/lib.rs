//! ft-sensor: six-axis force/torque acquisition over Modbus
//!
//! Register words come in through a `modbus_transport::RegisterLink`, are decoded
//! into signed counts, scaled by a per-axis calibration profile and corrected by a
//! software bias. [`ForceTorqueSensor`] runs that pipeline on a worker thread and
//! serves the latest reading to any number of readers.

mod error;
pub use error::{Result, SensorError};

mod types;
pub use types::{Axis, AxisReading, LinkState, Reading, Sample, Timestamp, Unit, Wrench};

mod decode;
pub use decode::{decode, decode_word, ReadOp, RegisterMap, FRAME_WORDS};

mod calib;
pub use calib::{CalibrationProfile, FULL_SCALE_COUNTS};

mod bias;
pub use bias::BiasManager;

mod backoff;
pub use backoff::Backoff;

mod config;
pub use config::{BackoffConfig, RangeConfig, SensorConfig, MIN_POLL_INTERVAL_MS};

mod loader;
pub use loader::{load_config_file, parse_config_str, ConfigFormat};

mod metrics;
pub use metrics::{AcquisitionMetrics, MetricsHub};

mod acquisition;
pub use acquisition::Connector;

mod sensor;
pub use sensor::{open_link, ForceTorqueSensor};
