use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use ft_sensor::{
    Axis, Connector, ForceTorqueSensor, MetricsHub, Reading, SensorConfig, Wrench,
};
use modbus_transport::{Endpoint, MockLink, RegisterLink};

#[derive(Parser, Debug)]
#[command(
    name = "ft",
    version,
    about = "Six-axis force/torque sensor CLI",
    disable_help_subcommand = true
)]
struct Cli {
    /// Use the in-process mock sensor instead of the configured endpoint
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    mock: bool,

    /// Sensor config file (.yaml/.yml or .json); built-in defaults otherwise
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the Modbus TCP host from the config
    #[arg(long, global = true)]
    host: Option<String>,

    /// Override the Modbus TCP port from the config
    #[arg(long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print readings continuously
    Stream {
        /// Stop after this many readings
        #[arg(long)]
        count: Option<u64>,
        /// Print interval in milliseconds (defaults to the poll period)
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Zero the sensor before streaming
        #[arg(long, action = ArgAction::SetTrue)]
        bias: bool,
        /// Average this many samples when zeroing
        #[arg(long, default_value_t = 1usize)]
        bias_samples: usize,
        /// One JSON object per line
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
        /// Dump Prometheus metrics on exit
        #[arg(long, action = ArgAction::SetTrue)]
        metrics: bool,
    },
    /// Print one reading per axis with raw scale
    Once {
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Validate a config and print the derived calibration
    CheckConfig,
}

#[derive(Serialize)]
struct ReadingOut {
    seq: u64,
    timestamp: Option<String>,
    stale: bool,
    wrench: Wrench,
}

impl From<&Reading> for ReadingOut {
    fn from(r: &Reading) -> Self {
        Self {
            seq: r.seq,
            timestamp: r.timestamp.rfc3339(),
            stale: r.stale,
            wrench: r.wrench,
        }
    }
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    match cli.command {
        Commands::Stream {
            count,
            interval_ms,
            bias,
            bias_samples,
            json,
            metrics,
        } => stream(
            &config,
            cli.mock,
            count,
            interval_ms,
            bias.then_some(bias_samples),
            json,
            metrics,
        ),
        Commands::Once { json } => once(&config, cli.mock, json),
        Commands::CheckConfig => check_config(&config),
    }
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn resolve_config(cli: &Cli) -> Result<SensorConfig> {
    let mut config = match &cli.config {
        Some(path) => ft_sensor::load_config_file(path)?,
        None => SensorConfig::default(),
    };
    if cli.host.is_some() || cli.port.is_some() {
        let (host, port) = match &config.endpoint {
            Endpoint::Tcp { host, port } => (host.clone(), *port),
            Endpoint::Serial { .. } => anyhow::bail!("--host/--port only apply to TCP endpoints"),
        };
        config.endpoint = Endpoint::tcp(
            cli.host.clone().unwrap_or(host),
            cli.port.unwrap_or(port),
        );
        config
            .validate()
            .context("endpoint override produced an invalid config")?;
    }
    Ok(config)
}

fn open_sensor(
    config: &SensorConfig,
    mock: bool,
    hub: Option<&MetricsHub>,
) -> Result<ForceTorqueSensor> {
    let metrics = hub.map(|h| h.acq.clone());
    let sensor = if mock {
        ForceTorqueSensor::start(config, mock_connector(), metrics)
    } else {
        ForceTorqueSensor::connect_with_metrics(config, metrics)
    };
    let endpoint = if mock {
        "mock".to_string()
    } else {
        config.endpoint.to_string()
    };
    sensor.with_context(|| format!("failed to start sensor at {endpoint}"))
}

fn mock_connector() -> Connector {
    Box::new(|| -> modbus_transport::Result<Box<dyn RegisterLink>> {
        Ok(Box::new(MockLink::resting()))
    })
}

fn stream(
    config: &SensorConfig,
    mock: bool,
    count: Option<u64>,
    interval_ms: Option<u64>,
    bias_samples: Option<usize>,
    json: bool,
    metrics: bool,
) -> Result<()> {
    let hub = if metrics {
        Some(MetricsHub::new().map_err(anyhow::Error::msg)?)
    } else {
        None
    };
    let sensor = open_sensor(config, mock, hub.as_ref())?;
    if let Some(n) = bias_samples {
        let offset = zero_sensor(&sensor, n)?;
        info!(%offset, "zeroed before streaming");
    }

    let interval = interval_ms.map_or(sensor.period(), Duration::from_millis);
    let mut printed = 0u64;
    while count.map_or(true, |c| printed < c) {
        match sensor.latest_reading() {
            Ok(r) => {
                if json {
                    println!("{}", serde_json::to_string(&ReadingOut::from(&r))?);
                } else {
                    let [fx, fy, fz] = r.wrench.forces();
                    let marker = if r.stale { " [stale]" } else { "" };
                    println!("Fx={fx:.3}N Fy={fy:.3}N Fz={fz:.3}N{marker}");
                }
                printed += 1;
            }
            Err(e) => warn!(error = %e, "no reading available"),
        }
        thread::sleep(interval);
    }

    if let Some(hub) = &hub {
        print!("{}", hub.encode_text());
    }
    sensor.shutdown();
    Ok(())
}

/// One sample zeroes on the latest reading; more average fresh ones; zero is refused.
fn zero_sensor(sensor: &ForceTorqueSensor, samples: usize) -> Result<Wrench> {
    let offset = match samples {
        1 => sensor.bias()?,
        n => sensor.bias_averaged(n)?,
    };
    Ok(offset)
}

fn once(config: &SensorConfig, mock: bool, json: bool) -> Result<()> {
    let sensor = open_sensor(config, mock, None)?;
    let reading = sensor.latest_reading()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&ReadingOut::from(&reading))?);
    } else {
        let profile = sensor.profile();
        for axis in Axis::ALL {
            println!(
                "{}\t{:>10.4} {}\t(scale {:e})",
                axis,
                reading.wrench.get(axis),
                axis.unit().symbol(),
                profile.scale(axis)
            );
        }
        if reading.stale {
            println!("(stale: link is {})", sensor.link_state());
        }
    }
    sensor.shutdown();
    Ok(())
}

fn check_config(config: &SensorConfig) -> Result<()> {
    config.validate()?;
    let profile = config.profile()?;
    println!("endpoint\t{}", config.endpoint);
    println!("register_map\t{:?}", config.register_map);
    println!("poll_interval\t{} ms", config.poll_interval().as_millis());
    println!("timeout\t{} ms", config.timeout_ms);
    println!("max_failures\t{}", config.max_consecutive_failures);
    let backoff = config.backoff();
    println!(
        "backoff\t{} ms .. {} ms",
        backoff.initial().as_millis(),
        backoff.max().as_millis()
    );
    let (ranges, scales) = (profile.ranges(), profile.scales());
    for axis in Axis::ALL {
        let i = axis.index();
        println!(
            "{}\trange {} {}\tscale {:e}",
            axis,
            ranges[i],
            axis.unit().symbol(),
            scales[i]
        );
    }
    Ok(())
}
