use crate::config::SensorConfig;
use anyhow::Context;
use std::fs;
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    /// `.json` is JSON; everything else is read as YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Yaml,
        }
    }
}

pub fn parse_config_str(raw: &str, format: ConfigFormat) -> anyhow::Result<SensorConfig> {
    let cfg: SensorConfig = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(raw).context("parsing yaml sensor config")?,
        ConfigFormat::Json => serde_json::from_str(raw).context("parsing json sensor config")?,
    };
    cfg.validate().context("validating sensor config")?;
    Ok(cfg)
}

pub fn load_config_file(path: impl AsRef<Path>) -> anyhow::Result<SensorConfig> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading sensor config: {}", path.display()))?;
    parse_config_str(&raw, ConfigFormat::from_path(path))
        .with_context(|| format!("loading sensor config: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::RegisterMap;
    use modbus_transport::{Endpoint, Parity};
    use std::io::Write;

    #[test]
    fn test_yaml_with_defaults() {
        let raw = r#"
endpoint:
  kind: tcp
  host: 10.10.10.2
  port: 502
ranges:
  force_n: 100.0
  torque_nm: 10.0
"#;
        let cfg = parse_config_str(raw, ConfigFormat::Yaml).unwrap();
        assert_eq!(cfg.endpoint, Endpoint::tcp("10.10.10.2", 502));
        assert_eq!(cfg.register_map, RegisterMap::SixAxisBlock);
        assert_eq!(cfg.timeout_ms, 1000);
        assert_eq!(
            cfg.profile().unwrap().ranges(),
            [100.0, 100.0, 100.0, 10.0, 10.0, 10.0]
        );
    }

    #[test]
    fn test_json_serial_endpoint() {
        let raw = r#"{
            "endpoint": {"kind": "serial", "path": "/dev/ttyUSB0", "baud_rate": 115200, "parity": "even"},
            "register_map": "force_per_unit",
            "poll_hz": 20
        }"#;
        let cfg = parse_config_str(raw, ConfigFormat::Json).unwrap();
        assert_eq!(
            cfg.endpoint,
            Endpoint::Serial {
                path: "/dev/ttyUSB0".into(),
                baud_rate: 115_200,
                parity: Parity::Even,
            }
        );
        assert_eq!(cfg.register_map, RegisterMap::ForcePerUnit);
        assert_eq!(cfg.poll_interval().as_millis(), 50);
    }

    #[test]
    fn test_invalid_range_fails_at_load() {
        let raw = "endpoint: {kind: tcp, host: h, port: 502}\nranges: {force_n: 0}\n";
        let err = parse_config_str(raw, ConfigFormat::Yaml).unwrap_err();
        assert!(format!("{err:#}").contains("full-scale range"));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let raw = "endpoint: {kind: tcp, host: h, port: 502}\nlanguage: zh\n";
        assert!(parse_config_str(raw, ConfigFormat::Yaml).is_err());
    }

    #[test]
    fn test_load_file_picks_format_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"endpoint": {{"kind": "tcp", "host": "127.0.0.1", "port": 1502}}}}"#
        )
        .unwrap();
        let cfg = load_config_file(file.path()).unwrap();
        assert_eq!(cfg.endpoint, Endpoint::tcp("127.0.0.1", 1502));
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = load_config_file("/nonexistent/ft.yaml").unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/ft.yaml"));
    }
}
