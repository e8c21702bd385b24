use log::{debug, info};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::sensortag::handles::period_value;
use crate::sensortag::{ReconnectPolicy, SessionOptions};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub address: String,
    pub name: String,
}

/// Where telemetry goes. Both can be active at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    /// JSON lines file; `None` means stdout
    pub log_path: Option<String>,
    pub database_url: Option<String>,
    pub database_max_retries: usize,
}

#[derive(Debug, Clone)]
pub struct SensorTagConfig {
    pub devices: Vec<Device>,
    pub sinks: SinkConfig,
    pub session: SessionOptions,
    pub reconnect: ReconnectPolicy,
}

impl SensorTagConfig {
    /// Load configuration from the process environment and an optional `.env`
    pub fn new() -> Result<Self, ConfigError> {
        // Load environment variables
        dotenv::dotenv().ok();

        let vars: Vec<(String, String)> = env::vars().collect();
        Self::from_lookup(|key| env::var(key).ok(), &vars)
    }

    /// Build the configuration from a variable lookup. `vars` is the full
    /// variable list, needed for the numbered `SENSORTAG_<N>_MAC` form.
    pub fn from_lookup<F>(lookup: F, vars: &[(String, String)]) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let devices = parse_devices(&lookup, vars)?;

        let log_path = lookup("TELEMETRY_LOG").filter(|p| !p.is_empty() && p != "-");
        let database_url = lookup("DATABASE_URL").filter(|u| !u.is_empty());
        let sinks = SinkConfig {
            log_path,
            database_url,
            database_max_retries: number(&lookup, "DATABASE_MAX_RETRIES")?.unwrap_or(3),
        };

        let session = SessionOptions {
            notification_timeout: Duration::from_secs(
                number(&lookup, "NOTIFICATION_TIMEOUT_SECS")?.unwrap_or(4),
            ),
            accelerometer_period: number(&lookup, "ACCEL_PERIOD_MS")?.map(period_value),
            magnetometer_period: number(&lookup, "MAGNET_PERIOD_MS")?.map(period_value),
            sink_timeout: Duration::from_secs(
                number(&lookup, "SINK_WRITE_TIMEOUT_SECS")?.unwrap_or(5),
            ),
        };

        let defaults = ReconnectPolicy::default();
        let reconnect = ReconnectPolicy {
            initial_backoff: number(&lookup, "RECONNECT_INITIAL_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_backoff),
            max_backoff: number(&lookup, "RECONNECT_MAX_BACKOFF_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_backoff),
            max_attempts: number(&lookup, "RECONNECT_MAX_ATTEMPTS")?,
        };

        info!("Total devices loaded: {}", devices.len());
        for device in &devices {
            info!("Device: {} -> {}", device.address, device.name);
        }

        Ok(SensorTagConfig {
            devices,
            sinks,
            session,
            reconnect,
        })
    }
}

fn number<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { key, value }),
    }
}

fn parse_devices<F>(lookup: &F, vars: &[(String, String)]) -> Result<Vec<Device>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut devices = Vec::new();

    // Try SENSORTAG_DEVICES format first
    if let Some(list) = lookup("SENSORTAG_DEVICES") {
        debug!("Found SENSORTAG_DEVICES: '{}'", list);
        for pair in list.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            // A bare address is allowed; it doubles as the name
            let (mac, name) = pair.split_once('=').unwrap_or((pair, pair));
            let (mac, name) = (mac.trim(), name.trim());
            if !mac.is_empty() && !name.is_empty() {
                push_device(&mut devices, mac, name);
            } else {
                debug!("Skipping malformed device entry: '{}'", pair);
            }
        }
    } else {
        // Fallback to individual environment variables
        debug!("SENSORTAG_DEVICES not found, trying individual variables");
        let mut numbered: Vec<(&str, &str)> = vars
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix("SENSORTAG_")
                    .and_then(|s| s.strip_suffix("_MAC"))
                    .map(|index| (index, value.as_str()))
            })
            .collect();
        // Numeric indices in numeric order, anything else after them
        numbered.sort_by_key(|&(index, _)| (index.parse::<u32>().unwrap_or(u32::MAX), index));
        for (index, mac) in numbered {
            let name_key = format!("SENSORTAG_{}_NAME", index);
            let name = lookup(name_key.as_str()).unwrap_or_else(|| mac.to_string());
            push_device(&mut devices, mac.trim(), name.trim());
        }
    }

    if devices.is_empty() {
        return Err(ConfigError::NoDevices);
    }
    Ok(devices)
}

fn push_device(devices: &mut Vec<Device>, mac: &str, name: &str) {
    let address = mac.to_uppercase();
    if devices.iter().any(|d| d.address == address) {
        debug!("Ignoring duplicate device {}", address);
        return;
    }
    devices.push(Device {
        address,
        name: name.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<SensorTagConfig, ConfigError> {
        let vars: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let map: HashMap<String, String> = vars.iter().cloned().collect();
        SensorTagConfig::from_lookup(|key| map.get(key).cloned(), &vars)
    }

    #[test]
    fn parses_device_list() {
        let config = load(&[(
            "SENSORTAG_DEVICES",
            "b0:b4:48:c9:4c:82=desk, 34:B1:F7:D5:04:01 ,,",
        )])
        .unwrap();

        assert_eq!(
            config.devices,
            vec![
                Device {
                    address: "B0:B4:48:C9:4C:82".into(),
                    name: "desk".into()
                },
                Device {
                    address: "34:B1:F7:D5:04:01".into(),
                    name: "34:B1:F7:D5:04:01".into()
                },
            ]
        );
    }

    #[test]
    fn falls_back_to_numbered_variables() {
        let config = load(&[
            ("SENSORTAG_2_MAC", "34:B1:F7:D5:04:01"),
            ("SENSORTAG_1_MAC", "B0:B4:48:C9:4C:82"),
            ("SENSORTAG_1_NAME", "desk"),
        ])
        .unwrap();

        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].name, "desk");
        assert_eq!(config.devices[1].address, "34:B1:F7:D5:04:01");
    }

    #[test]
    fn numbered_devices_sort_by_index() {
        let config = load(&[
            ("SENSORTAG_10_MAC", "00:00:00:00:00:10"),
            ("SENSORTAG_2_MAC", "00:00:00:00:00:02"),
            ("SENSORTAG_1_MAC", "00:00:00:00:00:01"),
        ])
        .unwrap();

        let addresses: Vec<&str> = config.devices.iter().map(|d| d.address.as_str()).collect();
        assert_eq!(
            addresses,
            vec!["00:00:00:00:00:01", "00:00:00:00:00:02", "00:00:00:00:00:10"]
        );
    }

    #[test]
    fn requires_a_device() {
        assert_eq!(load(&[]).unwrap_err(), ConfigError::NoDevices);
        assert_eq!(
            load(&[("SENSORTAG_DEVICES", " , ")]).unwrap_err(),
            ConfigError::NoDevices
        );
    }

    #[test]
    fn defaults() {
        let config = load(&[("SENSORTAG_DEVICES", "B0:B4:48:C9:4C:82")]).unwrap();

        assert_eq!(config.sinks.log_path, None);
        assert_eq!(config.sinks.database_url, None);
        assert_eq!(config.sinks.database_max_retries, 3);
        assert_eq!(config.session, SessionOptions::default());
        assert_eq!(config.reconnect, ReconnectPolicy::default());
    }

    #[test]
    fn reads_tuning_variables() {
        let config = load(&[
            ("SENSORTAG_DEVICES", "B0:B4:48:C9:4C:82"),
            ("TELEMETRY_LOG", "/var/log/sensortag.jsonl"),
            ("NOTIFICATION_TIMEOUT_SECS", "10"),
            ("ACCEL_PERIOD_MS", "500"),
            ("RECONNECT_MAX_ATTEMPTS", "5"),
            ("RECONNECT_INITIAL_BACKOFF_MS", "250"),
            ("SINK_WRITE_TIMEOUT_SECS", "2"),
        ])
        .unwrap();

        assert_eq!(
            config.sinks.log_path.as_deref(),
            Some("/var/log/sensortag.jsonl")
        );
        assert_eq!(config.session.notification_timeout, Duration::from_secs(10));
        assert_eq!(config.session.accelerometer_period, Some(50));
        assert_eq!(config.session.magnetometer_period, None);
        assert_eq!(config.session.sink_timeout, Duration::from_secs(2));
        assert_eq!(config.reconnect.max_attempts, Some(5));
        assert_eq!(
            config.reconnect.initial_backoff,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn dash_means_stdout() {
        let config = load(&[
            ("SENSORTAG_DEVICES", "B0:B4:48:C9:4C:82"),
            ("TELEMETRY_LOG", "-"),
        ])
        .unwrap();
        assert_eq!(config.sinks.log_path, None);
    }

    #[test]
    fn rejects_bad_numbers() {
        let err = load(&[
            ("SENSORTAG_DEVICES", "B0:B4:48:C9:4C:82"),
            ("NOTIFICATION_TIMEOUT_SECS", "soon"),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidNumber {
                key: "NOTIFICATION_TIMEOUT_SECS",
                value: "soon".into()
            }
        );
    }
}
