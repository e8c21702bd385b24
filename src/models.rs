use serde::Serialize;

/// One notification as delivered by the link, tagged with its data handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub handle: u16,
    pub payload: Vec<u8>,
}

impl RawFrame {
    pub fn new(handle: u16, payload: impl Into<Vec<u8>>) -> Self {
        RawFrame {
            handle,
            payload: payload.into(),
        }
    }
}

/// A decoded value from one of the SensorTag sensors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorReading {
    Temperature { target_c: f64 },
    Accelerometer { xyz: [f64; 3], magnitude: f64 },
    Humidity { temp_c: f64, rh_percent: f64 },
    Barometer { temp_c: f64, pressure_hpa: f64 },
    Magnetometer { xyz: [f64; 3] },
    Gyroscope { xyz: [f64; 3] },
}

impl SensorReading {
    pub fn sensor_name(&self) -> &'static str {
        match self {
            SensorReading::Temperature { .. } => "temperature",
            SensorReading::Accelerometer { .. } => "accelerometer",
            SensorReading::Humidity { .. } => "humidity",
            SensorReading::Barometer { .. } => "barometer",
            SensorReading::Magnetometer { .. } => "magnetometer",
            SensorReading::Gyroscope { .. } => "gyroscope",
        }
    }

    pub fn is_finite(&self) -> bool {
        match *self {
            SensorReading::Temperature { target_c } => target_c.is_finite(),
            SensorReading::Accelerometer { xyz, magnitude } => {
                magnitude.is_finite() && xyz.iter().all(|v| v.is_finite())
            }
            SensorReading::Humidity { temp_c, rh_percent } => {
                temp_c.is_finite() && rh_percent.is_finite()
            }
            SensorReading::Barometer {
                temp_c,
                pressure_hpa,
            } => temp_c.is_finite() && pressure_hpa.is_finite(),
            SensorReading::Magnetometer { xyz } | SensorReading::Gyroscope { xyz } => {
                xyz.iter().all(|v| v.is_finite())
            }
        }
    }
}

/// Latest value of every sensor for one device.
///
/// Field names match the JSON data log format consumed downstream:
/// `t006` is the IR target temperature, `humd` is `[temp, rh]` and
/// `baro` is `[temp, pressure]`. Sensors that have not reported yet are
/// left out of the serialized form.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub addr: String,
    /// Milliseconds since the Unix epoch of the last merged reading
    pub time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t006: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accl: Option<[f64; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humd: Option<[f64; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baro: Option<[f64; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magn: Option<[f64; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gyro: Option<[f64; 3]>,
}

impl TelemetryRecord {
    pub fn new(addr: &str) -> Self {
        TelemetryRecord {
            addr: addr.to_string(),
            ..Default::default()
        }
    }

    /// Overwrite the fields belonging to `reading`, leaving the others alone
    pub fn merge(&mut self, reading: &SensorReading) {
        match *reading {
            SensorReading::Temperature { target_c } => self.t006 = Some(target_c),
            // The data log only ever carried the axes, not the magnitude
            SensorReading::Accelerometer { xyz, .. } => self.accl = Some(xyz),
            SensorReading::Humidity { temp_c, rh_percent } => {
                self.humd = Some([temp_c, rh_percent])
            }
            SensorReading::Barometer {
                temp_c,
                pressure_hpa,
            } => self.baro = Some([temp_c, pressure_hpa]),
            SensorReading::Magnetometer { xyz } => self.magn = Some(xyz),
            SensorReading::Gyroscope { xyz } => self.gyro = Some(xyz),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_other_sensors() {
        let mut record = TelemetryRecord::new("B0:B4:48:C9:4C:82");
        record.merge(&SensorReading::Temperature { target_c: 21.5 });
        record.merge(&SensorReading::Humidity {
            temp_c: 22.0,
            rh_percent: 41.0,
        });
        record.merge(&SensorReading::Temperature { target_c: 22.5 });

        assert_eq!(record.t006, Some(22.5));
        assert_eq!(record.humd, Some([22.0, 41.0]));
        assert_eq!(record.baro, None);
    }

    #[test]
    fn serializes_with_data_log_keys() {
        let mut record = TelemetryRecord::new("B0:B4:48:C9:4C:82");
        record.time = 1_400_000_000_000;
        record.merge(&SensorReading::Barometer {
            temp_c: 24.5,
            pressure_hpa: 1013.25,
        });

        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"addr":"B0:B4:48:C9:4C:82","time":1400000000000,"baro":[24.5,1013.25]}"#
        );
    }

    #[test]
    fn nan_is_not_finite() {
        let reading = SensorReading::Gyroscope {
            xyz: [0.0, f64::NAN, 1.0],
        };
        assert!(!reading.is_finite());
        assert!(SensorReading::Temperature { target_c: 20.0 }.is_finite());
    }
}
