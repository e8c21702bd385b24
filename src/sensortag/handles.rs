/// GATT handle assignments of the TI CC2541 SensorTag firmware
///
/// Every sensor has a data characteristic (notifications arrive from it),
/// a client characteristic configuration descriptor right after it, and a
/// configuration characteristic that switches the sensor on.

/// Written to a notification descriptor to subscribe
pub const NOTIFY_ON: [u8; 2] = [0x01, 0x00];
pub const SENSOR_ON: [u8; 1] = [0x01];
pub const GYRO_ALL_AXES: [u8; 1] = [0x07];
pub const BAROMETER_CALIBRATE: [u8; 1] = [0x02];

pub const BAROMETER_CALIBRATION: u16 = 0x52;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorChannel {
    pub name: &'static str,
    pub data: u16,
    pub notify: u16,
    pub config: u16,
    pub enable: &'static [u8],
    /// Measurement period characteristic, in units of 10 ms
    pub period: Option<u16>,
}

pub const TEMPERATURE: SensorChannel = SensorChannel {
    name: "temperature",
    data: 0x25,
    notify: 0x26,
    config: 0x29,
    enable: &SENSOR_ON,
    period: None,
};

pub const ACCELEROMETER: SensorChannel = SensorChannel {
    name: "accelerometer",
    data: 0x2D,
    notify: 0x2E,
    config: 0x31,
    enable: &SENSOR_ON,
    period: Some(0x34),
};

pub const HUMIDITY: SensorChannel = SensorChannel {
    name: "humidity",
    data: 0x38,
    notify: 0x39,
    config: 0x3C,
    enable: &SENSOR_ON,
    period: None,
};

pub const MAGNETOMETER: SensorChannel = SensorChannel {
    name: "magnetometer",
    data: 0x40,
    notify: 0x41,
    config: 0x44,
    enable: &SENSOR_ON,
    period: Some(0x47),
};

pub const BAROMETER: SensorChannel = SensorChannel {
    name: "barometer",
    data: 0x4B,
    notify: 0x4C,
    config: 0x4F,
    enable: &SENSOR_ON,
    period: None,
};

pub const GYROSCOPE: SensorChannel = SensorChannel {
    name: "gyroscope",
    data: 0x57,
    notify: 0x58,
    config: 0x5B,
    enable: &GYRO_ALL_AXES,
    period: None,
};

/// Period register value for a period in milliseconds, clamped to the
/// firmware's accepted 100 ms .. 2550 ms range.
pub fn period_value(period_ms: u32) -> u8 {
    (period_ms / 10).clamp(10, 255) as u8
}
