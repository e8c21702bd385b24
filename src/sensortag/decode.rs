/// SensorTag raw register conversions
///
/// The arithmetic functions are total over 8/16-bit inputs and return `f64`.
/// Out-of-domain math (a negative base under the thermopile fourth root)
/// yields NaN rather than panicking; the `*_payload` helpers turn any
/// non-finite result into a [`DecodeError::NonFinite`].
use crate::error::DecodeError;
use crate::models::SensorReading;

// TMP006 thermopile constants
const S0: f64 = 6.4e-14;
const A1: f64 = 1.75e-3;
const A2: f64 = -1.678e-5;
const B0: f64 = -2.94e-5;
const B1: f64 = -5.7e-7;
const B2: f64 = 4.63e-9;
const C2: f64 = 13.4;
const T_REF: f64 = 298.15;
const KELVIN_OFFSET: f64 = 273.15;

const ACCEL_LSB_PER_G: f64 = 64.0; // ±2 g range
const MAGNET_LSB_PER_UT: f64 = 65536.0 / 2000.0;
const GYRO_LSB_PER_DPS: f64 = 65536.0 / 500.0;

/// Reinterpret a 16-bit register value as two's complement
pub fn to_signed_16(n: u16) -> f64 {
    if n > 0x7FFF {
        f64::from(n) - 65536.0
    } else {
        f64::from(n)
    }
}

/// Reinterpret an 8-bit register value as two's complement
pub fn to_signed_8(n: u8) -> f64 {
    if n > 0x7F {
        f64::from(n) - 256.0
    } else {
        f64::from(n)
    }
}

/// Little-endian 16-bit word `index` of a payload. Callers check the length.
pub(crate) fn word(payload: &[u8], index: usize) -> u16 {
    u16::from_le_bytes([payload[2 * index], payload[2 * index + 1]])
}

pub(crate) fn check_len(
    sensor: &'static str,
    payload: &[u8],
    expected: usize,
) -> Result<(), DecodeError> {
    if payload.len() < expected {
        return Err(DecodeError::ShortPayload {
            sensor,
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

pub(crate) fn finite(reading: SensorReading) -> Result<SensorReading, DecodeError> {
    if reading.is_finite() {
        Ok(reading)
    } else {
        Err(DecodeError::NonFinite {
            sensor: reading.sensor_name(),
        })
    }
}

/// IR thermopile object temperature in °C
pub fn decode_temperature(obj_raw: u16, amb_raw: u16) -> f64 {
    let obj = to_signed_16(obj_raw);
    let amb = to_signed_16(amb_raw);

    let amb_c = amb / 128.0;
    let t_die = amb_c + KELVIN_OFFSET;
    let v_obj = obj * 1.5625e-7;

    let dt = t_die - T_REF;
    let s = S0 * (1.0 + A1 * dt + A2 * dt * dt);
    let v_os = B0 + B1 * dt + B2 * dt * dt;
    let f_obj = (v_obj - v_os) + C2 * (v_obj - v_os) * (v_obj - v_os);

    let t_obj = (t_die.powi(4) + f_obj / s).powf(0.25);
    t_obj - KELVIN_OFFSET
}

/// Returns `(temperature °C, relative humidity %)`
pub fn decode_humidity(raw_t: u16, raw_h: u16) -> (f64, f64) {
    let temp_c = -46.85 + 175.72 / 65536.0 * f64::from(raw_t);
    // Low two bits are status flags
    let raw_h = raw_h & !0x0003;
    let rh_percent = -6.0 + 125.0 / 65536.0 * f64::from(raw_h);
    (temp_c, rh_percent)
}

/// Returns `([x, y, z] in g, magnitude in g)`
pub fn decode_accelerometer(raw_x: u8, raw_y: u8, raw_z: u8) -> ([f64; 3], f64) {
    let xyz = [raw_x, raw_y, raw_z].map(|v| to_signed_8(v) / ACCEL_LSB_PER_G);
    let magnitude = (xyz[0] * xyz[0] + xyz[1] * xyz[1] + xyz[2] * xyz[2]).sqrt();
    (xyz, magnitude)
}

/// Magnetic field in µT
pub fn decode_magnetometer(raw_x: u16, raw_y: u16, raw_z: u16) -> [f64; 3] {
    [raw_x, raw_y, raw_z].map(|v| to_signed_16(v) / MAGNET_LSB_PER_UT)
}

/// Angular rate in °/s
pub fn decode_gyroscope(raw_x: u16, raw_y: u16, raw_z: u16) -> [f64; 3] {
    [raw_x, raw_y, raw_z].map(|v| to_signed_16(v) / GYRO_LSB_PER_DPS)
}

pub fn decode_temperature_payload(payload: &[u8]) -> Result<SensorReading, DecodeError> {
    check_len("temperature", payload, 4)?;
    let target_c = decode_temperature(word(payload, 0), word(payload, 1));
    finite(SensorReading::Temperature { target_c })
}

pub fn decode_accelerometer_payload(payload: &[u8]) -> Result<SensorReading, DecodeError> {
    check_len("accelerometer", payload, 3)?;
    let (xyz, magnitude) = decode_accelerometer(payload[0], payload[1], payload[2]);
    finite(SensorReading::Accelerometer { xyz, magnitude })
}

pub fn decode_humidity_payload(payload: &[u8]) -> Result<SensorReading, DecodeError> {
    check_len("humidity", payload, 4)?;
    let (temp_c, rh_percent) = decode_humidity(word(payload, 0), word(payload, 1));
    finite(SensorReading::Humidity { temp_c, rh_percent })
}

pub fn decode_magnetometer_payload(payload: &[u8]) -> Result<SensorReading, DecodeError> {
    check_len("magnetometer", payload, 6)?;
    let xyz = decode_magnetometer(word(payload, 0), word(payload, 1), word(payload, 2));
    finite(SensorReading::Magnetometer { xyz })
}

pub fn decode_gyroscope_payload(payload: &[u8]) -> Result<SensorReading, DecodeError> {
    check_len("gyroscope", payload, 6)?;
    let xyz = decode_gyroscope(word(payload, 0), word(payload, 1), word(payload, 2));
    finite(SensorReading::Gyroscope { xyz })
}
