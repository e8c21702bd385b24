/// Barometer (T5400) calibration coefficients and compensation
///
/// The coefficients are read once per connection from the calibration
/// characteristic after putting the sensor into calibration mode. Pressure
/// compensation is integer fixed-point math; every intermediate runs in
/// `i64` because `c5 * Tr * Tr` does not fit in 32 bits.
use crate::error::{DecodeError, ProtocolError};
use crate::models::SensorReading;
use crate::sensortag::decode::{check_len, finite, word};

pub const CALIBRATION_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarometerCalibration {
    pub c1: u16,
    pub c2: u16,
    pub c3: u16,
    pub c4: u16,
    pub c5: i16,
    pub c6: i16,
    pub c7: i16,
    pub c8: i16,
}

impl BarometerCalibration {
    /// Parse the 16-byte calibration read: eight little-endian words,
    /// `c1..c4` unsigned and `c5..c8` two's complement.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != CALIBRATION_LEN {
            return Err(ProtocolError::CalibrationLength {
                expected: CALIBRATION_LEN,
                actual: bytes.len(),
            });
        }

        Ok(BarometerCalibration {
            c1: word(bytes, 0),
            c2: word(bytes, 1),
            c3: word(bytes, 2),
            c4: word(bytes, 3),
            c5: word(bytes, 4) as i16,
            c6: word(bytes, 5) as i16,
            c7: word(bytes, 6) as i16,
            c8: word(bytes, 7) as i16,
        })
    }
}

/// Die temperature in °C. Computed in hundredths of a degree, then scaled.
pub fn decode_barometer_temperature(calib: &BarometerCalibration, raw_temp: i64) -> f64 {
    let c1 = i64::from(calib.c1);
    let c2 = i64::from(calib.c2);

    let mut temp = (c1 * raw_temp * 100) >> 24;
    temp += (c2 * 100) >> 10;
    temp as f64 / 100.0
}

/// Compensated pressure in hPa. `raw_temp` is signed, `raw_pressure` is not.
pub fn decode_barometer_pressure(
    calib: &BarometerCalibration,
    raw_temp: i64,
    raw_pressure: u64,
) -> f64 {
    let tr = raw_temp;
    let pr = raw_pressure as i64;
    let c3 = i64::from(calib.c3);
    let c4 = i64::from(calib.c4);
    let c5 = i64::from(calib.c5);
    let c6 = i64::from(calib.c6);
    let c7 = i64::from(calib.c7);
    let c8 = i64::from(calib.c8);

    // Sensitivity
    let mut s = c3;
    s += (c4 * tr) >> 17;
    s += (c5 * tr * tr) >> 34;

    // Offset
    let mut o = c6 << 14;
    o += (c7 * tr) >> 3;
    o += (c8 * tr * tr) >> 19;

    // Pascal
    let pressure = ((s * pr) + o) >> 14;
    pressure as f64 / 100.0
}

pub fn decode_barometer_payload(
    calib: &BarometerCalibration,
    payload: &[u8],
) -> Result<SensorReading, DecodeError> {
    check_len("barometer", payload, 4)?;
    let raw_temp = i64::from(word(payload, 0) as i16);
    let raw_pressure = u64::from(word(payload, 1));

    finite(SensorReading::Barometer {
        temp_c: decode_barometer_temperature(calib, raw_temp),
        pressure_hpa: decode_barometer_pressure(calib, raw_temp, raw_pressure),
    })
}
