/// Database operations for storing SensorTag telemetry
use async_trait::async_trait;

use crate::database::connection::execute_with_retry;
use crate::error::SinkError;
use crate::models::TelemetryRecord;
use crate::telemetry::sink::TelemetrySink;
use crate::utils::millis_to_datetime;

/// Store one telemetry snapshot in the sensortag_telemetry table
///
/// Expected schema:
/// ```sql
/// CREATE TABLE sensortag_telemetry (
///     sensor_mac TEXT NOT NULL,
///     time TIMESTAMPTZ NOT NULL,
///     ir_temperature DOUBLE PRECISION,
///     accel_x DOUBLE PRECISION, accel_y DOUBLE PRECISION, accel_z DOUBLE PRECISION,
///     humidity_temperature DOUBLE PRECISION, humidity DOUBLE PRECISION,
///     barometer_temperature DOUBLE PRECISION, pressure DOUBLE PRECISION,
///     magnet_x DOUBLE PRECISION, magnet_y DOUBLE PRECISION, magnet_z DOUBLE PRECISION,
///     gyro_x DOUBLE PRECISION, gyro_y DOUBLE PRECISION, gyro_z DOUBLE PRECISION
/// );
/// ```
/// Sensors that have not reported yet are stored as NULL.
///
/// # Arguments
/// * `record` - Snapshot to store
/// * `database_url` - PostgreSQL connection string with `sslrootcert`
/// * `max_retries` - Connection attempts before giving up
pub async fn store_telemetry(
    record: &TelemetryRecord,
    database_url: &str,
    max_retries: usize,
) -> Result<(), String> {
    // Clone data for move into async closure
    let record = record.clone();

    execute_with_retry(database_url, max_retries, move |client| {
        let record = record.clone();
        async move {
            let axis = |v: Option<[f64; 3]>, i: usize| v.map(|xyz| xyz[i]);
            let pair = |v: Option<[f64; 2]>, i: usize| v.map(|p| p[i]);
            client.execute(
                "INSERT INTO sensortag_telemetry(sensor_mac, time, ir_temperature,
                     accel_x, accel_y, accel_z, humidity_temperature, humidity,
                     barometer_temperature, pressure, magnet_x, magnet_y, magnet_z,
                     gyro_x, gyro_y, gyro_z)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
                &[
                    &record.addr,
                    &millis_to_datetime(record.time),
                    &record.t006,
                    &axis(record.accl, 0),
                    &axis(record.accl, 1),
                    &axis(record.accl, 2),
                    &pair(record.humd, 0),
                    &pair(record.humd, 1),
                    &pair(record.baro, 0),
                    &pair(record.baro, 1),
                    &axis(record.magn, 0),
                    &axis(record.magn, 1),
                    &axis(record.magn, 2),
                    &axis(record.gyro, 0),
                    &axis(record.gyro, 1),
                    &axis(record.gyro, 2),
                ],
            ).await
        }
    }).await
}

/// Telemetry sink writing every snapshot to PostgreSQL
pub struct PostgresSink {
    database_url: String,
    max_retries: usize,
}

impl PostgresSink {
    pub fn new(database_url: &str, max_retries: usize) -> Self {
        PostgresSink {
            database_url: database_url.to_string(),
            max_retries: max_retries.max(1),
        }
    }
}

#[async_trait]
impl TelemetrySink for PostgresSink {
    async fn write(&self, record: &TelemetryRecord) -> Result<(), SinkError> {
        store_telemetry(record, &self.database_url, self.max_retries)
            .await
            .map_err(SinkError::Database)
    }
}
