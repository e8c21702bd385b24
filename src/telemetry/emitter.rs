/// Merges decoded readings into per-device records and forwards snapshots
use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::error::SinkError;
use crate::models::{SensorReading, TelemetryRecord};
use crate::telemetry::sink::TelemetrySink;
use crate::utils::{format_datetime, millis_to_datetime, now_millis};

/// Keeps the latest value of every sensor for each device and writes a
/// snapshot to the sink whenever the barometer, the slowest sensor,
/// reports. Records are emitted as they are; sensors that have not
/// reported yet are simply absent.
pub struct TelemetryEmitter {
    sink: Arc<dyn TelemetrySink>,
    records: HashMap<String, TelemetryRecord>,
    clock: fn() -> i64,
    write_timeout: Duration,
}

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

impl TelemetryEmitter {
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self::with_clock(sink, now_millis)
    }

    pub fn with_clock(sink: Arc<dyn TelemetrySink>, clock: fn() -> i64) -> Self {
        TelemetryEmitter {
            sink,
            records: HashMap::new(),
            clock,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Bound each sink write; a slower write is abandoned and reported as
    /// `SinkError::Timeout`
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    /// Merge `reading` into the record of `device_id`.
    ///
    /// Returns `Ok(true)` when a snapshot was handed to the sink. A sink
    /// failure is returned to the caller; the in-memory record is already
    /// updated at that point and stays usable for later readings.
    pub async fn on_reading(
        &mut self,
        device_id: &str,
        reading: SensorReading,
    ) -> Result<bool, SinkError> {
        let record = self
            .records
            .entry(device_id.to_string())
            .or_insert_with(|| TelemetryRecord::new(device_id));
        record.merge(&reading);
        record.time = (self.clock)();

        if !matches!(reading, SensorReading::Barometer { .. }) {
            return Ok(false);
        }

        let snapshot = record.clone();
        debug!(
            "Emitting record for {} at {}",
            device_id,
            format_datetime(&millis_to_datetime(snapshot.time))
        );
        timeout(self.write_timeout, self.sink.write(&snapshot))
            .await
            .map_err(|_| SinkError::Timeout(self.write_timeout))??;

        if let Some([temp, pressure]) = snapshot.baro {
            info!(
                "Emitted record for {}: barometer {:.2}°C, {:.2} hPa",
                device_id, temp, pressure
            );
        }
        Ok(true)
    }

    #[cfg(test)]
    pub fn record(&self, device_id: &str) -> Option<&TelemetryRecord> {
        self.records.get(device_id)
    }
}
