/// Destinations for emitted telemetry records
use async_trait::async_trait;
use log::{debug, error};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::SinkError;
use crate::models::TelemetryRecord;

/// Receives record snapshots. Shared between device sessions, so
/// implementations must accept concurrent `write` calls.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn write(&self, record: &TelemetryRecord) -> Result<(), SinkError>;
}

/// Appends each record as one JSON document per line
pub struct JsonLinesSink {
    out: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl JsonLinesSink {
    pub fn new(out: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        JsonLinesSink {
            out: Mutex::new(Box::new(out)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }

    /// Open `path` for appending, creating it if needed
    pub async fn append_to(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self::new(file))
    }
}

#[async_trait]
impl TelemetrySink for JsonLinesSink {
    async fn write(&self, record: &TelemetryRecord) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        // One lock per line keeps lines from concurrent sessions intact
        let mut out = self.out.lock().await;
        out.write_all(&line).await?;
        out.flush().await?;
        debug!("Wrote {} byte record for {}", line.len(), record.addr);
        Ok(())
    }
}

/// Writes every record to all inner sinks
pub struct FanoutSink {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn TelemetrySink>>) -> Self {
        FanoutSink { sinks }
    }
}

#[async_trait]
impl TelemetrySink for FanoutSink {
    /// Every sink is attempted; the first failure is returned afterwards.
    async fn write(&self, record: &TelemetryRecord) -> Result<(), SinkError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.write(record).await {
                error!("Sink write failed for {}: {}", record.addr, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SensorReading;
    use crate::testing::RecordingSink;
    use std::io::Cursor;

    /// An in-memory writer whose contents survive the sink
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<std::sync::Mutex<Cursor<Vec<u8>>>>);

    impl AsyncWrite for SharedBuffer {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::task::Poll::Ready(std::io::Write::write(&mut *self.0.lock().unwrap(), buf))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    fn record(addr: &str) -> TelemetryRecord {
        let mut record = TelemetryRecord::new(addr);
        record.time = 42;
        record.merge(&SensorReading::Temperature { target_c: 20.5 });
        record
    }

    #[tokio::test]
    async fn writes_one_line_per_record() {
        let buffer = SharedBuffer::default();
        let sink = JsonLinesSink::new(buffer.clone());

        sink.write(&record("AA")).await.unwrap();
        sink.write(&record("BB")).await.unwrap();

        let bytes = buffer.0.lock().unwrap().get_ref().clone();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"addr":"AA","time":42,"t006":20.5}"#);
        assert!(lines[1].starts_with(r#"{"addr":"BB""#));
    }

    #[tokio::test]
    async fn concurrent_writes_keep_lines_whole() {
        let buffer = SharedBuffer::default();
        let sink = Arc::new(JsonLinesSink::new(buffer.clone()));

        let mut handles = Vec::new();
        for i in 0..8 {
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                sink.write(&record(&format!("DEV{i}"))).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let bytes = buffer.0.lock().unwrap().get_ref().clone();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.lines().count(), 8);
        for line in text.lines() {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["t006"], 20.5);
        }
    }

    #[tokio::test]
    async fn fanout_tries_every_sink() {
        let failing = Arc::new(RecordingSink::failing());
        let healthy = Arc::new(RecordingSink::new());
        let sinks: Vec<Arc<dyn TelemetrySink>> = vec![failing.clone(), healthy.clone()];
        let fanout = FanoutSink::new(sinks);

        let result = fanout.write(&record("AA")).await;

        assert!(result.is_err());
        assert_eq!(failing.records().len(), 0);
        assert_eq!(healthy.records().len(), 1);
    }
}
