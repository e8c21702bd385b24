//! Scripted link, connector and sink used by the unit tests
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{LinkError, SinkError};
use crate::models::{RawFrame, TelemetryRecord};
use crate::sensortag::link::{GattConnector, GattLink};
use crate::telemetry::sink::TelemetrySink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Write(u16, Vec<u8>),
    Read(u16),
}

/// A link that replays a fixed script. Once the notifications run out it
/// reports a timeout, like a device that went quiet.
pub struct ScriptedLink {
    reads: HashMap<u16, Vec<u8>>,
    notifications: VecDeque<Result<RawFrame, LinkError>>,
    fail_write: Option<u16>,
    events: Arc<Mutex<Vec<LinkEvent>>>,
}

impl ScriptedLink {
    pub fn new() -> Self {
        ScriptedLink {
            reads: HashMap::new(),
            notifications: VecDeque::new(),
            fail_write: None,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_read(mut self, handle: u16, value: &[u8]) -> Self {
        self.reads.insert(handle, value.to_vec());
        self
    }

    pub fn with_notification(mut self, handle: u16, payload: &[u8]) -> Self {
        self.notifications
            .push_back(Ok(RawFrame::new(handle, payload.to_vec())));
        self
    }

    pub fn with_link_error(mut self, error: LinkError) -> Self {
        self.notifications.push_back(Err(error));
        self
    }

    pub fn failing_write(mut self, handle: u16) -> Self {
        self.fail_write = Some(handle);
        self
    }

    /// Shared view of every write and read, kept after the link is dropped
    pub fn events(&self) -> Arc<Mutex<Vec<LinkEvent>>> {
        self.events.clone()
    }
}

#[async_trait]
impl GattLink for ScriptedLink {
    async fn write_characteristic(&mut self, handle: u16, value: &[u8]) -> Result<(), LinkError> {
        if self.fail_write == Some(handle) {
            return Err(LinkError::Bluetooth(format!("write to 0x{handle:04x} rejected")));
        }
        self.events
            .lock()
            .unwrap()
            .push(LinkEvent::Write(handle, value.to_vec()));
        Ok(())
    }

    async fn read_characteristic(&mut self, handle: u16) -> Result<Vec<u8>, LinkError> {
        self.events.lock().unwrap().push(LinkEvent::Read(handle));
        self.reads
            .get(&handle)
            .cloned()
            .ok_or(LinkError::UnknownHandle(handle))
    }

    async fn next_notification(&mut self, timeout: Duration) -> Result<RawFrame, LinkError> {
        self.notifications
            .pop_front()
            .unwrap_or(Err(LinkError::Timeout(timeout)))
    }
}

/// Hands out scripted connection results in order, then refuses to connect
pub struct ScriptedConnector {
    links: Mutex<VecDeque<Result<ScriptedLink, LinkError>>>,
}

impl ScriptedConnector {
    pub fn new(links: Vec<Result<ScriptedLink, LinkError>>) -> Self {
        ScriptedConnector {
            links: Mutex::new(links.into()),
        }
    }
}

#[async_trait]
impl GattConnector for ScriptedConnector {
    type Link = ScriptedLink;

    async fn connect(&self, address: &str) -> Result<ScriptedLink, LinkError> {
        let next = self.links.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Err(LinkError::Connect {
                address: address.to_string(),
                reason: "script exhausted".into(),
            })
        })
    }
}

/// Keeps every record it is given; can be switched into a failing mode
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<TelemetryRecord>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let sink = Self::default();
        sink.set_failing(true);
        sink
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelemetrySink for RecordingSink {
    async fn write(&self, record: &TelemetryRecord) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Database("sink unavailable".into()));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}
