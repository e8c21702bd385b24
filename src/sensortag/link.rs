/// Abstract GATT transport consumed by the session
use async_trait::async_trait;
use std::time::Duration;

use crate::error::LinkError;
use crate::models::RawFrame;

/// Opens links to devices by their link-layer address
#[async_trait]
pub trait GattConnector: Send + Sync {
    type Link: GattLink;

    async fn connect(&self, address: &str) -> Result<Self::Link, LinkError>;
}

/// An open connection to one device
#[async_trait]
pub trait GattLink: Send {
    async fn write_characteristic(&mut self, handle: u16, value: &[u8]) -> Result<(), LinkError>;

    async fn read_characteristic(&mut self, handle: u16) -> Result<Vec<u8>, LinkError>;

    /// Wait up to `timeout` for the next notification. Expiry is reported as
    /// [`LinkError::Timeout`].
    async fn next_notification(&mut self, timeout: Duration) -> Result<RawFrame, LinkError>;
}
