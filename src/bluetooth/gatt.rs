/// BlueZ-backed GATT link for the SensorTag session
///
/// BlueZ exposes characteristics as D-Bus objects named after their
/// declaration handle; the value handle the SensorTag firmware documents is
/// the attribute right after it. Notifications are subscribed per
/// characteristic and funnelled into one channel tagged with the value
/// handle, so the session sees a single ordered frame stream.
use async_trait::async_trait;
use bluer::gatt::remote::Characteristic;
use bluer::{Adapter, AdapterEvent, Address};
use futures_util::StreamExt;
use log::{debug, error, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

use crate::error::LinkError;
use crate::models::RawFrame;
use crate::sensortag::handles::NOTIFY_ON;
use crate::sensortag::link::{GattConnector, GattLink};

const SCAN_DURATION_SECS: u64 = 20; // How long to look for a device BlueZ has not seen yet
const SERVICE_RESOLVE_SECS: u64 = 10;
const FRAME_QUEUE_DEPTH: usize = 64;

fn bluetooth_error(e: bluer::Error) -> LinkError {
    LinkError::Bluetooth(e.to_string())
}

#[derive(Clone)]
pub struct BluerConnector {
    _session: Arc<bluer::Session>,
    adapter: Adapter,
}

impl BluerConnector {
    /// Open a BlueZ session on the default adapter and power it on
    pub async fn new() -> Result<Self, LinkError> {
        let session = match bluer::Session::new().await {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to create Bluetooth session: {}", e);
                return Err(bluetooth_error(e));
            }
        };

        let adapter = match session.default_adapter().await {
            Ok(adapter) => adapter,
            Err(e) => {
                error!("Failed to get default Bluetooth adapter: {}", e);
                return Err(bluetooth_error(e));
            }
        };

        if let Err(e) = adapter.set_powered(true).await {
            error!("Failed to power on adapter: {}", e);
            return Err(bluetooth_error(e));
        }

        Ok(BluerConnector {
            _session: Arc::new(session),
            adapter,
        })
    }

    /// Run LE discovery until `address` shows up or the scan window closes
    async fn discover(&self, address: Address) -> Result<(), LinkError> {
        let known = self
            .adapter
            .device_addresses()
            .await
            .map_err(bluetooth_error)?;
        if known.contains(&address) {
            return Ok(());
        }

        let filter = bluer::DiscoveryFilter {
            transport: bluer::DiscoveryTransport::Le,
            duplicate_data: false,
            ..Default::default()
        };
        if let Err(e) = self.adapter.set_discovery_filter(filter).await {
            warn!("Failed to set discovery filter: {}", e);
        }

        let events = self
            .adapter
            .discover_devices()
            .await
            .map_err(bluetooth_error)?;
        let mut events = Box::pin(events);

        let deadline = Instant::now() + Duration::from_secs(SCAN_DURATION_SECS);
        loop {
            match tokio::time::timeout_at(deadline, events.next()).await {
                Ok(Some(AdapterEvent::DeviceAdded(found))) if found == address => return Ok(()),
                Ok(Some(event)) => debug!("Discovery event: {:?}", event),
                Ok(None) | Err(_) => {
                    return Err(LinkError::Connect {
                        address: address.to_string(),
                        reason: "device not found during scan".into(),
                    })
                }
            }
        }
    }
}

#[async_trait]
impl GattConnector for BluerConnector {
    type Link = BluerLink;

    async fn connect(&self, address: &str) -> Result<BluerLink, LinkError> {
        let parsed: Address = address.parse().map_err(|_| LinkError::Connect {
            address: address.to_string(),
            reason: "invalid Bluetooth address".into(),
        })?;

        self.discover(parsed).await?;

        let device = self.adapter.device(parsed).map_err(bluetooth_error)?;
        if let Err(e) = device.connect().await {
            return Err(LinkError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            });
        }

        // Characteristics only appear once BlueZ has walked the GATT database
        let deadline = Instant::now() + Duration::from_secs(SERVICE_RESOLVE_SECS);
        while !device
            .is_services_resolved()
            .await
            .map_err(bluetooth_error)?
        {
            if Instant::now() >= deadline {
                return Err(LinkError::Connect {
                    address: address.to_string(),
                    reason: "GATT services did not resolve".into(),
                });
            }
            sleep(Duration::from_millis(100)).await;
        }

        let mut characteristics = HashMap::new();
        for service in device.services().await.map_err(bluetooth_error)? {
            for characteristic in service.characteristics().await.map_err(bluetooth_error)? {
                let value_handle = characteristic.id().wrapping_add(1);
                characteristics.insert(value_handle, characteristic);
            }
        }
        debug!(
            "{} exposes {} characteristics",
            address,
            characteristics.len()
        );

        let (tx, rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
        Ok(BluerLink {
            device,
            characteristics,
            tx,
            rx,
            subscriptions: Vec::new(),
        })
    }
}

pub struct BluerLink {
    device: bluer::Device,
    characteristics: HashMap<u16, Characteristic>,
    tx: mpsc::Sender<RawFrame>,
    rx: mpsc::Receiver<RawFrame>,
    subscriptions: Vec<JoinHandle<()>>,
}

impl BluerLink {
    fn characteristic(&self, handle: u16) -> Result<&Characteristic, LinkError> {
        self.characteristics
            .get(&handle)
            .ok_or(LinkError::UnknownHandle(handle))
    }

    /// Forward notifications of the characteristic at `value_handle` into
    /// the link's frame channel
    async fn subscribe(&mut self, value_handle: u16) -> Result<(), LinkError> {
        let characteristic = self.characteristic(value_handle)?.clone();
        let tx = self.tx.clone();
        let (ready_tx, ready_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let stream = match characteristic.notify().await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(bluetooth_error(e)));
                    return;
                }
            };
            let mut stream = Box::pin(stream);
            while let Some(value) = stream.next().await {
                if tx.send(RawFrame::new(value_handle, value)).await.is_err() {
                    break;
                }
            }
            debug!("Notifications for 0x{:04x} ended", value_handle);
        });

        self.subscriptions.push(task);
        ready_rx.await.unwrap_or(Err(LinkError::Closed))
    }
}

#[async_trait]
impl GattLink for BluerLink {
    /// Writes go to the characteristic with that value handle. Writing
    /// `01 00` to the descriptor handle right after a characteristic
    /// subscribes to it instead, since BlueZ owns the descriptor itself.
    async fn write_characteristic(&mut self, handle: u16, value: &[u8]) -> Result<(), LinkError> {
        if let Some(characteristic) = self.characteristics.get(&handle) {
            return characteristic.write(value).await.map_err(bluetooth_error);
        }
        let data_handle = handle.wrapping_sub(1);
        if value == NOTIFY_ON && self.characteristics.contains_key(&data_handle) {
            return self.subscribe(data_handle).await;
        }
        Err(LinkError::UnknownHandle(handle))
    }

    async fn read_characteristic(&mut self, handle: u16) -> Result<Vec<u8>, LinkError> {
        self.characteristic(handle)?
            .read()
            .await
            .map_err(bluetooth_error)
    }

    async fn next_notification(&mut self, wait: Duration) -> Result<RawFrame, LinkError> {
        match timeout(wait, self.rx.recv()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(LinkError::Closed),
            Err(_) => Err(LinkError::Timeout(wait)),
        }
    }
}

impl Drop for BluerLink {
    fn drop(&mut self) {
        for task in &self.subscriptions {
            task.abort();
        }
        let device = self.device.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(e) = device.disconnect().await {
                    debug!("Disconnect of {} failed: {}", device.address(), e);
                }
            });
        }
    }
}
