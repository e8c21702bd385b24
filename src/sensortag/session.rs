/// Lifecycle of one SensorTag connection: connect, enable sensors, stream
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{DecodeError, LinkError, ProtocolError, SessionError};
use crate::models::{RawFrame, SensorReading};
use crate::sensortag::barometer::{decode_barometer_payload, BarometerCalibration};
use crate::sensortag::decode::{
    decode_accelerometer_payload, decode_gyroscope_payload, decode_humidity_payload,
    decode_magnetometer_payload, decode_temperature_payload,
};
use crate::sensortag::dispatcher::Dispatcher;
use crate::sensortag::handles::{
    self, SensorChannel, BAROMETER, BAROMETER_CALIBRATE, BAROMETER_CALIBRATION, NOTIFY_ON,
};
use crate::sensortag::link::{GattConnector, GattLink};
use crate::telemetry::{TelemetryEmitter, TelemetrySink};

pub type DecodeResult = Result<SensorReading, DecodeError>;

const DEFAULT_NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(4);
const DEFAULT_SINK_TIMEOUT: Duration = Duration::from_secs(5);

const DECODERS: [(SensorChannel, fn(&[u8]) -> DecodeResult); 5] = [
    (handles::TEMPERATURE, decode_temperature_payload),
    (handles::ACCELEROMETER, decode_accelerometer_payload),
    (handles::HUMIDITY, decode_humidity_payload),
    (handles::MAGNETOMETER, decode_magnetometer_payload),
    (handles::GYROSCOPE, decode_gyroscope_payload),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Streaming,
}

/// Cooperative stop signal, checked once per received frame
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub notification_timeout: Duration,
    /// Raw period register values (10 ms units), firmware default when unset
    pub accelerometer_period: Option<u8>,
    pub magnetometer_period: Option<u8>,
    /// Longest a snapshot write may hold up frame processing
    pub sink_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            notification_timeout: DEFAULT_NOTIFICATION_TIMEOUT,
            accelerometer_period: None,
            magnetometer_period: None,
            sink_timeout: DEFAULT_SINK_TIMEOUT,
        }
    }
}

pub struct Session<C: GattConnector> {
    connector: C,
    address: String,
    name: String,
    options: SessionOptions,
    emitter: TelemetryEmitter,
    stop: StopFlag,
    state: SessionState,
    streamed: bool,
    decode_errors: u64,
}

impl<C: GattConnector> Session<C> {
    pub fn new(
        connector: C,
        address: &str,
        name: &str,
        options: SessionOptions,
        sink: Arc<dyn TelemetrySink>,
        stop: StopFlag,
    ) -> Self {
        Self::with_emitter(
            connector,
            address,
            name,
            options,
            TelemetryEmitter::new(sink).with_write_timeout(options.sink_timeout),
            stop,
        )
    }

    pub fn with_emitter(
        connector: C,
        address: &str,
        name: &str,
        options: SessionOptions,
        emitter: TelemetryEmitter,
        stop: StopFlag,
    ) -> Self {
        Session {
            connector,
            address: address.to_string(),
            name: name.to_string(),
            options,
            emitter,
            stop,
            state: SessionState::Disconnected,
            streamed: false,
            decode_errors: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the most recent connection attempt got as far as streaming
    pub fn has_streamed(&self) -> bool {
        self.streamed
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.is_stopped()
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors
    }

    #[cfg(test)]
    pub fn emitter(&self) -> &TelemetryEmitter {
        &self.emitter
    }

    /// Connect, enable every sensor and stream until the link fails or a
    /// stop is requested. Always leaves the session Disconnected.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        let mut link = self.connect().await?;
        let mut dispatcher = self.enable_sensors(&mut link).await?;
        self.stream(&mut link, &mut dispatcher).await
    }

    pub async fn connect(&mut self) -> Result<C::Link, SessionError> {
        self.state = SessionState::Connecting;
        self.streamed = false;
        info!("Connecting to {} ({})", self.name, self.address);

        match self.connector.connect(&self.address).await {
            Ok(link) => {
                self.state = SessionState::Connected;
                info!("Connected to {} ({})", self.name, self.address);
                Ok(link)
            }
            Err(e) => {
                self.state = SessionState::Disconnected;
                Err(e.into())
            }
        }
    }

    /// Switch on every sensor and build the notification routing table.
    /// On success the session is Streaming; any failure leaves it
    /// Disconnected and is returned as is.
    pub async fn enable_sensors(
        &mut self,
        link: &mut C::Link,
    ) -> Result<Dispatcher<DecodeResult>, SessionError> {
        match self.configure(link).await {
            Ok(dispatcher) => {
                self.state = SessionState::Streaming;
                self.streamed = true;
                info!(
                    "Streaming {} sensors from {} ({})",
                    dispatcher.len(),
                    self.name,
                    self.address
                );
                Ok(dispatcher)
            }
            Err(e) => {
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn configure(
        &self,
        link: &mut C::Link,
    ) -> Result<Dispatcher<DecodeResult>, SessionError> {
        let mut dispatcher = Dispatcher::new();

        for (channel, decoder) in DECODERS {
            dispatcher.register(channel.data, decoder);
            enable_channel(link, &channel, self.period_for(&channel)).await?;
        }

        // The barometer callback needs calibration, so it is only registered
        // once the coefficients have been read and parsed.
        link.write_characteristic(BAROMETER.config, &BAROMETER_CALIBRATE)
            .await
            .map_err(setup_error)?;
        let raw = link
            .read_characteristic(BAROMETER_CALIBRATION)
            .await
            .map_err(setup_error)?;
        let calibration = BarometerCalibration::parse(&raw)?;
        debug!("Barometer calibration for {}: {:?}", self.address, calibration);

        dispatcher.register(BAROMETER.data, move |payload: &[u8]| {
            decode_barometer_payload(&calibration, payload)
        });
        enable_channel(link, &BAROMETER, None).await?;

        Ok(dispatcher)
    }

    fn period_for(&self, channel: &SensorChannel) -> Option<u8> {
        if channel.data == handles::ACCELEROMETER.data {
            self.options.accelerometer_period
        } else if channel.data == handles::MAGNETOMETER.data {
            self.options.magnetometer_period
        } else {
            None
        }
    }

    /// Receive and dispatch frames one at a time, in arrival order
    pub async fn stream(
        &mut self,
        link: &mut C::Link,
        dispatcher: &mut Dispatcher<DecodeResult>,
    ) -> Result<(), SessionError> {
        let result = loop {
            if self.stop.is_stopped() {
                info!("Stop requested, leaving {} ({})", self.name, self.address);
                break Ok(());
            }

            match link
                .next_notification(self.options.notification_timeout)
                .await
            {
                Ok(frame) => self.handle_frame(&frame, dispatcher).await,
                Err(e) => break Err(e.into()),
            }
        };

        self.state = SessionState::Disconnected;
        result
    }

    async fn handle_frame(
        &mut self,
        frame: &RawFrame,
        dispatcher: &mut Dispatcher<DecodeResult>,
    ) {
        match dispatcher.dispatch(frame) {
            None => debug!(
                "Dropping notification for unregistered handle 0x{:04x}",
                frame.handle
            ),
            Some(Err(e)) => {
                self.decode_errors += 1;
                warn!(
                    "Decode error on handle 0x{:04x} from {}: {}",
                    frame.handle, self.address, e
                );
            }
            Some(Ok(reading)) => {
                debug!("{} {}: {:?}", self.address, reading.sensor_name(), reading);
                if let Err(e) = self.emitter.on_reading(&self.address, reading).await {
                    warn!("Failed to emit record for {}: {}", self.address, e);
                }
            }
        }
    }
}

async fn enable_channel<L: GattLink>(
    link: &mut L,
    channel: &SensorChannel,
    period: Option<u8>,
) -> Result<(), SessionError> {
    debug!("Enabling {}", channel.name);
    link.write_characteristic(channel.config, channel.enable)
        .await
        .map_err(setup_error)?;
    if let (Some(handle), Some(value)) = (channel.period, period) {
        link.write_characteristic(handle, &[value])
            .await
            .map_err(setup_error)?;
    }
    link.write_characteristic(channel.notify, &NOTIFY_ON)
        .await
        .map_err(setup_error)?;
    Ok(())
}

/// A handle missing from the device's table means a firmware we do not
/// speak, not a flaky link
fn setup_error(error: LinkError) -> SessionError {
    match error {
        LinkError::UnknownHandle(handle) => ProtocolError::UnknownHandle(handle).into(),
        other => other.into(),
    }
}
