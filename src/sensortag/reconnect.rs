/// Reconnect loop around a session with bounded exponential backoff
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::SessionError;
use crate::sensortag::link::GattConnector;
use crate::sensortag::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Consecutive failed attempts before giving up; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay after `failures` consecutive failures (counting from 1), or
    /// `None` once the attempt budget is spent.
    pub fn delay_for(&self, failures: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if failures >= max {
                return None;
            }
        }
        let exponent = failures.saturating_sub(1).min(31);
        let delay = self.initial_backoff.saturating_mul(1u32 << exponent);
        Some(delay.min(self.max_backoff))
    }
}

/// Keep a session running until a stop is requested or `policy` gives up.
///
/// A connection that reached streaming counts as progress, so the failure
/// count starts over after it drops.
pub async fn supervise<C: GattConnector>(
    session: &mut Session<C>,
    policy: &ReconnectPolicy,
) -> Result<(), SessionError> {
    let mut failures = 0u32;

    loop {
        if session.stop_requested() {
            return Ok(());
        }

        info!("[Re]starting session for {} ({})", session.name(), session.address());
        let error = match session.run().await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        debug!("Session for {} ended {:?}", session.address(), session.state());
        if session.has_streamed() {
            failures = 0;
        }
        if session.decode_errors() > 0 {
            warn!(
                "{} frames from {} could not be decoded so far",
                session.decode_errors(),
                session.address()
            );
        }
        failures += 1;

        match &error {
            SessionError::Transport(e) if e.is_timeout() => {
                warn!("{} went quiet: {}", session.address(), e)
            }
            e => error!("Session for {} failed: {}", session.address(), e),
        }

        let Some(delay) = policy.delay_for(failures) else {
            error!(
                "Giving up on {} after {} consecutive failures",
                session.address(),
                failures
            );
            return Err(error);
        };

        info!("Reconnecting to {} in {:?}", session.address(), delay);
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkError;
    use crate::sensortag::handles::BAROMETER_CALIBRATION;
    use crate::sensortag::session::{SessionOptions, StopFlag};
    use crate::testing::{RecordingSink, ScriptedConnector, ScriptedLink};
    use std::sync::Arc;

    fn policy(max_attempts: Option<u32>) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            max_attempts,
        }
    }

    fn connect_error() -> LinkError {
        LinkError::Connect {
            address: "AA".into(),
            reason: "page timeout".into(),
        }
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(500)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_millis(1000)));
        assert_eq!(policy.delay_for(4), Some(Duration::from_millis(4000)));
        assert_eq!(policy.delay_for(7), Some(Duration::from_secs(30)));
        assert_eq!(policy.delay_for(1000), Some(Duration::from_secs(30)));
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let policy = policy(Some(3));
        assert!(policy.delay_for(2).is_some());
        assert_eq!(policy.delay_for(3), None);
    }

    #[tokio::test]
    async fn reconnects_until_policy_gives_up() {
        let streaming = ScriptedLink::new()
            .with_read(
                BAROMETER_CALIBRATION,
                &[
                    0x4F, 0xB1, 0xA8, 0x65, 0x94, 0xB6, 0x1E, 0x32, 0x2C, 0x06, 0x90, 0x7B, 0x02,
                    0xF0, 0xD9, 0x0C,
                ],
            )
            .with_notification(0x4B, &[0x2C, 0x6A, 0x4E, 0x6B]);
        let sink = Arc::new(RecordingSink::new());
        let mut session = Session::new(
            ScriptedConnector::new(vec![Err(connect_error()), Ok(streaming)]),
            "AA",
            "porch",
            SessionOptions::default(),
            sink.clone(),
            StopFlag::new(),
        );

        let result = supervise(&mut session, &policy(Some(2))).await;

        // fail, stream then time out, fail again and give up
        assert!(matches!(
            result,
            Err(SessionError::Transport(LinkError::Connect { .. }))
        ));
        assert_eq!(sink.records().len(), 1);
    }

    #[tokio::test]
    async fn returns_when_stopped() {
        let stop = StopFlag::new();
        let mut session = Session::new(
            ScriptedConnector::new(vec![]),
            "AA",
            "porch",
            SessionOptions::default(),
            Arc::new(RecordingSink::new()),
            stop.clone(),
        );

        stop.request_stop();
        assert!(supervise(&mut session, &policy(None)).await.is_ok());
    }
}
