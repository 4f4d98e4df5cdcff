//! Command interface to a [`RoutingSession`] living on its own thread.

use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot};

use crate::backend::AudioBackend;
use crate::config::{RoutingConfig, SinkConfiguration};
use crate::device::DeviceId;
use crate::error::RoutingError;
use crate::event::EventCallback;
use crate::session::{RoutingSession, SessionStats, SessionStatus};

/// Bounded command queue depth.
const COMMAND_CAPACITY: usize = 16;

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Start {
        source: Option<DeviceId>,
        sinks: Vec<SinkConfiguration>,
        reply: Reply<Result<(), RoutingError>>,
    },
    Stop {
        reply: Reply<Result<(), RoutingError>>,
    },
    Status {
        reply: Reply<SessionStatus>,
    },
    Stats {
        reply: Reply<SessionStats>,
    },
    CheckHealth {
        reply: Reply<Result<(), RoutingError>>,
    },
}

/// Opaque handle to a routing session.
///
/// The session and its device handles stay on a dedicated thread; callers
/// only send commands and receive replies. Commands run one at a time in
/// arrival order, so start and stop never overlap.
///
/// Dropping the controller stops the session and joins the thread.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use multi_output::backend::MockBackend;
/// use multi_output::{ChannelMixMode, DeviceId, RoutingConfig, SessionController, SinkConfiguration};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mock = MockBackend::with_devices(&["speakers", "headphones"]);
/// let controller = SessionController::spawn(Arc::new(mock), RoutingConfig::default(), None)?;
///
/// let sinks = vec![SinkConfiguration::new("headphones", ChannelMixMode::Stereo)];
/// controller.start(Some(DeviceId::new("speakers")), sinks).await?;
/// assert_eq!(controller.status().await?.active_sinks, 1);
///
/// controller.stop().await?;
/// controller.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct SessionController {
    tx: Option<mpsc::Sender<Command>>,
    thread: Option<JoinHandle<()>>,
}

impl SessionController {
    /// Spawns the session thread.
    pub fn spawn(
        backend: Arc<dyn AudioBackend>,
        config: RoutingConfig,
        event_callback: Option<EventCallback>,
    ) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);

        let thread = std::thread::Builder::new()
            .name("multi-output-session".to_string())
            .spawn(move || {
                let mut session = RoutingSession::new(backend, config);
                if let Some(callback) = event_callback {
                    session = session.with_event_callback(callback);
                }
                run(session, rx);
            })?;

        Ok(Self {
            tx: Some(tx),
            thread: Some(thread),
        })
    }

    /// Starts routing. See [`RoutingSession::start`].
    pub async fn start(
        &self,
        source: Option<DeviceId>,
        sinks: Vec<SinkConfiguration>,
    ) -> Result<(), RoutingError> {
        self.request(|reply| Command::Start {
            source,
            sinks,
            reply,
        })
        .await?
    }

    /// Stops routing. See [`RoutingSession::stop`].
    pub async fn stop(&self) -> Result<(), RoutingError> {
        self.request(|reply| Command::Stop { reply }).await?
    }

    /// Returns the session status.
    pub async fn status(&self) -> Result<SessionStatus, RoutingError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Returns the session counters.
    pub async fn stats(&self) -> Result<SessionStats, RoutingError> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Runs a health check. See [`RoutingSession::check_health`].
    pub async fn check_health(&self) -> Result<(), RoutingError> {
        self.request(|reply| Command::CheckHealth { reply }).await?
    }

    /// Blocking [`start`](Self::start). Must not be called from async code.
    pub fn start_blocking(
        &self,
        source: Option<DeviceId>,
        sinks: Vec<SinkConfiguration>,
    ) -> Result<(), RoutingError> {
        self.request_blocking(|reply| Command::Start {
            source,
            sinks,
            reply,
        })?
    }

    /// Blocking [`stop`](Self::stop). Must not be called from async code.
    pub fn stop_blocking(&self) -> Result<(), RoutingError> {
        self.request_blocking(|reply| Command::Stop { reply })?
    }

    /// Blocking [`status`](Self::status). Must not be called from async code.
    pub fn status_blocking(&self) -> Result<SessionStatus, RoutingError> {
        self.request_blocking(|reply| Command::Status { reply })
    }

    /// Stops the session and joins its thread.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn sender(&self) -> Result<&mpsc::Sender<Command>, RoutingError> {
        self.tx.as_ref().ok_or(RoutingError::ControllerClosed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, RoutingError> {
        let (reply, rx) = oneshot::channel();
        self.sender()?
            .send(make(reply))
            .await
            .map_err(|_| RoutingError::ControllerClosed)?;
        rx.await.map_err(|_| RoutingError::ControllerClosed)
    }

    fn request_blocking<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, RoutingError> {
        let (reply, rx) = oneshot::channel();
        self.sender()?
            .blocking_send(make(reply))
            .map_err(|_| RoutingError::ControllerClosed)?;
        rx.blocking_recv().map_err(|_| RoutingError::ControllerClosed)
    }

    fn close(&mut self) {
        // Closing the channel ends the command loop
        self.tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("session thread panicked");
            }
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("open", &self.tx.is_some())
            .finish()
    }
}

fn run(mut session: RoutingSession, mut rx: mpsc::Receiver<Command>) {
    while let Some(command) = rx.blocking_recv() {
        // A dropped reply receiver means the caller went away
        match command {
            Command::Start {
                source,
                sinks,
                reply,
            } => {
                let _ = reply.send(session.start(source.as_ref(), &sinks));
            }
            Command::Stop { reply } => {
                let _ = reply.send(session.stop());
            }
            Command::Status { reply } => {
                let _ = reply.send(session.status());
            }
            Command::Stats { reply } => {
                let _ = reply.send(session.stats());
            }
            Command::CheckHealth { reply } => {
                let _ = reply.send(session.check_health());
            }
        }
    }

    let _ = session.stop();
    tracing::debug!("session controller exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DeviceFault, MockBackend};
    use crate::error::ErrorKind;
    use crate::mixer::ChannelMixMode;
    use crate::session::SessionState;

    fn spawn(mock: &MockBackend) -> SessionController {
        SessionController::spawn(Arc::new(mock.clone()), RoutingConfig::default(), None).unwrap()
    }

    #[tokio::test]
    async fn test_start_status_stop() {
        let mock = MockBackend::with_devices(&["a", "b", "c"]);
        let controller = spawn(&mock);

        let sinks = vec![
            SinkConfiguration::new("b", ChannelMixMode::Stereo),
            SinkConfiguration::new("c", ChannelMixMode::Subwoofer),
        ];
        controller
            .start(Some(DeviceId::new("a")), sinks)
            .await
            .unwrap();

        let status = controller.status().await.unwrap();
        assert_eq!(status.state, SessionState::Running);
        assert_eq!(status.active_sinks, 2);

        controller.stop().await.unwrap();
        assert_eq!(controller.status().await.unwrap().state, SessionState::Idle);
        assert!(!mock.is_capturing("a"));
    }

    #[tokio::test]
    async fn test_errors_cross_the_thread() {
        let mock = MockBackend::with_devices(&["a"]);
        let controller = spawn(&mock);

        let err = controller.start(Some(DeviceId::new("a")), vec![]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoSinksSelected);
        assert_eq!(
            controller.status().await.unwrap().last_error,
            Some(ErrorKind::NoSinksSelected)
        );
    }

    #[tokio::test]
    async fn test_check_health_stops_on_vanished_device() {
        let mock = MockBackend::with_devices(&["a", "b"]);
        let controller = spawn(&mock);
        controller
            .start(
                Some(DeviceId::new("a")),
                vec![SinkConfiguration::new("b", ChannelMixMode::Stereo)],
            )
            .await
            .unwrap();

        controller.check_health().await.unwrap();
        mock.inject_fault("b", &DeviceFault::Vanished);

        let err = controller.check_health().await.unwrap_err();
        assert!(matches!(
            err,
            RoutingError::DeviceVanishedDuringRun { ref device_id } if device_id.as_str() == "b"
        ));
        assert_eq!(controller.status().await.unwrap().state, SessionState::Idle);
    }

    #[test]
    fn test_blocking_api_and_drop_stops_session() {
        let mock = MockBackend::with_devices(&["a", "b"]);
        let controller = spawn(&mock);

        controller
            .start_blocking(
                Some(DeviceId::new("a")),
                vec![SinkConfiguration::new("b", ChannelMixMode::Left)],
            )
            .unwrap();
        assert_eq!(controller.status_blocking().unwrap().active_sinks, 1);
        assert!(mock.is_capturing("a"));

        drop(controller);
        assert!(!mock.is_capturing("a"));
        assert_eq!(mock.active_renders("b"), 0);
    }
}
