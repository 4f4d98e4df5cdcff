//! Error types for multi-output.
//!
//! Errors are split into two categories:
//! - **Session errors** ([`RoutingError`]): returned from `start`/`stop` and the tone tester
//! - **Backend errors** ([`BackendError`]): raised by the platform layer when a device cannot
//!   be opened or driven. Per-sink backend errors are recovered inside the session and
//!   surface only as [`RoutingEvent::SinkSkipped`](crate::RoutingEvent::SinkSkipped).

use crate::device::DeviceId;

/// Errors returned by [`RoutingSession`](crate::RoutingSession) and
/// [`ToneTester`](crate::ToneTester).
#[derive(Debug, Clone, thiserror::Error)]
pub enum RoutingError {
    /// No source device was given, the id is empty, or no output device has that id.
    #[error("no source device selected")]
    NoSourceSelected,

    /// None of the sink configurations is enabled.
    #[error("no output devices selected - enable at least one output")]
    NoSinksSelected,

    /// The loopback capture on the source device could not be opened.
    #[error("failed to open capture on '{device_id}': {cause}")]
    CaptureOpenFailed {
        /// Source device that failed.
        device_id: DeviceId,
        /// Underlying backend failure.
        cause: BackendError,
    },

    /// A single output could not be opened. Recovered locally: the sink is dropped.
    #[error("failed to open output '{device_id}': {cause}")]
    SinkOpenFailed {
        /// Output device that failed.
        device_id: DeviceId,
        /// Underlying backend failure.
        cause: BackendError,
    },

    /// Every requested output failed to open or targeted the source device.
    #[error("no valid output devices could be opened")]
    NoValidOutputs,

    /// A device disappeared while the session was running.
    #[error("device '{device_id}' vanished during playback")]
    DeviceVanishedDuringRun {
        /// Device that reported the fault.
        device_id: DeviceId,
    },

    /// The operation is not valid in the session's current state.
    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the session was in.
        state: crate::SessionState,
    },

    /// Another session on the same backend is already running.
    #[error("another routing session is already running")]
    SessionAlreadyRunning,

    /// The controller thread is gone.
    #[error("session controller has shut down")]
    ControllerClosed,
}

/// Fieldless mirror of [`RoutingError`] for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`RoutingError::NoSourceSelected`].
    NoSourceSelected,
    /// See [`RoutingError::NoSinksSelected`].
    NoSinksSelected,
    /// See [`RoutingError::CaptureOpenFailed`].
    CaptureOpenFailed,
    /// See [`RoutingError::SinkOpenFailed`].
    SinkOpenFailed,
    /// See [`RoutingError::NoValidOutputs`].
    NoValidOutputs,
    /// See [`RoutingError::DeviceVanishedDuringRun`].
    DeviceVanishedDuringRun,
    /// See [`RoutingError::InvalidState`].
    InvalidState,
    /// See [`RoutingError::SessionAlreadyRunning`].
    SessionAlreadyRunning,
    /// See [`RoutingError::ControllerClosed`].
    ControllerClosed,
}

impl RoutingError {
    /// Returns the kind of this error without its payload.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoSourceSelected => ErrorKind::NoSourceSelected,
            Self::NoSinksSelected => ErrorKind::NoSinksSelected,
            Self::CaptureOpenFailed { .. } => ErrorKind::CaptureOpenFailed,
            Self::SinkOpenFailed { .. } => ErrorKind::SinkOpenFailed,
            Self::NoValidOutputs => ErrorKind::NoValidOutputs,
            Self::DeviceVanishedDuringRun { .. } => ErrorKind::DeviceVanishedDuringRun,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::SessionAlreadyRunning => ErrorKind::SessionAlreadyRunning,
            Self::ControllerClosed => ErrorKind::ControllerClosed,
        }
    }
}

/// Errors raised by an [`AudioBackend`](crate::backend::AudioBackend).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// No device with the given id exists (or it was unplugged).
    #[error("device not found: {id}")]
    DeviceNotFound {
        /// Id that was looked up.
        id: DeviceId,
    },

    /// The device cannot run the requested format.
    #[error("unsupported format: {format}")]
    UnsupportedFormat {
        /// Human-readable description of the rejected format.
        format: String,
    },

    /// The device is held exclusively by another client.
    #[error("device busy: {id}")]
    DeviceBusy {
        /// Busy device.
        id: DeviceId,
    },

    /// Any other failure from the underlying audio library.
    #[error("audio backend error: {0}")]
    Backend(String),
}

impl BackendError {
    /// Creates a generic backend error with the given message.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Creates a device-not-found error for the given id.
    pub fn not_found(id: impl Into<DeviceId>) -> Self {
        Self::DeviceNotFound { id: id.into() }
    }
}
