//! Status notifications for the surrounding application.
//!
//! Events are informational. None of them changes the result of the call
//! that produced it; they exist so a UI or log can show what happened.

use std::sync::Arc;

use crate::device::DeviceId;

/// Notifications emitted by [`RoutingSession`](crate::RoutingSession) and
/// [`ToneTester`](crate::ToneTester).
///
/// # Example
///
/// ```
/// use multi_output::RoutingEvent;
///
/// fn handle_event(event: RoutingEvent) {
///     match event {
///         RoutingEvent::SessionStarted { active_sinks } => {
///             eprintln!("Playing on {} device(s)", active_sinks);
///         }
///         RoutingEvent::SinkSkipped { device_id, reason } => {
///             eprintln!("Skipped {}: {}", device_id, reason);
///         }
///         other => eprintln!("{:?}", other),
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum RoutingEvent {
    /// The session reached `Running`.
    SessionStarted {
        /// Number of outputs actually playing.
        active_sinks: usize,
    },

    /// The session returned to `Idle`.
    SessionStopped,

    /// An output was left out of the session.
    SinkSkipped {
        /// Output that was skipped.
        device_id: DeviceId,
        /// Why it was skipped.
        reason: String,
    },

    /// A device reported that it is gone.
    DeviceVanished {
        /// Device that vanished.
        device_id: DeviceId,
    },

    /// An output discarded old audio because it fell behind.
    BufferOverflow {
        /// Output whose buffer overflowed.
        device_id: DeviceId,
        /// Bytes discarded since the previous report.
        dropped_bytes: u64,
    },

    /// A test tone finished.
    TonePlayed {
        /// Outputs that played the tone.
        played: usize,
        /// Outputs that were asked to.
        requested: usize,
    },
}

/// Callback type for receiving [`RoutingEvent`]s.
///
/// Callbacks may be invoked from the thread driving the session, never from
/// an audio thread.
pub type EventCallback = Arc<dyn Fn(RoutingEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use multi_output::{event_callback, RoutingEvent};
///
/// let callback = event_callback(|event| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(RoutingEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}
