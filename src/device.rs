//! Device identity types.

use std::sync::Arc;

/// Opaque identifier for an audio endpoint.
///
/// `DeviceId` uses `Arc<str>` internally so it can be cloned into audio
/// callbacks and events without allocating.
///
/// # Example
///
/// ```
/// use multi_output::DeviceId;
///
/// let speakers = DeviceId::new("Speakers");
/// assert_eq!(speakers, DeviceId::from("Speakers"));
/// assert_ne!(speakers, DeviceId::new("Headphones"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(Arc<str>);

impl DeviceId {
    /// Creates a new device id from a string.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the empty id, which never names a device.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&DeviceId> for DeviceId {
    fn from(id: &DeviceId) -> Self {
        id.clone()
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// An enumerated output endpoint.
///
/// Identity is the `id` alone: two descriptors with the same id and
/// different display names compare equal.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    /// Stable identifier used for opening the device.
    pub id: DeviceId,
    /// Name shown to the user.
    pub display_name: String,
}

impl DeviceDescriptor {
    /// Creates a descriptor.
    pub fn new(id: impl Into<DeviceId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

impl PartialEq for DeviceDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DeviceDescriptor {}

impl std::hash::Hash for DeviceDescriptor {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Looks up a descriptor by id.
pub fn resolve_device<'a>(
    devices: &'a [DeviceDescriptor],
    id: &DeviceId,
) -> Option<&'a DeviceDescriptor> {
    devices.iter().find(|d| &d.id == id)
}
