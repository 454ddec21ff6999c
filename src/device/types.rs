use uuid::Uuid;

/// The device picked by the scanning/pairing collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    id: String,
    address: String,
}

impl DeviceHandle {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        DeviceHandle { id: id.into(), address: address.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub service: Uuid,
    pub uuid: Uuid,
    pub notify: bool,
    /// Whether the characteristic exposes a Client Characteristic Configuration Descriptor
    pub has_cccd: bool,
}

/// Transport callbacks, delivered as messages to the session task.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    LinkChanged(LinkState),
    /// The device was not found or did not accept the connection
    ConnectFailed(String),
    ServicesDiscovered(Result<Vec<CharacteristicInfo>, String>),
    DescriptorWritten {
        characteristic: Uuid,
        result: Result<(), String>,
    },
    Notification {
        characteristic: Uuid,
        value: Vec<u8>,
    },
}
