use std::collections::HashSet;
use log::{debug, info, warn};
use uuid::Uuid;

use crate::device::transport::Transport;
use crate::device::types::{CharacteristicInfo, DeviceHandle, LinkState, TransportEvent};
use crate::error::ConnectionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    ServiceDiscovery,
    SubscribingNotifications,
    Ready,
    Disconnecting,
}

/// What the session has to act on after a transport event.
#[derive(Debug, Clone, PartialEq)]
pub enum MachineOutput {
    Nothing,
    /// Every notifying characteristic is subscribed
    Ready,
    /// Payload of a notification received while ready
    Notification(Vec<u8>),
    /// The session is over, the transport has been released
    Failed(ConnectionError),
}

pub struct ConnectionStateMachine<T: Transport> {
    transport: T,
    state: ConnectionState,
    device: Option<DeviceHandle>,
    pending_descriptors: HashSet<Uuid>,
}

impl<T: Transport> ConnectionStateMachine<T> {
    pub fn new(transport: T) -> Self {
        ConnectionStateMachine {
            transport,
            state: ConnectionState::Disconnected,
            device: None,
            pending_descriptors: HashSet::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn device(&self) -> Option<&DeviceHandle> {
        self.device.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            info!("Connection state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    pub fn connect(&mut self, device: DeviceHandle) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Disconnected {
            warn!("Ignoring connect to {} while {:?}", device.address(), self.state);
            return Ok(());
        }

        info!("Connecting to {} ({})", device.address(), device.id());
        self.transport.request_connect(&device)?;
        self.device = Some(device);
        self.set_state(ConnectionState::Connecting);
        Ok(())
    }

    pub fn handle_event(&mut self, event: TransportEvent) -> MachineOutput {
        match (self.state, event) {
            (ConnectionState::Disconnected, event) => {
                debug!("Ignoring {:?}, not connected", event);
                MachineOutput::Nothing
            },
            (ConnectionState::Connecting, TransportEvent::LinkChanged(LinkState::Connected)) => {
                info!("Connected; Discovering services...");
                self.set_state(ConnectionState::ServiceDiscovery);
                self.transport.request_discovery();
                MachineOutput::Nothing
            },
            (ConnectionState::Connecting, TransportEvent::ConnectFailed(err)) => {
                warn!("Could not connect: {}", err);
                self.fail(ConnectionError::ConnectFailed)
            },
            (_, TransportEvent::LinkChanged(LinkState::Disconnected)) => {
                warn!("Device disconnected while {:?}", self.state);
                self.fail(ConnectionError::LinkLost)
            },
            (ConnectionState::ServiceDiscovery, TransportEvent::ServicesDiscovered(Ok(characteristics))) => {
                self.subscribe(characteristics)
            },
            (ConnectionState::ServiceDiscovery, TransportEvent::ServicesDiscovered(Err(err))) => {
                warn!("Service discovery failed: {}", err);
                self.fail(ConnectionError::DiscoveryFailed)
            },
            (ConnectionState::SubscribingNotifications, TransportEvent::DescriptorWritten { characteristic, result: Ok(()) }) => {
                if !self.pending_descriptors.remove(&characteristic) {
                    debug!("Descriptor write for unexpected characteristic {}", characteristic);
                }

                if self.pending_descriptors.is_empty() {
                    info!("Notifications enabled; Peripheral ready");
                    self.set_state(ConnectionState::Ready);
                    return MachineOutput::Ready;
                }
                MachineOutput::Nothing
            },
            (ConnectionState::SubscribingNotifications, TransportEvent::DescriptorWritten { characteristic, result: Err(err) }) => {
                warn!("Failed to enable notifications on {}: {}", characteristic, err);
                self.fail(ConnectionError::SubscriptionFailed)
            },
            (ConnectionState::Ready, TransportEvent::Notification { value, .. }) => {
                MachineOutput::Notification(value)
            },
            (state, TransportEvent::Notification { characteristic, .. }) => {
                debug!("Dropping notification from {} while {:?}", characteristic, state);
                MachineOutput::Nothing
            },
            (state, event) => {
                debug!("Ignoring unexpected {:?} while {:?}", event, state);
                MachineOutput::Nothing
            },
        }
    }

    fn subscribe(&mut self, characteristics: Vec<CharacteristicInfo>) -> MachineOutput {
        let notifying: Vec<CharacteristicInfo> = characteristics
            .into_iter()
            .filter(|characteristic| characteristic.notify)
            .collect();

        if notifying.is_empty() {
            warn!("No characteristic supports notifications");
            return self.fail(ConnectionError::SubscriptionFailed);
        }

        for characteristic in &notifying {
            info!("Subscribing to characteristic {} {}", characteristic.service, characteristic.uuid);
            if !characteristic.has_cccd {
                debug!("Characteristic {} does not list a configuration descriptor", characteristic.uuid);
            }
            self.pending_descriptors.insert(characteristic.uuid);
        }

        self.set_state(ConnectionState::SubscribingNotifications);
        self.transport.request_subscribe(&notifying);
        MachineOutput::Nothing
    }

    fn fail(&mut self, err: ConnectionError) -> MachineOutput {
        warn!("Ending session: {}", err);
        self.shutdown();
        MachineOutput::Failed(err)
    }

    fn shutdown(&mut self) {
        self.set_state(ConnectionState::Disconnecting);
        self.transport.release();
        self.pending_descriptors.clear();
        self.device = None;
        self.set_state(ConnectionState::Disconnected);
    }

    /// Release the transport from any state. Returns false if there was nothing to tear down.
    pub fn teardown(&mut self) -> bool {
        if self.state == ConnectionState::Disconnected {
            return false;
        }

        info!("Tearing down connection");
        self.shutdown();
        true
    }
}
