use std::sync::{Arc, Mutex, MutexGuard};
use btleplug::api::{Central, CentralEvent, CharPropFlags, Manager as _, Peripheral as _, ScanFilter, ValueNotification};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::channel::mpsc::Sender;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration, Instant};
use uuid::Uuid;

use crate::device::constants::{make_cccd_uuid, CONNECT_DEADLINE, DISCONNECT_DEADLINE, DISCOVERY_DEADLINE, FIND_DEADLINE, FIND_POLL_DELAY, SUBSCRIBE_DEADLINE};
use crate::device::tasks::TransportTasks;
use crate::device::transport::Transport;
use crate::device::types::{CharacteristicInfo, DeviceHandle, LinkState, TransportEvent};
use crate::error::{ConnectionError, DeviceError};

type PeripheralSlot = Arc<Mutex<Option<Peripheral>>>;

fn lock_slot(slot: &PeripheralSlot) -> MutexGuard<'_, Option<Peripheral>> {
    // the slot only ever holds a cloneable handle, a panic while holding it can not corrupt it
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn send_event(events: &mut Sender<TransportEvent>, event: TransportEvent) -> bool {
    match events.send(event).await {
        Ok(_) => true,
        Err(err) => {
            debug!("Session is gone, dropping transport event: {}", err);
            false
        },
    }
}

async fn list_adapters(manager: &Manager) -> Result<Vec<Adapter>, DeviceError> {
    Ok(manager.adapters().await?)
}

async fn match_peripheral(adapters: &[Adapter], address: &str) -> Option<(Adapter, Peripheral)> {
    for adapter in adapters {
        let peripherals = match adapter.peripherals().await {
            Ok(v) => v,
            Err(err) => {
                warn!("Failed to query BLE adapter for peripherals: {}", err);
                continue;
            },
        };

        for peripheral in peripherals {
            match peripheral.properties().await {
                Err(err) => {
                    warn!("Could not query peripheral for properties: {:?}", err);
                },
                Ok(None) => {
                    debug!("Peripheral has no properties");
                },
                Ok(Some(properties)) => {
                    if properties.address.to_string().eq_ignore_ascii_case(address) {
                        info!(
                            "Using peripheral {} {:?} {}",
                            properties.address,
                            properties.address_type,
                            properties.local_name.unwrap_or(String::from("NONE")),
                        );
                        return Some((adapter.clone(), peripheral));
                    }
                },
            }
        }
    }

    None
}

async fn find_peripheral(adapters: &[Adapter], address: &str) -> Result<(Adapter, Peripheral), DeviceError> {
    for adapter in adapters {
        // the peripheral might already be known from the scanning screen, so keep going on errors
        if let Err(err) = adapter.start_scan(ScanFilter::default()).await {
            warn!("Failed to start scanning: {}", err);
        }
    }

    let deadline = Instant::now() + Duration::from_millis(FIND_DEADLINE);
    let found = loop {
        if let Some(found) = match_peripheral(adapters, address).await {
            break Some(found);
        }
        if Instant::now() >= deadline {
            break None;
        }
        sleep(Duration::from_millis(FIND_POLL_DELAY)).await;
    };

    for adapter in adapters {
        adapter.stop_scan().await.ok();
    }

    found.ok_or(DeviceError::MissingPeripheral)
}

async fn connect_peripheral(adapters: &[Adapter], address: &str) -> Result<(Adapter, Peripheral), DeviceError> {
    let (adapter, peripheral) = find_peripheral(adapters, address).await?;

    info!("Connecting to peripheral...");
    timeout(Duration::from_millis(CONNECT_DEADLINE), peripheral.connect())
        .await
        .map_err(|_| DeviceError::Timeout)??;

    Ok((adapter, peripheral))
}

async fn discover_characteristics(peripheral: Option<Peripheral>) -> Result<Vec<CharacteristicInfo>, DeviceError> {
    let peripheral = peripheral.ok_or(DeviceError::MissingPeripheral)?;

    timeout(Duration::from_millis(DISCOVERY_DEADLINE), peripheral.discover_services())
        .await
        .map_err(|_| DeviceError::Timeout)??;

    let cccd_uuid = make_cccd_uuid();
    let mut characteristics = Vec::new();

    for service in peripheral.services() {
        debug!("Service UUID: {}", service.uuid);

        for characteristic in &service.characteristics {
            debug!("Characteristic UUID: {} {:?}", characteristic.uuid, characteristic.properties);

            characteristics.push(CharacteristicInfo {
                service: service.uuid,
                uuid: characteristic.uuid,
                notify: characteristic.properties.contains(CharPropFlags::NOTIFY),
                has_cccd: characteristic.descriptors.iter().any(|descriptor| descriptor.uuid == cccd_uuid),
            });
        }
    }

    Ok(characteristics)
}

// subscribe() enables notification delivery and writes the CCCD
async fn subscribe_characteristic(peripheral: &Peripheral, service: Uuid, uuid: Uuid) -> Result<(), DeviceError> {
    let characteristic = peripheral.characteristics()
        .into_iter()
        .find(|characteristic| characteristic.service_uuid == service && characteristic.uuid == uuid)
        .ok_or(DeviceError::MissingCharacteristic)?;

    timeout(Duration::from_millis(SUBSCRIBE_DEADLINE), peripheral.subscribe(&characteristic))
        .await
        .map_err(|_| DeviceError::Timeout)??;

    Ok(())
}

async fn disconnect_peripheral(peripheral: Peripheral) {
    info!("Disconnecting peripheral");
    match timeout(Duration::from_millis(DISCONNECT_DEADLINE), peripheral.disconnect()).await {
        Ok(Ok(())) => info!("Peripheral disconnected"),
        Ok(Err(err)) => warn!("Failed to disconnect peripheral: {}", err),
        Err(_) => warn!("Disconnecting peripheral took too long"),
    }
}

fn read_notifications_task(
    tasks: &TransportTasks,
    mut notification_stream: BoxStream<'static, ValueNotification>,
    mut events: Sender<TransportEvent>,
) -> JoinHandle<()> {
    let cancel = tasks.cancel_token();
    tasks.spawn(async move {
        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                data = notification_stream.next() => match data {
                    Some(data) => {
                        let event = TransportEvent::Notification { characteristic: data.uuid, value: data.value };
                        if !send_event(&mut events, event).await {
                            break 'mainloop;
                        }
                    },
                    None => {
                        debug!("Notification stream ended");
                        break 'mainloop;
                    },
                },
            }
        }
    })
}

fn watch_disconnect_task(
    tasks: &TransportTasks,
    adapter: Adapter,
    peripheral_id: PeripheralId,
    mut events: Sender<TransportEvent>,
) -> JoinHandle<()> {
    let cancel = tasks.cancel_token();
    tasks.spawn(async move {
        let mut central_events = match adapter.events().await {
            Ok(stream) => stream,
            Err(err) => {
                warn!("Could not subscribe to adapter events: {}", err);
                return;
            },
        };

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                event = central_events.next() => match event {
                    Some(CentralEvent::DeviceDisconnected(id)) if id == peripheral_id => {
                        info!("Peripheral disconnected");
                        send_event(&mut events, TransportEvent::LinkChanged(LinkState::Disconnected)).await;
                        break 'mainloop;
                    },
                    Some(_) => {},
                    None => break 'mainloop,
                },
            }
        }
    })
}

/// [`Transport`] backed by btleplug. Every request runs on its own tokio task and reports back
/// through the events channel.
pub struct BtleTransport {
    // adapters stay valid only as long as the manager lives
    _manager: Manager,
    adapters: Vec<Adapter>,
    events: Sender<TransportEvent>,
    peripheral: PeripheralSlot,
    tasks: TransportTasks,
}

impl BtleTransport {
    pub async fn open(events: Sender<TransportEvent>) -> Result<Self, ConnectionError> {
        let to_connection_error = |err: DeviceError| {
            warn!("Bluetooth is not available: {}", err);
            if err.is_permission_denied() { ConnectionError::PermissionDenied } else { ConnectionError::NoAdapter }
        };

        let manager = Manager::new().await.map_err(|err| to_connection_error(err.into()))?;
        let adapters = list_adapters(&manager).await.map_err(to_connection_error)?;

        if adapters.is_empty() {
            warn!("No bluetooth adapters found");
            return Err(ConnectionError::NoAdapter);
        }

        for adapter in &adapters {
            info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
        }

        Ok(BtleTransport {
            _manager: manager,
            adapters,
            events,
            peripheral: Arc::new(Mutex::new(None)),
            tasks: TransportTasks::new(),
        })
    }

    /// Joins every request and cleanup task once the transport is released. Await it before the
    /// runtime shuts down, otherwise the final disconnect may never reach the device.
    pub fn tasks(&self) -> TransportTasks {
        self.tasks.clone()
    }

    fn current_peripheral(&self) -> Option<Peripheral> {
        lock_slot(&self.peripheral).clone()
    }
}

impl Transport for BtleTransport {
    fn request_connect(&mut self, device: &DeviceHandle) -> Result<(), ConnectionError> {
        if self.adapters.is_empty() {
            return Err(ConnectionError::NoAdapter);
        }

        let adapters = self.adapters.clone();
        let address = device.address().to_string();
        let slot = self.peripheral.clone();
        let mut events = self.events.clone();
        let tasks = self.tasks.clone();
        let cancel = self.tasks.cancel_token();

        self.tasks.spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    // released while connecting, the link may already be up
                    for adapter in &adapters {
                        adapter.stop_scan().await.ok();
                    }
                    if let Some((_, peripheral)) = match_peripheral(&adapters, &address).await {
                        if peripheral.is_connected().await.unwrap_or(false) {
                            disconnect_peripheral(peripheral).await;
                        }
                    }
                    return;
                },
                result = connect_peripheral(&adapters, &address) => result,
            };

            match result {
                Ok((adapter, peripheral)) => {
                    if cancel.is_cancelled() {
                        disconnect_peripheral(peripheral).await;
                        return;
                    }

                    *lock_slot(&slot) = Some(peripheral.clone());
                    watch_disconnect_task(&tasks, adapter, peripheral.id(), events.clone());
                    send_event(&mut events, TransportEvent::LinkChanged(LinkState::Connected)).await;
                },
                Err(err) => {
                    warn!("Connecting to peripheral failed: {}", err);
                    send_event(&mut events, TransportEvent::ConnectFailed(err.to_string())).await;
                },
            }
        });

        Ok(())
    }

    fn request_discovery(&mut self) {
        let peripheral = self.current_peripheral();
        let mut events = self.events.clone();
        let cancel = self.tasks.cancel_token();

        self.tasks.spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = discover_characteristics(peripheral) => result,
            };

            send_event(&mut events, TransportEvent::ServicesDiscovered(result.map_err(|err| err.to_string()))).await;
        });
    }

    fn request_subscribe(&mut self, characteristics: &[CharacteristicInfo]) {
        let wanted: Vec<(Uuid, Uuid)> = characteristics.iter().map(|c| (c.service, c.uuid)).collect();
        let peripheral = self.current_peripheral();
        let mut events = self.events.clone();
        let tasks = self.tasks.clone();

        self.tasks.spawn(async move {
            // open the notification stream before subscribing so that early notifications are kept
            let opened = match peripheral {
                Some(peripheral) => match peripheral.notifications().await {
                    Ok(stream) => Ok((peripheral, stream)),
                    Err(err) => Err(DeviceError::from(err).to_string()),
                },
                None => Err(DeviceError::MissingPeripheral.to_string()),
            };

            let (peripheral, notification_stream) = match opened {
                Ok(opened) => opened,
                Err(err) => {
                    warn!("Could not open notification stream: {}", err);
                    for (_, uuid) in wanted {
                        let event = TransportEvent::DescriptorWritten { characteristic: uuid, result: Err(err.clone()) };
                        send_event(&mut events, event).await;
                    }
                    return;
                },
            };

            read_notifications_task(&tasks, notification_stream, events.clone());

            for (service, uuid) in wanted {
                if tasks.is_cancelled() {
                    return;
                }

                let result = subscribe_characteristic(&peripheral, service, uuid).await.map_err(|err| err.to_string());
                let event = TransportEvent::DescriptorWritten { characteristic: uuid, result };
                if !send_event(&mut events, event).await {
                    return;
                }
            }
        });
    }

    fn release(&mut self) {
        if let Some(peripheral) = lock_slot(&self.peripheral).take() {
            self.tasks.spawn(disconnect_peripheral(peripheral));
        }
        self.tasks.close();
    }
}
