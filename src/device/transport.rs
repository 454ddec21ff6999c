use crate::device::types::{CharacteristicInfo, DeviceHandle};
use crate::error::ConnectionError;

/// Non-blocking requests to the wireless stack.
///
/// Each request returns immediately. Its outcome arrives later as a
/// [`TransportEvent`](crate::device::types::TransportEvent) on the channel the transport was
/// created with:
/// - `request_connect` → `LinkChanged`
/// - `request_discovery` → `ServicesDiscovered`
/// - `request_subscribe` → one `DescriptorWritten` per characteristic, then `Notification`s
pub trait Transport {
    /// Fails right away if there is no adapter or no permission to use it.
    fn request_connect(&mut self, device: &DeviceHandle) -> Result<(), ConnectionError>;

    fn request_discovery(&mut self);

    fn request_subscribe(&mut self, characteristics: &[CharacteristicInfo]);

    /// Stop all outstanding work and disconnect. No events are sent after this returns.
    fn release(&mut self);
}
