use uuid::Uuid;

/**
 * How long (milliseconds) to look for the selected device before giving up.
 */
pub const FIND_DEADLINE: u64 = 10_000;

/**
 * How often (milliseconds) to poll the adapters for the selected device.
 */
pub const FIND_POLL_DELAY: u64 = 250;

/**
 * How long (milliseconds) connecting to the peripheral may take.
 */
pub const CONNECT_DEADLINE: u64 = 10_000;

/**
 * How long (milliseconds) disconnecting may take during teardown.
 */
pub const DISCONNECT_DEADLINE: u64 = 5000;

/**
 * How long (milliseconds) service discovery may take.
 */
pub const DISCOVERY_DEADLINE: u64 = 15_000;

/**
 * How long (milliseconds) enabling notifications on one characteristic may take.
 */
pub const SUBSCRIBE_DEADLINE: u64 = 2000;

/**
 * Capacity of the channels between the transport, the timers and the session task.
 */
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/**
 * The UUID of the Client Characteristic Configuration Descriptor. btleplug writes the
 * "enable notifications" value (0x0001) to it when subscribing.
 */
pub const CLIENT_CHARACTERISTIC_CONFIGURATION: &str = "00002902-0000-1000-8000-00805f9b34fb";

pub fn make_cccd_uuid() -> Uuid {
    Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cccd_uuid() {
        assert_eq!(make_cccd_uuid().to_string(), CLIENT_CHARACTERISTIC_CONFIGURATION);
    }
}
