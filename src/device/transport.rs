use crate::error::TransportError;

/// The byte stream carrying BGAPI packets to the dongle. Incoming packets are delivered the other
/// way, by the owner of the transport calling `EventRouter::dispatch_packet` in arrival order.
pub trait Transport: Send + Sync {
    fn send_command(&self, command: &[u8]) -> Result<(), TransportError>;
}
