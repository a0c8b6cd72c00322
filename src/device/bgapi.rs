//! BGAPI packet framing for the BLED112 dongle.
//!
//! Every packet starts with a four byte header:
//!
//! ```text
//! [0] : bit 7 message type (0 = command/response, 1 = event)
//!       bits 3-6 technology type (0 = Bluetooth Smart)
//!       bits 0-2 payload length, high bits
//! [1] : payload length, low byte
//! [2] : command class
//! [3] : command/event id
//! ```
//!
//! Multi-byte integers are little-endian, byte arrays are prefixed with a one byte length.

use uuid::Uuid;

use crate::device::types::{ConnectionHandle, DeviceAddress, TransportEvent};
use crate::error::FrameError;

pub const HEADER_LEN: usize = 4;
const EVENT_FLAG: u8 = 0x80;
const MAX_PAYLOAD_LEN: usize = 0x07FF;

/// Longest byte array a packet can carry: the length prefix is a single byte.
pub const MAX_ARRAY_LEN: usize = 0xFF;

const CLASS_SYSTEM: u8 = 0;
const CLASS_CONNECTION: u8 = 3;
const CLASS_ATTCLIENT: u8 = 4;
const CLASS_GAP: u8 = 6;

/// Discover every advertising device, not only limited discoverable ones.
pub const DISCOVER_GENERIC: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SystemReset { boot_in_dfu: bool },
    SystemHello,
    SystemGetInfo,
    SetScanParameters { interval: u16, window: u16, active: bool },
    Discover { mode: u8 },
    EndProcedure,
    ConnectDirect {
        address: DeviceAddress,
        address_type: u8,
        interval_min: u16,
        interval_max: u16,
        timeout: u16,
        latency: u16,
    },
    Disconnect { connection: ConnectionHandle },
    AttributeWrite { connection: ConnectionHandle, attribute: u16, payload: Vec<u8> },
    ReadByHandle { connection: ConnectionHandle, attribute: u16 },
}

impl Command {
    fn id(&self) -> (u8, u8) {
        match self {
            Command::SystemReset { .. } => (CLASS_SYSTEM, 0),
            Command::SystemHello => (CLASS_SYSTEM, 1),
            Command::SystemGetInfo => (CLASS_SYSTEM, 8),
            Command::Disconnect { .. } => (CLASS_CONNECTION, 0),
            Command::ReadByHandle { .. } => (CLASS_ATTCLIENT, 4),
            Command::AttributeWrite { .. } => (CLASS_ATTCLIENT, 5),
            Command::Discover { .. } => (CLASS_GAP, 2),
            Command::ConnectDirect { .. } => (CLASS_GAP, 3),
            Command::EndProcedure => (CLASS_GAP, 4),
            Command::SetScanParameters { .. } => (CLASS_GAP, 7),
        }
    }

    fn payload(&self) -> Vec<u8> {
        let mut payload = Vec::new();

        match self {
            Command::SystemHello | Command::SystemGetInfo | Command::EndProcedure => {},
            Command::SystemReset { boot_in_dfu } => payload.push(u8::from(*boot_in_dfu)),
            Command::SetScanParameters { interval, window, active } => {
                payload.extend_from_slice(&interval.to_le_bytes());
                payload.extend_from_slice(&window.to_le_bytes());
                payload.push(u8::from(*active));
            },
            Command::Discover { mode } => payload.push(*mode),
            Command::ConnectDirect { address, address_type, interval_min, interval_max, timeout, latency } => {
                payload.extend_from_slice(&address.to_wire());
                payload.push(*address_type);
                payload.extend_from_slice(&interval_min.to_le_bytes());
                payload.extend_from_slice(&interval_max.to_le_bytes());
                payload.extend_from_slice(&timeout.to_le_bytes());
                payload.extend_from_slice(&latency.to_le_bytes());
            },
            Command::Disconnect { connection } => payload.push(connection.0),
            Command::AttributeWrite { connection, attribute, payload: data } => {
                payload.push(connection.0);
                payload.extend_from_slice(&attribute.to_le_bytes());
                // uint8array; callers keep `data` within MAX_ARRAY_LEN
                payload.push(data.len() as u8);
                payload.extend_from_slice(data);
            },
            Command::ReadByHandle { connection, attribute } => {
                payload.push(connection.0);
                payload.extend_from_slice(&attribute.to_le_bytes());
            },
        }

        payload
    }

    pub fn encode(&self) -> Vec<u8> {
        let (class, method) = self.id();
        let payload = self.payload();
        let mut packet = header(false, payload.len(), class, method).to_vec();
        packet.extend_from_slice(&payload);
        packet
    }
}

fn header(event: bool, payload_len: usize, class: u8, method: u8) -> [u8; HEADER_LEN] {
    let payload_len = payload_len.min(MAX_PAYLOAD_LEN);
    let flag = if event { EVENT_FLAG } else { 0 };
    [flag | (payload_len >> 8) as u8, (payload_len & 0xFF) as u8, class, method]
}

/// Build a complete event packet. Used to feed recorded or synthetic traffic into the router.
pub fn encode_event(class: u8, method: u8, payload: &[u8]) -> Vec<u8> {
    let mut packet = header(true, payload.len(), class, method).to_vec();
    packet.extend_from_slice(payload);
    packet
}

/// Class and id of a packet, if it carries a complete header.
pub fn packet_id(packet: &[u8]) -> Option<(u8, u8)> {
    if packet.len() < HEADER_LEN {
        return None;
    }
    Some((packet[2], packet[3]))
}

struct Reader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, position: 0 }
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], FrameError> {
        let available = self.bytes.len() - self.position;
        if count > available {
            return Err(FrameError::Truncated { needed: count, available });
        }

        let slice = &self.bytes[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, FrameError> {
        Ok(self.take(1)?[0])
    }

    fn i8(&mut self) -> Result<i8, FrameError> {
        Ok(self.u8()? as i8)
    }

    fn u16(&mut self) -> Result<u16, FrameError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn address(&mut self) -> Result<DeviceAddress, FrameError> {
        let bytes = self.take(6)?;
        let mut wire = [0u8; 6];
        wire.copy_from_slice(bytes);
        Ok(DeviceAddress::from_wire(wire))
    }

    fn connection(&mut self) -> Result<ConnectionHandle, FrameError> {
        Ok(ConnectionHandle(self.u8()?))
    }

    fn array(&mut self) -> Result<Vec<u8>, FrameError> {
        let len = self.u8()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}

/// Parse one complete packet. Responses and events the driver does not act on come back as
/// `TransportEvent::Ignored`.
pub fn parse_event(packet: &[u8]) -> Result<TransportEvent, FrameError> {
    if packet.len() < HEADER_LEN {
        return Err(FrameError::Truncated { needed: HEADER_LEN, available: packet.len() });
    }

    let announced = (((packet[0] & 0x07) as usize) << 8) | packet[1] as usize;
    let actual = packet.len() - HEADER_LEN;
    if announced != actual {
        return Err(FrameError::LengthMismatch { announced, actual });
    }

    let is_event = packet[0] & EVENT_FLAG != 0;
    let (class, method) = (packet[2], packet[3]);
    let mut reader = Reader::new(&packet[HEADER_LEN..]);

    if !is_event {
        return Ok(TransportEvent::Ignored { class, method });
    }

    let event = match (class, method) {
        (CLASS_GAP, 0) => {
            let rssi = reader.i8()?;
            let _packet_type = reader.u8()?;
            let address = reader.address()?;
            let _address_type = reader.u8()?;
            let _bond = reader.u8()?;
            let advertisement = reader.array()?;
            TransportEvent::DeviceDiscovered { address, rssi, advertisement }
        },
        (CLASS_CONNECTION, 0) => {
            let connection = reader.connection()?;
            let flags = reader.u8()?;
            let address = reader.address()?;
            // address type, interval, timeout, latency and bonding follow; none of them matter here
            TransportEvent::Connected { connection, address, flags }
        },
        (CLASS_CONNECTION, 4) => {
            let connection = reader.connection()?;
            let reason = reader.u16()?;
            TransportEvent::Disconnected { connection, reason }
        },
        (CLASS_ATTCLIENT, 1) => {
            let connection = reader.connection()?;
            let status = reader.u16()?;
            let attribute = reader.u16()?;
            TransportEvent::WriteCompleted { connection, status, attribute }
        },
        (CLASS_ATTCLIENT, 5) => {
            let connection = reader.connection()?;
            let attribute = reader.u16()?;
            let _value_type = reader.u8()?;
            let payload = reader.array()?;
            TransportEvent::AttributeValue { connection, attribute, payload }
        },
        _ => TransportEvent::Ignored { class, method },
    };

    Ok(event)
}

/// Whether advertisement data lists `service` among its 128-bit service UUIDs.
pub fn advertises_service(advertisement: &[u8], service: &Uuid) -> bool {
    let mut rest = advertisement;

    while let Some((&len, tail)) = rest.split_first() {
        let len = len as usize;
        if len == 0 || len > tail.len() {
            break;
        }

        let (field, remainder) = tail.split_at(len);
        rest = remainder;

        // 0x06: incomplete list, 0x07: complete list of 128-bit service UUIDs
        if field[0] != 0x06 && field[0] != 0x07 {
            continue;
        }

        for chunk in field[1..].chunks_exact(16) {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(chunk);
            bytes.reverse();
            if Uuid::from_bytes(bytes) == *service {
                return true;
            }
        }
    }

    false
}
