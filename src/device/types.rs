use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::AddressParseError;

/// Six byte Bluetooth hardware address, stored most significant byte first (display order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceAddress([u8; 6]);

impl DeviceAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        DeviceAddress(bytes)
    }

    /// BGAPI transmits addresses least significant byte first.
    pub fn from_wire(bytes: [u8; 6]) -> Self {
        let mut bytes = bytes;
        bytes.reverse();
        DeviceAddress(bytes)
    }

    pub fn to_wire(&self) -> [u8; 6] {
        let mut bytes = self.0;
        bytes.reverse();
        bytes
    }

    pub fn bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

impl FromStr for DeviceAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');

        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(|| AddressParseError { input: s.to_string() })?;
            if part.len() != 2 {
                return Err(AddressParseError { input: s.to_string() });
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| AddressParseError { input: s.to_string() })?;
        }

        if parts.next().is_some() {
            return Err(AddressParseError { input: s.to_string() });
        }

        Ok(DeviceAddress(bytes))
    }
}

impl TryFrom<String> for DeviceAddress {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceAddress> for String {
    fn from(value: DeviceAddress) -> Self {
        value.to_string()
    }
}

/// Connection number assigned by the dongle once a link is up. The driver tracks "no connection"
/// as `Option::None` rather than a sentinel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(pub u8);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub const EMG_CHANNELS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmgSample(pub [i16; EMG_CHANNELS]);

impl EmgSample {
    pub fn channels(&self) -> &[i16; EMG_CHANNELS] {
        &self.0
    }

    /// Squared euclidean distance. Exact in integer arithmetic, so neighbour ordering never
    /// depends on floating point rounding.
    pub fn distance_squared(&self, other: &EmgSample) -> i64 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| {
                let delta = i64::from(*a) - i64::from(*b);
                delta * delta
            })
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImuSample {
    pub gyroscope: [i16; 3],
    pub accelerometer: [i16; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub build: u8,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.patch, self.build)
    }
}

/// Gestures the classifier can recognize. `Unknown` never reaches pose observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Pose {
    Fist,
    Spread,
    Left,
    Right,
    Unknown,
}

impl Pose {
    /// Every recognizable pose, in the order the classifier enumerates its training data.
    pub const KNOWN: [Pose; 4] = [Pose::Fist, Pose::Spread, Pose::Left, Pose::Right];

    pub fn from_name(name: &str) -> Pose {
        match name.trim() {
            "FIST" => Pose::Fist,
            "SPREAD" => Pose::Spread,
            "LEFT" => Pose::Left,
            "RIGHT" => Pose::Right,
            _ => Pose::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Pose::Fist => "FIST",
            Pose::Spread => "SPREAD",
            Pose::Left => "LEFT",
            Pose::Right => "RIGHT",
            Pose::Unknown => "x",
        }
    }

    pub fn is_known(&self) -> bool {
        *self != Pose::Unknown
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting,
    Connected,
    SubscriptionInFlight,
    Streaming,
    Disconnecting,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Resolution of a single GATT procedure (attribute write or read).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Success,
    /// The completion event carried this non-zero status code.
    Failed(u16),
    TimedOut,
    /// The connection dropped (or the command could not be sent) before completion.
    Aborted,
}

impl WriteOutcome {
    pub fn from_status(status: u16) -> Self {
        if status == 0 {
            WriteOutcome::Success
        } else {
            WriteOutcome::Failed(status)
        }
    }

    pub fn is_success(&self) -> bool {
        *self == WriteOutcome::Success
    }
}

impl fmt::Display for WriteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOutcome::Success => write!(f, "success"),
            WriteOutcome::Failed(code) => write!(f, "failed with status {:#06x}", code),
            WriteOutcome::TimedOut => write!(f, "timed out"),
            WriteOutcome::Aborted => write!(f, "aborted"),
        }
    }
}

/// The writes that make up the subscription handshake, in the order they are issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStep {
    EnableEmg,
    EnableImu,
    DeviceSettings,
}

impl fmt::Display for SubscriptionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            SubscriptionStep::EnableEmg => "enable EMG notifications",
            SubscriptionStep::EnableImu => "enable IMU notifications",
            SubscriptionStep::DeviceSettings => "configure device settings",
        };

        write!(f, "{}", result)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub address: DeviceAddress,
    pub rssi: i8,
    /// The scan response advertised the Myo control service.
    pub is_myo: bool,
}

/// The slice of the wire event vocabulary the driver acts on. Every other packet is `Ignored`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    DeviceDiscovered {
        address: DeviceAddress,
        rssi: i8,
        advertisement: Vec<u8>,
    },
    Connected {
        connection: ConnectionHandle,
        address: DeviceAddress,
        flags: u8,
    },
    Disconnected {
        connection: ConnectionHandle,
        reason: u16,
    },
    WriteCompleted {
        connection: ConnectionHandle,
        status: u16,
        attribute: u16,
    },
    AttributeValue {
        connection: ConnectionHandle,
        attribute: u16,
        payload: Vec<u8>,
    },
    Ignored {
        class: u8,
        method: u8,
    },
}
