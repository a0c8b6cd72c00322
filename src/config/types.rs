use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::device::constants::{CLASSIFIER_K, CONNECT_DEADLINE, DISCONNECT_DEADLINE, INTER_WRITE_DELAY, READ_DEADLINE, WRITE_DEADLINE};

/// Parameters of the gap set_scan_parameters command, in dongle units.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanConfig {
    pub interval: u16,
    pub window: u16,
    pub active: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            interval: 10,
            window: 250,
            active: true,
        }
    }
}

/// Parameters of the gap connect_direct command, in dongle units.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectConfig {
    pub address_type: u8,
    pub interval_min: u16,
    pub interval_max: u16,
    pub timeout: u16,
    pub latency: u16,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        ConnectConfig {
            address_type: 1,
            interval_min: 100,
            interval_max: 2000,
            timeout: 15000,
            latency: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriverConfig {
    pub write_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub inter_write_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub disconnect_timeout_ms: u64,
    pub classifier_k: usize,
    pub scan: ScanConfig,
    pub connect: ConnectConfig,
    /// Labelled EMG samples to train the classifier with instead of the bundled ones.
    pub training_data: Option<PathBuf>,
}

impl DriverConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn inter_write_delay(&self) -> Duration {
        Duration::from_millis(self.inter_write_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            write_timeout_ms: WRITE_DEADLINE,
            read_timeout_ms: READ_DEADLINE,
            inter_write_delay_ms: INTER_WRITE_DELAY,
            connect_timeout_ms: CONNECT_DEADLINE,
            disconnect_timeout_ms: DISCONNECT_DEADLINE,
            classifier_k: CLASSIFIER_K,
            scan: ScanConfig::default(),
            connect: ConnectConfig::default(),
            training_data: None,
        }
    }
}
