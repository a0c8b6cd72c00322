use std::io;
use thiserror::Error;
use serde_json;

use crate::device::types::{ConnectionState, DeviceAddress, SubscriptionStep, WriteOutcome};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid device address: {input:?}")]
pub struct AddressParseError {
    pub input: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unexpected payload length: expected {expected} bytes, got {actual}")]
    BadLength { expected: usize, actual: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Packet truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Packet header announces {announced} payload bytes, packet carries {actual}")]
    LengthMismatch { announced: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to write command to transport: {source}")]
    Io { #[from] source: io::Error },

    #[error("Transport is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Can not {operation} while {state}")]
    InvalidState { operation: &'static str, state: ConnectionState },

    #[error("Timed out waiting to {operation}")]
    TimedOut { operation: &'static str },

    #[error("Device {address} rejected the connection (flags {flags:#04x})")]
    Rejected { address: DeviceAddress, flags: u8 },

    #[error("Connection lost")]
    Disconnected,

    #[error("Error communicating with dongle: {source}")]
    Transport { #[from] source: TransportError },
}

#[derive(Error, Debug)]
pub enum SubscriptionError {
    #[error("Can not subscribe while {state}")]
    InvalidState { state: ConnectionState },

    #[error("Subscription aborted, failed to {step}: {outcome}")]
    WriteFailed {
        step: SubscriptionStep,
        outcome: WriteOutcome,
        /// Steps that completed before the failing one.
        completed: Vec<SubscriptionStep>,
    },
}

#[derive(Error, Debug)]
pub enum TrainingDataError {
    #[error("Failed to read training data: {source}")]
    Io { #[from] source: io::Error },

    #[error("Failed to parse training data: {source}")]
    Json { #[from] source: serde_json::Error },

    #[error("Training data may only label known poses, found {label}")]
    UnknownLabel { label: String },
}

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Failed to load pose training data: {source}")]
    TrainingData { #[from] source: TrainingDataError },

    #[error("Failed to load driver config: {source}")]
    Config { #[from] source: ConfigError },
}
