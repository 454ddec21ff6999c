use std::io;
use thiserror::Error;
use std::str::Utf8Error;
use btleplug;
use serde_json;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },

    #[error("Invalid config value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Failures that end a session. None of these are retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("Not allowed to manage bluetooth connections")]
    PermissionDenied,

    #[error("Could not connect to the device")]
    ConnectFailed,

    #[error("Service discovery failed")]
    DiscoveryFailed,

    #[error("Enabling notifications failed")]
    SubscriptionFailed,

    #[error("Connection to the device was lost")]
    LinkLost,
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("The selected device was not found by any adapter")]
    MissingPeripheral,

    #[error("A required bluetooth characteristic is not available")]
    MissingCharacteristic,

    #[error("Bluetooth operation took too long")]
    Timeout,
}

impl DeviceError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, DeviceError::Btle { source: btleplug::Error::PermissionDenied })
    }
}

/// Per-token decode problem. Logged, never fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeWarning {
    #[error("Skipping malformed token #{index}: {token:?}")]
    MalformedToken { index: usize, token: String },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleError {
    #[error("Notification did not contain any usable channel")]
    Empty,

    #[error("Notification contained {channels} channels, at least 4 are required")]
    Incomplete { channels: usize },
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to connect to device: {source}")]
    Connection { #[from] source: ConnectionError },

    #[error("Failed to run application: {source}")]
    IOError { #[from] source: io::Error },
}
