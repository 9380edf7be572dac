use std::io;
use std::str::Utf8Error;
use thiserror::Error;
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
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Failures reported by a radio adapter implementation. These never leave the device module as-is:
/// the scan controller and the connection session convert them into a [`SessionError`].
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("Bluetooth permission was denied")]
    PermissionDenied,

    #[error("Peripheral {0} is not known to the adapter")]
    UnknownPeripheral(String),

    #[error("A required bluetooth characteristic is not available")]
    MissingCharacteristic,

    #[error("Transport payload is not valid base64: {source}")]
    Payload { #[from] source: base64::DecodeError },

    #[error("timed out")]
    TimedOut,

    #[error("{0}")]
    Other(String),
}

impl AdapterError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            AdapterError::PermissionDenied | AdapterError::Btle { source: btleplug::Error::PermissionDenied }
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Not allowed to access Bluetooth")]
    PermissionDenied,

    #[error("Bluetooth radio failure: {0}")]
    RadioError(String),

    #[error("Connecting to peripheral failed: {0}")]
    ConnectionFailed(String),

    #[error("Operation is not allowed in the current session state")]
    InvalidState,

    #[error("No peripheral is connected")]
    NotConnected,

    #[error("Writing command failed: {0}")]
    WriteFailed(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("The session has been shut down")]
    SessionClosed,
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start application (bluetooth): {source}")]
    Adapter { #[from] source: AdapterError },

    #[error("Session failed: {source}")]
    Session { #[from] source: SessionError },

    #[error("Failed to run application (io): {source}")]
    IOError { #[from] source: io::Error },
}
