use std::time::Duration;

use blufi_proto::SessionError;
use uuid::Uuid;

use crate::transport::BoxError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("transport write failed: {0}")]
    TransportWriteFailed(#[source] BoxError),
    #[error("no response from device within {0:?}")]
    ResponseTimeout(Duration),
    #[error("link closed")]
    LinkClosed,
    #[error("bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),
    #[error("no Bluetooth adapter found")]
    NoAdapter,
    #[error("no device found matching {0:?}")]
    DeviceNotFound(String),
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),
    #[error("invalid uuid: {0}")]
    InvalidUuid(#[from] uuid::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}
