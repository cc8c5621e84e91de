//! The link a `Client` drives
//!
//! A transport is an already connected and subscribed write/notify pair. Writes
//! go through [`Transport::write`]; notifications and link loss arrive on the
//! `LinkEvent` channel handed to the client next to the transport.

use std::future::Future;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// What the transport reports back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Notification(Vec<u8>),
    Disconnected,
}

pub trait Transport: Send {
    /// Write one encoded frame; resolves on the transport acknowledgement
    fn write(&mut self, data: &[u8]) -> impl Future<Output = Result<(), BoxError>> + Send;
}
