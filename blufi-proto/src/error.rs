use crate::{DeviceErrorCode, FrameControl};

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),
    #[error("payload of {0} bytes exceeds the 255 byte frame limit")]
    PayloadTooLarge(usize),
    #[error("checksum mismatch: frame carries 0x{received:04x}, computed 0x{computed:04x}")]
    ChecksumMismatch {
        received: u16,
        computed: u16,
        /// Control byte of the rejected frame
        control: FrameControl,
        /// Declared payload length of the rejected frame
        payload_len: usize,
    },
    #[error("fragment reassembly failed: {0}")]
    FragmentReassemblyFailed(#[source] Box<FrameError>),
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("{0} payload truncated")]
    Truncated(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("peer public key outside [1, p-1]")]
    InvalidPeerKey,
    #[error("invalid cipher key or IV length")]
    InvalidKeyLength,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session is not connected")]
    NotConnected,
    #[error("key negotiation already in progress")]
    NegotiationInProgress,
    #[error("session is already secured")]
    AlreadySecured,
    #[error("key negotiation timed out")]
    NegotiationTimeout,
    #[error("key negotiation aborted")]
    NegotiationAborted,
    #[error("device reported {0}")]
    DeviceReportedError(DeviceErrorCode),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Security(#[from] SecurityError),
}
