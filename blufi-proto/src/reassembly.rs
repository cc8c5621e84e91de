//! Reassembly of frames split across transport notifications
//!
//! BLE notifications are bounded by the negotiated MTU, so one frame may arrive
//! as several chunks. Only one frame is ever in flight: the transport delivers
//! chunks of a single characteristic in order.

use log::{debug, warn};

use crate::{Decoded, Frame, FrameError, HEADER_LEN};

#[derive(Debug, Default)]
pub struct Reassembler {
    pending: Option<Vec<u8>>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a partially received frame is buffered
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn buffered_len(&self) -> usize {
        self.pending.as_ref().map_or(0, Vec::len)
    }

    /// Drop any partially received frame
    pub fn clear(&mut self) {
        if let Some(buf) = self.pending.take() {
            debug!("dropping {} buffered fragment bytes", buf.len());
        }
    }

    /// Feed one notification; returns a frame once one is complete
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Frame>, FrameError> {
        if chunk.is_empty() {
            return Ok(None);
        }

        if let Some(mut buffer) = self.pending.take() {
            buffer.extend_from_slice(chunk);
            return self.try_complete(buffer);
        }

        if chunk.len() < HEADER_LEN {
            debug!("header split across notifications, buffering {} bytes", chunk.len());
            self.pending = Some(chunk.to_vec());
            return Ok(None);
        }

        match Frame::from_bytes(chunk)? {
            Decoded::Complete(frame) => Ok(Some(frame)),
            Decoded::Incomplete { expected_len } => {
                debug!("fragment {}/{} bytes, waiting for more", chunk.len(), expected_len);
                self.pending = Some(chunk.to_vec());
                Ok(None)
            }
        }
    }

    fn try_complete(&mut self, buffer: Vec<u8>) -> Result<Option<Frame>, FrameError> {
        let expected_len = match Frame::expected_len(&buffer) {
            Some(len) if buffer.len() >= len => len,
            _ => {
                self.pending = Some(buffer);
                return Ok(None);
            }
        };

        match Frame::from_bytes(&buffer) {
            Ok(Decoded::Complete(frame)) => {
                if buffer.len() > expected_len {
                    warn!(
                        "discarding {} bytes trailing a reassembled frame",
                        buffer.len() - expected_len
                    );
                }
                Ok(Some(frame))
            }
            Ok(Decoded::Incomplete { .. }) => Err(FrameError::FragmentReassemblyFailed(Box::new(
                FrameError::MalformedFrame("inconsistent length"),
            ))),
            Err(e) => Err(FrameError::FragmentReassemblyFailed(Box::new(e))),
        }
    }
}
