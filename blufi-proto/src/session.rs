//! Session: one provisioning connection's protocol state
//!
//! The session owns the outbound sequence counter, the reassembly buffer and the
//! security state. It never touches the transport: callers hand it notification
//! bytes and write the frames it returns.

use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::security::{DhKeyPair, FrameCipher, IvMode, SessionKey};
use crate::wifi::{self, CustomReply, StoredConfigEntry, WifiScanEntry, WifiStatus};
use crate::{
    Command, ControlSubtype, DataSubtype, DeviceErrorCode, Frame, FrameControl, FrameError,
    FrameKind, MAX_PAYLOAD_LEN, PayloadError, Reassembler, SessionError,
};

pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub iv_mode: IvMode,
    pub negotiation_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            iv_mode: IvMode::default(),
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    /// Linked, traffic in the clear
    Connected,
    Negotiating,
    Secured,
}

enum Security {
    Inactive,
    Negotiating { keys: DhKeyPair, deadline: Instant },
    Active(FrameCipher),
}

/// Everything the session reports back to the application
#[derive(Debug)]
pub enum Event {
    Secured,
    NegotiationFailed(SessionError),
    WifiStatus(WifiStatus),
    WifiList(Vec<WifiScanEntry>),
    StoredConfigs(Vec<StoredConfigEntry>),
    StoredConfigDeleted { ok: bool },
    CustomData { op: u8, status: u8, body: Vec<u8> },
    Version { major: u8, minor: u8 },
    Ack { sequence: u8 },
    DeviceError(DeviceErrorCode),
    /// An inbound frame or payload was dropped
    ProtocolError(SessionError),
    Disconnected,
}

pub struct Session {
    options: SessionOptions,
    connected: bool,
    tx_sequence: u8,
    last_rx_sequence: Option<u8>,
    reassembly: Reassembler,
    security: Security,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_options(SessionOptions::default())
    }

    pub fn with_options(options: SessionOptions) -> Self {
        Self {
            options,
            connected: false,
            tx_sequence: 0,
            last_rx_sequence: None,
            reassembly: Reassembler::new(),
            security: Security::Inactive,
        }
    }

    pub fn state(&self) -> SessionState {
        match (&self.security, self.connected) {
            (_, false) => SessionState::Disconnected,
            (Security::Inactive, true) => SessionState::Connected,
            (Security::Negotiating { .. }, true) => SessionState::Negotiating,
            (Security::Active(_), true) => SessionState::Secured,
        }
    }

    pub fn is_secured(&self) -> bool {
        self.state() == SessionState::Secured
    }

    /// Sequence number the next outbound frame will carry
    pub fn tx_sequence(&self) -> u8 {
        self.tx_sequence
    }

    /// Transport reports the link is up. Called once per physical connection.
    pub fn on_connected(&mut self) {
        self.reset();
        self.connected = true;
        info!("session connected");
    }

    /// Transport reports link loss. A pending negotiation is aborted.
    pub fn on_disconnected(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        if matches!(self.security, Security::Negotiating { .. }) {
            events.push(Event::NegotiationFailed(SessionError::NegotiationAborted));
        }
        if self.connected {
            events.push(Event::Disconnected);
        }
        self.reset();
        info!("session disconnected");
        events
    }

    fn reset(&mut self) {
        self.connected = false;
        self.tx_sequence = 0;
        self.last_rx_sequence = None;
        self.reassembly.clear();
        self.security = Security::Inactive;
    }

    /// Generate a key pair and return the negotiation frame carrying our public key
    pub fn begin_negotiation(&mut self, now: Instant) -> Result<Vec<u8>, SessionError> {
        match self.state() {
            SessionState::Disconnected => return Err(SessionError::NotConnected),
            SessionState::Negotiating => return Err(SessionError::NegotiationInProgress),
            SessionState::Secured => return Err(SessionError::AlreadySecured),
            SessionState::Connected => {}
        }

        let keys = DhKeyPair::generate();
        let bytes = self.encode_frame(
            FrameKind::Data(DataSubtype::Negotiation),
            keys.public_key().to_vec(),
        )?;
        self.security = Security::Negotiating {
            keys,
            deadline: now + self.options.negotiation_timeout,
        };
        info!("key negotiation started");
        Ok(bytes)
    }

    pub fn negotiation_deadline(&self) -> Option<Instant> {
        match &self.security {
            Security::Negotiating { deadline, .. } => Some(*deadline),
            _ => None,
        }
    }

    /// Drop a pending negotiation, e.g. when the request never reached the device
    pub fn cancel_negotiation(&mut self) -> bool {
        if matches!(self.security, Security::Negotiating { .. }) {
            self.security = Security::Inactive;
            return true;
        }
        false
    }

    /// Fail a negotiation whose deadline has passed; the session falls back to
    /// unsecured operation
    pub fn check_timeout(&mut self, now: Instant) -> Option<Event> {
        match self.negotiation_deadline() {
            Some(deadline) if now >= deadline => {
                warn!("key negotiation timed out");
                self.security = Security::Inactive;
                Some(Event::NegotiationFailed(SessionError::NegotiationTimeout))
            }
            _ => None,
        }
    }

    /// Encode a command into wire bytes, encrypting when the session is secured
    pub fn encode(&mut self, command: &Command) -> Result<Vec<u8>, SessionError> {
        self.encode_frame(command.kind(), command.payload())
    }

    fn encode_frame(
        &mut self,
        kind: FrameKind,
        mut payload: Vec<u8>,
    ) -> Result<Vec<u8>, SessionError> {
        if !self.connected {
            return Err(SessionError::NotConnected);
        }
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge(payload.len()).into());
        }

        let sequence = self.tx_sequence;
        let mut control = FrameControl::empty();
        if let Security::Active(cipher) = &mut self.security
            && kind != FrameKind::Data(DataSubtype::Negotiation)
        {
            cipher.encrypt(sequence, &mut payload)?;
            control = FrameControl::ENCRYPTED | FrameControl::CHECKSUM;
        }

        let mut frame = Frame::new(kind, payload);
        frame.control = control;
        frame.sequence = sequence;
        let bytes = frame.to_bytes()?;

        self.tx_sequence = self.tx_sequence.wrapping_add(1);
        debug!("tx {:?} seq={} len={}", kind, sequence, frame.payload.len());
        Ok(bytes)
    }

    /// Feed one transport notification
    pub fn handle_notification(&mut self, chunk: &[u8]) -> Option<Event> {
        if !self.connected {
            warn!("dropping {} bytes received while disconnected", chunk.len());
            return None;
        }

        match self.reassembly.push(chunk) {
            Ok(Some(frame)) => match self.open(frame) {
                Ok(frame) => self.dispatch(frame),
                Err(e) => Some(Event::ProtocolError(e)),
            },
            Ok(None) => None,
            Err(e) => {
                warn!("dropping inbound frame: {e}");
                self.skip_rejected(&e);
                Some(Event::ProtocolError(e.into()))
            }
        }
    }

    /// A session keystream must still cover an encrypted frame dropped on
    /// its checksum, or every later frame decrypts out of step.
    fn skip_rejected(&mut self, error: &FrameError) {
        let rejected = match error {
            FrameError::FragmentReassemblyFailed(inner) => inner.as_ref(),
            other => other,
        };
        if let FrameError::ChecksumMismatch {
            control,
            payload_len,
            ..
        } = rejected
            && control.contains(FrameControl::ENCRYPTED)
            && let Security::Active(cipher) = &mut self.security
        {
            cipher.skip_inbound(*payload_len);
        }
    }

    fn open(&mut self, mut frame: Frame) -> Result<Frame, SessionError> {
        if let Some(last) = self.last_rx_sequence
            && frame.sequence != last.wrapping_add(1)
        {
            warn!("rx sequence gap: expected {}, got {}", last.wrapping_add(1), frame.sequence);
        }
        self.last_rx_sequence = Some(frame.sequence);

        if frame.control.contains(FrameControl::ENCRYPTED) {
            match &mut self.security {
                Security::Active(cipher) => cipher.decrypt(frame.sequence, &mut frame.payload)?,
                _ => warn!("encrypted frame seq={} on an unsecured session", frame.sequence),
            }
        }
        debug!(
            "rx type={:?} subtype=0x{:02x} seq={} len={}",
            frame.frame_type,
            frame.subtype,
            frame.sequence,
            frame.payload.len()
        );
        Ok(frame)
    }

    fn dispatch(&mut self, frame: Frame) -> Option<Event> {
        let kind = frame.kind();
        let payload = frame.payload;
        match kind {
            Some(FrameKind::Control(ControlSubtype::Ack)) => Some(Event::Ack {
                sequence: payload.first().copied().unwrap_or(frame.sequence),
            }),
            Some(FrameKind::Data(DataSubtype::Negotiation)) => self.complete_negotiation(&payload),
            Some(FrameKind::Data(DataSubtype::WifiReport)) => Some(
                WifiStatus::from_bytes(&payload)
                    .map(Event::WifiStatus)
                    .unwrap_or_else(|e| Event::ProtocolError(e.into())),
            ),
            Some(FrameKind::Data(DataSubtype::WifiList)) => {
                Some(Event::WifiList(wifi::parse_scan_list(&payload)))
            }
            Some(FrameKind::Data(DataSubtype::VersionReply)) => match payload[..] {
                [major, minor, ..] => Some(Event::Version { major, minor }),
                _ => Some(Event::ProtocolError(PayloadError::Truncated("version").into())),
            },
            Some(FrameKind::Data(DataSubtype::Error)) => self.device_error(&payload),
            Some(FrameKind::Data(DataSubtype::CustomData)) => {
                Some(match wifi::parse_custom_reply(&payload) {
                    Ok(CustomReply::StoredConfigs(list)) => Event::StoredConfigs(list),
                    Ok(CustomReply::Deleted { ok }) => Event::StoredConfigDeleted { ok },
                    Ok(CustomReply::Unknown { op, status, body }) => {
                        Event::CustomData { op, status, body }
                    }
                    Err(e) => Event::ProtocolError(e.into()),
                })
            }
            other => {
                debug!("ignoring frame {other:?} subtype=0x{:02x}", frame.subtype);
                None
            }
        }
    }

    fn complete_negotiation(&mut self, peer_public: &[u8]) -> Option<Event> {
        let Security::Negotiating { keys, .. } = &self.security else {
            warn!("unexpected negotiation frame");
            return None;
        };

        let result = keys
            .shared_secret(peer_public)
            .map_err(SessionError::from)
            .and_then(|shared| {
                FrameCipher::new(SessionKey::derive(&shared[..]), self.options.iv_mode)
                    .map_err(SessionError::from)
            });

        match result {
            Ok(cipher) => {
                self.security = Security::Active(cipher);
                info!("session secured ({:?} keystream)", self.options.iv_mode);
                Some(Event::Secured)
            }
            Err(e) => {
                warn!("key negotiation failed: {e}");
                self.security = Security::Inactive;
                Some(Event::NegotiationFailed(e))
            }
        }
    }

    fn device_error(&mut self, payload: &[u8]) -> Option<Event> {
        let Some(&code) = payload.first() else {
            return Some(Event::ProtocolError(PayloadError::Truncated("error report").into()));
        };

        match DeviceErrorCode::from_code(code) {
            DeviceErrorCode::Sequence => {
                warn!("device reported a sequence error, resetting tx sequence");
                self.tx_sequence = 0;
                None
            }
            code if code.is_negotiation_error()
                && matches!(self.security, Security::Negotiating { .. }) =>
            {
                self.security = Security::Inactive;
                Some(Event::NegotiationFailed(SessionError::DeviceReportedError(code)))
            }
            code => {
                warn!("device reported {code}");
                Some(Event::DeviceError(code))
            }
        }
    }
}
