//! BluFi wire protocol - frame types, framing and the provisioning session
//!
//! A BluFi frame is a 4 byte header followed by at most 255 payload bytes and an
//! optional CRC16:
//!
//! ```text
//! +----------------+---------+----------+--------+-----------+------------+
//! | subtype | type | control | sequence | length | payload   | [checksum] |
//! | 6 bits  | 2 b  | 1 byte  | 1 byte   | 1 byte | 0..255    | 2 bytes LE |
//! +----------------+---------+----------+--------+-----------+------------+
//! ```

pub mod ble;
pub mod command;
mod crc;
mod error;
mod reassembly;
pub mod security;
mod session;
pub mod wifi;

pub use command::Command;
pub use crc::crc16;
pub use error::{FrameError, PayloadError, SecurityError, SessionError};
pub use reassembly::Reassembler;
pub use session::{Event, Session, SessionOptions, SessionState};

pub const HEADER_LEN: usize = 4;
pub const CHECKSUM_LEN: usize = 2;
pub const MAX_PAYLOAD_LEN: usize = 255;

/// Two bit frame type, low bits of header byte 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Control = 0x00,
    Data = 0x01,
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(bits: u8) -> Result<Self, FrameError> {
        match bits {
            0x00 => Ok(FrameType::Control),
            0x01 => Ok(FrameType::Data),
            _ => Err(FrameError::MalformedFrame("unknown frame type")),
        }
    }
}

/// Control frame subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSubtype {
    Ack = 0x00,
    SetSecurityMode = 0x01,
    SetOpMode = 0x02,
    ConnectWifi = 0x03,
    DisconnectWifi = 0x04,
    GetWifiStatus = 0x05,
    Deauthenticate = 0x06,
    GetVersion = 0x07,
    DisconnectBle = 0x08,
    GetWifiList = 0x09,
}

impl TryFrom<u8> for ControlSubtype {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            0x00 => ControlSubtype::Ack,
            0x01 => ControlSubtype::SetSecurityMode,
            0x02 => ControlSubtype::SetOpMode,
            0x03 => ControlSubtype::ConnectWifi,
            0x04 => ControlSubtype::DisconnectWifi,
            0x05 => ControlSubtype::GetWifiStatus,
            0x06 => ControlSubtype::Deauthenticate,
            0x07 => ControlSubtype::GetVersion,
            0x08 => ControlSubtype::DisconnectBle,
            0x09 => ControlSubtype::GetWifiList,
            other => return Err(other),
        })
    }
}

/// Data frame subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSubtype {
    Negotiation = 0x00,
    StaBssid = 0x01,
    StaSsid = 0x02,
    StaPassword = 0x03,
    SoftApSsid = 0x04,
    SoftApPassword = 0x05,
    SoftApMaxConnections = 0x06,
    SoftApAuthMode = 0x07,
    SoftApChannel = 0x08,
    Username = 0x09,
    CaCert = 0x0a,
    ClientCert = 0x0b,
    ServerCert = 0x0c,
    ClientPrivateKey = 0x0d,
    ServerPrivateKey = 0x0e,
    WifiReport = 0x0f,
    VersionReply = 0x10,
    WifiList = 0x11,
    Error = 0x12,
    CustomData = 0x13,
}

impl TryFrom<u8> for DataSubtype {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            0x00 => DataSubtype::Negotiation,
            0x01 => DataSubtype::StaBssid,
            0x02 => DataSubtype::StaSsid,
            0x03 => DataSubtype::StaPassword,
            0x04 => DataSubtype::SoftApSsid,
            0x05 => DataSubtype::SoftApPassword,
            0x06 => DataSubtype::SoftApMaxConnections,
            0x07 => DataSubtype::SoftApAuthMode,
            0x08 => DataSubtype::SoftApChannel,
            0x09 => DataSubtype::Username,
            0x0a => DataSubtype::CaCert,
            0x0b => DataSubtype::ClientCert,
            0x0c => DataSubtype::ServerCert,
            0x0d => DataSubtype::ClientPrivateKey,
            0x0e => DataSubtype::ServerPrivateKey,
            0x0f => DataSubtype::WifiReport,
            0x10 => DataSubtype::VersionReply,
            0x11 => DataSubtype::WifiList,
            0x12 => DataSubtype::Error,
            0x13 => DataSubtype::CustomData,
            other => return Err(other),
        })
    }
}

/// Frame type and subtype together, as chosen by the sender
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Control(ControlSubtype),
    Data(DataSubtype),
}

impl FrameKind {
    pub fn frame_type(self) -> FrameType {
        match self {
            FrameKind::Control(_) => FrameType::Control,
            FrameKind::Data(_) => FrameType::Data,
        }
    }

    pub fn subtype(self) -> u8 {
        match self {
            FrameKind::Control(s) => s as u8,
            FrameKind::Data(s) => s as u8,
        }
    }
}

/// Header byte 1 flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameControl(u8);

impl FrameControl {
    pub const ENCRYPTED: Self = Self(0x01);
    pub const CHECKSUM: Self = Self(0x02);
    /// Set on frames travelling device -> client
    pub const DIRECTION: Self = Self(0x04);
    pub const REQUIRE_ACK: Self = Self(0x08);
    pub const FRAGMENTED: Self = Self(0x10);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for FrameControl {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Error codes carried in error-report data frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorCode {
    Sequence,
    Checksum,
    Decrypt,
    Encrypt,
    InitSecurity,
    DhMalloc,
    DhParam,
    ReadParam,
    MakePublic,
    Unknown(u8),
}

impl DeviceErrorCode {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => DeviceErrorCode::Sequence,
            0x01 => DeviceErrorCode::Checksum,
            0x02 => DeviceErrorCode::Decrypt,
            0x03 => DeviceErrorCode::Encrypt,
            0x04 => DeviceErrorCode::InitSecurity,
            0x05 => DeviceErrorCode::DhMalloc,
            0x06 => DeviceErrorCode::DhParam,
            0x07 => DeviceErrorCode::ReadParam,
            0x08 => DeviceErrorCode::MakePublic,
            other => DeviceErrorCode::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            DeviceErrorCode::Sequence => 0x00,
            DeviceErrorCode::Checksum => 0x01,
            DeviceErrorCode::Decrypt => 0x02,
            DeviceErrorCode::Encrypt => 0x03,
            DeviceErrorCode::InitSecurity => 0x04,
            DeviceErrorCode::DhMalloc => 0x05,
            DeviceErrorCode::DhParam => 0x06,
            DeviceErrorCode::ReadParam => 0x07,
            DeviceErrorCode::MakePublic => 0x08,
            DeviceErrorCode::Unknown(code) => code,
        }
    }

    /// Errors raised by the device while running the key exchange
    pub fn is_negotiation_error(self) -> bool {
        matches!(
            self,
            DeviceErrorCode::InitSecurity
                | DeviceErrorCode::DhMalloc
                | DeviceErrorCode::DhParam
                | DeviceErrorCode::ReadParam
                | DeviceErrorCode::MakePublic
        )
    }
}

impl std::fmt::Display for DeviceErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceErrorCode::Sequence => f.write_str("sequence number error"),
            DeviceErrorCode::Checksum => f.write_str("checksum error"),
            DeviceErrorCode::Decrypt => f.write_str("decrypt error"),
            DeviceErrorCode::Encrypt => f.write_str("encrypt error"),
            DeviceErrorCode::InitSecurity => f.write_str("security init error"),
            DeviceErrorCode::DhMalloc => f.write_str("key exchange memory error"),
            DeviceErrorCode::DhParam => f.write_str("key exchange parameter error"),
            DeviceErrorCode::ReadParam => f.write_str("parameter read error"),
            DeviceErrorCode::MakePublic => f.write_str("public key generation error"),
            DeviceErrorCode::Unknown(code) => write!(f, "unknown error 0x{code:02x}"),
        }
    }
}

/// Frame: one protocol unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    /// Six bit subtype, meaning depends on `frame_type`
    pub subtype: u8,
    pub control: FrameControl,
    pub sequence: u8,
    pub payload: Vec<u8>,
}

/// Outcome of decoding a byte buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Complete(Frame),
    /// The header announces more bytes than were supplied
    Incomplete { expected_len: usize },
}

impl Frame {
    pub fn new(kind: FrameKind, payload: Vec<u8>) -> Self {
        Self {
            frame_type: kind.frame_type(),
            subtype: kind.subtype(),
            control: FrameControl::empty(),
            sequence: 0,
            payload,
        }
    }

    pub fn kind(&self) -> Option<FrameKind> {
        match self.frame_type {
            FrameType::Control => ControlSubtype::try_from(self.subtype).ok().map(FrameKind::Control),
            FrameType::Data => DataSubtype::try_from(self.subtype).ok().map(FrameKind::Data),
        }
    }

    /// On-wire length: header + payload + checksum when flagged
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len() + self.checksum_len()
    }

    fn checksum_len(&self) -> usize {
        if self.control.contains(FrameControl::CHECKSUM) {
            CHECKSUM_LEN
        } else {
            0
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge(self.payload.len()));
        }
        if self.subtype > 0x3f {
            return Err(FrameError::MalformedFrame("subtype does not fit in 6 bits"));
        }

        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push((self.subtype << 2) | self.frame_type as u8);
        buf.push(self.control.bits());
        buf.push(self.sequence);
        buf.push(self.payload.len() as u8);
        buf.extend_from_slice(&self.payload);

        if self.control.contains(FrameControl::CHECKSUM) {
            let checksum = crc16(&buf);
            buf.extend_from_slice(&checksum.to_le_bytes());
        }
        Ok(buf)
    }

    /// Total frame length announced by a header, `None` until 4 bytes are available
    pub fn expected_len(data: &[u8]) -> Option<usize> {
        if data.len() < HEADER_LEN {
            return None;
        }
        let control = FrameControl::from_bits(data[1]);
        let checksum = if control.contains(FrameControl::CHECKSUM) {
            CHECKSUM_LEN
        } else {
            0
        };
        Some(HEADER_LEN + data[3] as usize + checksum)
    }

    /// Decode one frame from the start of `data`; trailing bytes are ignored
    pub fn from_bytes(data: &[u8]) -> Result<Decoded, FrameError> {
        let Some(expected_len) = Self::expected_len(data) else {
            return Err(FrameError::MalformedFrame("header too short"));
        };

        let frame_type = FrameType::try_from(data[0] & 0x03)?;
        let subtype = (data[0] >> 2) & 0x3f;
        let control = FrameControl::from_bits(data[1]);
        let sequence = data[2];
        let payload_len = data[3] as usize;

        if data.len() < expected_len {
            return Ok(Decoded::Incomplete { expected_len });
        }

        let payload_end = HEADER_LEN + payload_len;
        if control.contains(FrameControl::CHECKSUM) {
            let received = u16::from_le_bytes([data[payload_end], data[payload_end + 1]]);
            let computed = crc16(&data[..payload_end]);
            if received != computed {
                return Err(FrameError::ChecksumMismatch {
                    received,
                    computed,
                    control,
                    payload_len,
                });
            }
        }

        Ok(Decoded::Complete(Frame {
            frame_type,
            subtype,
            control,
            sequence,
            payload: data[HEADER_LEN..payload_end].to_vec(),
        }))
    }
}
