//! Outbound commands and their payload encodings

use crate::wifi::{CUSTOM_OP_DELETE, CUSTOM_OP_LIST, OpMode};
use crate::{ControlSubtype, DataSubtype, FrameKind};

/// Checksum/encrypt flags for one frame class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecurityFlags {
    pub checksum: bool,
    pub encrypt: bool,
}

impl SecurityFlags {
    fn bits(self) -> u8 {
        (self.checksum as u8) | ((self.encrypt as u8) << 1)
    }
}

/// Security mode byte: high nibble for control frames, low nibble for data frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecurityMode {
    pub control: SecurityFlags,
    pub data: SecurityFlags,
}

impl SecurityMode {
    pub fn to_byte(self) -> u8 {
        (self.control.bits() << 4) | self.data.bits()
    }
}

/// SoftAP authentication mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftApAuthMode {
    Open = 0x00,
    Wep = 0x01,
    WpaPsk = 0x02,
    Wpa2Psk = 0x03,
    WpaWpa2Psk = 0x04,
}

/// Every frame a client may send, apart from key negotiation which the
/// session drives itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Acknowledge the frame with this sequence number
    Ack(u8),
    SetSecurityMode(SecurityMode),
    SetOpMode(OpMode),
    ConnectWifi,
    DisconnectWifi,
    GetWifiStatus,
    /// Kick the listed stations off the SoftAP
    Deauthenticate(Vec<[u8; 6]>),
    GetVersion,
    DisconnectBle,
    GetWifiList,
    StaBssid([u8; 6]),
    StaSsid(String),
    StaPassword(String),
    SoftApSsid(String),
    SoftApPassword(String),
    SoftApMaxConnections(u8),
    SoftApAuthMode(SoftApAuthMode),
    SoftApChannel(u8),
    /// Raw data frame, e.g. username or certificate material
    Data(DataSubtype, Vec<u8>),
    ListStoredConfigs,
    DeleteStoredConfig(u8),
}

impl Command {
    pub fn kind(&self) -> FrameKind {
        use Command::*;
        match self {
            Ack(_) => FrameKind::Control(ControlSubtype::Ack),
            SetSecurityMode(_) => FrameKind::Control(ControlSubtype::SetSecurityMode),
            SetOpMode(_) => FrameKind::Control(ControlSubtype::SetOpMode),
            ConnectWifi => FrameKind::Control(ControlSubtype::ConnectWifi),
            DisconnectWifi => FrameKind::Control(ControlSubtype::DisconnectWifi),
            GetWifiStatus => FrameKind::Control(ControlSubtype::GetWifiStatus),
            Deauthenticate(_) => FrameKind::Control(ControlSubtype::Deauthenticate),
            GetVersion => FrameKind::Control(ControlSubtype::GetVersion),
            DisconnectBle => FrameKind::Control(ControlSubtype::DisconnectBle),
            GetWifiList => FrameKind::Control(ControlSubtype::GetWifiList),
            StaBssid(_) => FrameKind::Data(DataSubtype::StaBssid),
            StaSsid(_) => FrameKind::Data(DataSubtype::StaSsid),
            StaPassword(_) => FrameKind::Data(DataSubtype::StaPassword),
            SoftApSsid(_) => FrameKind::Data(DataSubtype::SoftApSsid),
            SoftApPassword(_) => FrameKind::Data(DataSubtype::SoftApPassword),
            SoftApMaxConnections(_) => FrameKind::Data(DataSubtype::SoftApMaxConnections),
            SoftApAuthMode(_) => FrameKind::Data(DataSubtype::SoftApAuthMode),
            SoftApChannel(_) => FrameKind::Data(DataSubtype::SoftApChannel),
            Data(subtype, _) => FrameKind::Data(*subtype),
            ListStoredConfigs | DeleteStoredConfig(_) => FrameKind::Data(DataSubtype::CustomData),
        }
    }

    pub fn payload(&self) -> Vec<u8> {
        use Command::*;
        match self {
            Ack(sequence) => vec![*sequence],
            SetSecurityMode(mode) => vec![mode.to_byte()],
            SetOpMode(mode) => vec![mode.code()],
            ConnectWifi | DisconnectWifi | GetWifiStatus | GetVersion | DisconnectBle
            | GetWifiList => Vec::new(),
            Deauthenticate(stations) => stations.concat(),
            StaBssid(bssid) => bssid.to_vec(),
            StaSsid(s) | StaPassword(s) | SoftApSsid(s) | SoftApPassword(s) => s.as_bytes().to_vec(),
            SoftApMaxConnections(n) | SoftApChannel(n) => vec![*n],
            SoftApAuthMode(mode) => vec![*mode as u8],
            Data(_, bytes) => bytes.clone(),
            ListStoredConfigs => vec![CUSTOM_OP_LIST],
            DeleteStoredConfig(index) => vec![CUSTOM_OP_DELETE, *index],
        }
    }
}
