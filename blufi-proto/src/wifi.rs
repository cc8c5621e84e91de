//! Wi-Fi payloads: status reports, scan lists and the stored-config sub-protocol

use log::{debug, warn};

use crate::{DataSubtype, PayloadError};

/// Device operating mode; codes past 0x03 are kept as reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    Null,
    Station,
    SoftAp,
    StationSoftAp,
    Other(u8),
}

impl OpMode {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => OpMode::Null,
            0x01 => OpMode::Station,
            0x02 => OpMode::SoftAp,
            0x03 => OpMode::StationSoftAp,
            other => OpMode::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            OpMode::Null => 0x00,
            OpMode::Station => 0x01,
            OpMode::SoftAp => 0x02,
            OpMode::StationSoftAp => 0x03,
            OpMode::Other(code) => code,
        }
    }
}

/// Station connection result as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationState {
    Connected,
    Disconnected,
    Connecting,
    ConnectedNoIp,
    Other(u8),
}

impl StationState {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => StationState::Connected,
            0x01 => StationState::Disconnected,
            0x02 => StationState::Connecting,
            0x03 => StationState::ConnectedNoIp,
            other => StationState::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            StationState::Connected => 0x00,
            StationState::Disconnected => 0x01,
            StationState::Connecting => 0x02,
            StationState::ConnectedNoIp => 0x03,
            StationState::Other(code) => code,
        }
    }

    pub fn is_success(self) -> bool {
        self == StationState::Connected
    }
}

/// Wi-Fi status report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiStatus {
    pub op_mode: OpMode,
    pub connection_result: StationState,
    pub softap_client_count: u8,
    pub ssid: Option<String>,
    pub password: Option<String>,
    pub bssid: Option<[u8; 6]>,
}

impl WifiStatus {
    /// `[opmode, sta_state, softap_conn_num]` followed by `[type, len, bytes]`
    /// extension records. Unknown extensions are skipped by length.
    pub fn from_bytes(data: &[u8]) -> Result<Self, PayloadError> {
        if data.len() < 3 {
            return Err(PayloadError::Truncated("wifi status"));
        }

        let mut status = WifiStatus {
            op_mode: OpMode::from_code(data[0]),
            connection_result: StationState::from_code(data[1]),
            softap_client_count: data[2],
            ssid: None,
            password: None,
            bssid: None,
        };

        let mut pos = 3;
        while pos + 2 <= data.len() {
            let ext_type = data[pos];
            let len = data[pos + 1] as usize;
            pos += 2;
            if pos + len > data.len() {
                warn!("wifi status extension 0x{ext_type:02x} overruns payload");
                break;
            }
            let value = &data[pos..pos + len];
            pos += len;

            match DataSubtype::try_from(ext_type) {
                Ok(DataSubtype::StaBssid) => match <[u8; 6]>::try_from(value) {
                    Ok(bssid) => status.bssid = Some(bssid),
                    Err(_) => warn!("ignoring {len} byte bssid"),
                },
                Ok(DataSubtype::StaSsid) => status.ssid = Some(bytes_to_string(value)),
                Ok(DataSubtype::StaPassword) => status.password = Some(bytes_to_string(value)),
                _ => debug!("skipping wifi status extension 0x{ext_type:02x}"),
            }
        }
        Ok(status)
    }
}

/// `aa:bb:cc:dd:ee:ff`
pub fn format_bssid(bssid: &[u8; 6]) -> String {
    bssid
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// One access point from a scan report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiScanEntry {
    pub ssid: String,
    pub signal_strength_dbm: i8,
    /// The scan report carries no auth type; always true
    pub is_secure: bool,
}

/// Parse a scan report of `[ssid_len + 1, rssi, ssid...]` records.
///
/// The length byte counts a NUL terminator the firmware never sends. An empty
/// or over-long SSID, or a truncated record, ends the list.
pub fn parse_scan_list(data: &[u8]) -> Vec<WifiScanEntry> {
    let mut entries = Vec::new();
    let mut pos = 0;

    while pos + 2 <= data.len() {
        let raw_len = data[pos];
        let raw_rssi = data[pos + 1];
        pos += 2;

        let ssid_len = raw_len.saturating_sub(1) as usize;
        if ssid_len == 0 || ssid_len > 32 || pos + ssid_len > data.len() {
            debug!("scan list ends at offset {} (ssid length {raw_len})", pos - 2);
            break;
        }
        let ssid = bytes_to_string(&data[pos..pos + ssid_len]);
        pos += ssid_len;

        // Firmware quirk: bytes above 127 are two's complement, smaller
        // values are magnitudes.
        let signal_strength_dbm = if raw_rssi > 127 {
            raw_rssi as i8
        } else {
            -(raw_rssi as i8)
        };

        entries.push(WifiScanEntry {
            ssid,
            signal_strength_dbm,
            is_secure: true,
        });
    }
    entries
}

pub const CUSTOM_OP_LIST: u8 = 0x01;
pub const CUSTOM_OP_DELETE: u8 = 0x02;

/// Stored Wi-Fi credential on the device, in device storage order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredConfigEntry {
    pub index: u8,
    pub ssid: String,
    pub password: String,
}

/// Reply carried in a custom-data frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomReply {
    StoredConfigs(Vec<StoredConfigEntry>),
    Deleted { ok: bool },
    Unknown { op: u8, status: u8, body: Vec<u8> },
}

/// `[op, status, body...]`
pub fn parse_custom_reply(data: &[u8]) -> Result<CustomReply, PayloadError> {
    if data.len() < 2 {
        return Err(PayloadError::Truncated("custom data"));
    }
    let (op, status) = (data[0], data[1]);

    Ok(match op {
        CUSTOM_OP_LIST if status == 0 && data.len() > 2 => {
            CustomReply::StoredConfigs(parse_stored_configs(&data[2..]))
        }
        CUSTOM_OP_LIST => CustomReply::StoredConfigs(Vec::new()),
        CUSTOM_OP_DELETE => CustomReply::Deleted { ok: status == 0 },
        op => CustomReply::Unknown {
            op,
            status,
            body: data[2..].to_vec(),
        },
    })
}

/// `[count, (ssid_len, ssid, pwd_len, pwd){count}]`; a truncated entry stops
/// the parse and keeps what was already read.
fn parse_stored_configs(data: &[u8]) -> Vec<StoredConfigEntry> {
    let count = data[0];
    let mut entries = Vec::with_capacity(count as usize);
    let mut pos = 1;

    for index in 0..count {
        let Some(ssid) = read_len_prefixed(data, &mut pos) else {
            break;
        };
        let Some(password) = read_len_prefixed(data, &mut pos) else {
            break;
        };
        entries.push(StoredConfigEntry {
            index,
            ssid: bytes_to_string(ssid),
            password: bytes_to_string(password),
        });
    }

    if entries.len() < count as usize {
        warn!("stored config list truncated: {}/{count} entries", entries.len());
    }
    entries
}

fn read_len_prefixed<'a>(data: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    let len = *data.get(*pos)? as usize;
    let start = *pos + 1;
    let value = data.get(start..start + len)?;
    *pos = start + len;
    Some(value)
}

fn bytes_to_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_entry() {
        let payload = [0x09, 0xc4, b'M', b'y', b'W', b'i', b'F', b'i', b'!', b'!'];
        let list = parse_scan_list(&payload);
        assert_eq!(
            list[0],
            WifiScanEntry {
                ssid: "MyWiFi!!".to_string(),
                signal_strength_dbm: -60,
                is_secure: true,
            }
        );
    }

    #[test]
    fn scan_list_multiple_and_rssi_convention() {
        let mut payload = vec![0x07, 0xc4];
        payload.extend_from_slice(b"MyWiFi");
        payload.extend_from_slice(&[0x05, 0x3c]);
        payload.extend_from_slice(b"home");
        let list = parse_scan_list(&payload);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].ssid, "MyWiFi");
        assert_eq!(list[0].signal_strength_dbm, -60);
        assert_eq!(list[1].ssid, "home");
        assert_eq!(list[1].signal_strength_dbm, -60);
    }

    #[test]
    fn scan_list_stops_at_bad_entry() {
        let mut payload = vec![0x05, 0xb0];
        payload.extend_from_slice(b"good");
        payload.extend_from_slice(&[0x01, 0xb0, 0x05, 0xb0]);
        payload.extend_from_slice(b"lost");
        assert_eq!(parse_scan_list(&payload).len(), 1);

        let mut payload = vec![34, 0xb0];
        payload.extend_from_slice(&[b'x'; 33]);
        assert!(parse_scan_list(&payload).is_empty());

        assert!(parse_scan_list(&[0x09, 0xc4, b'M', b'y']).is_empty());
    }

    #[test]
    fn status_with_ssid() {
        let payload = [1, 0, 0, 0x02, 0x06, b'M', b'y', b'S', b'S', b'I', b'D'];
        let status = WifiStatus::from_bytes(&payload).unwrap();
        assert_eq!(status.op_mode, OpMode::Station);
        assert_eq!(status.connection_result.code(), 0);
        assert!(status.connection_result.is_success());
        assert_eq!(status.softap_client_count, 0);
        assert_eq!(status.ssid.as_deref(), Some("MySSID"));
        assert_eq!(status.password, None);
    }

    #[test]
    fn status_extensions() {
        let payload = [
            3, 1, 2, //
            0x01, 0x06, 0x24, 0x0a, 0xc4, 0x00, 0x01, 0x10, //
            0x0f, 0x02, 0xff, 0xff, //
            0x03, 0x04, b'p', b'a', b's', b's',
        ];
        let status = WifiStatus::from_bytes(&payload).unwrap();
        assert_eq!(status.op_mode, OpMode::StationSoftAp);
        assert_eq!(status.connection_result, StationState::Disconnected);
        assert_eq!(status.softap_client_count, 2);
        assert_eq!(format_bssid(&status.bssid.unwrap()), "24:0a:c4:00:01:10");
        assert_eq!(status.password.as_deref(), Some("pass"));
    }

    #[test]
    fn status_errors() {
        assert!(matches!(
            WifiStatus::from_bytes(&[1, 0]),
            Err(PayloadError::Truncated(_))
        ));
        let status = WifiStatus::from_bytes(&[9, 0, 0]).unwrap();
        assert_eq!(status.op_mode, OpMode::Other(9));
        assert_eq!(status.op_mode.code(), 9);
        let status = WifiStatus::from_bytes(&[1, 0, 0, 0x02, 0x09, b'x']).unwrap();
        assert_eq!(status.ssid, None);
    }

    #[test]
    fn stored_configs() {
        let payload = [
            1, 0, 2, 3, b'A', b'B', b'C', 0, 5, b'H', b'e', b'l', b'l', b'o', 4, b'1', b'2', b'3',
            b'4',
        ];
        let CustomReply::StoredConfigs(list) = parse_custom_reply(&payload).unwrap() else {
            panic!("expected stored configs");
        };
        assert_eq!(
            list,
            vec![
                StoredConfigEntry {
                    index: 0,
                    ssid: "ABC".to_string(),
                    password: String::new(),
                },
                StoredConfigEntry {
                    index: 1,
                    ssid: "Hello".to_string(),
                    password: "1234".to_string(),
                },
            ]
        );
    }

    #[test]
    fn stored_configs_truncated_keeps_parsed_entries() {
        let payload = [1, 0, 3, 1, b'A', 1, b'a', 5, b'B', b'B'];
        let CustomReply::StoredConfigs(list) = parse_custom_reply(&payload).unwrap() else {
            panic!("expected stored configs");
        };
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].ssid, "A");
    }

    #[test]
    fn custom_replies() {
        assert_eq!(
            parse_custom_reply(&[1, 1]).unwrap(),
            CustomReply::StoredConfigs(vec![])
        );
        assert_eq!(parse_custom_reply(&[1, 0]).unwrap(), CustomReply::StoredConfigs(vec![]));
        assert_eq!(parse_custom_reply(&[2, 0]).unwrap(), CustomReply::Deleted { ok: true });
        assert_eq!(parse_custom_reply(&[2, 3]).unwrap(), CustomReply::Deleted { ok: false });
        assert!(matches!(
            parse_custom_reply(&[7, 0, 1]).unwrap(),
            CustomReply::Unknown { op: 7, .. }
        ));
        assert!(parse_custom_reply(&[1]).is_err());
    }
}
