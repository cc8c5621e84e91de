//! Async provisioning client
//!
//! Drives one [`Session`] over a [`Transport`]. Writes are serialized by
//! `&mut self`; at most one request awaits a correlated reply at a time.
//! Events that arrive while a request is waiting are kept for
//! [`Client::next_event`].

use std::collections::VecDeque;
use std::time::Instant;

use blufi_proto::command::{SecurityMode, SoftApAuthMode};
use blufi_proto::wifi::{OpMode, StoredConfigEntry, WifiScanEntry, WifiStatus};
use blufi_proto::{Command, DataSubtype, Event, Session, SessionError, SessionState};
use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::transport::{LinkEvent, Transport};

/// SoftAP settings, `None` leaves the device's current value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftApConfig {
    pub ssid: String,
    pub password: String,
    pub auth_mode: SoftApAuthMode,
    pub max_connections: Option<u8>,
    pub channel: Option<u8>,
}

pub struct Client<T> {
    transport: T,
    link: mpsc::Receiver<LinkEvent>,
    session: Session,
    config: ClientConfig,
    pending: VecDeque<Event>,
}

impl<T: Transport> Client<T> {
    /// Wrap a connected transport. Starts a fresh session.
    pub fn new(transport: T, link: mpsc::Receiver<LinkEvent>, config: ClientConfig) -> Self {
        let mut session = Session::with_options(config.session_options());
        session.on_connected();
        Self {
            transport,
            link,
            session,
            config,
            pending: VecDeque::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_secured(&self) -> bool {
        self.session.is_secured()
    }

    /// Encode and write one command
    pub async fn send(&mut self, command: &Command) -> Result<(), ClientError> {
        let bytes = self.session.encode(command)?;
        self.write(&bytes).await
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.transport
            .write(bytes)
            .await
            .map_err(ClientError::TransportWriteFailed)
    }

    /// Run the key exchange. On failure the session stays usable in the clear.
    pub async fn negotiate_security(&mut self) -> Result<(), ClientError> {
        let request = self.session.begin_negotiation(Instant::now())?;
        if let Err(e) = self.write(&request).await {
            self.session.cancel_negotiation();
            return Err(e);
        }

        let deadline = self
            .session
            .negotiation_deadline()
            .unwrap_or_else(|| Instant::now() + self.config.negotiation_timeout());

        loop {
            match tokio::time::timeout_at(deadline.into(), self.poll_link()).await {
                Err(_) => {
                    return Err(match self.session.check_timeout(deadline) {
                        Some(Event::NegotiationFailed(e)) => e.into(),
                        _ => SessionError::NegotiationTimeout.into(),
                    });
                }
                Ok(Some(Event::Secured)) => return Ok(()),
                Ok(Some(Event::NegotiationFailed(e))) => return Err(e.into()),
                Ok(Some(event)) => self.pending.push_back(event),
                Ok(None) => {
                    self.pending
                        .retain(|event| !matches!(event, Event::NegotiationFailed(_)));
                    return Err(SessionError::NegotiationAborted.into());
                }
            }
        }
    }

    /// Station credentials: SSID, password when non-empty, then connect.
    /// The connection outcome arrives later via a status query.
    pub async fn provision(&mut self, ssid: &str, password: &str) -> Result<(), ClientError> {
        info!("sending station credentials for {ssid:?}");
        self.send(&Command::StaSsid(ssid.to_string())).await?;
        self.step_delay().await;
        if !password.is_empty() {
            self.send(&Command::StaPassword(password.to_string())).await?;
            self.step_delay().await;
        }
        self.send(&Command::ConnectWifi).await
    }

    pub async fn configure_softap(&mut self, softap: &SoftApConfig) -> Result<(), ClientError> {
        info!("configuring softap {:?}", softap.ssid);
        let mut steps = vec![
            Command::SetOpMode(OpMode::SoftAp),
            Command::SoftApSsid(softap.ssid.clone()),
        ];
        if !softap.password.is_empty() {
            steps.push(Command::SoftApPassword(softap.password.clone()));
        }
        steps.push(Command::SoftApAuthMode(softap.auth_mode));
        if let Some(max) = softap.max_connections {
            steps.push(Command::SoftApMaxConnections(max));
        }
        if let Some(channel) = softap.channel {
            steps.push(Command::SoftApChannel(channel));
        }

        let last = steps.len() - 1;
        for (i, step) in steps.iter().enumerate() {
            self.send(step).await?;
            if i < last {
                self.step_delay().await;
            }
        }
        Ok(())
    }

    async fn step_delay(&self) {
        tokio::time::sleep(self.config.step_delay()).await;
    }

    pub async fn set_security_mode(&mut self, mode: SecurityMode) -> Result<(), ClientError> {
        self.send(&Command::SetSecurityMode(mode)).await
    }

    pub async fn set_op_mode(&mut self, mode: OpMode) -> Result<(), ClientError> {
        self.send(&Command::SetOpMode(mode)).await
    }

    pub async fn set_station_bssid(&mut self, bssid: [u8; 6]) -> Result<(), ClientError> {
        self.send(&Command::StaBssid(bssid)).await
    }

    pub async fn disconnect_wifi(&mut self) -> Result<(), ClientError> {
        self.send(&Command::DisconnectWifi).await
    }

    pub async fn deauthenticate(&mut self, stations: Vec<[u8; 6]>) -> Result<(), ClientError> {
        self.send(&Command::Deauthenticate(stations)).await
    }

    /// Ask the device to drop the BLE link
    pub async fn disconnect_link(&mut self) -> Result<(), ClientError> {
        self.send(&Command::DisconnectBle).await
    }

    pub async fn send_ack(&mut self, sequence: u8) -> Result<(), ClientError> {
        self.send(&Command::Ack(sequence)).await
    }

    /// Raw data frame such as a username or certificate chunk
    pub async fn send_data(&mut self, subtype: DataSubtype, data: Vec<u8>) -> Result<(), ClientError> {
        self.send(&Command::Data(subtype, data)).await
    }

    pub async fn query_wifi_status(&mut self) -> Result<WifiStatus, ClientError> {
        self.request(Command::GetWifiStatus, |event| match event {
            Event::WifiStatus(status) => Ok(status),
            other => Err(other),
        })
        .await
    }

    pub async fn query_wifi_list(&mut self) -> Result<Vec<WifiScanEntry>, ClientError> {
        self.request(Command::GetWifiList, |event| match event {
            Event::WifiList(list) => Ok(list),
            other => Err(other),
        })
        .await
    }

    /// `(major, minor)` protocol version of the device
    pub async fn query_version(&mut self) -> Result<(u8, u8), ClientError> {
        self.request(Command::GetVersion, |event| match event {
            Event::Version { major, minor } => Ok((major, minor)),
            other => Err(other),
        })
        .await
    }

    pub async fn query_stored_configs(&mut self) -> Result<Vec<StoredConfigEntry>, ClientError> {
        self.request(Command::ListStoredConfigs, |event| match event {
            Event::StoredConfigs(list) => Ok(list),
            other => Err(other),
        })
        .await
    }

    /// Returns whether the device reported success
    pub async fn delete_stored_config(&mut self, index: u8) -> Result<bool, ClientError> {
        self.request(Command::DeleteStoredConfig(index), |event| match event {
            Event::StoredConfigDeleted { ok } => Ok(ok),
            other => Err(other),
        })
        .await
    }

    async fn request<R>(
        &mut self,
        command: Command,
        mut accept: impl FnMut(Event) -> Result<R, Event>,
    ) -> Result<R, ClientError> {
        self.send(&command).await?;

        let timeout = self.config.response_timeout();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let event = match tokio::time::timeout_at(deadline, self.poll_link()).await {
                Err(_) => return Err(ClientError::ResponseTimeout(timeout)),
                Ok(None) => return Err(ClientError::LinkClosed),
                Ok(Some(event)) => event,
            };
            match accept(event) {
                Ok(reply) => return Ok(reply),
                Err(Event::DeviceError(code)) => {
                    return Err(SessionError::DeviceReportedError(code).into());
                }
                Err(Event::ProtocolError(e)) => {
                    warn!("{command:?} failed on a malformed reply: {e}");
                    return Err(ClientError::Session(e));
                }
                Err(other) => {
                    debug!("deferring {other:?} while waiting on {command:?}");
                    self.pending.push_back(other);
                }
            }
        }
    }

    /// Next event from the device, `None` once the link is gone and every
    /// event has been taken
    pub async fn next_event(&mut self) -> Option<Event> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        match self.poll_link().await {
            Some(event) => Some(event),
            None => self.pending.pop_front(),
        }
    }

    /// Read the link until the session yields an event. On link loss the
    /// session's disconnect events are queued and `None` is returned.
    async fn poll_link(&mut self) -> Option<Event> {
        loop {
            match self.link.recv().await {
                Some(LinkEvent::Notification(chunk)) => {
                    if let Some(event) = self.session.handle_notification(&chunk) {
                        return Some(event);
                    }
                }
                Some(LinkEvent::Disconnected) | None => {
                    if self.session.state() != SessionState::Disconnected {
                        warn!("link lost");
                        self.pending.extend(self.session.on_disconnected());
                    }
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use blufi_proto::security::{DhKeyPair, FrameCipher, IvMode, SessionKey};
    use blufi_proto::{Decoded, Frame, FrameControl, FrameKind};
    use blufi_proto::ControlSubtype;

    use super::*;
    use crate::transport::BoxError;

    struct MockTransport {
        to_device: mpsc::UnboundedSender<Vec<u8>>,
        reject_writes: bool,
    }

    impl Transport for MockTransport {
        async fn write(&mut self, data: &[u8]) -> Result<(), BoxError> {
            if self.reject_writes {
                return Err("write rejected".into());
            }
            self.to_device
                .send(data.to_vec())
                .map_err(|e| e.to_string().into())
        }
    }

    #[derive(Default, Clone, Copy)]
    struct Behaviour {
        ignore_negotiation: bool,
        ignore_queries: bool,
        fail_delete: bool,
        truncated_status: bool,
    }

    type Log = Arc<Mutex<Vec<(FrameKind, Vec<u8>)>>>;

    /// A BluFi device answering over an in-memory link
    struct SimDevice {
        link: mpsc::Sender<LinkEvent>,
        behaviour: Behaviour,
        cipher: Option<FrameCipher>,
        sequence: u8,
        ssid: String,
        received: Log,
    }

    impl SimDevice {
        async fn run(mut self, mut from_client: mpsc::UnboundedReceiver<Vec<u8>>) {
            while let Some(bytes) = from_client.recv().await {
                let Ok(Decoded::Complete(mut frame)) = Frame::from_bytes(&bytes) else {
                    panic!("client sent an undecodable frame");
                };
                if frame.control.contains(FrameControl::ENCRYPTED) {
                    let cipher = self.cipher.as_mut().unwrap();
                    cipher.decrypt(frame.sequence, &mut frame.payload).unwrap();
                }
                let kind = frame.kind().unwrap();
                self.received.lock().unwrap().push((kind, frame.payload.clone()));
                self.respond(kind, frame.payload).await;
            }
        }

        async fn respond(&mut self, kind: FrameKind, payload: Vec<u8>) {
            match kind {
                FrameKind::Data(DataSubtype::Negotiation) if !self.behaviour.ignore_negotiation => {
                    let keys = DhKeyPair::generate();
                    let shared = keys.shared_secret(&payload).unwrap();
                    let reply = self.frame(
                        FrameKind::Data(DataSubtype::Negotiation),
                        keys.public_key().to_vec(),
                        false,
                    );
                    for chunk in reply.chunks(20) {
                        self.notify(chunk.to_vec()).await;
                    }
                    self.cipher =
                        Some(FrameCipher::new(SessionKey::derive(&shared[..]), IvMode::Session).unwrap());
                }
                FrameKind::Data(DataSubtype::StaSsid) => {
                    self.ssid = String::from_utf8(payload).unwrap();
                }
                _ if self.behaviour.ignore_queries => {}
                FrameKind::Control(ControlSubtype::GetWifiStatus)
                    if self.behaviour.truncated_status =>
                {
                    self.reply(FrameKind::Data(DataSubtype::WifiReport), vec![0x01, 0x00])
                        .await;
                }
                FrameKind::Control(ControlSubtype::GetWifiStatus) => {
                    let mut status = vec![0x01, 0x00, 0x00, 0x02, self.ssid.len() as u8];
                    status.extend_from_slice(self.ssid.as_bytes());
                    self.reply(FrameKind::Data(DataSubtype::WifiReport), status).await;
                }
                FrameKind::Control(ControlSubtype::GetWifiList) => {
                    let mut list = vec![0x07, 0xc4];
                    list.extend_from_slice(b"MyWiFi");
                    list.extend_from_slice(&[0x05, 0x3c]);
                    list.extend_from_slice(b"home");
                    // an unrelated ack first, the client must skip past it
                    self.reply(FrameKind::Control(ControlSubtype::Ack), vec![0]).await;
                    self.reply(FrameKind::Data(DataSubtype::WifiList), list).await;
                }
                FrameKind::Control(ControlSubtype::GetVersion) => {
                    self.reply(FrameKind::Data(DataSubtype::VersionReply), vec![1, 3]).await;
                }
                FrameKind::Data(DataSubtype::CustomData) => match payload[0] {
                    0x01 => {
                        let list = vec![1, 0, 2, 3, b'A', b'B', b'C', 0, 4, b'h', b'o', b'm', b'e', 1, b'x'];
                        self.reply(FrameKind::Data(DataSubtype::CustomData), list).await;
                    }
                    _ if self.behaviour.fail_delete => {
                        self.reply(FrameKind::Data(DataSubtype::Error), vec![0x07]).await;
                    }
                    _ => {
                        self.reply(FrameKind::Data(DataSubtype::CustomData), vec![2, 0]).await;
                    }
                },
                _ => {}
            }
        }

        fn frame(&mut self, kind: FrameKind, mut payload: Vec<u8>, encrypt: bool) -> Vec<u8> {
            let sequence = self.sequence;
            self.sequence = self.sequence.wrapping_add(1);
            let mut control = FrameControl::DIRECTION;
            if encrypt && let Some(cipher) = self.cipher.as_mut() {
                cipher.encrypt(sequence, &mut payload).unwrap();
                control = control | FrameControl::ENCRYPTED | FrameControl::CHECKSUM;
            }
            let mut frame = Frame::new(kind, payload);
            frame.control = control;
            frame.sequence = sequence;
            frame.to_bytes().unwrap()
        }

        async fn reply(&mut self, kind: FrameKind, payload: Vec<u8>) {
            let bytes = self.frame(kind, payload, true);
            self.notify(bytes).await;
        }

        async fn notify(&self, bytes: Vec<u8>) {
            let _ = self.link.send(LinkEvent::Notification(bytes)).await;
        }
    }

    fn test_config() -> ClientConfig {
        ClientConfig {
            negotiation_timeout_ms: 200,
            step_delay_ms: 1,
            response_timeout_ms: 500,
            ..ClientConfig::default()
        }
    }

    fn start(behaviour: Behaviour) -> (Client<MockTransport>, Log, mpsc::Sender<LinkEvent>) {
        let (to_device, from_client) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = mpsc::channel(32);
        let received = Log::default();

        let device = SimDevice {
            link: link_tx.clone(),
            behaviour,
            cipher: None,
            sequence: 0,
            ssid: String::new(),
            received: received.clone(),
        };
        tokio::spawn(device.run(from_client));

        let transport = MockTransport {
            to_device,
            reject_writes: false,
        };
        (Client::new(transport, link_rx, test_config()), received, link_tx)
    }

    fn kinds(log: &Log) -> Vec<FrameKind> {
        log.lock().unwrap().iter().map(|(kind, _)| *kind).collect()
    }

    #[tokio::test]
    async fn provision_in_the_clear() {
        let (mut client, received, _link) = start(Behaviour::default());
        client.provision("home", "secret").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(
            kinds(&received),
            vec![
                FrameKind::Data(DataSubtype::StaSsid),
                FrameKind::Data(DataSubtype::StaPassword),
                FrameKind::Control(ControlSubtype::ConnectWifi),
            ]
        );
        assert_eq!(received.lock().unwrap()[1].1, b"secret");
        assert_eq!(client.session().tx_sequence(), 3);
    }

    #[tokio::test]
    async fn empty_password_is_not_sent() {
        let (mut client, received, _link) = start(Behaviour::default());
        client.provision("open-net", "").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            kinds(&received),
            vec![
                FrameKind::Data(DataSubtype::StaSsid),
                FrameKind::Control(ControlSubtype::ConnectWifi),
            ]
        );
    }

    #[tokio::test]
    async fn secured_provisioning_and_status() {
        let (mut client, received, _link) = start(Behaviour::default());
        client.negotiate_security().await.unwrap();
        assert!(client.is_secured());

        client.provision("home", "secret").await.unwrap();
        let status = client.query_wifi_status().await.unwrap();
        assert_eq!(status.ssid.as_deref(), Some("home"));
        assert!(status.connection_result.is_success());

        let log = received.lock().unwrap();
        assert_eq!(log[1], (FrameKind::Data(DataSubtype::StaSsid), b"home".to_vec()));
        assert_eq!(log[2], (FrameKind::Data(DataSubtype::StaPassword), b"secret".to_vec()));
    }

    #[tokio::test]
    async fn negotiation_timeout() {
        let behaviour = Behaviour {
            ignore_negotiation: true,
            ..Behaviour::default()
        };
        let (mut client, _received, _link) = start(behaviour);
        let err = client.negotiate_security().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Session(SessionError::NegotiationTimeout)
        ));
        assert_eq!(client.session().state(), SessionState::Connected);

        // still usable in the clear
        assert_eq!(client.query_version().await.unwrap(), (1, 3));
    }

    #[tokio::test]
    async fn negotiation_aborted_by_link_loss() {
        let behaviour = Behaviour {
            ignore_negotiation: true,
            ..Behaviour::default()
        };
        let (mut client, _received, link) = start(behaviour);
        let negotiation = client.negotiate_security();
        link.send(LinkEvent::Disconnected).await.unwrap();
        assert!(matches!(
            negotiation.await,
            Err(ClientError::Session(SessionError::NegotiationAborted))
        ));
        assert!(matches!(client.next_event().await, Some(Event::Disconnected)));
        assert!(matches!(
            client.send(&Command::GetVersion).await,
            Err(ClientError::Session(SessionError::NotConnected))
        ));
    }

    #[tokio::test]
    async fn queries() {
        let (mut client, _received, _link) = start(Behaviour::default());

        let list = client.query_wifi_list().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].ssid, "MyWiFi");
        assert_eq!(list[0].signal_strength_dbm, -60);
        assert!(matches!(client.next_event().await, Some(Event::Ack { sequence: 0 })));

        assert_eq!(client.query_version().await.unwrap(), (1, 3));

        let stored = client.query_stored_configs().await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].ssid, "home");
        assert_eq!(stored[1].password, "x");

        assert!(client.delete_stored_config(1).await.unwrap());
    }

    #[tokio::test]
    async fn device_error_fails_the_request() {
        let behaviour = Behaviour {
            fail_delete: true,
            ..Behaviour::default()
        };
        let (mut client, _received, _link) = start(behaviour);
        assert!(matches!(
            client.delete_stored_config(0).await,
            Err(ClientError::Session(SessionError::DeviceReportedError(
                blufi_proto::DeviceErrorCode::ReadParam
            )))
        ));
    }

    #[tokio::test]
    async fn malformed_reply_fails_without_waiting() {
        let behaviour = Behaviour {
            truncated_status: true,
            ..Behaviour::default()
        };
        let (mut client, _received, _link) = start(behaviour);
        let started = tokio::time::Instant::now();
        assert!(matches!(
            client.query_wifi_status().await,
            Err(ClientError::Session(SessionError::Payload(
                blufi_proto::PayloadError::Truncated(_)
            )))
        ));
        assert!(started.elapsed() < test_config().response_timeout());
        // the link is still usable afterwards
        assert_eq!(client.query_version().await.unwrap(), (1, 3));
    }

    #[tokio::test]
    async fn response_timeout() {
        let behaviour = Behaviour {
            ignore_queries: true,
            ..Behaviour::default()
        };
        let (mut client, _received, _link) = start(behaviour);
        assert!(matches!(
            client.query_version().await,
            Err(ClientError::ResponseTimeout(_))
        ));
    }

    #[tokio::test]
    async fn write_failure_is_reported() {
        let (to_device, _from_client) = mpsc::unbounded_channel();
        let (_link_tx, link_rx) = mpsc::channel(1);
        let transport = MockTransport {
            to_device,
            reject_writes: true,
        };
        let mut client = Client::new(transport, link_rx, test_config());

        assert!(matches!(
            client.provision("home", "secret").await,
            Err(ClientError::TransportWriteFailed(_))
        ));
        assert!(matches!(
            client.negotiate_security().await,
            Err(ClientError::TransportWriteFailed(_))
        ));
        assert_eq!(client.session().state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn softap_sequence() {
        let (mut client, received, _link) = start(Behaviour::default());
        client
            .configure_softap(&SoftApConfig {
                ssid: "setup".to_string(),
                password: String::new(),
                auth_mode: SoftApAuthMode::Open,
                max_connections: Some(4),
                channel: None,
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let log = received.lock().unwrap();
        assert_eq!(
            log.iter().map(|(kind, _)| *kind).collect::<Vec<_>>(),
            vec![
                FrameKind::Control(ControlSubtype::SetOpMode),
                FrameKind::Data(DataSubtype::SoftApSsid),
                FrameKind::Data(DataSubtype::SoftApAuthMode),
                FrameKind::Data(DataSubtype::SoftApMaxConnections),
            ]
        );
        assert_eq!(log[0].1, vec![0x02]);
        assert_eq!(log[3].1, vec![4]);
    }
}
