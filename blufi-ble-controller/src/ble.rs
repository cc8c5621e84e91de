//! btleplug transport for BluFi devices
//!
//! Scan, find and connect. A connection discovers the BluFi write (FF01) and
//! notify (FF02) characteristics, subscribes to notifications and forwards
//! them, plus link loss, on a `LinkEvent` channel.

use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use blufi_proto::ble::{NOTIFY_UUID, SERVICE_UUID, WRITE_UUID};

use crate::error::ClientError;
use crate::transport::{BoxError, LinkEvent, Transport};

const LINK_EVENT_CAPACITY: usize = 64;

/// A discovered BLE device
#[derive(Debug, Clone)]
pub struct BlufiDevice {
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
    /// Advertises the BluFi service or matches the name prefix
    pub is_blufi: bool,
}

fn parse_uuid(s: &str) -> Result<Uuid, ClientError> {
    Ok(Uuid::parse_str(s)?)
}

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter, ClientError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(ClientError::NoAdapter)
}

/// Scan for BLE devices for `duration`
pub async fn scan(
    adapter: &Adapter,
    duration: Duration,
    name_prefix: &str,
) -> Result<Vec<BlufiDevice>, ClientError> {
    let service = parse_uuid(SERVICE_UUID)?;

    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;

    let peripherals = adapter.peripherals().await?;
    let mut devices = Vec::new();

    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await? {
            let name = props.local_name.unwrap_or_else(|| "Unknown".to_string());
            let is_blufi = name.starts_with(name_prefix) || props.services.contains(&service);
            devices.push(BlufiDevice {
                name,
                address: peripheral.address().to_string(),
                rssi: props.rssi,
                is_blufi,
            });
        }
    }

    adapter.stop_scan().await?;
    Ok(devices)
}

/// Find a device by name/address fragment, or the first one whose name starts
/// with `name_prefix`
pub async fn find_device(
    adapter: &Adapter,
    target: Option<&str>,
    name_prefix: &str,
    duration: Duration,
) -> Result<Peripheral, ClientError> {
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;

    let peripherals = adapter.peripherals().await?;

    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await? {
            let name = props.local_name.unwrap_or_default();
            let addr = peripheral.address().to_string();

            let matches = match target {
                Some(t) => name.contains(t) || addr.contains(t),
                None => name.starts_with(name_prefix),
            };

            if matches {
                adapter.stop_scan().await?;
                info!("found device {name} ({addr})");
                return Ok(peripheral);
            }
        }
    }

    adapter.stop_scan().await?;
    Err(ClientError::DeviceNotFound(
        target.unwrap_or(name_prefix).to_string(),
    ))
}

/// The write side of a connected BluFi peripheral
pub struct BleTransport {
    peripheral: Peripheral,
    write_char: Characteristic,
}

impl BleTransport {
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

impl Transport for BleTransport {
    async fn write(&mut self, data: &[u8]) -> Result<(), BoxError> {
        self.peripheral
            .write(&self.write_char, data, WriteType::WithResponse)
            .await?;
        Ok(())
    }
}

/// Connect, discover the BluFi characteristics and start forwarding
/// notifications
pub async fn connect(
    adapter: &Adapter,
    peripheral: Peripheral,
) -> Result<(BleTransport, mpsc::Receiver<LinkEvent>), ClientError> {
    peripheral.connect().await?;
    peripheral.discover_services().await?;

    let write_uuid = parse_uuid(WRITE_UUID)?;
    let notify_uuid = parse_uuid(NOTIFY_UUID)?;

    let characteristics = peripheral.characteristics();
    let write_char = characteristics
        .iter()
        .find(|c| c.uuid == write_uuid)
        .cloned()
        .ok_or(ClientError::CharacteristicNotFound(write_uuid))?;
    let notify_char = characteristics
        .iter()
        .find(|c| c.uuid == notify_uuid)
        .cloned()
        .ok_or(ClientError::CharacteristicNotFound(notify_uuid))?;

    // Listen for link loss before subscribing so no disconnect goes unseen
    let mut central_events = adapter.events().await?;
    let mut notifications = peripheral.notifications().await?;
    peripheral.subscribe(&notify_char).await?;

    let (tx, rx) = mpsc::channel(LINK_EVENT_CAPACITY);

    let notify_tx = tx.clone();
    tokio::spawn(async move {
        while let Some(notification) = notifications.next().await {
            if notification.uuid != notify_uuid {
                continue;
            }
            debug!("notification: {} bytes", notification.value.len());
            if notify_tx
                .send(LinkEvent::Notification(notification.value))
                .await
                .is_err()
            {
                return;
            }
        }
        let _ = notify_tx.send(LinkEvent::Disconnected).await;
    });

    let id = peripheral.id();
    tokio::spawn(async move {
        while let Some(event) = central_events.next().await {
            if let CentralEvent::DeviceDisconnected(gone) = event
                && gone == id
            {
                warn!("device disconnected");
                let _ = tx.send(LinkEvent::Disconnected).await;
                return;
            }
        }
    });

    info!("connected to {}", peripheral.address());
    Ok((
        BleTransport {
            peripheral,
            write_char,
        },
        rx,
    ))
}
