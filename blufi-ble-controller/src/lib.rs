//! BluFi BLE Controller
//!
//! Async client for provisioning Wi-Fi credentials onto BluFi devices.
//!
//! # Example
//!
//! ```ignore
//! use blufi_ble_controller::{Client, ClientConfig, ble};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::default();
//!     let adapter = ble::get_adapter().await?;
//!
//!     let device = ble::find_device(&adapter, None, &config.name_prefix, config.scan_duration()).await?;
//!     let (transport, link) = ble::connect(&adapter, device).await?;
//!
//!     let mut client = Client::new(transport, link, config);
//!     client.negotiate_security().await?;
//!     client.provision("MySSID", "MyPassword").await?;
//!
//!     let status = client.query_wifi_status().await?;
//!     println!("{:?}", status.connection_result);
//!     Ok(())
//! }
//! ```

pub mod ble;
mod client;
mod config;
mod error;
pub mod transport;

pub use client::{Client, SoftApConfig};
pub use config::{ClientConfig, Keystream, blufi_home};
pub use error::{ClientError, ConfigError};
pub use transport::{LinkEvent, Transport};
