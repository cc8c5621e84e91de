//! BLE provisioning tool for BluFi devices
//!
//! Scans for BluFi devices and configures their Wi-Fi over BLE.

use std::path::{Path, PathBuf};

use blufi_ble_controller::ble::{self, BleTransport};
use blufi_ble_controller::{Client, ClientConfig, SoftApConfig};
use blufi_proto::command::SoftApAuthMode;
use blufi_proto::wifi::{OpMode, StationState, format_bssid};
use clap::{Parser, Subcommand, ValueEnum};
use log::warn;

#[derive(Parser)]
#[command(name = "blufi-ble")]
#[command(about = "BLE provisioning tool for BluFi devices")]
struct Cli {
    /// Config file (defaults to $BLUFI_HOME/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Device name or address to connect to
    #[arg(short, long, global = true)]
    device: Option<String>,
    /// Negotiate an encrypted session before sending commands
    #[arg(short, long, global = true)]
    secure: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for BluFi devices
    Scan {
        /// Scan duration in seconds
        #[arg(short = 't', long)]
        duration: Option<u64>,
    },
    /// Show the device's Wi-Fi status
    Status,
    /// List access points the device can see
    WifiList,
    /// Send station Wi-Fi credentials to a device
    Provision {
        /// Network name; read from --file when omitted
        ssid: Option<String>,
        #[arg(short, long, default_value = "")]
        password: String,
        /// WiFi credentials file (SSID on line 1, password on line 2)
        #[arg(short, long, default_value = "wifi_credentials.txt")]
        file: PathBuf,
    },
    /// Configure the device's access point
    Softap {
        ssid: String,
        #[arg(short, long, default_value = "")]
        password: String,
        #[arg(long, value_enum, default_value_t = AuthMode::Wpa2)]
        auth: AuthMode,
        #[arg(long)]
        max_connections: Option<u8>,
        #[arg(long)]
        channel: Option<u8>,
    },
    /// List Wi-Fi configurations stored on the device
    Stored,
    /// Delete a stored Wi-Fi configuration by index
    Forget { index: u8 },
    /// Show the device's protocol version
    Version,
    /// Disconnect the device from its access point
    DisconnectWifi,
}

#[derive(Clone, Copy, ValueEnum)]
enum AuthMode {
    Open,
    Wep,
    Wpa,
    Wpa2,
    WpaWpa2,
}

impl From<AuthMode> for SoftApAuthMode {
    fn from(mode: AuthMode) -> Self {
        match mode {
            AuthMode::Open => SoftApAuthMode::Open,
            AuthMode::Wep => SoftApAuthMode::Wep,
            AuthMode::Wpa => SoftApAuthMode::WpaPsk,
            AuthMode::Wpa2 => SoftApAuthMode::Wpa2Psk,
            AuthMode::WpaWpa2 => SoftApAuthMode::WpaWpa2Psk,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();
    let config = ClientConfig::load_or_default(cli.config.as_deref())?;

    if let Commands::Scan { duration } = cli.command {
        return scan_devices(&config, duration).await;
    }

    let mut client = connect(&config, cli.device.as_deref()).await?;
    if cli.secure {
        println!("Negotiating encryption...");
        client.negotiate_security().await?;
        println!("Session secured.");
    }

    let result = run(&mut client, cli.command).await;
    if let Err(e) = client.transport().disconnect().await {
        warn!("BLE disconnect failed: {e}");
    }
    result
}

async fn run(
    client: &mut Client<BleTransport>,
    command: Commands,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Scan { .. } => {}
        Commands::Status => {
            let status = client.query_wifi_status().await?;
            println!("Mode: {}", op_mode_name(status.op_mode));
            println!("Station: {}", station_state_name(status.connection_result));
            if let Some(ssid) = &status.ssid {
                println!("  SSID: {}", ssid);
            }
            if let Some(bssid) = &status.bssid {
                println!("  BSSID: {}", format_bssid(bssid));
            }
            println!("SoftAP clients: {}", status.softap_client_count);
        }
        Commands::WifiList => {
            let mut list = client.query_wifi_list().await?;
            list.sort_by_key(|entry| std::cmp::Reverse(entry.signal_strength_dbm));
            println!("Found {} networks:", list.len());
            for entry in list {
                println!("  {:<32} {} dBm", entry.ssid, entry.signal_strength_dbm);
            }
        }
        Commands::Provision {
            ssid,
            password,
            file,
        } => {
            let (ssid, password) = match ssid {
                Some(ssid) => (ssid, password),
                None => read_wifi_credentials(&file)?,
            };
            println!("Sending WiFi credentials...");
            println!("  SSID: {}", ssid);
            client.provision(&ssid, &password).await?;
            println!("WiFi credentials sent! Use `status` to check the connection.");
        }
        Commands::Softap {
            ssid,
            password,
            auth,
            max_connections,
            channel,
        } => {
            client
                .configure_softap(&SoftApConfig {
                    ssid,
                    password,
                    auth_mode: auth.into(),
                    max_connections,
                    channel,
                })
                .await?;
            println!("SoftAP configuration sent.");
        }
        Commands::Stored => {
            let stored = client.query_stored_configs().await?;
            if stored.is_empty() {
                println!("No stored WiFi configurations.");
            }
            for entry in stored {
                println!("  [{}] {}", entry.index, entry.ssid);
            }
        }
        Commands::Forget { index } => {
            if client.delete_stored_config(index).await? {
                println!("Deleted stored configuration {}.", index);
            } else {
                println!("Device refused to delete configuration {}.", index);
            }
        }
        Commands::Version => {
            let (major, minor) = client.query_version().await?;
            println!("BluFi version {}.{}", major, minor);
        }
        Commands::DisconnectWifi => {
            client.disconnect_wifi().await?;
            println!("Disconnect request sent.");
        }
    }
    Ok(())
}

fn read_wifi_credentials(file: &Path) -> Result<(String, String), Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(file)?;
    let mut lines = content.lines();
    let ssid = lines.next().ok_or("Missing SSID in credentials file")?.trim().to_string();
    let password = lines.next().unwrap_or_default().trim().to_string();
    Ok((ssid, password))
}

async fn scan_devices(
    config: &ClientConfig,
    duration: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let secs = duration.unwrap_or(config.scan_secs);
    println!("Scanning for BluFi devices ({} seconds)...", secs);

    let adapter = ble::get_adapter().await?;
    let devices = ble::scan(
        &adapter,
        std::time::Duration::from_secs(secs),
        &config.name_prefix,
    )
    .await?;

    println!("\nFound {} devices:", devices.len());
    for device in devices {
        let rssi = device
            .rssi
            .map(|r| format!("{} dBm", r))
            .unwrap_or_else(|| "N/A".to_string());
        let marker = if device.is_blufi { " [BLUFI]" } else { "" };
        println!("  {} ({}) RSSI: {}{}", device.name, device.address, rssi, marker);
    }
    Ok(())
}

async fn connect(
    config: &ClientConfig,
    target: Option<&str>,
) -> Result<Client<BleTransport>, Box<dyn std::error::Error>> {
    println!("Scanning for BluFi devices...");
    let adapter = ble::get_adapter().await?;
    let device =
        ble::find_device(&adapter, target, &config.name_prefix, config.scan_duration()).await?;

    println!("Connecting...");
    let (transport, link) = ble::connect(&adapter, device).await?;
    println!("Connected!");
    Ok(Client::new(transport, link, config.clone()))
}

fn op_mode_name(mode: OpMode) -> String {
    match mode {
        OpMode::Null => "none".to_string(),
        OpMode::Station => "station".to_string(),
        OpMode::SoftAp => "softap".to_string(),
        OpMode::StationSoftAp => "station+softap".to_string(),
        OpMode::Other(code) => format!("unknown (0x{:02x})", code),
    }
}

fn station_state_name(state: StationState) -> String {
    match state {
        StationState::Connected => "connected".to_string(),
        StationState::Disconnected => "disconnected".to_string(),
        StationState::Connecting => "connecting".to_string(),
        StationState::ConnectedNoIp => "connected, no IP".to_string(),
        StationState::Other(code) => format!("failed (code {})", code),
    }
}
