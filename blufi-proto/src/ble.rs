//! BLE GATT constants for the BluFi service
//!
//! The engine never resolves these itself; a platform transport uses them to
//! locate the write/notify characteristic pair before handing the channel over.

/// BLE Service UUID: 0000ffff-0000-1000-8000-00805f9b34fb
pub const SERVICE_UUID: &str = "0000ffff-0000-1000-8000-00805f9b34fb";

/// Client -> device characteristic (write)
pub const WRITE_UUID: &str = "0000ff01-0000-1000-8000-00805f9b34fb";

/// Device -> client characteristic (notify)
pub const NOTIFY_UUID: &str = "0000ff02-0000-1000-8000-00805f9b34fb";
