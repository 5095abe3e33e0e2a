//! Board Abstraction Traits
//!
//! Network join and board-specific reporting.

use sensora_proto::{ConnectionType, PayloadError, SensoraPayload, WiFiConfig};
use std::fmt::Debug;
use std::net::Ipv4Addr;

/// WiFi network scan result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub ssid: String,
    pub channel: u8,
    pub rssi: i8,
    pub auth_required: bool,
}

/// Trait for board operations
///
/// Network calls are non-blocking: `connect_network` starts a join and the
/// runtime polls `is_network_connected` until its deadline.
pub trait Board {
    /// Error type for board operations
    type Error: Debug;

    /// One-time hardware init
    fn setup(&mut self) -> Result<(), Self::Error>;

    /// Connection types the board can use
    fn supports(&self, connection_type: ConnectionType) -> bool;

    /// Start joining a WiFi network
    fn connect_network(&mut self, wifi: &WiFiConfig) -> Result<(), Self::Error>;

    fn disconnect_network(&mut self);

    fn is_network_connected(&self) -> bool;

    fn local_ip(&self) -> Option<Ipv4Addr>;

    /// Add static board info fields (ip, mac, ...) to a device info payload
    fn read_info(&self, payload: &mut SensoraPayload) -> Result<(), PayloadError>;

    /// Add runtime stats fields (signal, heap, ...) to a stats payload
    fn read_stats(&self, payload: &mut SensoraPayload) -> Result<(), PayloadError>;

    /// Scan for available networks
    fn scan_networks(&mut self) -> Result<Vec<ScanResult>, Self::Error>;

    /// Reboot the board. Real hardware does not return from this.
    fn restart(&mut self);
}
