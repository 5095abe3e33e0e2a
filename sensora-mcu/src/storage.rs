//! Persistent Storage Abstraction Traits
//!
//! Config records are stored whole under a short key
//! ([`sensora_proto::DEVICE_CONFIG_KEY`], [`sensora_proto::NETWORK_CONFIG_KEY`]).

use std::fmt::Debug;

/// Trait for persistent storage operations
///
/// MCU-specific crates implement this trait using their storage backend
/// (NVS for ESP32, flash pages elsewhere).
pub trait Storage {
    /// Error type for storage operations
    type Error: Debug;

    /// Read the record stored under `key` into `out`.
    ///
    /// Returns false when nothing is stored. A stored record with a
    /// different size than `out` is treated as missing.
    fn read_config(&self, key: &str, out: &mut [u8]) -> Result<bool, Self::Error>;

    fn write_config(&mut self, key: &str, value: &[u8]) -> Result<(), Self::Error>;

    /// Clear all records (factory reset)
    fn reset_config(&mut self) -> Result<(), Self::Error>;
}
