//! Sensora device runtime
//!
//! Drives a board from power-on to a cloud-connected device that keeps its
//! properties in sync. Unprovisioned boards first run [`Provision`] until
//! credentials are stored, then restart.
//!
//! ```ignore
//! let mut device = SensoraDevice::new(hw, Settings::default());
//! let led = device.register(Property::new("led", "Led").access_mode(AccessMode::ReadWrite))?;
//! device.setup();
//! loop {
//!     device.tick();
//! }
//! ```

pub mod device;
pub mod http;
pub mod property;
pub mod provision;
pub mod registry;
pub mod settings;

pub use device::{route_message, DeviceState, SensoraDevice};
pub use http::HttpProvisionError;
pub use property::{
    AccessMode, DataType, Property, PropertySubscriber, PropertyValue, SyncStrategy, MAX_SYNC_FAILS,
    MAX_VALUE_LEN,
};
pub use provision::{Provision, ProvisionState};
pub use registry::{PropertyHandle, PropertyRegistry, RegistryError};
pub use settings::Settings;
