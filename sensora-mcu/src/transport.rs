//! Cloud Transport Abstraction Traits

use std::fmt::Debug;

/// Message the broker publishes when the device drops off
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

/// Connection parameters handed to [`Transport::setup`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub keep_alive_secs: u16,
    pub last_will: Option<LastWill>,
}

/// Trait for an MQTT-like client
pub trait Transport {
    /// Error type for transport operations
    type Error: Debug;

    /// Store connection parameters, does not connect
    fn setup(&mut self, options: &TransportOptions);

    /// Start connecting, the runtime polls [`Transport::connected`] afterwards
    fn connect(&mut self) -> Result<(), Self::Error>;

    fn connected(&self) -> bool;

    fn disconnect(&mut self);

    fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error>;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error>;

    /// Run keep-alive and hand every received message to `on_message`
    fn poll(&mut self, on_message: &mut dyn FnMut(&str, &[u8]));
}
