//! In-memory hardware for the host simulator and tests.
//!
//! Every type is a cheap handle over shared state: clone it before moving it
//! into a [`crate::Hardware`] and keep the clone to drive or inspect the
//! device from outside.

use crate::{Board, Clock, ScanResult, SerialPort, Storage, Transport, TransportOptions};
use log::*;
use sensora_proto::{ConnectionType, PayloadError, SensoraPayload, WiFiConfig};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimError {
    #[error("not connected")]
    NotConnected,
    #[error("rejected by the simulated peer")]
    Rejected,
    #[error("storage is read only")]
    StorageFull,
}

/// Manually advanced clock
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now: Rc<Cell<u64>>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }
}

impl Clock for SimClock {
    fn millis(&self) -> u64 {
        self.now.get()
    }

    fn delay_ms(&mut self, ms: u64) {
        self.advance(ms);
    }
}

#[derive(Debug)]
struct BoardState {
    networks: Vec<ScanResult>,
    reachable: bool,
    join_delay_ms: u64,
    joining: Option<(WiFiConfig, u64)>,
    restarts: u32,
}

/// Simulated WiFi board. Any valid credentials join after `join_delay_ms`
/// unless the network is made unreachable.
#[derive(Debug, Clone)]
pub struct SimBoard {
    clock: SimClock,
    state: Rc<RefCell<BoardState>>,
}

impl SimBoard {
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            state: Rc::new(RefCell::new(BoardState {
                networks: Vec::new(),
                reachable: true,
                join_delay_ms: 500,
                joining: None,
                restarts: 0,
            })),
        }
    }

    pub fn add_network(&self, ssid: &str, rssi: i8) {
        self.state.borrow_mut().networks.push(ScanResult {
            ssid: ssid.to_string(),
            channel: 1,
            rssi,
            auth_required: true,
        });
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.borrow_mut().reachable = reachable;
    }

    pub fn set_join_delay(&self, ms: u64) {
        self.state.borrow_mut().join_delay_ms = ms;
    }

    /// Ssid of the network the board joined or is joining
    pub fn joined_ssid(&self) -> Option<String> {
        self.state.borrow().joining.as_ref().map(|(wifi, _)| wifi.ssid.clone())
    }

    pub fn restart_count(&self) -> u32 {
        self.state.borrow().restarts
    }
}

impl Board for SimBoard {
    type Error = SimError;

    fn setup(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn supports(&self, connection_type: ConnectionType) -> bool {
        connection_type == ConnectionType::WiFi
    }

    fn connect_network(&mut self, wifi: &WiFiConfig) -> Result<(), Self::Error> {
        debug!("sim board joining '{}'", wifi.ssid);
        self.state.borrow_mut().joining = Some((wifi.clone(), self.clock.millis()));
        Ok(())
    }

    fn disconnect_network(&mut self) {
        self.state.borrow_mut().joining = None;
    }

    fn is_network_connected(&self) -> bool {
        let state = self.state.borrow();
        match &state.joining {
            Some((_, started)) => {
                state.reachable && self.clock.millis().saturating_sub(*started) >= state.join_delay_ms
            }
            None => false,
        }
    }

    fn local_ip(&self) -> Option<Ipv4Addr> {
        self.is_network_connected().then_some(Ipv4Addr::new(192, 168, 1, 42))
    }

    fn read_info(&self, payload: &mut SensoraPayload) -> Result<(), PayloadError> {
        if let Some(ip) = self.local_ip() {
            payload.add("ip", ip)?;
        }
        payload.add("mac", "02:53:45:4e:53:01")
    }

    fn read_stats(&self, payload: &mut SensoraPayload) -> Result<(), PayloadError> {
        let rssi = self
            .joined_ssid()
            .and_then(|ssid| {
                let state = self.state.borrow();
                state.networks.iter().find(|n| n.ssid == ssid).map(|n| n.rssi)
            })
            .unwrap_or(-60);
        payload.add("wifi_signal", rssi)?;
        payload.add("free_heap", 180_000)
    }

    fn scan_networks(&mut self) -> Result<Vec<ScanResult>, Self::Error> {
        Ok(self.state.borrow().networks.clone())
    }

    fn restart(&mut self) {
        info!("sim board restart");
        let mut state = self.state.borrow_mut();
        state.restarts += 1;
        state.joining = None;
    }
}

#[derive(Debug, Default)]
struct TransportState {
    options: Option<TransportOptions>,
    accept: bool,
    connect_delay_ms: u64,
    connecting_since: Option<u64>,
    fail_publish: bool,
    fail_subscribe: bool,
    subscriptions: Vec<String>,
    published: Vec<(String, Vec<u8>)>,
    inbound: VecDeque<(String, Vec<u8>)>,
}

/// Simulated MQTT client with a scripted inbound queue
#[derive(Debug, Clone)]
pub struct SimTransport {
    clock: SimClock,
    state: Rc<RefCell<TransportState>>,
}

impl SimTransport {
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            state: Rc::new(RefCell::new(TransportState {
                accept: true,
                connect_delay_ms: 200,
                ..Default::default()
            })),
        }
    }

    /// Whether the broker accepts the connection
    pub fn set_accept(&self, accept: bool) {
        self.state.borrow_mut().accept = accept;
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.state.borrow_mut().fail_publish = fail;
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        self.state.borrow_mut().fail_subscribe = fail;
    }

    /// Drop the connection as if the broker went away
    pub fn drop_connection(&self) {
        self.state.borrow_mut().connecting_since = None;
    }

    /// Queue a message for the next poll
    pub fn inject(&self, topic: &str, payload: &[u8]) {
        self.state
            .borrow_mut()
            .inbound
            .push_back((topic.to_string(), payload.to_vec()));
    }

    pub fn options(&self) -> Option<TransportOptions> {
        self.state.borrow().options.clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state.borrow().subscriptions.clone()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.state.borrow().published.clone()
    }

    pub fn take_published(&self) -> Vec<(String, Vec<u8>)> {
        std::mem::take(&mut self.state.borrow_mut().published)
    }
}

impl Transport for SimTransport {
    type Error = SimError;

    fn setup(&mut self, options: &TransportOptions) {
        self.state.borrow_mut().options = Some(options.clone());
    }

    fn connect(&mut self) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        if state.options.is_none() {
            return Err(SimError::NotConnected);
        }
        state.connecting_since = Some(self.clock.millis());
        Ok(())
    }

    fn connected(&self) -> bool {
        let state = self.state.borrow();
        match state.connecting_since {
            Some(since) => state.accept && self.clock.millis().saturating_sub(since) >= state.connect_delay_ms,
            None => false,
        }
    }

    fn disconnect(&mut self) {
        self.state.borrow_mut().connecting_since = None;
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error> {
        if !self.connected() {
            return Err(SimError::NotConnected);
        }
        let mut state = self.state.borrow_mut();
        if state.fail_subscribe {
            return Err(SimError::Rejected);
        }
        state.subscriptions.push(topic.to_string());
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error> {
        if !self.connected() {
            return Err(SimError::NotConnected);
        }
        let mut state = self.state.borrow_mut();
        if state.fail_publish {
            return Err(SimError::Rejected);
        }
        state.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn poll(&mut self, on_message: &mut dyn FnMut(&str, &[u8])) {
        if !self.connected() {
            return;
        }
        let pending: Vec<_> = self.state.borrow_mut().inbound.drain(..).collect();
        for (topic, payload) in pending {
            on_message(&topic, &payload);
        }
    }
}

/// Volatile record store
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    records: Rc<RefCell<HashMap<String, Vec<u8>>>>,
    read_only: Rc<Cell<bool>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail, like a worn-out flash page
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.set(read_only);
    }

    pub fn record(&self, key: &str) -> Option<Vec<u8>> {
        self.records.borrow().get(key).cloned()
    }
}

impl Storage for MemoryStorage {
    type Error = SimError;

    fn read_config(&self, key: &str, out: &mut [u8]) -> Result<bool, Self::Error> {
        match self.records.borrow().get(key) {
            Some(record) if record.len() == out.len() => {
                out.copy_from_slice(record);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn write_config(&mut self, key: &str, value: &[u8]) -> Result<(), Self::Error> {
        if self.read_only.get() {
            return Err(SimError::StorageFull);
        }
        self.records.borrow_mut().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn reset_config(&mut self) -> Result<(), Self::Error> {
        if self.read_only.get() {
            return Err(SimError::StorageFull);
        }
        self.records.borrow_mut().clear();
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SerialState {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
}

/// Loopback serial port: bytes injected from the host side are read by the device
#[derive(Debug, Clone, Default)]
pub struct SimSerial {
    state: Rc<RefCell<SerialState>>,
}

impl SimSerial {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&self, bytes: &[u8]) {
        self.state.borrow_mut().rx.extend(bytes.iter().copied());
    }

    /// Everything the device wrote since the last call
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.borrow_mut().tx)
    }

    pub fn pending(&self) -> usize {
        self.state.borrow().rx.len()
    }
}

impl SerialPort for SimSerial {
    fn read_byte(&mut self) -> Option<u8> {
        self.state.borrow_mut().rx.pop_front()
    }

    fn write(&mut self, bytes: &[u8]) {
        self.state.borrow_mut().tx.extend_from_slice(bytes);
    }
}
