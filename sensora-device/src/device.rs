//! Device lifecycle: provisioning or network, cloud connect, subscribe and
//! the periodic sync loop.

use crate::property::{AccessMode, Property};
use crate::provision::Provision;
use crate::registry::{PropertyHandle, PropertyRegistry, RegistryError};
use crate::settings::Settings;
use log::*;
use sensora_mcu::{Board, Clock, Hardware, SerialPort, Storage, Transport};
use sensora_proto::{
    extract_device_id, extract_field, ConnectionType, DeviceConfig, DeviceStatus, SensoraPayload, Topics,
    WiFiConfig, DEVICE_CONFIG_KEY, NETWORK_CONFIG_KEY,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Boot,
    Provision,
    ConnectNetwork,
    WaitNetworkConn,
    NetworkConnFailure,
    ConnectMqtt,
    WaitMqttConn,
    MqttConnFailure,
    SubscribeMqtt,
    SyncDeviceInfo,
    SyncPropertyInfo,
    SyncDeviceStats,
    SyncPropertyState,
}

pub struct SensoraDevice<B, T, S, P, C> {
    hw: Hardware<B, T, S, P, C>,
    settings: Settings,
    registry: PropertyRegistry,
    config: DeviceConfig,
    wifi: WiFiConfig,
    topics: Topics,
    state: DeviceState,
    status: DeviceStatus,
    provision: Option<Provision>,
    wait_started: Option<u64>,
    stats_synced_at: u64,
    boot_ms: u64,
}

impl<B, T, S, P, C> SensoraDevice<B, T, S, P, C>
where
    B: Board,
    T: Transport,
    S: Storage,
    P: SerialPort,
    C: Clock,
{
    pub fn new(hw: Hardware<B, T, S, P, C>, settings: Settings) -> Self {
        Self {
            registry: PropertyRegistry::new(settings.max_properties),
            boot_ms: hw.clock.millis(),
            hw,
            settings,
            config: DeviceConfig::default(),
            wifi: WiFiConfig::default(),
            topics: Topics::new(""),
            state: DeviceState::Boot,
            status: DeviceStatus::Boot,
            provision: None,
            wait_started: None,
            stats_synced_at: 0,
        }
    }

    pub fn register(&mut self, property: Property) -> Result<PropertyHandle, RegistryError> {
        self.registry.register(property)
    }

    pub fn property(&self, handle: PropertyHandle) -> Option<&Property> {
        self.registry.get(handle)
    }

    pub fn property_mut(&mut self, handle: PropertyHandle) -> Option<&mut Property> {
        self.registry.get_mut(handle)
    }

    pub fn registry(&self) -> &PropertyRegistry {
        &self.registry
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn hardware(&self) -> &Hardware<B, T, S, P, C> {
        &self.hw
    }

    pub fn hardware_mut(&mut self) -> &mut Hardware<B, T, S, P, C> {
        &mut self.hw
    }

    /// Provisioning machine, only while unprovisioned. The HTTP server
    /// forwards requests to it.
    pub fn provision_mut(&mut self) -> Option<&mut Provision> {
        self.provision.as_mut()
    }

    /// Provisioning committed new config and asked the board to restart
    pub fn restart_requested(&self) -> bool {
        self.provision.as_ref().is_some_and(Provision::is_finished)
    }

    /// Load config and pick provisioning or normal operation
    pub fn setup(&mut self) {
        warn!("sensora firmware v{}", self.settings.firmware_version);
        if let Err(e) = self.hw.board.setup() {
            error!("board setup failed: {e:?}");
        }
        self.boot_ms = self.hw.clock.millis();
        self.load_config();

        if self.is_provision_mode() {
            info!("device is not provisioned, waiting for credentials");
            self.provision = Some(Provision::new(&self.settings));
            self.state = DeviceState::Provision;
            return;
        }

        self.topics = Topics::new(&self.config.device_id);
        info!("device id '{}'", self.config.device_id);
        self.state = self.connect_network();
    }

    fn load_config(&mut self) {
        let mut record = [0u8; DeviceConfig::RECORD_LEN];
        match self.hw.storage.read_config(DEVICE_CONFIG_KEY, &mut record) {
            Ok(true) => self.config = DeviceConfig::from_record(&record),
            Ok(false) => debug!("no device config stored"),
            Err(e) => error!("failed to read device config: {e:?}"),
        }

        let mut record = [0u8; WiFiConfig::RECORD_LEN];
        match self.hw.storage.read_config(NETWORK_CONFIG_KEY, &mut record) {
            Ok(true) => self.wifi = WiFiConfig::from_record(&record),
            Ok(false) => debug!("no network config stored"),
            Err(e) => error!("failed to read network config: {e:?}"),
        }

        if self.hw.board.supports(ConnectionType::WiFi) {
            self.config.connection_type = ConnectionType::WiFi;
        }
    }

    fn is_provision_mode(&self) -> bool {
        !(self.config.has_valid_credentials() && self.wifi.is_valid())
    }

    /// One cooperative step
    pub fn tick(&mut self) {
        self.state = match self.state {
            DeviceState::Boot => DeviceState::Boot,
            DeviceState::Provision => {
                if let Some(provision) = self.provision.as_mut() {
                    provision.tick(&mut self.hw, &mut self.config);
                }
                return;
            }
            DeviceState::ConnectNetwork => self.connect_network(),
            DeviceState::WaitNetworkConn => self.wait_network_conn(),
            DeviceState::NetworkConnFailure => {
                error!("failed to connect to network, retrying");
                DeviceState::ConnectNetwork
            }
            DeviceState::ConnectMqtt => self.connect_mqtt(),
            DeviceState::WaitMqttConn => self.wait_mqtt_conn(),
            DeviceState::MqttConnFailure => {
                error!("failed to connect to Sensora Cloud, retrying");
                DeviceState::ConnectMqtt
            }
            DeviceState::SubscribeMqtt => self.subscribe(),
            DeviceState::SyncDeviceInfo => self.sync_device_info(),
            DeviceState::SyncPropertyInfo => self.sync_property_info(),
            DeviceState::SyncDeviceStats => self.sync_device_stats(),
            DeviceState::SyncPropertyState => self.sync_property_state(),
        };
        self.poll_transport();
    }

    fn poll_transport(&mut self) {
        let now = self.hw.clock.millis();
        let registry = &mut self.registry;
        let device_id = self.config.device_id.as_str();
        self.hw
            .transport
            .poll(&mut |topic, payload| {
                route_message(registry, device_id, now, topic, payload);
            });
    }

    fn connect_network(&mut self) -> DeviceState {
        if self.hw.board.is_network_connected() {
            return DeviceState::ConnectMqtt;
        }
        info!("connecting to network ssid '{}'", self.wifi.ssid);
        if let Err(e) = self.hw.board.connect_network(&self.wifi) {
            error!("failed to connect to ssid '{}': {e:?}", self.wifi.ssid);
            return DeviceState::NetworkConnFailure;
        }
        self.wait_started = None;
        DeviceState::WaitNetworkConn
    }

    fn wait_network_conn(&mut self) -> DeviceState {
        if self.hw.board.is_network_connected() {
            self.wait_started = None;
            if let Some(ip) = self.hw.board.local_ip() {
                info!("network connected, ip {ip}");
            }
            return DeviceState::ConnectMqtt;
        }
        if self.deadline_passed() {
            self.wait_started = None;
            return DeviceState::NetworkConnFailure;
        }
        DeviceState::WaitNetworkConn
    }

    fn connect_mqtt(&mut self) -> DeviceState {
        if !self.hw.board.is_network_connected() {
            return DeviceState::ConnectNetwork;
        }
        if self.hw.transport.connected() {
            self.status = DeviceStatus::Online;
            return DeviceState::SubscribeMqtt;
        }
        let options = self.settings.transport_options(&self.config);
        info!("connecting to {}:{}", options.host, options.port);
        self.hw.transport.setup(&options);
        if let Err(e) = self.hw.transport.connect() {
            error!("mqtt connect failed: {e:?}");
            return DeviceState::MqttConnFailure;
        }
        self.wait_started = None;
        DeviceState::WaitMqttConn
    }

    fn wait_mqtt_conn(&mut self) -> DeviceState {
        if !self.hw.board.is_network_connected() {
            self.wait_started = None;
            return DeviceState::ConnectNetwork;
        }
        if self.hw.transport.connected() {
            info!("connected to Sensora Cloud");
            self.wait_started = None;
            self.status = DeviceStatus::Online;
            return DeviceState::SubscribeMqtt;
        }
        if self.deadline_passed() {
            self.wait_started = None;
            self.hw.transport.disconnect();
            return DeviceState::MqttConnFailure;
        }
        DeviceState::WaitMqttConn
    }

    fn deadline_passed(&mut self) -> bool {
        let now = self.hw.clock.millis();
        let started = *self.wait_started.get_or_insert(now);
        now.saturating_sub(started) >= self.settings.connect_timeout_ms
    }

    fn subscribe(&mut self) -> DeviceState {
        if !self.hw.transport.connected() {
            return DeviceState::ConnectMqtt;
        }
        if let Err(e) = self.hw.transport.subscribe(&self.topics.inbound) {
            error!("failed to subscribe to topic '{}': {e:?}", self.topics.inbound);
            return DeviceState::ConnectNetwork;
        }
        info!("subscribed to topic '{}'", self.topics.inbound);
        DeviceState::SyncDeviceInfo
    }

    fn sync_device_info(&mut self) -> DeviceState {
        if !self.hw.transport.connected() {
            return DeviceState::ConnectMqtt;
        }
        let mut p = SensoraPayload::new();
        if let Err(e) = self.hw.board.read_info(&mut p) {
            warn!("board info truncated: {e}");
        }
        let fields = p
            .add("status", self.status.code())
            .and_then(|()| p.add("fwver", &self.settings.firmware_version));
        if let Err(e) = fields {
            warn!("device info truncated: {e}");
        }
        let ids = self.registry.identifiers(p.remaining().saturating_sub(";props=".len()));
        if let Err(e) = p.add("props", ids) {
            warn!("property list dropped from device info: {e}");
        }

        if let Err(e) = self.hw.transport.publish(&self.topics.device_info, p.as_bytes()) {
            error!("failed to sync device info: {e:?}");
            return DeviceState::ConnectNetwork;
        }
        debug!("device info: {p}");
        DeviceState::SyncPropertyInfo
    }

    fn sync_property_info(&mut self) -> DeviceState {
        if !self.hw.transport.connected() {
            return DeviceState::ConnectMqtt;
        }
        for prop in self.registry.iter() {
            let p = match property_info(prop) {
                Ok(p) => p,
                Err(e) => {
                    warn!("property info for '{}' does not fit: {e}", prop.id());
                    continue;
                }
            };
            if let Err(e) = self.hw.transport.publish(&self.topics.property_info, p.as_bytes()) {
                error!("failed to sync property info, id '{}': {e:?}", prop.id());
                return DeviceState::ConnectNetwork;
            }
        }
        DeviceState::SyncDeviceStats
    }

    fn sync_device_stats(&mut self) -> DeviceState {
        if !self.hw.transport.connected() {
            return DeviceState::ConnectMqtt;
        }
        let now = self.hw.clock.millis();
        let mut p = SensoraPayload::new();
        if let Err(e) = self.hw.board.read_stats(&mut p) {
            warn!("board stats truncated: {e}");
        }
        let uptime = now.saturating_sub(self.boot_ms) / 1000;
        let fields = p
            .add("status", self.status.code())
            .and_then(|()| p.add("uptime", uptime));
        if let Err(e) = fields {
            warn!("device stats truncated: {e}");
        }

        if let Err(e) = self.hw.transport.publish(&self.topics.device_info, p.as_bytes()) {
            warn!("failed to sync device stats: {e:?}");
            return DeviceState::ConnectNetwork;
        }
        self.stats_synced_at = now;
        DeviceState::SyncPropertyState
    }

    fn sync_property_state(&mut self) -> DeviceState {
        if !self.hw.transport.connected() {
            return DeviceState::ConnectMqtt;
        }
        let now = self.hw.clock.millis();
        for prop in self.registry.iter_mut() {
            if !prop.should_sync(now) {
                continue;
            }
            let mut p = SensoraPayload::new();
            let encoded = p
                .add("id", prop.id())
                .and_then(|()| p.add("value", prop.value().as_str()));
            if let Err(e) = encoded {
                error!("property state for '{}' does not fit: {e}", prop.id());
                prop.on_cloud_sync_failed();
                continue;
            }
            match self.hw.transport.publish(&self.topics.outbound, p.as_bytes()) {
                Ok(()) => prop.on_cloud_synced(now),
                Err(e) => {
                    error!("failed to sync property state, id '{}': {e:?}", prop.id());
                    prop.on_cloud_sync_failed();
                }
            }
        }

        if now.saturating_sub(self.stats_synced_at) >= self.settings.stats_sync_interval_ms {
            return DeviceState::SyncDeviceStats;
        }
        DeviceState::SyncPropertyState
    }
}

fn property_info(prop: &Property) -> Result<SensoraPayload, sensora_proto::PayloadError> {
    let mut p = SensoraPayload::new();
    p.add("id", prop.id())?;
    p.add("name", prop.name())?;
    p.add("dt", prop.kind() as u8)?;
    p.add("am", prop.mode() as u8)?;
    p.add("nid", prop.node())?;
    p.add("ss", prop.strategy() as u8)?;
    Ok(p)
}

/// Apply an inbound `id=..;value=..` message. Returns whether a property
/// was updated.
pub fn route_message(
    registry: &mut PropertyRegistry,
    device_id: &str,
    now_ms: u64,
    topic: &str,
    payload: &[u8],
) -> bool {
    if extract_device_id(topic) != Some(device_id) {
        debug!("dropping message for another device on '{topic}'");
        return false;
    }
    let (Some(id), Some(value)) = (extract_field(payload, "id"), extract_field(payload, "value")) else {
        warn!("malformed message on '{topic}'");
        return false;
    };
    let Some(prop) = registry.find_by_id_mut(&id) else {
        warn!("property '{id}' not found");
        return false;
    };
    if prop.mode() == AccessMode::Read {
        return false;
    }
    debug!("property '{id}' updated from cloud");
    prop.on_message(value.as_bytes(), now_ms);
    true
}
