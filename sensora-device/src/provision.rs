//! Provisioning state machine.
//!
//! Credentials arrive as serial frames (or as an HTTP JSON body, see
//! [`crate::http`]). WiFi credentials are tried first, then device
//! credentials against the cloud. Once both work they are persisted and the
//! board restarts.

use crate::settings::Settings;
use log::*;
use sensora_mcu::{Board, Clock, Hardware, ScanResult, SerialPort, Storage, Transport};
use sensora_proto::{
    build_serial_buff, validate_device_credentials, validate_wifi_credentials, CmdError, CmdResponse,
    ConnectionType, DeviceConfig, SensoraCmd, SensoraLink, WiFiConfig, DEVICE_CONFIG_KEY, FRAME_OVERHEAD,
    MAX_DATA_LEN, MAX_LINK_BUFFER, NETWORK_CONFIG_KEY,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProvisionState {
    WaitNetworkConfig = 1,
    ConnectNetwork,
    WaitNetwConn,
    NetworkConnFailure,
    WaitDeviceCredentials,
    ConnectMqtt,
    WaitMqttConn,
    MqttConnFailure,
    FinishProvision,
}

impl ProvisionState {
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// States that read frames from the serial port
    fn accepts_serial(self) -> bool {
        matches!(self, ProvisionState::WaitNetworkConfig | ProvisionState::WaitDeviceCredentials)
    }
}

/// Device credentials waiting for the network phase to finish
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingDevice {
    pub device_id: String,
    pub device_token: String,
}

#[derive(Debug)]
pub struct Provision {
    settings: Settings,
    state: ProvisionState,
    link: SensoraLink,
    pub(crate) wifi: Option<WiFiConfig>,
    pub(crate) device: Option<PendingDevice>,
    pub(crate) last_error: Option<CmdError>,
    first_network_check: Option<u64>,
    first_mqtt_check: Option<u64>,
    finished: bool,
}

impl Provision {
    pub fn new(settings: &Settings) -> Self {
        Self {
            settings: settings.clone(),
            state: ProvisionState::WaitNetworkConfig,
            link: SensoraLink::new(),
            wifi: None,
            device: None,
            last_error: None,
            first_network_check: None,
            first_mqtt_check: None,
            finished: false,
        }
    }

    pub fn state(&self) -> ProvisionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ProvisionState) {
        if state != self.state {
            debug!("provision state {:?} -> {:?}", self.state, state);
        }
        // a new attempt is timed from its own wait state
        match state {
            ProvisionState::ConnectNetwork => self.first_network_check = None,
            ProvisionState::ConnectMqtt => self.first_mqtt_check = None,
            _ => {}
        }
        self.state = state;
    }

    /// Error of the last failed connection attempt or rejected command
    pub fn last_error(&self) -> Option<CmdError> {
        self.last_error
    }

    /// Config persisted and restart requested
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Run one step of the state machine
    pub fn tick<B, T, S, P, C>(&mut self, hw: &mut Hardware<B, T, S, P, C>, config: &mut DeviceConfig)
    where
        B: Board,
        T: Transport,
        S: Storage,
        P: SerialPort,
        C: Clock,
    {
        if self.finished {
            return;
        }
        match self.state {
            ProvisionState::WaitNetworkConfig => self.poll_serial(hw, config),
            ProvisionState::ConnectNetwork => self.connect_network(hw, config),
            ProvisionState::WaitNetwConn => self.wait_network(hw),
            ProvisionState::NetworkConnFailure => {
                self.report_failure(&mut hw.serial, "network");
                self.set_state(ProvisionState::WaitNetworkConfig);
            }
            ProvisionState::WaitDeviceCredentials => {
                self.poll_serial(hw, config);
                if self.state == ProvisionState::WaitDeviceCredentials && self.device.is_some() {
                    self.set_state(ProvisionState::ConnectMqtt);
                }
            }
            ProvisionState::ConnectMqtt => self.connect_mqtt(hw, config),
            ProvisionState::WaitMqttConn => self.wait_mqtt(hw, config),
            ProvisionState::MqttConnFailure => {
                self.report_failure(&mut hw.serial, "mqtt");
                self.set_state(ProvisionState::WaitDeviceCredentials);
            }
            ProvisionState::FinishProvision => self.finish(hw, config),
        }
    }

    fn poll_serial<B, T, S, P, C>(&mut self, hw: &mut Hardware<B, T, S, P, C>, config: &mut DeviceConfig)
    where
        B: Board,
        T: Transport,
        S: Storage,
        P: SerialPort,
        C: Clock,
    {
        while let Some(b) = hw.serial.read_byte() {
            if self.link.read_byte(b, hw.clock.millis()) {
                continue;
            }
            match self.link.parse_bytes() {
                Ok(cmd) => self.handle_command(cmd, hw, config),
                Err(err) => {
                    error!("sensora link command error: {err}");
                    send_error(&mut hw.serial, err);
                }
            }
            if !self.state.accepts_serial() {
                break;
            }
        }
    }

    fn handle_command<B, T, S, P, C>(
        &mut self,
        cmd: CmdResponse,
        hw: &mut Hardware<B, T, S, P, C>,
        config: &mut DeviceConfig,
    ) where
        B: Board,
        T: Transport,
        S: Storage,
        P: SerialPort,
        C: Clock,
    {
        debug!("received cmd {:?}", cmd.cmd());
        match cmd {
            CmdResponse::SaveWiFiCredentials(wifi) => {
                if let Err(err) = validate_wifi_credentials(&wifi.ssid, &wifi.password) {
                    error!("invalid WiFi credentials");
                    send_error(&mut hw.serial, err);
                    return;
                }
                self.wifi = Some(wifi);
                self.set_state(ProvisionState::ConnectNetwork);
            }
            CmdResponse::SaveDeviceCredentials {
                device_id,
                device_token,
            } => {
                if let Err(err) = validate_device_credentials(&device_id, &device_token) {
                    error!("invalid device credentials");
                    send_error(&mut hw.serial, err);
                    return;
                }
                self.device = Some(PendingDevice {
                    device_id,
                    device_token,
                });
            }
            CmdResponse::ScanWifiNetworks => {
                let networks = hw.board.scan_networks().unwrap_or_else(|e| {
                    error!("wifi scan failed: {e:?}");
                    Vec::new()
                });
                info!("found {} networks", networks.len());
                send(&mut hw.serial, SensoraCmd::ScanWifiNetworks, &scan_response(&networks));
            }
            CmdResponse::EraseConfig => {
                let ok = match hw.storage.reset_config() {
                    Ok(()) => {
                        warn!("config erased");
                        config.clear_credentials();
                        self.device = None;
                        true
                    }
                    Err(e) => {
                        error!("failed to erase config: {e:?}");
                        false
                    }
                };
                send(&mut hw.serial, SensoraCmd::EraseConfig, &[u8::from(ok)]);
            }
            CmdResponse::ReadDeviceState => {
                let err = self.last_error.map(CmdError::code).unwrap_or(0);
                send(&mut hw.serial, SensoraCmd::ReadDeviceState, &[self.state.code(), err]);
            }
        }
    }

    fn connect_network<B, T, S, P, C>(&mut self, hw: &mut Hardware<B, T, S, P, C>, config: &DeviceConfig)
    where
        B: Board,
        T: Transport,
        S: Storage,
        P: SerialPort,
        C: Clock,
    {
        self.last_error = None;
        if config.connection_type != ConnectionType::WiFi || !hw.board.supports(ConnectionType::WiFi) {
            self.fail_network(CmdError::NetworkConnMismatch);
            return;
        }
        let Some(wifi) = self.wifi.as_ref() else {
            warn!("no network credentials to connect with");
            self.set_state(ProvisionState::WaitNetworkConfig);
            return;
        };

        debug!("connecting to network ssid '{}'", wifi.ssid);
        hw.board.disconnect_network();
        if let Err(e) = hw.board.connect_network(wifi) {
            error!("failed to connect to ssid '{}': {e:?}", wifi.ssid);
            self.fail_network(CmdError::InvalidNetwCredentials);
            return;
        }
        self.set_state(ProvisionState::WaitNetwConn);
    }

    fn wait_network<B, T, S, P, C>(&mut self, hw: &mut Hardware<B, T, S, P, C>)
    where
        B: Board,
        T: Transport,
        S: Storage,
        P: SerialPort,
        C: Clock,
    {
        let now = hw.clock.millis();
        let first = *self.first_network_check.get_or_insert(now);
        if hw.board.is_network_connected() {
            info!("network connected");
            send(&mut hw.serial, SensoraCmd::NetworkStatus, &[0x01]);
            self.first_network_check = None;
            self.set_state(ProvisionState::WaitDeviceCredentials);
            return;
        }
        if now.saturating_sub(first) >= self.settings.connect_timeout_ms {
            warn!("network connection timeout");
            self.first_network_check = None;
            hw.board.disconnect_network();
            self.fail_network(CmdError::NetworkConnTimeout);
        }
    }

    fn fail_network(&mut self, err: CmdError) {
        self.last_error = Some(err);
        self.wifi = None;
        self.set_state(ProvisionState::NetworkConnFailure);
    }

    fn connect_mqtt<B, T, S, P, C>(&mut self, hw: &mut Hardware<B, T, S, P, C>, config: &mut DeviceConfig)
    where
        B: Board,
        T: Transport,
        S: Storage,
        P: SerialPort,
        C: Clock,
    {
        let Some(device) = self.device.as_ref() else {
            self.set_state(ProvisionState::WaitDeviceCredentials);
            return;
        };
        config.device_id.clone_from(&device.device_id);
        config.device_token.clone_from(&device.device_token);
        self.last_error = None;

        hw.transport.setup(&self.settings.transport_options(config));
        if let Err(e) = hw.transport.connect() {
            // the deadline in WaitMqttConn reports it
            warn!("mqtt connect failed: {e:?}");
        }
        self.set_state(ProvisionState::WaitMqttConn);
    }

    fn wait_mqtt<B, T, S, P, C>(&mut self, hw: &mut Hardware<B, T, S, P, C>, config: &mut DeviceConfig)
    where
        B: Board,
        T: Transport,
        S: Storage,
        P: SerialPort,
        C: Clock,
    {
        hw.transport
            .poll(&mut |topic, _| debug!("ignoring message on '{topic}' while provisioning"));

        let now = hw.clock.millis();
        let first = *self.first_mqtt_check.get_or_insert(now);
        if hw.transport.connected() {
            info!("mqtt connected");
            send(&mut hw.serial, SensoraCmd::MqttStatus, &[0x01]);
            self.first_mqtt_check = None;
            self.set_state(ProvisionState::FinishProvision);
            return;
        }
        if now.saturating_sub(first) >= self.settings.connect_timeout_ms {
            warn!("mqtt connection timeout");
            self.first_mqtt_check = None;
            self.last_error = Some(CmdError::MqttConnTimeout);
            self.device = None;
            config.clear_credentials();
            hw.transport.disconnect();
            self.set_state(ProvisionState::MqttConnFailure);
        }
    }

    fn report_failure<P: SerialPort>(&self, serial: &mut P, phase: &str) {
        match self.last_error {
            Some(err) => {
                error!("{phase} connection failure: {err}");
                send_error(serial, err);
            }
            None => error!("{phase} connection failure"),
        }
    }

    fn finish<B, T, S, P, C>(&mut self, hw: &mut Hardware<B, T, S, P, C>, config: &DeviceConfig)
    where
        B: Board,
        T: Transport,
        S: Storage,
        P: SerialPort,
        C: Clock,
    {
        let Some(wifi) = self.wifi.as_ref() else {
            warn!("network credentials missing, restarting provisioning");
            self.set_state(ProvisionState::WaitNetworkConfig);
            return;
        };

        let saved = hw
            .storage
            .write_config(DEVICE_CONFIG_KEY, &config.to_record())
            .and_then(|()| hw.storage.write_config(NETWORK_CONFIG_KEY, &wifi.to_record()));
        match saved {
            Ok(()) => {
                info!("provisioning finished, restarting");
                self.finished = true;
                hw.board.restart();
            }
            Err(e) => {
                error!("failed to save config: {e:?}, retrying");
                hw.clock.delay_ms(self.settings.finish_retry_delay_ms);
            }
        }
    }
}

/// `[count]([ssidLen][ssid][rssi])*`, cut so the frame fits the device link buffer
pub fn scan_response(networks: &[ScanResult]) -> Vec<u8> {
    let limit = MAX_LINK_BUFFER - FRAME_OVERHEAD;
    let mut data = vec![0u8];
    let mut count = 0u8;
    for net in networks {
        let ssid = &net.ssid.as_bytes()[..net.ssid.len().min(u8::MAX as usize)];
        if data.len() + ssid.len() + 2 > limit || count == u8::MAX {
            break;
        }
        data.push(ssid.len() as u8);
        data.extend_from_slice(ssid);
        data.push(net.rssi as u8);
        count += 1;
    }
    data[0] = count;
    data
}

fn send<P: SerialPort>(serial: &mut P, cmd: SensoraCmd, data: &[u8]) {
    let mut buf = [0u8; FRAME_OVERHEAD + MAX_DATA_LEN];
    match build_serial_buff(cmd, data, &mut buf) {
        Ok(n) => serial.write(&buf[..n]),
        Err(e) => error!("failed to build {cmd:?} frame: {e}"),
    }
}

fn send_error<P: SerialPort>(serial: &mut P, err: CmdError) {
    send(serial, SensoraCmd::CommandError, &[err.code()]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensora_mcu::sim::{MemoryStorage, SimBoard, SimClock, SimSerial, SimTransport};
    use sensora_proto::Frame;

    type SimHardware = Hardware<SimBoard, SimTransport, MemoryStorage, SimSerial, SimClock>;

    struct Rig {
        hw: SimHardware,
        clock: SimClock,
        board: SimBoard,
        transport: SimTransport,
        storage: MemoryStorage,
        serial: SimSerial,
        config: DeviceConfig,
        provision: Provision,
    }

    impl Rig {
        fn new() -> Self {
            let clock = SimClock::new();
            let board = SimBoard::new(clock.clone());
            let transport = SimTransport::new(clock.clone());
            let storage = MemoryStorage::new();
            let serial = SimSerial::new();
            let hw = Hardware::new(
                board.clone(),
                transport.clone(),
                storage.clone(),
                serial.clone(),
                clock.clone(),
            );
            Self {
                hw,
                clock,
                board,
                transport,
                storage,
                serial,
                config: DeviceConfig {
                    connection_type: ConnectionType::WiFi,
                    ..Default::default()
                },
                provision: Provision::new(&Settings::default()),
            }
        }

        fn tick(&mut self) {
            self.provision.tick(&mut self.hw, &mut self.config);
        }

        fn send(&self, req: CmdResponse) {
            self.serial.inject(&req.to_frame().unwrap());
        }

        /// Responses written by the device as (cmd, data)
        fn responses(&self) -> Vec<(u8, Vec<u8>)> {
            let written = self.serial.take_written();
            let mut out = Vec::new();
            let mut rest = &written[..];
            while !rest.is_empty() {
                let len = FRAME_OVERHEAD + rest[8] as usize;
                let frame = Frame::decode(&rest[..len]).unwrap();
                out.push((frame.cmd, frame.data.to_vec()));
                rest = &rest[len..];
            }
            out
        }
    }

    fn wifi() -> CmdResponse {
        CmdResponse::SaveWiFiCredentials(WiFiConfig {
            ssid: "home-network".into(),
            password: "password".into(),
        })
    }

    fn device() -> CmdResponse {
        CmdResponse::SaveDeviceCredentials {
            device_id: "d".repeat(32),
            device_token: "t".repeat(32),
        }
    }

    const ERR: u8 = SensoraCmd::CommandError as u8;

    #[test]
    fn invalid_wifi_credentials_are_rejected_in_place() {
        let mut rig = Rig::new();
        rig.send(CmdResponse::SaveWiFiCredentials(WiFiConfig {
            ssid: "home-network".into(),
            password: "short".into(),
        }));
        rig.tick();
        assert_eq!(rig.provision.state(), ProvisionState::WaitNetworkConfig);
        assert_eq!(rig.responses(), vec![(ERR, vec![CmdError::InvalidNetwCredentials.code()])]);
    }

    #[test]
    fn corrupted_frame_reports_crc_mismatch() {
        let mut rig = Rig::new();
        let mut frame = wifi().to_frame().unwrap();
        frame[10] ^= 0x01;
        rig.serial.inject(&frame);
        rig.tick();
        assert_eq!(rig.responses(), vec![(ERR, vec![CmdError::CrcMismatch.code()])]);
        assert_eq!(rig.provision.state(), ProvisionState::WaitNetworkConfig);
    }

    #[test]
    fn full_serial_provisioning() {
        let mut rig = Rig::new();
        rig.send(device());
        rig.send(wifi());
        rig.tick();
        assert_eq!(rig.provision.state(), ProvisionState::ConnectNetwork);

        rig.tick();
        assert_eq!(rig.provision.state(), ProvisionState::WaitNetwConn);
        assert_eq!(rig.board.joined_ssid().as_deref(), Some("home-network"));

        rig.tick();
        assert_eq!(rig.provision.state(), ProvisionState::WaitNetwConn);
        rig.clock.advance(500);
        rig.tick();
        assert_eq!(rig.provision.state(), ProvisionState::WaitDeviceCredentials);
        assert_eq!(rig.responses(), vec![(SensoraCmd::NetworkStatus as u8, vec![1])]);

        // device credentials were cached before the network came up
        rig.tick();
        assert_eq!(rig.provision.state(), ProvisionState::ConnectMqtt);
        rig.tick();
        assert_eq!(rig.provision.state(), ProvisionState::WaitMqttConn);
        assert_eq!(rig.transport.options().unwrap().client_id, "d".repeat(32));

        rig.clock.advance(200);
        rig.tick();
        assert_eq!(rig.provision.state(), ProvisionState::FinishProvision);
        assert_eq!(rig.responses(), vec![(SensoraCmd::MqttStatus as u8, vec![1])]);

        rig.tick();
        assert!(rig.provision.is_finished());
        assert_eq!(rig.board.restart_count(), 1);

        let stored = DeviceConfig::from_record(&rig.storage.record(DEVICE_CONFIG_KEY).unwrap());
        assert_eq!(stored.device_id, "d".repeat(32));
        assert_eq!(stored.connection_type, ConnectionType::WiFi);
        let stored = WiFiConfig::from_record(&rig.storage.record(NETWORK_CONFIG_KEY).unwrap());
        assert_eq!(stored.ssid, "home-network");
    }

    #[test]
    fn network_timeout_reports_once_and_waits_for_config() {
        let mut rig = Rig::new();
        rig.board.set_reachable(false);
        rig.send(wifi());
        rig.tick();
        rig.tick();
        rig.tick();
        rig.clock.advance(9_999);
        rig.tick();
        assert_eq!(rig.provision.state(), ProvisionState::WaitNetwConn);
        rig.clock.advance(1);
        rig.tick();
        assert_eq!(rig.provision.state(), ProvisionState::NetworkConnFailure);
        assert_eq!(rig.provision.last_error(), Some(CmdError::NetworkConnTimeout));
        rig.tick();
        assert_eq!(rig.provision.state(), ProvisionState::WaitNetworkConfig);
        assert_eq!(rig.responses(), vec![(ERR, vec![CmdError::NetworkConnTimeout.code()])]);
    }

    #[test]
    fn resubmitted_config_gets_a_full_network_deadline() {
        let mut rig = Rig::new();
        rig.board.set_reachable(false);
        let body = serde_json::to_vec(&serde_json::json!({
            "deviceId": "d".repeat(32),
            "deviceToken": "t".repeat(32),
            "wifi": { "ssid": "home-network", "password": "password" },
        }))
        .unwrap();

        assert_eq!(rig.provision.handle_http_config(&body).0, 200);
        rig.tick();
        rig.tick();
        assert_eq!(rig.provision.state(), ProvisionState::WaitNetwConn);
        rig.clock.advance(9_000);
        rig.tick();

        assert_eq!(rig.provision.handle_http_config(&body).0, 200);
        assert_eq!(rig.provision.state(), ProvisionState::ConnectNetwork);
        rig.tick();
        rig.tick();
        rig.clock.advance(1_000);
        rig.tick();
        assert_eq!(rig.provision.state(), ProvisionState::WaitNetwConn);

        rig.clock.advance(9_000);
        rig.tick();
        assert_eq!(rig.provision.state(), ProvisionState::NetworkConnFailure);
        assert_eq!(rig.provision.last_error(), Some(CmdError::NetworkConnTimeout));
    }

    #[test]
    fn connection_type_mismatch() {
        let mut rig = Rig::new();
        rig.config.connection_type = ConnectionType::Ethernet;
        rig.send(wifi());
        rig.tick();
        rig.tick();
        assert_eq!(rig.provision.state(), ProvisionState::NetworkConnFailure);
        rig.tick();
        assert_eq!(rig.responses(), vec![(ERR, vec![CmdError::NetworkConnMismatch.code()])]);
    }

    #[test]
    fn mqtt_timeout_clears_device_credentials() {
        let mut rig = Rig::new();
        rig.transport.set_accept(false);
        rig.send(wifi());
        rig.tick();
        rig.tick();
        rig.clock.advance(500);
        rig.tick();
        assert_eq!(rig.provision.state(), ProvisionState::WaitDeviceCredentials);
        rig.responses();

        rig.send(device());
        rig.tick();
        assert_eq!(rig.provision.state(), ProvisionState::ConnectMqtt);
        rig.tick();
        rig.tick();
        rig.clock.advance(10_000);
        rig.tick();
        assert_eq!(rig.provision.state(), ProvisionState::MqttConnFailure);
        assert!(rig.config.device_id.is_empty());
        rig.tick();
        assert_eq!(rig.provision.state(), ProvisionState::WaitDeviceCredentials);
        assert_eq!(rig.responses(), vec![(ERR, vec![CmdError::MqttConnTimeout.code()])]);

        // nothing cached, stays put
        rig.tick();
        assert_eq!(rig.provision.state(), ProvisionState::WaitDeviceCredentials);
    }

    #[test]
    fn failed_save_retries_after_delay() {
        let mut rig = Rig::new();
        rig.storage.set_read_only(true);
        rig.send(device());
        rig.send(wifi());
        for _ in 0..3 {
            rig.tick();
        }
        rig.clock.advance(500);
        rig.tick();
        rig.tick();
        rig.tick();
        rig.clock.advance(200);
        rig.tick();
        assert_eq!(rig.provision.state(), ProvisionState::FinishProvision);

        let before = rig.clock.millis();
        rig.tick();
        assert_eq!(rig.provision.state(), ProvisionState::FinishProvision);
        assert!(!rig.provision.is_finished());
        assert_eq!(rig.clock.millis() - before, 1_000);

        rig.storage.set_read_only(false);
        rig.tick();
        assert!(rig.provision.is_finished());
    }

    #[test]
    fn state_scan_and_erase_commands() {
        let mut rig = Rig::new();
        rig.board.add_network("home-network", -40);
        rig.board.add_network("guest", -70);
        rig.send(CmdResponse::ReadDeviceState);
        rig.send(CmdResponse::ScanWifiNetworks);
        rig.send(CmdResponse::EraseConfig);
        rig.tick();

        let mut expected_scan = vec![2u8, 12];
        expected_scan.extend_from_slice(b"home-network");
        expected_scan.push(-40i8 as u8);
        expected_scan.push(5);
        expected_scan.extend_from_slice(b"guest");
        expected_scan.push(-70i8 as u8);

        assert_eq!(
            rig.responses(),
            vec![
                (SensoraCmd::ReadDeviceState as u8, vec![ProvisionState::WaitNetworkConfig.code(), 0]),
                (SensoraCmd::ScanWifiNetworks as u8, expected_scan),
                (SensoraCmd::EraseConfig as u8, vec![1]),
            ]
        );
    }

    #[test]
    fn scan_response_fits_link_buffer() {
        let networks: Vec<_> = (0..20)
            .map(|i| ScanResult {
                ssid: format!("network-{i:02}"),
                channel: 1,
                rssi: -50,
                auth_required: true,
            })
            .collect();
        let data = scan_response(&networks);
        assert!(data.len() + FRAME_OVERHEAD <= MAX_LINK_BUFFER);
        assert_eq!(data[0] as usize, (data.len() - 1) / 12);
    }
}
