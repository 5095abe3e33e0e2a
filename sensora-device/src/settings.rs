//! Runtime settings

use sensora_mcu::{LastWill, TransportOptions};
use sensora_proto::{DeviceConfig, DeviceStatus, Topics};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub keep_alive_secs: u16,
    pub firmware_version: String,
    /// How often device stats are republished
    pub stats_sync_interval_ms: u64,
    /// Deadline for network join and cloud connect
    pub connect_timeout_ms: u64,
    /// Pause before retrying a failed config write
    pub finish_retry_delay_ms: u64,
    pub max_properties: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mqtt_host: "mqtt.sensora.io".to_string(),
            mqtt_port: 1883,
            keep_alive_secs: 15,
            firmware_version: "1.0.0".to_string(),
            stats_sync_interval_ms: 15_000,
            connect_timeout_ms: 10_000,
            finish_retry_delay_ms: 1_000,
            max_properties: 20,
        }
    }
}

impl Settings {
    /// Broker login is the device id and token. The broker announces
    /// `status=Lost` on the device info topic when the device drops.
    pub fn transport_options(&self, config: &DeviceConfig) -> TransportOptions {
        TransportOptions {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            client_id: config.device_id.clone(),
            username: config.device_id.clone(),
            password: config.device_token.clone(),
            keep_alive_secs: self.keep_alive_secs,
            last_will: Some(LastWill {
                topic: Topics::new(&config.device_id).device_info,
                payload: format!("status={}", DeviceStatus::Lost.code()).into_bytes(),
                retain: true,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let s: Settings = serde_json::from_str(r#"{"mqtt_host": "localhost"}"#).unwrap();
        assert_eq!(s.mqtt_host, "localhost");
        assert_eq!(s.mqtt_port, 1883);
        assert_eq!(s.stats_sync_interval_ms, 15_000);
    }

    #[test]
    fn last_will_is_lost_status() {
        let config = DeviceConfig {
            device_id: "d".repeat(32),
            device_token: "t".repeat(32),
            ..Default::default()
        };
        let opts = Settings::default().transport_options(&config);
        let will = opts.last_will.unwrap();
        assert_eq!(will.topic, format!("sc/{}/dev/info", "d".repeat(32)));
        assert_eq!(will.payload, b"status=5");
        assert!(will.retain);
        assert_eq!(opts.password, "t".repeat(32));
    }
}
