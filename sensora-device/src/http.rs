//! HTTP provisioning. The web server lives with the board; it forwards
//! `POST /config` bodies and `GET /status` requests here.

use crate::provision::{PendingDevice, Provision, ProvisionState};
use log::*;
use sensora_proto::{validate_device_credentials, validate_wifi_credentials, CmdError, WiFiConfig};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HttpProvisionError {
    #[error("Invalid JSON")]
    InvalidJson,
    #[error("Invalid Device credentials")]
    InvalidDeviceCredentials,
    #[error("Missing ssid or password")]
    MissingWifiFields,
    #[error("Invalid WiFi credentials")]
    InvalidWifiCredentials,
    #[error("Invalid configuration")]
    InvalidConfiguration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigRequest {
    #[serde(default)]
    device_id: String,
    #[serde(default)]
    device_token: String,
    wifi: Option<WifiRequest>,
}

#[derive(Debug, Deserialize)]
struct WifiRequest {
    ssid: Option<String>,
    password: Option<String>,
}

impl Provision {
    /// Handle a `POST /config` body, returns the HTTP status and JSON response
    pub fn handle_http_config(&mut self, body: &[u8]) -> (u16, Value) {
        match self.apply_http_config(body) {
            Ok(()) => (200, json!({ "status": "OK" })),
            Err(err) => {
                warn!("http provisioning rejected: {err}");
                (400, json!({ "status": "ERROR", "message": err.to_string() }))
            }
        }
    }

    fn apply_http_config(&mut self, body: &[u8]) -> Result<(), HttpProvisionError> {
        let req: ConfigRequest = serde_json::from_slice(body).map_err(|e| {
            error!("failed to parse config body: {e}");
            HttpProvisionError::InvalidJson
        })?;

        validate_device_credentials(&req.device_id, &req.device_token)
            .map_err(|_| HttpProvisionError::InvalidDeviceCredentials)?;
        let wifi = req.wifi.ok_or(HttpProvisionError::InvalidConfiguration)?;
        let (Some(ssid), Some(password)) = (wifi.ssid, wifi.password) else {
            return Err(HttpProvisionError::MissingWifiFields);
        };
        validate_wifi_credentials(&ssid, &password).map_err(|_| HttpProvisionError::InvalidWifiCredentials)?;

        info!("received configuration for ssid '{ssid}' over http");
        self.device = Some(PendingDevice {
            device_id: req.device_id,
            device_token: req.device_token,
        });
        self.wifi = Some(WiFiConfig { ssid, password });
        self.set_state(ProvisionState::ConnectNetwork);
        Ok(())
    }

    /// Response for `GET /status`
    pub fn http_status(&self) -> (u16, Value) {
        let mut doc = json!({ "state": self.state().code() });
        match self.last_error {
            Some(CmdError::NetworkConnMismatch) => {
                doc["network"] = json!("Board does not support WiFi connection type");
            }
            Some(CmdError::InvalidNetwCredentials) => doc["network"] = json!("Invalid WiFi credentials"),
            Some(CmdError::NetworkConnTimeout) => {
                doc["network"] = json!("Network connection timeout, please try again");
            }
            Some(CmdError::InvalidDeviceCredentials) => {
                doc["cloud"] = json!("Failed to connect to Sensora Cloud, please check device credentials");
            }
            Some(CmdError::MqttConnTimeout) => {
                doc["cloud"] = json!("Sensora Cloud connection timeout, please try again");
            }
            Some(CmdError::InvalidData | CmdError::CrcMismatch | CmdError::InvalidCommand) | None => {}
        }
        (200, doc)
    }
}
