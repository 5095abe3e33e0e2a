//! Persisted configuration records.
//!
//! Records are fixed-size and NUL-padded so they fit simple key/value flash
//! storage: `device` holds [`DeviceConfig`], `netw` holds [`WiFiConfig`].

use crate::CmdError;

pub const DEVICE_CONFIG_KEY: &str = "device";
pub const NETWORK_CONFIG_KEY: &str = "netw";

pub const DEVICE_ID_LEN: usize = 32;
pub const DEVICE_TOKEN_LEN: usize = 32;
pub const MAX_SSID_LEN: usize = 32;
pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 63;

/// Capacity of a property value buffer, including the trailing NUL on the C side
pub const PROPERTY_BUFFER_SIZE: usize = 64;
pub const MAX_PROPERTY_ID_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ConnectionType {
    #[default]
    Unknown = 0,
    WiFi = 1,
    Ethernet = 2,
    Gsm = 3,
}

impl From<u8> for ConnectionType {
    fn from(value: u8) -> Self {
        match value {
            1 => ConnectionType::WiFi,
            2 => ConnectionType::Ethernet,
            3 => ConnectionType::Gsm,
            _ => ConnectionType::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceConfig {
    pub device_id: String,
    pub device_token: String,
    pub connection_type: ConnectionType,
}

impl DeviceConfig {
    /// id[33] + token[33] + connection type
    pub const RECORD_LEN: usize = DEVICE_ID_LEN + 1 + DEVICE_TOKEN_LEN + 1 + 1;

    pub fn has_valid_credentials(&self) -> bool {
        validate_device_credentials(&self.device_id, &self.device_token).is_ok()
    }

    pub fn clear_credentials(&mut self) {
        self.device_id.clear();
        self.device_token.clear();
    }

    pub fn to_record(&self) -> [u8; Self::RECORD_LEN] {
        let mut record = [0u8; Self::RECORD_LEN];
        let (id, rest) = record.split_at_mut(DEVICE_ID_LEN + 1);
        let (token, conn) = rest.split_at_mut(DEVICE_TOKEN_LEN + 1);
        put_str(id, &self.device_id);
        put_str(token, &self.device_token);
        conn[0] = self.connection_type as u8;
        record
    }

    /// Records of the wrong size load as an empty config
    pub fn from_record(record: &[u8]) -> Self {
        if record.len() != Self::RECORD_LEN {
            return Self::default();
        }
        let (id, rest) = record.split_at(DEVICE_ID_LEN + 1);
        let (token, conn) = rest.split_at(DEVICE_TOKEN_LEN + 1);
        Self {
            device_id: get_str(id),
            device_token: get_str(token),
            connection_type: ConnectionType::from(conn[0]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WiFiConfig {
    pub ssid: String,
    pub password: String,
}

impl WiFiConfig {
    /// ssid[33] + password[65]
    pub const RECORD_LEN: usize = 33 + 65;

    pub fn is_valid(&self) -> bool {
        validate_wifi_credentials(&self.ssid, &self.password).is_ok()
    }

    pub fn to_record(&self) -> [u8; Self::RECORD_LEN] {
        let mut record = [0u8; Self::RECORD_LEN];
        let (ssid, password) = record.split_at_mut(33);
        put_str(ssid, &self.ssid);
        put_str(password, &self.password);
        record
    }

    pub fn from_record(record: &[u8]) -> Self {
        if record.len() != Self::RECORD_LEN {
            return Self::default();
        }
        let (ssid, password) = record.split_at(33);
        Self {
            ssid: get_str(ssid),
            password: get_str(password),
        }
    }
}

/// SSID 1..=32 bytes, password 8..=63 bytes
pub fn validate_wifi_credentials(ssid: &str, password: &str) -> Result<(), CmdError> {
    if ssid.is_empty() || ssid.len() > MAX_SSID_LEN {
        return Err(CmdError::InvalidNetwCredentials);
    }
    if password.len() < MIN_PASSWORD_LEN || password.len() > MAX_PASSWORD_LEN {
        return Err(CmdError::InvalidNetwCredentials);
    }
    Ok(())
}

/// Device id and token are exactly 32 bytes each
pub fn validate_device_credentials(device_id: &str, device_token: &str) -> Result<(), CmdError> {
    if device_id.len() != DEVICE_ID_LEN || device_token.len() != DEVICE_TOKEN_LEN {
        return Err(CmdError::InvalidDeviceCredentials);
    }
    Ok(())
}

// Leaves at least one trailing NUL
fn put_str(field: &mut [u8], value: &str) {
    let n = value.len().min(field.len().saturating_sub(1));
    field[..n].copy_from_slice(&value.as_bytes()[..n]);
}

fn get_str(field: &[u8]) -> String {
    let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wifi_validation_bounds() {
        assert!(validate_wifi_credentials("a", "12345678").is_ok());
        assert!(validate_wifi_credentials(&"s".repeat(32), &"p".repeat(63)).is_ok());
        assert_eq!(validate_wifi_credentials("", "12345678"), Err(CmdError::InvalidNetwCredentials));
        assert_eq!(
            validate_wifi_credentials(&"s".repeat(33), "12345678"),
            Err(CmdError::InvalidNetwCredentials)
        );
        assert_eq!(validate_wifi_credentials("ssid", "1234567"), Err(CmdError::InvalidNetwCredentials));
        assert_eq!(
            validate_wifi_credentials("ssid", &"p".repeat(64)),
            Err(CmdError::InvalidNetwCredentials)
        );
    }

    #[test]
    fn device_validation_requires_exact_length() {
        let ok = "x".repeat(32);
        assert!(validate_device_credentials(&ok, &ok).is_ok());
        assert_eq!(
            validate_device_credentials(&"x".repeat(31), &ok),
            Err(CmdError::InvalidDeviceCredentials)
        );
        assert_eq!(
            validate_device_credentials(&ok, &"x".repeat(33)),
            Err(CmdError::InvalidDeviceCredentials)
        );
    }

    #[test]
    fn records_round_trip() {
        let device = DeviceConfig {
            device_id: "i".repeat(32),
            device_token: "t".repeat(32),
            connection_type: ConnectionType::WiFi,
        };
        assert_eq!(DeviceConfig::from_record(&device.to_record()), device);

        let wifi = WiFiConfig {
            ssid: "home".into(),
            password: "p".repeat(63),
        };
        assert_eq!(WiFiConfig::from_record(&wifi.to_record()), wifi);
    }

    #[test]
    fn wrong_size_record_loads_empty() {
        assert_eq!(DeviceConfig::from_record(&[1, 2, 3]), DeviceConfig::default());
        assert_eq!(WiFiConfig::from_record(&[]), WiFiConfig::default());
    }
}
