//! MQTT topic layout, all topics live under `sc/{device_id}/`

pub const TOPIC_PREFIX: &str = "sc";

/// Per-device topic set, built once after credentials are known
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub device_info: String,
    pub property_info: String,
    pub inbound: String,
    pub outbound: String,
}

impl Topics {
    pub fn new(device_id: &str) -> Self {
        Self {
            device_info: format!("{TOPIC_PREFIX}/{device_id}/dev/info"),
            property_info: format!("{TOPIC_PREFIX}/{device_id}/prop/info"),
            inbound: format!("{TOPIC_PREFIX}/{device_id}/msg/recv"),
            outbound: format!("{TOPIC_PREFIX}/{device_id}/msg/pub"),
        }
    }
}

/// The `{device_id}` segment of a `sc/{device_id}/...` topic
pub fn extract_device_id(topic: &str) -> Option<&str> {
    let rest = topic.strip_prefix(TOPIC_PREFIX)?.strip_prefix('/')?;
    let (device_id, _) = rest.split_once('/')?;
    (!device_id.is_empty()).then_some(device_id)
}
