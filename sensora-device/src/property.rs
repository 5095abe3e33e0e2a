//! Properties: named, typed value slots synchronized with the cloud

use sensora_proto::PROPERTY_BUFFER_SIZE;
use std::fmt::{self, Write as _};

/// Longest value text, one byte of the C buffer is the NUL
pub const MAX_VALUE_LEN: usize = PROPERTY_BUFFER_SIZE - 1;
/// Cap on consecutive failed syncs
pub const MAX_SYNC_FAILS: u8 = 30;
pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DataType {
    String = 1,
    #[default]
    Integer,
    Float,
    Boolean,
    Enum,
    Color,
    Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum AccessMode {
    /// Device to cloud
    #[default]
    Read = 1,
    /// Cloud to device
    Write,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SyncStrategy {
    #[default]
    Periodic = 0,
    OnChange = 1,
}

/// Bounded text value, longer input is truncated at a char boundary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyValue {
    buf: heapless::String<MAX_VALUE_LEN>,
}

impl PropertyValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_str(&mut self, value: &str) {
        self.set_fmt(format_args!("{value}"));
    }

    /// Raw bytes from the wire, invalid UTF-8 is replaced
    pub fn set_bytes(&mut self, value: &[u8]) {
        self.set_str(&String::from_utf8_lossy(value));
    }

    pub fn set_int(&mut self, value: i64) {
        self.set_fmt(format_args!("{value}"));
    }

    pub fn set_f32(&mut self, value: f32) {
        self.set_fmt(format_args!("{value:.3}"));
    }

    pub fn set_f64(&mut self, value: f64) {
        self.set_fmt(format_args!("{value:.8}"));
    }

    pub fn set_bool(&mut self, value: bool) {
        self.set_str(if value { "true" } else { "false" });
    }

    fn set_fmt(&mut self, args: fmt::Arguments<'_>) {
        self.buf.clear();
        if Truncating(&mut self.buf).write_fmt(args).is_err() {
            log::warn!("failed to format property value");
        }
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Leading integer like C `atoi`, 0 when there is none
    pub fn as_int(&self) -> i32 {
        let s = self.buf.trim_start();
        let (negative, digits) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };
        let mut n: i64 = 0;
        for b in digits.bytes().take_while(u8::is_ascii_digit) {
            n = (n * 10 + i64::from(b - b'0')).min(i64::from(i32::MAX) + 1);
        }
        let n = if negative { -n } else { n };
        n.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
    }

    /// Longest numeric prefix, 0.0 when there is none
    pub fn as_float(&self) -> f64 {
        let s = self.buf.trim_start();
        (1..=s.len())
            .rev()
            .filter(|end| s.is_char_boundary(*end))
            .find_map(|end| s[..end].parse::<f64>().ok())
            .unwrap_or(0.0)
    }

    pub fn as_bool(&self) -> bool {
        self.buf.starts_with("true")
    }
}

/// Writes into a value buffer, dropping what does not fit
struct Truncating<'a>(&'a mut heapless::String<MAX_VALUE_LEN>);

impl fmt::Write for Truncating<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut end = s.len().min(MAX_VALUE_LEN - self.0.len());
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        self.0.push_str(&s[..end]).map_err(|()| fmt::Error)
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.buf)
    }
}

/// Receives values pushed from the cloud
pub trait PropertySubscriber {
    fn on_update(&mut self, value: &PropertyValue);
}

impl<F: FnMut(&PropertyValue)> PropertySubscriber for F {
    fn on_update(&mut self, value: &PropertyValue) {
        self(value)
    }
}

pub struct Property {
    id: String,
    name: String,
    node_id: String,
    data_type: DataType,
    access_mode: AccessMode,
    sync_strategy: SyncStrategy,
    sync_interval_ms: u64,
    value: PropertyValue,
    cloud_value: PropertyValue,
    cloud_synced_at: Option<u64>,
    cloud_sync_fails: u8,
    subscriber: Option<Box<dyn PropertySubscriber>>,
}

impl Property {
    /// Integer, read-only, synced every 10 seconds unless configured otherwise
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            node_id: String::new(),
            data_type: DataType::default(),
            access_mode: AccessMode::default(),
            sync_strategy: SyncStrategy::default(),
            sync_interval_ms: DEFAULT_SYNC_INTERVAL_MS,
            value: PropertyValue::new(),
            cloud_value: PropertyValue::new(),
            cloud_synced_at: None,
            cloud_sync_fails: 0,
            subscriber: None,
        }
    }

    pub fn node_id(mut self, node_id: &str) -> Self {
        self.node_id = node_id.to_string();
        self
    }

    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn access_mode(mut self, access_mode: AccessMode) -> Self {
        self.access_mode = access_mode;
        self
    }

    pub fn sync_strategy(mut self, strategy: SyncStrategy, interval_ms: u64) -> Self {
        self.sync_strategy = strategy;
        self.sync_interval_ms = interval_ms;
        self
    }

    pub fn subscribe(mut self, subscriber: impl PropertySubscriber + 'static) -> Self {
        self.subscriber = Some(Box::new(subscriber));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self) -> &str {
        &self.node_id
    }

    pub fn kind(&self) -> DataType {
        self.data_type
    }

    pub fn mode(&self) -> AccessMode {
        self.access_mode
    }

    pub fn strategy(&self) -> SyncStrategy {
        self.sync_strategy
    }

    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut PropertyValue {
        &mut self.value
    }

    pub fn cloud_value(&self) -> &PropertyValue {
        &self.cloud_value
    }

    pub fn cloud_synced_at(&self) -> Option<u64> {
        self.cloud_synced_at
    }

    pub fn sync_fails(&self) -> u8 {
        self.cloud_sync_fails
    }

    /// Whether the current value should be published at `now_ms`
    pub fn should_sync(&self, now_ms: u64) -> bool {
        if self.access_mode == AccessMode::Write {
            return false;
        }
        let Some(synced_at) = self.cloud_synced_at else {
            return true;
        };
        let changed = self.value != self.cloud_value;
        match self.sync_strategy {
            SyncStrategy::OnChange => changed,
            SyncStrategy::Periodic => {
                if now_ms.saturating_sub(synced_at) < self.sync_interval_ms {
                    return false;
                }
                match self.access_mode {
                    AccessMode::ReadWrite => changed,
                    _ => !self.value.is_empty(),
                }
            }
        }
    }

    pub fn on_cloud_synced(&mut self, now_ms: u64) {
        self.cloud_value = self.value.clone();
        self.cloud_synced_at = Some(now_ms);
        self.cloud_sync_fails = 0;
    }

    pub fn on_cloud_sync_failed(&mut self) {
        if self.cloud_sync_fails < MAX_SYNC_FAILS {
            self.cloud_sync_fails += 1;
        }
    }

    /// Value pushed from the cloud
    pub fn on_message(&mut self, value: &[u8], now_ms: u64) {
        self.value.set_bytes(value);
        self.on_cloud_synced(now_ms);
        if let Some(subscriber) = self.subscriber.as_mut() {
            subscriber.on_update(&self.value);
        }
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("node_id", &self.node_id)
            .field("data_type", &self.data_type)
            .field("access_mode", &self.access_mode)
            .field("sync_strategy", &self.sync_strategy)
            .field("sync_interval_ms", &self.sync_interval_ms)
            .field("value", &self.value.as_str())
            .field("cloud_value", &self.cloud_value.as_str())
            .field("cloud_synced_at", &self.cloud_synced_at)
            .field("cloud_sync_fails", &self.cloud_sync_fails)
            .field("subscribed", &self.subscriber.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn write_only_never_syncs() {
        let mut p = Property::new("relay", "Relay").access_mode(AccessMode::Write);
        assert!(!p.should_sync(0));
        p.value_mut().set_bool(true);
        assert!(!p.should_sync(1_000_000));
        p.on_cloud_synced(0);
        p.value_mut().set_bool(false);
        assert!(!p.should_sync(1_000_000));
    }

    #[test]
    fn on_change_follows_snapshot() {
        let mut p = Property::new("temp", "Temperature").sync_strategy(SyncStrategy::OnChange, 0);
        assert!(p.should_sync(0));
        p.value_mut().set_int(21);
        p.on_cloud_synced(5);
        assert!(!p.should_sync(6));
        p.value_mut().set_int(22);
        assert!(p.should_sync(7));
        p.on_cloud_synced(7);
        assert!(!p.should_sync(8));
    }

    #[test]
    fn periodic_read_waits_for_interval() {
        let mut p = Property::new("hum", "Humidity").sync_strategy(SyncStrategy::Periodic, 1000);
        p.value_mut().set_int(40);
        assert!(p.should_sync(0));
        p.on_cloud_synced(0);
        assert!(!p.should_sync(999));
        assert!(p.should_sync(1000));

        p.value_mut().set_str("");
        assert!(!p.should_sync(5000));
    }

    #[test]
    fn periodic_read_write_needs_change() {
        let mut p = Property::new("target", "Target")
            .access_mode(AccessMode::ReadWrite)
            .sync_strategy(SyncStrategy::Periodic, 1000);
        p.value_mut().set_int(1);
        p.on_cloud_synced(0);
        assert!(!p.should_sync(5000));
        p.value_mut().set_int(2);
        assert!(!p.should_sync(500));
        assert!(p.should_sync(1000));
    }

    #[test]
    fn sync_failures_are_capped() {
        let mut p = Property::new("x", "X");
        for _ in 0..100 {
            p.on_cloud_sync_failed();
        }
        assert_eq!(p.sync_fails(), MAX_SYNC_FAILS);
        p.on_cloud_synced(0);
        assert_eq!(p.sync_fails(), 0);
    }

    #[test]
    fn message_updates_value_and_notifies() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut p = Property::new("led", "Led")
            .access_mode(AccessMode::ReadWrite)
            .subscribe(move |v: &PropertyValue| sink.borrow_mut().push(v.as_bool()));
        p.on_message(b"true", 42);
        assert!(p.value().as_bool());
        assert_eq!(p.cloud_value().as_str(), "true");
        assert_eq!(p.cloud_synced_at(), Some(42));
        assert_eq!(*seen.borrow(), vec![true]);
    }

    #[test]
    fn value_formatting_and_truncation() {
        let mut v = PropertyValue::new();
        v.set_f32(1.5);
        assert_eq!(v.as_str(), "1.500");
        v.set_f64(0.25);
        assert_eq!(v.as_str(), "0.25000000");
        v.set_int(-17);
        assert_eq!(v.as_int(), -17);

        v.set_str(&"é".repeat(40));
        assert!(v.len() <= MAX_VALUE_LEN);
        assert_eq!(v.len(), 62);

        v.set_f64(1e70);
        assert_eq!(v.len(), MAX_VALUE_LEN);
        assert!(v.as_str().starts_with("10000"));
        v.set_bool(true);
        assert_eq!(v.as_str(), "true");

        v.set_str("  42abc");
        assert_eq!(v.as_int(), 42);
        v.set_str("3.5kg");
        assert_eq!(v.as_float(), 3.5);
        v.set_str("none");
        assert_eq!(v.as_int(), 0);
        assert_eq!(v.as_float(), 0.0);
    }
}
