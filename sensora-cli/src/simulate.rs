//! A device running on simulated hardware with file-backed config

use crate::storage::FileStorage;
use crate::Credentials;
use anyhow::bail;
use rand::Rng;
use sensora_device::{
    AccessMode, DataType, DeviceState, Property, PropertyHandle, PropertyValue, SensoraDevice,
    Settings, SyncStrategy,
};
use sensora_mcu::sim::{SimBoard, SimClock, SimSerial, SimTransport};
use sensora_mcu::Hardware;
use sensora_proto::{Frame, FRAME_OVERHEAD};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

type SimDevice = SensoraDevice<SimBoard, SimTransport, FileStorage, SimSerial, SimClock>;

struct Demo {
    temperature: PropertyHandle,
    humidity: PropertyHandle,
}

pub async fn run(
    home: &Path,
    settings: Settings,
    credentials: Option<Credentials>,
    tick_ms: u64,
) -> anyhow::Result<()> {
    let storage = FileStorage::open(home.join("device"))?;
    let clock = SimClock::new();
    let board = SimBoard::new(clock.clone());
    let transport = SimTransport::new(clock.clone());
    let serial = SimSerial::new();
    if let Some(credentials) = &credentials {
        board.add_network(&credentials.ssid, -55);
    }
    info!("simulating device with config in {}", storage.dir().display());

    let mut rng = rand::thread_rng();
    let mut ticker = tokio::time::interval(Duration::from_millis(tick_ms.max(1)));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    'boot: loop {
        let hw = Hardware::new(
            board.clone(),
            transport.clone(),
            storage.clone(),
            serial.clone(),
            clock.clone(),
        );
        let mut device = SensoraDevice::new(hw, settings.clone());
        let demo = register_demo(&mut device)?;
        device.setup();

        if device.state() == DeviceState::Provision {
            let Some(credentials) = &credentials else {
                bail!("device is not provisioned, pass --ssid, --password, --device-id and --device-token");
            };
            serial.inject(&credentials.wifi().to_frame()?);
            serial.inject(&credentials.device().to_frame()?);
        }

        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("stopping simulation");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }
            clock.advance(tick_ms);

            if let Some(p) = device.property_mut(demo.temperature) {
                p.value_mut().set_f32(rng.gen_range(18.0..26.0));
            }
            if rng.gen_ratio(1, 100) {
                if let Some(p) = device.property_mut(demo.humidity) {
                    p.value_mut().set_int(rng.gen_range(30..70));
                }
            }

            device.tick();

            for frame in split_frames(&serial.take_written()) {
                match Frame::decode(frame) {
                    Ok(frame) => info!("serial: {}", crate::describe(&frame)),
                    Err(e) => warn!("serial: malformed frame: {e}"),
                }
            }
            for (topic, payload) in transport.take_published() {
                info!("{topic} <- {}", String::from_utf8_lossy(&payload));
            }

            if device.restart_requested() {
                info!("device restarting");
                continue 'boot;
            }
        }
    }
}

fn register_demo(device: &mut SimDevice) -> anyhow::Result<Demo> {
    let temperature = device.register(
        Property::new("temperature", "Temperature")
            .data_type(DataType::Float)
            .sync_strategy(SyncStrategy::Periodic, 10_000),
    )?;
    let humidity = device.register(
        Property::new("humidity", "Humidity").sync_strategy(SyncStrategy::OnChange, 0),
    )?;
    device.register(
        Property::new("led", "Led")
            .data_type(DataType::Boolean)
            .access_mode(AccessMode::ReadWrite)
            .subscribe(|value: &PropertyValue| info!("led set to {value}")),
    )?;
    Ok(Demo {
        temperature,
        humidity,
    })
}

/// Consecutive frames written by the device, cut by their length byte
fn split_frames(mut bytes: &[u8]) -> Vec<&[u8]> {
    let mut frames = Vec::new();
    while bytes.len() >= FRAME_OVERHEAD {
        let len = (FRAME_OVERHEAD + bytes[8] as usize).min(bytes.len());
        frames.push(&bytes[..len]);
        bytes = &bytes[len..];
    }
    frames
}
