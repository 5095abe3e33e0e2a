//! Provisioning a real board over its serial port

use crate::Credentials;
use anyhow::{bail, Context};
use sensora_proto::blocking::{write_frame, FrameReader};
use sensora_proto::{CmdError, CmdResponse, Frame, SensoraCmd};
use serialport::SerialPort;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Single read wait, the step timeout is enforced around it
const READ_TIMEOUT: Duration = Duration::from_millis(200);

pub fn run(port_name: &str, baud: u32, credentials: &Credentials, timeout: Duration) -> anyhow::Result<()> {
    info!("opening {port_name} at {baud} baud");
    let mut port = serialport::new(port_name, baud)
        .data_bits(serialport::DataBits::Eight)
        .stop_bits(serialport::StopBits::One)
        .parity(serialport::Parity::None)
        .flow_control(serialport::FlowControl::None)
        .timeout(READ_TIMEOUT)
        .open()
        .with_context(|| format!("failed to open serial port {port_name}"))?;
    let mut frames = FrameReader::new();

    info!("sending WiFi credentials for '{}'", credentials.ssid);
    send(&mut *port, &credentials.wifi())?;
    wait_status(&mut *port, &mut frames, SensoraCmd::NetworkStatus, timeout)?;
    info!("device joined '{}'", credentials.ssid);

    info!("sending device credentials for {}", credentials.device_id);
    send(&mut *port, &credentials.device())?;
    wait_status(&mut *port, &mut frames, SensoraCmd::MqttStatus, timeout)?;
    info!("device reached the broker and is restarting");
    Ok(())
}

fn send(port: &mut dyn SerialPort, req: &CmdResponse) -> anyhow::Result<()> {
    let data = req.to_data()?;
    write_frame(port, req.cmd(), &data).context("failed to write frame")?;
    Ok(())
}

/// Wait for `expected`, failing on a `CommandError` frame
fn wait_status(
    port: &mut dyn SerialPort,
    frames: &mut FrameReader,
    expected: SensoraCmd,
    timeout: Duration,
) -> anyhow::Result<()> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        let Some(bytes) = frames.read_frame(&mut *port)? else {
            continue;
        };
        let frame = match Frame::decode(&bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("dropping malformed frame: {e}");
                continue;
            }
        };
        match SensoraCmd::try_from(frame.cmd) {
            Ok(SensoraCmd::CommandError) => {
                let code = frame.data.first().copied().unwrap_or(0);
                match CmdError::from_code(code) {
                    Some(err) => bail!("device reported: {err}"),
                    None => bail!("device reported unknown error code {code}"),
                }
            }
            Ok(cmd) if cmd == expected => {
                if frame.data.first() == Some(&1) {
                    return Ok(());
                }
                bail!("device reported {expected:?} failure");
            }
            _ => debug!("ignoring frame: {}", crate::describe(&frame)),
        }
    }
    bail!("no {expected:?} from device within {}s", timeout.as_secs())
}
