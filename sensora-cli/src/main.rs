//! Host tool for Sensora devices
//!
//! Builds and decodes serial link frames, provisions a device over a serial
//! port and runs a simulated device against in-memory hardware.

mod config;
mod provision;
mod simulate;
mod storage;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};
use sensora_proto::{CmdError, CmdResponse, Frame, SensoraCmd, WiFiConfig};

#[derive(Parser)]
#[command(name = "sensora")]
#[command(about = "Provisioning and simulation tool for Sensora devices")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a request frame and print it as hex
    Frame {
        #[command(subcommand)]
        request: FrameRequest,
    },
    /// Decode a hex encoded frame
    Decode {
        /// Frame bytes as hex
        hex: String,
    },
    /// Send credentials to a device over a serial port (8N1)
    Provision {
        /// Serial port, e.g. /dev/ttyUSB0 or COM3
        #[arg(short, long)]
        port: String,
        /// Line speed
        #[arg(short, long, default_value = "115200")]
        baud: u32,
        #[command(flatten)]
        credentials: Credentials,
        /// Seconds to wait for each connection step
        #[arg(short, long, default_value = "30")]
        timeout: u64,
    },
    /// Run a simulated device with storage in the home directory
    Simulate {
        /// Credentials fed over the simulated serial port when unprovisioned
        #[command(flatten)]
        credentials: Option<Credentials>,
        /// Milliseconds between state machine ticks
        #[arg(long, default_value = "100")]
        tick_ms: u64,
    },
    /// Clear the simulated device's stored config
    Erase,
}

#[derive(Subcommand)]
enum FrameRequest {
    /// SaveWiFiCredentials
    Wifi { ssid: String, password: String },
    /// SaveDeviceCredentials
    Device { device_id: String, device_token: String },
    /// EraseConfig
    Erase,
    /// ScanWifiNetworks
    Scan,
    /// ReadDeviceState
    State,
}

#[derive(clap::Args, Clone, Debug)]
struct Credentials {
    #[arg(long)]
    ssid: String,
    #[arg(long)]
    password: String,
    #[arg(long)]
    device_id: String,
    #[arg(long)]
    device_token: String,
}

impl Credentials {
    fn wifi(&self) -> CmdResponse {
        CmdResponse::SaveWiFiCredentials(WiFiConfig {
            ssid: self.ssid.clone(),
            password: self.password.clone(),
        })
    }

    fn device(&self) -> CmdResponse {
        CmdResponse::SaveDeviceCredentials {
            device_id: self.device_id.clone(),
            device_token: self.device_token.clone(),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Frame { request } => {
            let req = match request {
                FrameRequest::Wifi { ssid, password } => {
                    CmdResponse::SaveWiFiCredentials(WiFiConfig { ssid, password })
                }
                FrameRequest::Device {
                    device_id,
                    device_token,
                } => CmdResponse::SaveDeviceCredentials {
                    device_id,
                    device_token,
                },
                FrameRequest::Erase => CmdResponse::EraseConfig,
                FrameRequest::Scan => CmdResponse::ScanWifiNetworks,
                FrameRequest::State => CmdResponse::ReadDeviceState,
            };
            println!("{}", HEXLOWER.encode(&req.to_frame()?));
        }
        Commands::Decode { hex } => {
            let compact: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
            let bytes = HEXLOWER_PERMISSIVE
                .decode(compact.as_bytes())
                .context("frame is not valid hex")?;
            let frame = match Frame::decode(&bytes) {
                Ok(frame) => frame,
                Err(e) => bail!("invalid frame: {e} (code {})", e.code()),
            };
            println!("{}", describe(&frame));
        }
        Commands::Provision {
            port,
            baud,
            credentials,
            timeout,
        } => {
            let timeout = std::time::Duration::from_secs(timeout);
            tokio::task::spawn_blocking(move || provision::run(&port, baud, &credentials, timeout)).await??;
        }
        Commands::Simulate {
            credentials,
            tick_ms,
        } => {
            let home = config::sensora_home()?;
            let settings = config::load_settings(&home)?;
            simulate::run(&home, settings, credentials, tick_ms).await?;
        }
        Commands::Erase => {
            let home = config::sensora_home()?;
            storage::FileStorage::open(home.join("device"))?.erase()?;
            println!("Erased stored config in {}", home.join("device").display());
        }
    }
    Ok(())
}

/// Human readable form of a device request or response frame
fn describe(frame: &Frame<'_>) -> String {
    let Ok(cmd) = SensoraCmd::try_from(frame.cmd) else {
        return format!("unknown command 0x{:02x}, data {}", frame.cmd, HEXLOWER.encode(frame.data));
    };
    match (cmd, frame.data) {
        (SensoraCmd::CommandError, [code, ..]) => match CmdError::from_code(*code) {
            Some(err) => format!("CommandError: {err} (code {code})"),
            None => format!("CommandError: unknown code {code}"),
        },
        (SensoraCmd::NetworkStatus | SensoraCmd::MqttStatus | SensoraCmd::EraseConfig, [status, ..]) => {
            format!("{cmd:?}: {}", if *status == 1 { "ok" } else { "failed" })
        }
        (SensoraCmd::ReadDeviceState, [state, err, ..]) => {
            let err = CmdError::from_code(*err).map(|e| e.to_string()).unwrap_or_else(|| "none".into());
            format!("ReadDeviceState: provision state {state}, last error {err}")
        }
        (SensoraCmd::ScanWifiNetworks, [_, ..]) => match parse_scan(frame.data) {
            Some(networks) => {
                let mut out = format!("ScanWifiNetworks: {} networks", networks.len());
                for (ssid, rssi) in networks {
                    out.push_str(&format!("\n  {ssid} ({rssi} dBm)"));
                }
                out
            }
            None => format!("ScanWifiNetworks: malformed data {}", HEXLOWER.encode(frame.data)),
        },
        _ => match CmdResponse::parse(frame) {
            Ok(req) => format!("{req:?}"),
            Err(_) => format!("{cmd:?}, data {}", HEXLOWER.encode(frame.data)),
        },
    }
}

fn parse_scan(data: &[u8]) -> Option<Vec<(String, i8)>> {
    let (&count, mut rest) = data.split_first()?;
    let mut networks = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (&len, tail) = rest.split_first()?;
        let ssid = tail.get(..len as usize)?;
        let rssi = *tail.get(len as usize)? as i8;
        networks.push((String::from_utf8_lossy(ssid).into_owned(), rssi));
        rest = &tail[len as usize + 1..];
    }
    Some(networks)
}
