//! Sensora wire protocol - serial link framing, cloud payloads and config records
//!
//! Serial frame layout:
//!
//! ```text
//! +----------------+-----+--------------+-----+-----+------+
//! | "sensora" 0x01 | len | data[0..len] | sum | cmd | 0x99 |
//! +----------------+-----+--------------+-----+-----+------+
//! ```
//!
//! `sum` is the sum of the data bytes modulo 256.

pub mod config;
pub mod payload;
pub mod topic;

pub use config::*;
pub use payload::*;
pub use topic::*;

use log::*;

/// Start-of-frame marker
pub const SOF: [u8; 8] = [0x73, 0x65, 0x6E, 0x73, 0x6F, 0x72, 0x61, 0x01];
/// Last byte of every frame
pub const TERMINATOR: u8 = 0x99;
/// Marker + length + checksum + command + terminator
pub const FRAME_OVERHEAD: usize = 12;
pub const MIN_FRAME_LEN: usize = 10;
/// The length field is a single byte
pub const MAX_DATA_LEN: usize = u8::MAX as usize;
/// Receive buffer of the on-device accumulator
pub const MAX_LINK_BUFFER: usize = 128;
/// Maximum time between the first and the last byte of a frame
pub const FRAME_TIMEOUT_MS: u64 = 1000;

/// Command byte of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SensoraCmd {
    CommandError = 0x00,
    ReadDeviceState = 0x01,
    SaveWiFiCredentials = 0x02,
    SaveDeviceCredentials = 0x03,
    ScanWifiNetworks = 0x04,
    EraseConfig = 0x05,
    NetworkStatus = 0x06,
    MqttStatus = 0x07,
}

impl TryFrom<u8> for SensoraCmd {
    type Error = CmdError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => SensoraCmd::CommandError,
            0x01 => SensoraCmd::ReadDeviceState,
            0x02 => SensoraCmd::SaveWiFiCredentials,
            0x03 => SensoraCmd::SaveDeviceCredentials,
            0x04 => SensoraCmd::ScanWifiNetworks,
            0x05 => SensoraCmd::EraseConfig,
            0x06 => SensoraCmd::NetworkStatus,
            0x07 => SensoraCmd::MqttStatus,
            _ => return Err(CmdError::InvalidCommand),
        })
    }
}

impl From<SensoraCmd> for u8 {
    fn from(cmd: SensoraCmd) -> Self {
        cmd as u8
    }
}

/// Errors reported back over the serial link in a `CommandError` frame.
///
/// The numeric codes are wire-visible. Code 0x06 is not assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum CmdError {
    #[error("invalid frame data")]
    InvalidData,
    #[error("checksum mismatch")]
    CrcMismatch,
    #[error("invalid command")]
    InvalidCommand,
    #[error("board does not support the requested connection type")]
    NetworkConnMismatch,
    #[error("invalid network credentials")]
    InvalidNetwCredentials,
    #[error("network connection timeout")]
    NetworkConnTimeout,
    #[error("invalid device credentials")]
    InvalidDeviceCredentials,
    #[error("mqtt connection timeout")]
    MqttConnTimeout,
}

impl CmdError {
    pub const fn code(self) -> u8 {
        match self {
            CmdError::InvalidData => 0x01,
            CmdError::CrcMismatch => 0x02,
            CmdError::InvalidCommand => 0x03,
            CmdError::NetworkConnMismatch => 0x04,
            CmdError::InvalidNetwCredentials => 0x05,
            CmdError::NetworkConnTimeout => 0x07,
            CmdError::InvalidDeviceCredentials => 0x08,
            CmdError::MqttConnTimeout => 0x09,
        }
    }

    /// Inverse of [`CmdError::code`], `None` for 0x00 and unassigned codes
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x01 => CmdError::InvalidData,
            0x02 => CmdError::CrcMismatch,
            0x03 => CmdError::InvalidCommand,
            0x04 => CmdError::NetworkConnMismatch,
            0x05 => CmdError::InvalidNetwCredentials,
            0x07 => CmdError::NetworkConnTimeout,
            0x08 => CmdError::InvalidDeviceCredentials,
            0x09 => CmdError::MqttConnTimeout,
            _ => return None,
        })
    }
}

/// Errors while building an outgoing frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame data too long: {0} bytes (max {MAX_DATA_LEN})")]
    DataTooLong(usize),
    #[error("output buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

/// Device status reported to the cloud in `status=` fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DeviceStatus {
    #[default]
    Boot = 1,
    Online,
    Offline,
    Sleeping,
    Lost,
    Alert,
}

impl DeviceStatus {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Sum of all bytes modulo 256
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// Returns true once `buf` holds a complete frame.
///
/// When the marker and length are known the frame ends at `12 + len`, so a
/// checksum or data byte equal to the terminator does not cut it short.
/// Otherwise the terminator byte ends the frame.
pub fn frame_complete(buf: &[u8]) -> bool {
    let Some(&last) = buf.last() else {
        return false;
    };
    if buf.len() > SOF.len() && buf[..SOF.len()] == SOF {
        return buf.len() == FRAME_OVERHEAD + buf[SOF.len()] as usize;
    }
    last == TERMINATOR
}

/// A frame whose data borrows from the receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub cmd: u8,
    pub data: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn new(cmd: SensoraCmd, data: &'a [u8]) -> Self {
        Self {
            cmd: cmd.into(),
            data,
        }
    }

    pub fn encoded_len(&self) -> usize {
        FRAME_OVERHEAD + self.data.len()
    }

    /// Write the frame into `out`, returns the number of bytes written
    pub fn encode(&self, out: &mut [u8]) -> Result<usize, FrameError> {
        let len = u8::try_from(self.data.len()).map_err(|_| FrameError::DataTooLong(self.data.len()))?;
        let needed = self.encoded_len();
        if out.len() < needed {
            return Err(FrameError::BufferTooSmall {
                needed,
                available: out.len(),
            });
        }

        out[..SOF.len()].copy_from_slice(&SOF);
        out[SOF.len()] = len;
        let data_start = SOF.len() + 1;
        let data_end = data_start + self.data.len();
        out[data_start..data_end].copy_from_slice(self.data);
        out[data_end] = checksum(self.data);
        out[data_end + 1] = self.cmd;
        out[data_end + 2] = TERMINATOR;
        Ok(needed)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        let mut buf = vec![0u8; self.encoded_len()];
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Validate marker, length and checksum of a complete frame
    pub fn decode(bytes: &'a [u8]) -> Result<Self, CmdError> {
        if bytes.len() < MIN_FRAME_LEN {
            return Err(CmdError::InvalidData);
        }
        if bytes[..SOF.len()] != SOF {
            return Err(CmdError::InvalidData);
        }

        let data_len = bytes[SOF.len()] as usize;
        if bytes.len() != FRAME_OVERHEAD + data_len {
            return Err(CmdError::InvalidData);
        }
        if bytes[bytes.len() - 1] != TERMINATOR {
            return Err(CmdError::InvalidData);
        }

        let data_start = SOF.len() + 1;
        let data = &bytes[data_start..data_start + data_len];
        if checksum(data) != bytes[data_start + data_len] {
            return Err(CmdError::CrcMismatch);
        }

        Ok(Self {
            cmd: bytes[data_start + data_len + 1],
            data,
        })
    }
}

/// Encode a frame into `out`, returns the total frame length (`12 + data.len()`)
pub fn build_serial_buff(cmd: SensoraCmd, data: &[u8], out: &mut [u8]) -> Result<usize, FrameError> {
    Frame::new(cmd, data).encode(out)
}

/// A decoded request received over the serial link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmdResponse {
    ReadDeviceState,
    SaveWiFiCredentials(WiFiConfig),
    SaveDeviceCredentials {
        device_id: String,
        device_token: String,
    },
    ScanWifiNetworks,
    EraseConfig,
}

impl CmdResponse {
    pub fn cmd(&self) -> SensoraCmd {
        match self {
            CmdResponse::ReadDeviceState => SensoraCmd::ReadDeviceState,
            CmdResponse::SaveWiFiCredentials(_) => SensoraCmd::SaveWiFiCredentials,
            CmdResponse::SaveDeviceCredentials { .. } => SensoraCmd::SaveDeviceCredentials,
            CmdResponse::ScanWifiNetworks => SensoraCmd::ScanWifiNetworks,
            CmdResponse::EraseConfig => SensoraCmd::EraseConfig,
        }
    }

    /// Interpret the command byte and data of a validated frame
    pub fn parse(frame: &Frame<'_>) -> Result<Self, CmdError> {
        match SensoraCmd::try_from(frame.cmd)? {
            SensoraCmd::SaveWiFiCredentials => {
                let mut pos = 0;
                let ssid = read_field(frame.data, &mut pos)?;
                let password = read_field(frame.data, &mut pos)?;
                Ok(CmdResponse::SaveWiFiCredentials(WiFiConfig { ssid, password }))
            }
            SensoraCmd::SaveDeviceCredentials => {
                let mut pos = 0;
                let device_id = read_field(frame.data, &mut pos)?;
                let device_token = read_field(frame.data, &mut pos)?;
                Ok(CmdResponse::SaveDeviceCredentials {
                    device_id,
                    device_token,
                })
            }
            SensoraCmd::ScanWifiNetworks => Ok(CmdResponse::ScanWifiNetworks),
            SensoraCmd::EraseConfig => Ok(CmdResponse::EraseConfig),
            SensoraCmd::ReadDeviceState => Ok(CmdResponse::ReadDeviceState),
            _ => Err(CmdError::InvalidCommand),
        }
    }

    /// Frame data for this request, the inverse of [`CmdResponse::parse`]
    pub fn to_data(&self) -> Result<Vec<u8>, FrameError> {
        let mut data = Vec::new();
        match self {
            CmdResponse::SaveWiFiCredentials(wifi) => {
                write_field(&mut data, &wifi.ssid)?;
                write_field(&mut data, &wifi.password)?;
            }
            CmdResponse::SaveDeviceCredentials {
                device_id,
                device_token,
            } => {
                write_field(&mut data, device_id)?;
                write_field(&mut data, device_token)?;
            }
            CmdResponse::ReadDeviceState | CmdResponse::ScanWifiNetworks | CmdResponse::EraseConfig => {}
        }
        if data.len() > MAX_DATA_LEN {
            return Err(FrameError::DataTooLong(data.len()));
        }
        Ok(data)
    }

    pub fn to_frame(&self) -> Result<Vec<u8>, FrameError> {
        let data = self.to_data()?;
        Frame::new(self.cmd(), &data).to_bytes()
    }
}

/// Length-prefixed field, cut at the first NUL like the C side does
fn read_field(data: &[u8], pos: &mut usize) -> Result<String, CmdError> {
    let len = *data.get(*pos).ok_or(CmdError::InvalidData)? as usize;
    let start = *pos + 1;
    let bytes = data.get(start..start + len).ok_or(CmdError::InvalidData)?;
    *pos = start + len;

    let bytes = match bytes.iter().position(|b| *b == 0) {
        Some(nul) => &bytes[..nul],
        None => bytes,
    };
    String::from_utf8(bytes.to_vec()).map_err(|_| CmdError::InvalidData)
}

fn write_field(data: &mut Vec<u8>, value: &str) -> Result<(), FrameError> {
    let len = u8::try_from(value.len()).map_err(|_| FrameError::DataTooLong(value.len()))?;
    data.push(len);
    data.extend_from_slice(value.as_bytes());
    Ok(())
}

/// Byte accumulator for the receiving side of the serial link.
///
/// Feed bytes with [`SensoraLink::read_byte`] until it returns false, then
/// call [`SensoraLink::parse_bytes`].
#[derive(Debug, Default)]
pub struct SensoraLink {
    buf: heapless::Vec<u8, MAX_LINK_BUFFER>,
    started_at: u64,
    error: Option<CmdError>,
}

impl SensoraLink {
    pub const fn new() -> Self {
        Self {
            buf: heapless::Vec::new(),
            started_at: 0,
            error: None,
        }
    }

    /// Accumulate one byte, returns whether more bytes are expected
    pub fn read_byte(&mut self, b: u8, now_ms: u64) -> bool {
        if !self.buf.is_empty() && now_ms.saturating_sub(self.started_at) > FRAME_TIMEOUT_MS {
            warn!("serial frame timed out after {} bytes, resetting", self.buf.len());
            self.reset();
        }
        if self.buf.is_empty() {
            self.started_at = now_ms;
        }
        if self.buf.push(b).is_err() {
            warn!("serial buffer overflow, resetting");
            self.reset();
            return false;
        }
        !frame_complete(&self.buf)
    }

    /// Decode the buffered frame. The buffer is cleared either way.
    pub fn parse_bytes(&mut self) -> Result<CmdResponse, CmdError> {
        let result = Frame::decode(&self.buf).and_then(|frame| CmdResponse::parse(&frame));
        self.error = result.as_ref().err().copied();
        self.reset();
        result
    }

    /// Error of the last [`SensoraLink::parse_bytes`] call
    pub fn error(&self) -> Option<CmdError> {
        self.error
    }

    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.started_at = 0;
    }
}

/// Blocking frame I/O over `std::io`, used by host tools talking to a
/// device through a serial port
pub mod blocking {
    use super::*;
    use std::io::{self, Read, Write};

    pub fn write_frame<W: Write + ?Sized>(writer: &mut W, cmd: SensoraCmd, data: &[u8]) -> io::Result<()> {
        let bytes = Frame::new(cmd, data)
            .to_bytes()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        writer.write_all(&bytes)?;
        writer.flush()
    }

    /// Collects frame bytes across reads. A read that times out keeps the
    /// partial frame for the next call.
    #[derive(Debug, Default)]
    pub struct FrameReader {
        buf: Vec<u8>,
    }

    impl FrameReader {
        pub fn new() -> Self {
            Self::default()
        }

        /// Raw bytes of the next complete frame, `None` when the reader
        /// timed out or reached EOF first
        pub fn read_frame<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<Option<Vec<u8>>> {
            let mut byte = [0u8; 1];
            loop {
                match reader.read(&mut byte) {
                    Ok(0) => return Ok(None),
                    Ok(_) => {}
                    Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                        return Ok(None);
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
                self.buf.push(byte[0]);
                if frame_complete(&self.buf) {
                    return Ok(Some(std::mem::take(&mut self.buf)));
                }
                if self.buf.len() >= FRAME_OVERHEAD + MAX_DATA_LEN {
                    self.buf.clear();
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
                }
            }
        }

        /// Bytes of a frame still being received
        pub fn pending(&self) -> usize {
            self.buf.len()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wifi_frame(ssid: &str, password: &str) -> Vec<u8> {
        CmdResponse::SaveWiFiCredentials(WiFiConfig {
            ssid: ssid.to_string(),
            password: password.to_string(),
        })
        .to_frame()
        .unwrap()
    }

    fn feed(link: &mut SensoraLink, bytes: &[u8]) -> bool {
        let mut more = true;
        for b in bytes {
            more = link.read_byte(*b, 0);
        }
        more
    }

    #[test]
    fn frame_layout() {
        let mut out = [0u8; 16];
        let n = build_serial_buff(SensoraCmd::CommandError, &[0x07], &mut out).unwrap();
        assert_eq!(n, 13);
        assert_eq!(&out[..8], &SOF);
        assert_eq!(out[8], 1);
        assert_eq!(out[9], 0x07);
        assert_eq!(out[10], 0x07);
        assert_eq!(out[11], SensoraCmd::CommandError as u8);
        assert_eq!(out[12], TERMINATOR);
    }

    #[test]
    fn frame_round_trip_any_command() {
        for cmd in 0u8..=255 {
            let data: Vec<u8> = (0..(cmd as usize % 244)).map(|i| (i * 7 + cmd as usize) as u8).collect();
            let bytes = Frame { cmd, data: &data }.to_bytes().unwrap();
            assert_eq!(bytes.len(), FRAME_OVERHEAD + data.len());
            let decoded = Frame::decode(&bytes).unwrap();
            assert_eq!(decoded.cmd, cmd);
            assert_eq!(decoded.data, &data[..]);
        }
    }

    #[test]
    fn wifi_credentials_round_trip_through_link() {
        let mut link = SensoraLink::new();
        let frame = wifi_frame("home-network", "password");
        assert!(!feed(&mut link, &frame));
        let resp = link.parse_bytes().unwrap();
        assert_eq!(
            resp,
            CmdResponse::SaveWiFiCredentials(WiFiConfig {
                ssid: "home-network".to_string(),
                password: "password".to_string(),
            })
        );
        assert_eq!(link.buffered_len(), 0);
        assert_eq!(link.error(), None);
    }

    #[test]
    fn device_credentials_round_trip() {
        let id = "a".repeat(32);
        let token = "b".repeat(32);
        let req = CmdResponse::SaveDeviceCredentials {
            device_id: id.clone(),
            device_token: token.clone(),
        };
        let bytes = req.to_frame().unwrap();
        let frame = Frame::decode(&bytes).unwrap();
        assert_eq!(CmdResponse::parse(&frame).unwrap(), req);
    }

    #[test]
    fn single_byte_mutation_is_crc_mismatch() {
        let frame = wifi_frame("home-network", "password");
        let data_len = frame[8] as usize;
        // data bytes and the checksum byte
        for i in 9..=9 + data_len {
            let mut corrupted = frame.clone();
            corrupted[i] = corrupted[i].wrapping_add(1);
            assert_eq!(Frame::decode(&corrupted), Err(CmdError::CrcMismatch), "byte {i}");
        }
    }

    #[test]
    fn short_or_mislabeled_frames_are_invalid() {
        assert_eq!(Frame::decode(&SOF[..]), Err(CmdError::InvalidData));

        let mut frame = wifi_frame("home-network", "password");
        frame[8] += 1;
        assert_eq!(Frame::decode(&frame), Err(CmdError::InvalidData));

        let mut frame = wifi_frame("home-network", "password");
        frame[0] = b'S';
        assert_eq!(Frame::decode(&frame), Err(CmdError::InvalidData));
    }

    #[test]
    fn short_frame_through_link_reports_invalid_data() {
        let mut link = SensoraLink::new();
        assert!(!feed(&mut link, &[0x73, 0x65, TERMINATOR]));
        assert_eq!(link.parse_bytes(), Err(CmdError::InvalidData));
        assert_eq!(link.error(), Some(CmdError::InvalidData));
    }

    #[test]
    fn unknown_command_is_invalid_command() {
        let bytes = Frame { cmd: 0x42, data: &[] }.to_bytes().unwrap();
        let frame = Frame::decode(&bytes).unwrap();
        assert_eq!(CmdResponse::parse(&frame), Err(CmdError::InvalidCommand));

        // status commands are device -> host only
        let bytes = Frame::new(SensoraCmd::MqttStatus, &[1]).to_bytes().unwrap();
        let frame = Frame::decode(&bytes).unwrap();
        assert_eq!(CmdResponse::parse(&frame), Err(CmdError::InvalidCommand));
    }

    #[test]
    fn commands_without_payload() {
        for req in [CmdResponse::ScanWifiNetworks, CmdResponse::EraseConfig, CmdResponse::ReadDeviceState] {
            let bytes = req.to_frame().unwrap();
            let frame = Frame::decode(&bytes).unwrap();
            assert_eq!(CmdResponse::parse(&frame).unwrap(), req);
        }
    }

    #[test]
    fn checksum_equal_to_terminator_does_not_end_frame() {
        // 0x99 as the only data byte gives a checksum of 0x99 as well
        let bytes = Frame::new(SensoraCmd::EraseConfig, &[0x99]).to_bytes().unwrap();
        let mut link = SensoraLink::new();
        let ends: Vec<bool> = bytes.iter().map(|b| link.read_byte(*b, 0)).collect();
        assert!(ends[..ends.len() - 1].iter().all(|more| *more));
        assert!(!ends[ends.len() - 1]);
        assert_eq!(link.parse_bytes(), Ok(CmdResponse::EraseConfig));
    }

    #[test]
    fn stale_bytes_are_discarded() {
        let mut link = SensoraLink::new();
        assert!(link.read_byte(0x73, 0));
        assert!(link.read_byte(0x65, 10));
        let frame = wifi_frame("home-network", "password");
        let mut more = true;
        for b in &frame {
            more = link.read_byte(*b, 2000);
        }
        assert!(!more);
        assert!(link.parse_bytes().is_ok());
    }

    #[test]
    fn overflow_resets_buffer() {
        let mut link = SensoraLink::new();
        for _ in 0..MAX_LINK_BUFFER {
            assert!(link.read_byte(0x00, 0));
        }
        assert!(!link.read_byte(0x00, 0));
        assert_eq!(link.buffered_len(), 0);
        assert_eq!(link.parse_bytes(), Err(CmdError::InvalidData));
    }

    #[test]
    fn error_codes_keep_the_gap() {
        assert_eq!(CmdError::InvalidNetwCredentials.code(), 0x05);
        assert_eq!(CmdError::NetworkConnTimeout.code(), 0x07);
        assert_eq!(CmdError::from_code(0x06), None);
        assert_eq!(CmdError::from_code(0x09), Some(CmdError::MqttConnTimeout));
    }

    #[test]
    fn field_longer_than_data_is_rejected() {
        let data = [5u8, b'a', b'b'];
        let bytes = Frame::new(SensoraCmd::SaveWiFiCredentials, &data).to_bytes().unwrap();
        let frame = Frame::decode(&bytes).unwrap();
        assert_eq!(CmdResponse::parse(&frame), Err(CmdError::InvalidData));
    }

    #[test]
    fn blocking_frame_io() {
        let mut out = Vec::new();
        blocking::write_frame(&mut out, SensoraCmd::NetworkStatus, &[0x01]).unwrap();
        out.extend_from_slice(&wifi_frame("home-network", "password"));

        let mut reader = &out[..];
        let mut frames = blocking::FrameReader::new();
        let first = frames.read_frame(&mut reader).unwrap().unwrap();
        let frame = Frame::decode(&first).unwrap();
        assert_eq!(frame.cmd, SensoraCmd::NetworkStatus as u8);
        assert_eq!(frame.data, &[0x01]);

        let second = frames.read_frame(&mut reader).unwrap().unwrap();
        assert!(Frame::decode(&second).is_ok());
        assert_eq!(frames.read_frame(&mut reader).unwrap(), None);
    }

    /// Hands out one chunk per read call and times out between chunks
    struct Chunked {
        chunks: Vec<Vec<u8>>,
        timed_out: bool,
    }

    impl std::io::Read for Chunked {
        fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
            let Some(chunk) = self.chunks.first_mut() else {
                return Ok(0);
            };
            if chunk.is_empty() {
                self.chunks.remove(0);
                if !self.timed_out {
                    self.timed_out = true;
                    return Err(std::io::ErrorKind::TimedOut.into());
                }
                return self.read(out);
            }
            self.timed_out = false;
            out[0] = chunk.remove(0);
            Ok(1)
        }
    }

    #[test]
    fn partial_frame_survives_read_timeout() {
        let bytes = Frame::new(SensoraCmd::MqttStatus, &[0x01]).to_bytes().unwrap();
        let (head, tail) = bytes.split_at(5);
        let mut port = Chunked {
            chunks: vec![head.to_vec(), tail.to_vec()],
            timed_out: false,
        };
        let mut frames = blocking::FrameReader::new();
        assert_eq!(frames.read_frame(&mut port).unwrap(), None);
        assert_eq!(frames.pending(), 5);
        assert_eq!(frames.read_frame(&mut port).unwrap(), Some(bytes));
        assert_eq!(frames.pending(), 0);
    }
}
