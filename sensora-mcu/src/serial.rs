//! Serial byte stream used by provisioning

pub trait SerialPort {
    /// Next received byte, `None` when nothing is pending
    fn read_byte(&mut self) -> Option<u8>;

    fn write(&mut self, bytes: &[u8]);
}
