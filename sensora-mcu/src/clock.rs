/// Monotonic time source
pub trait Clock {
    /// Milliseconds since boot
    fn millis(&self) -> u64;

    /// Block for `ms`; simulated clocks just advance
    fn delay_ms(&mut self, ms: u64);
}
