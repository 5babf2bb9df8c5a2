pub mod serialport;

use std::time::Duration;

use crate::error::DamResult;

/// Byte level access to the DAC. Opening happens in the implementor's
/// constructor, closing when it is dropped.
pub trait DeviceInterface {
    /// Write a complete frame to the device
    fn send(&mut self, data: &[u8]) -> DamResult<()>;

    /// Read at most `max` bytes, waiting up to `timeout` for the first one.
    /// An empty buffer means nothing arrived in time.
    fn receive(&mut self, max: usize, timeout: Duration) -> DamResult<Vec<u8>>;

    /// Drop whatever is still buffered in either direction
    fn flush_buffers(&mut self) -> DamResult<()>;
}
