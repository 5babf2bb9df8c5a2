use std::io::{Read, Write};
use std::time::Duration;

use serialport::ClearBuffer;
use tracing::{debug, trace};

use super::DeviceInterface;
use crate::constants::{BAUD_RATE, RESPONSE_QUIET_MS};
use crate::error::{DamError, DamResult};

/// dam1021 attached to a serial port at 115200 8N1
pub struct SerialPortDevice {
    serial_port: Box<dyn serialport::SerialPort>,
}

impl SerialPortDevice {
    pub fn new(port: &str, timeout: Duration) -> DamResult<SerialPortDevice> {
        let serial_port = serialport::new(port, BAUD_RATE)
            .timeout(timeout)
            .open()
            .map_err(|e| DamError::Connection(format!("Failed to open {}: {}", port, e)))?;

        debug!("Serial port {} opened", port);
        Ok(SerialPortDevice { serial_port })
    }

    fn read_chunk(&mut self, buffer: &mut [u8]) -> DamResult<usize> {
        self.serial_port
            .read(buffer)
            // Timeout error is fine, the caller sees an empty read
            .or_else(|e| {
                if e.kind() == std::io::ErrorKind::TimedOut {
                    Ok(0)
                } else {
                    Err(e)
                }
            })
            .map_err(|e| DamError::Connection(format!("Read failed: {}", e)))
    }

    fn set_timeout(&mut self, timeout: Duration) -> DamResult<()> {
        self.serial_port
            .set_timeout(timeout)
            .map_err(|e| DamError::Connection(format!("Failed to set timeout: {}", e)))
    }
}

impl DeviceInterface for SerialPortDevice {
    fn send(&mut self, data: &[u8]) -> DamResult<()> {
        self.serial_port
            .write_all(data)
            .and_then(|_| self.serial_port.flush())
            .map_err(|e| DamError::Connection(format!("Write failed: {}", e)))?;
        trace!("Sent bytes {:?}", data);
        Ok(())
    }

    fn receive(&mut self, max: usize, timeout: Duration) -> DamResult<Vec<u8>> {
        let mut buffer = vec![0; max];

        self.set_timeout(timeout)?;
        let mut size = self.read_chunk(&mut buffer)?;

        // Keep collecting until the device goes quiet or the buffer is full
        if size > 0 && size < max {
            self.set_timeout(Duration::from_millis(RESPONSE_QUIET_MS))?;
            while size < max {
                let fresh = self.read_chunk(&mut buffer[size..])?;
                if fresh == 0 {
                    break;
                }
                size += fresh;
            }
        }

        buffer.truncate(size);
        trace!("Received bytes {:?}", buffer);
        Ok(buffer)
    }

    fn flush_buffers(&mut self) -> DamResult<()> {
        self.serial_port.clear(ClearBuffer::All).map_err(|e| {
            DamError::Connection(format!("Failed to flush send/receive buffers, {}", e))
        })
    }
}
