use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::BulkTransfer;
use crate::error::{DamError, DamResult, TransferError};
use crate::interface::DeviceInterface;
use crate::util::create_progress_bar;

#[repr(u8)]
pub enum XmodemControl {
    Soh = 0x01,
    Eot = 0x04,
    Ack = 0x06,
    Nak = 0x15,
    Can = 0x18,
}

const BLOCK_SIZE: usize = 128;
const PADDING: u8 = 0x1a;

/// XMODEM-CRC sender with 128 byte blocks.
///
/// The receiver has already announced CRC mode with a `C` by the time
/// [`BulkTransfer::send`] is called. It keeps repeating that `C` until the
/// first block arrives, so whatever is still buffered is dropped before
/// sending and stray bytes never count as a reply.
#[derive(Debug, Clone)]
pub struct Xmodem {
    pub block_timeout: Duration,
    pub max_retries: u32,
    pub progress_bar: bool,
}

impl Default for Xmodem {
    fn default() -> Self {
        Xmodem {
            block_timeout: Duration::from_secs(1),
            max_retries: 16,
            progress_bar: false,
        }
    }
}

impl Xmodem {
    fn frame_block(sequence: u8, chunk: &[u8]) -> Vec<u8> {
        let mut data = [PADDING; BLOCK_SIZE];
        data[..chunk.len()].copy_from_slice(chunk);
        let crc = crc16(&data);

        let mut frame = Vec::with_capacity(BLOCK_SIZE + 5);
        frame.push(XmodemControl::Soh as u8);
        frame.push(sequence);
        frame.push(!sequence);
        frame.extend_from_slice(&data);
        frame.extend_from_slice(&crc.to_be_bytes());
        frame
    }

    /// Wait for ACK, NAK or CAN, skipping anything else until the block timeout runs out
    fn await_reply(&self, device: &mut dyn DeviceInterface, what: &str) -> DamResult<Option<u8>> {
        let deadline = Instant::now() + self.block_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match device.receive(1, remaining)?.first().copied() {
                None => return Ok(None),
                Some(b)
                    if b == XmodemControl::Ack as u8
                        || b == XmodemControl::Nak as u8
                        || b == XmodemControl::Can as u8 =>
                {
                    return Ok(Some(b));
                }
                Some(b) => debug!("Skipping stray byte {:#04x} while waiting on {}", b, what),
            }
        }
    }

    fn send_until_acked(
        &self,
        device: &mut dyn DeviceInterface,
        frame: &[u8],
        what: &str,
    ) -> DamResult<()> {
        let mut errors = 0;
        loop {
            device.send(frame)?;

            match self.await_reply(device, what)? {
                Some(b) if b == XmodemControl::Ack as u8 => return Ok(()),
                Some(b) if b == XmodemControl::Can as u8 => {
                    return Err(aborted(format!("receiver cancelled during {}", what)));
                }
                Some(_) => debug!("NAK for {}", what),
                None => debug!("No acknowledgement for {}", what),
            }

            errors += 1;
            if errors > self.max_retries {
                return Err(aborted(format!(
                    "{} not acknowledged after {} attempts",
                    what, errors
                )));
            }
            warn!("Retrying {} ({}/{})", what, errors, self.max_retries);
        }
    }

    fn transfer(&self, device: &mut dyn DeviceInterface, image: &[u8]) -> DamResult<()> {
        let blocks = image.len().div_ceil(BLOCK_SIZE);
        let pb = self
            .progress_bar
            .then(|| create_progress_bar(blocks as u64, "Sending image"));

        // Repeated CRC requests from the handshake
        device.flush_buffers()?;

        let mut sequence: u8 = 1;
        for (index, chunk) in image.chunks(BLOCK_SIZE).enumerate() {
            let frame = Self::frame_block(sequence, chunk);
            self.send_until_acked(device, &frame, &format!("block {}", index + 1))?;
            sequence = sequence.wrapping_add(1);
            if let Some(pb) = &pb {
                pb.inc(1);
            }
        }

        self.send_until_acked(device, &[XmodemControl::Eot as u8], "end of transmission")?;
        if let Some(pb) = pb {
            pb.finish_with_message("Image sent");
        }
        info!("Sent {} blocks", blocks);
        Ok(())
    }
}

impl BulkTransfer for Xmodem {
    fn send(&self, device: &mut dyn DeviceInterface, image: &[u8]) -> DamResult<()> {
        self.transfer(device, image).map_err(|e| match e {
            DamError::Transfer(_) => e,
            other => aborted(other.to_string()),
        })
    }
}

fn aborted(reason: String) -> DamError {
    TransferError::Aborted(reason).into()
}

/// CRC-16-CCITT, XMODEM variant
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0u16;
    for &b in data {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            if (crc & 0x8000) != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}
