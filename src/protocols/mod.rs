use crate::error::DamResult;
use crate::interface::DeviceInterface;

pub mod xmodem;

/// Pushes an image over an already open link once the receiver is waiting
/// for it. Failures come back as `TransferError::Aborted` carrying the
/// sub-protocol's own reason.
pub trait BulkTransfer {
    fn send(&self, device: &mut dyn DeviceInterface, image: &[u8]) -> DamResult<()>;
}
