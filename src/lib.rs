//! Control a dam1021 discrete R-2R DAC over its serial port: volume, input
//! source, filter sets, output mode and firmware/filter set downloads.

pub use command::{FilterSet, Mode};
pub use connection::{Connection, ConnectionConfig};
pub use constants::DEFAULT_SERIAL_DEVICE;
pub use ranges::{FirmwareRevision, POTENTIOMETER_SENTINEL, ParameterRanges};
pub use response::FilterDescriptor;
pub use transfer::TransferReceipt;

pub mod command;
pub mod connection;
pub(crate) mod constants;
pub mod error;
pub mod interface;
pub mod protocols;
pub mod ranges;
pub mod response;
pub mod transfer;
pub(crate) mod util;
