pub(crate) const BAUD_RATE: u32 = 115200;
pub(crate) const DEFAULT_TIMEOUT_SECS: u64 = 2;
pub(crate) const MAX_RESPONSE_SIZE: usize = 300;

/// Bytes keep trickling in after the first one; stop reading once the line is quiet this long
pub(crate) const RESPONSE_QUIET_MS: u64 = 50;

pub(crate) const COMMAND_SETTLE_MS: u64 = 50;
pub(crate) const MANAGER_GUARD_MS: u64 = 2500;

pub(crate) const MAX_IMAGE_SIZE: usize = 4 * 1024 * 1024;

pub(crate) const MANAGER_PROMPT: &str = "# ";
pub(crate) const MANAGER_ERROR_TEXT: &str = "invalid command";
pub(crate) const MANAGER_EXIT: &str = "exit";
pub(crate) const REPROGRAM_ACK: &str = "programmed";
pub(crate) const UPDATE_ACK: &str = "updated";

#[cfg(target_os = "windows")]
pub const DEFAULT_SERIAL_DEVICE: &str = "COM1";
#[cfg(target_os = "macos")]
pub const DEFAULT_SERIAL_DEVICE: &str = "/dev/tty.usbserial";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub const DEFAULT_SERIAL_DEVICE: &str = "/dev/ttyUSB0";
