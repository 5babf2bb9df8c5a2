use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::{
    command::{Channel, Command, CommitMode, EncodedFrame, Encoder, FilterSet, Mode},
    constants::{
        COMMAND_SETTLE_MS, DEFAULT_SERIAL_DEVICE, DEFAULT_TIMEOUT_SECS, MANAGER_GUARD_MS,
        MAX_RESPONSE_SIZE,
    },
    error::{DamError, DamResult},
    interface::{DeviceInterface, serialport::SerialPortDevice},
    protocols::{BulkTransfer, xmodem::Xmodem},
    ranges::{FirmwareRevision, ParameterRanges},
    response::{Decoder, FilterDescriptor, Reply, StatusPayload},
    transfer::{self, TransferReceipt},
};

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Serial device path or name
    pub device: String,
    /// Applies to every reply the connection waits for
    pub timeout: Duration,
    /// Pause between writing a command and reading its reply
    pub settle_delay: Duration,
    /// Silence required around `+++` before the uManager answers
    pub manager_guard: Duration,
    pub revision: FirmwareRevision,
    pub progress_bar: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            device: DEFAULT_SERIAL_DEVICE.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            settle_delay: Duration::from_millis(COMMAND_SETTLE_MS),
            manager_guard: Duration::from_millis(MANAGER_GUARD_MS),
            revision: FirmwareRevision::default(),
            progress_bar: false,
        }
    }
}

/// Whether the device is currently sitting in its uManager console
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ManagerState {
    Closed,
    Open,
    /// A transfer or session change failed half way
    Unknown,
}

/// Everything guarded by the connection lock: one exchange at a time
pub(crate) struct Session {
    device: Box<dyn DeviceInterface + Send>,
    bulk: Box<dyn BulkTransfer + Send>,
    encoder: Encoder,
    decoder: Decoder,
    config: ConnectionConfig,
    manager: ManagerState,
}

impl Session {
    pub(crate) fn encode(&self, command: &Command<'_>) -> DamResult<EncodedFrame> {
        self.encoder.encode(command)
    }

    /// Hand the image to the bulk transfer sub-protocol over the open link
    pub(crate) fn send_image(&mut self, image: &[u8]) -> DamResult<()> {
        self.bulk.send(self.device.as_mut(), image)
    }

    pub(crate) fn mark_manager_open(&mut self) {
        self.manager = ManagerState::Open;
    }

    pub(crate) fn mark_manager_unknown(&mut self) {
        self.manager = ManagerState::Unknown;
    }

    fn write(&mut self, frame: &EncodedFrame, discard_input: bool) -> DamResult<()> {
        if discard_input {
            self.device.flush_buffers()?;
        }
        self.device.send(frame.as_bytes())
    }

    /// Write an already validated frame and decode whatever the device answers
    pub(crate) fn transact(
        &mut self,
        command: &Command<'_>,
        frame: &EncodedFrame,
    ) -> DamResult<Reply> {
        // The acknowledgement of a finished transfer may already be waiting
        self.write(frame, !matches!(command, Command::Commit(_)))?;
        let Some(expectation) = command.expectation() else {
            return Ok(Reply::Ack);
        };

        thread::sleep(self.config.settle_delay);
        let deadline = Instant::now() + self.config.timeout;
        let mut raw = self
            .device
            .receive(MAX_RESPONSE_SIZE, self.config.timeout)?;

        if expectation.arrives_late() {
            while !raw.is_empty() && raw.len() < MAX_RESPONSE_SIZE {
                let settled = self.decoder.decode(&expectation, &raw);
                if matches!(settled, Ok(_) | Err(DamError::Rejected(_))) {
                    break;
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                let more = self
                    .device
                    .receive(MAX_RESPONSE_SIZE - raw.len(), remaining)?;
                if more.is_empty() {
                    break;
                }
                raw.extend(more);
            }
        }

        self.decoder.decode(&expectation, &raw)
    }

    fn session_exchange(&mut self, command: Command<'_>) -> DamResult<Reply> {
        let frame = self.encode(&command)?;
        self.transact(&command, &frame)
    }

    pub(crate) fn open_manager(&mut self) -> DamResult<()> {
        if self.manager == ManagerState::Open {
            return Ok(());
        }

        let frame = self.encode(&Command::OpenManager)?;
        self.write(&frame, true)?;
        thread::sleep(self.config.manager_guard);
        // A fresh prompt also comes back when the console was already open
        match self.session_exchange(Command::Prompt) {
            Ok(_) => {
                debug!("uManager opened");
                self.manager = ManagerState::Open;
                Ok(())
            }
            Err(e) => {
                self.manager = ManagerState::Unknown;
                Err(e)
            }
        }
    }

    fn close_manager(&mut self) -> DamResult<()> {
        if self.manager == ManagerState::Closed {
            return Ok(());
        }

        let frame = self.encode(&Command::Prompt)?;
        self.write(&frame, true)?;
        thread::sleep(self.config.settle_delay);
        match self.session_exchange(Command::CloseManager) {
            Ok(_) => {
                debug!("uManager closed");
                self.manager = ManagerState::Closed;
                Ok(())
            }
            Err(e) => {
                self.manager = ManagerState::Unknown;
                Err(e)
            }
        }
    }

    /// Direct commands are only understood outside the console
    fn leave_manager(&mut self) -> DamResult<()> {
        match self.manager {
            ManagerState::Closed => Ok(()),
            ManagerState::Open => self.close_manager(),
            ManagerState::Unknown => match self.close_manager() {
                Ok(()) => Ok(()),
                Err(e @ (DamError::Timeout(_) | DamError::MalformedResponse { .. })) => {
                    warn!("Could not confirm uManager exit, assuming closed: {}", e);
                    self.manager = ManagerState::Closed;
                    Ok(())
                }
                Err(e) => Err(e),
            },
        }
    }

    /// Run `op` inside the uManager console and leave it afterwards
    pub(crate) fn within_manager<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> DamResult<T>,
    ) -> DamResult<T> {
        self.open_manager()?;
        let result = op(self);
        if self.manager == ManagerState::Unknown {
            return result;
        }

        match self.close_manager() {
            Ok(()) => result,
            Err(e) => result.and(Err(e)),
        }
    }

    fn run(&mut self, command: Command<'_>) -> DamResult<Reply> {
        let frame = self.encode(&command)?;
        match command.channel() {
            Channel::Direct => {
                self.leave_manager()?;
                self.transact(&command, &frame)
            }
            Channel::Manager => self.within_manager(|s| s.transact(&command, &frame)),
            Channel::Session => self.transact(&command, &frame),
        }
    }

    fn shutdown(&mut self) -> DamResult<()> {
        match self.manager {
            ManagerState::Closed => Ok(()),
            _ => self.close_manager(),
        }
    }
}

/// Serial connection to a dam1021.
///
/// Every operation holds the connection lock for its complete
/// write/read cycle, so a `Connection` can be shared between threads.
///
/// ```no_run
/// use dam1021::{Connection, FilterSet};
/// use std::time::Duration;
///
/// let conn = Connection::open("/dev/ttyUSB0", Duration::from_secs(2))?;
/// conn.set_current_volume_level(-14)?;
/// conn.set_flash_volume_level(-22)?;
/// conn.set_input_source(0)?;
/// conn.set_filter_set("minimum".parse::<FilterSet>()?)?;
/// # Ok::<(), dam1021::error::DamError>(())
/// ```
pub struct Connection {
    session: Mutex<Option<Session>>,
}

impl Connection {
    /// Open `device` with default settings and the given read timeout
    pub fn open(device: &str, timeout: Duration) -> DamResult<Self> {
        Self::with_config(ConnectionConfig {
            device: device.to_string(),
            timeout,
            ..ConnectionConfig::default()
        })
    }

    pub fn with_config(config: ConnectionConfig) -> DamResult<Self> {
        let device = SerialPortDevice::new(&config.device, config.timeout)?;
        Ok(Self::from_device(Box::new(device), config))
    }

    /// Wrap an already open device; `config.device` is informational only
    pub fn from_device(device: Box<dyn DeviceInterface + Send>, config: ConnectionConfig) -> Self {
        let bulk = Xmodem {
            progress_bar: config.progress_bar,
            ..Xmodem::default()
        };
        let session = Session {
            device,
            bulk: Box::new(bulk),
            encoder: Encoder::new(ParameterRanges::for_revision(config.revision)),
            decoder: Decoder::new(config.timeout),
            config,
            manager: ManagerState::Closed,
        };

        Connection {
            session: Mutex::new(Some(session)),
        }
    }

    /// Replace the XMODEM sender used for downloads
    pub fn with_bulk_transfer(mut self, bulk: Box<dyn BulkTransfer + Send>) -> Self {
        if let Ok(Some(session)) = self.session.get_mut() {
            session.bulk = bulk;
        }
        self
    }

    fn with_session<T>(&self, op: impl FnOnce(&mut Session) -> DamResult<T>) -> DamResult<T> {
        let mut guard = self
            .session
            .lock()
            .map_err(|_| DamError::Connection("Connection lock poisoned".to_string()))?;
        let session = guard.as_mut().ok_or(DamError::ClosedConnection)?;
        op(session)
    }

    /// Leave the uManager if needed and release the serial port
    pub fn close(&self) -> DamResult<()> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| DamError::Connection("Connection lock poisoned".to_string()))?
            .take()
            .ok_or(DamError::ClosedConnection)?;

        let result = session.shutdown();
        drop(session);
        debug!("Serial port closed");
        result
    }

    pub fn is_closed(&self) -> bool {
        self.session
            .lock()
            .map(|session| session.is_none())
            .unwrap_or(true)
    }

    /// Set the volume until the next power cycle
    pub fn set_current_volume_level(&self, level: i32) -> DamResult<()> {
        self.with_session(|s| s.run(Command::SetVolume(level)))?;
        info!("Current volume level set to {}", level);
        Ok(())
    }

    /// Set the volume applied at power-up
    pub fn set_flash_volume_level(&self, level: i32) -> DamResult<()> {
        self.with_session(|s| s.run(Command::SetFlashVolume(level)))?;
        info!("Flash volume level set to {}", level);
        Ok(())
    }

    pub fn set_input_source(&self, index: i32) -> DamResult<()> {
        self.with_session(|s| s.run(Command::SetInputSource(index)))?;
        info!("Input source set to {}", index);
        Ok(())
    }

    pub fn set_filter_set(&self, filter: FilterSet) -> DamResult<()> {
        self.with_session(|s| s.run(Command::SetFilterSet(filter)))?;
        info!("Filter set changed to {}", filter);
        Ok(())
    }

    /// Store the filter set selected at power-up
    pub fn set_default_filter_set(&self, filter: FilterSet) -> DamResult<()> {
        self.with_session(|s| s.run(Command::SetDefaultFilterSet(filter)))?;
        info!("Default filter set changed to {}", filter);
        Ok(())
    }

    pub fn set_mode(&self, mode: Mode) -> DamResult<()> {
        self.with_session(|s| s.run(Command::SetMode(mode)))?;
        info!("Mode set to {}", mode);
        Ok(())
    }

    pub fn get_current_filter_set(&self) -> DamResult<FilterSet> {
        match self.with_session(|s| s.run(Command::QueryCurrentFilter))? {
            Reply::Status(StatusPayload::CurrentFilter(set)) => Ok(set),
            other => Err(unexpected("current filter set", other)),
        }
    }

    pub fn get_all_filter_sets(&self) -> DamResult<Vec<FilterDescriptor>> {
        match self.with_session(|s| s.run(Command::QueryAllFilters))? {
            Reply::Status(StatusPayload::Filters(filters)) => Ok(filters),
            other => Err(unexpected("filter set list", other)),
        }
    }

    /// Push a firmware or filter set image
    pub fn download(&self, image: &[u8]) -> DamResult<TransferReceipt> {
        self.with_session(|s| transfer::download(s, image, CommitMode::Program))
    }

    /// Push an image and have the uManager apply it
    pub fn download_and_update(&self, image: &[u8]) -> DamResult<TransferReceipt> {
        self.with_session(|s| transfer::download(s, image, CommitMode::ProgramAndUpdate))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Ok(slot) = self.session.get_mut() {
            if let Some(mut session) = slot.take() {
                if let Err(e) = session.shutdown() {
                    debug!("Failed to leave uManager on drop: {}", e);
                }
            }
        }
    }
}

fn unexpected(expected: &str, reply: Reply) -> DamError {
    DamError::MalformedResponse {
        expected: expected.to_string(),
        received: format!("{:?}", reply),
    }
}
