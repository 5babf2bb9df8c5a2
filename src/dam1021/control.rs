use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgGroup, Parser};
use dam1021::{
    Connection, ConnectionConfig, DEFAULT_SERIAL_DEVICE, FilterSet, FirmwareRevision, Mode,
    error::{DamError, DamResult},
};

/// Operate a dam1021 DAC. Exclusive access to the serial device is a prerequisite.
#[derive(Parser, Debug, Clone)]
#[command(
    version,
    long_about = None,
    after_help = "Example: dam1021 -s /dev/ttyUSB0 -l -14",
    group(ArgGroup::new("action").required(true).multiple(false))
)]
pub(crate) struct ControlOptions {
    /// Increase output verbosity
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Serial device to use
    #[arg(short, long = "serial-device", default_value = DEFAULT_SERIAL_DEVICE)]
    serial: String,

    /// Reply timeout in seconds
    #[arg(short, long, default_value_t = 2.0)]
    timeout: f64,

    /// Firmware revision the DAC is running
    #[arg(short, long, value_enum, default_value_t = FirmwareRevision::Current)]
    revision: FirmwareRevision,

    /// Download a new firmware or filter set
    #[arg(short, long, group = "action")]
    download: Option<PathBuf>,

    /// Download a new firmware or filter set and let the uManager apply it
    #[arg(short = 'u', long, group = "action")]
    download_and_update: Option<PathBuf>,

    /// Set the output mode
    #[arg(short, long, value_enum, group = "action")]
    mode: Option<Mode>,

    /// Set the current volume level [-80, 10], -99 for potentiometer control
    #[arg(short = 'l', long, group = "action", allow_hyphen_values = true)]
    volume_level: Option<i32>,

    /// Set the volume level stored on flash
    #[arg(short, long, group = "action", allow_hyphen_values = true)]
    flash_volume_level: Option<i32>,

    /// Set the input source [0, 3]
    #[arg(short, long, group = "action", allow_hyphen_values = true)]
    input_source: Option<i32>,

    /// Select a filter set by index [1, 4] or name (linear, mixed, minimum, soft)
    #[arg(short = 'F', long, group = "action")]
    filter_set: Option<FilterSet>,

    /// Store the filter set used at power-up
    #[arg(short = 'D', long, group = "action")]
    default_filter_set: Option<FilterSet>,

    /// Show the active filter set
    #[arg(short = 'c', long, group = "action")]
    show_current_filter: bool,

    /// List the filter sets stored on the DAC
    #[arg(short = 'a', long, group = "action")]
    show_all_filters: bool,
}

/// Positive and small enough to be represented as a `Duration`
fn reply_timeout(seconds: f64) -> DamResult<Duration> {
    Duration::try_from_secs_f64(seconds)
        .ok()
        .filter(|timeout| !timeout.is_zero())
        .ok_or(DamError::InvalidTimeout(seconds))
}

pub(crate) fn handle_control(opts: ControlOptions) -> DamResult<()> {
    let conn = Connection::with_config(ConnectionConfig {
        device: opts.serial.clone(),
        timeout: reply_timeout(opts.timeout)?,
        revision: opts.revision,
        progress_bar: true,
        ..ConnectionConfig::default()
    })?;

    let result = run_action(&conn, &opts);
    let closed = conn.close();
    result.and(closed)
}

fn run_action(conn: &Connection, opts: &ControlOptions) -> DamResult<()> {
    if let Some(path) = &opts.download {
        conn.download(&std::fs::read(path)?)?;
    } else if let Some(path) = &opts.download_and_update {
        conn.download_and_update(&std::fs::read(path)?)?;
    } else if let Some(mode) = opts.mode {
        conn.set_mode(mode)?;
    } else if let Some(level) = opts.volume_level {
        conn.set_current_volume_level(level)?;
    } else if let Some(level) = opts.flash_volume_level {
        conn.set_flash_volume_level(level)?;
    } else if let Some(index) = opts.input_source {
        conn.set_input_source(index)?;
    } else if let Some(filter) = opts.filter_set {
        conn.set_filter_set(filter)?;
    } else if let Some(filter) = opts.default_filter_set {
        conn.set_default_filter_set(filter)?;
    } else if opts.show_current_filter {
        println!("{}", conn.get_current_filter_set()?);
    } else if opts.show_all_filters {
        for filter in conn.get_all_filter_sets()? {
            let marker = if filter.active { " *" } else { "" };
            println!("{} {}{}", filter.set.index(), filter.label, marker);
        }
    }

    Ok(())
}
