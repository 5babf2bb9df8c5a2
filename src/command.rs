//! Outbound command frames.
//!
//! The dam1021 speaks a line oriented ASCII protocol. A handful of short
//! commands (`V`, `I`, `F`) are understood at any time outside the uManager
//! console, everything that touches flash goes through the console.

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use tracing::trace;

use crate::{
    constants::MANAGER_EXIT,
    error::{Allowed, DamError, DamResult},
    ranges::{ParameterKind, ParameterRanges},
    response::Expectation,
};

const CR: &str = "\r";

/// Digital reconstruction filter sets stored on the DAC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterSet {
    Linear = 1,
    Mixed = 2,
    Minimum = 3,
    Soft = 4,
}

impl FilterSet {
    pub const ALL: [FilterSet; 4] = [
        FilterSet::Linear,
        FilterSet::Mixed,
        FilterSet::Minimum,
        FilterSet::Soft,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            FilterSet::Linear => "linear",
            FilterSet::Mixed => "mixed",
            FilterSet::Minimum => "minimum",
            FilterSet::Soft => "soft",
        }
    }
}

impl TryFrom<i32> for FilterSet {
    type Error = DamError;

    fn try_from(index: i32) -> DamResult<Self> {
        FilterSet::ALL
            .into_iter()
            .find(|set| i32::from(set.index()) == index)
            .ok_or(DamError::Validation {
                kind: ParameterKind::FilterSet,
                value: index as i64,
                allowed: Allowed {
                    range: 1..=4,
                    sentinel: None,
                },
            })
    }
}

/// Accepts either the numeric index or the filter name
impl FromStr for FilterSet {
    type Err = DamError;

    fn from_str(s: &str) -> DamResult<Self> {
        let s = s.trim();
        if let Ok(index) = s.parse::<i32>() {
            return FilterSet::try_from(index);
        }
        FilterSet::ALL
            .into_iter()
            .find(|set| set.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| DamError::UnknownName {
                kind: ParameterKind::FilterSet,
                name: s.to_string(),
            })
    }
}

impl fmt::Display for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.index(), self.name())
    }
}

/// DAC output stage configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Normal,
    Invert,
    BalLeft,
    BalRight,
}

impl Mode {
    pub fn name(self) -> &'static str {
        match self {
            Mode::Normal => "normal",
            Mode::Invert => "invert",
            Mode::BalLeft => "bal-left",
            Mode::BalRight => "bal-right",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Follow-up sent once an image has been transferred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Collect the reprogramming acknowledgement
    Program,
    /// Additionally let the uManager apply the image
    ProgramAndUpdate,
}

/// Where a command must be issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Outside the uManager console
    Direct,
    /// Inside the uManager console
    Manager,
    /// Session control, valid in either state
    Session,
}

/// One logical operation against the DAC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    SetVolume(i32),
    SetFlashVolume(i32),
    SetInputSource(i32),
    SetFilterSet(FilterSet),
    SetDefaultFilterSet(FilterSet),
    SetMode(Mode),
    QueryCurrentFilter,
    QueryAllFilters,
    Download(&'a [u8]),
    DownloadAndUpdate(&'a [u8]),
    OpenManager,
    Prompt,
    CloseManager,
    Commit(CommitMode),
}

impl Command<'_> {
    pub fn channel(&self) -> Channel {
        match self {
            Command::SetVolume(_)
            | Command::SetInputSource(_)
            | Command::SetFilterSet(_)
            | Command::QueryCurrentFilter => Channel::Direct,
            Command::SetFlashVolume(_)
            | Command::SetDefaultFilterSet(_)
            | Command::SetMode(_)
            | Command::QueryAllFilters
            | Command::Download(_)
            | Command::DownloadAndUpdate(_)
            | Command::Commit(_) => Channel::Manager,
            Command::OpenManager | Command::Prompt | Command::CloseManager => Channel::Session,
        }
    }

    /// Reply shape the decoder should accept for this command, `None` when the
    /// device answers nothing
    pub fn expectation(&self) -> Option<Expectation> {
        let expectation = match self {
            Command::SetVolume(level) => Expectation::Echo(volume_text(*level)),
            Command::SetInputSource(index) => Expectation::Echo(format!("I{}", index)),
            Command::SetFilterSet(set) => Expectation::Echo(format!("F{}", set.index())),
            Command::QueryCurrentFilter => Expectation::CurrentFilter,
            Command::SetFlashVolume(_) | Command::SetDefaultFilterSet(_) | Command::SetMode(_) => {
                Expectation::ManagerAck
            }
            Command::QueryAllFilters => Expectation::FilterList,
            Command::Download(_) | Command::DownloadAndUpdate(_) => Expectation::TransferReady,
            Command::OpenManager => return None,
            Command::Prompt => Expectation::ManagerPrompt,
            Command::CloseManager => Expectation::ManagerExit,
            Command::Commit(CommitMode::Program) => Expectation::Programmed,
            Command::Commit(CommitMode::ProgramAndUpdate) => Expectation::Updated,
        };
        Some(expectation)
    }
}

/// Raw bytes ready for the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame(Vec<u8>);

impl EncodedFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Frame text without the line terminator
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0).trim_end_matches('\r').to_string()
    }
}

/// Validates commands against one firmware revision and renders them
#[derive(Debug, Clone, Default)]
pub struct Encoder {
    ranges: ParameterRanges,
}

impl Encoder {
    pub fn new(ranges: ParameterRanges) -> Self {
        Encoder { ranges }
    }

    pub fn ranges(&self) -> &ParameterRanges {
        &self.ranges
    }

    pub fn encode(&self, command: &Command<'_>) -> DamResult<EncodedFrame> {
        let text = match *command {
            Command::SetVolume(level) => {
                self.ranges.check_volume(ParameterKind::VolumeLevel, level)?;
                line(&volume_text(level))
            }
            Command::SetFlashVolume(level) => {
                self.ranges
                    .check_volume(ParameterKind::FlashVolumeLevel, level)?;
                line(&format!("set volume={:+03}", level))
            }
            Command::SetInputSource(index) => {
                self.ranges.check_input_source(index)?;
                line(&format!("I{}", index))
            }
            Command::SetFilterSet(set) => {
                self.ranges.check_filter_set(set.index())?;
                line(&format!("F{}", set.index()))
            }
            Command::SetDefaultFilterSet(set) => {
                self.ranges.check_filter_set(set.index())?;
                line(&format!("set filter={}", set.index()))
            }
            Command::SetMode(mode) => {
                self.ranges.check_mode()?;
                line(&format!("set mode={}", mode.name()))
            }
            Command::QueryCurrentFilter => {
                self.ranges.check_filter_set(FilterSet::Linear.index())?;
                line("F?")
            }
            Command::QueryAllFilters => {
                self.ranges.check_filter_set(FilterSet::Linear.index())?;
                line("filters")
            }
            Command::Download(image) | Command::DownloadAndUpdate(image) => {
                self.ranges.check_image(image)?;
                line("download")
            }
            Command::OpenManager => "+++".to_string(),
            Command::Prompt | Command::Commit(CommitMode::Program) => CR.to_string(),
            Command::CloseManager => line(MANAGER_EXIT),
            Command::Commit(CommitMode::ProgramAndUpdate) => line("update"),
        };

        trace!("Encoded frame {:?}", text);
        Ok(EncodedFrame(text.into_bytes()))
    }
}

/// Volume levels always carry an explicit sign and at least two digits
fn volume_text(level: i32) -> String {
    format!("V{:+03}", level)
}

fn line(text: &str) -> String {
    format!("{}{}", text, CR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranges::FirmwareRevision;

    fn parse_volume(frame: &EncodedFrame) -> i32 {
        let text = frame.text();
        text.strip_prefix('V')
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| panic!("not a volume frame: {text:?}"))
    }

    #[test]
    fn every_legal_volume_encodes_and_reads_back() {
        let encoder = Encoder::default();
        for level in (-80..=10).chain([-99]) {
            let frame = encoder.encode(&Command::SetVolume(level)).unwrap();
            assert_eq!(parse_volume(&frame), level);
            assert_eq!(frame.as_bytes().last(), Some(&b'\r'));
        }
    }

    #[test]
    fn volume_frames_use_signed_two_digit_scale() {
        let encoder = Encoder::default();
        let frame = |level| encoder.encode(&Command::SetVolume(level)).unwrap();
        assert_eq!(frame(-14).as_bytes(), b"V-14\r");
        assert_eq!(frame(0).as_bytes(), b"V+00\r");
        assert_eq!(frame(5).as_bytes(), b"V+05\r");
        assert_eq!(frame(-99).as_bytes(), b"V-99\r");
        assert_eq!(
            encoder
                .encode(&Command::SetFlashVolume(-22))
                .unwrap()
                .as_bytes(),
            b"set volume=-22\r"
        );
    }

    #[test]
    fn illegal_volume_is_rejected() {
        let encoder = Encoder::default();
        for level in [-100, -98, -81, 11, 15] {
            let err = encoder.encode(&Command::SetVolume(level)).unwrap_err();
            assert!(
                matches!(err, DamError::Validation { kind: ParameterKind::VolumeLevel, value, .. } if value == level as i64)
            );
        }
    }

    #[test]
    fn input_source_bounds() {
        let encoder = Encoder::default();
        for index in 0..=3 {
            let frame = encoder.encode(&Command::SetInputSource(index)).unwrap();
            assert_eq!(frame.text(), format!("I{index}"));
        }
        for index in [-1, 4] {
            assert!(matches!(
                encoder.encode(&Command::SetInputSource(index)),
                Err(DamError::Validation {
                    kind: ParameterKind::InputSource,
                    ..
                })
            ));
        }
    }

    #[test]
    fn filter_index_and_name_produce_identical_frames() {
        let encoder = Encoder::default();
        for (index, name) in [(1, "linear"), (2, "mixed"), (3, "minimum"), (4, "soft")] {
            let by_index: FilterSet = index.to_string().parse().unwrap();
            let by_name: FilterSet = name.parse().unwrap();
            let by_int = FilterSet::try_from(index).unwrap();
            assert_eq!(by_index, by_name);
            assert_eq!(by_int, by_name);

            let a = encoder.encode(&Command::SetFilterSet(by_index)).unwrap();
            let b = encoder.encode(&Command::SetFilterSet(by_name)).unwrap();
            assert_eq!(a, b);
            assert_eq!(a.text(), format!("F{index}"));
        }
    }

    #[test]
    fn unknown_filter_names_fail_at_the_boundary() {
        assert!("Linear".parse::<FilterSet>().is_ok());
        assert!("sharp".parse::<FilterSet>().is_err());
        assert!(matches!(
            "5".parse::<FilterSet>(),
            Err(DamError::Validation {
                kind: ParameterKind::FilterSet,
                value: 5,
                ..
            })
        ));
    }

    #[test]
    fn mode_frames() {
        let encoder = Encoder::default();
        assert_eq!(
            encoder
                .encode(&Command::SetMode(Mode::BalRight))
                .unwrap()
                .as_bytes(),
            b"set mode=bal-right\r"
        );
    }

    #[test]
    fn legacy_firmware_refuses_newer_commands() {
        let encoder = Encoder::new(ParameterRanges::for_revision(FirmwareRevision::Legacy));
        assert!(matches!(
            encoder.encode(&Command::SetMode(Mode::Normal)),
            Err(DamError::Unsupported { .. })
        ));
        assert!(matches!(
            encoder.encode(&Command::QueryCurrentFilter),
            Err(DamError::Unsupported { .. })
        ));
        assert_eq!(
            encoder.encode(&Command::SetVolume(15)).unwrap().as_bytes(),
            b"V+15\r"
        );
    }

    #[test]
    fn download_needs_a_payload() {
        let encoder = Encoder::default();
        assert!(encoder.encode(&Command::Download(&[])).is_err());
        assert_eq!(
            encoder
                .encode(&Command::DownloadAndUpdate(&[1, 2, 3]))
                .unwrap()
                .as_bytes(),
            b"download\r"
        );
    }
}
