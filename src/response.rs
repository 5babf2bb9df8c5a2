use std::time::Duration;

use tracing::debug;

use crate::{
    command::FilterSet,
    constants::{MANAGER_ERROR_TEXT, MANAGER_EXIT, MANAGER_PROMPT, REPROGRAM_ACK, UPDATE_ACK},
    error::{DamError, DamResult},
};

/// XMODEM receivers ask for CRC mode by sending this byte
const CRC_REQUEST: char = 'C';

/// Reply shape expected for the command that was just written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// Direct commands are echoed back verbatim
    Echo(String),
    CurrentFilter,
    ManagerAck,
    FilterList,
    TransferReady,
    ManagerPrompt,
    ManagerExit,
    Programmed,
    Updated,
}

impl Expectation {
    /// The device echoes first and prints the marker only once it has done the work
    pub fn arrives_late(&self) -> bool {
        matches!(
            self,
            Expectation::TransferReady | Expectation::Programmed | Expectation::Updated
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDescriptor {
    pub set: FilterSet,
    pub label: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusPayload {
    CurrentFilter(FilterSet),
    Filters(Vec<FilterDescriptor>),
    TransferReady,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Status(StatusPayload),
}

/// Interprets raw device output in the context of the command that produced it
#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    timeout: Duration,
}

impl Decoder {
    pub fn new(timeout: Duration) -> Self {
        Decoder { timeout }
    }

    pub fn decode(&self, expectation: &Expectation, raw: &[u8]) -> DamResult<Reply> {
        if raw.is_empty() {
            return Err(DamError::Timeout(self.timeout));
        }

        let text = String::from_utf8_lossy(raw);
        debug!("Received {:?}", text);
        let malformed = |expected: &str| DamError::MalformedResponse {
            expected: expected.to_string(),
            received: text.to_string(),
        };

        match expectation {
            Expectation::Echo(echo) => {
                if text.trim_end().ends_with(echo.as_str()) {
                    Ok(Reply::Ack)
                } else {
                    Err(malformed(echo))
                }
            }
            Expectation::CurrentFilter => last_line(&text)
                .and_then(|line| line.strip_prefix('F'))
                .and_then(|index| index.trim().parse::<i32>().ok())
                .and_then(|index| FilterSet::try_from(index).ok())
                .map(|set| Reply::Status(StatusPayload::CurrentFilter(set)))
                .ok_or_else(|| malformed("current filter set")),
            Expectation::ManagerAck => {
                check_rejection(&text)?;
                if text.ends_with(MANAGER_PROMPT) {
                    Ok(Reply::Ack)
                } else {
                    Err(malformed("uManager prompt"))
                }
            }
            Expectation::FilterList => {
                check_rejection(&text)?;
                if !text.ends_with(MANAGER_PROMPT) {
                    return Err(malformed("uManager prompt after filter list"));
                }
                let filters: Vec<FilterDescriptor> =
                    text.lines().filter_map(parse_filter_line).collect();
                if filters.is_empty() {
                    Err(malformed("filter set list"))
                } else {
                    Ok(Reply::Status(StatusPayload::Filters(filters)))
                }
            }
            Expectation::TransferReady => {
                if text.ends_with(CRC_REQUEST) {
                    Ok(Reply::Status(StatusPayload::TransferReady))
                } else {
                    Err(malformed("XMODEM CRC request"))
                }
            }
            Expectation::ManagerPrompt => {
                if text.ends_with(MANAGER_PROMPT) {
                    Ok(Reply::Ack)
                } else {
                    Err(malformed("uManager prompt"))
                }
            }
            Expectation::ManagerExit => {
                if text.ends_with(&format!("{}\r\n", MANAGER_EXIT)) {
                    Ok(Reply::Ack)
                } else {
                    Err(malformed("uManager exit"))
                }
            }
            Expectation::Programmed => {
                check_rejection(&text)?;
                if text.contains(REPROGRAM_ACK) {
                    Ok(Reply::Ack)
                } else {
                    Err(malformed("reprogramming acknowledgement"))
                }
            }
            Expectation::Updated => {
                check_rejection(&text)?;
                if text.contains(UPDATE_ACK) {
                    Ok(Reply::Ack)
                } else {
                    Err(malformed("update acknowledgement"))
                }
            }
        }
    }
}

fn check_rejection(text: &str) -> DamResult<()> {
    match text
        .lines()
        .map(str::trim)
        .find(|line| line.to_lowercase().ends_with(MANAGER_ERROR_TEXT))
    {
        Some(line) => Err(DamError::Rejected(line.to_string())),
        None => Ok(()),
    }
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).rfind(|line| !line.is_empty())
}

/// `<index> <name>`, an optional `:` after the index and a trailing `*` on the active set
fn parse_filter_line(line: &str) -> Option<FilterDescriptor> {
    let line = line.trim();
    let (index, rest) = line.split_once(|c: char| c == ':' || c.is_whitespace())?;
    let set = FilterSet::try_from(index.parse::<i32>().ok()?).ok()?;
    let rest = rest.trim_start_matches(':').trim();
    let (label, active) = match rest.strip_suffix('*') {
        Some(label) => (label.trim(), true),
        None => (rest, false),
    };
    if label.is_empty() {
        return None;
    }

    Some(FilterDescriptor {
        set,
        label: label.to_string(),
        active,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> Decoder {
        Decoder::new(Duration::from_secs(2))
    }

    #[test]
    fn empty_reply_is_a_timeout() {
        for expectation in [
            Expectation::Echo("V-14".into()),
            Expectation::CurrentFilter,
            Expectation::ManagerAck,
            Expectation::Programmed,
        ] {
            assert!(matches!(
                decoder().decode(&expectation, b""),
                Err(DamError::Timeout(t)) if t == Duration::from_secs(2)
            ));
        }
    }

    #[test]
    fn echo_must_match_the_command_sent() {
        let expectation = Expectation::Echo("V-14".into());
        assert_eq!(
            decoder().decode(&expectation, b"V-14\r\n").unwrap(),
            Reply::Ack
        );
        assert!(matches!(
            decoder().decode(&expectation, b"V-15\r\n"),
            Err(DamError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn current_filter_is_read_from_the_last_line() {
        let reply = decoder()
            .decode(&Expectation::CurrentFilter, b"F?\r\nF3\r\n")
            .unwrap();
        assert_eq!(
            reply,
            Reply::Status(StatusPayload::CurrentFilter(FilterSet::Minimum))
        );
        assert!(
            decoder()
                .decode(&Expectation::CurrentFilter, b"F?\r\nF9\r\n")
                .is_err()
        );
        assert!(decoder().decode(&Expectation::CurrentFilter, b"F?\r\n").is_err());
    }

    #[test]
    fn manager_rejection_is_distinct_from_garbage() {
        assert!(matches!(
            decoder().decode(&Expectation::ManagerAck, b"set mode=x\r\nInvalid command\r\n"),
            Err(DamError::Rejected(_))
        ));
        assert!(matches!(
            decoder().decode(&Expectation::ManagerAck, b"set filter=9\r\ninvalid command\r\n# "),
            Err(DamError::Rejected(ref line)) if line == "invalid command"
        ));
        assert!(matches!(
            decoder().decode(&Expectation::ManagerAck, b"\x00\xff"),
            Err(DamError::MalformedResponse { .. })
        ));
        assert_eq!(
            decoder()
                .decode(&Expectation::ManagerAck, b"set volume=-22\r\n# ")
                .unwrap(),
            Reply::Ack
        );
    }

    #[test]
    fn filter_list_parses_descriptors() {
        let raw = b"filters\r\n1: linear *\r\n2: mixed\r\n3 minimum\r\n4 soft\r\n# ";
        let Reply::Status(StatusPayload::Filters(filters)) =
            decoder().decode(&Expectation::FilterList, raw).unwrap()
        else {
            panic!("expected a filter list");
        };

        assert_eq!(filters.len(), 4);
        assert_eq!(filters[0].set, FilterSet::Linear);
        assert!(filters[0].active);
        assert_eq!(filters[2].label, "minimum");
        assert!(!filters[3].active);
    }

    #[test]
    fn filter_list_without_entries_is_malformed() {
        assert!(matches!(
            decoder().decode(&Expectation::FilterList, b"filters\r\n# "),
            Err(DamError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn transfer_handshake_and_commit() {
        assert_eq!(
            decoder()
                .decode(&Expectation::TransferReady, b"download\r\nCCC")
                .unwrap(),
            Reply::Status(StatusPayload::TransferReady)
        );
        assert!(decoder().decode(&Expectation::TransferReady, b"download\r\n# ").is_err());
        assert!(
            decoder()
                .decode(&Expectation::Programmed, b"\r\nflash programmed\r\n# ")
                .is_ok()
        );
        assert!(
            decoder()
                .decode(&Expectation::Updated, b"update\r\ninvalid command")
                .is_err()
        );
    }
}
