#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dam1021::{
    Connection, ConnectionConfig, FirmwareRevision,
    error::{DamError, DamResult},
    interface::DeviceInterface,
};

pub const ACK: u8 = 0x06;
pub const CAN: u8 = 0x18;

enum Step {
    /// Reply once the expected bytes are written
    Expect {
        write: Vec<u8>,
        reply: Vec<u8>,
        delay: Duration,
    },
    /// Reply in separate bursts, one per read
    Bursts { write: Vec<u8>, bursts: Vec<Vec<u8>> },
    /// Reply to whatever is written next
    Any { reply: Vec<u8> },
    /// The link drops while writing
    Fail { write: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Sent(Vec<u8>),
    Received(Vec<u8>),
}

#[derive(Default)]
struct MockState {
    script: VecDeque<Step>,
    pending: VecDeque<u8>,
    later: VecDeque<Vec<u8>>,
    pending_delay: Duration,
    events: Vec<Event>,
    mismatches: Vec<String>,
}

/// Scripted stand-in for a dam1021 on the other end of the serial line.
/// Clones share state so a test can keep a handle after moving one into
/// a `Connection`.
#[derive(Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect(&self, write: &[u8], reply: &[u8]) -> &Self {
        self.expect_delayed(write, reply, Duration::ZERO)
    }

    /// Reply only after `delay`; reads with a shorter timeout see nothing
    pub fn expect_delayed(&self, write: &[u8], reply: &[u8], delay: Duration) -> &Self {
        self.state.lock().unwrap().script.push_back(Step::Expect {
            write: write.to_vec(),
            reply: reply.to_vec(),
            delay,
        });
        self
    }

    /// The first burst answers the first read, the rest trickle in on later reads
    pub fn expect_bursts(&self, write: &[u8], bursts: &[&[u8]]) -> &Self {
        self.state.lock().unwrap().script.push_back(Step::Bursts {
            write: write.to_vec(),
            bursts: bursts.iter().map(|burst| burst.to_vec()).collect(),
        });
        self
    }

    pub fn expect_failure(&self, write: &[u8]) -> &Self {
        self.state.lock().unwrap().script.push_back(Step::Fail {
            write: write.to_vec(),
        });
        self
    }

    pub fn expect_any(&self, reply: &[u8]) -> &Self {
        self.state.lock().unwrap().script.push_back(Step::Any {
            reply: reply.to_vec(),
        });
        self
    }

    pub fn open_manager(&self) -> &Self {
        self.expect(b"+++", b"").expect(b"\r", b"\r\n# ")
    }

    pub fn close_manager(&self) -> &Self {
        self.expect(b"\r", b"\r\n# ").expect(b"exit\r", b"exit\r\n")
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Sent(bytes) => Some(bytes),
                Event::Received(_) => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn mismatches(&self) -> Vec<String> {
        self.state.lock().unwrap().mismatches.clone()
    }

    pub fn remaining_steps(&self) -> usize {
        self.state.lock().unwrap().script.len()
    }

    /// Every scripted step consumed, every write as expected
    pub fn assert_done(&self) {
        assert!(self.mismatches().is_empty(), "{:?}", self.mismatches());
        assert_eq!(self.remaining_steps(), 0, "unused script steps");
    }
}

fn check_write(state: &mut MockState, write: &[u8], data: &[u8]) {
    if write != data {
        let mismatch = format!(
            "expected {:?}, got {:?}",
            String::from_utf8_lossy(write),
            String::from_utf8_lossy(data)
        );
        state.mismatches.push(mismatch);
    }
}

impl DeviceInterface for MockDevice {
    fn send(&mut self, data: &[u8]) -> DamResult<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::Sent(data.to_vec()));

        match state.script.pop_front() {
            Some(Step::Expect {
                write,
                reply,
                delay,
            }) => {
                check_write(&mut state, &write, data);
                state.pending.extend(reply);
                state.pending_delay = delay;
            }
            Some(Step::Bursts { write, bursts }) => {
                check_write(&mut state, &write, data);
                state.later.extend(bursts);
                state.pending_delay = Duration::ZERO;
            }
            Some(Step::Any { reply }) => {
                state.pending.extend(reply);
                state.pending_delay = Duration::ZERO;
            }
            Some(Step::Fail { write }) => {
                check_write(&mut state, &write, data);
                return Err(DamError::Connection("Write failed: link down".to_string()));
            }
            None => {
                let mismatch = format!("unscripted write {:?}", String::from_utf8_lossy(data));
                state.mismatches.push(mismatch);
            }
        }
        Ok(())
    }

    fn receive(&mut self, max: usize, timeout: Duration) -> DamResult<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        if state.pending_delay > timeout {
            state.pending.clear();
            state.pending_delay = Duration::ZERO;
        }
        if state.pending.is_empty() {
            if let Some(burst) = state.later.pop_front() {
                state.pending.extend(burst);
            }
        }

        let count = max.min(state.pending.len());
        let bytes: Vec<u8> = state.pending.drain(..count).collect();
        state.events.push(Event::Received(bytes.clone()));
        Ok(bytes)
    }

    /// Only what already arrived is dropped; bursts still on their way survive
    fn flush_buffers(&mut self) -> DamResult<()> {
        self.state.lock().unwrap().pending.clear();
        Ok(())
    }
}

pub fn test_config() -> ConnectionConfig {
    ConnectionConfig {
        device: "mock".to_string(),
        timeout: Duration::from_secs(2),
        settle_delay: Duration::ZERO,
        manager_guard: Duration::ZERO,
        revision: FirmwareRevision::Current,
        progress_bar: false,
    }
}

pub fn connect(mock: &MockDevice) -> Connection {
    Connection::from_device(Box::new(mock.clone()), test_config())
}
