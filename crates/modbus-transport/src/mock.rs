use crate::{Endpoint, LinkParams, RegisterLink, Result, TransportError};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Six-word frame of a sensor sitting under a light resting load.
const RESTING_LOAD: [u16; 6] = [0x00C8, 0xFF38, 0x0F00, 0x0040, 0xFFC0, 0x0000];

/// Largest register count a single read-holding-registers request may ask for.
const MAX_READ_COUNT: u16 = 125;

/// Requests kept in the log; older entries are dropped first.
pub const REQUEST_LOG_CAPACITY: usize = 1024;

/// One-shot reply consumed by the next `read_registers` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockReply {
    Words(Vec<u16>),
    Fail(TransportError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Request {
    pub unit: u8,
    pub start: u16,
    pub count: u16,
}

#[derive(Debug)]
struct ScriptState {
    banks: HashMap<u8, Vec<u16>>,
    queue: VecDeque<MockReply>,
    online: bool,
    requests: VecDeque<Request>,
    connects: usize,
    closes: usize,
}

/// Shared handle to the simulated device behind one or more `MockLink`s.
///
/// Cloning the script clones the handle, so a test can keep one copy while the
/// link it feeds is moved into an acquisition thread.
#[derive(Clone, Debug)]
pub struct MockScript {
    state: Arc<Mutex<ScriptState>>,
}

impl Default for MockScript {
    fn default() -> Self {
        Self::new()
    }
}

impl MockScript {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                banks: HashMap::new(),
                queue: VecDeque::new(),
                online: true,
                requests: VecDeque::new(),
                connects: 0,
                closes: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the holding registers of `unit`, starting at address 0.
    pub fn set_registers(&self, unit: u8, words: &[u16]) {
        self.lock().banks.insert(unit, words.to_vec());
    }

    pub fn push_reply(&self, reply: MockReply) {
        self.lock().queue.push_back(reply);
    }

    pub fn fail_next(&self, err: TransportError) {
        self.push_reply(MockReply::Fail(err));
    }

    /// Offline devices refuse new links and reset existing ones on the next request.
    pub fn set_online(&self, online: bool) {
        self.lock().online = online;
    }

    /// The most recent requests, oldest first, at most `REQUEST_LOG_CAPACITY`.
    pub fn requests(&self) -> Vec<Request> {
        self.lock().requests.iter().copied().collect()
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }
}

/// A simulated Modbus device link backed by a `MockScript` register bank.
pub struct MockLink {
    script: MockScript,
    open: bool,
}

impl MockLink {
    /// Open a link onto `script`; fails like a refused socket while the device is offline.
    pub fn attach(script: &MockScript) -> Result<Self> {
        let mut state = script.lock();
        if !state.online {
            return Err(TransportError::Connection(
                "mock device is offline".to_string(),
            ));
        }
        state.connects += 1;
        drop(state);
        Ok(Self {
            script: script.clone(),
            open: true,
        })
    }

    /// A link onto a fresh device reporting a constant resting load.
    ///
    /// Unit 1 holds the six-word block; units 2 and 3 mirror Fy and Fz at address 0
    /// so that per-unit wiring reads the same load.
    pub fn resting() -> Self {
        let script = MockScript::new();
        script.set_registers(1, &RESTING_LOAD);
        script.set_registers(2, &RESTING_LOAD[1..2]);
        script.set_registers(3, &RESTING_LOAD[2..3]);
        script.lock().connects = 1;
        Self { script, open: true }
    }

    pub fn script(&self) -> &MockScript {
        &self.script
    }
}

impl RegisterLink for MockLink {
    fn connect(endpoint: &Endpoint, _params: &LinkParams) -> Result<Self> {
        debug!(%endpoint, "opening mock register link");
        Ok(Self::resting())
    }

    fn read_registers(&mut self, unit: u8, start: u16, count: u16) -> Result<Vec<u16>> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let mut state = self.script.lock();
        if state.requests.len() == REQUEST_LOG_CAPACITY {
            state.requests.pop_front();
        }
        state.requests.push_back(Request { unit, start, count });
        if !state.online {
            return Err(TransportError::Connection(
                "connection reset by mock device".to_string(),
            ));
        }
        if let Some(reply) = state.queue.pop_front() {
            return match reply {
                MockReply::Words(words) => Ok(words),
                MockReply::Fail(err) => Err(err),
            };
        }
        // Nobody answers for an unknown unit id; the client gives up after its timeout.
        let bank = state.banks.get(&unit).ok_or(TransportError::Timeout)?;
        let begin = usize::from(start);
        let end = begin + usize::from(count);
        if count == 0 || count > MAX_READ_COUNT || end > bank.len() {
            return Err(TransportError::Protocol(
                "exception response: IllegalDataAddress".to_string(),
            ));
        }
        Ok(bank[begin..end].to_vec())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.script.lock().closes += 1;
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_slice_of_register_bank() -> anyhow::Result<()> {
        let script = MockScript::new();
        script.set_registers(1, &[10, 20, 30, 40, 50, 60]);
        let mut link = MockLink::attach(&script)?;
        assert_eq!(link.read_registers(1, 0, 6)?, vec![10, 20, 30, 40, 50, 60]);
        assert_eq!(link.read_registers(1, 2, 2)?, vec![30, 40]);
        assert_eq!(
            script.requests(),
            vec![
                Request {
                    unit: 1,
                    start: 0,
                    count: 6
                },
                Request {
                    unit: 1,
                    start: 2,
                    count: 2
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn test_out_of_range_read_is_protocol_error() -> anyhow::Result<()> {
        let script = MockScript::new();
        script.set_registers(1, &[1, 2, 3]);
        let mut link = MockLink::attach(&script)?;
        assert!(matches!(
            link.read_registers(1, 2, 2),
            Err(TransportError::Protocol(_))
        ));
        assert!(matches!(
            link.read_registers(1, 0, 0),
            Err(TransportError::Protocol(_))
        ));
        Ok(())
    }

    #[test]
    fn test_unknown_unit_times_out() -> anyhow::Result<()> {
        let script = MockScript::new();
        let mut link = MockLink::attach(&script)?;
        assert_eq!(link.read_registers(7, 0, 1), Err(TransportError::Timeout));
        Ok(())
    }

    #[test]
    fn test_queued_replies_take_precedence() -> anyhow::Result<()> {
        let script = MockScript::new();
        script.set_registers(1, &[1, 2, 3, 4, 5, 6]);
        script.fail_next(TransportError::Timeout);
        script.push_reply(MockReply::Words(vec![9; 6]));
        let mut link = MockLink::attach(&script)?;
        assert_eq!(link.read_registers(1, 0, 6), Err(TransportError::Timeout));
        assert_eq!(link.read_registers(1, 0, 6)?, vec![9; 6]);
        assert_eq!(link.read_registers(1, 0, 6)?, vec![1, 2, 3, 4, 5, 6]);
        Ok(())
    }

    #[test]
    fn test_offline_device_refuses_and_resets() -> anyhow::Result<()> {
        let script = MockScript::new();
        script.set_registers(1, &[0; 6]);
        let mut link = MockLink::attach(&script)?;
        script.set_online(false);
        assert!(matches!(
            link.read_registers(1, 0, 6),
            Err(TransportError::Connection(_))
        ));
        assert!(MockLink::attach(&script).is_err());
        script.set_online(true);
        assert!(MockLink::attach(&script).is_ok());
        assert_eq!(script.connects(), 2);
        Ok(())
    }

    #[test]
    fn test_request_log_is_bounded() -> anyhow::Result<()> {
        let script = MockScript::new();
        script.set_registers(1, &[0; 6]);
        let mut link = MockLink::attach(&script)?;
        for start in 0..(REQUEST_LOG_CAPACITY + 10) {
            let _ = link.read_registers(1, (start % 6) as u16, 1)?;
        }
        let log = script.requests();
        assert_eq!(log.len(), REQUEST_LOG_CAPACITY);
        let newest = REQUEST_LOG_CAPACITY + 9;
        assert_eq!(
            log.last(),
            Some(&Request {
                unit: 1,
                start: (newest % 6) as u16,
                count: 1
            })
        );
        assert_eq!(log[0].start, (10 % 6) as u16);
        Ok(())
    }

    #[test]
    fn test_close_is_idempotent() -> anyhow::Result<()> {
        let script = MockScript::new();
        let mut link = MockLink::attach(&script)?;
        link.close();
        link.close();
        assert!(!link.is_open());
        assert_eq!(script.closes(), 1);
        assert_eq!(link.read_registers(1, 0, 6), Err(TransportError::Closed));
        Ok(())
    }

    #[test]
    fn test_resting_link_serves_both_wirings() -> anyhow::Result<()> {
        let mut link = MockLink::connect(&Endpoint::tcp("mock", 502), &LinkParams::default())?;
        let block = link.read_registers(1, 0, 6)?;
        assert_eq!(block, RESTING_LOAD.to_vec());
        assert_eq!(link.read_registers(2, 0, 1)?, vec![block[1]]);
        assert_eq!(link.read_registers(3, 0, 1)?, vec![block[2]]);
        Ok(())
    }
}
