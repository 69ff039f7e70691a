//! Scripted `PacketIo` for tests.
//!
//! Each write consumes the next scripted reply; reads serve the reply armed
//! by the preceding write. Stale reports can be queued to exercise the
//! pre-write drain.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hidapi::HidError;

use crate::error::{LinkError, Result};
use crate::transport::hid::PacketIo;

/// Shared log of the raw reports a mock has been asked to write.
pub(crate) type WriteLog = Arc<Mutex<Vec<Vec<u8>>>>;

/// What the device does after the next write.
pub(crate) enum MockReply {
    /// Answer with this report.
    Respond(Vec<u8>),
    /// Never answer; the read side waits out its timeout.
    Silent,
    /// Fail the write itself.
    WriteFail,
    /// Accept the write, fail the following read.
    ReadFail,
}

pub(crate) struct MockPacketIo {
    replies: VecDeque<MockReply>,
    stale: VecDeque<Vec<u8>>,
    pending: Option<Vec<u8>>,
    fail_next_read: bool,
    writes: WriteLog,
}

impl MockPacketIo {
    pub(crate) fn new(replies: Vec<MockReply>) -> (Self, WriteLog) {
        Self::with_stale(Vec::new(), replies)
    }

    /// Queue `stale` reports to be drained before the first write.
    pub(crate) fn with_stale(stale: Vec<Vec<u8>>, replies: Vec<MockReply>) -> (Self, WriteLog) {
        let writes: WriteLog = Arc::new(Mutex::new(Vec::new()));
        let io = MockPacketIo {
            replies: replies.into(),
            stale: stale.into(),
            pending: None,
            fail_next_read: false,
            writes: Arc::clone(&writes),
        };
        (io, writes)
    }

    fn hid_error(message: &str) -> LinkError {
        LinkError::HidError(HidError::HidApiError { message: message.into() })
    }
}

impl PacketIo for MockPacketIo {
    fn write_report(&mut self, data: &[u8]) -> Result<usize> {
        self.writes.lock().unwrap().push(data.to_vec());
        match self.replies.pop_front() {
            Some(MockReply::Respond(report)) => self.pending = Some(report),
            Some(MockReply::Silent) | None => {}
            Some(MockReply::WriteFail) => return Err(Self::hid_error("scripted write failure")),
            Some(MockReply::ReadFail) => self.fail_next_read = true,
        }
        Ok(data.len())
    }

    fn read_report(&mut self, buf: &mut [u8], timeout_ms: i32) -> Result<usize> {
        if let Some(report) = self.stale.pop_front() {
            let len = report.len().min(buf.len());
            buf[..len].copy_from_slice(&report[..len]);
            return Ok(len);
        }
        if self.fail_next_read {
            self.fail_next_read = false;
            return Err(Self::hid_error("scripted read failure"));
        }
        if let Some(report) = self.pending.take() {
            let len = report.len().min(buf.len());
            buf[..len].copy_from_slice(&report[..len]);
            return Ok(len);
        }
        // Model a blocking hidapi read that waits out its timeout.
        if timeout_ms > 0 {
            std::thread::sleep(Duration::from_millis(timeout_ms as u64));
        }
        Ok(0)
    }
}
