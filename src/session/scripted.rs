use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::Session;
use crate::error::AcqError;

/// Shared record of what a [`ScriptedSession`] saw.
#[derive(Debug, Default)]
pub struct TranscriptInner {
    pub writes: Vec<String>,
    pub reads: usize,
    pub closed: bool,
}

pub type Transcript = Arc<Mutex<TranscriptInner>>;

#[derive(Debug)]
enum Reply {
    Line(String),
    Timeout,
}

/// In-memory stand-in for an instrument.
///
/// Replies are handed out in order, one per `read_until`. The transcript is
/// shared, so it stays inspectable after the session has been moved into an
/// acquisition loop.
#[derive(Debug)]
pub struct ScriptedSession {
    address: String,
    replies: VecDeque<Reply>,
    transcript: Transcript,
    open: bool,
}

impl ScriptedSession {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            replies: VecDeque::new(),
            transcript: Transcript::default(),
            open: true,
        }
    }

    /// Queue a reply line (without delimiter).
    pub fn reply(mut self, line: impl Into<String>) -> Self {
        self.replies.push_back(Reply::Line(line.into()));
        self
    }

    pub fn replies<I, L>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        self.replies
            .extend(lines.into_iter().map(|l| Reply::Line(l.into())));
        self
    }

    /// Queue a read timeout.
    pub fn timeout(mut self) -> Self {
        self.replies.push_back(Reply::Timeout);
        self
    }

    pub fn transcript(&self) -> Transcript {
        Arc::clone(&self.transcript)
    }

    pub fn pending_replies(&self) -> usize {
        self.replies.len()
    }
}

impl Session for ScriptedSession {
    fn address(&self) -> &str {
        &self.address
    }

    fn write(&mut self, command: &str) -> Result<(), AcqError> {
        if !self.open {
            return Err(AcqError::Closed(self.address.clone()));
        }
        self.transcript.lock().writes.push(command.to_string());
        Ok(())
    }

    fn read_until(&mut self, _delimiter: u8) -> Result<Vec<u8>, AcqError> {
        if !self.open {
            return Err(AcqError::Closed(self.address.clone()));
        }
        self.transcript.lock().reads += 1;
        match self.replies.pop_front() {
            Some(Reply::Line(line)) => Ok(line.into_bytes()),
            Some(Reply::Timeout) | None => Err(AcqError::Timeout),
        }
    }

    fn close(&mut self) -> Result<(), AcqError> {
        self.open = false;
        self.transcript.lock().closed = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
