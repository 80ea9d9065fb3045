//! Device sessions: an open command/response channel to one instrument.
//!
//! Every transport speaks the same small capability: write a text command,
//! read bytes up to a delimiter, close. Instrument probes only ever see the
//! [`Session`] trait, so a scripted stub can stand in for hardware.

pub mod line;
pub mod scripted;
pub mod serial;
pub mod tcp;

pub use line::LineSession;
pub use scripted::{ScriptedSession, Transcript};
pub use serial::{open_serial, ParitySetting, SerialParams};
pub use tcp::{open_tcp, TcpParams, TcpResource};

use crate::error::AcqError;

/// An open communication channel to a single instrument.
pub trait Session {
    /// Address the session was opened on (port name, host:port, ...).
    fn address(&self) -> &str;

    /// Send one command. The transport appends its write terminator.
    fn write(&mut self, command: &str) -> Result<(), AcqError>;

    /// Read bytes up to `delimiter`. The delimiter itself is consumed but not returned.
    fn read_until(&mut self, delimiter: u8) -> Result<Vec<u8>, AcqError>;

    /// Default delimiter used by [`Session::read_line`] and [`Session::query`].
    fn read_delimiter(&self) -> u8 {
        b'\n'
    }

    fn close(&mut self) -> Result<(), AcqError>;

    fn is_open(&self) -> bool;

    /// Read one delimited reply and decode it as trimmed text.
    fn read_line(&mut self, command: &str) -> Result<String, AcqError> {
        let delimiter = self.read_delimiter();
        let raw = self.read_until(delimiter)?;
        let text = String::from_utf8(raw)
            .map_err(|e| AcqError::malformed(command, format!("non-UTF-8 reply: {e}")))?;
        Ok(text.trim().to_string())
    }

    /// Write `command` and read a single reply line.
    fn query(&mut self, command: &str) -> Result<String, AcqError> {
        self.write(command)?;
        self.read_line(command)
    }
}

impl<S: Session + ?Sized> Session for Box<S> {
    fn address(&self) -> &str {
        (**self).address()
    }

    fn write(&mut self, command: &str) -> Result<(), AcqError> {
        (**self).write(command)
    }

    fn read_until(&mut self, delimiter: u8) -> Result<Vec<u8>, AcqError> {
        (**self).read_until(delimiter)
    }

    fn read_delimiter(&self) -> u8 {
        (**self).read_delimiter()
    }

    fn close(&mut self) -> Result<(), AcqError> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

/// Parse a reply as an integer status code.
pub fn parse_code(command: &str, reply: &str) -> Result<i64, AcqError> {
    let trimmed = reply.trim();
    // Some instruments answer "+1" / "-0"; floats like "1.0" are accepted too
    trimmed
        .parse::<i64>()
        .ok()
        .or_else(|| {
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|v| v.fract() == 0.0 && v.is_finite())
                .map(|v| v as i64)
        })
        .ok_or_else(|| AcqError::malformed(command, reply))
}

/// Parse a reply as a floating point measurement.
pub fn parse_float(command: &str, reply: &str) -> Result<f64, AcqError> {
    reply
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| AcqError::malformed(command, reply))
}

/// Check an acknowledgement code against the expected OK value.
pub fn expect_ack(command: &str, reply: &str, ok_code: i64) -> Result<(), AcqError> {
    let code = parse_code(command, reply)?;
    if code == ok_code {
        Ok(())
    } else {
        Err(AcqError::Rejected {
            command: command.to_string(),
            code,
        })
    }
}
