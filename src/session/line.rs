use std::io::{BufRead, BufReader, Read, Write};

use log::{debug, trace};

use super::Session;
use crate::error::AcqError;

/// Session over any byte stream that speaks delimited ASCII lines.
///
/// Serial ports and raw SCPI sockets both end up here; the transport modules
/// only differ in how the stream is opened.
pub struct LineSession<T: Read + Write> {
    address: String,
    stream: Option<BufReader<T>>,
    write_termination: String,
    read_delimiter: u8,
}

impl<T: Read + Write> LineSession<T> {
    pub fn new(
        address: impl Into<String>,
        stream: T,
        write_termination: impl Into<String>,
        read_delimiter: u8,
    ) -> Self {
        Self {
            address: address.into(),
            stream: Some(BufReader::new(stream)),
            write_termination: write_termination.into(),
            read_delimiter,
        }
    }

    /// Access the underlying stream, e.g. to query modem lines on a serial port.
    pub fn get_ref(&self) -> Option<&T> {
        self.stream.as_ref().map(|s| s.get_ref())
    }

    fn stream_mut(&mut self) -> Result<&mut BufReader<T>, AcqError> {
        match self.stream.as_mut() {
            Some(stream) => Ok(stream),
            None => Err(AcqError::Closed(self.address.clone())),
        }
    }
}

impl<T: Read + Write> Session for LineSession<T> {
    fn address(&self) -> &str {
        &self.address
    }

    fn write(&mut self, command: &str) -> Result<(), AcqError> {
        let payload = format!("{command}{}", self.write_termination);
        let address = self.address.clone();
        let stream = self.stream_mut()?.get_mut();
        stream
            .write_all(payload.as_bytes())
            .and_then(|_| stream.flush())
            .map_err(|e| AcqError::io(e, format!("Failed to write {command:?} to {address}")))?;
        trace!("{address} <- {command:?}");
        Ok(())
    }

    fn read_until(&mut self, delimiter: u8) -> Result<Vec<u8>, AcqError> {
        let address = self.address.clone();
        let mut buf = Vec::new();
        let read = self
            .stream_mut()?
            .read_until(delimiter, &mut buf)
            .map_err(|e| AcqError::io(e, format!("Failed to read from {address}")))?;

        if read == 0 || buf.last() != Some(&delimiter) {
            return Err(AcqError::malformed(
                "<read>",
                format!(
                    "connection ended before delimiter: {:?}",
                    String::from_utf8_lossy(&buf)
                ),
            ));
        }
        buf.pop();
        trace!("{address} -> {:?}", String::from_utf8_lossy(&buf));
        Ok(buf)
    }

    fn read_delimiter(&self) -> u8 {
        self.read_delimiter
    }

    fn close(&mut self) -> Result<(), AcqError> {
        if let Some(mut stream) = self.stream.take() {
            // Flush errors on close are ignored
            let _ = stream.get_mut().flush();
            debug!("Closed session {}", self.address);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}
