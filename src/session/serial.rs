use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serialport::SerialPort;

use super::LineSession;
use crate::error::AcqError;

pub type SerialSession = LineSession<Box<dyn SerialPort>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParitySetting {
    #[default]
    None,
    Odd,
    Even,
}

impl From<ParitySetting> for serialport::Parity {
    fn from(p: ParitySetting) -> Self {
        match p {
            ParitySetting::None => serialport::Parity::None,
            ParitySetting::Odd => serialport::Parity::Odd,
            ParitySetting::Even => serialport::Parity::Even,
        }
    }
}

/// Line settings for a serial instrument.
#[derive(Debug, Clone)]
pub struct SerialParams {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: ParitySetting,
    pub stop_bits: u8,
    pub timeout: Duration,
    pub write_termination: String,
    pub read_delimiter: u8,
}

impl Default for SerialParams {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: 8,
            parity: ParitySetting::None,
            stop_bits: 1,
            timeout: Duration::from_secs(1),
            write_termination: "\r\n".to_string(),
            read_delimiter: b'\n',
        }
    }
}

impl SerialParams {
    pub fn data_bits(&self) -> Result<serialport::DataBits, AcqError> {
        match self.data_bits {
            5 => Ok(serialport::DataBits::Five),
            6 => Ok(serialport::DataBits::Six),
            7 => Ok(serialport::DataBits::Seven),
            8 => Ok(serialport::DataBits::Eight),
            other => Err(AcqError::Config(format!("unsupported data bits: {other}"))),
        }
    }

    pub fn stop_bits(&self) -> Result<serialport::StopBits, AcqError> {
        match self.stop_bits {
            1 => Ok(serialport::StopBits::One),
            2 => Ok(serialport::StopBits::Two),
            other => Err(AcqError::Config(format!("unsupported stop bits: {other}"))),
        }
    }
}

/// Names of the serial ports the OS currently reports.
pub fn available_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            warn!("Could not enumerate serial ports: {e}");
            Vec::new()
        }
    }
}

/// Open a serial instrument session.
///
/// On failure the error carries the list of ports that are present, so the
/// operator can pick another one.
pub fn open_serial(port: &str, params: &SerialParams) -> Result<SerialSession, AcqError> {
    let stream = serialport::new(port, params.baud_rate)
        .data_bits(params.data_bits()?)
        .parity(params.parity.into())
        .stop_bits(params.stop_bits()?)
        .flow_control(serialport::FlowControl::None)
        .timeout(params.timeout)
        .open()
        .map_err(|e| AcqError::Connection {
            address: port.to_string(),
            reason: e.to_string(),
            available: available_ports(),
        })?;

    info!("Connected via {port} at {} baud", params.baud_rate);

    let mut stream = stream;
    match stream.read_clear_to_send() {
        Ok(true) => {}
        Ok(false) => {
            warn!("CTS is low on {port}: writing might be disabled");
            warn!("Other ports: {:?}", available_ports());
        }
        Err(e) => warn!("Could not read CTS on {port}: {e}"),
    }

    Ok(LineSession::new(
        port,
        stream,
        params.write_termination.clone(),
        params.read_delimiter,
    ))
}
