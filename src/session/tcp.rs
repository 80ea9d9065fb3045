use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::{debug, info, warn};

use super::serial::available_ports;
use super::LineSession;
use crate::error::AcqError;

pub type TcpSession = LineSession<TcpStream>;

/// Default raw SCPI socket port.
pub const SCPI_RAW_PORT: u16 = 5025;

/// Timeouts for a socket instrument.
#[derive(Debug, Clone)]
pub struct TcpParams {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub write_termination: String,
    pub read_delimiter: u8,
}

impl Default for TcpParams {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            write_termination: "\n".to_string(),
            read_delimiter: b'\n',
        }
    }
}

/// Host and port parsed from a VISA-style resource string.
///
/// Accepted forms:
/// - `TCPIP[n]::host::INSTR` (raw SCPI port)
/// - `TCPIP[n]::host::port::SOCKET`
/// - `host:port` or bare `host`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpResource {
    pub host: String,
    pub port: u16,
}

impl TcpResource {
    pub fn parse(resource: &str) -> Result<Self, AcqError> {
        let invalid = |why: &str| AcqError::Config(format!("invalid resource {resource:?}: {why}"));
        let trimmed = resource.trim();

        if trimmed.to_ascii_uppercase().starts_with("TCPIP") {
            let parts: Vec<&str> = trimmed.split("::").collect();
            return match parts.as_slice() {
                [_, host, kind] if kind.eq_ignore_ascii_case("INSTR") => Ok(Self {
                    host: host.to_string(),
                    port: SCPI_RAW_PORT,
                }),
                [_, host, port, kind] if kind.eq_ignore_ascii_case("SOCKET") => Ok(Self {
                    host: host.to_string(),
                    port: port.parse().map_err(|_| invalid("bad port"))?,
                }),
                _ => Err(invalid("expected TCPIP::host::INSTR or TCPIP::host::port::SOCKET")),
            };
        }

        match trimmed.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => Ok(Self {
                host: host.to_string(),
                port: port.parse().map_err(|_| invalid("bad port"))?,
            }),
            Some(_) => Err(invalid("missing host")),
            None if !trimmed.is_empty() => Ok(Self {
                host: trimmed.to_string(),
                port: SCPI_RAW_PORT,
            }),
            None => Err(invalid("empty")),
        }
    }

    fn socket_addrs(&self) -> Result<Vec<SocketAddr>, AcqError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map(|addrs| addrs.collect())
            .map_err(|e| connection_error(&self.to_string(), e.to_string()))
    }
}

impl std::fmt::Display for TcpResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Open a socket session to a SCPI instrument.
pub fn open_tcp(resource: &str, params: &TcpParams) -> Result<TcpSession, AcqError> {
    let target = TcpResource::parse(resource)?;
    debug!("Connecting to {resource} ({target})");

    let mut last_error = String::from("no address resolved");
    for addr in target.socket_addrs()? {
        match TcpStream::connect_timeout(&addr, params.connect_timeout) {
            Ok(stream) => {
                stream.set_read_timeout(Some(params.read_timeout))?;
                stream.set_write_timeout(Some(params.write_timeout))?;
                stream.set_nodelay(true)?;
                info!("Connected to {target}");
                return Ok(LineSession::new(
                    target.to_string(),
                    stream,
                    params.write_termination.clone(),
                    params.read_delimiter,
                ));
            }
            Err(e) => {
                warn!("Failed to connect to {addr}: {e}");
                last_error = e.to_string();
            }
        }
    }

    Err(connection_error(resource, last_error))
}

/// Sockets cannot be enumerated, so the operator is pointed at the local
/// serial instruments instead.
fn connection_error(address: &str, reason: String) -> AcqError {
    AcqError::Connection {
        address: address.to_string(),
        reason,
        available: available_ports(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    #[test]
    fn parses_visa_instr_resource() {
        let r = TcpResource::parse("TCPIP::169.254.254.254::INSTR").unwrap();
        assert_eq!(r.host, "169.254.254.254");
        assert_eq!(r.port, SCPI_RAW_PORT);
    }

    #[test]
    fn parses_socket_and_plain_forms() {
        let r = TcpResource::parse("TCPIP0::10.0.0.2::5555::SOCKET").unwrap();
        assert_eq!((r.host.as_str(), r.port), ("10.0.0.2", 5555));

        let r = TcpResource::parse("scope.lab:5025").unwrap();
        assert_eq!((r.host.as_str(), r.port), ("scope.lab", 5025));

        assert!(TcpResource::parse("TCPIP::host").is_err());
        assert!(TcpResource::parse(":5025").is_err());
        assert!(TcpResource::parse("").is_err());
    }

    #[test]
    fn refused_connection_lists_alternatives() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let err = open_tcp(&format!("127.0.0.1:{port}"), &TcpParams::default())
            .err()
            .unwrap();
        match err {
            AcqError::Connection {
                address, available, ..
            } => {
                assert_eq!(address, format!("127.0.0.1:{port}"));
                assert_eq!(available, available_ports());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn queries_a_local_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let mut stream = stream;
            if line == "*IDN?\n" {
                stream.write_all(b"KEYSIGHT,DSOX,0,1.0\n").unwrap();
            }
        });

        let mut session = open_tcp(&format!("127.0.0.1:{port}"), &TcpParams::default()).unwrap();
        assert_eq!(session.query("*IDN?").unwrap(), "KEYSIGHT,DSOX,0,1.0");
        session.close().unwrap();
        server.join().unwrap();
    }
}
