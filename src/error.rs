use thiserror::Error;

#[derive(Error, Debug)]
pub enum AcqError {
    #[error("Could not open {address}: {reason}{}", list_alternatives(.available))]
    Connection {
        address: String,
        reason: String,
        available: Vec<String>,
    },
    #[error("IO error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },
    #[error("Read timed out")]
    Timeout,
    #[error("Malformed response to {command:?}: {response:?}")]
    MalformedResponse { command: String, response: String },
    #[error("Device rejected {command:?} with code {code}")]
    Rejected { command: String, code: i64 },
    #[error("Session {0} is closed")]
    Closed(String),
    #[error("Cancelled by operator")]
    Cancelled,
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Data error: {0}")]
    Data(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AcqError {
    pub fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        if matches!(
            source.kind(),
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
        ) {
            return AcqError::Timeout;
        }
        AcqError::Io {
            source,
            context: context.into(),
        }
    }

    pub fn malformed(command: &str, response: impl Into<String>) -> Self {
        AcqError::MalformedResponse {
            command: command.to_string(),
            response: response.into(),
        }
    }
}

impl From<std::io::Error> for AcqError {
    fn from(source: std::io::Error) -> Self {
        AcqError::io(source, "I/O failure")
    }
}

fn list_alternatives(available: &[String]) -> String {
    if available.is_empty() {
        String::new()
    } else {
        format!(" (available: {})", available.join(", "))
    }
}
