use serde::Serialize;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelErrorKind {
    /// Key generation, credential generation or socket bind failed.
    Setup,
    /// The connection never got past handshake/authentication.
    Handshake,
    /// The peer hung up. Only a failure if it happens before authentication.
    Disconnected,
    /// A channel request carried a payload that could not be decoded.
    Parse,
    Executor,
    InvalidConfig,
    Cancelled,
    Internal,
}

#[derive(Debug, Clone, Serialize)]
pub struct TunnelError {
    pub kind: TunnelErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl TunnelError {
    pub fn new(kind: TunnelErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn setup(message: impl Into<String>) -> Self {
        Self::new(TunnelErrorKind::Setup, "SETUP", message)
    }

    pub fn handshake(message: impl Into<String>) -> Self {
        Self::new(TunnelErrorKind::Handshake, "HANDSHAKE", message)
    }

    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::new(TunnelErrorKind::Disconnected, "DISCONNECTED", message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(TunnelErrorKind::Parse, "PARSE", message)
    }

    pub fn executor(message: impl Into<String>) -> Self {
        Self::new(TunnelErrorKind::Executor, "EXECUTOR", message)
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(TunnelErrorKind::InvalidConfig, "INVALID_CONFIG", message)
    }

    /// Joins every collected problem into one error so callers see them all at once.
    pub fn invalid_config_all(problems: &[String]) -> Self {
        let message = if problems.len() == 1 {
            problems[0].clone()
        } else {
            let mut lines = vec![format!("{} errors occurred:", problems.len())];
            lines.extend(problems.iter().map(|problem| format!("* {}", problem)));
            lines.join("\n")
        };
        Self::invalid_config(message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(TunnelErrorKind::Cancelled, "CANCELLED", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(TunnelErrorKind::Internal, "INTERNAL", message)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == TunnelErrorKind::Cancelled
    }

    /// Re-labels the error while keeping the original message as the cause.
    pub fn context(self, prefix: &str) -> Self {
        Self {
            message: format!("{}: {}", prefix, self.message),
            ..self
        }
    }
}

impl fmt::Display for TunnelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, " (hint: {})", hint)?;
        }
        Ok(())
    }
}

impl Error for TunnelError {}

impl From<std::io::Error> for TunnelError {
    fn from(err: std::io::Error) -> Self {
        TunnelError::internal(err.to_string())
    }
}

impl From<russh::Error> for TunnelError {
    fn from(err: russh::Error) -> Self {
        use std::io::ErrorKind;
        match &err {
            russh::Error::SshEncoding(_) | russh::Error::Utf8(_) | russh::Error::IndexOutOfBounds => {
                TunnelError::parse(format!("malformed request payload: {}", err))
            }
            russh::Error::Disconnect | russh::Error::HUP => TunnelError::disconnected(err.to_string()),
            russh::Error::IO(io)
                if matches!(
                    io.kind(),
                    ErrorKind::UnexpectedEof
                        | ErrorKind::ConnectionReset
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::BrokenPipe
                ) =>
            {
                TunnelError::disconnected(err.to_string())
            }
            _ => TunnelError::handshake(err.to_string()),
        }
    }
}
