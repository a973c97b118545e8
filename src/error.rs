//! Error types surfaced by the server core.
//!
//! Protocol violations never show up here: they are answered on the wire
//! and only affect the offending connection. These types cover listener
//! lifecycle failures, registry misuse and routing misses.

use std::io;
use std::net::SocketAddr;

/// Errors from the command registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// No handler is bound to the token.
    UnknownCommand(String),
    /// The binding can never be dispatched (empty or whitespace token).
    InvalidHandler(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownCommand(token) => write!(f, "Unknown command: {token}"),
            Self::InvalidHandler(token) => {
                write!(f, "Invalid handler binding for token {token:?}")
            }
        }
    }
}

impl std::error::Error for CommandError {}

/// Errors from the server's public API.
#[derive(Debug)]
pub enum ServerError {
    /// Binding was refused by the OS (privileged port or bad address).
    ///
    /// Unrecoverable: the binary exits non-zero when it sees this.
    PermissionDenied(SocketAddr),
    /// Any other bind failure, propagated unchanged.
    Bind(SocketAddr, io::Error),
    /// The configured ip could not be parsed into an address.
    InvalidAddress(String),
    /// A pending start was cancelled by `stop` or `change_endpoint`.
    Cancelled,
    /// `send` found no session for the given id.
    UnknownRecipient(String),
    /// Registry misuse.
    Command(CommandError),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionDenied(addr) => write!(f, "Permission denied binding {addr}"),
            Self::Bind(addr, e) => write!(f, "Failed to bind {addr}: {e}"),
            Self::InvalidAddress(ip) => write!(f, "Invalid listen address: {ip}"),
            Self::Cancelled => write!(f, "Start cancelled"),
            Self::UnknownRecipient(id) => write!(f, "No client registered as {id}"),
            Self::Command(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bind(_, e) => Some(e),
            Self::Command(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CommandError> for ServerError {
    fn from(e: CommandError) -> Self {
        Self::Command(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_exposes_source() {
        let addr: SocketAddr = "127.0.0.1:80".parse().unwrap();
        let err = ServerError::Bind(addr, io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("127.0.0.1:80"));
    }

    #[test]
    fn test_command_error_converts() {
        let err: ServerError = CommandError::UnknownCommand("XX".into()).into();
        assert_eq!(err.to_string(), "Unknown command: XX");
    }
}
