//! Error types for the server core.
//!
//! Every variant here is fatal to the process: setup failures and the few
//! steady-state conditions that leave the loop unable to make progress.
//! Per-connection failures are logged and contained in the event loop and
//! never surface as an `Error`.

use std::io;
use std::os::unix::io::RawFd;
use thiserror::Error;

/// Which half of the `fcntl` read-modify-write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOp {
    Get,
    Set,
}

impl std::fmt::Display for FlagOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlagOp::Get => f.write_str("read"),
            FlagOp::Set => f.write_str("write"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to resolve local addresses for port '{port}': {reason}")]
    AddressResolution { port: String, reason: String },

    #[error("failed to create a socket for any resolved address")]
    SocketCreate(#[source] io::Error),

    #[error("failed to bind any resolved address")]
    Bind(#[source] io::Error),

    #[error("failed to {op} status flags of descriptor {fd}")]
    Flag {
        fd: RawFd,
        op: FlagOp,
        #[source]
        source: io::Error,
    },

    #[error("failed to listen on descriptor {fd}")]
    Listen {
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    #[error("failed to create readiness multiplexer")]
    MultiplexerCreate(#[source] io::Error),

    #[error("failed to register descriptor {fd} for readiness")]
    Register {
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    #[error("failed waiting for readiness events")]
    Wait(#[source] io::Error),

    #[error("listening descriptor {fd} reported an error or hangup")]
    ListenerFailed { fd: RawFd },
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_error_names_descriptor_and_operation() {
        let err = Error::Flag {
            fd: 7,
            op: FlagOp::Set,
            source: io::Error::from_raw_os_error(libc::EBADF),
        };
        assert_eq!(err.to_string(), "failed to write status flags of descriptor 7");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_resolution_error_carries_diagnostic() {
        let err = Error::AddressResolution {
            port: "http-nope".to_string(),
            reason: "Servname not supported for ai_socktype".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("http-nope"));
        assert!(msg.contains("Servname not supported"));
    }
}
