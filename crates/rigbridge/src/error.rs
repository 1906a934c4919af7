// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rigbridge project

//! Crate-wide error type.
//!
//! Fatal stream errors all funnel through this enum so the supervisor can
//! tear the session down and schedule a restart. The user-visible strings
//! are part of the program's contract and must not be reworded.

use std::fmt;
use std::io;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal session error.
#[derive(Debug)]
pub enum Error {
    /// Underlying socket failure (send, or a read error other than timeout).
    Io(io::Error),
    /// No matching frame arrived within the expect window during bring-up.
    ExpectTimeout { stream: &'static str },
    /// The radio rejected the login credentials.
    InvalidCredentials,
    /// The radio reported an auth failure. `opened` tells whether the
    /// serial and audio streams were already up.
    AuthFailed { opened: bool },
    /// The radio asked us to disconnect.
    RadioDisconnected,
    /// No traffic on a data stream within the watchdog window.
    StreamTimeout { stream: &'static str },
    /// The peer stopped answering keepalive pings.
    KeepaliveTimeout { stream: &'static str },
    /// The serial+audio request was not answered in time.
    RequestTimeout,
    /// A periodic reauth went unacknowledged (only fatal when configured).
    ReauthTimeout,
}

impl Error {
    /// True for errors that are a self-inflicted consequence of an orderly
    /// shutdown (reads racing the socket close). The supervisor does not
    /// log these.
    pub fn is_shutdown_noise(&self) -> bool {
        match self {
            Error::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::NotConnected
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
            ),
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "{}", err),
            Error::ExpectTimeout { stream } => write!(f, "{}/expect timeout", stream),
            Error::InvalidCredentials => write!(f, "invalid user/password"),
            Error::AuthFailed { opened: false } => {
                write!(f, "auth failed, try rebooting the radio")
            }
            Error::AuthFailed { opened: true } => write!(f, "auth failed"),
            Error::RadioDisconnected => write!(f, "got radio disconnected"),
            Error::StreamTimeout { stream } => {
                write!(f, "{} stream timeout, try rebooting the radio", stream)
            }
            Error::KeepaliveTimeout { stream } => write!(f, "{}/keepalive timeout", stream),
            Error::RequestTimeout => write!(f, "serial and audio stream request timeout"),
            Error::ReauthTimeout => write!(f, "auth timeout"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}
