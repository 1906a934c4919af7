// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rigbridge project

//! Session supervisor.
//!
//! Owns the restart loop: bring the control stream up, wait for either a
//! fatal error or the shutdown signal, tear down, honour the mandatory
//! cool-down, repeat. The radio refuses rapid re-logins, so shortening the
//! cool-down silently loses the next session's audio.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use crossbeam::select;

use crate::config::{Config, COOLDOWN_SECS};
use crate::error::{Error, Result};
use crate::session::audio::AudioIo;
use crate::session::control::ControlStream;
use crate::session::serial::SerialIo;
use crate::session::SessionEvent;
use crate::stats::Stats;

/// Single-slot fatal error notification. Reporting never blocks; while one
/// error is pending, further ones are logged and dropped.
#[derive(Clone)]
pub struct ErrorSlot {
    tx: Sender<Error>,
}

impl ErrorSlot {
    pub fn new() -> (Self, Receiver<Error>) {
        let (tx, rx) = bounded(1);
        (Self { tx }, rx)
    }

    /// Log (unless it is shutdown noise) and notify the supervisor.
    pub fn report(&self, err: Error) {
        if !err.is_shutdown_noise() {
            log::error!("{}", err);
        }
        let _ = self.tx.try_send(err);
    }
}

/// Errors that end the process instead of triggering a restart.
fn is_terminal(err: &Error) -> bool {
    matches!(err, Error::InvalidCredentials | Error::RadioDisconnected)
}

/// Run sessions until the shutdown signal fires or a terminal error occurs.
pub fn run(
    cfg: &Config,
    shutdown: &Receiver<()>,
    events: &Sender<SessionEvent>,
    serial_io: &SerialIo,
    audio_io: &AudioIo,
    stats: &Arc<Stats>,
) -> Result<()> {
    loop {
        let (errors, errors_rx) = ErrorSlot::new();
        log::info!("[supervisor] connecting to {}", cfg.address);

        let handle = match ControlStream::start(
            cfg.clone(),
            errors.clone(),
            events.clone(),
            serial_io.clone(),
            audio_io.clone(),
            Arc::clone(stats),
        ) {
            Ok(handle) => handle,
            Err(err) => {
                if is_terminal(&err) {
                    return Err(err);
                }
                if !err.is_shutdown_noise() {
                    log::error!("{}", err);
                }
                if !cooldown(shutdown) {
                    return Ok(());
                }
                log::info!("[supervisor] restarting control stream");
                continue;
            }
        };

        select! {
            recv(errors_rx) -> err => {
                handle.shutdown();
                if let Ok(err) = err {
                    if is_terminal(&err) {
                        return Err(err);
                    }
                }
                if !cooldown(shutdown) {
                    return Ok(());
                }
                log::info!("[supervisor] restarting control stream");
            },
            recv(shutdown) -> _ => {
                log::info!("[supervisor] shutdown requested");
                handle.shutdown();
                return Ok(());
            }
        }
    }
}

/// Wait out the mandatory idle period; returns false when interrupted by
/// the shutdown signal.
fn cooldown(shutdown: &Receiver<()>) -> bool {
    for sec in (1..=COOLDOWN_SECS).rev() {
        log::info!("[supervisor] waiting {} seconds...", sec);
        match shutdown.recv_timeout(Duration::from_secs(1)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return false,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_slot_is_nonblocking_and_coalesces() {
        let (slot, rx) = ErrorSlot::new();
        slot.report(Error::RequestTimeout);
        // A second report while one is pending must not block or replace.
        slot.report(Error::ReauthTimeout);
        assert!(matches!(rx.try_recv(), Ok(Error::RequestTimeout)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_shutdown_noise_still_notifies() {
        let (slot, rx) = ErrorSlot::new();
        slot.report(Error::Io(io::Error::new(
            io::ErrorKind::NotConnected,
            "closed",
        )));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_terminal_classification() {
        assert!(is_terminal(&Error::InvalidCredentials));
        assert!(is_terminal(&Error::RadioDisconnected));
        assert!(!is_terminal(&Error::RequestTimeout));
        assert!(!is_terminal(&Error::StreamTimeout { stream: "audio" }));
    }

    #[test]
    fn test_cooldown_interrupted_by_shutdown() {
        let (tx, rx) = bounded(1);
        tx.send(()).unwrap();
        assert!(!cooldown(&rx));
    }
}
