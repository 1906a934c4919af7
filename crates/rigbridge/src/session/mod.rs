// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rigbridge project

//! Stream sessions.
//!
//! The control, serial and audio streams share one substrate: a datagram
//! endpoint, the probe/idle handshake, the keepalive tracker, and the
//! expect-style bring-up primitive. Each stream then runs its own event
//! loop on a dedicated thread, multiplexing the inbound queue, a coarse
//! tick, local I/O channels and the deinit signal.

pub mod audio;
pub mod control;
pub mod serial;

use std::io;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::{EXPECT_TIMEOUT, HANDSHAKE_MAX_RETRIES, TAKEOVER_LINGER, TAKEOVER_PROBE_WINDOW, TICK_INTERVAL};
use crate::error::{Error, Result};
use crate::keepalive::{Keepalive, KeepaliveTimeout};
use crate::transport::{Inbound, UdpEndpoint};
use crate::wire;
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};

/// Lifecycle notifications for the embedding process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The radio granted the serial and audio streams.
    Up { device_name: String },
    /// The session is going down (orderly or after a fatal error).
    Down,
}

/// Running stream loop. Shutdown is cooperative: signal, await the ack,
/// then join the thread.
pub struct StreamHandle {
    deinit_tx: Sender<()>,
    done_rx: Receiver<()>,
    join: Option<JoinHandle<()>>,
}

impl StreamHandle {
    pub(crate) fn new(deinit_tx: Sender<()>, done_rx: Receiver<()>, join: JoinHandle<()>) -> Self {
        Self {
            deinit_tx,
            done_rx,
            join: Some(join),
        }
    }

    /// Ask the loop to deinitialise and wait for it to finish.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = self.deinit_tx.send(());
            let _ = self.done_rx.recv_timeout(Duration::from_secs(5));
            let _ = join.join();
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

/// Shared per-stream state: endpoint, session IDs, keepalive.
pub struct StreamCore {
    pub name: &'static str,
    pub endpoint: UdpEndpoint,
    pub local_sid: u32,
    pub remote_sid: u32,
    pub got_remote_sid: bool,
    keepalive: Keepalive,
    keepalive_started: bool,
}

impl StreamCore {
    /// Open the endpoint and probe for a session that is already running on
    /// the radio. An unsolicited ping inside the probe window means a stale
    /// session owns our port pair: disconnect it, wait, and reopen with
    /// fresh state.
    pub fn open(
        name: &'static str,
        host: &str,
        remote_port: u16,
        local_port: Option<u16>,
        pings_per_tick: u32,
    ) -> Result<Self> {
        for _ in 0..3 {
            let endpoint = UdpEndpoint::open(name, host, remote_port, local_port)?;
            let local_sid = endpoint.local_sid();
            let mut core = Self {
                name,
                endpoint,
                local_sid,
                remote_sid: 0,
                got_remote_sid: false,
                keepalive: Keepalive::new(name, pings_per_tick),
                keepalive_started: false,
            };
            match core.unsolicited_ping(TAKEOVER_PROBE_WINDOW)? {
                None => return Ok(core),
                Some(ping) => {
                    core.remote_sid = wire::read_sid(&ping[8..12]);
                    core.got_remote_sid = true;
                    log::info!("[{}] closing running stream", name);
                    core.send_disconnect();
                    std::thread::sleep(TAKEOVER_LINGER);
                    // Drop the endpoint and start over with a fresh socket.
                }
            }
        }
        Err(Error::Io(io::Error::new(
            io::ErrorKind::Other,
            "running stream would not disconnect",
        )))
    }

    /// Wait for an unsolicited keepalive ping during the takeover probe.
    fn unsolicited_ping(&mut self, window: Duration) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.endpoint.inbound().recv_timeout(remaining) {
                Ok(Inbound::Ping(ping)) => return Ok(Some(ping)),
                Ok(Inbound::Frame(_)) => continue,
                Ok(Inbound::Failed(err)) => return Err(err.into()),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(reader_gone()),
            }
        }
    }

    /// Probe/idle handshake: pkt3 (re-sent on expect timeout), learn the
    /// remote session ID from the pkt4 reply, then pkt6 and its echo.
    pub fn handshake(&mut self) -> Result<()> {
        let mut attempt = 0;
        let reply = loop {
            self.send(&wire::probe(self.local_sid, self.remote_sid))?;
            match self.expect(16, &wire::PROBE_REPLY_HEAD) {
                Ok(reply) => break reply,
                Err(Error::ExpectTimeout { .. }) if attempt + 1 < HANDSHAKE_MAX_RETRIES => {
                    attempt += 1;
                    log::debug!("[{}] probe unanswered, retrying", self.name);
                }
                Err(err) => return Err(err),
            }
        };
        self.remote_sid = wire::read_sid(&reply[8..12]);
        self.got_remote_sid = true;
        log::debug!(
            "[{}] got remote session id {:08x}",
            self.name,
            self.remote_sid
        );

        self.send(&wire::idle(self.local_sid, self.remote_sid))?;
        self.expect(16, &wire::IDLE_REPLY_HEAD)?;
        Ok(())
    }

    /// Begin originating keepalive pings on subsequent ticks.
    pub fn start_keepalive(&mut self) {
        self.keepalive_started = true;
    }

    /// Wait up to the expect window for a frame of exactly `len` bytes
    /// starting with `head`. Pings are serviced, everything else within the
    /// window is discarded.
    pub fn expect(&mut self, len: usize, head: &[u8]) -> Result<Vec<u8>> {
        let deadline = Instant::now() + EXPECT_TIMEOUT;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::ExpectTimeout { stream: self.name });
            }
            self.keepalive_tick(now)?;
            let wait = TICK_INTERVAL.min(deadline.saturating_duration_since(now));
            match self.endpoint.inbound().recv_timeout(wait) {
                Ok(Inbound::Ping(ping)) => self.handle_ping(&ping)?,
                Ok(Inbound::Frame(frame)) => {
                    if frame.len() == len && frame.len() >= head.len() && frame[..head.len()] == *head
                    {
                        return Ok(frame);
                    }
                }
                Ok(Inbound::Failed(err)) => return Err(err.into()),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(reader_gone()),
            }
        }
    }

    /// Service one inbound keepalive ping.
    pub fn handle_ping(&mut self, frame: &[u8]) -> Result<()> {
        if let Some(reply) = self
            .keepalive
            .on_ping(frame, self.local_sid, self.remote_sid)
        {
            self.send(&reply)?;
        }
        Ok(())
    }

    /// Originate due pings and check peer liveness.
    pub fn keepalive_tick(&mut self, now: Instant) -> Result<()> {
        if !self.keepalive_started {
            return Ok(());
        }
        match self.keepalive.tick(self.local_sid, self.remote_sid, now) {
            Ok(frames) => {
                for frame in frames {
                    self.send(&frame)?;
                }
                Ok(())
            }
            Err(KeepaliveTimeout) => Err(Error::KeepaliveTimeout { stream: self.name }),
        }
    }

    /// Send one frame; failures are fatal to the stream.
    pub fn send(&self, frame: &[u8]) -> Result<()> {
        self.endpoint.send(frame).map_err(Error::from)
    }

    /// Request a retransmit for one missing inclusive range. Sent twice so
    /// the request itself survives a drop.
    pub fn send_retransmit_request(&self, from: u16, to: u16) -> Result<()> {
        if from == to {
            let frame = wire::retransmit_single(from, self.local_sid, self.remote_sid);
            self.send(&frame)?;
            self.send(&frame)
        } else {
            let frame = wire::retransmit_ranges(&[(from, to)], self.local_sid, self.remote_sid);
            self.send(&frame)?;
            self.send(&frame)
        }
    }

    /// Best-effort disconnect; only meaningful once the remote ID is known.
    pub fn send_disconnect(&self) {
        if !self.got_remote_sid {
            return;
        }
        let _ = self
            .endpoint
            .send(&wire::disconnect(self.local_sid, self.remote_sid));
    }
}

fn reader_gone() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        "reader thread gone",
    ))
}

/// Packets lost between the expected and the actually delivered sequence,
/// in 16-bit wrap arithmetic.
pub(crate) fn missing_between(expected: u16, got: u16) -> u16 {
    got.wrapping_sub(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_between_plain() {
        assert_eq!(missing_between(5, 5), 0);
        assert_eq!(missing_between(5, 8), 3);
    }

    #[test]
    fn test_missing_between_across_wrap() {
        // In-order delivery of 0xfffe makes 0xffff the expected sequence;
        // receiving 0x0000 means exactly one packet was lost.
        assert_eq!(missing_between(0xffff, 0x0000), 1);
        assert_eq!(missing_between(0xfffe, 0x0001), 3);
    }
}
