// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rigbridge project

//! Keepalive (ping) tracker.
//!
//! Every stream both originates pings and answers the radio's. Our pings
//! carry a rolling 16-bit sequence and a fixed 4-byte identifier; the peer
//! echoes both with the reply flag set. Three of our pings in a row going
//! unanswered is a dead peer.

use std::time::{Duration, Instant};

use crate::config::PING_INTERVAL;
use crate::wire;

/// Consecutive unanswered pings tolerated before the stream is declared dead.
const MAX_UNANSWERED: u32 = 3;

/// The peer stopped answering pings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveTimeout;

/// Per-stream keepalive state.
pub struct Keepalive {
    name: &'static str,
    interval: Duration,
    pings_per_tick: u32,
    send_seq: u16,
    last_confirmed_seq: u16,
    ident: [u8; 4],
    last_send: Option<Instant>,
    awaiting_peer: bool,
    unanswered: u32,
}

impl Keepalive {
    /// The control stream pings twice per period, data streams once.
    pub fn new(name: &'static str, pings_per_tick: u32) -> Self {
        Self {
            name,
            interval: PING_INTERVAL,
            pings_per_tick,
            send_seq: 0,
            last_confirmed_seq: 0,
            ident: wire::ping_ident(),
            last_send: None,
            awaiting_peer: false,
            unanswered: 0,
        }
    }

    /// Handle an inbound ping. A request gets an echo back; a reply to one
    /// of our own pings advances the confirmed sequence. Either direction
    /// proves the peer alive.
    pub fn on_ping(
        &mut self,
        frame: &[u8],
        local_sid: u32,
        remote_sid: u32,
    ) -> Option<[u8; wire::PING_LEN]> {
        let ping = wire::parse_ping(frame)?;
        self.awaiting_peer = false;
        self.unanswered = 0;
        if ping.is_reply {
            if ping.ident == self.ident {
                self.last_confirmed_seq = ping.seq;
            }
            None
        } else {
            Some(wire::ping_reply(&ping, local_sid, remote_sid))
        }
    }

    /// Periodic tick: returns the ping requests due now, or the liveness
    /// verdict once too many went unanswered.
    pub fn tick(
        &mut self,
        local_sid: u32,
        remote_sid: u32,
        now: Instant,
    ) -> Result<Vec<[u8; wire::PING_LEN]>, KeepaliveTimeout> {
        let due = match self.last_send {
            None => true,
            Some(at) => now.duration_since(at) >= self.interval,
        };
        if !due {
            return Ok(Vec::new());
        }

        if self.awaiting_peer {
            self.unanswered += 1;
            if self.unanswered >= MAX_UNANSWERED {
                log::error!("[{}] no ping traffic from peer", self.name);
                return Err(KeepaliveTimeout);
            }
        }
        self.awaiting_peer = true;
        self.last_send = Some(now);

        let mut out = Vec::with_capacity(self.pings_per_tick as usize);
        for _ in 0..self.pings_per_tick {
            out.push(wire::ping_request(
                self.send_seq,
                self.ident,
                local_sid,
                remote_sid,
            ));
            self.send_seq = self.send_seq.wrapping_add(1);
        }
        Ok(out)
    }

    /// Highest of our ping sequences the peer has echoed back.
    pub fn last_confirmed_seq(&self) -> u16 {
        self.last_confirmed_seq
    }

    #[cfg(test)]
    fn ident(&self) -> [u8; 4] {
        self.ident
    }
}
