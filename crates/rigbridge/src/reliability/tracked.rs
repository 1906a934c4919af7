// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rigbridge project

//! Tracked-send channel: the reliable layer under the auth-bearing control
//! frames.
//!
//! Every tracked frame is stamped with an inner sequence at bytes [6:8],
//! retained for a bounded duration, re-sent at a slow cadence against
//! silent drops, and re-sent on demand when the peer requests specific
//! inner sequences.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::{TRACKED_RESEND_INTERVAL, TRACKED_RETENTION};
use crate::wire::RetransmitRequest;

struct Retained {
    seq: u16,
    frame: Vec<u8>,
    sent_at: Instant,
    last_resend: Instant,
}

/// Writer-side retention window keyed by inner sequence.
pub struct TrackedSender {
    name: &'static str,
    next_seq: u16,
    retention: Duration,
    resend_interval: Duration,
    window: VecDeque<Retained>,
}

impl TrackedSender {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_seq: 0,
            retention: TRACKED_RETENTION,
            resend_interval: TRACKED_RESEND_INTERVAL,
            window: VecDeque::new(),
        }
    }

    /// Stamp the frame with the next inner sequence, retain a copy, and
    /// return the frame ready for transmission.
    pub fn prepare(&mut self, mut frame: Vec<u8>, now: Instant) -> Vec<u8> {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        frame[6..8].copy_from_slice(&seq.to_le_bytes());
        self.window.push_back(Retained {
            seq,
            frame: frame.clone(),
            sent_at: now,
            last_resend: now,
        });
        frame
    }

    /// Periodic tick: prune frames past retention and return the ones due
    /// for an unsolicited resend.
    pub fn tick(&mut self, now: Instant) -> Vec<Vec<u8>> {
        let retention = self.retention;
        self.window
            .retain(|r| now.duration_since(r.sent_at) < retention);

        let mut due = Vec::new();
        for retained in &mut self.window {
            if now.duration_since(retained.last_resend) >= self.resend_interval {
                retained.last_resend = now;
                due.push(retained.frame.clone());
            }
        }
        due
    }

    /// Answer a peer retransmit demand with every requested frame still in
    /// the window. Unknown sequences are logged and ignored.
    pub fn retransmit(&mut self, request: &RetransmitRequest, now: Instant) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        match request {
            RetransmitRequest::Single(seq) => {
                if let Some(retained) = self.window.iter_mut().find(|r| r.seq == *seq) {
                    retained.last_resend = now;
                    out.push(retained.frame.clone());
                } else {
                    log::debug!("[{}] retransmit request for unknown seq {}", self.name, seq);
                }
            }
            RetransmitRequest::Ranges(ranges) => {
                for &(from, to) in ranges {
                    let span = to.wrapping_sub(from);
                    for retained in &mut self.window {
                        if retained.seq.wrapping_sub(from) <= span {
                            retained.last_resend = now;
                            out.push(retained.frame.clone());
                        }
                    }
                }
                if out.is_empty() {
                    log::debug!(
                        "[{}] retransmit request matched nothing: {:?}",
                        self.name,
                        ranges
                    );
                }
            }
        }
        out
    }

    /// The inner sequence the next tracked frame will carry.
    pub fn next_seq(&self) -> u16 {
        self.next_seq
    }

    #[cfg(test)]
    fn set_next_seq(&mut self, seq: u16) {
        self.next_seq = seq;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Vec<u8> {
        vec![0u8; 64]
    }

    #[test]
    fn test_prepare_stamps_inner_seq() {
        let now = Instant::now();
        let mut t = TrackedSender::new("test");
        let first = t.prepare(frame(), now);
        let second = t.prepare(frame(), now);
        assert_eq!(&first[6..8], &[0x00, 0x00]);
        assert_eq!(&second[6..8], &[0x01, 0x00]);
        assert_eq!(t.next_seq(), 2);
    }

    #[test]
    fn test_inner_seq_wraps() {
        let now = Instant::now();
        let mut t = TrackedSender::new("test");
        t.set_next_seq(0xffff);
        let a = t.prepare(frame(), now);
        let b = t.prepare(frame(), now);
        assert_eq!(&a[6..8], &[0xff, 0xff]);
        assert_eq!(&b[6..8], &[0x00, 0x00]);
    }

    #[test]
    fn test_retransmit_single() {
        let now = Instant::now();
        let mut t = TrackedSender::new("test");
        let sent = t.prepare(frame(), now);
        let again = t.retransmit(&RetransmitRequest::Single(0), now);
        assert_eq!(again, vec![sent]);
        assert!(t.retransmit(&RetransmitRequest::Single(9), now).is_empty());
    }

    #[test]
    fn test_retransmit_range_spans_wrap() {
        let now = Instant::now();
        let mut t = TrackedSender::new("test");
        t.set_next_seq(0xfffe);
        for _ in 0..4 {
            t.prepare(frame(), now);
        }
        let hits = t.retransmit(&RetransmitRequest::Ranges(vec![(0xffff, 0x0000)]), now);
        assert_eq!(hits.len(), 2);
        assert_eq!(&hits[0][6..8], &[0xff, 0xff]);
        assert_eq!(&hits[1][6..8], &[0x00, 0x00]);
    }

    #[test]
    fn test_tick_resends_at_slow_cadence() {
        let start = Instant::now();
        let mut t = TrackedSender::new("test");
        t.prepare(frame(), start);
        assert!(t.tick(start).is_empty());

        let later = start + TRACKED_RESEND_INTERVAL;
        assert_eq!(t.tick(later).len(), 1);
        // Not due again immediately after a resend.
        assert!(t.tick(later).is_empty());
    }

    #[test]
    fn test_tick_prunes_expired_frames() {
        let start = Instant::now();
        let mut t = TrackedSender::new("test");
        t.prepare(frame(), start);
        let past_retention = start + TRACKED_RETENTION;
        assert!(t.tick(past_retention).is_empty());
        assert!(t
            .retransmit(&RetransmitRequest::Single(0), past_retention)
            .is_empty());
    }
}
