// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rigbridge project

//! Audio stream.
//!
//! Downlink PCM passes through a 100 ms reorder window; measured loss is
//! reported but never blocks delivery. Uplink PCM arrives from the local
//! source in 1920-byte ticks and leaves as two datagrams, 1364 + 556
//! payload bytes, with consecutive sequences. Three seconds without any
//! audio from the radio is fatal.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::{bounded, never, tick, Receiver, Sender};
use crossbeam::select;

use crate::config::{
    Config, AUDIO_PART1_BYTES, AUDIO_RX_WINDOW, PCM_TICK_BYTES, STREAM_TIMEOUT, TICK_INTERVAL,
};
use crate::error::{Error, Result};
use crate::reliability::{SeqBuf, SeqBufEntry};
use crate::session::{StreamCore, StreamHandle};
use crate::stats::Stats;
use crate::supervisor::ErrorSlot;
use crate::transport::Inbound;
use crate::wire;

/// Local endpoints of the audio stream: `play` feeds the local renderer,
/// `rec` carries captured PCM towards the radio. Both survive restarts.
#[derive(Clone)]
pub struct AudioIo {
    pub play: Sender<Vec<u8>>,
    pub rec: Receiver<Vec<u8>>,
}

/// Audio stream state.
pub struct AudioStream {
    core: StreamCore,
    rx_buf: SeqBuf,
    send_seq: u16,
    received: bool,
    last_delivered_seq: u16,
    last_heard: Instant,
    watchdog_fired: bool,
    io: AudioIo,
    errors: ErrorSlot,
    stats: Arc<Stats>,
}

impl AudioStream {
    /// Open, handshake, and hand the stream over to its event loop.
    pub fn start(
        cfg: &Config,
        io: AudioIo,
        errors: ErrorSlot,
        stats: Arc<Stats>,
    ) -> Result<StreamHandle> {
        log::debug!("[audio] init");
        let mut core = StreamCore::open("audio", &cfg.address, cfg.audio_port, cfg.local_port, 1)?;
        core.handshake()?;
        core.start_keepalive();
        log::info!("[audio] stream started");

        let stream = Self {
            core,
            rx_buf: SeqBuf::new("audio", AUDIO_RX_WINDOW, 0xffff, 0),
            // The first uplink datagram carries sequence 1.
            send_seq: 1,
            received: false,
            last_delivered_seq: 0,
            last_heard: Instant::now(),
            watchdog_fired: false,
            io,
            errors,
            stats,
        };

        let (deinit_tx, deinit_rx) = bounded(1);
        let (done_tx, done_rx) = bounded(1);
        let join = std::thread::Builder::new()
            .name("rig-audio".to_string())
            .spawn(move || stream.run(&deinit_rx, &done_tx))
            .map_err(Error::Io)?;
        Ok(StreamHandle::new(deinit_tx, done_rx, join))
    }

    fn run(mut self, deinit_rx: &Receiver<()>, done_tx: &Sender<()>) {
        let mut inbound = self.core.endpoint.inbound().clone();
        let mut rec = self.io.rec.clone();
        let ticker = tick(TICK_INTERVAL);
        loop {
            let mut inbound_gone = false;
            let mut rec_gone = false;
            select! {
                recv(inbound) -> msg => match msg {
                    Ok(Inbound::Ping(ping)) => {
                        if let Err(err) = self.core.handle_ping(&ping) {
                            self.errors.report(err);
                        }
                    }
                    Ok(Inbound::Frame(frame)) => {
                        if let Err(err) = self.handle_frame(&frame) {
                            self.errors.report(err);
                        }
                    }
                    Ok(Inbound::Failed(err)) => self.errors.report(err.into()),
                    Err(_) => inbound_gone = true,
                },
                recv(ticker) -> _ => {
                    if let Err(err) = self.on_tick(Instant::now()) {
                        self.errors.report(err);
                    }
                },
                recv(rec) -> msg => match msg {
                    Ok(pcm) => {
                        if let Err(err) = self.send_pcm_tick(&pcm) {
                            self.errors.report(err);
                        }
                    }
                    Err(_) => rec_gone = true,
                },
                recv(deinit_rx) -> _ => {
                    self.core.send_disconnect();
                    let _ = done_tx.send(());
                    return;
                }
            }
            if inbound_gone {
                inbound = never();
            }
            if rec_gone {
                rec = never();
            }
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) -> Result<()> {
        let now = Instant::now();
        if let Some(parsed) = wire::parse_audio(frame) {
            self.last_heard = now;
            self.watchdog_fired = false;
            self.stats.audio_frames_down.fetch_add(1, Ordering::Relaxed);
            if let Some((from, to)) = self.rx_buf.add(parsed.seq, parsed.payload.to_vec(), now) {
                self.core.send_retransmit_request(from, to)?;
                self.stats
                    .audio_retransmit_requests
                    .fetch_add(1, Ordering::Relaxed);
            }
        } else if wire::parse_retransmit_request(frame).is_some() {
            // Uplink PCM is not retained; a lost tick is not worth replaying.
            log::debug!("[audio] ignoring retransmit request");
        }
        Ok(())
    }

    fn on_tick(&mut self, now: Instant) -> Result<()> {
        self.core.keepalive_tick(now)?;
        for entry in self.rx_buf.flush(now) {
            self.deliver(entry);
        }
        if !self.watchdog_fired && now.duration_since(self.last_heard) >= STREAM_TIMEOUT {
            self.watchdog_fired = true;
            return Err(Error::StreamTimeout { stream: "audio" });
        }
        Ok(())
    }

    fn deliver(&mut self, entry: SeqBufEntry) {
        if self.received {
            let expected = self.last_delivered_seq.wrapping_add(1);
            if entry.seq != expected {
                let missing = super::missing_between(expected, entry.seq);
                log::error!("[audio] lost {} packets", missing);
                self.stats
                    .audio_packets_lost
                    .fetch_add(u64::from(missing), Ordering::Relaxed);
            }
        }
        self.last_delivered_seq = entry.seq;
        self.received = true;
        let _ = self.io.play.send(entry.data);
    }

    /// Emit one PCM tick as its two datagrams. The sequence advances once
    /// per part, so by two per tick.
    fn send_pcm_tick(&mut self, pcm: &[u8]) -> Result<()> {
        if pcm.len() != PCM_TICK_BYTES {
            log::warn!("[audio] dropping odd-sized pcm chunk of {} bytes", pcm.len());
            return Ok(());
        }
        let part1 = wire::audio_data(
            wire::AUDIO_PART1_TAG,
            self.send_seq,
            self.core.local_sid,
            self.core.remote_sid,
            &pcm[..AUDIO_PART1_BYTES],
        );
        self.core.send(&part1)?;
        self.send_seq = self.send_seq.wrapping_add(1);

        let part2 = wire::audio_data(
            wire::AUDIO_PART2_TAG,
            self.send_seq,
            self.core.local_sid,
            self.core.remote_sid,
            &pcm[AUDIO_PART1_BYTES..],
        );
        self.core.send(&part2)?;
        self.send_seq = self.send_seq.wrapping_add(1);

        self.stats.audio_frames_up.fetch_add(2, Ordering::Relaxed);
        Ok(())
    }
}
