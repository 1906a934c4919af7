// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rigbridge project

//! Serial (CI-V) stream.
//!
//! Auth is inherited from the control stream, so bring-up is only the
//! abbreviated probe/idle handshake. Downlink bytes pass through a short
//! reorder window before reaching the local sinks; uplink bytes are framed
//! with an incrementing sequence. Three seconds without downlink traffic is
//! fatal.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::{bounded, never, tick, Receiver, Sender};
use crossbeam::select;

use crate::config::{Config, SERIAL_RX_WINDOW, STREAM_TIMEOUT, TICK_INTERVAL};
use crate::error::{Error, Result};
use crate::reliability::{SeqBuf, SeqBufEntry};
use crate::session::{StreamCore, StreamHandle};
use crate::stats::Stats;
use crate::supervisor::ErrorSlot;
use crate::transport::Inbound;
use crate::wire;

/// Local endpoints of the serial stream. The downlink sender feeds the TCP
/// republisher and the virtual device; the uplink receiver carries bytes
/// from local clients. Both ends survive session restarts.
#[derive(Clone)]
pub struct SerialIo {
    pub downlink: Sender<Vec<u8>>,
    pub uplink: Receiver<Vec<u8>>,
}

/// Serial stream state.
pub struct SerialStream {
    core: StreamCore,
    rx_buf: SeqBuf,
    send_seq: u16,
    received: bool,
    last_delivered_seq: u16,
    last_heard: Instant,
    watchdog_fired: bool,
    io: SerialIo,
    errors: ErrorSlot,
    stats: Arc<Stats>,
}

impl SerialStream {
    /// Open, handshake, and hand the stream over to its event loop.
    pub fn start(
        cfg: &Config,
        io: SerialIo,
        errors: ErrorSlot,
        stats: Arc<Stats>,
    ) -> Result<StreamHandle> {
        log::debug!("[serial] init");
        let mut core = StreamCore::open("serial", &cfg.address, cfg.serial_port, cfg.local_port, 1)?;
        core.handshake()?;
        core.start_keepalive();
        log::info!("[serial] stream started");

        let stream = Self {
            core,
            rx_buf: SeqBuf::new("serial", SERIAL_RX_WINDOW, 0xffff, 0),
            send_seq: 0,
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
            .name("rig-serial".to_string())
            .spawn(move || stream.run(&deinit_rx, &done_tx))
            .map_err(Error::Io)?;
        Ok(StreamHandle::new(deinit_tx, done_rx, join))
    }

    fn run(mut self, deinit_rx: &Receiver<()>, done_tx: &Sender<()>) {
        let mut inbound = self.core.endpoint.inbound().clone();
        let mut uplink = self.io.uplink.clone();
        let ticker = tick(TICK_INTERVAL);
        loop {
            let mut inbound_gone = false;
            let mut uplink_gone = false;
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
                recv(uplink) -> msg => match msg {
                    Ok(bytes) => {
                        if let Err(err) = self.send_uplink(&bytes) {
                            self.errors.report(err);
                        }
                    }
                    Err(_) => uplink_gone = true,
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
            if uplink_gone {
                uplink = never();
            }
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) -> Result<()> {
        let now = Instant::now();
        if let Some(parsed) = wire::parse_serial(frame) {
            self.last_heard = now;
            self.watchdog_fired = false;
            self.stats.serial_frames_down.fetch_add(1, Ordering::Relaxed);
            self.stats
                .serial_bytes_down
                .fetch_add(parsed.payload.len() as u64, Ordering::Relaxed);
            if let Some((from, to)) = self.rx_buf.add(parsed.seq, parsed.payload.to_vec(), now) {
                self.core.send_retransmit_request(from, to)?;
            }
        } else if wire::parse_retransmit_request(frame).is_some() {
            // Uplink serial frames are not retained; nothing to resend.
            log::debug!("[serial] ignoring retransmit request");
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
            return Err(Error::StreamTimeout { stream: "serial" });
        }
        Ok(())
    }

    fn deliver(&mut self, entry: SeqBufEntry) {
        if self.received {
            let expected = self.last_delivered_seq.wrapping_add(1);
            if entry.seq != expected {
                let missing = super::missing_between(expected, entry.seq);
                log::error!("[serial] lost {} packets", missing);
                self.stats
                    .serial_packets_lost
                    .fetch_add(u64::from(missing), Ordering::Relaxed);
            }
        }
        self.last_delivered_seq = entry.seq;
        self.received = true;
        let _ = self.io.downlink.send(entry.data);
    }

    fn send_uplink(&mut self, bytes: &[u8]) -> Result<()> {
        for chunk in bytes.chunks(0xff) {
            let frame =
                wire::serial_data(self.send_seq, self.core.local_sid, self.core.remote_sid, chunk);
            self.core.send(&frame)?;
            self.send_seq = self.send_seq.wrapping_add(1);
            self.stats.serial_frames_up.fetch_add(1, Ordering::Relaxed);
            self.stats
                .serial_bytes_up
                .fetch_add(chunk.len() as u64, Ordering::Relaxed);
        }
        Ok(())
    }
}
