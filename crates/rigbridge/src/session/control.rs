// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rigbridge project

//! Control session: login, auth cadence, and bring-up of the data streams.
//!
//! Bring-up is synchronous: probe handshake, login over the tracked
//! channel, first auth. The event loop then drives the second auth, the
//! delayed serial+audio request, the 25-second reauth cadence and the
//! orderly deauth. Success of the 0x90 request gates the serial and audio
//! streams; any fatal from either bubbles back through the error slot.

use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel::{bounded, never, tick, Receiver, RecvTimeoutError, Sender};
use crossbeam::select;

use crate::config::{
    Config, AUDIO_SAMPLE_RATE, DEAUTH_LINGER, REAUTH_INTERVAL, REAUTH_TIMEOUT, REQUEST_DELAY,
    REQUEST_TIMEOUT, SECOND_AUTH_DELAY, TICK_INTERVAL, TX_SEQBUF_LENGTH_MS,
};
use crate::error::{Error, Result};
use crate::reliability::TrackedSender;
use crate::session::audio::{AudioIo, AudioStream};
use crate::session::serial::{SerialIo, SerialStream};
use crate::session::{SessionEvent, StreamCore, StreamHandle};
use crate::stats::Stats;
use crate::supervisor::ErrorSlot;
use crate::transport::Inbound;
use crate::wire;

/// Control stream state machine.
pub struct ControlStream {
    cfg: Config,
    core: StreamCore,
    tracked: TrackedSender,

    auth_seq: u16,
    auth_id: [u8; 6],
    got_auth_id: bool,
    auth_ok: bool,
    a8_reply_id: [u8; 16],
    got_a8_reply_id: bool,
    opened: bool,
    request_sent: bool,

    second_auth_at: Option<Instant>,
    request_at: Option<Instant>,
    request_deadline: Option<Instant>,
    reauth_at: Instant,
    reauth_timeout_at: Option<Instant>,

    serial: Option<StreamHandle>,
    audio: Option<StreamHandle>,
    serial_io: Option<SerialIo>,
    audio_io: Option<AudioIo>,

    errors: ErrorSlot,
    events: Sender<SessionEvent>,
    stats: Arc<Stats>,
}

impl ControlStream {
    /// Connect, authenticate, and hand the session over to its event loop.
    pub fn start(
        cfg: Config,
        errors: ErrorSlot,
        events: Sender<SessionEvent>,
        serial_io: SerialIo,
        audio_io: AudioIo,
        stats: Arc<Stats>,
    ) -> Result<StreamHandle> {
        log::debug!("[control] init");
        let mut core = StreamCore::open("control", &cfg.address, cfg.control_port, cfg.local_port, 2)?;
        core.handshake()?;
        core.start_keepalive();

        let mut tracked = TrackedSender::new("control");
        let mut auth_seq: u16 = 0;

        let login = tracked.prepare(
            wire::login(core.local_sid, core.remote_sid, auth_seq).to_vec(),
            Instant::now(),
        );
        core.send(&login)?;
        auth_seq = auth_seq.wrapping_add(1);

        log::debug!("[control] expecting login answer");
        let reply = core.expect(96, &wire::LOGIN_REPLY_HEAD)?;
        if reply[48..52] == [0xff, 0xff, 0xff, 0xfe] {
            return Err(Error::InvalidCredentials);
        }
        let mut auth_id = [0u8; 6];
        auth_id.copy_from_slice(&reply[26..32]);

        let now = Instant::now();
        let mut stream = Self {
            cfg,
            core,
            tracked,
            auth_seq,
            auth_id,
            got_auth_id: true,
            auth_ok: false,
            a8_reply_id: [0u8; 16],
            got_a8_reply_id: false,
            opened: false,
            request_sent: false,
            second_auth_at: Some(now + SECOND_AUTH_DELAY),
            request_at: None,
            request_deadline: Some(now + REQUEST_TIMEOUT),
            reauth_at: now + REAUTH_INTERVAL,
            reauth_timeout_at: None,
            serial: None,
            audio: None,
            serial_io: Some(serial_io),
            audio_io: Some(audio_io),
            errors,
            events,
            stats,
        };

        stream.send_auth(wire::auth_magic::FIRST)?;
        log::debug!("[control] login ok, first auth sent");

        let (deinit_tx, deinit_rx) = bounded(1);
        let (done_tx, done_rx) = bounded(1);
        let join = std::thread::Builder::new()
            .name("rig-control".to_string())
            .spawn(move || stream.run(&deinit_rx, &done_tx))
            .map_err(Error::Io)?;

        Ok(StreamHandle::new(deinit_tx, done_rx, join))
    }

    fn run(mut self, deinit_rx: &Receiver<()>, done_tx: &Sender<()>) {
        let mut inbound = self.core.endpoint.inbound().clone();
        let ticker = tick(TICK_INTERVAL);
        loop {
            let mut inbound_gone = false;
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
                recv(deinit_rx) -> _ => {
                    self.deinit(&inbound);
                    let _ = done_tx.send(());
                    return;
                }
            }
            if inbound_gone {
                // Reader exited; a Failed was already reported if it was
                // not our own teardown.
                inbound = never();
            }
        }
    }

    fn handle_frame(&mut self, frame: &[u8]) -> Result<()> {
        if let Some(request) = wire::parse_retransmit_request(frame) {
            for retained in self.tracked.retransmit(&request, Instant::now()) {
                self.core.send(&retained)?;
            }
            return Ok(());
        }

        let now = Instant::now();
        match frame.len() {
            168 if frame[..6] == wire::CAPABILITIES_PREFIX => {
                self.a8_reply_id.copy_from_slice(&frame[66..82]);
                self.got_a8_reply_id = true;
                self.try_request(now);
            }
            64 if frame[..6] == wire::AUTH_REPLY_PREFIX => {
                if !self.cfg.strict_reauth_magic || frame[21] == wire::auth_magic::SECOND {
                    self.reauth_timeout_at = None;
                }
                log::debug!("[control] auth ok");
                if frame[21] == wire::auth_magic::SECOND {
                    self.auth_ok = true;
                    self.second_auth_at = None;
                    self.try_request(now);
                }
            }
            80 if frame[..6] == wire::STATUS_PREFIX => {
                if frame[48..51] == [0xff, 0xff, 0xff] {
                    return Err(Error::AuthFailed {
                        opened: self.opened,
                    });
                }
                if frame[48..51] == [0x00, 0x00, 0x00] && frame[64] == 0x01 {
                    return Err(Error::RadioDisconnected);
                }
            }
            144 if frame[..6] == wire::REQUEST_REPLY_PREFIX
                && !self.opened
                && frame[96] == 0x01 =>
            {
                self.on_streams_granted(frame)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// The radio granted the serial and audio streams. Session IDs and the
    /// auth ID may have changed because of a previous login, so re-read
    /// them before bringing the sub-streams up.
    fn on_streams_granted(&mut self, frame: &[u8]) -> Result<()> {
        self.second_auth_at = None;
        self.request_deadline = None;

        let device_name = wire::parse_null_terminated(&frame[64..]);
        log::info!(
            "[control] got serial and audio request success, device name: {}",
            device_name
        );

        self.core.remote_sid = wire::read_sid(&frame[8..12]);
        self.core.local_sid = wire::read_sid(&frame[12..16]);
        self.auth_id.copy_from_slice(&frame[26..32]);
        self.got_auth_id = true;

        let serial_io = self.serial_io.take().expect("serial io consumed once");
        let audio_io = self.audio_io.take().expect("audio io consumed once");
        self.serial = Some(SerialStream::start(
            &self.cfg,
            serial_io,
            self.errors.clone(),
            Arc::clone(&self.stats),
        )?);
        self.audio = Some(AudioStream::start(
            &self.cfg,
            audio_io,
            self.errors.clone(),
            Arc::clone(&self.stats),
        )?);

        self.opened = true;
        let _ = self.events.send(SessionEvent::Up { device_name });
        Ok(())
    }

    fn on_tick(&mut self, now: Instant) -> Result<()> {
        self.core.keepalive_tick(now)?;
        for frame in self.tracked.tick(now) {
            self.core.send(&frame)?;
        }

        if take_due(&mut self.second_auth_at, now) {
            self.send_auth(wire::auth_magic::SECOND)?;
            log::debug!("[control] second auth sent");
        }
        if take_due(&mut self.request_at, now) {
            log::debug!("[control] requesting serial and audio stream");
            self.send_request()?;
        }
        if !self.opened && take_due(&mut self.request_deadline, now) {
            return Err(Error::RequestTimeout);
        }
        if now >= self.reauth_at {
            self.reauth_at = now + REAUTH_INTERVAL;
            self.reauth_timeout_at = Some(now + REAUTH_TIMEOUT);
            log::debug!("[control] sending auth");
            self.send_auth(wire::auth_magic::SECOND)?;
        }
        if take_due(&mut self.reauth_timeout_at, now) {
            if self.cfg.reauth_timeout_fatal {
                return Err(Error::ReauthTimeout);
            }
            log::error!("[control] auth timeout, audio/serial stream may stop");
        }
        Ok(())
    }

    /// Schedule the 0x90 request once both prerequisites hold. At most one
    /// request is ever in flight per session.
    fn try_request(&mut self, now: Instant) {
        if self.auth_ok
            && self.got_a8_reply_id
            && !self.opened
            && !self.request_sent
            && self.request_at.is_none()
        {
            self.request_at = Some(now + REQUEST_DELAY);
        }
    }

    fn send_auth(&mut self, magic: u8) -> Result<()> {
        let frame = wire::auth(
            self.core.local_sid,
            self.core.remote_sid,
            self.auth_seq,
            &self.auth_id,
            magic,
        );
        let frame = self.tracked.prepare(frame.to_vec(), Instant::now());
        self.core.send(&frame)?;
        self.auth_seq = self.auth_seq.wrapping_add(1);
        Ok(())
    }

    fn send_request(&mut self) -> Result<()> {
        let frame = wire::stream_request(
            self.core.local_sid,
            self.core.remote_sid,
            self.auth_seq,
            &self.auth_id,
            &self.a8_reply_id,
            wire::StreamRequest {
                sample_rate: AUDIO_SAMPLE_RATE,
                serial_port: self.cfg.serial_port,
                audio_port: self.cfg.audio_port,
                tx_buffer_ms: TX_SEQBUF_LENGTH_MS,
            },
        );
        let frame = self.tracked.prepare(frame.to_vec(), Instant::now());
        self.core.send(&frame)?;
        self.auth_seq = self.auth_seq.wrapping_add(1);
        self.request_sent = true;
        Ok(())
    }

    fn deinit(&mut self, inbound: &Receiver<Inbound>) {
        log::debug!("[control] deinit");
        self.opened = false;
        let _ = self.events.send(SessionEvent::Down);

        if self.got_auth_id && self.core.got_remote_sid {
            log::debug!("[control] sending deauth");
            let _ = self.send_auth(wire::auth_magic::DEAUTH);
            // Stay responsive a little longer so the radio can still
            // request retransmits of the deauth.
            let deadline = Instant::now() + DEAUTH_LINGER;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match inbound.recv_timeout(remaining) {
                    Ok(Inbound::Frame(frame)) => {
                        if let Some(request) = wire::parse_retransmit_request(&frame) {
                            for retained in self.tracked.retransmit(&request, Instant::now()) {
                                let _ = self.core.send(&retained);
                            }
                        }
                    }
                    Ok(Inbound::Ping(ping)) => {
                        let _ = self.core.handle_ping(&ping);
                    }
                    Ok(Inbound::Failed(_)) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => break,
                }
            }
        }

        if let Some(audio) = self.audio.take() {
            audio.shutdown();
        }
        if let Some(serial) = self.serial.take() {
            serial.shutdown();
        }
        self.core.send_disconnect();
    }
}

fn take_due(slot: &mut Option<Instant>, now: Instant) -> bool {
    if slot.map(|at| now >= at).unwrap_or(false) {
        *slot = None;
        true
    } else {
        false
    }
}
