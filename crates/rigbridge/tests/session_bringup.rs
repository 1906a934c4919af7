// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rigbridge project

//! Session bring-up against an in-process fake radio on loopback.
//!
//! The fake radio answers the probe/idle handshake, echoes keepalive
//! pings, and replies to the login frame; every other frame it receives is
//! recorded for assertions.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, Sender};

use rigbridge::session::audio::AudioIo;
use rigbridge::session::control::ControlStream;
use rigbridge::session::serial::SerialIo;
use rigbridge::session::StreamCore;
use rigbridge::stats::Stats;
use rigbridge::supervisor::ErrorSlot;
use rigbridge::wire;
use rigbridge::{Config, Error};

const RADIO_SID: u32 = 0x1122_3344;
const AUTH_ID: [u8; 6] = [0x63, 0x00, 0x5d, 0x37, 0x12, 0x82];

struct FakeRadio {
    port: u16,
    frames: Receiver<Vec<u8>>,
    running: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl FakeRadio {
    fn spawn(accept_login: bool) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind fake radio");
        socket
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let port = socket.local_addr().unwrap().port();
        let running = Arc::new(AtomicBool::new(true));
        let (frames_tx, frames_rx) = unbounded();

        let flag = Arc::clone(&running);
        let join = std::thread::spawn(move || radio_loop(&socket, &flag, &frames_tx, accept_login));

        Self {
            port,
            frames: frames_rx,
            running,
            join: Some(join),
        }
    }

    /// Wait until the radio has observed a frame matching the predicate.
    fn wait_for<F: Fn(&[u8]) -> bool>(&self, what: &str, pred: F) -> Vec<u8> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.frames.recv_timeout(remaining) {
                Ok(frame) if pred(&frame) => return frame,
                Ok(_) => continue,
                Err(_) => panic!("fake radio never saw: {}", what),
            }
        }
    }
}

impl Drop for FakeRadio {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn radio_loop(
    socket: &UdpSocket,
    running: &AtomicBool,
    frames: &Sender<Vec<u8>>,
    accept_login: bool,
) {
    let mut buf = [0u8; 2048];
    while running.load(Ordering::Relaxed) {
        let (n, peer) = match socket.recv_from(&mut buf) {
            Ok(got) => got,
            Err(_) => continue,
        };
        let r = &buf[..n];

        if let Some(ping) = wire::parse_ping(r) {
            if !ping.is_reply {
                let reply = wire::ping_reply(&ping, RADIO_SID, wire::read_sid(&r[8..12]));
                let _ = socket.send_to(&reply, peer);
            }
            continue;
        }
        let _ = frames.send(r.to_vec());

        let client_sid = if n >= 16 { wire::read_sid(&r[8..12]) } else { 0 };
        match n {
            16 if r[4] == wire::cmd::PROBE => {
                let mut reply = [0u8; 16];
                reply[..8].copy_from_slice(&wire::PROBE_REPLY_HEAD);
                reply[8..12].copy_from_slice(&RADIO_SID.to_be_bytes());
                reply[12..16].copy_from_slice(&client_sid.to_be_bytes());
                let _ = socket.send_to(&reply, peer);
            }
            16 if r[4] == wire::cmd::IDLE => {
                let mut reply = [0u8; 16];
                reply[..8].copy_from_slice(&wire::IDLE_REPLY_HEAD);
                reply[8..12].copy_from_slice(&RADIO_SID.to_be_bytes());
                reply[12..16].copy_from_slice(&client_sid.to_be_bytes());
                let _ = socket.send_to(&reply, peer);
            }
            128 if r[0] == 0x80 => {
                let mut reply = [0u8; 96];
                reply[..8].copy_from_slice(&wire::LOGIN_REPLY_HEAD);
                reply[8..12].copy_from_slice(&RADIO_SID.to_be_bytes());
                reply[12..16].copy_from_slice(&client_sid.to_be_bytes());
                reply[26..32].copy_from_slice(&AUTH_ID);
                if !accept_login {
                    reply[48..52].copy_from_slice(&[0xff, 0xff, 0xff, 0xfe]);
                }
                let _ = socket.send_to(&reply, peer);
            }
            _ => {}
        }
    }
}

fn test_config(port: u16) -> Config {
    Config {
        address: "127.0.0.1".to_string(),
        control_port: port,
        local_port: Some(0),
        ..Config::default()
    }
}

/// Engine-side channel ends. The local halves are dropped; the streams
/// tolerate disconnected local endpoints.
fn test_plumbing() -> (SerialIo, AudioIo) {
    let (serial_down_tx, _serial_down_rx) = unbounded();
    let (_serial_up_tx, serial_up_rx) = unbounded::<Vec<u8>>();
    let (play_tx, _play_rx) = unbounded();
    let (_rec_tx, rec_rx) = unbounded::<Vec<u8>>();
    (
        SerialIo {
            downlink: serial_down_tx,
            uplink: serial_up_rx,
        },
        AudioIo {
            play: play_tx,
            rec: rec_rx,
        },
    )
}

#[test]
fn test_handshake_learns_remote_sid() {
    let radio = FakeRadio::spawn(true);
    let mut core =
        StreamCore::open("control", "127.0.0.1", radio.port, Some(0), 2).expect("open");
    core.handshake().expect("handshake");
    assert_eq!(core.remote_sid, RADIO_SID);
    assert!(core.got_remote_sid);

    let probe = radio.wait_for("probe", |f| f.len() == 16 && f[4] == wire::cmd::PROBE);
    assert_eq!(&probe[..8], &[0x10, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00]);
    assert_eq!(wire::read_sid(&probe[8..12]), core.local_sid);
    assert_eq!(&probe[12..16], &[0u8; 4]);

    let idle = radio.wait_for("idle", |f| f.len() == 16 && f[4] == wire::cmd::IDLE);
    assert_eq!(wire::read_sid(&idle[12..16]), RADIO_SID);
}

#[test]
fn test_invalid_credentials_reported() {
    let radio = FakeRadio::spawn(false);
    let (errors, _errors_rx) = ErrorSlot::new();
    let (events_tx, _events_rx) = unbounded();
    let (serial_io, audio_io) = test_plumbing();

    let result = ControlStream::start(
        test_config(radio.port),
        errors,
        events_tx,
        serial_io,
        audio_io,
        Stats::new(),
    );
    match result {
        Err(Error::InvalidCredentials) => {}
        other => panic!("expected invalid credentials, got {:?}", other.err()),
    }
}

#[test]
fn test_login_auth_and_orderly_shutdown() {
    let radio = FakeRadio::spawn(true);
    let (errors, _errors_rx) = ErrorSlot::new();
    let (events_tx, _events_rx) = unbounded();
    let (serial_io, audio_io) = test_plumbing();

    let handle = ControlStream::start(
        test_config(radio.port),
        errors,
        events_tx,
        serial_io,
        audio_io,
        Stats::new(),
    )
    .expect("control stream start");

    let login = radio.wait_for("login", |f| f.len() == 128 && f[0] == 0x80);
    assert_eq!(&login[64..68], &wire::USERNAME_SCRAMBLED);
    assert_eq!(&login[80..88], &wire::PASSWORD_SCRAMBLED);

    let first_auth = radio.wait_for("first auth", |f| {
        f.len() == 64 && f[0] == 0x40 && f[21] == wire::auth_magic::FIRST
    });
    assert_eq!(&first_auth[26..32], &AUTH_ID);

    handle.shutdown();

    radio.wait_for("deauth", |f| {
        f.len() == 64 && f[0] == 0x40 && f[21] == wire::auth_magic::DEAUTH
    });
    radio.wait_for("disconnect", |f| f.len() == 16 && f[4] == wire::cmd::DISCONNECT);
}
