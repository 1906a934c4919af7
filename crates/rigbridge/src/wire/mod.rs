// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rigbridge project

//! Wire framing for the radio's UDP protocol.
//!
//! Everything here is byte-exact: the radio rejects frames that deviate from
//! the layouts below. Session identifiers are big-endian, sequence numbers
//! little-endian unless a field is explicitly noted as big-endian.
//!
//! # Frame families
//!
//! ```text
//! control  | 16 B   | leading dword 0x10, command byte at [4]
//! ping     | 21 B   | leading byte 0x15, command byte 0x07 at [4]
//! tracked  | 64-144 | leading dword = total length, inner seq at [6:8]
//! audio    | 24+N   | tag pairs 6C 05 / 44 02, stream seq at [6:8]
//! serial   | 21+N   | leading dword = total length, 0xC1 marker at [16]
//! ```

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Command byte (offset 4) of the 16-byte control frames.
pub mod cmd {
    /// Retransmit request (shares the 16-byte shape, distinct command).
    pub const RETRANSMIT: u8 = 0x01;
    /// Connection probe.
    pub const PROBE: u8 = 0x03;
    /// Probe reply carrying the peer's session ID.
    pub const PROBE_REPLY: u8 = 0x04;
    /// Session disconnect.
    pub const DISCONNECT: u8 = 0x05;
    /// Idle / handshake completion.
    pub const IDLE: u8 = 0x06;
    /// Keepalive ping.
    pub const PING: u8 = 0x07;
}

/// Magic byte (offset 21) of the 64-byte auth frame.
pub mod auth_magic {
    /// Session teardown.
    pub const DEAUTH: u8 = 0x01;
    /// First auth after login.
    pub const FIRST: u8 = 0x02;
    /// Second auth and periodic reauth.
    pub const SECOND: u8 = 0x05;
}

/// Username "beer" as it appears on the wire. The scrambling is
/// position-dependent, so the encoded bytes are stored verbatim rather than
/// derived; the radio's own scheme is not re-derived here.
pub const USERNAME_SCRAMBLED: [u8; 4] = [0x2b, 0x3f, 0x55, 0x5c];
/// Password "beerbeer" as it appears on the wire.
pub const PASSWORD_SCRAMBLED: [u8; 8] = [0x2b, 0x3f, 0x55, 0x5c, 0x3f, 0x25, 0x77, 0x58];
/// Host identifier, sent in plain text.
pub const HOST_IDENT: &[u8; 8] = b"icom-pc\0";
/// Radio model name carried in the serial+audio request.
pub const RADIO_MODEL: &[u8; 8] = b"IC-705\0\0";

/// Expected head of the probe reply (pkt4).
pub const PROBE_REPLY_HEAD: [u8; 8] = [0x10, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00];
/// Expected head of the idle reply (pkt6 echo).
pub const IDLE_REPLY_HEAD: [u8; 8] = [0x10, 0x00, 0x00, 0x00, 0x06, 0x00, 0x01, 0x00];
/// Expected head of the 96-byte login reply.
pub const LOGIN_REPLY_HEAD: [u8; 8] = [0x60, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00];

/// Prefix of the 168-byte capability reply.
pub const CAPABILITIES_PREFIX: [u8; 6] = [0xa8, 0x00, 0x00, 0x00, 0x00, 0x00];
/// Prefix of the 64-byte auth reply.
pub const AUTH_REPLY_PREFIX: [u8; 6] = [0x40, 0x00, 0x00, 0x00, 0x00, 0x00];
/// Prefix of the 80-byte status frame.
pub const STATUS_PREFIX: [u8; 6] = [0x50, 0x00, 0x00, 0x00, 0x00, 0x00];
/// Prefix of the 144-byte serial+audio reply.
pub const REQUEST_REPLY_PREFIX: [u8; 6] = [0x90, 0x00, 0x00, 0x00, 0x00, 0x00];

/// Tag bytes of the first audio datagram of a PCM tick.
pub const AUDIO_PART1_TAG: [u8; 2] = [0x6c, 0x05];
/// Tag bytes of the second audio datagram of a PCM tick.
pub const AUDIO_PART2_TAG: [u8; 2] = [0x44, 0x02];

/// Length of a keepalive ping frame.
pub const PING_LEN: usize = 21;
/// Marker byte of serial data frames.
pub const SERIAL_MARKER: u8 = 0xc1;
/// Serial data header length; the civ payload starts here.
pub const SERIAL_HEADER_LEN: usize = 21;
/// Audio data header length; PCM starts here.
pub const AUDIO_HEADER_LEN: usize = 24;
/// Shortest audio data frame the radio emits.
pub const AUDIO_MIN_LEN: usize = 580;

/// Derive the local session ID from the socket's address: the low 16 bits
/// of the IPv4 address concatenated with the port number.
pub fn local_sid(addr: SocketAddr) -> u32 {
    let ip = match addr.ip() {
        std::net::IpAddr::V4(v4) => u32::from(v4),
        std::net::IpAddr::V6(_) => 0,
    };
    (ip << 16) | u32::from(addr.port())
}

/// Write both session IDs at their fixed offsets (big-endian).
fn put_sids(buf: &mut [u8], local: u32, remote: u32) {
    buf[8..12].copy_from_slice(&local.to_be_bytes());
    buf[12..16].copy_from_slice(&remote.to_be_bytes());
}

/// Read a big-endian session ID.
pub fn read_sid(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn control_frame(command: u8, flag: u8, local: u32, remote: u32) -> [u8; 16] {
    let mut buf = [0u8; 16];
    buf[0] = 0x10;
    buf[4] = command;
    buf[6] = flag;
    put_sids(&mut buf, local, remote);
    buf
}

/// Connection probe (pkt3).
pub fn probe(local: u32, remote: u32) -> [u8; 16] {
    control_frame(cmd::PROBE, 0x00, local, remote)
}

/// Idle / handshake completion (pkt6).
pub fn idle(local: u32, remote: u32) -> [u8; 16] {
    control_frame(cmd::IDLE, 0x01, local, remote)
}

/// Session disconnect.
pub fn disconnect(local: u32, remote: u32) -> [u8; 16] {
    control_frame(cmd::DISCONNECT, 0x00, local, remote)
}

// ===== Keepalive pings =====

/// A parsed keepalive ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    /// Rolling 16-bit sequence.
    pub seq: u16,
    /// False for a request that wants an echo, true for the echo itself.
    pub is_reply: bool,
    /// Originator-chosen identifier, echoed verbatim in the reply.
    pub ident: [u8; 4],
}

/// Match a keepalive ping by shape. Pings never reach session handlers.
pub fn is_ping(frame: &[u8]) -> bool {
    frame.len() == PING_LEN && frame[1..6] == [0x00, 0x00, 0x00, cmd::PING, 0x00]
}

/// Parse a ping. Returns `None` when the frame is not one.
pub fn parse_ping(frame: &[u8]) -> Option<Ping> {
    if !is_ping(frame) {
        return None;
    }
    Some(Ping {
        seq: u16::from_le_bytes([frame[6], frame[7]]),
        is_reply: frame[16] != 0x00,
        ident: [frame[17], frame[18], frame[19], frame[20]],
    })
}

fn ping_frame(seq: u16, flag: u8, ident: [u8; 4], local: u32, remote: u32) -> [u8; PING_LEN] {
    let mut buf = [0u8; PING_LEN];
    buf[0] = 0x15;
    buf[4] = cmd::PING;
    buf[6..8].copy_from_slice(&seq.to_le_bytes());
    put_sids(&mut buf, local, remote);
    buf[16] = flag;
    buf[17..21].copy_from_slice(&ident);
    buf
}

/// Build a ping request that the peer should echo.
pub fn ping_request(seq: u16, ident: [u8; 4], local: u32, remote: u32) -> [u8; PING_LEN] {
    ping_frame(seq, 0x00, ident, local, remote)
}

/// Echo a peer's ping request: same sequence and identifier, reply flag set.
pub fn ping_reply(request: &Ping, local: u32, remote: u32) -> [u8; PING_LEN] {
    ping_frame(request.seq, 0x01, request.ident, local, remote)
}

/// Originator identifier: two entropy bytes and the fixed `10 00` tail.
pub fn ping_ident() -> [u8; 4] {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mixed = (nanos ^ (nanos >> 32) ^ (nanos >> 64)) as u16;
    let [a, b] = mixed.to_le_bytes();
    [a, b, 0x10, 0x00]
}

// ===== Auth-bearing control frames (sent over the tracked channel) =====

/// 128-byte login frame with the scrambled credentials and host identifier.
/// `auth_seq` is the auth-bearing frame counter, distinct from the tracked
/// channel's inner sequence stamped later at [6:8].
pub fn login(local: u32, remote: u32, auth_seq: u16) -> [u8; 128] {
    let mut buf = [0u8; 128];
    buf[0] = 0x80;
    put_sids(&mut buf, local, remote);
    buf[16..20].copy_from_slice(&[0x00, 0x00, 0x00, 0x70]);
    buf[20] = 0x01;
    buf[23..25].copy_from_slice(&auth_seq.to_le_bytes());
    // The radio builds the 6-byte auth ID around this start marker.
    buf[26] = 0x63;
    buf[27] = 0x00;
    buf[64..68].copy_from_slice(&USERNAME_SCRAMBLED);
    buf[80..88].copy_from_slice(&PASSWORD_SCRAMBLED);
    buf[96..104].copy_from_slice(HOST_IDENT);
    buf
}

/// 64-byte auth frame. The magic byte selects deauth, first auth, or the
/// second/periodic auth.
pub fn auth(local: u32, remote: u32, auth_seq: u16, auth_id: &[u8; 6], magic: u8) -> [u8; 64] {
    let mut buf = [0u8; 64];
    buf[0] = 0x40;
    put_sids(&mut buf, local, remote);
    buf[16..20].copy_from_slice(&[0x00, 0x00, 0x00, 0x30]);
    buf[20] = 0x01;
    buf[21] = magic;
    buf[23..25].copy_from_slice(&auth_seq.to_le_bytes());
    buf[26..32].copy_from_slice(auth_id);
    buf
}

/// Negotiated parameters carried by the serial+audio request.
#[derive(Debug, Clone, Copy)]
pub struct StreamRequest {
    pub sample_rate: u16,
    pub serial_port: u16,
    pub audio_port: u16,
    pub tx_buffer_ms: u16,
}

/// 144-byte serial+audio request (0x90). Carries the auth ID, the 16
/// capability-reply bytes, the radio model, the scrambled username and the
/// negotiated sample rate, ports and uplink buffer length.
pub fn stream_request(
    local: u32,
    remote: u32,
    auth_seq: u16,
    auth_id: &[u8; 6],
    capability_id: &[u8; 16],
    req: StreamRequest,
) -> [u8; 144] {
    let mut buf = [0u8; 144];
    buf[0] = 0x90;
    put_sids(&mut buf, local, remote);
    buf[16..20].copy_from_slice(&[0x00, 0x00, 0x00, 0x80]);
    buf[20] = 0x01;
    buf[21] = 0x03;
    buf[23..25].copy_from_slice(&auth_seq.to_le_bytes());
    buf[26..32].copy_from_slice(auth_id);
    buf[32..48].copy_from_slice(capability_id);
    buf[64..72].copy_from_slice(RADIO_MODEL);
    buf[96..100].copy_from_slice(&USERNAME_SCRAMBLED);
    buf[112..116].copy_from_slice(&[0x01, 0x01, 0x04, 0x04]);
    buf[118..120].copy_from_slice(&req.sample_rate.to_be_bytes());
    buf[122..124].copy_from_slice(&req.sample_rate.to_be_bytes());
    buf[126..128].copy_from_slice(&req.serial_port.to_be_bytes());
    buf[130..132].copy_from_slice(&req.audio_port.to_be_bytes());
    buf[134..136].copy_from_slice(&req.tx_buffer_ms.to_be_bytes());
    buf[136] = 0x01;
    buf
}

/// Extract a NUL-terminated ASCII name.
pub fn parse_null_terminated(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

// ===== Retransmit requests =====

/// A retransmit demand, ours or the peer's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetransmitRequest {
    /// One missing sequence.
    Single(u16),
    /// Inclusive `(from, to)` ranges of missing sequences.
    Ranges(Vec<(u16, u16)>),
}

/// 16-byte single-sequence retransmit request.
pub fn retransmit_single(seq: u16, local: u32, remote: u32) -> [u8; 16] {
    let mut buf = control_frame(cmd::RETRANSMIT, 0x00, local, remote);
    buf[6..8].copy_from_slice(&seq.to_le_bytes());
    buf
}

/// Multi-range retransmit request: 16-byte head plus four bytes per range,
/// `(from, to)` both little-endian. Never called with an empty list.
pub fn retransmit_ranges(ranges: &[(u16, u16)], local: u32, remote: u32) -> Vec<u8> {
    debug_assert!(!ranges.is_empty());
    let mut buf = vec![0u8; 16 + ranges.len() * 4];
    buf[0] = 0x18;
    buf[4] = cmd::RETRANSMIT;
    put_sids(&mut buf, local, remote);
    for (i, &(from, to)) in ranges.iter().enumerate() {
        let at = 16 + i * 4;
        buf[at..at + 2].copy_from_slice(&from.to_le_bytes());
        buf[at + 2..at + 4].copy_from_slice(&to.to_le_bytes());
    }
    buf
}

/// Parse either retransmit request form.
pub fn parse_retransmit_request(frame: &[u8]) -> Option<RetransmitRequest> {
    if frame.len() == 16 && frame[0] == 0x10 && frame[4] == cmd::RETRANSMIT {
        return Some(RetransmitRequest::Single(u16::from_le_bytes([
            frame[6], frame[7],
        ])));
    }
    if frame.len() > 16
        && frame[0] == 0x18
        && frame[4] == cmd::RETRANSMIT
        && (frame.len() - 16) % 4 == 0
    {
        let ranges = frame[16..]
            .chunks_exact(4)
            .map(|c| {
                (
                    u16::from_le_bytes([c[0], c[1]]),
                    u16::from_le_bytes([c[2], c[3]]),
                )
            })
            .collect();
        return Some(RetransmitRequest::Ranges(ranges));
    }
    None
}

// ===== Audio data frames =====

/// A parsed audio downlink frame.
#[derive(Debug, PartialEq, Eq)]
pub struct AudioFrame<'a> {
    pub seq: u16,
    pub payload: &'a [u8],
}

/// Build one audio uplink datagram. `prev_seq` is the back-reference slot,
/// big-endian like the payload length.
pub fn audio_data(tag: [u8; 2], seq: u16, local: u32, remote: u32, pcm: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; AUDIO_HEADER_LEN + pcm.len()];
    buf[0] = tag[0];
    buf[1] = tag[1];
    buf[6..8].copy_from_slice(&seq.to_le_bytes());
    put_sids(&mut buf, local, remote);
    buf[16] = 0x80;
    let prev_seq = seq.wrapping_sub(1);
    buf[18..20].copy_from_slice(&prev_seq.to_be_bytes());
    buf[22..24].copy_from_slice(&(pcm.len() as u16).to_be_bytes());
    buf[AUDIO_HEADER_LEN..].copy_from_slice(pcm);
    buf
}

/// Parse an audio downlink frame: full-size, either tag pair.
pub fn parse_audio(frame: &[u8]) -> Option<AudioFrame<'_>> {
    if frame.len() < AUDIO_MIN_LEN {
        return None;
    }
    let tagged = frame[..2] == AUDIO_PART1_TAG || frame[..2] == AUDIO_PART2_TAG;
    if !tagged || frame[2..6] != [0x00, 0x00, 0x00, 0x00] {
        return None;
    }
    let seq = u16::from_le_bytes([frame[6], frame[7]]);
    let len = usize::from(u16::from_be_bytes([frame[22], frame[23]]));
    let end = AUDIO_HEADER_LEN + len.min(frame.len() - AUDIO_HEADER_LEN);
    Some(AudioFrame {
        seq,
        payload: &frame[AUDIO_HEADER_LEN..end],
    })
}

// ===== Serial data frames =====

/// A parsed serial (CI-V) frame.
#[derive(Debug, PartialEq, Eq)]
pub struct SerialFrame<'a> {
    pub seq: u16,
    pub payload: &'a [u8],
}

/// Build a serial uplink frame. Payloads longer than 255 bytes must be
/// split by the caller.
pub fn serial_data(seq: u16, local: u32, remote: u32, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= 0xff);
    let total = SERIAL_HEADER_LEN + payload.len();
    let mut buf = vec![0u8; total];
    buf[0..4].copy_from_slice(&(total as u32).to_le_bytes());
    buf[6..8].copy_from_slice(&seq.to_le_bytes());
    put_sids(&mut buf, local, remote);
    buf[16] = SERIAL_MARKER;
    buf[17] = payload.len() as u8;
    buf[19..21].copy_from_slice(&seq.to_be_bytes());
    buf[SERIAL_HEADER_LEN..].copy_from_slice(payload);
    buf
}

/// Parse a serial downlink frame by its 0xC1 marker.
pub fn parse_serial(frame: &[u8]) -> Option<SerialFrame<'_>> {
    if frame.len() <= SERIAL_HEADER_LEN || frame[16] != SERIAL_MARKER {
        return None;
    }
    let len = usize::from(frame[17]);
    if SERIAL_HEADER_LEN + len > frame.len() {
        return None;
    }
    Some(SerialFrame {
        seq: u16::from_le_bytes([frame[6], frame[7]]),
        payload: &frame[SERIAL_HEADER_LEN..SERIAL_HEADER_LEN + len],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    const LOCAL: u32 = 0x0303c350;
    const REMOTE: u32 = 0xaabbccdd;

    #[test]
    fn test_local_sid_combines_address_and_port() {
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 168, 3, 3), 50001));
        // low 16 bits of 192.168.3.3 are 0x0303, port 50001 = 0xc351
        assert_eq!(local_sid(addr), 0x0303_c351);
    }

    #[test]
    fn test_probe_layout() {
        let p = probe(LOCAL, 0);
        assert_eq!(&p[..8], &[0x10, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00]);
        assert_eq!(&p[8..12], &LOCAL.to_be_bytes());
        assert_eq!(&p[12..16], &[0x00; 4]);
    }

    #[test]
    fn test_idle_echoes_learned_remote_sid() {
        let p = idle(LOCAL, REMOTE);
        assert_eq!(&p[..8], &IDLE_REPLY_HEAD);
        assert_eq!(&p[8..12], &LOCAL.to_be_bytes());
        assert_eq!(&p[12..16], &[0xaa, 0xbb, 0xcc, 0xdd]);
    }

    #[test]
    fn test_disconnect_layout() {
        let p = disconnect(LOCAL, REMOTE);
        assert_eq!(p[4], cmd::DISCONNECT);
        assert_eq!(p.len(), 16);
    }

    #[test]
    fn test_ping_request_roundtrip() {
        let ident = [0x11, 0x22, 0x10, 0x00];
        let p = ping_request(0x1234, ident, LOCAL, REMOTE);
        assert!(is_ping(&p));
        let parsed = parse_ping(&p).unwrap();
        assert_eq!(parsed.seq, 0x1234);
        assert!(!parsed.is_reply);
        assert_eq!(parsed.ident, ident);
    }

    #[test]
    fn test_ping_reply_echoes_ident_and_seq() {
        let req = Ping {
            seq: 0x00ff,
            is_reply: false,
            ident: [0xde, 0xad, 0x10, 0x00],
        };
        let reply = ping_reply(&req, LOCAL, REMOTE);
        let parsed = parse_ping(&reply).unwrap();
        assert!(parsed.is_reply);
        assert_eq!(parsed.seq, req.seq);
        assert_eq!(parsed.ident, req.ident);
    }

    #[test]
    fn test_ping_ident_carries_fixed_tail() {
        let ident = ping_ident();
        assert_eq!(&ident[2..], &[0x10, 0x00]);
    }

    #[test]
    fn test_ordinary_frames_are_not_pings() {
        assert!(!is_ping(&probe(LOCAL, REMOTE)));
        assert!(!is_ping(&[0u8; 21]));
    }

    #[test]
    fn test_login_frame_layout() {
        let p = login(LOCAL, REMOTE, 0x0201);
        assert_eq!(p.len(), 128);
        assert_eq!(p[0], 0x80);
        assert_eq!(&p[16..20], &[0x00, 0x00, 0x00, 0x70]);
        assert_eq!(p[20], 0x01);
        assert_eq!(&p[23..25], &[0x01, 0x02]); // little-endian auth seq
        assert_eq!(&p[26..28], &[0x63, 0x00]);
        assert_eq!(&p[64..68], &USERNAME_SCRAMBLED);
        assert_eq!(&p[68..80], &[0u8; 12]);
        assert_eq!(&p[80..88], &PASSWORD_SCRAMBLED);
        assert_eq!(&p[96..104], HOST_IDENT);
        assert_eq!(&p[104..128], &[0u8; 24]);
    }

    #[test]
    fn test_auth_frame_magics() {
        let id = [1, 2, 3, 4, 5, 6];
        for magic in [auth_magic::DEAUTH, auth_magic::FIRST, auth_magic::SECOND] {
            let p = auth(LOCAL, REMOTE, 7, &id, magic);
            assert_eq!(p.len(), 64);
            assert_eq!(p[0], 0x40);
            assert_eq!(&p[16..20], &[0x00, 0x00, 0x00, 0x30]);
            assert_eq!(p[21], magic);
            assert_eq!(&p[23..25], &[0x07, 0x00]);
            assert_eq!(&p[26..32], &id);
        }
    }

    #[test]
    fn test_stream_request_layout() {
        let auth_id = [9, 8, 7, 6, 5, 4];
        let cap: [u8; 16] = [
            0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee,
            0xee, 0xff,
        ];
        let p = stream_request(
            LOCAL,
            REMOTE,
            3,
            &auth_id,
            &cap,
            StreamRequest {
                sample_rate: 48000,
                serial_port: 50002,
                audio_port: 50003,
                tx_buffer_ms: 100,
            },
        );
        assert_eq!(p.len(), 144);
        assert_eq!(p[0], 0x90);
        assert_eq!(p[21], 0x03);
        assert_eq!(&p[26..32], &auth_id);
        assert_eq!(&p[32..48], &cap);
        assert_eq!(&p[64..72], RADIO_MODEL);
        assert_eq!(&p[96..100], &USERNAME_SCRAMBLED);
        assert_eq!(&p[112..116], &[0x01, 0x01, 0x04, 0x04]);
        assert_eq!(&p[118..120], &48000u16.to_be_bytes());
        assert_eq!(&p[122..124], &48000u16.to_be_bytes());
        assert_eq!(&p[126..128], &50002u16.to_be_bytes());
        assert_eq!(&p[130..132], &50003u16.to_be_bytes());
        assert_eq!(&p[134..136], &100u16.to_be_bytes());
        assert_eq!(p[136], 0x01);
    }

    #[test]
    fn test_retransmit_single_layout() {
        let p = retransmit_single(2, LOCAL, REMOTE);
        assert_eq!(&p[..8], &[0x10, 0x00, 0x00, 0x00, 0x01, 0x00, 0x02, 0x00]);
        assert_eq!(
            parse_retransmit_request(&p),
            Some(RetransmitRequest::Single(2))
        );
    }

    #[test]
    fn test_retransmit_ranges_roundtrip() {
        let ranges = vec![(0x0102, 0x0304), (0xfffe, 0x0001)];
        let p = retransmit_ranges(&ranges, LOCAL, REMOTE);
        assert_eq!(p.len(), 16 + 8);
        assert_eq!(p[0], 0x18);
        assert_eq!(p[4], cmd::RETRANSMIT);
        // little-endian pairs
        assert_eq!(&p[16..20], &[0x02, 0x01, 0x04, 0x03]);
        assert_eq!(
            parse_retransmit_request(&p),
            Some(RetransmitRequest::Ranges(ranges))
        );
    }

    #[test]
    fn test_handshake_frames_do_not_parse_as_retransmit() {
        assert_eq!(parse_retransmit_request(&probe(LOCAL, REMOTE)), None);
        assert_eq!(parse_retransmit_request(&idle(LOCAL, REMOTE)), None);
    }

    #[test]
    fn test_audio_data_layout() {
        let pcm = vec![0x5a; 556];
        let p = audio_data(AUDIO_PART2_TAG, 8, LOCAL, REMOTE, &pcm);
        assert_eq!(p.len(), 580);
        assert_eq!(&p[..2], &AUDIO_PART2_TAG);
        assert_eq!(&p[6..8], &[0x08, 0x00]);
        assert_eq!(p[16], 0x80);
        assert_eq!(&p[18..20], &7u16.to_be_bytes());
        assert_eq!(&p[22..24], &556u16.to_be_bytes());
        assert_eq!(&p[24..], &pcm[..]);
    }

    #[test]
    fn test_audio_back_reference_wraps() {
        let pcm = vec![0u8; 556];
        let p = audio_data(AUDIO_PART1_TAG, 0, LOCAL, REMOTE, &pcm);
        assert_eq!(&p[18..20], &0xffffu16.to_be_bytes());
    }

    #[test]
    fn test_parse_audio_accepts_both_tags() {
        let pcm = vec![1u8; 556];
        for tag in [AUDIO_PART1_TAG, AUDIO_PART2_TAG] {
            let p = audio_data(tag, 42, LOCAL, REMOTE, &pcm);
            let parsed = parse_audio(&p).unwrap();
            assert_eq!(parsed.seq, 42);
            assert_eq!(parsed.payload, &pcm[..]);
        }
    }

    #[test]
    fn test_parse_audio_rejects_short_frames() {
        let pcm = vec![1u8; 100];
        let p = audio_data(AUDIO_PART1_TAG, 1, LOCAL, REMOTE, &pcm);
        assert!(parse_audio(&p).is_none());
    }

    #[test]
    fn test_serial_roundtrip() {
        let civ = [0xfe, 0xfe, 0x94, 0xe0, 0x03, 0xfd];
        let p = serial_data(0x0a0b, LOCAL, REMOTE, &civ);
        assert_eq!(p.len(), 27);
        assert_eq!(&p[0..4], &27u32.to_le_bytes());
        assert_eq!(p[16], SERIAL_MARKER);
        assert_eq!(p[17], 6);
        assert_eq!(&p[19..21], &0x0a0bu16.to_be_bytes());
        let parsed = parse_serial(&p).unwrap();
        assert_eq!(parsed.seq, 0x0a0b);
        assert_eq!(parsed.payload, &civ[..]);
    }

    #[test]
    fn test_parse_serial_rejects_truncated_payload() {
        let civ = [1, 2, 3, 4];
        let mut p = serial_data(1, LOCAL, REMOTE, &civ);
        p[17] = 200; // claims more payload than the frame holds
        assert!(parse_serial(&p).is_none());
    }

    #[test]
    fn test_parse_null_terminated() {
        assert_eq!(parse_null_terminated(b"IC-705\0\0junk"), "IC-705");
        assert_eq!(parse_null_terminated(b"abc"), "abc");
    }
}
