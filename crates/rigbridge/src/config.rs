// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rigbridge project

//! Protocol constants and runtime configuration.
//!
//! Every timing and port constant of the radio's UDP protocol lives here.
//! Never hardcode these elsewhere.

use std::time::Duration;

/// Control stream UDP port on the radio.
pub const CONTROL_STREAM_PORT: u16 = 50001;
/// CI-V serial stream UDP port on the radio.
pub const SERIAL_STREAM_PORT: u16 = 50002;
/// Audio stream UDP port on the radio.
pub const AUDIO_STREAM_PORT: u16 = 50003;

/// PCM sample rate advertised in the serial+audio request.
pub const AUDIO_SAMPLE_RATE: u16 = 48000;

/// Largest datagram the radio emits.
pub const MAX_DATAGRAM_SIZE: usize = 1500;

/// PCM bytes produced by the local source per uplink tick.
pub const PCM_TICK_BYTES: usize = 1920;
/// First audio datagram of a tick carries this many PCM bytes.
pub const AUDIO_PART1_BYTES: usize = 1364;
/// Second audio datagram of a tick carries the remainder.
pub const AUDIO_PART2_BYTES: usize = 556;

/// Base period of the keepalive ping cadence.
pub const PING_INTERVAL: Duration = Duration::from_millis(100);

/// How long `expect` waits for a matching frame during bring-up.
pub const EXPECT_TIMEOUT: Duration = Duration::from_secs(1);
/// Probe (pkt3) resend attempts before the handshake is declared dead.
pub const HANDSHAKE_MAX_RETRIES: u32 = 3;

/// An unsolicited ping arriving within this window after bind means a
/// previous session is still running on the radio.
pub const TAKEOVER_PROBE_WINDOW: Duration = Duration::from_millis(300);
/// Pause between disconnecting a hijacked session and reopening.
pub const TAKEOVER_LINGER: Duration = Duration::from_secs(1);

/// How long sent tracked frames are retained for peer retransmit requests.
pub const TRACKED_RETENTION: Duration = Duration::from_secs(3);
/// Cadence of the tracked channel's unsolicited resends.
pub const TRACKED_RESEND_INTERVAL: Duration = Duration::from_secs(1);

/// Delay before the second auth frame is sent.
pub const SECOND_AUTH_DELAY: Duration = Duration::from_secs(1);
/// Delay between the auth handshake completing and the serial+audio request.
pub const REQUEST_DELAY: Duration = Duration::from_secs(1);
/// The serial+audio request must succeed within this window.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Periodic reauth cadence while the session is up.
pub const REAUTH_INTERVAL: Duration = Duration::from_secs(25);
/// A reauth must be acknowledged within this window.
pub const REAUTH_TIMEOUT: Duration = Duration::from_secs(3);

/// Inactivity watchdog for the audio and serial streams.
pub const STREAM_TIMEOUT: Duration = Duration::from_secs(3);

/// Pause after the deauth frame so the radio can still request retransmits.
pub const DEAUTH_LINGER: Duration = Duration::from_millis(500);

/// Mandatory idle time between closing a session and reopening it.
/// The radio silently drops the audio stream of a too-quick re-login.
pub const COOLDOWN_SECS: u64 = 65;

/// Reorder window of the audio downlink.
pub const AUDIO_RX_WINDOW: Duration = Duration::from_millis(100);
/// Reorder window of the serial downlink.
pub const SERIAL_RX_WINDOW: Duration = Duration::from_millis(30);
/// Uplink buffer length in milliseconds, advertised in the 0x90 request.
pub const TX_SEQBUF_LENGTH_MS: u16 = 100;

/// Coarse tick driving every stream loop's timers.
pub const TICK_INTERVAL: Duration = Duration::from_millis(20);

/// Runtime configuration of a bridge instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Radio address (hostname or IPv4).
    pub address: String,
    /// Control stream port.
    pub control_port: u16,
    /// Serial stream port, also advertised in the 0x90 request.
    pub serial_port: u16,
    /// Audio stream port, also advertised in the 0x90 request.
    pub audio_port: u16,
    /// Local bind port override. `None` mirrors the remote port, which is
    /// what the radio requires; tests bind ephemeral ports instead.
    pub local_port: Option<u16>,
    /// Only accept a reauth acknowledgement whose magic byte is 0x05.
    /// The radio has been observed acknowledging with other magics, so the
    /// lenient default accepts any 0x40 reply.
    pub strict_reauth_magic: bool,
    /// Treat a missed reauth acknowledgement as fatal instead of logging
    /// and waiting for the sub-stream watchdogs.
    pub reauth_timeout_fatal: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: "IC-705".to_string(),
            control_port: CONTROL_STREAM_PORT,
            serial_port: SERIAL_STREAM_PORT,
            audio_port: AUDIO_STREAM_PORT,
            local_port: None,
            strict_reauth_magic: false,
            reauth_timeout_fatal: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_uses_protocol_ports() {
        let cfg = Config::default();
        assert_eq!(cfg.control_port, 50001);
        assert_eq!(cfg.serial_port, 50002);
        assert_eq!(cfg.audio_port, 50003);
        assert!(cfg.local_port.is_none());
    }

    #[test]
    fn test_audio_tick_split_covers_whole_tick() {
        assert_eq!(AUDIO_PART1_BYTES + AUDIO_PART2_BYTES, PCM_TICK_BYTES);
    }

    #[test]
    fn test_lenient_defaults() {
        let cfg = Config::default();
        assert!(!cfg.strict_reauth_magic);
        assert!(!cfg.reauth_timeout_fatal);
    }
}
