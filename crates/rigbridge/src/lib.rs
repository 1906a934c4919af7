// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rigbridge project

//! # rigbridge
//!
//! Client for the UDP protocol spoken by wifi-capable Icom transceivers.
//! A session is three parallel UDP streams against the radio, bridged to
//! local endpoints:
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                            supervisor                              |
//! |        restart loop, fatal-error slot, 65 s cool-down              |
//! +--------------------------------------------------------------------+
//! | control :50001        | serial :50002        | audio :50003        |
//! | login/auth/reauth     | CI-V bytes           | 16-bit PCM          |
//! | 0x90 stream request   | reorder window       | reorder window      |
//! |                       | TCP server / pty     | play/rec channels   |
//! +--------------------------------------------------------------------+
//! |    shared substrate: datagram endpoint + reader thread,            |
//! |    keepalive pings, tracked sends, retransmit requests             |
//! +--------------------------------------------------------------------+
//! ```
//!
//! Each stream runs one reader thread and one event-loop thread that
//! communicate over channels; timers are deadline checks on a coarse tick,
//! so all stream state has a single writer.
//!
//! The entry point is [`supervisor::run`]; the embedding process supplies
//! the local endpoints (see [`io`]) and receives [`SessionEvent`]s.

pub mod config;
pub mod error;
pub mod io;
pub mod keepalive;
pub mod reliability;
pub mod session;
pub mod stats;
pub mod supervisor;
pub mod transport;
pub mod wire;

pub use config::Config;
pub use error::{Error, Result};
pub use session::SessionEvent;
