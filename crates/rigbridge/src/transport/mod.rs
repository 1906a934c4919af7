// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rigbridge project

//! UDP transport: one endpoint per stream.

pub mod udp;

pub use udp::{Inbound, UdpEndpoint};
