// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rigbridge project

//! Loss handling over the bare datagrams: a reorder window on the receive
//! side and a retained-send channel on the transmit side.

pub mod seq_buf;
pub mod tracked;

pub use seq_buf::{SeqBuf, SeqBufEntry};
pub use tracked::TrackedSender;
