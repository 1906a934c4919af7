// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rigbridge project

//! Local endpoints the bridge republishes to: a TCP server and an optional
//! virtual serial device for the CI-V bytes, and a raw-PCM pipe adapter
//! standing in for a platform audio backend.

pub mod audio_pipe;
pub mod serial_tcp;
#[cfg(unix)]
pub mod virtual_serial;
