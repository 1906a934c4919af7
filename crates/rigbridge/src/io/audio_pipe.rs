// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rigbridge project

//! Raw-PCM pipe adapter.
//!
//! The platform audio device backend is out of scope for the engine; any
//! backend is just a pair of channels carrying 16-bit little-endian PCM.
//! This adapter bridges those channels to plain files or FIFOs: downlink
//! PCM is appended to the sink path, uplink ticks are read from the source
//! path, or silence when none is configured. The uplink must keep ticking
//! either way, because the radio expects a steady stream.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};

use crate::config::PCM_TICK_BYTES;

/// Cadence of uplink PCM ticks (1920 bytes each).
pub const PCM_TICK: Duration = Duration::from_millis(20);

const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// File-backed audio sink/source pair.
pub struct AudioPipe {
    running: Arc<AtomicBool>,
    play: Option<JoinHandle<()>>,
    rec: Option<JoinHandle<()>>,
}

impl AudioPipe {
    /// Start the two pump threads. Missing paths mean: discard downlink,
    /// send silence uplink.
    pub fn spawn(
        play_rx: Receiver<Vec<u8>>,
        rec_tx: Sender<Vec<u8>>,
        sink: Option<PathBuf>,
        source: Option<PathBuf>,
    ) -> io::Result<Self> {
        let sink_file = sink.map(File::create).transpose()?;
        let source_file = source.map(File::open).transpose()?;
        let running = Arc::new(AtomicBool::new(true));

        let play = {
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name("rig-audio-play".to_string())
                .spawn(move || play_loop(&play_rx, sink_file, &running))?
        };
        let rec = {
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name("rig-audio-rec".to_string())
                .spawn(move || rec_loop(&rec_tx, source_file, &running))?
        };

        Ok(Self {
            running,
            play: Some(play),
            rec: Some(rec),
        })
    }
}

impl Drop for AudioPipe {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        for join in [self.play.take(), self.rec.take()].into_iter().flatten() {
            let _ = join.join();
        }
    }
}

fn play_loop(play_rx: &Receiver<Vec<u8>>, mut sink: Option<File>, running: &AtomicBool) {
    while running.load(Ordering::Relaxed) {
        match play_rx.recv_timeout(SHUTDOWN_POLL) {
            Ok(pcm) => {
                let failed = match sink.as_mut() {
                    Some(file) => match file.write_all(&pcm) {
                        Ok(()) => false,
                        Err(err) => {
                            log::error!("[audio] sink write failed: {}", err);
                            true
                        }
                    },
                    None => false,
                };
                if failed {
                    sink = None;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn rec_loop(rec_tx: &Sender<Vec<u8>>, mut source: Option<File>, running: &AtomicBool) {
    let mut chunk = vec![0u8; PCM_TICK_BYTES];
    while running.load(Ordering::Relaxed) {
        std::thread::sleep(PCM_TICK);
        let exhausted = match source.as_mut() {
            Some(file) => match file.read_exact(&mut chunk) {
                Ok(()) => false,
                Err(err) => {
                    if err.kind() == io::ErrorKind::UnexpectedEof {
                        log::info!("[audio] source exhausted, switching to silence");
                    } else {
                        log::error!("[audio] source read failed: {}", err);
                    }
                    true
                }
            },
            None => {
                chunk.fill(0);
                false
            }
        };
        if exhausted {
            source = None;
            chunk.fill(0);
        }
        // Dropped when no session is consuming; the channel is bounded.
        let _ = rec_tx.try_send(chunk.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{bounded, unbounded};

    #[test]
    fn test_silence_ticks_without_source() {
        let (_play_tx, play_rx) = unbounded();
        let (rec_tx, rec_rx) = bounded(8);
        let _pipe = AudioPipe::spawn(play_rx, rec_tx, None, None).expect("spawn");

        let tick = rec_rx.recv_timeout(Duration::from_secs(2)).expect("tick");
        assert_eq!(tick.len(), PCM_TICK_BYTES);
        assert!(tick.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_downlink_lands_in_sink_file() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("rigbridge-pcm-{}.raw", std::process::id()));
        let (play_tx, play_rx) = unbounded();
        let (rec_tx, _rec_rx) = bounded(8);
        let pipe = AudioPipe::spawn(play_rx, rec_tx, Some(path.clone()), None).expect("spawn");

        play_tx.send(vec![0x11, 0x22, 0x33]).unwrap();
        std::thread::sleep(Duration::from_millis(300));
        drop(pipe);

        let written = std::fs::read(&path).expect("read sink");
        let _ = std::fs::remove_file(&path);
        assert_eq!(written, vec![0x11, 0x22, 0x33]);
    }
}
