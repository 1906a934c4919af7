// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rigbridge project

//! Session counters and the periodic status line.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Shared per-session counters, updated by the stream loops.
#[derive(Debug, Default)]
pub struct Stats {
    pub audio_frames_up: AtomicU64,
    pub audio_frames_down: AtomicU64,
    pub audio_packets_lost: AtomicU64,
    pub audio_retransmit_requests: AtomicU64,
    pub serial_frames_up: AtomicU64,
    pub serial_frames_down: AtomicU64,
    pub serial_bytes_up: AtomicU64,
    pub serial_bytes_down: AtomicU64,
    pub serial_packets_lost: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Snapshot {
    pub audio_frames_up: u64,
    pub audio_frames_down: u64,
    pub audio_packets_lost: u64,
    pub audio_retransmit_requests: u64,
    pub serial_frames_up: u64,
    pub serial_frames_down: u64,
    pub serial_bytes_up: u64,
    pub serial_bytes_down: u64,
    pub serial_packets_lost: u64,
}

impl Stats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            audio_frames_up: self.audio_frames_up.load(Ordering::Relaxed),
            audio_frames_down: self.audio_frames_down.load(Ordering::Relaxed),
            audio_packets_lost: self.audio_packets_lost.load(Ordering::Relaxed),
            audio_retransmit_requests: self.audio_retransmit_requests.load(Ordering::Relaxed),
            serial_frames_up: self.serial_frames_up.load(Ordering::Relaxed),
            serial_frames_down: self.serial_frames_down.load(Ordering::Relaxed),
            serial_bytes_up: self.serial_bytes_up.load(Ordering::Relaxed),
            serial_bytes_down: self.serial_bytes_down.load(Ordering::Relaxed),
            serial_packets_lost: self.serial_packets_lost.load(Ordering::Relaxed),
        }
    }
}

/// Periodic status line, running only while a session is up. Quiet when
/// nothing changed since the previous interval.
pub struct StatusMonitor {
    running: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl StatusMonitor {
    pub fn start(stats: Arc<Stats>, interval: Duration) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let join = std::thread::Builder::new()
            .name("rig-status".to_string())
            .spawn(move || {
                let mut last = stats.snapshot();
                while flag.load(Ordering::Relaxed) {
                    std::thread::sleep(interval);
                    let cur = stats.snapshot();
                    if cur == last {
                        continue;
                    }
                    log::info!(
                        "[status] audio rx {} tx {} lost {} | serial rx {}B tx {}B lost {}",
                        cur.audio_frames_down - last.audio_frames_down,
                        cur.audio_frames_up - last.audio_frames_up,
                        cur.audio_packets_lost,
                        cur.serial_bytes_down - last.serial_bytes_down,
                        cur.serial_bytes_up - last.serial_bytes_up,
                        cur.serial_packets_lost,
                    );
                    last = cur;
                }
            })?;
        Ok(Self {
            running,
            join: Some(join),
        })
    }

    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for StatusMonitor {
    fn drop(&mut self) {
        self.stop_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = Stats::new();
        stats.audio_frames_up.fetch_add(4, Ordering::Relaxed);
        stats.serial_bytes_down.fetch_add(123, Ordering::Relaxed);
        let snap = stats.snapshot();
        assert_eq!(snap.audio_frames_up, 4);
        assert_eq!(snap.serial_bytes_down, 123);
        assert_eq!(snap.audio_frames_down, 0);
    }

    #[test]
    fn test_status_monitor_stops_promptly() {
        let monitor = StatusMonitor::start(Stats::new(), Duration::from_millis(10)).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        monitor.stop();
    }
}
