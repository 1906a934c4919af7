// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rigbridge project

//! Virtual serial device backed by a pseudo-terminal.
//!
//! Programs that insist on a device file (instead of the TCP republisher)
//! open the slave side; the bridge reads and writes the master. Only built
//! on unix.

use std::ffi::CStr;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::Sender;

/// Poll timeout of the master reader; bounds shutdown latency.
const POLL_TIMEOUT_MS: libc::c_int = 200;
/// Backoff while no process holds the slave side open.
const IDLE_BACKOFF: Duration = Duration::from_millis(200);

/// Pseudo-terminal master with a reader thread feeding the serial uplink.
pub struct VirtualSerial {
    fd: libc::c_int,
    /// Path of the slave device to hand to local programs.
    pub path: String,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl VirtualSerial {
    /// Allocate the PTY pair and start the reader.
    pub fn open(uplink: Sender<Vec<u8>>) -> io::Result<Self> {
        // SAFETY: plain libc PTY allocation; fd validity is checked after
        // every call and the fd is closed on each error path.
        let fd = unsafe { libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        if unsafe { libc::grantpt(fd) } != 0 || unsafe { libc::unlockpt(fd) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }

        // Raw line discipline: no echo, no canonical buffering.
        // SAFETY: termios is fully initialised by tcgetattr before use.
        unsafe {
            let mut termios: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(fd, &mut termios) == 0 {
                libc::cfmakeraw(&mut termios);
                libc::tcsetattr(fd, libc::TCSANOW, &termios);
            }
        }

        let mut name = [0 as libc::c_char; 128];
        if unsafe { libc::ptsname_r(fd, name.as_mut_ptr(), name.len()) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }
        // SAFETY: ptsname_r NUL-terminates on success.
        let path = unsafe { CStr::from_ptr(name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        log::info!("[serialport] virtual serial port at {}", path);

        let running = Arc::new(AtomicBool::new(true));
        let reader = {
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name("rig-pty-rx".to_string())
                .spawn(move || reader_loop(fd, &running, &uplink))?
        };

        Ok(Self {
            fd,
            path,
            running,
            reader: Some(reader),
        })
    }

    /// Write downlink bytes to the master side.
    pub fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let mut written = 0;
        while written < bytes.len() {
            let rest = &bytes[written..];
            // SAFETY: valid fd, in-bounds buffer pointer and length.
            let n = unsafe { libc::write(self.fd, rest.as_ptr().cast(), rest.len()) };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock || err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            written += n as usize;
        }
        Ok(())
    }
}

impl Drop for VirtualSerial {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        // SAFETY: fd is ours and no longer used by the reader.
        unsafe { libc::close(self.fd) };
    }
}

fn reader_loop(fd: libc::c_int, running: &AtomicBool, uplink: &Sender<Vec<u8>>) {
    let mut buf = [0u8; 1024];
    while running.load(Ordering::Relaxed) {
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: pfd points at a valid pollfd for the duration of the call.
        let ready = unsafe { libc::poll(&mut pfd, 1, POLL_TIMEOUT_MS) };
        if ready <= 0 {
            continue;
        }
        if pfd.revents & libc::POLLIN == 0 {
            // POLLHUP while no process has the slave open; avoid spinning.
            std::thread::sleep(IDLE_BACKOFF);
            continue;
        }
        // SAFETY: valid fd and buffer.
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n > 0 {
            let _ = uplink.send(buf[..n as usize].to_vec());
        } else {
            // EIO after the slave closed; wait for the next opener.
            std::thread::sleep(IDLE_BACKOFF);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;
    use std::fs::OpenOptions;
    use std::io::{Read, Write};

    #[test]
    fn test_pty_roundtrip() {
        let (uplink_tx, uplink_rx) = unbounded();
        let pty = VirtualSerial::open(uplink_tx).expect("open pty");
        assert!(pty.path.starts_with("/dev/"));

        let mut slave = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&pty.path)
            .expect("open slave side");

        // Master → slave.
        pty.write(&[0xfe, 0xfd]).expect("master write");
        let mut buf = [0u8; 8];
        let n = slave.read(&mut buf).expect("slave read");
        assert!(n >= 1);
        assert_eq!(buf[0], 0xfe);

        // Slave → uplink channel.
        slave.write_all(&[0x42]).expect("slave write");
        let got = uplink_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("uplink bytes");
        assert!(got.contains(&0x42));
    }
}
