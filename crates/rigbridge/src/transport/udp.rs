// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rigbridge project

//! Datagram endpoint for one protocol stream.
//!
//! Each stream owns exactly one UDP socket, bound to the same local port as
//! the remote port: the radio rejects asymmetric port pairs. A dedicated
//! reader thread pumps datagrams into an inbound channel, classifying
//! keepalive pings onto their own lane so they never reach session handlers.

use crossbeam::channel::{unbounded, Receiver, Sender};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::MAX_DATAGRAM_SIZE;
use crate::wire;

/// Read deadline of the reader thread. Bounds how long a shutdown can block.
const READ_DEADLINE: Duration = Duration::from_millis(500);

/// One received datagram, pre-classified by the reader thread.
#[derive(Debug)]
pub enum Inbound {
    /// An ordinary protocol frame.
    Frame(Vec<u8>),
    /// A keepalive ping; handled by the stream core, invisible above it.
    Ping(Vec<u8>),
    /// The socket failed with something other than a timeout.
    Failed(io::Error),
}

/// UDP endpoint of one stream.
pub struct UdpEndpoint {
    socket: Arc<UdpSocket>,
    local_sid: u32,
    rx: Receiver<Inbound>,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl UdpEndpoint {
    /// Open a socket towards `host:remote_port`, binding the matching local
    /// port (`local_port` overrides for tests), and start the reader thread.
    pub fn open(
        name: &'static str,
        host: &str,
        remote_port: u16,
        local_port: Option<u16>,
    ) -> io::Result<Self> {
        let remote = resolve(host, remote_port)?;
        let bind_port = local_port.unwrap_or(remote_port);

        let raw = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        raw.set_reuse_address(true)?;
        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, bind_port));
        raw.bind(&bind_addr.into())?;

        let socket: UdpSocket = raw.into();
        socket.connect(remote)?;
        socket.set_read_timeout(Some(READ_DEADLINE))?;

        let local_sid = wire::local_sid(socket.local_addr()?);
        log::debug!(
            "[{}] connected to {}, using session id {:08x}",
            name,
            remote,
            local_sid
        );

        let socket = Arc::new(socket);
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = unbounded();

        let reader = {
            let socket = Arc::clone(&socket);
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name(format!("rig-{}-rx", name))
                .spawn(move || reader_loop(&socket, &tx, &running, name))?
        };

        Ok(Self {
            socket,
            local_sid,
            rx,
            running,
            reader: Some(reader),
        })
    }

    /// Send one frame. Any error here is fatal to the stream.
    pub fn send(&self, frame: &[u8]) -> io::Result<()> {
        self.socket.send(frame).map(|_| ())
    }

    /// Inbound queue fed by the reader thread.
    pub fn inbound(&self) -> &Receiver<Inbound> {
        &self.rx
    }

    /// Session ID derived from the socket's local address at open time.
    pub fn local_sid(&self) -> u32 {
        self.local_sid
    }

    /// Local socket address (concrete after connect).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Drop for UdpEndpoint {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(reader) = self.reader.take() {
            // The reader wakes within READ_DEADLINE and observes the flag.
            let _ = reader.join();
        }
    }
}

fn reader_loop(
    socket: &UdpSocket,
    tx: &Sender<Inbound>,
    running: &AtomicBool,
    name: &'static str,
) {
    let mut buf = [0u8; MAX_DATAGRAM_SIZE];
    while running.load(Ordering::Relaxed) {
        match socket.recv(&mut buf) {
            Ok(n) => {
                let frame = buf[..n].to_vec();
                let msg = if wire::is_ping(&frame) {
                    Inbound::Ping(frame)
                } else {
                    Inbound::Frame(frame)
                };
                if tx.send(msg).is_err() {
                    break;
                }
            }
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(err) => {
                if running.load(Ordering::Relaxed) {
                    let _ = tx.send(Inbound::Failed(err));
                }
                break;
            }
        }
    }
    log::debug!("[{}] reader stopped", name);
}

fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no IPv4 address for {}", host),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fake_radio() -> (UdpSocket, u16) {
        let sock = UdpSocket::bind("127.0.0.1:0").expect("bind radio");
        let port = sock.local_addr().unwrap().port();
        (sock, port)
    }

    #[test]
    fn test_open_and_send() {
        let (radio, port) = fake_radio();
        let ep = UdpEndpoint::open("test", "127.0.0.1", port, Some(0)).expect("open");
        assert_ne!(ep.local_sid() & 0xffff, 0);

        ep.send(&[1, 2, 3]).expect("send");
        let mut buf = [0u8; 64];
        radio.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let (n, _) = radio.recv_from(&mut buf).expect("radio recv");
        assert_eq!(&buf[..n], &[1, 2, 3]);
    }

    #[test]
    fn test_reader_classifies_pings() {
        let (radio, port) = fake_radio();
        let ep = UdpEndpoint::open("test", "127.0.0.1", port, Some(0)).expect("open");

        // The radio learns our address from the first datagram.
        ep.send(&[0xab]).expect("send");
        let mut buf = [0u8; 64];
        radio.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let (_, peer) = radio.recv_from(&mut buf).expect("radio recv");

        let ping = wire::ping_request(7, [1, 2, 0x10, 0x00], 0xdead_beef, ep.local_sid());
        radio.send_to(&ping, peer).expect("radio send ping");
        radio.send_to(&[0x10; 16], peer).expect("radio send frame");

        match ep.inbound().recv_timeout(Duration::from_secs(2)).unwrap() {
            Inbound::Ping(p) => assert!(wire::is_ping(&p)),
            other => panic!("expected ping, got {:?}", other),
        }
        match ep.inbound().recv_timeout(Duration::from_secs(2)).unwrap() {
            Inbound::Frame(f) => assert_eq!(f.len(), 16),
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[test]
    fn test_drop_stops_reader() {
        let (_radio, port) = fake_radio();
        let ep = UdpEndpoint::open("test", "127.0.0.1", port, Some(0)).expect("open");
        drop(ep); // must not hang longer than the read deadline
    }
}
