// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rigbridge project

//! TCP republisher for the radio's serial port.
//!
//! Every connected client receives all downlink bytes; bytes written by any
//! client are forwarded to the serial uplink. rigctld and friends connect
//! here.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::Sender;
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

const ACCEPT_POLL: Duration = Duration::from_millis(100);
const CLIENT_READ_DEADLINE: Duration = Duration::from_millis(200);

/// Listening TCP server holding the connected client set.
pub struct SerialTcpServer {
    running: Arc<AtomicBool>,
    clients: Arc<Mutex<Vec<TcpStream>>>,
    accept: Option<JoinHandle<()>>,
    port: u16,
}

impl SerialTcpServer {
    /// Bind and start accepting. Port 0 picks an ephemeral port.
    pub fn spawn(port: u16, uplink: Sender<Vec<u8>>) -> io::Result<Self> {
        let raw = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        raw.set_reuse_address(true)?;
        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        raw.bind(&bind_addr.into())?;
        raw.listen(8)?;
        let listener: TcpListener = raw.into();
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();
        log::info!("[serialtcp] listening on port {}", port);

        let running = Arc::new(AtomicBool::new(true));
        let clients = Arc::new(Mutex::new(Vec::new()));

        let accept = {
            let running = Arc::clone(&running);
            let clients = Arc::clone(&clients);
            std::thread::Builder::new()
                .name("rig-serialtcp".to_string())
                .spawn(move || accept_loop(&listener, &running, &clients, &uplink))?
        };

        Ok(Self {
            running,
            clients,
            accept: Some(accept),
            port,
        })
    }

    /// Port actually bound (useful with port 0).
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Push downlink bytes to every connected client; dead clients are
    /// dropped on write failure.
    pub fn broadcast(&self, bytes: &[u8]) {
        let mut clients = self.clients.lock();
        clients.retain_mut(|client| match client.write_all(bytes) {
            Ok(()) => true,
            Err(err) => {
                log::info!("[serialtcp] dropping client: {}", err);
                false
            }
        });
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(accept) = self.accept.take() {
            let _ = accept.join();
        }
        self.clients.lock().clear();
    }
}

impl Drop for SerialTcpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: &TcpListener,
    running: &Arc<AtomicBool>,
    clients: &Arc<Mutex<Vec<TcpStream>>>,
    uplink: &Sender<Vec<u8>>,
) {
    while running.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                log::info!("[serialtcp] client connected: {}", peer);
                let _ = stream.set_nodelay(true);
                let reader = match stream.try_clone() {
                    Ok(reader) => reader,
                    Err(err) => {
                        log::error!("[serialtcp] clone failed: {}", err);
                        continue;
                    }
                };
                let _ = reader.set_read_timeout(Some(CLIENT_READ_DEADLINE));
                clients.lock().push(stream);

                let running = Arc::clone(running);
                let uplink = uplink.clone();
                let _ = std::thread::Builder::new()
                    .name("rig-serialtcp-client".to_string())
                    .spawn(move || client_loop(reader, &running, &uplink, peer));
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(err) => {
                log::error!("[serialtcp] accept failed: {}", err);
                break;
            }
        }
    }
}

fn client_loop(
    mut reader: TcpStream,
    running: &AtomicBool,
    uplink: &Sender<Vec<u8>>,
    peer: SocketAddr,
) {
    let mut buf = [0u8; 1024];
    while running.load(Ordering::Relaxed) {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let _ = uplink.send(buf[..n].to_vec());
            }
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(_) => break,
        }
    }
    log::info!("[serialtcp] client disconnected: {}", peer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;

    #[test]
    fn test_roundtrip_through_server() {
        let (uplink_tx, uplink_rx) = unbounded();
        let server = SerialTcpServer::spawn(0, uplink_tx).expect("spawn");

        let mut client =
            TcpStream::connect(("127.0.0.1", server.port())).expect("connect client");
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        // Client bytes reach the uplink channel.
        client.write_all(&[0xfe, 0xfe, 0xfd]).unwrap();
        let got = uplink_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(got, vec![0xfe, 0xfe, 0xfd]);

        // Broadcast bytes reach the client. The accept loop may still be
        // registering the connection, so retry briefly.
        let mut buf = [0u8; 16];
        let mut n = 0;
        for _ in 0..20 {
            server.broadcast(&[1, 2, 3]);
            match client.read(&mut buf) {
                Ok(count) if count > 0 => {
                    n = count;
                    break;
                }
                _ => std::thread::sleep(Duration::from_millis(50)),
            }
        }
        assert!(n >= 1, "no broadcast bytes arrived");
        assert_eq!(buf[0], 1);
    }
}
