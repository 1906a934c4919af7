// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 rigbridge project

//! rigbridge - bridge a network-attached Icom transceiver to local
//! endpoints: a TCP (and optional virtual) serial port plus raw PCM audio.

use std::io;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use crossbeam::channel::{bounded, unbounded};

use rigbridge::io::audio_pipe::AudioPipe;
use rigbridge::io::serial_tcp::SerialTcpServer;
#[cfg(unix)]
use rigbridge::io::virtual_serial::VirtualSerial;
use rigbridge::session::audio::AudioIo;
use rigbridge::session::serial::SerialIo;
use rigbridge::stats::{Stats, StatusMonitor};
use rigbridge::{supervisor, Config, SessionEvent};

/// Network client for wifi-capable Icom transceivers.
#[derive(Parser, Debug)]
#[command(name = "rigbridge", version)]
struct Args {
    /// Connect to address
    #[arg(short = 'a', long, default_value = "IC-705")]
    address: String,

    /// Expose the radio's serial port on this TCP port
    #[arg(short = 'p', long, default_value_t = 4533)]
    serial_tcp_port: u16,

    /// Expose the radio's serial port as a virtual serial port
    #[arg(short = 's', long)]
    enable_serial_device: bool,

    /// Exec cmd when connected, set to - to disable
    #[arg(short = 'r', long, default_value = "rigctld -m 3085 -r :4533")]
    run: String,

    /// Status log interval in milliseconds
    #[arg(short = 'i', long, default_value_t = 100)]
    log_interval: u64,

    /// Write downlink audio as raw PCM to this path
    #[arg(long)]
    audio_out: Option<PathBuf>,

    /// Read uplink audio as raw PCM from this path
    #[arg(long)]
    audio_in: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
    log::info!("rigbridge {}", env!("CARGO_PKG_VERSION"));

    if let Err(err) = run(args) {
        log::error!("{}", err);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let (shutdown_tx, shutdown_rx) = bounded(1);
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received");
        let _ = shutdown_tx.try_send(());
    })?;

    let cfg = Config {
        address: args.address.clone(),
        ..Config::default()
    };

    // Serial plumbing: engine -> fan-out -> TCP clients and the pty.
    let (serial_down_tx, serial_down_rx) = unbounded::<Vec<u8>>();
    let (serial_up_tx, serial_up_rx) = unbounded::<Vec<u8>>();
    let tcp = Arc::new(SerialTcpServer::spawn(
        args.serial_tcp_port,
        serial_up_tx.clone(),
    )?);

    #[cfg(unix)]
    let pty = if args.enable_serial_device {
        Some(Arc::new(VirtualSerial::open(serial_up_tx.clone())?))
    } else {
        None
    };
    #[cfg(not(unix))]
    if args.enable_serial_device {
        log::warn!("virtual serial device is only available on unix");
    }

    {
        let tcp = Arc::clone(&tcp);
        #[cfg(unix)]
        let pty = pty.clone();
        std::thread::Builder::new()
            .name("rig-serial-fanout".to_string())
            .spawn(move || {
                for bytes in serial_down_rx.iter() {
                    tcp.broadcast(&bytes);
                    #[cfg(unix)]
                    if let Some(pty) = &pty {
                        if let Err(err) = pty.write(&bytes) {
                            log::debug!("pty write failed: {}", err);
                        }
                    }
                }
            })?;
    }

    // Audio plumbing. The rec channel is bounded so PCM ticks are dropped
    // instead of piling up while no session is consuming them.
    let (play_tx, play_rx) = unbounded::<Vec<u8>>();
    let (rec_tx, rec_rx) = bounded::<Vec<u8>>(8);
    let _audio_pipe = AudioPipe::spawn(play_rx, rec_tx, args.audio_out.clone(), args.audio_in.clone())?;

    // Session events: start the status line and the child command once the
    // radio grants the streams.
    let (events_tx, events_rx) = unbounded::<SessionEvent>();
    let stats = Stats::new();
    let child: Arc<Mutex<Option<Child>>> = Arc::new(Mutex::new(None));
    {
        let stats = Arc::clone(&stats);
        let child = Arc::clone(&child);
        let run_cmd = args.run.clone();
        let interval = Duration::from_millis(args.log_interval.max(1));
        std::thread::Builder::new()
            .name("rig-events".to_string())
            .spawn(move || {
                let mut monitor: Option<StatusMonitor> = None;
                let mut launched = false;
                for event in events_rx.iter() {
                    match event {
                        SessionEvent::Up { device_name } => {
                            log::info!("connected to {}", device_name);
                            if monitor.is_none() {
                                match StatusMonitor::start(Arc::clone(&stats), interval) {
                                    Ok(started) => monitor = Some(started),
                                    Err(err) => log::error!("status monitor: {}", err),
                                }
                            }
                            if !launched && run_cmd != "-" {
                                launched = true;
                                match spawn_child(&run_cmd) {
                                    Ok(c) => *child.lock().unwrap() = Some(c),
                                    Err(err) => {
                                        log::error!("failed to run '{}': {}", run_cmd, err);
                                    }
                                }
                            }
                        }
                        SessionEvent::Down => {
                            monitor.take();
                        }
                    }
                }
            })?;
    }

    let serial_io = SerialIo {
        downlink: serial_down_tx,
        uplink: serial_up_rx,
    };
    let audio_io = AudioIo {
        play: play_tx,
        rec: rec_rx,
    };

    let result = supervisor::run(&cfg, &shutdown_rx, &events_tx, &serial_io, &audio_io, &stats);

    if let Some(mut c) = child.lock().unwrap().take() {
        let _ = c.kill();
        let _ = c.wait();
    }
    log::info!("exiting");
    result.map_err(Into::into)
}

fn spawn_child(cmd: &str) -> io::Result<Child> {
    let mut parts = cmd.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;
    log::info!("running: {}", cmd);
    Command::new(program).args(parts).spawn()
}
