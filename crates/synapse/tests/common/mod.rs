#![allow(dead_code)]

use std::io;
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use synapse::{ClientConfig, ControlEvent, PunchTiming, SynapseClient};
use tungstenite::Message;
use tungstenite::protocol::frame::Frame;
use tungstenite::handshake::server::{Request, Response};

pub enum Command {
    Binary(Vec<u8>),
    Frame(Frame),
    Text(String),
    Close,
}

/// Scripted signaling server: records each upgrade URI and pushes queued
/// frames to whichever client is currently connected.
pub struct FakeSignaling {
    pub port: u16,
    commands: Sender<Command>,
    uris: Receiver<String>,
    pings: Arc<AtomicU32>,
}

impl FakeSignaling {
    pub fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (commands, command_rx) = mpsc::channel::<Command>();
        let (uri_tx, uris) = mpsc::channel::<String>();
        let pings = Arc::new(AtomicU32::new(0));
        let ping_count = Arc::clone(&pings);

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };

                let uri_tx = uri_tx.clone();
                let callback = move |req: &Request, resp: Response| {
                    let _ = uri_tx.send(req.uri().to_string());
                    Ok(resp)
                };
                let Ok(mut ws) = tungstenite::accept_hdr(stream, callback) else {
                    continue;
                };
                ws.get_ref()
                    .set_read_timeout(Some(Duration::from_millis(5)))
                    .unwrap();

                'session: loop {
                    while let Ok(command) = command_rx.try_recv() {
                        let sent = match command {
                            Command::Binary(frame) => ws.send(Message::Binary(frame.into())),
                            Command::Text(text) => ws.send(Message::Text(text.into())),
                            Command::Frame(frame) => ws.send(Message::Frame(frame)),
                            Command::Close => {
                                let _ = ws.close(None);
                                let deadline = Instant::now() + Duration::from_millis(500);
                                while Instant::now() < deadline {
                                    match ws.read() {
                                        Ok(_) => {}
                                        Err(tungstenite::Error::Io(ref e))
                                            if matches!(
                                                e.kind(),
                                                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                                            ) => {}
                                        Err(_) => break,
                                    }
                                }
                                break 'session;
                            }
                        };
                        if sent.is_err() {
                            break 'session;
                        }
                    }

                    match ws.read() {
                        Ok(Message::Close(_)) => {
                            let _ = ws.flush();
                            break;
                        }
                        Ok(Message::Ping(_)) => {
                            ping_count.fetch_add(1, Ordering::SeqCst);
                        }
                        Ok(_) => {}
                        Err(tungstenite::Error::Io(ref e))
                            if matches!(
                                e.kind(),
                                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                            ) => {}
                        Err(_) => break,
                    }
                }
            }
        });

        Self {
            port,
            commands,
            uris,
            pings,
        }
    }

    pub fn send_event(&self, event: ControlEvent) {
        self.send_frame(event.encode());
    }

    pub fn send_frame(&self, frame: Vec<u8>) {
        self.commands.send(Command::Binary(frame)).unwrap();
    }

    pub fn send_text(&self, text: &str) {
        self.commands.send(Command::Text(text.to_string())).unwrap();
    }

    pub fn send_raw(&self, frame: Frame) {
        self.commands.send(Command::Frame(frame)).unwrap();
    }

    pub fn close(&self) {
        self.commands.send(Command::Close).unwrap();
    }

    pub fn pings(&self) -> u32 {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn next_uri(&self) -> String {
        self.uris
            .recv_timeout(Duration::from_secs(2))
            .expect("no upgrade request reached the signaling server")
    }
}

/// Scripted punch coordinator answering every announcement with `reply`.
pub struct FakeCoordinator {
    pub port: u16,
    reply: Arc<Mutex<Vec<u8>>>,
    announcements: Arc<AtomicU32>,
    last_request: Arc<Mutex<Vec<u8>>>,
    stop: Arc<AtomicBool>,
}

impl FakeCoordinator {
    pub fn spawn(reply: Vec<u8>) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(5)))
            .unwrap();
        let port = socket.local_addr().unwrap().port();

        let reply = Arc::new(Mutex::new(reply));
        let announcements = Arc::new(AtomicU32::new(0));
        let last_request = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        {
            let reply = Arc::clone(&reply);
            let announcements = Arc::clone(&announcements);
            let last_request = Arc::clone(&last_request);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut buf = [0u8; 64];
                while !stop.load(Ordering::SeqCst) {
                    let Ok((n, from)) = socket.recv_from(&mut buf) else {
                        continue;
                    };
                    announcements.fetch_add(1, Ordering::SeqCst);
                    *last_request.lock().unwrap() = buf[..n].to_vec();

                    let reply = reply.lock().unwrap().clone();
                    if !reply.is_empty() {
                        let _ = socket.send_to(&reply, from);
                    }
                }
            });
        }

        Self {
            port,
            reply,
            announcements,
            last_request,
            stop,
        }
    }

    pub fn set_reply(&self, reply: Vec<u8>) {
        *self.reply.lock().unwrap() = reply;
    }

    pub fn announcements(&self) -> u32 {
        self.announcements.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Vec<u8> {
        self.last_request.lock().unwrap().clone()
    }
}

impl Drop for FakeCoordinator {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

pub fn fast_timing() -> PunchTiming {
    PunchTiming {
        recv_timeout: Duration::from_millis(40),
        send_interval: Duration::from_millis(10),
    }
}

pub fn config_for(signaling: &FakeSignaling, punch_port: u16, relay_port: u16) -> ClientConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    ClientConfig::new("127.0.0.1")
        .with_ports(signaling.port, punch_port, relay_port)
        .with_punch_timing(fast_timing())
}

pub fn client_for(signaling: &FakeSignaling, punch_port: u16, relay_port: u16) -> SynapseClient {
    SynapseClient::new(config_for(signaling, punch_port, relay_port)).unwrap()
}

/// Polls until the control link finishes connecting and both handshakes.
pub fn open_link(client: &mut SynapseClient) -> Vec<ControlEvent> {
    let mut events = Vec::new();
    assert!(wait_for(|| {
        events.extend(client.poll_events().unwrap());
        client.is_control_open()
    }));
    events
}

pub fn poll_until(client: &mut SynapseClient, count: usize) -> Vec<ControlEvent> {
    let start = Instant::now();
    let mut events = Vec::new();
    while events.len() < count && start.elapsed() < Duration::from_secs(2) {
        events.extend(client.poll_events().unwrap());
        thread::sleep(Duration::from_millis(1));
    }
    events
}

pub fn wait_for<F: FnMut() -> bool>(mut condition: F) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(2) {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

pub fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}
