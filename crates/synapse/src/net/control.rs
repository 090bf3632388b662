use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::pki_types::ServerName;
use rustls::{ClientConnection, RootCertStore, StreamOwned};
use socket2::{Domain, Protocol, Socket, Type};
use tungstenite::client::IntoClientRequest;
use tungstenite::error::{CapacityError, ProtocolError, TlsError};
use tungstenite::handshake::client::{Response, generate_request};
use tungstenite::handshake::derive_accept_key;
use tungstenite::handshake::machine::{HandshakeMachine, RoundResult, StageResult};
use tungstenite::http::StatusCode;
use tungstenite::protocol::frame::coding::{Control, Data, OpCode};
use tungstenite::protocol::frame::{Frame, FrameSocket};
use tungstenite::stream::MaybeTlsStream;
use uuid::Uuid;

use crate::error::{Result, SessionError};

use super::protocol::{CONTROL_FRAME_LIMIT, ControlEvent};

type ControlStream = MaybeTlsStream<TcpStream>;

enum Link {
    Connecting(TcpStream),
    Handshaking(HandshakeMachine<ControlStream>),
    Open(FrameSocket<ControlStream>),
    Closed,
}

enum Drain {
    Idle,
    Closed,
}

/// Persistent WebSocket link to the signaling server.
///
/// Nothing here waits on the network. The TCP connect, the TLS and WebSocket
/// handshakes, frame reads and keepalive pings all progress only when
/// [`ControlChannel::poll`] is called. Frames are read one at a time so a
/// fragmented message is rejected instead of being reassembled.
pub struct ControlChannel {
    url: String,
    tls_domain: Option<String>,
    request: Vec<u8>,
    accept_key: String,
    deadline: Instant,
    keepalive: Option<Duration>,
    last_ping: Instant,
    link: Link,
    failure: Option<SessionError>,
}

impl ControlChannel {
    pub fn connect(
        url: String,
        addr: SocketAddr,
        timeout: Duration,
        keepalive: Option<Duration>,
    ) -> Result<Self> {
        let request = url.as_str().into_client_request()?;
        let tls_domain = match request.uri().scheme_str() {
            Some("wss") => request
                .uri()
                .host()
                .map(|host| host.trim_start_matches('[').trim_end_matches(']').to_string()),
            _ => None,
        };
        let (request, key) = generate_request(request)?;

        log::info!("Opening control link {} via {}", url, addr);

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        match socket.connect(&addr.into()) {
            Ok(()) => {}
            Err(ref e) if connect_in_progress(e) => {}
            Err(e) => return Err(e.into()),
        }
        let stream: TcpStream = socket.into();
        stream.set_nodelay(true)?;

        let now = Instant::now();
        let mut channel = Self {
            url,
            tls_domain,
            request,
            accept_key: derive_accept_key(key.as_bytes()),
            deadline: now + timeout,
            keepalive,
            last_ping: now,
            link: Link::Connecting(stream),
            failure: None,
        };
        channel.advance(now)?;
        Ok(channel)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_open(&self) -> bool {
        matches!(self.link, Link::Open(_))
    }

    /// True until the TCP connect and both handshakes have completed.
    pub fn is_handshaking(&self) -> bool {
        matches!(self.link, Link::Connecting(_) | Link::Handshaking(_))
    }

    /// Returns the events whose frames have fully arrived, never waiting for more.
    ///
    /// A failure found after some events were decoded is held back: those
    /// events are returned first and the failure surfaces on the next call.
    pub fn poll(&mut self) -> Result<Vec<ControlEvent>> {
        if let Some(e) = self.failure.take() {
            return Err(e);
        }

        let now = Instant::now();
        if self.is_handshaking() {
            self.advance(now)?;
        }

        let Link::Open(socket) = &mut self.link else {
            return Ok(Vec::new());
        };

        let mut events = Vec::new();
        match drain(socket, &mut events) {
            Ok(Drain::Idle) => {}
            Ok(Drain::Closed) => {
                self.link = Link::Closed;
                return Ok(events);
            }
            Err(e) => return self.fail(e, events),
        }

        if let Some(interval) = self.keepalive {
            if now.duration_since(self.last_ping) >= interval {
                if let Err(e) = socket.write(masked(Frame::ping(Vec::new()))) {
                    return self.fail(e.into(), events);
                }
                self.last_ping = now;
                log::debug!("Keepalive ping on {}", self.url);
            }
        }

        // Pongs and keepalive pings go out here.
        match socket.flush() {
            Ok(()) => {}
            Err(tungstenite::Error::Io(ref e)) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return self.fail(e.into(), events),
        }

        Ok(events)
    }

    pub fn close(&mut self) {
        self.failure = None;
        match std::mem::replace(&mut self.link, Link::Closed) {
            Link::Open(mut socket) => {
                if let Err(e) = socket
                    .write(masked(Frame::close(None)))
                    .and_then(|_| socket.flush())
                {
                    log::debug!("Control link close was not acknowledged: {}", e);
                }
                log::info!("Closed control link {}", self.url);
            }
            Link::Connecting(_) | Link::Handshaking(_) => {
                log::info!("Abandoned control link {} before it opened", self.url);
            }
            Link::Closed => {}
        }
    }

    fn fail(&mut self, e: SessionError, events: Vec<ControlEvent>) -> Result<Vec<ControlEvent>> {
        self.link = Link::Closed;
        if events.is_empty() {
            return Err(e);
        }
        log::debug!(
            "Control link failed after {} events, reporting on next poll: {}",
            events.len(),
            e
        );
        self.failure = Some(e);
        Ok(events)
    }

    fn advance(&mut self, now: Instant) -> Result<()> {
        loop {
            self.link = match std::mem::replace(&mut self.link, Link::Closed) {
                Link::Connecting(stream) => {
                    if let Some(e) = stream.take_error()? {
                        return Err(e.into());
                    }
                    match stream.peer_addr() {
                        Ok(_) => {
                            let stream = self.wrap_tls(stream)?;
                            let request = std::mem::take(&mut self.request);
                            Link::Handshaking(HandshakeMachine::start_write(stream, request))
                        }
                        Err(ref e) if e.kind() == io::ErrorKind::NotConnected => {
                            self.link = Link::Connecting(stream);
                            return self.check_deadline(now);
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Link::Handshaking(machine) => match machine.single_round::<Response>()? {
                    RoundResult::WouldBlock(machine) => {
                        self.link = Link::Handshaking(machine);
                        return self.check_deadline(now);
                    }
                    RoundResult::Incomplete(machine) => Link::Handshaking(machine),
                    RoundResult::StageFinished(StageResult::DoneWriting(stream)) => {
                        Link::Handshaking(HandshakeMachine::start_read(stream))
                    }
                    RoundResult::StageFinished(StageResult::DoneReading {
                        result,
                        stream,
                        tail,
                    }) => {
                        let response = self.verify(result)?;
                        log::info!("Control link established ({})", response.status());
                        self.last_ping = now;
                        self.link = Link::Open(FrameSocket::from_partially_read(stream, tail));
                        return Ok(());
                    }
                },
                other => {
                    self.link = other;
                    return Ok(());
                }
            };
        }
    }

    fn check_deadline(&self, now: Instant) -> Result<()> {
        if now < self.deadline {
            return Ok(());
        }
        Err(SessionError::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("control link {} not established in time", self.url),
        )))
    }

    fn verify(&self, response: Response) -> Result<Response> {
        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            return Err(tungstenite::Error::Http(response).into());
        }
        let accept = response
            .headers()
            .get("Sec-WebSocket-Accept")
            .and_then(|v| v.to_str().ok());
        if accept != Some(self.accept_key.as_str()) {
            return Err(
                tungstenite::Error::Protocol(ProtocolError::SecWebSocketAcceptKeyMismatch).into(),
            );
        }
        Ok(response)
    }

    fn wrap_tls(&self, stream: TcpStream) -> Result<ControlStream> {
        let Some(domain) = &self.tls_domain else {
            return Ok(MaybeTlsStream::Plain(stream));
        };

        let name = ServerName::try_from(domain.clone())
            .map_err(|_| tungstenite::Error::Tls(TlsError::InvalidDnsName))?;
        let connection = ClientConnection::new(tls_config(), name)
            .map_err(|e| tungstenite::Error::Tls(TlsError::Rustls(e)))?;
        Ok(MaybeTlsStream::Rustls(StreamOwned::new(connection, stream)))
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn drain(socket: &mut FrameSocket<ControlStream>, events: &mut Vec<ControlEvent>) -> Result<Drain> {
    loop {
        let frame = match socket.read(Some(CONTROL_FRAME_LIMIT)) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::info!("Control link closed without a close frame");
                return Ok(Drain::Closed);
            }
            Err(tungstenite::Error::Io(ref e)) if e.kind() == io::ErrorKind::WouldBlock => {
                return Ok(Drain::Idle);
            }
            Err(tungstenite::Error::Capacity(CapacityError::MessageTooLong { size, max_size })) => {
                return Err(SessionError::ProtocolViolation(format!(
                    "control message of {} bytes spans more than one read ({} max)",
                    size, max_size
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let header = frame.header();
        let (is_final, opcode) = (header.is_final, header.opcode);
        if header.mask.is_some() {
            return Err(SessionError::ProtocolViolation(String::from(
                "signaling server sent a masked frame",
            )));
        }

        match opcode {
            OpCode::Data(Data::Continue) => {
                return Err(SessionError::ProtocolViolation(String::from(
                    "control message continued in a second frame",
                )));
            }
            OpCode::Data(_) if !is_final => {
                return Err(SessionError::ProtocolViolation(format!(
                    "control message fragmented after {} bytes",
                    frame.len()
                )));
            }
            OpCode::Data(Data::Binary) => match ControlEvent::decode(frame.payload()) {
                Some(event) => {
                    log::debug!("Control event {:?}", event);
                    events.push(event);
                }
                None => log::debug!(
                    "Dropping undecodable control frame of {} bytes",
                    frame.len()
                ),
            },
            OpCode::Data(Data::Text) => {
                log::debug!("Ignoring text control frame of {} bytes", frame.len());
            }
            OpCode::Control(Control::Ping) => {
                socket.write(masked(Frame::pong(frame.into_payload())))?;
            }
            OpCode::Control(Control::Pong) => {}
            OpCode::Control(Control::Close) => {
                log::info!("Signaling server closed the control link");
                if let Err(e) = socket
                    .write(masked(Frame::close(None)))
                    .and_then(|_| socket.flush())
                {
                    log::debug!("Close reply not delivered: {}", e);
                }
                return Ok(Drain::Closed);
            }
            OpCode::Data(Data::Reserved(code)) | OpCode::Control(Control::Reserved(code)) => {
                return Err(SessionError::ProtocolViolation(format!(
                    "reserved opcode {:#x}",
                    code
                )));
            }
        }
    }
}

// Client frames must carry a fresh masking key.
fn masked(mut frame: Frame) -> Frame {
    let key = Uuid::new_v4().into_bytes();
    frame.header_mut().mask = Some([key[0], key[1], key[2], key[3]]);
    frame
}

fn connect_in_progress(e: &io::Error) -> bool {
    #[cfg(unix)]
    if e.raw_os_error() == Some(libc::EINPROGRESS) {
        return true;
    }
    e.kind() == io::ErrorKind::WouldBlock
}

fn tls_config() -> Arc<rustls::ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}
