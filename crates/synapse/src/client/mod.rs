mod state;

pub use state::ClientState;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{ClientConfig, PeerRoute, resolve_host};
use crate::error::{ExpectedStates, Result, SessionError};
use crate::identity::ClientIdentity;
use crate::net::{
    ClientHandle, ControlChannel, ControlEvent, DatagramSocket, PeerEndpoint, PunchAttempt,
    PunchStatus, RoomId, SendReport, TransportStats,
};

const RESOLVE_POLL_INTERVAL: Duration = Duration::from_millis(2);

const LIVE_STATES: &[ClientState] = &[
    ClientState::Initialized,
    ClientState::Matchmaking,
    ClientState::MatchmakingReady,
    ClientState::MatchmakingFinished,
    ClientState::Connected,
];
const MATCHMAKING_STATES: &[ClientState] = &[ClientState::Matchmaking, ClientState::MatchmakingReady];
const CONNECTED_STATES: &[ClientState] = &[ClientState::Connected];

/// Shared flag used to abort [`SynapseClient::resolve_peer_endpoint`] from
/// another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Session-establishment client: matchmaking over the control link, NAT
/// traversal through the punch coordinator, then unreliable datagrams to the
/// peer (or relay). Every method returns without waiting on the network,
/// except [`SynapseClient::resolve_peer_endpoint`] and the bounded TCP connect
/// in [`SynapseClient::create_room`] / [`SynapseClient::join_room`].
pub struct SynapseClient {
    config: ClientConfig,
    identity: ClientIdentity,
    state: ClientState,
    control_addr: SocketAddr,
    punch_addr: SocketAddr,
    relay_addr: SocketAddr,
    socket: Option<DatagramSocket>,
    control: Option<ControlChannel>,
    punch: Option<PunchAttempt>,
    room_id: Option<RoomId>,
    handle: Option<ClientHandle>,
    peer_handle: Option<ClientHandle>,
    peer_endpoint: Option<PeerEndpoint>,
}

impl SynapseClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let server_ip = resolve_host(&config.host)?;
        let identity = config.identity.unwrap_or_else(ClientIdentity::generate);

        let unspecified = match server_ip {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let socket = DatagramSocket::bind(SocketAddr::new(unspecified, config.local_udp_port))?;

        log::info!(
            "Client {} using server {} (control {}, punch {}, relay {})",
            identity,
            server_ip,
            config.control_port,
            config.punch_port,
            config.relay_port
        );

        Ok(Self {
            control_addr: SocketAddr::new(server_ip, config.control_port),
            punch_addr: SocketAddr::new(server_ip, config.punch_port),
            relay_addr: SocketAddr::new(server_ip, config.relay_port),
            identity,
            state: ClientState::Initialized,
            socket: Some(socket),
            control: None,
            punch: None,
            room_id: None,
            handle: None,
            peer_handle: None,
            peer_endpoint: None,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn identity(&self) -> ClientIdentity {
        self.identity
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn room_id(&self) -> Option<RoomId> {
        self.room_id
    }

    pub fn handle(&self) -> Option<ClientHandle> {
        self.handle
    }

    pub fn peer_handle(&self) -> Option<ClientHandle> {
        self.peer_handle
    }

    pub fn peer_endpoint(&self) -> Option<PeerEndpoint> {
        self.peer_endpoint
    }

    pub fn relay_endpoint(&self) -> PeerEndpoint {
        self.relay_addr
    }

    pub fn punch_endpoint(&self) -> SocketAddr {
        self.punch_addr
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().map(DatagramSocket::local_addr)
    }

    pub fn stats(&self) -> Option<&TransportStats> {
        self.socket.as_ref().map(DatagramSocket::stats)
    }

    pub fn is_control_open(&self) -> bool {
        self.control.as_ref().is_some_and(ControlChannel::is_open)
    }

    pub fn is_resolving(&self) -> bool {
        self.punch.is_some()
    }

    /// The endpoint data-plane traffic should go to, per the configured route.
    pub fn session_endpoint(&self) -> Option<PeerEndpoint> {
        if self.state != ClientState::Connected {
            return None;
        }
        match self.config.route {
            PeerRoute::Direct => self.peer_endpoint,
            PeerRoute::Relay => Some(self.relay_addr),
        }
    }

    pub fn create_room(&mut self) -> Result<()> {
        let url = format!(
            "{}/create_room?client_id={}",
            self.config.control_base_url(),
            self.identity.to_decimal()
        );
        self.open_control(url)
    }

    pub fn join_room(&mut self, room_id: RoomId) -> Result<()> {
        let url = format!(
            "{}/join_room/{}?client_id={}",
            self.config.control_base_url(),
            room_id,
            self.identity.to_decimal()
        );
        self.open_control(url)
    }

    fn open_control(&mut self, url: String) -> Result<()> {
        self.state.ensure(LIVE_STATES)?;
        self.leave();

        let channel = ControlChannel::connect(
            url,
            self.control_addr,
            self.config.connect_timeout,
            self.config.keepalive_interval,
        )?;
        if channel.is_open() {
            self.transition(self.state.on_link_open());
        }
        self.control = Some(channel);
        Ok(())
    }

    /// Closes the control link and forgets the room. Safe to call repeatedly.
    pub fn leave(&mut self) {
        if self.state.is_disposed() {
            return;
        }

        self.cancel_resolve();
        if let Some(mut channel) = self.control.take() {
            channel.close();
        }

        self.room_id = None;
        self.handle = None;
        self.peer_handle = None;
        self.peer_endpoint = None;
        self.transition(ClientState::Initialized);
    }

    /// Drains control events that have already arrived, applying their state
    /// effects in delivery order.
    pub fn poll_events(&mut self) -> Result<Vec<ControlEvent>> {
        if self.state.is_disposed() {
            return Ok(Vec::new());
        }
        let Some(channel) = self.control.as_mut() else {
            return Ok(Vec::new());
        };

        let events = match channel.poll() {
            Ok(events) => events,
            Err(e) => {
                log::warn!("Control link failed: {}", e);
                self.control = None;
                return Err(e);
            }
        };

        if !events.is_empty() || channel.is_open() {
            self.transition(self.state.on_link_open());
        }

        for event in &events {
            self.apply(*event);
        }

        Ok(events)
    }

    fn apply(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::RoomCreated(room_id) => {
                self.room_id = Some(room_id);
                self.transition(self.state.on_room_created());
            }
            ControlEvent::YouAre(handle) => {
                self.handle = Some(handle);
            }
            ControlEvent::PeerJoined(handle) => {
                let next = self.state.on_peer_joined();
                if next == ClientState::MatchmakingReady && self.state == ClientState::Matchmaking {
                    self.peer_handle = Some(handle);
                }
                self.transition(next);
            }
            ControlEvent::PeerLeft(handle) => {
                if self.peer_handle == Some(handle) {
                    self.peer_handle = None;
                }
                self.transition(self.state.on_peer_left());
            }
        }
    }

    fn transition(&mut self, next: ClientState) {
        if next != self.state {
            log::debug!("Client state {} -> {}", self.state, next);
            self.state = next;
        }
    }

    /// Starts announcing to the punch coordinator. A running attempt is kept.
    pub fn begin_resolve(&mut self) -> Result<()> {
        self.state.ensure(MATCHMAKING_STATES)?;
        if self.punch.is_none() {
            log::info!("Resolving peer endpoint via {}", self.punch_addr);
            self.punch = Some(PunchAttempt::new(
                &self.identity,
                self.punch_addr,
                self.config.punch,
            ));
        }
        Ok(())
    }

    /// Steps the running attempt once; `Some` the moment the peer resolves.
    pub fn poll_peer_endpoint(&mut self) -> Result<Option<PeerEndpoint>> {
        let (Some(attempt), Some(socket)) = (self.punch.as_mut(), self.socket.as_mut()) else {
            return Ok(None);
        };

        let status = match attempt.step(socket, Instant::now()) {
            Ok(status) => status,
            Err(e) => {
                self.punch = None;
                return Err(e);
            }
        };

        match status {
            PunchStatus::Pending => Ok(None),
            PunchStatus::Resolved(peer) => {
                self.punch = None;
                self.peer_endpoint = Some(peer);
                self.transition(ClientState::MatchmakingFinished);
                self.transition(ClientState::Connected);
                Ok(Some(peer))
            }
        }
    }

    pub fn cancel_resolve(&mut self) {
        if let Some(attempt) = self.punch.take() {
            log::info!(
                "Cancelled peer resolution after {} announcements",
                attempt.announcements()
            );
        }
    }

    /// Drives resolution to completion on the calling thread. Meant for setup
    /// code or a helper thread, never a tick loop.
    pub fn resolve_peer_endpoint(&mut self, cancel: &CancelToken) -> Result<PeerEndpoint> {
        self.begin_resolve()?;
        loop {
            if cancel.is_cancelled() {
                self.cancel_resolve();
                return Err(SessionError::Cancelled);
            }
            if let Some(peer) = self.poll_peer_endpoint()? {
                return Ok(peer);
            }
            thread::sleep(RESOLVE_POLL_INTERVAL);
        }
    }

    pub fn send_to(&mut self, payload: &[u8], dest: PeerEndpoint) -> Result<SendReport> {
        self.connected_socket()?.send_to(payload, dest)
    }

    pub fn send_via_relay(&mut self, payload: &[u8]) -> Result<SendReport> {
        let relay = self.relay_addr;
        self.connected_socket()?.send_to(payload, relay)
    }

    pub fn receive_all(&mut self) -> Result<Vec<(PeerEndpoint, Vec<u8>)>> {
        self.connected_socket()?.receive_all()
    }

    fn connected_socket(&mut self) -> Result<&mut DatagramSocket> {
        self.state.ensure(CONNECTED_STATES)?;
        self.socket.as_mut().ok_or(SessionError::InvalidState {
            expected: ExpectedStates(CONNECTED_STATES),
            actual: self.state,
        })
    }

    /// Releases the control link, the datagram socket and any running
    /// resolution. Later calls do nothing.
    pub fn dispose(&mut self) {
        if self.state.is_disposed() {
            return;
        }

        self.leave();
        self.socket = None;
        self.transition(ClientState::Disposed);
        log::info!("Client {} disposed", self.identity);
    }
}

impl Drop for SynapseClient {
    fn drop(&mut self) {
        self.dispose();
    }
}
