use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

use crate::identity::ClientIdentity;

pub const DEFAULT_CONTROL_PORT: u16 = 9000;
pub const DEFAULT_PUNCH_PORT: u16 = 9001;
pub const DEFAULT_RELAY_PORT: u16 = 9002;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PunchTiming {
    /// How long to wait for a coordinator reply after each announcement.
    pub recv_timeout: Duration,
    /// Pause between a timeout (or a "waiting" reply) and the next announcement.
    pub send_interval: Duration,
}

impl Default for PunchTiming {
    fn default() -> Self {
        Self {
            recv_timeout: Duration::from_millis(300),
            send_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerRoute {
    #[default]
    Direct,
    Relay,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub control_port: u16,
    pub punch_port: u16,
    pub relay_port: u16,
    pub secure: bool,
    pub local_udp_port: u16,
    /// Bounds the TCP connect plus the TLS and WebSocket handshakes.
    pub connect_timeout: Duration,
    /// Ping period on the control link while it is open. `None` disables pings.
    pub keepalive_interval: Option<Duration>,
    pub punch: PunchTiming,
    pub route: PeerRoute,
    pub identity: Option<ClientIdentity>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            control_port: DEFAULT_CONTROL_PORT,
            punch_port: DEFAULT_PUNCH_PORT,
            relay_port: DEFAULT_RELAY_PORT,
            secure: false,
            local_udp_port: 0,
            connect_timeout: Duration::from_secs(5),
            keepalive_interval: Some(Duration::from_secs(10)),
            punch: PunchTiming::default(),
            route: PeerRoute::Direct,
            identity: None,
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn with_ports(mut self, control: u16, punch: u16, relay: u16) -> Self {
        self.control_port = control;
        self.punch_port = punch;
        self.relay_port = relay;
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_keepalive(mut self, interval: Option<Duration>) -> Self {
        self.keepalive_interval = interval;
        self
    }

    pub fn with_punch_timing(mut self, timing: PunchTiming) -> Self {
        self.punch = timing;
        self
    }

    pub fn with_route(mut self, route: PeerRoute) -> Self {
        self.route = route;
        self
    }

    pub fn with_identity(mut self, identity: ClientIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn control_base_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        let host = match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V6(v6)) => format!("[{}]", v6),
            _ => self.host.clone(),
        };
        format!("{}://{}:{}", scheme, host, self.control_port)
    }
}

/// Literal addresses pass through. Names resolve with an IPv4 preference,
/// then the first result, then loopback when the lookup yields nothing.
pub fn resolve_host(host: &str) -> io::Result<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    let addrs: Vec<SocketAddr> = (host, 0).to_socket_addrs()?.collect();
    Ok(pick_address(&addrs))
}

fn pick_address(addrs: &[SocketAddr]) -> IpAddr {
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .map(|a| a.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
