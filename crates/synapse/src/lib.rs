pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod net;

pub use client::{CancelToken, ClientState, SynapseClient};
pub use config::{
    ClientConfig, DEFAULT_CONTROL_PORT, DEFAULT_PUNCH_PORT, DEFAULT_RELAY_PORT, PeerRoute,
    PunchTiming, resolve_host,
};
pub use error::{ExpectedStates, Result, SessionError};
pub use identity::{ClientIdentity, ParseIdentityError};
pub use net::{
    ClientHandle, ControlChannel, ControlEvent, DatagramSocket, IDEAL_MAX_DATAGRAM_SIZE,
    PeerEndpoint, PunchAttempt, PunchReply, PunchStatus, RECV_BUFFER_SIZE, RoomId, SendReport,
    TransportStats,
};
