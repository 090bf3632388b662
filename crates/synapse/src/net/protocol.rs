use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::identity::{ClientIdentity, IDENTITY_LEN};

pub type RoomId = u64;
pub type ClientHandle = u32;
pub type PeerEndpoint = SocketAddr;

pub const CONTROL_ROOM_CREATED: u8 = 1;
pub const CONTROL_YOU_ARE: u8 = 2;
pub const CONTROL_PEER_JOINED: u8 = 3;
pub const CONTROL_PEER_LEFT: u8 = 4;

/// Largest binary message the control link accepts in one read.
pub const CONTROL_FRAME_LIMIT: usize = 2048;

pub const PUNCH_FOUND_PEER: u8 = 0x01;
pub const PUNCH_WAITING: u8 = 0x02;

pub const PUNCH_REQUEST_LEN: usize = IDENTITY_LEN;
const PUNCH_V4_LEN: usize = 8;
const PUNCH_V6_LEN: usize = 20;

/// Matchmaking events, in the order the signaling server sent them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    RoomCreated(RoomId),
    YouAre(ClientHandle),
    PeerJoined(ClientHandle),
    PeerLeft(ClientHandle),
}

impl ControlEvent {
    /// `None` for unknown tags and frames shorter than the tag requires.
    pub fn decode(data: &[u8]) -> Option<Self> {
        let (&tag, body) = data.split_first()?;
        match tag {
            CONTROL_ROOM_CREATED => read_u64(body).map(ControlEvent::RoomCreated),
            CONTROL_YOU_ARE => read_u32(body).map(ControlEvent::YouAre),
            CONTROL_PEER_JOINED => read_u32(body).map(ControlEvent::PeerJoined),
            CONTROL_PEER_LEFT => read_u32(body).map(ControlEvent::PeerLeft),
            _ => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 8);
        match *self {
            ControlEvent::RoomCreated(room_id) => {
                out.push(CONTROL_ROOM_CREATED);
                out.extend_from_slice(&room_id.to_be_bytes());
            }
            ControlEvent::YouAre(handle) => {
                out.push(CONTROL_YOU_ARE);
                out.extend_from_slice(&handle.to_be_bytes());
            }
            ControlEvent::PeerJoined(handle) => {
                out.push(CONTROL_PEER_JOINED);
                out.extend_from_slice(&handle.to_be_bytes());
            }
            ControlEvent::PeerLeft(handle) => {
                out.push(CONTROL_PEER_LEFT);
                out.extend_from_slice(&handle.to_be_bytes());
            }
        }
        out
    }
}

fn read_u64(body: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = body.get(..8)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

fn read_u32(body: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = body.get(..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

pub fn punch_request(identity: &ClientIdentity) -> [u8; PUNCH_REQUEST_LEN] {
    identity.to_be_bytes()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PunchReply {
    Waiting,
    FoundPeer(PeerEndpoint),
}

impl PunchReply {
    /// `None` for unknown tags, unknown IP versions and undersized packets.
    pub fn decode(data: &[u8]) -> Option<Self> {
        match *data.first()? {
            PUNCH_WAITING => Some(PunchReply::Waiting),
            PUNCH_FOUND_PEER => decode_endpoint(data).map(PunchReply::FoundPeer),
            _ => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match *self {
            PunchReply::Waiting => vec![PUNCH_WAITING],
            PunchReply::FoundPeer(peer) => {
                let mut out = Vec::with_capacity(PUNCH_V6_LEN);
                out.push(PUNCH_FOUND_PEER);
                match peer.ip() {
                    IpAddr::V4(v4) => {
                        out.push(4);
                        out.extend_from_slice(&v4.octets());
                    }
                    IpAddr::V6(v6) => {
                        out.push(6);
                        out.extend_from_slice(&v6.octets());
                    }
                }
                out.extend_from_slice(&peer.port().to_be_bytes());
                out
            }
        }
    }
}

fn decode_endpoint(data: &[u8]) -> Option<PeerEndpoint> {
    match *data.get(1)? {
        4 if data.len() >= PUNCH_V4_LEN => {
            let octets: [u8; 4] = data[2..6].try_into().ok()?;
            let port = u16::from_be_bytes([data[6], data[7]]);
            Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
        }
        6 if data.len() >= PUNCH_V6_LEN => {
            let octets: [u8; 16] = data[2..18].try_into().ok()?;
            let port = u16::from_be_bytes([data[18], data[19]]);
            Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        _ => None,
    }
}
