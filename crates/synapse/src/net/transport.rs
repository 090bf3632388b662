use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use crate::error::{Result, SessionError};

use super::protocol::PeerEndpoint;

pub const RECV_BUFFER_SIZE: usize = 4096;
/// Largest payload that avoids IP fragmentation on any path.
pub const IDEAL_MAX_DATAGRAM_SIZE: usize = 508;

#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub oversized_sends: u64,
    pub sends_dropped: u64,
    pub resets_skipped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    pub bytes: usize,
    /// The payload exceeded [`IDEAL_MAX_DATAGRAM_SIZE`] but was still sent.
    pub oversized: bool,
}

/// Non-blocking UDP socket carrying opaque payloads.
pub struct DatagramSocket {
    socket: UdpSocket,
    local_addr: SocketAddr,
    stats: TransportStats,
    // One spare byte so a datagram longer than RECV_BUFFER_SIZE is detectable.
    recv_buffer: Box<[u8; RECV_BUFFER_SIZE + 1]>,
}

impl DatagramSocket {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;
        log::debug!("Datagram socket bound on {}", local_addr);

        Ok(Self {
            socket,
            local_addr,
            stats: TransportStats::default(),
            recv_buffer: Box::new([0u8; RECV_BUFFER_SIZE + 1]),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    pub fn send_to(&mut self, payload: &[u8], dest: PeerEndpoint) -> Result<SendReport> {
        let oversized = payload.len() > IDEAL_MAX_DATAGRAM_SIZE;
        if oversized {
            self.stats.oversized_sends += 1;
            log::warn!(
                "Sending datagram of {} bytes, larger than ideal ({})",
                payload.len(),
                IDEAL_MAX_DATAGRAM_SIZE
            );
        }

        match self.socket.send_to(payload, dest) {
            Ok(bytes) => {
                self.stats.packets_sent += 1;
                self.stats.bytes_sent += bytes as u64;
                Ok(SendReport { bytes, oversized })
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.stats.sends_dropped += 1;
                log::debug!("Send buffer full, dropped datagram to {}", dest);
                Ok(SendReport {
                    bytes: 0,
                    oversized,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Takes the next queued datagram, or `None` when the OS has nothing ready.
    pub fn try_recv(&mut self) -> Result<Option<(PeerEndpoint, &[u8])>> {
        loop {
            match self.socket.recv_from(&mut self.recv_buffer[..]) {
                Ok((size, _)) if size > RECV_BUFFER_SIZE => {
                    return Err(SessionError::BufferOverrun {
                        size,
                        capacity: RECV_BUFFER_SIZE,
                    });
                }
                Ok((size, addr)) => {
                    self.stats.packets_received += 1;
                    self.stats.bytes_received += size as u64;
                    return Ok(Some((addr, &self.recv_buffer[..size])));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(ref e) if is_reset(e) => {
                    self.stats.resets_skipped += 1;
                    log::debug!("Skipping reset indication on {}: {}", self.local_addr, e);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Drains every datagram currently queued, in arrival order.
    pub fn receive_all(&mut self) -> Result<Vec<(PeerEndpoint, Vec<u8>)>> {
        let local_addr = self.local_addr;
        let mut received = Vec::new();
        loop {
            match self.try_recv() {
                Ok(Some((addr, data))) => received.push((addr, data.to_vec())),
                Ok(None) => return Ok(received),
                Err(e) => {
                    if !received.is_empty() {
                        log::warn!(
                            "Dropping {} datagrams drained before the failure on {}",
                            received.len(),
                            local_addr
                        );
                    }
                    return Err(e);
                }
            }
        }
    }
}

// ICMP port-unreachable surfaces as a reset on connectionless sockets.
fn is_reset(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
    )
}
