//! Rendezvous with the punch coordinator.
//!
//! The client repeatedly announces its identity to the coordinator and waits
//! for the coordinator to report the peer's observed public endpoint. The
//! attempt is stepped by the caller so that it never stalls a tick loop.

use std::net::SocketAddr;
use std::time::Instant;

use crate::config::PunchTiming;
use crate::error::Result;
use crate::identity::ClientIdentity;

use super::protocol::{PUNCH_REQUEST_LEN, PeerEndpoint, PunchReply, punch_request};
use super::transport::DatagramSocket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PunchStatus {
    Pending,
    Resolved(PeerEndpoint),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PunchPhase {
    Announce,
    AwaitReply { deadline: Instant },
    Pace { until: Instant },
}

#[derive(Debug)]
pub struct PunchAttempt {
    coordinator: SocketAddr,
    request: [u8; PUNCH_REQUEST_LEN],
    timing: PunchTiming,
    phase: PunchPhase,
    announcements: u32,
    started_at: Instant,
}

impl PunchAttempt {
    pub fn new(identity: &ClientIdentity, coordinator: SocketAddr, timing: PunchTiming) -> Self {
        Self {
            coordinator,
            request: punch_request(identity),
            timing,
            phase: PunchPhase::Announce,
            announcements: 0,
            started_at: Instant::now(),
        }
    }

    pub fn coordinator(&self) -> SocketAddr {
        self.coordinator
    }

    pub fn announcements(&self) -> u32 {
        self.announcements
    }

    /// Advances the attempt as far as it can go without waiting.
    pub fn step(&mut self, socket: &mut DatagramSocket, now: Instant) -> Result<PunchStatus> {
        loop {
            match self.phase {
                PunchPhase::Announce => {
                    socket.send_to(&self.request, self.coordinator)?;
                    self.announcements += 1;
                    log::debug!(
                        "Punch announcement #{} to {}",
                        self.announcements,
                        self.coordinator
                    );
                    self.phase = PunchPhase::AwaitReply {
                        deadline: now + self.timing.recv_timeout,
                    };
                }
                PunchPhase::AwaitReply { deadline } => {
                    while let Some((from, data)) = socket.try_recv()? {
                        if from != self.coordinator {
                            log::debug!("Ignoring {} bytes from {} while punching", data.len(), from);
                            continue;
                        }

                        match PunchReply::decode(data) {
                            Some(PunchReply::FoundPeer(peer)) => {
                                log::info!(
                                    "Coordinator resolved peer {} after {} announcements in {:?}",
                                    peer,
                                    self.announcements,
                                    self.started_at.elapsed()
                                );
                                return Ok(PunchStatus::Resolved(peer));
                            }
                            Some(PunchReply::Waiting) => {
                                log::debug!("Coordinator is waiting for the peer");
                                self.phase = PunchPhase::Pace {
                                    until: now + self.timing.send_interval,
                                };
                                return Ok(PunchStatus::Pending);
                            }
                            None => {
                                log::debug!("Ignoring malformed punch reply of {} bytes", data.len());
                            }
                        }
                    }

                    if now < deadline {
                        return Ok(PunchStatus::Pending);
                    }
                    self.phase = PunchPhase::Pace {
                        until: now + self.timing.send_interval,
                    };
                }
                PunchPhase::Pace { until } => {
                    if now < until {
                        return Ok(PunchStatus::Pending);
                    }
                    self.phase = PunchPhase::Announce;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::thread;
    use std::time::Duration;

    fn timing() -> PunchTiming {
        PunchTiming {
            recv_timeout: Duration::from_millis(40),
            send_interval: Duration::from_millis(20),
        }
    }

    fn setup() -> (UdpSocket, DatagramSocket, PunchAttempt, ClientIdentity) {
        let coordinator = UdpSocket::bind("127.0.0.1:0").unwrap();
        coordinator
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let socket = DatagramSocket::bind("127.0.0.1:0").unwrap();
        let identity = ClientIdentity::from_u128(0x1234_5678);
        let attempt = PunchAttempt::new(&identity, coordinator.local_addr().unwrap(), timing());
        (coordinator, socket, attempt, identity)
    }

    fn step_until_resolved(
        attempt: &mut PunchAttempt,
        socket: &mut DatagramSocket,
        limit: Duration,
    ) -> Option<PeerEndpoint> {
        let start = Instant::now();
        while start.elapsed() < limit {
            if let PunchStatus::Resolved(peer) = attempt.step(socket, Instant::now()).unwrap() {
                return Some(peer);
            }
            thread::sleep(Duration::from_millis(1));
        }
        None
    }

    #[test]
    fn test_found_peer_v4_resolves() {
        let (coordinator, mut socket, mut attempt, identity) = setup();

        assert_eq!(
            attempt.step(&mut socket, Instant::now()).unwrap(),
            PunchStatus::Pending
        );

        let mut buf = [0u8; 64];
        let (n, from) = coordinator.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], &identity.to_be_bytes());
        coordinator
            .send_to(&[0x01, 0x04, 10, 0, 0, 5, 0x23, 0x8C], from)
            .unwrap();

        let peer = step_until_resolved(&mut attempt, &mut socket, Duration::from_secs(2));
        assert_eq!(peer, Some("10.0.0.5:9100".parse().unwrap()));
    }

    #[test]
    fn test_waiting_paces_next_announcement() {
        let (coordinator, mut socket, mut attempt, _) = setup();
        attempt.step(&mut socket, Instant::now()).unwrap();

        let mut buf = [0u8; 64];
        let (_, from) = coordinator.recv_from(&mut buf).unwrap();
        coordinator.send_to(&[0x02], from).unwrap();
        let replied_at = Instant::now();

        let done = step_until_resolved(&mut attempt, &mut socket, Duration::from_millis(60));
        assert!(done.is_none());

        let (n, _) = coordinator.recv_from(&mut buf).unwrap();
        assert_eq!(n, PUNCH_REQUEST_LEN);
        assert!(replied_at.elapsed() >= timing().send_interval);
        assert!(attempt.announcements() >= 2);
    }

    #[test]
    fn test_undersized_and_foreign_replies_are_ignored() {
        let (coordinator, mut socket, mut attempt, _) = setup();
        attempt.step(&mut socket, Instant::now()).unwrap();

        let mut buf = [0u8; 64];
        let (_, from) = coordinator.recv_from(&mut buf).unwrap();
        coordinator.send_to(&[0x01, 0x04, 10], from).unwrap();

        let stranger = UdpSocket::bind("127.0.0.1:0").unwrap();
        stranger
            .send_to(&[0x01, 0x04, 192, 168, 0, 1, 0, 80], from)
            .unwrap();

        let done = step_until_resolved(&mut attempt, &mut socket, Duration::from_millis(30));
        assert!(done.is_none());

        coordinator
            .send_to(&[0x01, 0x04, 127, 0, 0, 1, 0x1F, 0x90], from)
            .unwrap();
        let peer = step_until_resolved(&mut attempt, &mut socket, Duration::from_secs(2));
        assert_eq!(peer, Some("127.0.0.1:8080".parse().unwrap()));
    }

    #[test]
    fn test_silence_retries_after_timeout() {
        let (coordinator, mut socket, mut attempt, _) = setup();

        let start = Instant::now();
        while attempt.announcements() < 3 && start.elapsed() < Duration::from_secs(2) {
            attempt.step(&mut socket, Instant::now()).unwrap();
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(attempt.announcements(), 3);

        let spacing = timing().recv_timeout + timing().send_interval;
        assert!(start.elapsed() >= spacing * 2);

        let mut buf = [0u8; 64];
        for _ in 0..3 {
            let (n, _) = coordinator.recv_from(&mut buf).unwrap();
            assert_eq!(n, PUNCH_REQUEST_LEN);
        }
    }
}
