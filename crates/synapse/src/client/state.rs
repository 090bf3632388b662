use std::fmt;

use crate::error::{ExpectedStates, Result, SessionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    Initialized,
    Matchmaking,
    MatchmakingReady,
    MatchmakingFinished,
    Connected,
    Disposed,
}

impl ClientState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientState::Initialized => "Initialized",
            ClientState::Matchmaking => "Matchmaking",
            ClientState::MatchmakingReady => "MatchmakingReady",
            ClientState::MatchmakingFinished => "MatchmakingFinished",
            ClientState::Connected => "Connected",
            ClientState::Disposed => "Disposed",
        }
    }

    pub fn ensure(self, expected: &'static [ClientState]) -> Result<()> {
        if expected.contains(&self) {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                expected: ExpectedStates(expected),
                actual: self,
            })
        }
    }

    pub fn is_disposed(self) -> bool {
        self == ClientState::Disposed
    }

    pub(crate) fn on_link_open(self) -> Self {
        match self {
            ClientState::Initialized => ClientState::Matchmaking,
            other => other,
        }
    }

    pub(crate) fn on_room_created(self) -> Self {
        self.on_link_open()
    }

    /// Only a waiting room becomes ready; elsewhere the event changes nothing.
    pub(crate) fn on_peer_joined(self) -> Self {
        match self {
            ClientState::Matchmaking => ClientState::MatchmakingReady,
            other => {
                log::warn!("Peer joined while {}, state unchanged", other);
                other
            }
        }
    }

    pub(crate) fn on_peer_left(self) -> Self {
        match self {
            ClientState::MatchmakingReady => ClientState::Matchmaking,
            other => other,
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ClientState::*;

    const ALL: [ClientState; 6] = [
        Initialized,
        Matchmaking,
        MatchmakingReady,
        MatchmakingFinished,
        Connected,
        Disposed,
    ];

    #[test]
    fn test_peer_joined_table() {
        let expected = [
            Initialized,
            MatchmakingReady,
            MatchmakingReady,
            MatchmakingFinished,
            Connected,
            Disposed,
        ];
        for (state, want) in ALL.iter().zip(expected) {
            assert_eq!(state.on_peer_joined(), want, "from {}", state);
        }
    }

    #[test]
    fn test_peer_left_table() {
        let expected = [
            Initialized,
            Matchmaking,
            Matchmaking,
            MatchmakingFinished,
            Connected,
            Disposed,
        ];
        for (state, want) in ALL.iter().zip(expected) {
            assert_eq!(state.on_peer_left(), want, "from {}", state);
        }
    }

    #[test]
    fn test_link_open_only_leaves_initialized() {
        assert_eq!(Initialized.on_link_open(), Matchmaking);
        assert_eq!(MatchmakingReady.on_room_created(), MatchmakingReady);
        assert_eq!(Disposed.on_link_open(), Disposed);
    }

    #[test]
    fn test_ensure_names_expected_states() {
        let err = Initialized
            .ensure(&[Matchmaking, MatchmakingReady])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid state: expected Matchmaking | MatchmakingReady, was Initialized"
        );
        assert!(Connected.ensure(&[Connected]).is_ok());
    }
}
