use std::fmt;
use std::io;

use crate::client::ClientState;
use crate::identity::ParseIdentityError;

/// The set of states an operation accepts, rendered as `A | B`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedStates(pub &'static [ClientState]);

impl fmt::Display for ExpectedStates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, state) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            f.write_str(state.as_str())?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid state: expected {expected}, was {actual}")]
    InvalidState {
        expected: ExpectedStates,
        actual: ClientState,
    },
    #[error("malformed client id: {0}")]
    Format(#[from] ParseIdentityError),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("received {size} bytes, receive buffer holds {capacity}")]
    BufferOverrun { size: usize, capacity: usize },
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("control link error: {0}")]
    Control(#[from] tungstenite::Error),
    #[error("operation cancelled")]
    Cancelled,
}

impl SessionError {
    /// Errors after which the session must be torn down and re-established.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::BufferOverrun { .. }
                | SessionError::Io(_)
                | SessionError::Control(_)
                | SessionError::ProtocolViolation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
