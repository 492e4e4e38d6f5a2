use std::fmt;

use thiserror::Error;

/// Why an outbound chat message was refused before reaching the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRejection {
    EmptyText,
    NoPeerSelected,
    IdentityUnresolved,
    ChannelNotOpen,
}

impl fmt::Display for SendRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SendRejection::EmptyText => "message text is empty",
            SendRejection::NoPeerSelected => "no peer selected",
            SendRejection::IdentityUnresolved => "local identity is not resolved",
            SendRejection::ChannelNotOpen => "live channel is not open",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("user {username} not found in the user directory")]
    IdentityNotFound { username: String },
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    #[error("live channel handshake failed: {0}")]
    ChannelHandshakeFailed(String),
    #[error("live channel dropped: {0}")]
    ChannelDropped(String),
    #[error("send rejected: {0}")]
    SendRejected(SendRejection),
    #[error("session has terminated")]
    Terminated,
}

impl SessionError {
    pub(crate) fn unreachable(err: &anyhow::Error) -> Self {
        SessionError::Unreachable(format!("{err:#}"))
    }

    /// Identity failures end the session; the only way out is to log out.
    pub fn requires_logout(&self) -> bool {
        matches!(
            self,
            SessionError::IdentityNotFound { .. } | SessionError::Terminated
        )
    }

    /// Channel failures heal on their own through the reconnect path.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SessionError::ChannelHandshakeFailed(_) | SessionError::ChannelDropped(_)
        )
    }
}
