use serde::{Deserialize, Serialize};

use crate::domain::{Peer, PresenceStatus, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
}

impl From<UserSummary> for Peer {
    fn from(value: UserSummary) -> Self {
        Peer::new(value.id, value.username)
    }
}

/// One stored message as returned by the history endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    pub content: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    Presence,
    Typing,
}

/// Frames the client writes to the real-time channel. Chat frames carry no
/// `type` discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    Typing {
        #[serde(rename = "type")]
        kind: FrameKind,
        receiver_id: UserId,
        is_typing: bool,
    },
    Chat {
        receiver_id: UserId,
        message: String,
    },
}

impl OutboundFrame {
    pub fn typing(receiver_id: UserId, is_typing: bool) -> Self {
        Self::Typing {
            kind: FrameKind::Typing,
            receiver_id,
            is_typing,
        }
    }

    pub fn chat(receiver_id: UserId, message: impl Into<String>) -> Self {
        Self::Chat {
            receiver_id,
            message: message.into(),
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Loose wire shape of everything the backend pushes; narrowed into
/// [`InboundFrame`] before anyone looks at it.
#[derive(Debug, Deserialize)]
struct WireFrame {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    user_id: Option<UserId>,
    #[serde(default)]
    status: Option<PresenceStatus>,
    #[serde(default)]
    sender_id: Option<UserId>,
    #[serde(default)]
    receiver_id: Option<UserId>,
    #[serde(default)]
    is_typing: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Presence {
        user_id: UserId,
        status: PresenceStatus,
    },
    Typing {
        sender_id: UserId,
        is_typing: bool,
    },
    Chat {
        sender_id: Option<UserId>,
        receiver_id: Option<UserId>,
        text: String,
    },
    Unrecognized {
        kind: Option<String>,
    },
}

impl InboundFrame {
    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<WireFrame>(text).map(Self::from)
    }
}

impl From<WireFrame> for InboundFrame {
    fn from(frame: WireFrame) -> Self {
        match frame.kind.as_deref() {
            Some("presence") => match frame.user_id {
                Some(user_id) => InboundFrame::Presence {
                    user_id,
                    status: frame.status.unwrap_or(PresenceStatus::Unknown),
                },
                None => InboundFrame::Unrecognized { kind: frame.kind },
            },
            Some("typing") => match frame.sender_id {
                Some(sender_id) => InboundFrame::Typing {
                    sender_id,
                    is_typing: frame.is_typing.unwrap_or(false),
                },
                None => InboundFrame::Unrecognized { kind: frame.kind },
            },
            Some(_) => InboundFrame::Unrecognized { kind: frame.kind },
            None => match frame.message.or(frame.content) {
                Some(text) => InboundFrame::Chat {
                    sender_id: frame.sender_id,
                    receiver_id: frame.receiver_id,
                    text,
                },
                None => InboundFrame::Unrecognized { kind: None },
            },
        }
    }
}
