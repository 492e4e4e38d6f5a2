//! Client core for a one-to-one chat backend: identity resolution, history
//! loading, the live channel and the transcript view model, driven by a
//! single session task.

pub mod api;
pub mod channel;
pub mod config;
pub mod connector;
pub mod error;
pub mod health;
pub mod history;
pub mod identity;
pub mod session;
pub mod store;
pub mod transcript;
pub mod typing;
pub mod view;

pub use api::{BackendApi, HttpBackend};
pub use channel::{ChannelStatus, PresenceState};
pub use config::{load_settings, ClientSettings};
pub use connector::{ChannelConnector, WsConnector};
pub use error::{SendRejection, SessionError};
pub use health::{spawn_health_monitor, ServerHealth};
pub use session::{
    ChatSession, SessionCredentials, SessionEvent, SessionHandle, SessionPhase, SessionSnapshot,
};
pub use store::{CredentialStore, StoredSession};
pub use transcript::{DeliveryStatus, Direction, Message, ScrollState, Sender};
pub use view::{AppView, ContactMode, Navigator};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
