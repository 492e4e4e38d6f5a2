//! Top-level screen selection and contact listing.

use anyhow::Result;
use shared::{domain::Peer, protocol::UserSummary};
use tracing::{debug, warn};

use crate::{api::BackendApi, store::StoredSession};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppView {
    LoggedOut,
    /// Logged in; checking whether any chats exist yet.
    Loading,
    Empty,
    RecentChats,
    Contacts,
    Chat(Peer),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactMode {
    /// Everyone except the local user.
    All,
    /// Users the local user already has history with.
    Recent,
}

#[derive(Debug, Clone)]
pub struct Navigator {
    username: Option<String>,
    view: AppView,
    has_chats: bool,
}

impl Default for Navigator {
    fn default() -> Self {
        Self {
            username: None,
            view: AppView::LoggedOut,
            has_chats: false,
        }
    }
}

impl Navigator {
    pub fn view(&self) -> &AppView {
        &self.view
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn has_chats(&self) -> bool {
        self.has_chats
    }

    pub fn selected_peer(&self) -> Option<&Peer> {
        match &self.view {
            AppView::Chat(peer) => Some(peer),
            _ => None,
        }
    }

    pub fn restore(&mut self, stored: Option<&StoredSession>) {
        match stored.filter(|session| session.is_authenticated()) {
            Some(session) => self.logged_in(&session.username),
            None => self.view = AppView::LoggedOut,
        }
    }

    pub fn logged_in(&mut self, username: &str) {
        self.username = Some(username.to_string());
        self.view = AppView::Loading;
    }

    /// Outcome of the recent-chats probe that follows login or restore.
    /// A failed probe lands on the empty dashboard.
    pub fn recent_chats_checked(&mut self, result: Result<usize>) {
        if self.username.is_none() {
            return;
        }
        match result {
            Ok(count) => {
                self.has_chats = count > 0;
                self.view = self.dashboard();
            }
            Err(err) => {
                warn!(error = %err, "recent chats check failed");
                self.view = AppView::Empty;
            }
        }
    }

    pub fn start_chat(&mut self) {
        self.view_contacts();
    }

    pub fn view_contacts(&mut self) {
        if self.username.is_some() {
            self.view = AppView::Contacts;
        }
    }

    pub fn select_contact(&mut self, peer: Peer) {
        if self.username.is_some() {
            debug!(peer_id = peer.id.0, "contact selected");
            self.view = AppView::Chat(peer);
        }
    }

    pub fn back_from_chat(&mut self) {
        if matches!(self.view, AppView::Chat(_)) {
            self.view = self.dashboard();
        }
    }

    pub fn back_from_contacts(&mut self) {
        if self.view == AppView::Contacts {
            self.view = self.dashboard();
        }
    }

    pub fn message_sent(&mut self) {
        self.has_chats = true;
    }

    pub fn logout(&mut self) {
        *self = Self::default();
    }

    fn dashboard(&self) -> AppView {
        if self.has_chats {
            AppView::RecentChats
        } else {
            AppView::Empty
        }
    }
}

/// Case-insensitive substring match on the username; an empty query keeps
/// everything.
pub fn filter_contacts<'a>(contacts: &'a [UserSummary], query: &str) -> Vec<&'a UserSummary> {
    let query = query.to_lowercase();
    contacts
        .iter()
        .filter(|contact| contact.username.to_lowercase().contains(&query))
        .collect()
}

pub fn find_peer(contacts: &[UserSummary], username: &str) -> Option<Peer> {
    contacts
        .iter()
        .find(|contact| contact.username == username)
        .cloned()
        .map(Peer::from)
}

pub async fn load_contacts(
    backend: &dyn BackendApi,
    mode: ContactMode,
    username: &str,
) -> Result<Vec<UserSummary>> {
    match mode {
        ContactMode::All => backend.list_all_users(username).await,
        ContactMode::Recent => backend.list_chat_users(username).await,
    }
}

#[cfg(test)]
#[path = "tests/view_tests.rs"]
mod tests;
