//! Transcript view model: one ordered message list per (local user, peer)
//! pair plus the scroll/attention flags derived from it.

use shared::domain::UserId;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// UI label only. `Delivered` comes from a local timer, never from the
/// backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    None,
    Sent,
    Delivered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sender {
    Me,
    Peer(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Position-independent handle assigned on insertion.
    pub seq: u64,
    pub sender: Sender,
    pub text: String,
    pub display_time: String,
    pub direction: Direction,
    pub delivery: DeliveryStatus,
}

impl Message {
    pub fn incoming(peer_username: &str, text: impl Into<String>, display_time: String) -> Self {
        Self {
            seq: 0,
            sender: Sender::Peer(peer_username.to_string()),
            text: text.into(),
            display_time,
            direction: Direction::Incoming,
            delivery: DeliveryStatus::None,
        }
    }

    pub fn outgoing(text: impl Into<String>, display_time: String, delivery: DeliveryStatus) -> Self {
        Self {
            seq: 0,
            sender: Sender::Me,
            text: text.into(),
            display_time,
            direction: Direction::Outgoing,
            delivery,
        }
    }

    /// Direction is decided by comparing the frame/record sender against the
    /// local identity.
    pub fn from_sender(
        sender_id: Option<UserId>,
        local_id: UserId,
        peer_username: &str,
        text: impl Into<String>,
        display_time: String,
        outgoing_delivery: DeliveryStatus,
    ) -> Self {
        if sender_id == Some(local_id) {
            Self::outgoing(text, display_time, outgoing_delivery)
        } else {
            Self::incoming(peer_username, text, display_time)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollState {
    pub near_bottom: bool,
    pub show_scroll_button: bool,
    pub has_new_message: bool,
}

impl Default for ScrollState {
    fn default() -> Self {
        Self {
            near_bottom: true,
            show_scroll_button: false,
            has_new_message: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAction {
    None,
    ScrollToBottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Held back until the history snapshot lands.
    Buffered { seq: u64 },
    Shown { seq: u64, scroll: ScrollAction },
}

impl AppendOutcome {
    pub fn seq(self) -> u64 {
        match self {
            AppendOutcome::Buffered { seq } | AppendOutcome::Shown { seq, .. } => seq,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// `replayed` counts the buffered appends that became visible with it.
    Applied { replayed: usize },
    Stale,
    AlreadyApplied,
}

/// Where the history part of the transcript stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HistoryState {
    /// Live appends are buffered.
    Loading,
    /// Nothing to wait for: live appends are shown directly and a later
    /// snapshot is placed ahead of them.
    Failed,
    Applied,
}

#[derive(Debug, Clone)]
pub struct Transcript {
    peer: Option<UserId>,
    generation: u64,
    messages: Vec<Message>,
    pending: Vec<Message>,
    history: HistoryState,
    next_seq: u64,
    scroll: ScrollState,
    near_bottom_threshold: f64,
}

impl Transcript {
    pub fn new(near_bottom_threshold: f64) -> Self {
        Self {
            peer: None,
            generation: 0,
            messages: Vec::new(),
            pending: Vec::new(),
            history: HistoryState::Loading,
            next_seq: 0,
            scroll: ScrollState::default(),
            near_bottom_threshold,
        }
    }

    /// Drops everything and scopes the transcript to a new pair.
    pub fn reset(&mut self, generation: u64, peer: Option<UserId>) {
        self.peer = peer;
        self.generation = generation;
        self.messages.clear();
        self.pending.clear();
        self.history = HistoryState::Loading;
        self.scroll = ScrollState::default();
    }

    pub fn peer(&self) -> Option<UserId> {
        self.peer
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_loaded(&self) -> bool {
        self.history == HistoryState::Applied
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn scroll(&self) -> ScrollState {
        self.scroll
    }

    /// Puts the history snapshot in front of the live messages, replaying
    /// appends that arrived while it was in flight, in arrival order.
    pub fn apply_snapshot(
        &mut self,
        generation: u64,
        peer: UserId,
        snapshot: Vec<Message>,
    ) -> SnapshotOutcome {
        if self.is_stale(generation, peer) {
            debug!(
                generation,
                current = self.generation,
                peer_id = peer.0,
                "discarding stale history snapshot"
            );
            return SnapshotOutcome::Stale;
        }
        if self.history == HistoryState::Applied {
            return SnapshotOutcome::AlreadyApplied;
        }

        // After a failed load everything already shown is live.
        let live = std::mem::take(&mut self.messages);
        let pending = std::mem::take(&mut self.pending);
        let replayed = pending.len();
        for message in snapshot {
            self.insert(message);
        }
        // Live messages keep the seq their delivery timers refer to.
        self.messages.extend(live);
        self.messages.extend(pending);
        self.history = HistoryState::Applied;
        self.scroll_to_bottom();
        SnapshotOutcome::Applied { replayed }
    }

    /// Gives up waiting for history: buffered appends are shown as they are
    /// and later appends are no longer held back. Returns how many buffered
    /// messages became visible.
    pub fn history_failed(&mut self, generation: u64, peer: UserId) -> usize {
        if self.is_stale(generation, peer) || self.history != HistoryState::Loading {
            return 0;
        }
        self.history = HistoryState::Failed;
        let flushed = self.pending.len();
        self.messages.append(&mut self.pending);
        flushed
    }

    pub fn append(&mut self, mut message: Message) -> AppendOutcome {
        let seq = self.take_seq();
        message.seq = seq;

        if self.history == HistoryState::Loading {
            self.pending.push(message);
            return AppendOutcome::Buffered { seq };
        }

        self.messages.push(message);
        let scroll = if self.scroll.near_bottom {
            self.scroll_to_bottom();
            ScrollAction::ScrollToBottom
        } else {
            self.scroll.has_new_message = true;
            self.scroll.show_scroll_button = true;
            ScrollAction::None
        };
        AppendOutcome::Shown { seq, scroll }
    }

    /// Flips a locally sent message from `Sent` to `Delivered`.
    pub fn mark_delivered(&mut self, seq: u64) -> bool {
        let target = self
            .messages
            .iter_mut()
            .chain(self.pending.iter_mut())
            .find(|message| message.seq == seq);
        match target {
            Some(message) if message.delivery == DeliveryStatus::Sent => {
                message.delivery = DeliveryStatus::Delivered;
                true
            }
            _ => false,
        }
    }

    /// Records the viewport position reported by the view.
    pub fn on_scroll(&mut self, distance_from_bottom: f64) {
        let near_bottom = distance_from_bottom < self.near_bottom_threshold;
        self.scroll.near_bottom = near_bottom;
        self.scroll.show_scroll_button = !near_bottom;
        if near_bottom {
            self.scroll.has_new_message = false;
        }
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll = ScrollState::default();
    }

    fn is_stale(&self, generation: u64, peer: UserId) -> bool {
        generation != self.generation || Some(peer) != self.peer
    }

    fn insert(&mut self, mut message: Message) {
        message.seq = self.take_seq();
        self.messages.push(message);
    }

    /// Seqs are never reused, not even across peers, so a late timer can
    /// never touch an unrelated message.
    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

#[cfg(test)]
#[path = "tests/transcript_tests.rs"]
mod tests;
