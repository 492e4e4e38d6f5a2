use std::time::Duration;

use tokio::time::Instant;

/// Local typing indicator: every keystroke announces its state and re-arms
/// an idle timer that announces the stop exactly once.
#[derive(Debug, Clone)]
pub struct TypingDebouncer {
    idle: Duration,
    stop_at: Option<Instant>,
}

impl TypingDebouncer {
    pub fn new(idle: Duration) -> Self {
        Self {
            idle,
            stop_at: None,
        }
    }

    /// Returns the `is_typing` value to announce for this keystroke.
    pub fn on_input(&mut self, text: &str, now: Instant) -> bool {
        let is_typing = !text.is_empty();
        self.stop_at = is_typing.then(|| now + self.idle);
        is_typing
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.stop_at
    }

    /// `true` when the idle timer has fired and a stop must be announced.
    pub fn on_deadline(&mut self, now: Instant) -> bool {
        match self.stop_at {
            Some(at) if at <= now => {
                self.stop_at = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.stop_at = None;
    }
}
