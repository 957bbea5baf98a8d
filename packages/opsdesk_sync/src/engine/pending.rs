//! Pending-send table
//!
//! An optimistic outbound message is staged here under its correlation
//! key (a uuid, generated at send time) and reconciled when the
//! authoritative echo arrives carrying the same key. The engine never
//! fabricates durable ids for optimistic messages; until the echo lands,
//! the placeholder is only visible through the timeline snapshot's
//! `pending` list.

use crate::models::Message;

/// Placeholders older than this many entries are evicted; an echo that
/// never arrives must not grow the table forever.
const MAX_PENDING: usize = 64;

pub(crate) struct PendingSendTable {
    // Insertion order = send order, which is also display order.
    entries: Vec<(String, Message)>,
}

impl PendingSendTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub(crate) fn stage(&mut self, key: String, placeholder: Message) {
        self.entries.push((key, placeholder));
        while self.entries.len() > MAX_PENDING {
            self.entries.remove(0);
        }
    }

    /// If the message is the authoritative echo of a staged send, consume
    /// the placeholder and return true.
    pub(crate) fn reconcile(&mut self, msg: &Message) -> bool {
        let Some(key) = msg.correlation_key.as_deref() else {
            return false;
        };
        match self.entries.iter().position(|(k, _)| k == key) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Drop placeholders staged for a conversation (it was closed).
    pub(crate) fn clear_conversation(&mut self, conversation: &str) {
        self.entries.retain(|(_, m)| m.conversation != conversation);
    }

    pub(crate) fn placeholders_for(&self, conversation: &str) -> Vec<Message> {
        self.entries
            .iter()
            .filter(|(_, m)| m.conversation == conversation)
            .map(|(_, m)| m.clone())
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
