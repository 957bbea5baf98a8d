//! Presence & Typing Tracker
//!
//! Ephemeral "participant X is typing in conversation Y" state. The engine
//! reflects whatever the backend tells it, but applies a local TTL so a
//! lost `typing:false` cannot pin a stale indicator forever.

use std::collections::HashMap;

use tokio::time::{Duration, Instant};

use crate::models::{ConversationId, ParticipantId};

pub(crate) struct TypingTracker {
    ttl: Duration,
    entries: HashMap<(ConversationId, ParticipantId), Instant>,
}

impl TypingTracker {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// `typing:true` — insert or refresh the indicator.
    pub(crate) fn observe(
        &mut self,
        conversation: &ConversationId,
        participant: &ParticipantId,
        now: Instant,
    ) {
        self.entries
            .insert((conversation.clone(), participant.clone()), now);
    }

    /// `typing:false` — returns true if an indicator was actually removed.
    pub(crate) fn clear(
        &mut self,
        conversation: &ConversationId,
        participant: &ParticipantId,
    ) -> bool {
        self.entries
            .remove(&(conversation.clone(), participant.clone()))
            .is_some()
    }

    /// Drop every indicator for a conversation (it was closed).
    pub(crate) fn clear_conversation(&mut self, conversation: &str) {
        self.entries.retain(|(conv, _), _| conv != conversation);
    }

    /// Remove indicators older than the TTL; returns the expired pairs so
    /// the caller can mirror the removal into the directory summaries.
    pub(crate) fn sweep(&mut self, now: Instant) -> Vec<(ConversationId, ParticipantId)> {
        let ttl = self.ttl;
        let mut expired = Vec::new();
        self.entries.retain(|key, seen| {
            if now.duration_since(*seen) >= ttl {
                expired.push(key.clone());
                false
            } else {
                true
            }
        });
        expired
    }

    pub(crate) fn active_in(&self, conversation: &str) -> Vec<ParticipantId> {
        let mut ids: Vec<ParticipantId> = self
            .entries
            .keys()
            .filter(|(conv, _)| conv == conversation)
            .map(|(_, participant)| participant.clone())
            .collect();
        ids.sort();
        ids
    }
}
