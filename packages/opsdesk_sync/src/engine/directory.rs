//! Conversation Directory
//!
//! The two partitioned, independently sorted lists of conversation
//! summaries: client (external) conversations and colleague (internal)
//! conversations. Every mutation re-establishes the sort invariant:
//! descending last-message timestamp, messageless conversations after all
//! conversations that have one, insertion-stable among themselves.

use std::cmp::Ordering;
use std::collections::HashSet;

use tracing::debug;

use crate::models::{
    ConversationKind, ConversationSummary, Message, ParticipantId, Presence,
};
use crate::protocol::ConversationSnapshot;

pub(crate) struct Directory {
    clients: Vec<ConversationSummary>,
    colleagues: Vec<ConversationSummary>,
}

/// Fold a wire snapshot into a summary. The kind comes from the event tag,
/// never from the payload.
pub(crate) fn summary_from_snapshot(
    snap: ConversationSnapshot,
    kind: ConversationKind,
) -> ConversationSummary {
    let presence = match kind {
        ConversationKind::Colleague => Some(match snap.online {
            Some(true) => Presence::Online,
            _ => Presence::Offline,
        }),
        ConversationKind::Client => None,
    };
    ConversationSummary {
        id: snap.id,
        kind,
        name: snap.name,
        members: snap.members,
        last_message: snap.last_message,
        unread: snap.unread,
        presence,
        typing: HashSet::new(),
        pending_transfer: None,
    }
}

fn by_last_message(a: &ConversationSummary, b: &ConversationSummary) -> Ordering {
    match (a.last_ts(), b.last_ts()) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

impl Directory {
    pub(crate) fn new() -> Self {
        Self {
            clients: Vec::new(),
            colleagues: Vec::new(),
        }
    }

    pub(crate) fn clients(&self) -> &[ConversationSummary] {
        &self.clients
    }

    pub(crate) fn colleagues(&self) -> &[ConversationSummary] {
        &self.colleagues
    }

    fn list_mut(&mut self, kind: ConversationKind) -> &mut Vec<ConversationSummary> {
        match kind {
            ConversationKind::Client => &mut self.clients,
            ConversationKind::Colleague => &mut self.colleagues,
        }
    }

    #[allow(dead_code)]
    pub(crate) fn find(&self, id: &str) -> Option<&ConversationSummary> {
        self.clients
            .iter()
            .chain(self.colleagues.iter())
            .find(|s| s.id == id)
    }

    pub(crate) fn find_mut(&mut self, id: &str) -> Option<&mut ConversationSummary> {
        self.clients
            .iter_mut()
            .chain(self.colleagues.iter_mut())
            .find(|s| s.id == id)
    }

    fn resort(&mut self, kind: ConversationKind) {
        // Vec::sort_by is stable, which is exactly what keeps messageless
        // conversations in insertion order.
        self.list_mut(kind).sort_by(by_last_message);
    }

    /// Replace one partition from a full snapshot. Session-local state
    /// (typing sets, in-flight transfers) survives the replace so a
    /// reconnect resync does not wipe it.
    pub(crate) fn replace(&mut self, kind: ConversationKind, items: Vec<ConversationSnapshot>) {
        let old = std::mem::take(self.list_mut(kind));
        let mut fresh: Vec<ConversationSummary> = items
            .into_iter()
            .map(|snap| summary_from_snapshot(snap, kind))
            .collect();
        for summary in &mut fresh {
            if let Some(prev) = old.iter().find(|s| s.id == summary.id) {
                summary.typing = prev.typing.clone();
                summary.pending_transfer = prev.pending_transfer.clone();
            }
        }
        *self.list_mut(kind) = fresh;
        self.resort(kind);
    }

    /// A conversation was announced (`newChat` / `newWorkAppeal`).
    pub(crate) fn upsert(&mut self, kind: ConversationKind, snap: ConversationSnapshot) {
        let summary = summary_from_snapshot(snap, kind);
        let list = self.list_mut(kind);
        match list.iter_mut().find(|s| s.id == summary.id) {
            Some(existing) => {
                existing.name = summary.name;
                existing.members = summary.members;
                existing.last_message = summary.last_message;
                existing.unread = summary.unread;
                if summary.presence.is_some() {
                    existing.presence = summary.presence;
                }
            }
            None => list.push(summary),
        }
        self.resort(kind);
    }

    /// Merge an inbound message into its conversation's summary.
    ///
    /// For the open conversation the unread counter stays at 0 (the caller
    /// emits a read receipt instead); for any other conversation it goes up
    /// by one. Returns false if the conversation is unknown.
    pub(crate) fn record_message(&mut self, msg: &Message, open: bool) -> bool {
        let Some(summary) = self.find_mut(&msg.conversation) else {
            debug!(conversation = %msg.conversation, "Message for unknown conversation");
            return false;
        };
        summary.last_message = Some(msg.clone());
        if !open {
            summary.unread += 1;
        }
        let kind = summary.kind;
        self.resort(kind);
        true
    }

    /// Zero the unread counter (conversation was opened, or its read
    /// receipt was confirmed).
    pub(crate) fn clear_unread(&mut self, id: &str) -> bool {
        match self.find_mut(id) {
            Some(summary) => {
                summary.unread = 0;
                true
            }
            None => false,
        }
    }

    pub(crate) fn zero_all_unread(&mut self) {
        for summary in self.clients.iter_mut().chain(self.colleagues.iter_mut()) {
            summary.unread = 0;
        }
    }

    /// Presence mutates only the matching colleague summary; it never
    /// reorders the list.
    pub(crate) fn set_presence(&mut self, conversation: &str, presence: Presence) -> bool {
        match self.colleagues.iter_mut().find(|s| s.id == conversation) {
            Some(summary) => {
                summary.presence = Some(presence);
                true
            }
            None => false,
        }
    }

    /// Maintain a summary's typing set. Returns true if the set changed.
    pub(crate) fn set_typing(
        &mut self,
        conversation: &str,
        participant: &ParticipantId,
        active: bool,
    ) -> bool {
        let Some(summary) = self.find_mut(conversation) else {
            return false;
        };
        if active {
            summary.typing.insert(participant.clone())
        } else {
            summary.typing.remove(participant)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageBody;

    fn snap(id: &str, last_ts: Option<i64>) -> ConversationSnapshot {
        ConversationSnapshot {
            id: id.to_string(),
            name: format!("name-{}", id),
            members: vec![],
            last_message: last_ts.map(|ts| msg("m", id, ts)),
            unread: 0,
            online: None,
        }
    }

    fn msg(id: &str, conversation: &str, ts: i64) -> Message {
        Message {
            id: id.to_string(),
            author: None,
            conversation: conversation.to_string(),
            ts,
            body: MessageBody::Text {
                text: "x".to_string(),
            },
            status: None,
            correlation_key: None,
            answered: None,
        }
    }

    fn ids(list: &[ConversationSummary]) -> Vec<&str> {
        list.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn replace_sorts_descending_with_messageless_last() {
        let mut dir = Directory::new();
        dir.replace(ConversationKind::Client, vec![
            snap("a", Some(10)),
            snap("b", None),
            snap("c", Some(30)),
            snap("d", None),
            snap("e", Some(20)),
        ]);
        assert_eq!(ids(dir.clients()), vec!["c", "e", "a", "b", "d"]);
    }

    #[test]
    fn record_message_reorders_and_increments_unread() {
        let mut dir = Directory::new();
        dir.replace(ConversationKind::Client, vec![
            snap("a", Some(30)),
            snap("b", Some(20)),
        ]);

        assert!(dir.record_message(&msg("m9", "b", 40), false));
        assert_eq!(ids(dir.clients()), vec!["b", "a"]);
        assert_eq!(dir.find("b").unwrap().unread, 1);
    }

    #[test]
    fn record_message_open_keeps_unread_zero() {
        let mut dir = Directory::new();
        dir.replace(ConversationKind::Client, vec![snap("a", Some(30))]);

        assert!(dir.record_message(&msg("m9", "a", 40), true));
        assert_eq!(dir.find("a").unwrap().unread, 0);
    }

    #[test]
    fn record_message_unknown_conversation_is_ignored() {
        let mut dir = Directory::new();
        assert!(!dir.record_message(&msg("m1", "ghost", 1), false));
    }

    #[test]
    fn unread_accumulates_then_clears_on_open() {
        let mut dir = Directory::new();
        dir.replace(ConversationKind::Client, vec![snap("a", Some(1))]);

        dir.record_message(&msg("m1", "a", 2), false);
        dir.record_message(&msg("m2", "a", 3), false);
        assert_eq!(dir.find("a").unwrap().unread, 2);

        assert!(dir.clear_unread("a"));
        assert_eq!(dir.find("a").unwrap().unread, 0);
    }

    #[test]
    fn presence_does_not_reorder() {
        let mut dir = Directory::new();
        dir.replace(ConversationKind::Colleague, vec![
            snap("a", Some(30)),
            snap("b", Some(20)),
        ]);

        assert!(dir.set_presence("b", Presence::Online));
        assert_eq!(ids(dir.colleagues()), vec!["a", "b"]);
        assert_eq!(dir.find("b").unwrap().presence, Some(Presence::Online));
    }

    #[test]
    fn presence_only_touches_colleague_list() {
        let mut dir = Directory::new();
        dir.replace(ConversationKind::Client, vec![snap("a", Some(1))]);
        assert!(!dir.set_presence("a", Presence::Online));
        assert!(dir.find("a").unwrap().presence.is_none());
    }

    #[test]
    fn colleague_snapshot_maps_online_flag() {
        let mut dir = Directory::new();
        let mut s = snap("a", None);
        s.online = Some(true);
        dir.replace(ConversationKind::Colleague, vec![s, snap("b", None)]);
        assert_eq!(dir.find("a").unwrap().presence, Some(Presence::Online));
        assert_eq!(dir.find("b").unwrap().presence, Some(Presence::Offline));
    }

    #[test]
    fn typing_set_add_remove() {
        let mut dir = Directory::new();
        dir.replace(ConversationKind::Colleague, vec![snap("a", None)]);

        assert!(dir.set_typing("a", &"p1".to_string(), true));
        // Re-adding the same participant is a no-op
        assert!(!dir.set_typing("a", &"p1".to_string(), true));
        assert!(dir.find("a").unwrap().typing.contains("p1"));

        assert!(dir.set_typing("a", &"p1".to_string(), false));
        assert!(dir.find("a").unwrap().typing.is_empty());
    }

    #[test]
    fn replace_preserves_typing_and_transfer_state() {
        let mut dir = Directory::new();
        dir.replace(ConversationKind::Client, vec![snap("a", Some(1))]);
        dir.set_typing("a", &"p1".to_string(), true);

        // Resync snapshot from a reconnect
        dir.replace(ConversationKind::Client, vec![
            snap("a", Some(5)),
            snap("b", Some(2)),
        ]);
        assert!(dir.find("a").unwrap().typing.contains("p1"));
        assert!(dir.find("b").unwrap().typing.is_empty());
    }

    #[test]
    fn upsert_new_then_update() {
        let mut dir = Directory::new();
        dir.upsert(ConversationKind::Client, snap("a", Some(10)));
        assert_eq!(dir.clients().len(), 1);

        let mut updated = snap("a", Some(50));
        updated.name = "renamed".to_string();
        dir.upsert(ConversationKind::Client, updated);
        assert_eq!(dir.clients().len(), 1);
        let a = dir.find("a").unwrap();
        assert_eq!(a.name, "renamed");
        assert_eq!(a.last_ts(), Some(50));
    }

    #[test]
    fn zero_all_unread_covers_both_partitions() {
        let mut dir = Directory::new();
        dir.replace(ConversationKind::Client, vec![snap("a", Some(1))]);
        dir.replace(ConversationKind::Colleague, vec![snap("b", Some(1))]);
        dir.record_message(&msg("m1", "a", 2), false);
        dir.record_message(&msg("m2", "b", 2), false);

        dir.zero_all_unread();
        assert_eq!(dir.find("a").unwrap().unread, 0);
        assert_eq!(dir.find("b").unwrap().unread, 0);
    }
}
