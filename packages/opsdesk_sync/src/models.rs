//! Domain types shared by the engine, the wire protocol, and published
//! snapshots.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Conversations and participants are addressed by opaque backend ids.
pub type ConversationId = String;
pub type ParticipantId = String;

/// Maximum accepted length (in characters) of an outbound text message.
/// Longer bodies are rejected client-side before any transport send.
pub const MAX_TEXT_LEN: usize = 4095;

/// An agent or external party referenced by messages and memberships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRef {
    pub id: ParticipantId,
    pub name: String,
}

/// Which side of the console a conversation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    /// External party (customer-facing work appeal).
    Client,
    /// Internal colleague chat.
    Colleague,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

/// Non-owning back-reference to a replied-to message: id plus a text
/// snapshot, never the message itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnsweredRef {
    pub id: String,
    pub preview: String,
}

/// Message payload, variant by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MessageBody {
    Text {
        text: String,
    },
    Image {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Video {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Audio {
        url: String,
        duration_secs: u32,
    },
    Document {
        url: String,
        file_name: String,
        size_bytes: u64,
    },
    Template {
        template_id: String,
        text: String,
    },
    /// Synthetic entry recording a handoff, visible in the timeline.
    Transfer {
        from: ParticipantRef,
        to: Vec<ParticipantRef>,
    },
    /// Internal note attached to a conversation, not delivered externally.
    Commentary {
        text: String,
    },
    Call {
        duration_secs: u32,
        missed: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    /// None for messages authored by the external party.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<ParticipantRef>,
    pub conversation: ConversationId,
    /// Unix seconds.
    pub ts: i64,
    #[serde(flatten)]
    pub body: MessageBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DeliveryStatus>,
    /// Correlation token linking an optimistic send to its authoritative
    /// echo. Only present on messages we authored this session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answered: Option<AnsweredRef>,
}

impl Message {
    /// Short text rendering used for previews and transfer context.
    pub fn preview(&self) -> String {
        match &self.body {
            MessageBody::Text { text } | MessageBody::Commentary { text } => text.clone(),
            MessageBody::Template { text, .. } => text.clone(),
            MessageBody::Image { .. } => "[image]".to_string(),
            MessageBody::Video { .. } => "[video]".to_string(),
            MessageBody::Audio { .. } => "[audio]".to_string(),
            MessageBody::Document { file_name, .. } => format!("[file] {}", file_name),
            MessageBody::Transfer { to, .. } => {
                let names: Vec<&str> = to.iter().map(|p| p.name.as_str()).collect();
                format!("[transferred to {}]", names.join(", "))
            }
            MessageBody::Call { missed: true, .. } => "[missed call]".to_string(),
            MessageBody::Call { .. } => "[call]".to_string(),
        }
    }
}

/// Handoff in flight for a conversation: recorded at initiation, consumed
/// on the backend's confirmation push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTransfer {
    pub from: ParticipantRef,
    pub to: Vec<ParticipantRef>,
    pub initiated_ts: i64,
}

/// List-view projection of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub kind: ConversationKind,
    pub name: String,
    /// Participant roster; meaningful for colleague conversations.
    #[serde(default)]
    pub members: Vec<ParticipantRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    #[serde(default)]
    pub unread: u32,
    /// Colleague conversations only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<Presence>,
    /// Participants currently typing in this conversation.
    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub typing: HashSet<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_transfer: Option<PendingTransfer>,
}

impl ConversationSummary {
    /// Timestamp of the last message, if any. Drives directory ordering.
    pub fn last_ts(&self) -> Option<i64> {
        self.last_message.as_ref().map(|m| m.ts)
    }
}

/// Canned reply managed via template CRUD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub id: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// User-actionable outcome published to collaborators for display.
/// Validation failures and backend rejections travel this way instead of
/// crossing the facade as errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusNotice {
    /// Short machine tag, e.g. "sendMessage" or "createTemplate".
    pub tag: String,
    pub severity: Severity,
    pub message: String,
}

impl StatusNotice {
    pub fn new(tag: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            severity,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_message(id: &str, ts: i64) -> Message {
        Message {
            id: id.to_string(),
            author: None,
            conversation: "conv-1".to_string(),
            ts,
            body: MessageBody::Text {
                text: "hello".to_string(),
            },
            status: None,
            correlation_key: None,
            answered: None,
        }
    }

    #[test]
    fn message_serde_flattens_body() {
        let msg = text_message("m-1", 1700000000);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "text");
        assert_eq!(json["text"], "hello");
        assert_eq!(json["ts"], 1700000000);
        // Absent optionals are omitted entirely
        assert!(json.get("status").is_none());
        assert!(json.get("correlation_key").is_none());

        let rt: Message = serde_json::from_value(json).unwrap();
        assert_eq!(rt, msg);
    }

    #[test]
    fn message_serde_transfer_body() {
        let msg = Message {
            id: "m-2".to_string(),
            author: Some(ParticipantRef {
                id: "a-1".to_string(),
                name: "Alice".to_string(),
            }),
            conversation: "conv-1".to_string(),
            ts: 10,
            body: MessageBody::Transfer {
                from: ParticipantRef {
                    id: "a-1".to_string(),
                    name: "Alice".to_string(),
                },
                to: vec![ParticipantRef {
                    id: "a-2".to_string(),
                    name: "Bob".to_string(),
                }],
            },
            status: None,
            correlation_key: None,
            answered: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["kind"], "transfer");
        assert_eq!(json["to"][0]["name"], "Bob");
    }

    #[test]
    fn preview_by_kind() {
        let mut msg = text_message("m-1", 1);
        assert_eq!(msg.preview(), "hello");

        msg.body = MessageBody::Document {
            url: "u".to_string(),
            file_name: "act.pdf".to_string(),
            size_bytes: 1024,
        };
        assert_eq!(msg.preview(), "[file] act.pdf");

        msg.body = MessageBody::Call {
            duration_secs: 0,
            missed: true,
        };
        assert_eq!(msg.preview(), "[missed call]");
    }

    #[test]
    fn summary_last_ts() {
        let mut summary = ConversationSummary {
            id: "conv-1".to_string(),
            kind: ConversationKind::Client,
            name: "Acme".to_string(),
            members: vec![],
            last_message: None,
            unread: 0,
            presence: None,
            typing: HashSet::new(),
            pending_transfer: None,
        };
        assert!(summary.last_ts().is_none());

        summary.last_message = Some(text_message("m-1", 42));
        assert_eq!(summary.last_ts(), Some(42));
    }

    #[test]
    fn summary_deserializes_with_defaults() {
        let json = serde_json::json!({
            "id": "conv-9",
            "kind": "colleague",
            "name": "Ops room",
        });
        let summary: ConversationSummary = serde_json::from_value(json).unwrap();
        assert_eq!(summary.kind, ConversationKind::Colleague);
        assert_eq!(summary.unread, 0);
        assert!(summary.members.is_empty());
        assert!(summary.typing.is_empty());
    }
}
