//! Wire Protocol Types
//!
//! Every frame on the multiplexed connection is a JSON envelope
//! `{ "event": <tag>, "data": <payload> }` in both directions. Outbound
//! frames are modeled as [`ClientEvent`]; inbound frames are decoded by tag
//! through [`ServerEvent::parse`] so unknown tags can be ignored instead of
//! failing the whole frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::models::{
    ConversationId, DeliveryStatus, Message, MessageTemplate, ParticipantId, ParticipantRef,
    Severity,
};

/// Raw frame as it travels on the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn encode(&self) -> String {
        // An envelope of plain JSON values cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Wire projection of a conversation, as carried by list snapshots and
/// new-conversation pushes. The engine folds these into
/// [`crate::models::ConversationSummary`] values, with the kind taken from
/// the event tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub id: ConversationId,
    pub name: String,
    #[serde(default)]
    pub members: Vec<ParticipantRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    #[serde(default)]
    pub unread: u32,
    /// Colleague conversations only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationList {
    pub items: Vec<ConversationSnapshot>,
}

/// Full message snapshot for one conversation, newest first, up to the
/// limit the client last requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePage {
    pub conversation: ConversationId,
    pub total: u32,
    pub items: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingUpdate {
    pub conversation: ConversationId,
    pub participant: ParticipantId,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub conversation: ConversationId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub conversation: ConversationId,
    pub message: String,
    pub status: DeliveryStatus,
}

/// Backend confirmation of a handoff. The engine synthesizes the visible
/// Transfer message from this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferConfirm {
    pub conversation: ConversationId,
    pub from: ParticipantRef,
    pub to: Vec<ParticipantRef>,
    pub message_id: String,
    pub ts: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateList {
    pub items: Vec<MessageTemplate>,
}

/// Template CRUD outcome, correlated by action tag rather than payload id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateStatus {
    pub action: String,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactList {
    pub items: Vec<ParticipantRef>,
}

/// Backend-reported business status outside the template flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessStatus {
    pub tag: String,
    pub severity: Severity,
    pub message: String,
}

/// Messages pushed FROM the backend TO the engine, decoded by event tag.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Pong,
    /// Snapshot of all client conversations.
    Appeals(ConversationList),
    /// Snapshot of all colleague conversations.
    Chats(ConversationList),
    /// A client conversation was announced.
    NewAppeal(ConversationSnapshot),
    /// A colleague conversation was announced.
    NewChat(ConversationSnapshot),
    /// Message pushed into a client conversation.
    AppealMessage(Message),
    /// Message pushed into a colleague conversation.
    ChatMessage(Message),
    MessagePage(MessagePage),
    Typing(TypingUpdate),
    Online(PresenceUpdate),
    Offline(PresenceUpdate),
    MessageStatus(StatusUpdate),
    TransferConfirm(TransferConfirm),
    Templates(TemplateList),
    TemplateStatus(TemplateStatus),
    SearchChats(ConversationList),
    SearchContacts(ContactList),
    ReadAllConfirm,
    Status(BusinessStatus),
}

impl ServerEvent {
    /// Decode an envelope into a typed event. Unknown tags return `None`
    /// and are ignored by the dispatcher; a malformed payload for a known
    /// tag is logged and also dropped.
    pub fn parse(envelope: &Envelope) -> Option<ServerEvent> {
        fn payload<T: serde::de::DeserializeOwned>(tag: &str, data: &Value) -> Option<T> {
            match serde_json::from_value(data.clone()) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(event = tag, "Dropping malformed payload: {}", e);
                    None
                }
            }
        }

        let tag = envelope.event.as_str();
        let data = &envelope.data;
        match tag {
            "PONG" => Some(ServerEvent::Pong),
            "appeals" => payload(tag, data).map(ServerEvent::Appeals),
            "chats" => payload(tag, data).map(ServerEvent::Chats),
            "newWorkAppeal" => payload(tag, data).map(ServerEvent::NewAppeal),
            "newChat" => payload(tag, data).map(ServerEvent::NewChat),
            "newMessageAppeal" => payload(tag, data).map(ServerEvent::AppealMessage),
            "newMessage" => payload(tag, data).map(ServerEvent::ChatMessage),
            "messages" => payload(tag, data).map(ServerEvent::MessagePage),
            "typing" => payload(tag, data).map(ServerEvent::Typing),
            "online" => payload(tag, data).map(ServerEvent::Online),
            "offline" => payload(tag, data).map(ServerEvent::Offline),
            "messageStatus" => payload(tag, data).map(ServerEvent::MessageStatus),
            "transferChat" => payload(tag, data).map(ServerEvent::TransferConfirm),
            "templates" => payload(tag, data).map(ServerEvent::Templates),
            "templateStatus" => payload(tag, data).map(ServerEvent::TemplateStatus),
            "searchChats" => payload(tag, data).map(ServerEvent::SearchChats),
            "searchContacts" => payload(tag, data).map(ServerEvent::SearchContacts),
            "readAll" => Some(ServerEvent::ReadAllConfirm),
            "status" => payload(tag, data).map(ServerEvent::Status),
            _ => None,
        }
    }
}

/// Messages sent FROM the engine TO the backend.
///
/// Serializes directly to the `{event, data}` envelope shape; unit
/// variants (keepalive, list requests) omit `data` entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    Ping,
    #[serde(rename = "getAppeals")]
    GetAppeals,
    #[serde(rename = "getChats")]
    GetChats,
    /// Conversation-scoped fetch; the backend answers with a full snapshot
    /// up to `limit`, so re-issuing with a larger limit is the whole
    /// pagination story.
    #[serde(rename = "getMessages")]
    GetMessages {
        conversation: ConversationId,
        limit: u32,
    },
    #[serde(rename = "sendMessage")]
    SendMessage {
        conversation: ConversationId,
        text: String,
        secret_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        answered: Option<String>,
    },
    #[serde(rename = "sendTemplate")]
    SendTemplate {
        conversation: ConversationId,
        template_id: String,
        text: String,
        secret_key: String,
    },
    #[serde(rename = "typing")]
    Typing {
        conversation: ConversationId,
        active: bool,
    },
    /// Read receipt for a single conversation.
    #[serde(rename = "readChat")]
    ReadChat { conversation: ConversationId },
    #[serde(rename = "readAll")]
    ReadAll,
    #[serde(rename = "searchChats")]
    SearchChats { query: String },
    #[serde(rename = "searchContacts")]
    SearchContacts { query: String },
    #[serde(rename = "createTemplate")]
    CreateTemplate { title: String, body: String },
    #[serde(rename = "updateTemplate")]
    UpdateTemplate {
        id: String,
        title: String,
        body: String,
    },
    #[serde(rename = "deleteTemplate")]
    DeleteTemplate { id: String },
    #[serde(rename = "transferChat")]
    TransferChat {
        conversation: ConversationId,
        to: Vec<ParticipantRef>,
        /// Most recent message, sent along as context for the recipients.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<Message>,
    },
}

impl ClientEvent {
    pub fn to_envelope(&self) -> Envelope {
        // ClientEvent serializes exactly to the envelope shape.
        let value = serde_json::to_value(self).unwrap_or(Value::Null);
        serde_json::from_value(value).unwrap_or(Envelope {
            event: String::new(),
            data: Value::Null,
        })
    }
}
