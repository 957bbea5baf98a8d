//! Engine state and the command-side operations of the action facade.
//!
//! All mutation happens on the engine task; these methods are plain state
//! transitions that emit outbound events into an outbox and change
//! notifications into a notice list, both flushed by the caller.

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::models::{
    ConversationId, Message, MessageBody, MessageTemplate, ParticipantId, ParticipantRef, Severity,
    StatusNotice, MAX_TEXT_LEN,
};
use crate::protocol::ClientEvent;

use super::directory::Directory;
use super::pending::PendingSendTable;
use super::timeline::Timeline;
use super::transfer;
use super::typing::TypingTracker;

/// Change notifications published to collaborators. Snapshots are pulled
/// through the handle; a notice only says *what* is worth re-reading.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineNotice {
    DirectoryUpdated,
    TimelineUpdated,
    TypingUpdated,
    TemplatesUpdated,
    ContactsUpdated,
    Status(StatusNotice),
}

/// Read-only projection of the two conversation lists.
#[derive(Debug, Clone, Serialize)]
pub struct DirectorySnapshot {
    pub clients: Vec<crate::models::ConversationSummary>,
    pub colleagues: Vec<crate::models::ConversationSummary>,
}

/// Read-only projection of the open conversation.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineSnapshot {
    pub conversation: Option<ConversationId>,
    /// Chronological (oldest first).
    pub messages: Vec<Message>,
    /// Optimistic placeholders awaiting their authoritative echo, in send
    /// order; rendered after `messages`.
    pub pending: Vec<Message>,
    /// Total available on the backend, not just the fetched window.
    pub total: u32,
    /// Content height to restore after backward pagination; None means
    /// land at the bottom.
    pub scroll_anchor: Option<f64>,
}

pub(crate) struct EngineState {
    pub(crate) identity: Option<ParticipantRef>,
    pub(crate) directory: Directory,
    pub(crate) timeline: Timeline,
    pub(crate) typing: TypingTracker,
    pub(crate) pending: PendingSendTable,
    pub(crate) templates: Vec<MessageTemplate>,
    pub(crate) contacts: Vec<ParticipantRef>,
}

impl EngineState {
    pub(crate) fn new(cfg: EngineConfig) -> Self {
        Self {
            identity: None,
            directory: Directory::new(),
            timeline: Timeline::new(cfg.page_size),
            typing: TypingTracker::new(cfg.typing_ttl),
            pending: PendingSendTable::new(),
            templates: Vec::new(),
            contacts: Vec::new(),
        }
    }

    // ── snapshots ───────────────────────────────────────────────────────

    pub(crate) fn directory_snapshot(&self) -> DirectorySnapshot {
        DirectorySnapshot {
            clients: self.directory.clients().to_vec(),
            colleagues: self.directory.colleagues().to_vec(),
        }
    }

    pub(crate) fn timeline_snapshot(&self) -> TimelineSnapshot {
        let conversation = self.timeline.conversation().cloned();
        let pending = conversation
            .as_deref()
            .map(|id| self.pending.placeholders_for(id))
            .unwrap_or_default();
        TimelineSnapshot {
            conversation,
            messages: self.timeline.in_order(),
            pending,
            total: self.timeline.total(),
            scroll_anchor: self.timeline.restored_anchor(),
        }
    }

    pub(crate) fn typing_snapshot(&self) -> Vec<ParticipantId> {
        self.timeline
            .conversation()
            .map(|id| self.typing.active_in(id))
            .unwrap_or_default()
    }

    // ── facade operations ───────────────────────────────────────────────

    /// Open a conversation: the atomic triple (load timeline, zero
    /// unread, emit read receipt).
    pub(crate) fn open_conversation(
        &mut self,
        id: ConversationId,
        outbox: &mut Vec<ClientEvent>,
        notices: &mut Vec<EngineNotice>,
    ) {
        self.directory.clear_unread(&id);
        self.timeline.open(id.clone());
        outbox.push(ClientEvent::ReadChat {
            conversation: id.clone(),
        });
        outbox.push(ClientEvent::GetMessages {
            conversation: id,
            limit: self.timeline.limit(),
        });
        notices.push(EngineNotice::DirectoryUpdated);
        notices.push(EngineNotice::TimelineUpdated);
    }

    pub(crate) fn close_conversation(&mut self, notices: &mut Vec<EngineNotice>) {
        if let Some(id) = self.timeline.conversation().cloned() {
            self.typing.clear_conversation(&id);
            self.pending.clear_conversation(&id);
            self.timeline.close();
            notices.push(EngineNotice::TimelineUpdated);
            notices.push(EngineNotice::TypingUpdated);
        }
    }

    pub(crate) fn send_text(
        &mut self,
        body: String,
        now_ts: i64,
        outbox: &mut Vec<ClientEvent>,
        notices: &mut Vec<EngineNotice>,
    ) {
        let Some(conversation) = self.timeline.conversation().cloned() else {
            notices.push(EngineNotice::Status(StatusNotice::new(
                "sendMessage",
                Severity::Warning,
                "No conversation is open",
            )));
            return;
        };
        if body.chars().count() > MAX_TEXT_LEN {
            notices.push(EngineNotice::Status(StatusNotice::new(
                "sendMessage",
                Severity::Warning,
                format!("Message is too long (max {} characters)", MAX_TEXT_LEN),
            )));
            return;
        }

        let key = Uuid::new_v4().to_string();
        self.pending.stage(key.clone(), Message {
            id: key.clone(),
            author: self.identity.clone(),
            conversation: conversation.clone(),
            ts: now_ts,
            body: MessageBody::Text { text: body.clone() },
            status: None,
            correlation_key: Some(key.clone()),
            answered: None,
        });
        outbox.push(ClientEvent::SendMessage {
            conversation,
            text: body,
            secret_key: key,
            answered: None,
        });
        notices.push(EngineNotice::TimelineUpdated);
    }

    pub(crate) fn send_template(
        &mut self,
        template: MessageTemplate,
        now_ts: i64,
        outbox: &mut Vec<ClientEvent>,
        notices: &mut Vec<EngineNotice>,
    ) {
        let Some(conversation) = self.timeline.conversation().cloned() else {
            notices.push(EngineNotice::Status(StatusNotice::new(
                "sendTemplate",
                Severity::Warning,
                "No conversation is open",
            )));
            return;
        };
        if template.body.is_empty() || template.body.chars().count() > MAX_TEXT_LEN {
            notices.push(EngineNotice::Status(StatusNotice::new(
                "sendTemplate",
                Severity::Warning,
                "Template body is empty or too long",
            )));
            return;
        }

        let key = Uuid::new_v4().to_string();
        self.pending.stage(key.clone(), Message {
            id: key.clone(),
            author: self.identity.clone(),
            conversation: conversation.clone(),
            ts: now_ts,
            body: MessageBody::Template {
                template_id: template.id.clone(),
                text: template.body.clone(),
            },
            status: None,
            correlation_key: Some(key.clone()),
            answered: None,
        });
        outbox.push(ClientEvent::SendTemplate {
            conversation,
            template_id: template.id,
            text: template.body,
            secret_key: key,
        });
        notices.push(EngineNotice::TimelineUpdated);
    }

    pub(crate) fn load_more(&mut self, anchor: Option<f64>, outbox: &mut Vec<ClientEvent>) {
        let Some(conversation) = self.timeline.conversation().cloned() else {
            debug!("load_more with no open conversation");
            return;
        };
        let limit = self.timeline.grow(anchor);
        outbox.push(ClientEvent::GetMessages {
            conversation,
            limit,
        });
    }

    pub(crate) fn mark_all_read(&mut self, outbox: &mut Vec<ClientEvent>) {
        outbox.push(ClientEvent::ReadAll);
    }

    pub(crate) fn set_typing(&mut self, active: bool, outbox: &mut Vec<ClientEvent>) {
        if let Some(conversation) = self.timeline.conversation().cloned() {
            outbox.push(ClientEvent::Typing {
                conversation,
                active,
            });
        }
    }

    pub(crate) fn create_template(
        &mut self,
        title: String,
        body: String,
        outbox: &mut Vec<ClientEvent>,
        notices: &mut Vec<EngineNotice>,
    ) {
        if title.trim().is_empty() || body.trim().is_empty() {
            notices.push(EngineNotice::Status(StatusNotice::new(
                "createTemplate",
                Severity::Warning,
                "Template needs both a title and a body",
            )));
            return;
        }
        outbox.push(ClientEvent::CreateTemplate { title, body });
    }

    pub(crate) fn update_template(
        &mut self,
        template: MessageTemplate,
        outbox: &mut Vec<ClientEvent>,
        notices: &mut Vec<EngineNotice>,
    ) {
        if template.title.trim().is_empty() || template.body.trim().is_empty() {
            notices.push(EngineNotice::Status(StatusNotice::new(
                "updateTemplate",
                Severity::Warning,
                "Template needs both a title and a body",
            )));
            return;
        }
        outbox.push(ClientEvent::UpdateTemplate {
            id: template.id,
            title: template.title,
            body: template.body,
        });
    }

    pub(crate) fn delete_template(&mut self, id: String, outbox: &mut Vec<ClientEvent>) {
        outbox.push(ClientEvent::DeleteTemplate { id });
    }

    pub(crate) fn transfer(
        &mut self,
        to: Vec<ParticipantRef>,
        now_ts: i64,
        outbox: &mut Vec<ClientEvent>,
        notices: &mut Vec<EngineNotice>,
    ) {
        let Some(identity) = self.identity.clone() else {
            notices.push(EngineNotice::Status(StatusNotice::new(
                "transferChat",
                Severity::Error,
                "Identity is not known yet",
            )));
            return;
        };
        let Some(conversation) = self.timeline.conversation().cloned() else {
            notices.push(EngineNotice::Status(StatusNotice::new(
                "transferChat",
                Severity::Warning,
                "No conversation is open",
            )));
            return;
        };
        if to.is_empty() {
            notices.push(EngineNotice::Status(StatusNotice::new(
                "transferChat",
                Severity::Warning,
                "Pick at least one recipient",
            )));
            return;
        }
        match transfer::initiate(&mut self.directory, &conversation, &identity, to, now_ts) {
            Some(event) => {
                outbox.push(event);
                notices.push(EngineNotice::DirectoryUpdated);
            }
            None => {
                debug!(conversation = %conversation, "Transfer on unknown conversation");
            }
        }
    }
}
