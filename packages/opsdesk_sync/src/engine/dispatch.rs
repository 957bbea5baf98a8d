//! Event Dispatcher
//!
//! Single entry point for every inbound envelope: decode, then route by
//! tag to the reducer for that event. Reducers are pure transitions over
//! [`EngineState`]; the only side effect they may have is pushing a
//! mandated follow-up into the outbox (e.g. a list snapshot containing the
//! open conversation triggers a timeline refresh).

use tokio::time::Instant;
use tracing::debug;

use crate::models::{ConversationKind, Message, Presence, StatusNotice};
use crate::protocol::{ClientEvent, Envelope, ServerEvent};

use super::state::{EngineNotice, EngineState};
use super::transfer;

/// Decode and apply one inbound envelope. Unknown tags are ignored.
pub(crate) fn dispatch_envelope(
    state: &mut EngineState,
    envelope: &Envelope,
    outbox: &mut Vec<ClientEvent>,
    notices: &mut Vec<EngineNotice>,
) {
    match ServerEvent::parse(envelope) {
        Some(event) => apply_event(state, event, outbox, notices),
        None => debug!(event = %envelope.event, "Ignoring unhandled event"),
    }
}

pub(crate) fn apply_event(
    state: &mut EngineState,
    event: ServerEvent,
    outbox: &mut Vec<ClientEvent>,
    notices: &mut Vec<EngineNotice>,
) {
    match event {
        // The connection task answers these before the engine ever sees
        // them; tolerate a leak without doing anything.
        ServerEvent::Pong => {}

        ServerEvent::Appeals(list) => {
            on_list_snapshot(state, ConversationKind::Client, list.items, outbox);
            notices.push(EngineNotice::DirectoryUpdated);
        }
        ServerEvent::Chats(list) => {
            on_list_snapshot(state, ConversationKind::Colleague, list.items, outbox);
            notices.push(EngineNotice::DirectoryUpdated);
        }

        ServerEvent::NewAppeal(snap) => {
            state.directory.upsert(ConversationKind::Client, snap);
            notices.push(EngineNotice::DirectoryUpdated);
        }
        ServerEvent::NewChat(snap) => {
            state.directory.upsert(ConversationKind::Colleague, snap);
            notices.push(EngineNotice::DirectoryUpdated);
        }

        ServerEvent::AppealMessage(msg) | ServerEvent::ChatMessage(msg) => {
            on_message(state, msg, outbox, notices);
        }

        ServerEvent::MessagePage(page) => {
            if state.timeline.replace(page) {
                notices.push(EngineNotice::TimelineUpdated);
            }
        }

        ServerEvent::Typing(update) => {
            // Our own indicator echoes back; it is not news.
            if state
                .identity
                .as_ref()
                .is_some_and(|me| me.id == update.participant)
            {
                return;
            }
            let changed = if update.active {
                state
                    .typing
                    .observe(&update.conversation, &update.participant, Instant::now());
                state
                    .directory
                    .set_typing(&update.conversation, &update.participant, true)
            } else {
                state.typing.clear(&update.conversation, &update.participant);
                state
                    .directory
                    .set_typing(&update.conversation, &update.participant, false)
            };
            if changed || state.timeline.is_open(&update.conversation) {
                notices.push(EngineNotice::TypingUpdated);
                notices.push(EngineNotice::DirectoryUpdated);
            }
        }

        ServerEvent::Online(update) => {
            if state.directory.set_presence(&update.conversation, Presence::Online) {
                notices.push(EngineNotice::DirectoryUpdated);
            }
        }
        ServerEvent::Offline(update) => {
            if state
                .directory
                .set_presence(&update.conversation, Presence::Offline)
            {
                notices.push(EngineNotice::DirectoryUpdated);
            }
        }

        ServerEvent::MessageStatus(update) => {
            let mut changed = false;
            if state.timeline.is_open(&update.conversation) {
                changed |= state.timeline.set_status(&update.message, update.status);
            }
            if let Some(summary) = state.directory.find_mut(&update.conversation) {
                if let Some(last) = summary.last_message.as_mut() {
                    if last.id == update.message {
                        last.status = Some(update.status);
                        changed = true;
                    }
                }
            }
            if changed {
                notices.push(EngineNotice::TimelineUpdated);
                notices.push(EngineNotice::DirectoryUpdated);
            }
        }

        ServerEvent::TransferConfirm(confirm) => {
            let open = state.timeline.is_open(&confirm.conversation);
            let changed = transfer::apply_confirm(
                &mut state.directory,
                &mut state.timeline,
                state.identity.as_ref(),
                confirm,
            );
            if changed {
                notices.push(EngineNotice::DirectoryUpdated);
            }
            if open {
                notices.push(EngineNotice::TimelineUpdated);
            }
        }

        ServerEvent::Templates(list) => {
            state.templates = list.items;
            notices.push(EngineNotice::TemplatesUpdated);
        }
        ServerEvent::TemplateStatus(status) => {
            notices.push(EngineNotice::Status(StatusNotice::new(
                status.action,
                status.severity,
                status.message,
            )));
            // The authoritative list follows in a `templates` push.
        }

        ServerEvent::SearchChats(list) => {
            state
                .directory
                .replace(ConversationKind::Client, list.items);
            notices.push(EngineNotice::DirectoryUpdated);
        }
        ServerEvent::SearchContacts(list) => {
            state.contacts = list.items;
            notices.push(EngineNotice::ContactsUpdated);
        }

        ServerEvent::ReadAllConfirm => {
            state.directory.zero_all_unread();
            notices.push(EngineNotice::DirectoryUpdated);
        }

        ServerEvent::Status(status) => {
            notices.push(EngineNotice::Status(StatusNotice::new(
                status.tag,
                status.severity,
                status.message,
            )));
        }
    }
}

/// A full list snapshot replaces the partition; if it covers the open
/// conversation, immediately re-request its message window so the timeline
/// heals any gap (the snapshot itself carries no messages).
fn on_list_snapshot(
    state: &mut EngineState,
    kind: ConversationKind,
    items: Vec<crate::protocol::ConversationSnapshot>,
    outbox: &mut Vec<ClientEvent>,
) {
    let open_included = state
        .timeline
        .conversation()
        .map(|open| items.iter().any(|s| &s.id == open))
        .unwrap_or(false);
    state.directory.replace(kind, items);
    if open_included {
        if let Some(open) = state.timeline.conversation().cloned() {
            outbox.push(ClientEvent::GetMessages {
                conversation: open,
                limit: state.timeline.limit(),
            });
        }
    }
}

fn on_message(
    state: &mut EngineState,
    msg: Message,
    outbox: &mut Vec<ClientEvent>,
    notices: &mut Vec<EngineNotice>,
) {
    let open = state.timeline.is_open(&msg.conversation);
    let reconciled = state.pending.reconcile(&msg);

    // A participant who just sent a message is no longer typing.
    if let Some(author) = &msg.author {
        state.typing.clear(&msg.conversation, &author.id);
        state.directory.set_typing(&msg.conversation, &author.id, false);
    }

    if open {
        state.timeline.prepend(msg.clone());
        // Reading is implicit while the conversation is on screen.
        outbox.push(ClientEvent::ReadChat {
            conversation: msg.conversation.clone(),
        });
        notices.push(EngineNotice::TimelineUpdated);
    } else if reconciled {
        notices.push(EngineNotice::TimelineUpdated);
    }

    state.directory.record_message(&msg, open);
    notices.push(EngineNotice::DirectoryUpdated);
}
