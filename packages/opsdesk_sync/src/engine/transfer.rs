//! Transfer/Handoff Protocol
//!
//! Per-conversation state machine: Owned → TransferInitiated(from, to[]) →
//! Owned(by a recipient). Initiation sends the candidate set plus the most
//! recent message as context; the backend's confirmation push rewrites the
//! membership and inserts a synthetic Transfer message so the handoff is
//! visible in the timeline of both prior and new owners.

use crate::models::{
    Message, MessageBody, ParticipantRef, PendingTransfer,
};
use crate::protocol::{ClientEvent, TransferConfirm};

use super::directory::Directory;
use super::timeline::Timeline;

/// Stage a handoff: record it on the summary and build the outbound event.
pub(crate) fn initiate(
    directory: &mut Directory,
    conversation: &str,
    from: &ParticipantRef,
    to: Vec<ParticipantRef>,
    now_ts: i64,
) -> Option<ClientEvent> {
    let summary = directory.find_mut(conversation)?;
    let context = summary.last_message.clone();
    summary.pending_transfer = Some(PendingTransfer {
        from: from.clone(),
        to: to.clone(),
        initiated_ts: now_ts,
    });
    Some(ClientEvent::TransferChat {
        conversation: conversation.to_string(),
        to,
        context,
    })
}

/// The timeline entry recording a confirmed handoff.
pub(crate) fn synthetic_message(confirm: &TransferConfirm) -> Message {
    Message {
        id: confirm.message_id.clone(),
        author: Some(confirm.from.clone()),
        conversation: confirm.conversation.clone(),
        ts: confirm.ts,
        body: MessageBody::Transfer {
            from: confirm.from.clone(),
            to: confirm.to.clone(),
        },
        status: None,
        correlation_key: None,
        answered: None,
    }
}

/// Apply a backend transfer confirmation.
///
/// Membership becomes exactly the recipient set. Unread responsibility
/// follows membership: an agent no longer in the conversation drops to 0;
/// a recipient who does not have it open picks up the Transfer entry as
/// unread.
pub(crate) fn apply_confirm(
    directory: &mut Directory,
    timeline: &mut Timeline,
    identity: Option<&ParticipantRef>,
    confirm: TransferConfirm,
) -> bool {
    let msg = synthetic_message(&confirm);
    let open = timeline.is_open(&confirm.conversation);
    if open {
        timeline.prepend(msg.clone());
    }

    let responsible = identity
        .map(|me| confirm.to.iter().any(|p| p.id == me.id))
        .unwrap_or(false);

    // Counts as unread only for a recipient without the conversation open.
    let recorded = directory.record_message(&msg, open || !responsible);
    if !responsible {
        directory.clear_unread(&confirm.conversation);
    }
    if let Some(summary) = directory.find_mut(&confirm.conversation) {
        summary.members = confirm.to;
        summary.pending_transfer = None;
    }

    recorded || open
}
