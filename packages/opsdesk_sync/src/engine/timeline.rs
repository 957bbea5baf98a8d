//! Message Timeline
//!
//! The ordered, paginated history of the currently open conversation. The
//! buffer is kept newest-first exactly as the backend returns pages;
//! readers reverse into chronological order. Pagination is stateless: the
//! engine grows the requested limit and replaces its local copy with the
//! full snapshot the backend returns, which makes retries idempotent.

use chrono::{DateTime, NaiveDate};
use serde::Serialize;
use tracing::debug;

use crate::models::{ConversationId, DeliveryStatus, Message};
use crate::protocol::MessagePage;

pub(crate) struct Timeline {
    page_size: u32,
    conversation: Option<ConversationId>,
    /// Newest-first.
    messages: Vec<Message>,
    total: u32,
    limit: u32,
    /// Content height recorded at load-more time; attached to the next
    /// page replace so the consumer can restore the view instead of
    /// jumping to the top.
    pending_anchor: Option<f64>,
    restored_anchor: Option<f64>,
}

impl Timeline {
    pub(crate) fn new(page_size: u32) -> Self {
        Self {
            page_size,
            conversation: None,
            messages: Vec::new(),
            total: 0,
            limit: page_size,
            pending_anchor: None,
            restored_anchor: None,
        }
    }

    pub(crate) fn conversation(&self) -> Option<&ConversationId> {
        self.conversation.as_ref()
    }

    pub(crate) fn is_open(&self, id: &str) -> bool {
        self.conversation.as_deref() == Some(id)
    }

    pub(crate) fn total(&self) -> u32 {
        self.total
    }

    pub(crate) fn limit(&self) -> u32 {
        self.limit
    }

    /// Newest-first view, exactly as stored.
    #[allow(dead_code)]
    pub(crate) fn newest_first(&self) -> &[Message] {
        &self.messages
    }

    /// Chronological view for rendering.
    pub(crate) fn in_order(&self) -> Vec<Message> {
        self.messages.iter().rev().cloned().collect()
    }

    pub(crate) fn restored_anchor(&self) -> Option<f64> {
        self.restored_anchor
    }

    /// Point the timeline at a conversation and reset pagination. The
    /// first page request uses the base page size.
    pub(crate) fn open(&mut self, id: ConversationId) {
        self.conversation = Some(id);
        self.messages.clear();
        self.total = 0;
        self.limit = self.page_size;
        self.pending_anchor = None;
        self.restored_anchor = None;
    }

    pub(crate) fn close(&mut self) {
        self.conversation = None;
        self.messages.clear();
        self.total = 0;
        self.limit = self.page_size;
        self.pending_anchor = None;
        self.restored_anchor = None;
    }

    /// Grow the requested limit for a "load more"; the caller re-issues
    /// the fetch with the returned limit. `anchor` is the consumer's
    /// current content height, restored when the page lands.
    pub(crate) fn grow(&mut self, anchor: Option<f64>) -> u32 {
        self.limit += self.page_size;
        self.pending_anchor = anchor;
        self.limit
    }

    /// Replace the buffer with a page snapshot. A page for any
    /// conversation other than the open one is stale leftovers from a
    /// conversation the user already left; it must not be applied.
    pub(crate) fn replace(&mut self, page: MessagePage) -> bool {
        if !self.is_open(&page.conversation) {
            debug!(
                conversation = %page.conversation,
                "Discarding stale page response"
            );
            return false;
        }
        self.messages = page.items;
        self.total = page.total;
        self.restored_anchor = self.pending_anchor.take();
        true
    }

    /// Live append: a pushed message lands at the head of the
    /// newest-first buffer with no network round trip.
    pub(crate) fn prepend(&mut self, msg: Message) {
        self.messages.insert(0, msg);
        self.total += 1;
        // New content lands the view at the bottom, never at an anchor.
        self.restored_anchor = None;
    }

    pub(crate) fn set_status(&mut self, message_id: &str, status: DeliveryStatus) -> bool {
        match self.messages.iter_mut().find(|m| m.id == message_id) {
            Some(msg) => {
                msg.status = Some(status);
                true
            }
            None => false,
        }
    }
}

/// One row of a rendered timeline: either a message or a synthesized
/// day separator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "row", rename_all = "lowercase")]
pub enum TimelineRow {
    Separator { label: String },
    Message { message: Message },
}

fn day_of(ts: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive())
}

/// Derive render rows from a chronological message slice: one separator
/// per distinct calendar day, with today's day labelled "Today".
pub fn render_rows(messages: &[Message], today: NaiveDate) -> Vec<TimelineRow> {
    let mut rows = Vec::with_capacity(messages.len() + 4);
    let mut current_day: Option<NaiveDate> = None;
    for msg in messages {
        let day = day_of(msg.ts);
        if day != current_day {
            if let Some(d) = day {
                let label = if d == today {
                    "Today".to_string()
                } else {
                    d.format("%d.%m.%Y").to_string()
                };
                rows.push(TimelineRow::Separator { label });
            }
            current_day = day;
        }
        rows.push(TimelineRow::Message {
            message: msg.clone(),
        });
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageBody;

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

    fn page(conversation: &str, total: u32, items: Vec<Message>) -> MessagePage {
        MessagePage {
            conversation: conversation.to_string(),
            total,
            items,
        }
    }

    #[test]
    fn open_resets_limit_and_buffer() {
        let mut tl = Timeline::new(30);
        tl.open("a".to_string());
        tl.replace(page("a", 2, vec![msg("m2", "a", 20), msg("m1", "a", 10)]));
        tl.grow(None);
        assert_eq!(tl.limit(), 60);

        tl.open("b".to_string());
        assert_eq!(tl.limit(), 30);
        assert!(tl.newest_first().is_empty());
        assert_eq!(tl.total(), 0);
    }

    #[test]
    fn replace_applies_only_to_open_conversation() {
        let mut tl = Timeline::new(30);
        tl.open("b".to_string());

        // Stale page for a conversation that is no longer open
        let applied = tl.replace(page("a", 1, vec![msg("m1", "a", 10)]));
        assert!(!applied);
        assert!(tl.newest_first().is_empty());

        let applied = tl.replace(page("b", 1, vec![msg("m2", "b", 10)]));
        assert!(applied);
        assert_eq!(tl.newest_first().len(), 1);
    }

    #[test]
    fn prepend_keeps_newest_first_monotonic() {
        let mut tl = Timeline::new(30);
        tl.open("a".to_string());
        tl.replace(page("a", 2, vec![msg("m2", "a", 20), msg("m1", "a", 10)]));

        tl.prepend(msg("m3", "a", 30));
        tl.prepend(msg("m4", "a", 40));

        let stored: Vec<i64> = tl.newest_first().iter().map(|m| m.ts).collect();
        assert_eq!(stored, vec![40, 30, 20, 10]);
        // Non-increasing at every index transition
        assert!(stored.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(tl.total(), 4);
    }

    #[test]
    fn in_order_reverses_for_rendering() {
        let mut tl = Timeline::new(30);
        tl.open("a".to_string());
        tl.replace(page("a", 3, vec![
            msg("m3", "a", 30),
            msg("m2", "a", 20),
            msg("m1", "a", 10),
        ]));
        let ordered: Vec<i64> = tl.in_order().iter().map(|m| m.ts).collect();
        assert_eq!(ordered, vec![10, 20, 30]);
    }

    #[test]
    fn grow_then_replace_restores_anchor() {
        let mut tl = Timeline::new(2);
        tl.open("a".to_string());
        tl.replace(page("a", 4, vec![msg("m4", "a", 40), msg("m3", "a", 30)]));
        assert!(tl.restored_anchor().is_none());

        let limit = tl.grow(Some(812.0));
        assert_eq!(limit, 4);
        tl.replace(page("a", 4, vec![
            msg("m4", "a", 40),
            msg("m3", "a", 30),
            msg("m2", "a", 20),
            msg("m1", "a", 10),
        ]));
        assert_eq!(tl.restored_anchor(), Some(812.0));
    }

    #[test]
    fn live_append_clears_anchor() {
        let mut tl = Timeline::new(2);
        tl.open("a".to_string());
        tl.grow(Some(500.0));
        tl.replace(page("a", 1, vec![msg("m1", "a", 10)]));
        assert_eq!(tl.restored_anchor(), Some(500.0));

        tl.prepend(msg("m2", "a", 20));
        assert!(tl.restored_anchor().is_none());
    }

    #[test]
    fn set_status_updates_matching_message() {
        let mut tl = Timeline::new(30);
        tl.open("a".to_string());
        tl.replace(page("a", 1, vec![msg("m1", "a", 10)]));

        assert!(tl.set_status("m1", DeliveryStatus::Read));
        assert_eq!(tl.newest_first()[0].status, Some(DeliveryStatus::Read));
        assert!(!tl.set_status("ghost", DeliveryStatus::Read));
    }

    // ── day separators ──────────────────────────────────────────────────

    #[test]
    fn render_rows_one_separator_per_day() {
        // 2024-06-14 23:50 UTC and 2024-06-15 00:10 / 09:00 UTC
        let messages = vec![
            msg("m1", "a", 1718409000),
            msg("m2", "a", 1718410200),
            msg("m3", "a", 1718442000),
        ];
        let today = NaiveDate::from_ymd_opt(2024, 6, 16).unwrap();
        let rows = render_rows(&messages, today);

        let labels: Vec<&str> = rows
            .iter()
            .filter_map(|r| match r {
                TimelineRow::Separator { label } => Some(label.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(labels, vec!["14.06.2024", "15.06.2024"]);
        // 3 messages + 2 separators
        assert_eq!(rows.len(), 5);
    }

    #[test]
    fn render_rows_today_label() {
        let messages = vec![msg("m1", "a", 1718442000)];
        let today = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let rows = render_rows(&messages, today);
        assert_eq!(rows[0], TimelineRow::Separator {
            label: "Today".to_string()
        });
    }

    #[test]
    fn render_rows_empty() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        assert!(render_rows(&[], today).is_empty());
    }
}
