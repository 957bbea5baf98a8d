//! Chat synchronization engine
//!
//! One actor task owns all published state. Collaborators talk to it
//! through [`EngineHandle`]; the backend talks to it through the
//! connection task's link channel. Every mutation — a facade command, an
//! inbound frame, a typing-expiry tick, a debounce deadline — arrives
//! through the same select loop, so there is no locking discipline beyond
//! "one mutation at a time".

mod debounce;
mod directory;
mod dispatch;
mod pending;
mod state;
mod timeline;
mod transfer;
mod typing;

pub use state::{DirectorySnapshot, EngineNotice, TimelineSnapshot};
pub use timeline::{TimelineRow, render_rows};

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::connection::{ConnectionHandle, ConnectionState, LinkEvent, spawn_connection};
use crate::error::EngineError;
use crate::identity;
use crate::models::{
    ConversationId, MessageTemplate, ParticipantId, ParticipantRef, Severity, StatusNotice,
};
use crate::protocol::ClientEvent;
use crate::upload;

use debounce::Debouncer;
use dispatch::dispatch_envelope;
use state::EngineState;

/// Commands that can be sent to the engine actor.
#[derive(Debug)]
pub(crate) enum EngineCommand {
    OpenConversation {
        id: ConversationId,
        respond_to: oneshot::Sender<()>,
    },
    CloseConversation {
        respond_to: oneshot::Sender<()>,
    },
    SendText {
        body: String,
        respond_to: oneshot::Sender<()>,
    },
    SendTemplate {
        template: MessageTemplate,
        respond_to: oneshot::Sender<()>,
    },
    SendFile {
        file_name: String,
        bytes: Vec<u8>,
        caption: Option<String>,
        respond_to: oneshot::Sender<()>,
    },
    LoadMore {
        anchor: Option<f64>,
        respond_to: oneshot::Sender<()>,
    },
    SearchConversations {
        query: String,
        respond_to: oneshot::Sender<()>,
    },
    SearchContacts {
        query: String,
        respond_to: oneshot::Sender<()>,
    },
    MarkAllRead {
        respond_to: oneshot::Sender<()>,
    },
    CreateTemplate {
        title: String,
        body: String,
        respond_to: oneshot::Sender<()>,
    },
    UpdateTemplate {
        template: MessageTemplate,
        respond_to: oneshot::Sender<()>,
    },
    DeleteTemplate {
        id: String,
        respond_to: oneshot::Sender<()>,
    },
    Transfer {
        to: Vec<ParticipantRef>,
        respond_to: oneshot::Sender<()>,
    },
    SetTyping {
        active: bool,
        respond_to: oneshot::Sender<()>,
    },
    GetDirectory {
        respond_to: oneshot::Sender<DirectorySnapshot>,
    },
    GetTimeline {
        respond_to: oneshot::Sender<TimelineSnapshot>,
    },
    GetTyping {
        respond_to: oneshot::Sender<Vec<ParticipantId>>,
    },
    GetTemplates {
        respond_to: oneshot::Sender<Vec<MessageTemplate>>,
    },
    GetContacts {
        respond_to: oneshot::Sender<Vec<ParticipantRef>>,
    },
    GetIdentity {
        respond_to: oneshot::Sender<Option<ParticipantRef>>,
    },

    // Internal continuations from spawned tasks
    IdentityFetched {
        result: Result<ParticipantRef, String>,
    },
    UploadFinished {
        result: Result<(), String>,
    },
}

/// Handle to communicate with the engine actor.
#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    notice_tx: broadcast::Sender<EngineNotice>,
    connection: ConnectionHandle,
}

impl EngineHandle {
    async fn ask<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(tx))
            .await
            .map_err(|_| EngineError::EngineGone)?;
        rx.await.map_err(|_| EngineError::NoResponse)
    }

    pub async fn open_conversation(&self, id: impl Into<ConversationId>) -> Result<(), EngineError> {
        let id = id.into();
        self.ask(|tx| EngineCommand::OpenConversation { id, respond_to: tx })
            .await
    }

    pub async fn close_conversation(&self) -> Result<(), EngineError> {
        self.ask(|tx| EngineCommand::CloseConversation { respond_to: tx })
            .await
    }

    pub async fn send_text(&self, body: impl Into<String>) -> Result<(), EngineError> {
        let body = body.into();
        self.ask(|tx| EngineCommand::SendText {
            body,
            respond_to: tx,
        })
        .await
    }

    pub async fn send_template(&self, template: MessageTemplate) -> Result<(), EngineError> {
        self.ask(|tx| EngineCommand::SendTemplate {
            template,
            respond_to: tx,
        })
        .await
    }

    /// The file itself travels out of band over a plain upload endpoint;
    /// only participation metadata is attached.
    pub async fn send_file(
        &self,
        file_name: impl Into<String>,
        bytes: Vec<u8>,
        caption: Option<String>,
    ) -> Result<(), EngineError> {
        let file_name = file_name.into();
        self.ask(|tx| EngineCommand::SendFile {
            file_name,
            bytes,
            caption,
            respond_to: tx,
        })
        .await
    }

    pub async fn load_more(&self, anchor: Option<f64>) -> Result<(), EngineError> {
        self.ask(|tx| EngineCommand::LoadMore {
            anchor,
            respond_to: tx,
        })
        .await
    }

    pub async fn search_conversations(&self, query: impl Into<String>) -> Result<(), EngineError> {
        let query = query.into();
        self.ask(|tx| EngineCommand::SearchConversations {
            query,
            respond_to: tx,
        })
        .await
    }

    pub async fn search_contacts(&self, query: impl Into<String>) -> Result<(), EngineError> {
        let query = query.into();
        self.ask(|tx| EngineCommand::SearchContacts {
            query,
            respond_to: tx,
        })
        .await
    }

    pub async fn mark_all_read(&self) -> Result<(), EngineError> {
        self.ask(|tx| EngineCommand::MarkAllRead { respond_to: tx })
            .await
    }

    pub async fn create_template(
        &self,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<(), EngineError> {
        let (title, body) = (title.into(), body.into());
        self.ask(|tx| EngineCommand::CreateTemplate {
            title,
            body,
            respond_to: tx,
        })
        .await
    }

    pub async fn update_template(&self, template: MessageTemplate) -> Result<(), EngineError> {
        self.ask(|tx| EngineCommand::UpdateTemplate {
            template,
            respond_to: tx,
        })
        .await
    }

    pub async fn delete_template(&self, id: impl Into<String>) -> Result<(), EngineError> {
        let id = id.into();
        self.ask(|tx| EngineCommand::DeleteTemplate { id, respond_to: tx })
            .await
    }

    pub async fn transfer(&self, to: Vec<ParticipantRef>) -> Result<(), EngineError> {
        self.ask(|tx| EngineCommand::Transfer { to, respond_to: tx })
            .await
    }

    pub async fn set_typing(&self, active: bool) -> Result<(), EngineError> {
        self.ask(|tx| EngineCommand::SetTyping {
            active,
            respond_to: tx,
        })
        .await
    }

    pub async fn directory(&self) -> Result<DirectorySnapshot, EngineError> {
        self.ask(|tx| EngineCommand::GetDirectory { respond_to: tx })
            .await
    }

    pub async fn timeline(&self) -> Result<TimelineSnapshot, EngineError> {
        self.ask(|tx| EngineCommand::GetTimeline { respond_to: tx })
            .await
    }

    pub async fn typing(&self) -> Result<Vec<ParticipantId>, EngineError> {
        self.ask(|tx| EngineCommand::GetTyping { respond_to: tx })
            .await
    }

    pub async fn templates(&self) -> Result<Vec<MessageTemplate>, EngineError> {
        self.ask(|tx| EngineCommand::GetTemplates { respond_to: tx })
            .await
    }

    pub async fn contacts(&self) -> Result<Vec<ParticipantRef>, EngineError> {
        self.ask(|tx| EngineCommand::GetContacts { respond_to: tx })
            .await
    }

    pub async fn identity(&self) -> Result<Option<ParticipantRef>, EngineError> {
        self.ask(|tx| EngineCommand::GetIdentity { respond_to: tx })
            .await
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineNotice> {
        self.notice_tx.subscribe()
    }

    /// Tear the session down for good; the close is not auto-reconnected.
    pub fn shutdown(&self) {
        self.connection.disconnect();
    }
}

#[cfg(test)]
impl EngineHandle {
    /// Short-circuit the REST identity bootstrap in tests.
    pub(crate) async fn inject_identity(&self, identity: ParticipantRef) {
        let _ = self
            .cmd_tx
            .send(EngineCommand::IdentityFetched {
                result: Ok(identity),
            })
            .await;
    }
}

/// Spawn the full engine: connection task plus actor task.
pub fn spawn(config: SyncConfig) -> EngineHandle {
    let (link_tx, link_rx) = mpsc::channel(256);
    let connection = spawn_connection(&config, link_tx);
    spawn_with(config, connection, link_rx)
}

/// Actor wiring with an injected connection; tests drive the link channel
/// directly through a [`ConnectionHandle::test_pair`].
pub(crate) fn spawn_with(
    config: SyncConfig,
    connection: ConnectionHandle,
    link_rx: mpsc::Receiver<LinkEvent>,
) -> EngineHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (notice_tx, _) = broadcast::channel(256);

    tokio::spawn(run_engine(
        config.clone(),
        cmd_rx,
        cmd_tx.clone(),
        link_rx,
        connection.clone(),
        notice_tx.clone(),
    ));

    EngineHandle {
        cmd_tx,
        notice_tx,
        connection,
    }
}

async fn run_engine(
    config: SyncConfig,
    mut cmd_rx: mpsc::Receiver<EngineCommand>,
    cmd_tx: mpsc::Sender<EngineCommand>,
    mut link_rx: mpsc::Receiver<LinkEvent>,
    connection: ConnectionHandle,
    notice_tx: broadcast::Sender<EngineNotice>,
) {
    let http = reqwest::Client::new();
    let mut state = EngineState::new(config.engine);
    let mut chat_search: Debouncer<String> = Debouncer::new(config.engine.search_debounce);
    let mut contact_search: Debouncer<String> = Debouncer::new(config.engine.search_debounce);
    let mut typing_tick = time::interval(Duration::from_secs(1));
    typing_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let next_deadline = match (chat_search.deadline(), contact_search.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let debounce_gate = async move {
            match next_deadline {
                Some(at) => time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        let mut outbox: Vec<ClientEvent> = Vec::new();
        let mut notices: Vec<EngineNotice> = Vec::new();

        tokio::select! {
            maybe = cmd_rx.recv() => {
                let Some(cmd) = maybe else { break };
                handle_command(
                    &mut state,
                    cmd,
                    &config,
                    &http,
                    &cmd_tx,
                    &mut chat_search,
                    &mut contact_search,
                    &mut outbox,
                    &mut notices,
                );
            }
            maybe = link_rx.recv() => {
                // The connection task is the engine's heartbeat; when it is
                // gone (explicit disconnect) the session is over.
                let Some(link) = maybe else { break };
                match link {
                    LinkEvent::Up => on_link_up(&state, &config, &http, &cmd_tx, &mut outbox),
                    LinkEvent::Down => debug!("Link down; published state kept for resync"),
                    LinkEvent::Inbound(env) => {
                        dispatch_envelope(&mut state, &env, &mut outbox, &mut notices);
                    }
                }
            }
            _ = typing_tick.tick() => {
                let expired = state.typing.sweep(Instant::now());
                if !expired.is_empty() {
                    for (conversation, participant) in &expired {
                        state.directory.set_typing(conversation, participant, false);
                    }
                    notices.push(EngineNotice::TypingUpdated);
                    notices.push(EngineNotice::DirectoryUpdated);
                }
            }
            _ = debounce_gate => {
                let now = Instant::now();
                if let Some(query) = chat_search.take_ready(now) {
                    outbox.push(ClientEvent::SearchChats { query });
                }
                if let Some(query) = contact_search.take_ready(now) {
                    outbox.push(ClientEvent::SearchContacts { query });
                }
            }
        }

        flush(&connection, outbox, &notice_tx, notices);
    }
    debug!("Engine task stopped");
}

/// On every open: bootstrap identity if we do not have it yet, then
/// request the two conversation lists. List requests wait for identity;
/// the backend scopes them to the authenticated agent.
fn on_link_up(
    state: &EngineState,
    config: &SyncConfig,
    http: &reqwest::Client,
    cmd_tx: &mpsc::Sender<EngineCommand>,
    outbox: &mut Vec<ClientEvent>,
) {
    if state.identity.is_some() {
        outbox.push(ClientEvent::GetAppeals);
        outbox.push(ClientEvent::GetChats);
    } else {
        let http = http.clone();
        let api_url = config.api_url.clone();
        let cmd_tx = cmd_tx.clone();
        tokio::spawn(async move {
            let result = identity::fetch_identity(&http, &api_url)
                .await
                .map_err(|e| e.to_string());
            let _ = cmd_tx.send(EngineCommand::IdentityFetched { result }).await;
        });
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_command(
    state: &mut EngineState,
    cmd: EngineCommand,
    config: &SyncConfig,
    http: &reqwest::Client,
    cmd_tx: &mpsc::Sender<EngineCommand>,
    chat_search: &mut Debouncer<String>,
    contact_search: &mut Debouncer<String>,
    outbox: &mut Vec<ClientEvent>,
    notices: &mut Vec<EngineNotice>,
) {
    let now_ts = chrono::Utc::now().timestamp();
    match cmd {
        EngineCommand::OpenConversation { id, respond_to } => {
            state.open_conversation(id, outbox, notices);
            let _ = respond_to.send(());
        }
        EngineCommand::CloseConversation { respond_to } => {
            state.close_conversation(notices);
            let _ = respond_to.send(());
        }
        EngineCommand::SendText { body, respond_to } => {
            state.send_text(body, now_ts, outbox, notices);
            let _ = respond_to.send(());
        }
        EngineCommand::SendTemplate {
            template,
            respond_to,
        } => {
            state.send_template(template, now_ts, outbox, notices);
            let _ = respond_to.send(());
        }
        EngineCommand::SendFile {
            file_name,
            bytes,
            caption,
            respond_to,
        } => {
            send_file(state, config, http, cmd_tx, file_name, bytes, caption, notices);
            let _ = respond_to.send(());
        }
        EngineCommand::LoadMore { anchor, respond_to } => {
            state.load_more(anchor, outbox);
            let _ = respond_to.send(());
        }
        EngineCommand::SearchConversations { query, respond_to } => {
            chat_search.push(query, Instant::now());
            let _ = respond_to.send(());
        }
        EngineCommand::SearchContacts { query, respond_to } => {
            contact_search.push(query, Instant::now());
            let _ = respond_to.send(());
        }
        EngineCommand::MarkAllRead { respond_to } => {
            state.mark_all_read(outbox);
            let _ = respond_to.send(());
        }
        EngineCommand::CreateTemplate {
            title,
            body,
            respond_to,
        } => {
            state.create_template(title, body, outbox, notices);
            let _ = respond_to.send(());
        }
        EngineCommand::UpdateTemplate {
            template,
            respond_to,
        } => {
            state.update_template(template, outbox, notices);
            let _ = respond_to.send(());
        }
        EngineCommand::DeleteTemplate { id, respond_to } => {
            state.delete_template(id, outbox);
            let _ = respond_to.send(());
        }
        EngineCommand::Transfer { to, respond_to } => {
            state.transfer(to, now_ts, outbox, notices);
            let _ = respond_to.send(());
        }
        EngineCommand::SetTyping { active, respond_to } => {
            state.set_typing(active, outbox);
            let _ = respond_to.send(());
        }
        EngineCommand::GetDirectory { respond_to } => {
            let _ = respond_to.send(state.directory_snapshot());
        }
        EngineCommand::GetTimeline { respond_to } => {
            let _ = respond_to.send(state.timeline_snapshot());
        }
        EngineCommand::GetTyping { respond_to } => {
            let _ = respond_to.send(state.typing_snapshot());
        }
        EngineCommand::GetTemplates { respond_to } => {
            let _ = respond_to.send(state.templates.clone());
        }
        EngineCommand::GetContacts { respond_to } => {
            let _ = respond_to.send(state.contacts.clone());
        }
        EngineCommand::GetIdentity { respond_to } => {
            let _ = respond_to.send(state.identity.clone());
        }
        EngineCommand::IdentityFetched { result } => match result {
            Ok(identity) => {
                debug!(agent = %identity.id, "Identity bootstrapped");
                state.identity = Some(identity);
                outbox.push(ClientEvent::GetAppeals);
                outbox.push(ClientEvent::GetChats);
            }
            Err(e) => {
                warn!("Identity bootstrap failed: {}", e);
                notices.push(EngineNotice::Status(StatusNotice::new(
                    "identity",
                    Severity::Error,
                    "Could not load the agent profile",
                )));
            }
        },
        EngineCommand::UploadFinished { result } => match result {
            Ok(()) => notices.push(EngineNotice::Status(StatusNotice::new(
                "sendFile",
                Severity::Info,
                "File sent",
            ))),
            Err(e) => {
                warn!("Upload failed: {}", e);
                notices.push(EngineNotice::Status(StatusNotice::new(
                    "sendFile",
                    Severity::Error,
                    "File upload failed",
                )));
            }
        },
    }
}

/// File sends bypass the multiplexed connection entirely: the bytes go to
/// a plain upload endpoint with conversation and author attached as JSON
/// parts, and the backend pushes the resulting message like any other.
#[allow(clippy::too_many_arguments)]
fn send_file(
    state: &EngineState,
    config: &SyncConfig,
    http: &reqwest::Client,
    cmd_tx: &mpsc::Sender<EngineCommand>,
    file_name: String,
    bytes: Vec<u8>,
    caption: Option<String>,
    notices: &mut Vec<EngineNotice>,
) {
    let Some(conversation) = state.timeline.conversation().cloned() else {
        notices.push(EngineNotice::Status(StatusNotice::new(
            "sendFile",
            Severity::Warning,
            "No conversation is open",
        )));
        return;
    };
    let Some(author) = state.identity.clone() else {
        notices.push(EngineNotice::Status(StatusNotice::new(
            "sendFile",
            Severity::Error,
            "Identity is not known yet",
        )));
        return;
    };

    let http = http.clone();
    let api_url = config.api_url.clone();
    let cmd_tx = cmd_tx.clone();
    tokio::spawn(async move {
        let result = upload::send_file(
            &http,
            &api_url,
            &conversation,
            &author,
            file_name,
            bytes,
            caption,
        )
        .await
        .map_err(|e| e.to_string());
        let _ = cmd_tx.send(EngineCommand::UploadFinished { result }).await;
    });
}

/// Push queued events onto the connection and publish the notices. A full
/// outbound queue turns into a status notice instead of an error: the
/// action is simply dropped and the user told, never a panic.
fn flush(
    connection: &ConnectionHandle,
    outbox: Vec<ClientEvent>,
    notice_tx: &broadcast::Sender<EngineNotice>,
    mut notices: Vec<EngineNotice>,
) {
    for event in outbox {
        if connection.enqueue(&event).is_err() {
            let tag = event.to_envelope().event;
            warn!(event = %tag, "Outbound queue full, dropping action");
            notices.push(EngineNotice::Status(StatusNotice::new(
                tag,
                Severity::Error,
                "Action could not be queued; try again",
            )));
        }
    }
    for notice in notices {
        // No receivers is fine; snapshots remain pullable.
        let _ = notice_tx.send(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::Receiver;

    use crate::models::{Message, MessageBody};
    use crate::protocol::Envelope;

    struct TestRig {
        handle: EngineHandle,
        link_tx: mpsc::Sender<LinkEvent>,
        outbound_rx: Receiver<Envelope>,
        _state_tx: tokio::sync::watch::Sender<ConnectionState>,
    }

    fn rig() -> TestRig {
        rig_with_queue(16)
    }

    fn rig_with_queue(capacity: usize) -> TestRig {
        let config = SyncConfig::default();
        let (handle_conn, outbound_rx, state_tx) = ConnectionHandle::test_pair(capacity);
        let (link_tx, link_rx) = mpsc::channel(64);
        let handle = spawn_with(config, handle_conn, link_rx);
        TestRig {
            handle,
            link_tx,
            outbound_rx,
            _state_tx: state_tx,
        }
    }

    fn me() -> ParticipantRef {
        ParticipantRef {
            id: "me".to_string(),
            name: "Me".to_string(),
        }
    }

    async fn feed(rig: &TestRig, event: &str, data: serde_json::Value) {
        rig.link_tx
            .send(LinkEvent::Inbound(Envelope {
                event: event.to_string(),
                data,
            }))
            .await
            .unwrap();
    }

    async fn next_outbound(rig: &mut TestRig) -> Envelope {
        tokio::time::timeout(Duration::from_secs(2), rig.outbound_rx.recv())
            .await
            .expect("timed out waiting for outbound event")
            .expect("outbound channel closed")
    }

    /// The command and link channels race in the actor's select loop, so a
    /// test must wait for a fed snapshot to become visible before issuing
    /// commands that depend on it.
    async fn wait_for_directory(
        handle: &EngineHandle,
        check: impl Fn(&DirectorySnapshot) -> bool,
    ) -> DirectorySnapshot {
        for _ in 0..500 {
            let snapshot = handle.directory().await.unwrap();
            if check(&snapshot) {
                return snapshot;
            }
            tokio::task::yield_now().await;
        }
        panic!("directory never reached the expected shape");
    }

    #[tokio::test]
    async fn open_conversation_emits_receipt_and_page_request() {
        let mut rig = rig();
        feed(
            &rig,
            "appeals",
            serde_json::json!({"items": [{"id": "c1", "name": "Acme"}]}),
        )
        .await;
        wait_for_directory(&rig.handle, |d| d.clients.len() == 1).await;

        rig.handle.open_conversation("c1").await.unwrap();

        let first = next_outbound(&mut rig).await;
        assert_eq!(first.event, "readChat");
        let second = next_outbound(&mut rig).await;
        assert_eq!(second.event, "getMessages");
        assert_eq!(second.data["limit"], 30);

        let snapshot = rig.handle.directory().await.unwrap();
        assert_eq!(snapshot.clients[0].unread, 0);
    }

    #[tokio::test]
    async fn inbound_message_lands_in_timeline_and_acknowledges() {
        let mut rig = rig();
        feed(
            &rig,
            "appeals",
            serde_json::json!({"items": [{"id": "c1", "name": "Acme"}]}),
        )
        .await;
        wait_for_directory(&rig.handle, |d| d.clients.len() == 1).await;
        rig.handle.open_conversation("c1").await.unwrap();
        next_outbound(&mut rig).await; // readChat
        next_outbound(&mut rig).await; // getMessages

        feed(
            &rig,
            "newMessageAppeal",
            serde_json::json!({
                "id": "m1", "conversation": "c1", "ts": 100,
                "kind": "text", "text": "hello",
            }),
        )
        .await;

        let receipt = next_outbound(&mut rig).await;
        assert_eq!(receipt.event, "readChat");

        let timeline = rig.handle.timeline().await.unwrap();
        assert_eq!(timeline.messages.len(), 1);
        assert_eq!(timeline.messages[0].id, "m1");
        assert_eq!(timeline.total, 1);

        // Unread stayed at zero for the open conversation
        let snapshot = rig.handle.directory().await.unwrap();
        assert_eq!(snapshot.clients[0].unread, 0);
    }

    #[tokio::test]
    async fn message_for_background_conversation_counts_unread() {
        let mut rig = rig();
        feed(
            &rig,
            "appeals",
            serde_json::json!({"items": [
                {"id": "c1", "name": "Acme"},
                {"id": "c2", "name": "Globex"},
            ]}),
        )
        .await;
        wait_for_directory(&rig.handle, |d| d.clients.len() == 2).await;
        rig.handle.open_conversation("c1").await.unwrap();
        next_outbound(&mut rig).await; // readChat
        next_outbound(&mut rig).await; // getMessages

        feed(
            &rig,
            "newMessageAppeal",
            serde_json::json!({
                "id": "m1", "conversation": "c2", "ts": 100,
                "kind": "text", "text": "ping",
            }),
        )
        .await;

        let snapshot = wait_for_directory(&rig.handle, |d| {
            d.clients.iter().any(|c| c.unread == 1)
        })
        .await;
        // The conversation with the fresh message sorts first
        assert_eq!(snapshot.clients[0].id, "c2");
        // No read receipt went out for a background conversation
        assert!(rig.outbound_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn link_up_with_identity_requests_both_lists() {
        let mut rig = rig();
        rig.handle.inject_identity(me()).await;
        // The identity continuation itself requests the lists once
        assert_eq!(next_outbound(&mut rig).await.event, "getAppeals");
        assert_eq!(next_outbound(&mut rig).await.event, "getChats");

        // Reconnect: identity is already known, lists are re-requested
        rig.link_tx.send(LinkEvent::Up).await.unwrap();
        assert_eq!(next_outbound(&mut rig).await.event, "getAppeals");
        assert_eq!(next_outbound(&mut rig).await.event, "getChats");
    }

    #[tokio::test(start_paused = true)]
    async fn search_is_debounced_to_the_latest_query() {
        let mut rig = rig();
        rig.handle.search_conversations("in").await.unwrap();
        rig.handle.search_conversations("inv").await.unwrap();
        rig.handle.search_conversations("invoices").await.unwrap();

        // Nothing leaves before the quiet period
        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(rig.outbound_rx.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(200)).await;
        let env = next_outbound(&mut rig).await;
        assert_eq!(env.event, "searchChats");
        assert_eq!(env.data["query"], "invoices");
        // Only one request for the three keystrokes
        assert!(rig.outbound_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn contact_search_debounces_independently() {
        let mut rig = rig();
        rig.handle.search_contacts("bob").await.unwrap();

        tokio::time::advance(Duration::from_millis(600)).await;
        let env = next_outbound(&mut rig).await;
        assert_eq!(env.event, "searchContacts");
        assert_eq!(env.data["query"], "bob");
    }

    #[tokio::test(start_paused = true)]
    async fn stale_typing_indicator_expires_locally() {
        let rig = rig();
        feed(
            &rig,
            "chats",
            serde_json::json!({"items": [{"id": "col-1", "name": "Ops"}]}),
        )
        .await;
        feed(
            &rig,
            "typing",
            serde_json::json!({"conversation": "col-1", "participant": "p1", "active": true}),
        )
        .await;

        wait_for_directory(&rig.handle, |d| {
            d.colleagues.len() == 1 && d.colleagues[0].typing.contains("p1")
        })
        .await;

        // No typing:false ever arrives; the sweep clears it after the TTL
        tokio::time::advance(Duration::from_secs(7)).await;
        wait_for_directory(&rig.handle, |d| d.colleagues[0].typing.is_empty()).await;
    }

    #[tokio::test]
    async fn queue_full_surfaces_as_status_notice() {
        // Capacity 1 and nothing draining: the second event of an open
        // (readChat + getMessages) cannot be queued.
        let rig = rig_with_queue(1);
        let mut notices = rig.handle.subscribe();

        feed(
            &rig,
            "appeals",
            serde_json::json!({"items": [{"id": "c1", "name": "Acme"}]}),
        )
        .await;
        wait_for_directory(&rig.handle, |d| d.clients.len() == 1).await;
        rig.handle.open_conversation("c1").await.unwrap();

        let notice = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match notices.recv().await.unwrap() {
                    EngineNotice::Status(n) => return n,
                    _ => continue,
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(notice.severity, Severity::Error);
        assert_eq!(notice.tag, "getMessages");
    }

    #[tokio::test]
    async fn send_text_then_echo_reconciles_placeholder() {
        let mut rig = rig();
        rig.handle.inject_identity(me()).await;
        next_outbound(&mut rig).await; // getAppeals
        next_outbound(&mut rig).await; // getChats

        feed(
            &rig,
            "appeals",
            serde_json::json!({"items": [{"id": "c1", "name": "Acme"}]}),
        )
        .await;
        wait_for_directory(&rig.handle, |d| d.clients.len() == 1).await;
        rig.handle.open_conversation("c1").await.unwrap();
        next_outbound(&mut rig).await; // readChat
        next_outbound(&mut rig).await; // getMessages

        rig.handle.send_text("hello out there").await.unwrap();
        let sent = next_outbound(&mut rig).await;
        assert_eq!(sent.event, "sendMessage");
        let key = sent.data["secret_key"].as_str().unwrap().to_string();

        let timeline = rig.handle.timeline().await.unwrap();
        assert_eq!(timeline.pending.len(), 1);

        // Authoritative echo carries the same correlation key
        let echo = Message {
            id: "m-durable".to_string(),
            author: Some(me()),
            conversation: "c1".to_string(),
            ts: 101,
            body: MessageBody::Text {
                text: "hello out there".to_string(),
            },
            status: Some(crate::models::DeliveryStatus::Sent),
            correlation_key: Some(key),
            answered: None,
        };
        feed(&rig, "newMessageAppeal", serde_json::to_value(&echo).unwrap()).await;
        next_outbound(&mut rig).await; // readChat for the open conversation

        let timeline = rig.handle.timeline().await.unwrap();
        assert!(timeline.pending.is_empty());
        assert_eq!(timeline.messages.last().unwrap().id, "m-durable");
    }
}
