//! Engine actor: owns every store and the transport, processes commands and
//! channel events one at a time.
//!
//! External callers talk to it through [`EngineHandle`], which sends
//! [`EngineCommand`]s over an mpsc channel. Reads go through an `ArcSwap`
//! snapshot refreshed after every processed command or event, and changes
//! are announced on the [`EventBus`].

pub mod command;
mod dispatch;
mod selection;

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use legion_protocol::{
    ClientFrame, LegionMessage, Message, QueueItem, Resource, Schedule, SessionInfo, TaskItem,
};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{MessagePage, SessionApi};
use crate::bus::{EventBus, StoreEvent};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::stores::{
    EntityStores, MessageStore, OrphanInfo, SessionLookup, SessionStore, ToolCall, ToolCallTable,
    Transition,
};
use crate::transport::{ChannelEvent, ChannelKind, ConnectionStatus, OpenKind, SlotKind, Transport};

pub use command::{EngineCommand, PermissionAnswer, SelectionStep};
use selection::SelectionTask;

/// Outcome of a reconnect gap-fill. Sync never fails the caller; problems
/// land in `error`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub synced: usize,
    pub truncated: bool,
    pub error: Option<String>,
}

impl SyncReport {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SelectionPhase {
    #[default]
    Idle,
    Loading {
        session_id: String,
    },
    Ready {
        session_id: String,
    },
    Failed {
        session_id: String,
        error: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Connections {
    pub ui: ConnectionStatus,
    pub session: ConnectionStatus,
    pub legion: ConnectionStatus,
}

impl Connections {
    fn slot_mut(&mut self, kind: SlotKind) -> &mut ConnectionStatus {
        match kind {
            SlotKind::Ui => &mut self.ui,
            SlotKind::Session => &mut self.session,
            SlotKind::Legion => &mut self.legion,
        }
    }
}

/// Immutable view of everything the UI renders
#[derive(Debug, Clone, Default)]
pub struct ClientSnapshot {
    pub sessions: Arc<Vec<SessionInfo>>,
    pub current_session: Option<SessionInfo>,
    pub selection: SelectionPhase,
    pub messages: Arc<Vec<Message>>,
    pub tool_calls: Arc<ToolCallTable>,
    pub init_data: Option<Value>,
    pub resources: Arc<BTreeMap<String, Resource>>,
    pub queue: Arc<Vec<QueueItem>>,
    pub tasks: Arc<Vec<TaskItem>>,
    pub schedules: Arc<BTreeMap<String, Schedule>>,
    pub draft: Option<String>,
    pub legion_id: Option<String>,
    pub legion_messages: Arc<BTreeMap<String, LegionMessage>>,
    pub connections: Connections,
    pub syncing: bool,
}

impl ClientSnapshot {
    pub fn current_session_id(&self) -> Option<&str> {
        self.current_session.as_ref().map(|s| s.session_id.as_str())
    }

    pub fn tool_call(&self, tool_use_id: &str) -> Option<&ToolCall> {
        self.tool_calls.get(tool_use_id)
    }

    /// Tool calls in creation order
    pub fn tool_calls_ordered(&self) -> Vec<&ToolCall> {
        let mut calls: Vec<&ToolCall> = self.tool_calls.values().collect();
        calls.sort_by_key(|call| call.seq);
        calls
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to the running engine (cheap to clone).
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
    snapshot: Arc<ArcSwap<ClientSnapshot>>,
    bus: EventBus,
}

impl EngineHandle {
    /// Spawn the engine actor on the current runtime.
    pub fn spawn(config: ClientConfig, api: Arc<dyn SessionApi>) -> Self {
        let (engine, command_tx, command_rx, channel_rx) = Engine::new(config, api);
        let handle = EngineHandle {
            command_tx,
            snapshot: Arc::clone(&engine.snapshot),
            bus: engine.bus.clone(),
        };
        tokio::spawn(engine.run(command_rx, channel_rx));
        handle
    }

    pub fn snapshot(&self) -> Arc<ClientSnapshot> {
        self.snapshot.load_full()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.bus.subscribe()
    }

    async fn send(&self, command: EngineCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ClientError::EngineClosed)
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> EngineCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply)).await?;
        rx.await.map_err(|_| ClientError::EngineClosed)
    }

    pub async fn refresh_sessions(&self) -> Result<()> {
        self.request(|reply| EngineCommand::RefreshSessions { reply })
            .await?
    }

    /// Select, auto-start, load history and connect the session socket.
    /// Superseded selections resolve to [`ClientError::Cancelled`].
    pub async fn select_session(&self, session_id: impl Into<String>) -> Result<()> {
        let session_id = session_id.into();
        self.request(|reply| EngineCommand::SelectSession { session_id, reply })
            .await?
    }

    pub async fn clear_selection(&self) -> Result<()> {
        self.send(EngineCommand::ClearSelection).await
    }

    pub async fn connect_ui(&self) -> Result<()> {
        self.send(EngineCommand::ConnectUi).await
    }

    pub async fn connect_legion(&self, legion_id: impl Into<String>) -> Result<()> {
        self.send(EngineCommand::ConnectLegion {
            legion_id: legion_id.into(),
        })
        .await
    }

    pub async fn disconnect_legion(&self) -> Result<()> {
        self.send(EngineCommand::DisconnectLegion).await
    }

    /// Returns the client message id attached to the frame.
    pub async fn send_message(&self, content: impl Into<String>) -> Result<String> {
        let content = content.into();
        self.request(|reply| EngineCommand::SendMessage { content, reply })
            .await?
    }

    pub async fn respond_permission(&self, answer: PermissionAnswer) -> Result<()> {
        self.request(|reply| EngineCommand::RespondPermission { answer, reply })
            .await?
    }

    pub async fn interrupt_session(&self) -> Result<()> {
        self.request(|reply| EngineCommand::InterruptSession { reply })
            .await?
    }

    pub async fn sync_messages(&self, session_id: impl Into<String>) -> Result<SyncReport> {
        let session_id = session_id.into();
        self.request(|reply| EngineCommand::SyncMessages { session_id, reply })
            .await
    }

    pub async fn toggle_tool_expanded(
        &self,
        session_id: impl Into<String>,
        tool_use_id: impl Into<String>,
    ) -> Result<Option<bool>> {
        let (session_id, tool_use_id) = (session_id.into(), tool_use_id.into());
        self.request(|reply| EngineCommand::ToggleToolExpanded {
            session_id,
            tool_use_id,
            reply,
        })
        .await
    }

    pub async fn mark_tool_use_orphaned(
        &self,
        session_id: impl Into<String>,
        tool_use_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Result<()> {
        self.send(EngineCommand::MarkToolUseOrphaned {
            session_id: session_id.into(),
            tool_use_id: tool_use_id.into(),
            reason: reason.into(),
        })
        .await
    }

    pub async fn orphaned_info(
        &self,
        session_id: impl Into<String>,
        tool_use_id: impl Into<String>,
    ) -> Result<Option<OrphanInfo>> {
        let (session_id, tool_use_id) = (session_id.into(), tool_use_id.into());
        self.request(|reply| EngineCommand::GetOrphanedInfo {
            session_id,
            tool_use_id,
            reply,
        })
        .await
    }

    pub async fn is_tool_use_orphaned(
        &self,
        session_id: impl Into<String>,
        tool_use_id: impl Into<String>,
    ) -> Result<bool> {
        Ok(self.orphaned_info(session_id, tool_use_id).await?.is_some())
    }

    pub async fn set_draft(&self, session_id: impl Into<String>, text: impl Into<String>) -> Result<()> {
        self.send(EngineCommand::SetDraft {
            session_id: session_id.into(),
            text: text.into(),
        })
        .await
    }

    /// Close every channel and stop the actor.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| EngineCommand::Shutdown { reply }).await
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct SelectionState {
    epoch: u64,
    token: CancellationToken,
    reply: Option<oneshot::Sender<Result<()>>>,
    phase: SelectionPhase,
}

struct Engine {
    config: ClientConfig,
    api: Arc<dyn SessionApi>,
    sessions: SessionStore,
    messages: MessageStore,
    entities: EntityStores,
    transport: Transport,
    bus: EventBus,
    snapshot: Arc<ArcSwap<ClientSnapshot>>,
    /// For continuations; weak so dropping every handle stops the actor.
    commands: mpsc::WeakSender<EngineCommand>,
    selection: SelectionState,
    legion_id: Option<String>,
    connections: Connections,
    syncing: bool,
}

impl Engine {
    fn new(
        config: ClientConfig,
        api: Arc<dyn SessionApi>,
    ) -> (
        Self,
        mpsc::Sender<EngineCommand>,
        mpsc::Receiver<EngineCommand>,
        mpsc::Receiver<ChannelEvent>,
    ) {
        let (command_tx, command_rx) = mpsc::channel(256);
        let (channel_tx, channel_rx) = mpsc::channel(1024);
        let engine = Engine {
            transport: Transport::new(&config, channel_tx),
            config,
            api,
            sessions: SessionStore::new(),
            messages: MessageStore::new(),
            entities: EntityStores::new(),
            bus: EventBus::default(),
            snapshot: Arc::new(ArcSwap::from_pointee(ClientSnapshot::default())),
            commands: command_tx.downgrade(),
            selection: SelectionState {
                epoch: 0,
                token: CancellationToken::new(),
                reply: None,
                phase: SelectionPhase::Idle,
            },
            legion_id: None,
            connections: Connections::default(),
            syncing: false,
        };
        (engine, command_tx, command_rx, channel_rx)
    }

    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<EngineCommand>,
        mut channel_rx: mpsc::Receiver<ChannelEvent>,
    ) {
        info!(component = "engine", event = "engine.started");
        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                Some(event) = channel_rx.recv() => {
                    self.handle_channel_event(event).await;
                }
            }
            self.refresh_snapshot();
        }
        self.selection.token.cancel();
        self.transport.close_all().await;
        info!(component = "engine", event = "engine.stopped");
    }

    fn spawn_continuation<F>(&self, make: impl FnOnce(mpsc::Sender<EngineCommand>) -> F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        match self.commands.upgrade() {
            Some(tx) => {
                tokio::spawn(make(tx));
            }
            None => debug!(
                component = "engine",
                event = "engine.continuation_dropped",
                "No live handles, skipping background work"
            ),
        }
    }

    /// Returns false when the actor should stop.
    async fn handle_command(&mut self, command: EngineCommand) -> bool {
        match command {
            EngineCommand::RefreshSessions { reply } => self.spawn_session_refresh(Some(reply)),
            EngineCommand::SessionsFetched { result, reply } => {
                let outcome = result.map(|list| self.replace_sessions(list));
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            EngineCommand::SelectSession { session_id, reply } => {
                self.begin_selection(session_id, reply).await;
            }
            EngineCommand::ClearSelection => {
                self.supersede_selection();
                self.selection.phase = SelectionPhase::Idle;
                self.sessions.set_current(None);
                self.transport.close(SlotKind::Session).await;
            }
            EngineCommand::Selection { epoch, step } => self.apply_selection_step(epoch, step).await,
            EngineCommand::ConnectUi => {
                self.transport.connect(ChannelKind::Ui).await;
            }
            EngineCommand::ConnectLegion { legion_id } => {
                self.legion_id = Some(legion_id.clone());
                self.transport.connect(ChannelKind::Legion(legion_id)).await;
            }
            EngineCommand::DisconnectLegion => {
                self.legion_id = None;
                self.transport.close(SlotKind::Legion).await;
            }
            EngineCommand::SendMessage { content, reply } => {
                let client_message_id = legion_protocol::new_id();
                let frame = ClientFrame::SendMessage {
                    content,
                    client_message_id: Some(client_message_id.clone()),
                };
                let sent = self.send_session_frame(frame).map(|session_id| {
                    self.entities.take_draft(&session_id);
                    client_message_id
                });
                let _ = reply.send(sent);
            }
            EngineCommand::RespondPermission { answer, reply } => {
                let frame = ClientFrame::PermissionResponse {
                    request_id: answer.request_id,
                    decision: answer.decision,
                    reasoning: answer.reasoning,
                    clarification: answer.clarification,
                    selected_suggestions: answer.selected_suggestions,
                };
                let _ = reply.send(self.send_session_frame(frame).map(|_| ()));
            }
            EngineCommand::InterruptSession { reply } => {
                let sent = self.send_session_frame(ClientFrame::InterruptSession);
                let _ = reply.send(sent.map(|_| ()));
            }
            EngineCommand::SyncMessages { session_id, reply } => {
                let slot = self.transport.slot(SlotKind::Session);
                if slot.target() != Some(&ChannelKind::Session(session_id.clone())) {
                    let _ = reply.send(SyncReport::failed("session channel not connected"));
                } else {
                    let generation = slot.generation();
                    self.start_sync(session_id, generation, Some(reply));
                }
            }
            EngineCommand::SyncFetched {
                session_id,
                generation,
                result,
                reply,
            } => {
                let report = self.apply_sync(&session_id, generation, result);
                if let Some(reply) = reply {
                    let _ = reply.send(report);
                }
            }
            EngineCommand::ToggleToolExpanded {
                session_id,
                tool_use_id,
                reply,
            } => {
                let toggled = self.messages.toggle_tool_expanded(&session_id, &tool_use_id);
                if toggled.is_some() {
                    self.bus.publish(StoreEvent::ToolCallsChanged { session_id });
                }
                let _ = reply.send(toggled);
            }
            EngineCommand::MarkToolUseOrphaned {
                session_id,
                tool_use_id,
                reason,
            } => {
                self.messages
                    .mark_tool_use_orphaned(&session_id, &tool_use_id, &reason, None);
                self.bus.publish(StoreEvent::ToolsOrphaned {
                    session_id,
                    tool_use_ids: vec![tool_use_id],
                });
            }
            EngineCommand::GetOrphanedInfo {
                session_id,
                tool_use_id,
                reply,
            } => {
                let info = self.messages.orphaned_info(&session_id, &tool_use_id).cloned();
                let _ = reply.send(info);
            }
            EngineCommand::SetDraft { session_id, text } => {
                self.entities.set_draft(&session_id, text);
            }
            EngineCommand::Shutdown { reply } => {
                self.selection.token.cancel();
                self.transport.close_all().await;
                self.refresh_snapshot();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn send_session_frame(&self, frame: ClientFrame) -> Result<String> {
        let session_id = self
            .sessions
            .current_session_id()
            .ok_or_else(|| ClientError::ChannelNotConnected(SlotKind::Session.as_str().to_string()))?
            .to_string();
        let kind = frame.kind();
        self.transport.send(SlotKind::Session, frame)?;
        debug!(
            component = "engine",
            event = "frame.sent",
            session_id = %session_id,
            kind,
        );
        Ok(session_id)
    }

    // -----------------------------------------------------------------------
    // Session list
    // -----------------------------------------------------------------------

    fn spawn_session_refresh(&self, reply: Option<oneshot::Sender<Result<()>>>) {
        let api = Arc::clone(&self.api);
        self.spawn_continuation(move |tx| async move {
            let result = api.list_sessions().await;
            let _ = tx.send(EngineCommand::SessionsFetched { result, reply }).await;
        });
    }

    fn replace_sessions(&mut self, list: Vec<SessionInfo>) {
        let mut events = Vec::new();
        for session in &list {
            let transition = Transition {
                previous: self.sessions.session_state(&session.session_id),
                current: session.state,
            };
            events.extend(self.orphan_on_transition(&session.session_id, transition));
        }
        self.sessions.replace_all(list);
        events.push(StoreEvent::SessionsListChanged);
        self.bus.publish_all(events);
    }

    /// Orphan open tools when a session leaves the live states.
    fn orphan_on_transition(&mut self, session_id: &str, transition: Transition) -> Option<StoreEvent> {
        if !transition.left_live() {
            return None;
        }
        let marked = self.messages.on_session_state(session_id, transition.current);
        (!marked.is_empty()).then(|| StoreEvent::ToolsOrphaned {
            session_id: session_id.to_string(),
            tool_use_ids: marked,
        })
    }

    // -----------------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------------

    /// Cancel the in-flight selection; its caller gets `Cancelled`.
    fn supersede_selection(&mut self) {
        self.selection.token.cancel();
        self.selection.epoch += 1;
        self.selection.token = CancellationToken::new();
        if let Some(reply) = self.selection.reply.take() {
            let _ = reply.send(Err(ClientError::Cancelled));
        }
    }

    async fn begin_selection(&mut self, session_id: String, reply: oneshot::Sender<Result<()>>) {
        self.supersede_selection();
        let epoch = self.selection.epoch;
        self.selection.reply = Some(reply);
        self.selection.phase = SelectionPhase::Loading {
            session_id: session_id.clone(),
        };
        self.sessions.set_current(Some(session_id.clone()));
        self.syncing = false;

        // Frames for the previous session must stop before the new one loads.
        self.transport.close(SlotKind::Session).await;

        info!(
            component = "engine",
            event = "selection.begin",
            session_id = %session_id,
            epoch,
        );

        let task_api = Arc::clone(&self.api);
        let token = self.selection.token.clone();
        let config = self.config.clone();
        self.spawn_continuation(move |tx| {
            SelectionTask::new(&config, task_api, session_id, epoch, token, tx).run()
        });
    }

    async fn apply_selection_step(&mut self, epoch: u64, step: SelectionStep) {
        if epoch != self.selection.epoch {
            debug!(
                component = "engine",
                event = "selection.stale_step",
                epoch,
                current_epoch = self.selection.epoch,
            );
            return;
        }
        let Some(session_id) = self.sessions.current_session_id().map(str::to_string) else {
            return;
        };

        match step {
            SelectionStep::Session(info) => {
                let events = self.upsert_session(info);
                self.bus.publish_all(events);
            }
            SelectionStep::History(page) => {
                let load = self
                    .messages
                    .load_history(&session_id, page.messages, &self.sessions);
                self.bus.publish_all([
                    StoreEvent::HistoryLoaded {
                        session_id: session_id.clone(),
                        loaded: load.loaded,
                    },
                    StoreEvent::MessagesChanged {
                        session_id: session_id.clone(),
                    },
                    StoreEvent::ToolCallsChanged {
                        session_id: session_id.clone(),
                    },
                ]);
                if load.orphaned > 0 {
                    debug!(
                        component = "engine",
                        event = "selection.orphaned_on_load",
                        session_id = %session_id,
                        orphaned = load.orphaned,
                    );
                }

                self.transport
                    .connect(ChannelKind::Session(session_id.clone()))
                    .await;

                self.selection.phase = SelectionPhase::Ready {
                    session_id: session_id.clone(),
                };
                self.bus.publish(StoreEvent::SessionSelected {
                    session_id: session_id.clone(),
                });
                if let Some(reply) = self.selection.reply.take() {
                    let _ = reply.send(Ok(()));
                }
            }
            SelectionStep::Failed(err) => {
                self.selection.phase = SelectionPhase::Failed {
                    session_id: session_id.clone(),
                    error: err.to_string(),
                };
                self.bus.publish(StoreEvent::SelectionFailed {
                    session_id,
                    error: err.to_string(),
                });
                if let Some(reply) = self.selection.reply.take() {
                    let _ = reply.send(Err(err));
                }
            }
        }
    }

    /// Upsert a session record, orphaning tools if it left the live states.
    fn upsert_session(&mut self, info: SessionInfo) -> Vec<StoreEvent> {
        let session_id = info.session_id.clone();
        let state = info.state;
        let transition = self.sessions.upsert(info);
        let mut events = vec![StoreEvent::SessionsListChanged];
        if transition.changed() {
            events.push(StoreEvent::SessionChanged {
                session_id: session_id.clone(),
                state,
            });
        }
        events.extend(self.orphan_on_transition(&session_id, transition));
        events
    }

    // -----------------------------------------------------------------------
    // Reconnect sync
    // -----------------------------------------------------------------------

    fn start_sync(
        &mut self,
        session_id: String,
        generation: u64,
        reply: Option<oneshot::Sender<SyncReport>>,
    ) {
        let held = self.messages.len(&session_id);
        let offset = held.saturating_sub(self.config.sync_overlap);
        let limit = self.config.sync_window;
        self.syncing = true;

        info!(
            component = "engine",
            event = "sync.start",
            session_id = %session_id,
            generation,
            offset,
            limit,
        );
        let api = Arc::clone(&self.api);
        self.spawn_continuation(move |tx| async move {
            let result = api.get_messages(&session_id, limit, offset).await;
            let _ = tx
                .send(EngineCommand::SyncFetched {
                    session_id,
                    generation,
                    result,
                    reply,
                })
                .await;
        });
    }

    fn apply_sync(
        &mut self,
        session_id: &str,
        generation: u64,
        result: Result<MessagePage>,
    ) -> SyncReport {
        let slot = self.transport.slot(SlotKind::Session);
        let current = slot.target() == Some(&ChannelKind::Session(session_id.to_string()))
            && slot.generation() == generation;
        if !current {
            debug!(
                component = "engine",
                event = "sync.stale",
                session_id = %session_id,
                generation,
            );
            return SyncReport::failed("superseded by a newer connection");
        }
        self.syncing = false;

        match result {
            Ok(page) => {
                let outcome = self
                    .messages
                    .merge_sync(session_id, page.messages, page.has_more);
                let report = SyncReport {
                    synced: outcome.synced,
                    truncated: outcome.truncated,
                    error: None,
                };
                if outcome.synced > 0 {
                    self.bus.publish_all([
                        StoreEvent::MessagesChanged {
                            session_id: session_id.to_string(),
                        },
                        StoreEvent::ToolCallsChanged {
                            session_id: session_id.to_string(),
                        },
                    ]);
                }
                if outcome.truncated {
                    warn!(
                        component = "engine",
                        event = "sync.truncated",
                        session_id = %session_id,
                        synced = outcome.synced,
                        "Reconnect gap larger than the sync window"
                    );
                }
                self.bus.publish(StoreEvent::SyncCompleted {
                    session_id: session_id.to_string(),
                    report: report.clone(),
                });
                report
            }
            Err(err) => {
                warn!(
                    component = "engine",
                    event = "sync.failed",
                    session_id = %session_id,
                    generation,
                    error = %err,
                    "Reconnect sync failed, channel stays connected"
                );
                self.bus.publish(StoreEvent::SyncFailed {
                    session_id: session_id.to_string(),
                    error: err.to_string(),
                });
                SyncReport::failed(err.to_string())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Channel events
    // -----------------------------------------------------------------------

    async fn handle_channel_event(&mut self, event: ChannelEvent) {
        if !self.transport.accepts(&event) {
            debug!(
                component = "engine",
                event = "channel.stale_event",
                channel = %event.channel(),
                generation = event.generation(),
            );
            return;
        }

        match event {
            ChannelEvent::Status {
                channel, status, ..
            } => {
                let slot = channel.slot();
                *self.connections.slot_mut(slot) = status;
                self.bus.publish(StoreEvent::ConnectionChanged {
                    channel: slot,
                    status,
                });
            }
            ChannelEvent::Opened {
                channel,
                generation,
                kind,
            } => {
                if kind != OpenKind::Reconnect {
                    return;
                }
                match channel {
                    ChannelKind::Session(session_id) => {
                        self.start_sync(session_id, generation, None);
                    }
                    ChannelKind::Ui => self.spawn_session_refresh(None),
                    ChannelKind::Legion(_) => {}
                }
            }
            ChannelEvent::Frame { channel, frame, .. } => {
                let events = self.apply_frame(&channel, frame);
                self.bus.publish_all(events);
                if self.session_channel_orphaned() {
                    self.transport.close(SlotKind::Session).await;
                }
            }
        }
    }

    /// The session socket points at a session that is no longer selected.
    fn session_channel_orphaned(&self) -> bool {
        match self.transport.slot(SlotKind::Session).target() {
            Some(ChannelKind::Session(id)) => self.sessions.current_session_id() != Some(id.as_str()),
            _ => false,
        }
    }

    fn refresh_snapshot(&self) {
        let current = self.sessions.current().cloned();
        let current_id = self.sessions.current_session_id();
        let snapshot = match current_id {
            Some(id) => ClientSnapshot {
                sessions: self.sessions.list(),
                current_session: current,
                selection: self.selection.phase.clone(),
                messages: self.messages.messages(id),
                tool_calls: self.messages.tool_calls(id),
                init_data: self.messages.init_data(id).cloned(),
                resources: self.entities.resources.get(id),
                queue: self.entities.queue.get(id),
                tasks: self.entities.tasks.get(id),
                schedules: self.entities.schedules.get(id),
                draft: self.entities.draft(id).map(str::to_string),
                legion_id: self.legion_id.clone(),
                legion_messages: self.legion_messages(),
                connections: self.connections,
                syncing: self.syncing,
            },
            None => ClientSnapshot {
                sessions: self.sessions.list(),
                selection: self.selection.phase.clone(),
                legion_id: self.legion_id.clone(),
                legion_messages: self.legion_messages(),
                connections: self.connections,
                ..Default::default()
            },
        };
        self.snapshot.store(Arc::new(snapshot));
    }

    fn legion_messages(&self) -> Arc<BTreeMap<String, LegionMessage>> {
        self.legion_id
            .as_deref()
            .map(|id| self.entities.legion.get(id))
            .unwrap_or_default()
    }
}
