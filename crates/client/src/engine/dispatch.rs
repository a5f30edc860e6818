//! Server frame → store mutations
//!
//! Frames reach here only after the transport accepted them as belonging to
//! the current generation of their channel.

use legion_protocol::{MessagePayload, ServerFrame};
use tracing::{debug, warn};

use super::Engine;
use crate::bus::StoreEvent;
use crate::stores::{AddOutcome, SessionLookup, Transition};
use crate::transport::ChannelKind;

/// Frame's own session id, falling back to the channel's.
fn scope(explicit: Option<&str>, channel: &ChannelKind) -> Option<String> {
    explicit
        .filter(|id| !id.is_empty())
        .or_else(|| channel.session_id())
        .map(str::to_string)
}

fn tools_changed(session_id: &str) -> StoreEvent {
    StoreEvent::ToolCallsChanged {
        session_id: session_id.to_string(),
    }
}

impl Engine {
    pub(super) fn apply_frame(&mut self, channel: &ChannelKind, frame: ServerFrame) -> Vec<StoreEvent> {
        let kind = frame.kind();
        let mut events = Vec::new();

        match frame {
            ServerFrame::Message { session_id, data } => {
                let Some(session_id) = scope(session_id.as_deref(), channel) else {
                    return unscoped(channel, kind);
                };
                let requested = match data.payload() {
                    Some(MessagePayload::PermissionRequest(request)) => {
                        Some((request.request_id.clone(), request.tool_use_id.clone()))
                    }
                    _ => None,
                };
                if self.messages.add_message(&session_id, data) == AddOutcome::Duplicate {
                    return events;
                }
                events.push(StoreEvent::MessagesChanged {
                    session_id: session_id.clone(),
                });
                events.push(tools_changed(&session_id));
                if let Some((request_id, tool_use_id)) = requested {
                    let tool_use_id = tool_use_id.or_else(|| {
                        self.messages
                            .tool_calls(&session_id)
                            .values()
                            .find(|call| call.permission_request_id.as_deref() == Some(request_id.as_str()))
                            .map(|call| call.tool_use_id.clone())
                    });
                    events.push(StoreEvent::PermissionRequested {
                        session_id,
                        request_id,
                        tool_use_id,
                    });
                }
            }

            ServerFrame::ToolCall { data } => {
                let Some(session_id) = scope(data.session_id.as_deref(), channel) else {
                    return unscoped(channel, kind);
                };
                self.messages.handle_tool_call(&session_id, &data);
                events.push(tools_changed(&session_id));
            }

            ServerFrame::PermissionRequest { data } => {
                let Some(session_id) = scope(None, channel) else {
                    return unscoped(channel, kind);
                };
                let tool_use_id = self.messages.handle_permission_request(&session_id, &data);
                events.push(tools_changed(&session_id));
                events.push(StoreEvent::PermissionRequested {
                    session_id,
                    request_id: data.request_id,
                    tool_use_id,
                });
            }

            ServerFrame::PermissionResponse { data } => {
                let Some(session_id) = scope(None, channel) else {
                    return unscoped(channel, kind);
                };
                if self
                    .messages
                    .handle_permission_response(&session_id, &data)
                    .is_none()
                {
                    debug!(
                        component = "dispatch",
                        event = "permission_response.unmatched",
                        session_id = %session_id,
                        request_id = %data.request_id,
                    );
                }
                events.push(tools_changed(&session_id));
            }

            ServerFrame::StateChange { session_id, data } => {
                let explicit = session_id.or_else(|| data.session_id.clone());
                let Some(session_id) = scope(explicit.as_deref(), channel) else {
                    return unscoped(channel, kind);
                };
                if let Some(transition) = self.sessions.apply_state_change(&session_id, &data) {
                    events.push(StoreEvent::SessionsListChanged);
                    if transition.changed() {
                        events.push(StoreEvent::SessionChanged {
                            session_id: session_id.clone(),
                            state: transition.current,
                        });
                    }
                    events.extend(self.orphan_on_transition(&session_id, transition));
                } else if self.sessions.current_session_id() == Some(session_id.as_str()) {
                    // The record may not have been fetched yet; still stop
                    // waiting on tools of a session that died.
                    let transition = Transition {
                        previous: None,
                        current: data.state,
                    };
                    events.extend(self.orphan_on_transition(&session_id, transition));
                }
            }

            ServerFrame::ResourceRegistered { data } => {
                let Some(session_id) = scope(Some(data.session_id.as_str()), channel) else {
                    return unscoped(channel, kind);
                };
                if self.entities.register_resource(&session_id, data) {
                    events.push(StoreEvent::ResourcesChanged { session_id });
                }
            }

            ServerFrame::ResourceRemoved { data } => {
                let Some(session_id) = scope(data.session_id.as_deref(), channel) else {
                    return unscoped(channel, kind);
                };
                if self.entities.remove_resource(&session_id, &data.resource_id) {
                    events.push(StoreEvent::ResourcesChanged { session_id });
                }
            }

            ServerFrame::QueueUpdate { data } => {
                let Some(session_id) = scope(data.session_id.as_deref(), channel) else {
                    return unscoped(channel, kind);
                };
                if self.entities.replace_queue(&session_id, data.items) {
                    events.push(StoreEvent::QueueChanged { session_id });
                }
            }

            ServerFrame::TaskUpdate { data } => {
                let Some(session_id) = scope(data.session_id.as_deref(), channel) else {
                    return unscoped(channel, kind);
                };
                if self.entities.replace_tasks(&session_id, data.tasks) {
                    events.push(StoreEvent::TasksChanged { session_id });
                }
            }

            ServerFrame::ScheduleUpdate { data } => {
                let Some(session_id) = scope(Some(data.session_id.as_str()), channel) else {
                    return unscoped(channel, kind);
                };
                if self.entities.upsert_schedule(&session_id, data) {
                    events.push(StoreEvent::SchedulesChanged { session_id });
                }
            }

            ServerFrame::ScheduleRemoved { data } => {
                let Some(session_id) = scope(data.session_id.as_deref(), channel) else {
                    return unscoped(channel, kind);
                };
                if self.entities.remove_schedule(&session_id, &data.schedule_id) {
                    events.push(StoreEvent::SchedulesChanged { session_id });
                }
            }

            ServerFrame::SessionsList { data } => {
                self.replace_sessions(data.sessions);
            }

            ServerFrame::SessionCreated { data } | ServerFrame::SessionUpdated { data } => {
                events.extend(self.upsert_session(data));
            }

            ServerFrame::SessionDeleted { data } => {
                let session_id = data.session_id;
                let was_current = self.sessions.current_session_id() == Some(session_id.as_str());
                self.sessions.remove(&session_id);
                self.messages.clear_session(&session_id);
                self.entities.forget_session(&session_id);
                if was_current {
                    self.supersede_selection();
                    self.selection.phase = super::SelectionPhase::Idle;
                }
                events.push(StoreEvent::SessionsListChanged);
                events.push(StoreEvent::SessionRemoved { session_id });
            }

            ServerFrame::LegionMessage { data } => {
                let legion_id = data.legion_id.clone();
                let comm_id = data.comm_id.clone();
                if self.entities.add_legion_message(data) {
                    events.push(StoreEvent::LegionMessage { legion_id, comm_id });
                }
            }

            ServerFrame::Error {
                message,
                session_id,
            } => {
                let session_id = scope(session_id.as_deref(), channel);
                warn!(
                    component = "dispatch",
                    event = "server.error",
                    channel = %channel,
                    session_id = session_id.as_deref().unwrap_or(""),
                    message = %message,
                );
                events.push(StoreEvent::ServerError {
                    session_id,
                    message,
                });
            }

            // Answered by the socket driver
            ServerFrame::Ping { .. } => {}

            ServerFrame::Unknown => {
                debug!(
                    component = "dispatch",
                    event = "frame.unknown",
                    channel = %channel,
                );
            }
        }

        events
    }
}

fn unscoped(channel: &ChannelKind, kind: &'static str) -> Vec<StoreEvent> {
    warn!(
        component = "dispatch",
        event = "frame.unscoped",
        channel = %channel,
        kind,
        "Session frame without a session id, dropping"
    );
    Vec::new()
}
