//! Session selection: fetch, auto-start, history load.
//!
//! Runs as its own task so the engine keeps applying socket frames while
//! REST calls are in flight. Every await is raced against the selection's
//! cancellation token, and every result is reported back tagged with the
//! selection epoch.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use legion_protocol::SessionInfo;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::command::{EngineCommand, SelectionStep};
use crate::api::SessionApi;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::stores::StartPlan;

async fn guarded<T>(token: &CancellationToken, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        _ = token.cancelled() => Err(ClientError::Cancelled),
        result = fut => result,
    }
}

pub(super) struct SelectionTask {
    api: Arc<dyn SessionApi>,
    session_id: String,
    epoch: u64,
    token: CancellationToken,
    commands: mpsc::Sender<EngineCommand>,
    poll_interval: Duration,
    max_polls: u32,
    history_limit: usize,
}

impl SelectionTask {
    pub fn new(
        config: &ClientConfig,
        api: Arc<dyn SessionApi>,
        session_id: String,
        epoch: u64,
        token: CancellationToken,
        commands: mpsc::Sender<EngineCommand>,
    ) -> Self {
        Self {
            api,
            session_id,
            epoch,
            token,
            commands,
            poll_interval: config.auto_start_poll_interval(),
            max_polls: config.auto_start_max_polls,
            history_limit: config.history_limit,
        }
    }

    pub async fn run(self) {
        match self.drive().await {
            Ok(()) => {}
            Err(ClientError::Cancelled) => {
                debug!(
                    component = "selection",
                    event = "selection.superseded",
                    session_id = %self.session_id,
                    epoch = self.epoch,
                );
            }
            Err(err) => {
                warn!(
                    component = "selection",
                    event = "selection.failed",
                    session_id = %self.session_id,
                    epoch = self.epoch,
                    error = %err,
                );
                let _ = self.report(SelectionStep::Failed(err)).await;
            }
        }
    }

    async fn drive(&self) -> Result<()> {
        let session = guarded(&self.token, self.api.get_session(&self.session_id)).await?;
        self.report(SelectionStep::Session(session.clone())).await?;

        self.ensure_started(session).await?;

        let page = guarded(
            &self.token,
            self.api
                .get_messages(&self.session_id, self.history_limit, 0),
        )
        .await?;
        if page.has_more {
            warn!(
                component = "selection",
                event = "selection.history_capped",
                session_id = %self.session_id,
                loaded = page.messages.len(),
                total = page.total_count,
                "History exceeds the load limit, older messages not shown"
            );
        }
        self.report(SelectionStep::History(page)).await
    }

    /// Start dead sessions and poll until they are live. Giving up keeps
    /// the last observed state; the selection continues either way.
    async fn ensure_started(&self, mut session: SessionInfo) -> Result<SessionInfo> {
        match StartPlan::for_state(session.state) {
            StartPlan::Ready => return Ok(session),
            StartPlan::Start => {
                info!(
                    component = "selection",
                    event = "selection.auto_start",
                    session_id = %self.session_id,
                    state = session.state.as_str(),
                );
                match guarded(&self.token, self.api.start_session(&self.session_id)).await {
                    Ok(started) => {
                        session = started;
                        self.report(SelectionStep::Session(session.clone())).await?;
                    }
                    Err(ClientError::Cancelled) => return Err(ClientError::Cancelled),
                    Err(err) => {
                        warn!(
                            component = "selection",
                            event = "selection.start_failed",
                            session_id = %self.session_id,
                            error = %err,
                        );
                    }
                }
            }
            StartPlan::Poll => {}
        }

        for poll in 1..=self.max_polls {
            if StartPlan::for_state(session.state) == StartPlan::Ready {
                return Ok(session);
            }
            guarded(&self.token, async {
                tokio::time::sleep(self.poll_interval).await;
                Ok(())
            })
            .await?;

            match guarded(&self.token, self.api.get_session(&self.session_id)).await {
                Ok(latest) => {
                    let changed = latest.state != session.state;
                    session = latest;
                    if changed {
                        self.report(SelectionStep::Session(session.clone())).await?;
                    }
                }
                Err(ClientError::Cancelled) => return Err(ClientError::Cancelled),
                Err(err) => {
                    debug!(
                        component = "selection",
                        event = "selection.poll_failed",
                        session_id = %self.session_id,
                        poll,
                        error = %err,
                    );
                }
            }
        }

        if StartPlan::for_state(session.state) != StartPlan::Ready {
            warn!(
                component = "selection",
                event = "selection.start_gave_up",
                session_id = %self.session_id,
                state = session.state.as_str(),
                polls = self.max_polls,
                "Session did not become active, continuing"
            );
        }
        Ok(session)
    }

    async fn report(&self, step: SelectionStep) -> Result<()> {
        self.commands
            .send(EngineCommand::Selection {
                epoch: self.epoch,
                step,
            })
            .await
            .map_err(|_| ClientError::EngineClosed)
    }
}
