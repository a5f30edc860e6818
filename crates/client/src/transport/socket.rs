//! Socket driver for one channel slot
//!
//! A slot owns at most one supervisor task. The supervisor dials, pumps
//! frames, watches the heartbeat and schedules reconnects, checking the
//! shared [`ChannelMachine`] before every action so a superseded attempt can
//! never emit anything the engine would apply.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use legion_protocol::{ClientFrame, ServerFrame};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::machine::{ChannelMachine, CloseAction, ReconnectPolicy};
use super::{ChannelEvent, ChannelKind, ConnectionStatus, SlotKind};
use crate::api::preview;
use crate::error::{ClientError, Result};

struct ActiveChannel {
    target: ChannelKind,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    outbound: mpsc::UnboundedSender<ClientFrame>,
}

pub struct ChannelSlot {
    kind: SlotKind,
    ws_base: String,
    close_timeout: Duration,
    machine: Arc<Mutex<ChannelMachine>>,
    events: mpsc::Sender<ChannelEvent>,
    active: Option<ActiveChannel>,
}

fn lock(machine: &Mutex<ChannelMachine>) -> MutexGuard<'_, ChannelMachine> {
    machine.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ChannelSlot {
    pub fn new(
        kind: SlotKind,
        ws_base: &str,
        policy: ReconnectPolicy,
        close_timeout: Duration,
        events: mpsc::Sender<ChannelEvent>,
    ) -> Self {
        Self {
            kind,
            ws_base: ws_base.to_string(),
            close_timeout,
            machine: Arc::new(Mutex::new(ChannelMachine::new(policy))),
            events,
            active: None,
        }
    }

    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    pub fn target(&self) -> Option<&ChannelKind> {
        self.active.as_ref().map(|a| &a.target)
    }

    pub fn generation(&self) -> u64 {
        lock(&self.machine).generation()
    }

    pub fn status(&self) -> ConnectionStatus {
        lock(&self.machine).status()
    }

    pub fn is_current(&self, generation: u64) -> bool {
        lock(&self.machine).is_current(generation)
    }

    /// Tear down any existing socket, then start a supervisor for `target`.
    /// Returns the new generation.
    pub async fn connect(&mut self, target: ChannelKind) -> u64 {
        self.close().await;

        let generation = lock(&self.machine).begin_connect();
        let cancel = CancellationToken::new();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            target: target.clone(),
            url: target.url(&self.ws_base),
            machine: Arc::clone(&self.machine),
            events: self.events.clone(),
            cancel: cancel.clone(),
        };

        info!(
            component = "transport",
            event = "channel.connect",
            channel = %target,
            generation,
            "Connecting channel"
        );
        let task = tokio::spawn(driver.run(generation, outbound_rx));
        self.active = Some(ActiveChannel {
            target,
            cancel,
            task,
            outbound,
        });
        generation
    }

    /// Close and await teardown; aborts the task if it outlives the close timeout.
    pub async fn close(&mut self) {
        let Some(active) = self.active.take() else {
            lock(&self.machine).shutdown();
            return;
        };
        let generation = lock(&self.machine).shutdown();
        active.cancel.cancel();

        let mut task = active.task;
        if tokio::time::timeout(self.close_timeout, &mut task)
            .await
            .is_err()
        {
            warn!(
                component = "transport",
                event = "channel.close_timeout",
                channel = %active.target,
                generation,
                "Channel teardown timed out, aborting driver"
            );
            task.abort();
        } else {
            debug!(
                component = "transport",
                event = "channel.closed",
                channel = %active.target,
                generation,
                "Channel closed"
            );
        }
    }

    pub fn send(&self, frame: ClientFrame) -> Result<()> {
        let not_connected = || ClientError::ChannelNotConnected(self.kind.as_str().to_string());
        let active = self.active.as_ref().ok_or_else(not_connected)?;
        if self.status() != ConnectionStatus::Connected {
            return Err(not_connected());
        }
        active.outbound.send(frame).map_err(|_| not_connected())
    }
}

/// Why a live socket stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketEnd {
    Cancelled,
    Closed,
    HeartbeatTimeout,
}

struct Driver {
    target: ChannelKind,
    url: String,
    machine: Arc<Mutex<ChannelMachine>>,
    events: mpsc::Sender<ChannelEvent>,
    cancel: CancellationToken,
}

impl Driver {
    /// Delivers unless the slot is tearing this driver down.
    async fn emit(&self, event: ChannelEvent) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            sent = self.events.send(event) => sent.is_ok(),
        }
    }

    async fn emit_status(&self, generation: u64, status: ConnectionStatus) -> bool {
        self.emit(ChannelEvent::Status {
            channel: self.target.clone(),
            generation,
            status,
        })
        .await
    }

    async fn run(self, first_generation: u64, mut outbound: mpsc::UnboundedReceiver<ClientFrame>) {
        let mut generation = first_generation;
        loop {
            if !self
                .emit_status(generation, ConnectionStatus::Connecting)
                .await
            {
                return;
            }

            let dialed = tokio::select! {
                _ = self.cancel.cancelled() => return,
                dialed = tokio_tungstenite::connect_async(self.url.as_str()) => dialed,
            };

            match dialed {
                Ok((ws, _response)) => {
                    let opened = lock(&self.machine).on_open(generation, Instant::now());
                    let Some(kind) = opened else {
                        debug!(
                            component = "transport",
                            event = "channel.stale_open",
                            channel = %self.target,
                            generation,
                            "Open from superseded attempt ignored"
                        );
                        return;
                    };
                    info!(
                        component = "transport",
                        event = "channel.open",
                        channel = %self.target,
                        generation,
                        kind = ?kind,
                    );
                    if !self
                        .emit_status(generation, ConnectionStatus::Connected)
                        .await
                    {
                        return;
                    }
                    let opened = ChannelEvent::Opened {
                        channel: self.target.clone(),
                        generation,
                        kind,
                    };
                    if !self.emit(opened).await {
                        return;
                    }

                    match self.pump(ws, generation, &mut outbound).await {
                        SocketEnd::Cancelled => return,
                        SocketEnd::HeartbeatTimeout => {
                            warn!(
                                component = "transport",
                                event = "channel.heartbeat_timeout",
                                channel = %self.target,
                                generation,
                                "No keepalive within timeout, forcing close"
                            );
                        }
                        SocketEnd::Closed => {
                            info!(
                                component = "transport",
                                event = "channel.dropped",
                                channel = %self.target,
                                generation,
                            );
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        component = "transport",
                        event = "channel.dial_failed",
                        channel = %self.target,
                        generation,
                        error = %e,
                        "Channel dial failed"
                    );
                }
            }

            let action = lock(&self.machine).on_close(generation);
            match action {
                CloseAction::Ignore | CloseAction::Stop => return,
                CloseAction::GiveUp => {
                    warn!(
                        component = "transport",
                        event = "channel.give_up",
                        channel = %self.target,
                        generation,
                        "Reconnect budget exhausted"
                    );
                    self.emit_status(generation, ConnectionStatus::Failed).await;
                    return;
                }
                CloseAction::Reconnect { delay, attempt } => {
                    if !self
                        .emit_status(generation, ConnectionStatus::Reconnecting { attempt })
                        .await
                    {
                        return;
                    }
                    debug!(
                        component = "transport",
                        event = "channel.reconnect_scheduled",
                        channel = %self.target,
                        generation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    match lock(&self.machine).begin_reconnect(generation) {
                        Some(next) => generation = next,
                        None => return,
                    }
                }
            }
        }
    }

    /// Pump one live socket until it ends.
    async fn pump<S>(
        &self,
        ws: tokio_tungstenite::WebSocketStream<S>,
        generation: u64,
        outbound: &mut mpsc::UnboundedReceiver<ClientFrame>,
    ) -> SocketEnd
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let (mut sink, mut stream) = ws.split();
        let timeout = lock(&self.machine).policy().heartbeat_timeout;
        let mut watchdog = tokio::time::interval((timeout / 4).max(Duration::from_millis(25)));
        watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = tokio::time::timeout(
                        Duration::from_millis(250),
                        sink.send(WsMessage::Close(None)),
                    )
                    .await;
                    return SocketEnd::Cancelled;
                }
                _ = watchdog.tick() => {
                    if lock(&self.machine).heartbeat_expired(generation, Instant::now()) {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        return SocketEnd::HeartbeatTimeout;
                    }
                }
                frame = outbound.recv() => {
                    let Some(frame) = frame else { continue };
                    let text = match serde_json::to_string(&frame) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(
                                component = "transport",
                                event = "channel.encode_failed",
                                channel = %self.target,
                                kind = frame.kind(),
                                error = %e,
                            );
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
                        warn!(
                            component = "transport",
                            event = "channel.send_failed",
                            channel = %self.target,
                            generation,
                            error = %e,
                        );
                        return SocketEnd::Closed;
                    }
                }
                incoming = stream.next() => {
                    let text = match incoming {
                        Some(Ok(WsMessage::Text(text))) => text,
                        Some(Ok(WsMessage::Ping(payload))) => {
                            lock(&self.machine).on_keepalive(generation, Instant::now());
                            let _ = sink.send(WsMessage::Pong(payload)).await;
                            continue;
                        }
                        Some(Ok(WsMessage::Close(_))) | None => return SocketEnd::Closed,
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            debug!(
                                component = "transport",
                                event = "channel.read_error",
                                channel = %self.target,
                                generation,
                                error = %e,
                            );
                            return SocketEnd::Closed;
                        }
                    };

                    let frame: ServerFrame = match serde_json::from_str(text.as_str()) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(
                                component = "transport",
                                event = "channel.frame_malformed",
                                channel = %self.target,
                                error = %e,
                                preview = %preview(text.as_str()),
                                "Skipping undecodable frame"
                            );
                            continue;
                        }
                    };

                    if let ServerFrame::Ping { timestamp } = &frame {
                        lock(&self.machine).on_keepalive(generation, Instant::now());
                        let pong = ClientFrame::Pong {
                            timestamp: timestamp.clone(),
                        };
                        if let Ok(text) = serde_json::to_string(&pong) {
                            let _ = sink.send(WsMessage::Text(text.into())).await;
                        }
                        continue;
                    }

                    if !lock(&self.machine).is_current(generation) {
                        return SocketEnd::Cancelled;
                    }
                    let event = ChannelEvent::Frame {
                        channel: self.target.clone(),
                        generation,
                        frame,
                    };
                    if !self.emit(event).await {
                        return SocketEnd::Cancelled;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::OpenKind;
    use tokio::net::TcpListener;

    fn fast_policy(heartbeat_ms: u64) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(50),
            max_attempts: 5,
            heartbeat_timeout: Duration::from_millis(heartbeat_ms),
        }
    }

    async fn next_event(rx: &mut mpsc::Receiver<ChannelEvent>) -> ChannelEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event within timeout")
            .expect("channel open")
    }

    async fn next_opened(rx: &mut mpsc::Receiver<ChannelEvent>) -> (u64, OpenKind) {
        loop {
            if let ChannelEvent::Opened {
                generation, kind, ..
            } = next_event(rx).await
            {
                return (generation, kind);
            }
        }
    }

    #[tokio::test]
    async fn silent_socket_is_closed_and_reconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Accepts connections and never sends a ping.
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                    held.push(ws);
                }
            }
        });

        let (tx, mut rx) = mpsc::channel(64);
        let mut slot = ChannelSlot::new(
            SlotKind::Session,
            &format!("ws://{addr}"),
            fast_policy(150),
            Duration::from_millis(500),
            tx,
        );
        let first = slot.connect(ChannelKind::Session("s1".into())).await;

        let (generation, kind) = next_opened(&mut rx).await;
        assert_eq!(generation, first);
        assert_eq!(kind, OpenKind::Initial);

        let mut saw_reconnecting = false;
        let (second, kind) = loop {
            match next_event(&mut rx).await {
                ChannelEvent::Status {
                    status: ConnectionStatus::Reconnecting { attempt },
                    ..
                } => {
                    assert_eq!(attempt, 1);
                    saw_reconnecting = true;
                }
                ChannelEvent::Opened {
                    generation, kind, ..
                } => break (generation, kind),
                _ => {}
            }
        };
        assert!(saw_reconnecting);
        assert!(second > first);
        assert_eq!(kind, OpenKind::Reconnect);

        slot.close().await;
        assert_eq!(slot.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn pings_keep_channel_alive_and_get_pongs() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let mut ticker = tokio::time::interval(Duration::from_millis(40));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let ping = r#"{"type":"ping","timestamp":1700000000}"#;
                        if ws.send(WsMessage::Text(ping.into())).await.is_err() {
                            return;
                        }
                    }
                    msg = ws.next() => match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            let _ = pong_tx.send(text.as_str().to_string());
                        }
                        _ => return,
                    }
                }
            }
        });

        let (tx, mut rx) = mpsc::channel(64);
        let mut slot = ChannelSlot::new(
            SlotKind::Ui,
            &format!("ws://{addr}"),
            fast_policy(150),
            Duration::from_millis(500),
            tx,
        );
        slot.connect(ChannelKind::Ui).await;
        next_opened(&mut rx).await;

        let pong = tokio::time::timeout(Duration::from_secs(2), pong_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(pong.contains(r#""type":"pong""#));

        // Well past the heartbeat timeout, still connected on the first attempt.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(slot.status(), ConnectionStatus::Connected);
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, ChannelEvent::Opened { .. }));
        }
        slot.close().await;
    }

    #[tokio::test]
    async fn reconnecting_slot_closes_previous_driver_first() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                    held.push(ws);
                }
            }
        });

        let (tx, mut rx) = mpsc::channel(64);
        let mut slot = ChannelSlot::new(
            SlotKind::Session,
            &format!("ws://{addr}"),
            fast_policy(10_000),
            Duration::from_millis(500),
            tx,
        );
        let a = slot.connect(ChannelKind::Session("a".into())).await;
        let b = slot.connect(ChannelKind::Session("b".into())).await;
        assert!(b > a);
        assert!(!slot.is_current(a));

        let (generation, _) = next_opened(&mut rx).await;
        assert_eq!(generation, b);
        assert_eq!(slot.target(), Some(&ChannelKind::Session("b".into())));
        slot.close().await;
    }

    #[test]
    fn send_without_connection_fails() {
        let (tx, _rx) = mpsc::channel(1);
        let slot = ChannelSlot::new(
            SlotKind::Session,
            "ws://127.0.0.1:1",
            fast_policy(100),
            Duration::from_millis(10),
            tx,
        );
        let err = slot.send(ClientFrame::InterruptSession).unwrap_err();
        assert!(matches!(err, ClientError::ChannelNotConnected(_)));
    }
}
