//! Pure per-channel connection state machine
//!
//! `disconnected → connecting → connected → disconnected`, with a generation
//! counter bumped on every connection attempt. The socket driver consults it
//! at every await boundary; nothing here does I/O.

use std::time::Duration;

use tokio::time::Instant;

use super::ConnectionStatus;
use crate::config::ClientConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub heartbeat_timeout: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            base_delay: config.reconnect_base_delay(),
            max_delay: config.reconnect_max_delay(),
            max_attempts: config.max_reconnect_attempts,
            heartbeat_timeout: config.heartbeat_timeout(),
        }
    }

    /// `min(base * attempt, max)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(attempt.max(1))
            .min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

/// Whether an open is the first for this `connect()` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenKind {
    Initial,
    Reconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Close from a superseded attempt
    Ignore,
    /// Nobody wants the channel open any more
    Stop,
    /// Retry budget exhausted
    GiveUp,
    Reconnect { delay: Duration, attempt: u32 },
}

#[derive(Debug, Clone)]
pub struct ChannelMachine {
    status: ConnectionStatus,
    generation: u64,
    wants_open: bool,
    attempts: u32,
    opened_once: bool,
    last_seen: Option<Instant>,
    policy: ReconnectPolicy,
}

impl ChannelMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            generation: 0,
            wants_open: false,
            attempts: 0,
            opened_once: false,
            last_seen: None,
            policy,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn wants_open(&self) -> bool {
        self.wants_open
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Continuations captured under `generation` may still act.
    pub fn is_current(&self, generation: u64) -> bool {
        self.wants_open && self.generation == generation
    }

    /// A fresh `connect()`: new generation, retry budget and first-open flag reset.
    pub fn begin_connect(&mut self) -> u64 {
        self.generation += 1;
        self.wants_open = true;
        self.attempts = 0;
        self.opened_once = false;
        self.last_seen = None;
        self.status = ConnectionStatus::Connecting;
        self.generation
    }

    pub fn on_open(&mut self, generation: u64, now: Instant) -> Option<OpenKind> {
        if !self.is_current(generation) {
            return None;
        }
        self.status = ConnectionStatus::Connected;
        self.attempts = 0;
        self.last_seen = Some(now);
        let kind = if self.opened_once {
            OpenKind::Reconnect
        } else {
            OpenKind::Initial
        };
        self.opened_once = true;
        Some(kind)
    }

    pub fn on_keepalive(&mut self, generation: u64, now: Instant) {
        if self.is_current(generation) {
            self.last_seen = Some(now);
        }
    }

    /// Connected but silent for longer than the heartbeat timeout.
    pub fn heartbeat_expired(&self, generation: u64, now: Instant) -> bool {
        self.is_current(generation)
            && self.status == ConnectionStatus::Connected
            && self
                .last_seen
                .is_some_and(|seen| now.saturating_duration_since(seen) > self.policy.heartbeat_timeout)
    }

    pub fn on_close(&mut self, generation: u64) -> CloseAction {
        if generation != self.generation {
            return CloseAction::Ignore;
        }
        self.last_seen = None;
        if !self.wants_open {
            self.status = ConnectionStatus::Disconnected;
            return CloseAction::Stop;
        }
        self.attempts += 1;
        if self.attempts > self.policy.max_attempts {
            self.wants_open = false;
            self.status = ConnectionStatus::Failed;
            return CloseAction::GiveUp;
        }
        self.status = ConnectionStatus::Reconnecting {
            attempt: self.attempts,
        };
        CloseAction::Reconnect {
            delay: self.policy.delay_for(self.attempts),
            attempt: self.attempts,
        }
    }

    /// Fire a scheduled reconnect; `None` when it was superseded meanwhile.
    pub fn begin_reconnect(&mut self, scheduled_under: u64) -> Option<u64> {
        if !self.is_current(scheduled_under) {
            return None;
        }
        self.generation += 1;
        self.status = ConnectionStatus::Connecting;
        Some(self.generation)
    }

    /// Stop wanting the channel; any in-flight continuation becomes stale.
    pub fn shutdown(&mut self) -> u64 {
        self.wants_open = false;
        self.generation += 1;
        self.last_seen = None;
        self.status = ConnectionStatus::Disconnected;
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(3500),
            max_attempts: 3,
            heartbeat_timeout: Duration::from_millis(10_000),
        }
    }

    #[test]
    fn delay_grows_linearly_and_caps() {
        let p = policy();
        assert_eq!(p.delay_for(1), Duration::from_millis(1000));
        assert_eq!(p.delay_for(2), Duration::from_millis(2000));
        assert_eq!(p.delay_for(3), Duration::from_millis(3000));
        assert_eq!(p.delay_for(4), Duration::from_millis(3500));
        assert_eq!(p.delay_for(40), Duration::from_millis(3500));
    }

    #[test]
    fn superseded_open_is_a_noop() {
        let mut machine = ChannelMachine::new(policy());
        let a = machine.begin_connect();
        let b = machine.begin_connect();
        assert!(b > a);

        assert_eq!(machine.on_open(a, Instant::now()), None);
        assert_eq!(machine.status(), ConnectionStatus::Connecting);
        assert_eq!(machine.on_close(a), CloseAction::Ignore);
        assert_eq!(machine.on_open(b, Instant::now()), Some(OpenKind::Initial));
    }

    #[test]
    fn reconnect_open_is_flagged() {
        let mut machine = ChannelMachine::new(policy());
        let g1 = machine.begin_connect();
        machine.on_open(g1, Instant::now());

        let action = machine.on_close(g1);
        assert_eq!(
            action,
            CloseAction::Reconnect {
                delay: Duration::from_millis(1000),
                attempt: 1
            }
        );
        assert_eq!(machine.status(), ConnectionStatus::Reconnecting { attempt: 1 });

        let g2 = machine.begin_reconnect(g1).unwrap();
        assert!(g2 > g1);
        assert_eq!(machine.on_open(g2, Instant::now()), Some(OpenKind::Reconnect));
    }

    #[test]
    fn scheduled_reconnect_dies_with_its_generation() {
        let mut machine = ChannelMachine::new(policy());
        let g1 = machine.begin_connect();
        machine.on_open(g1, Instant::now());
        machine.on_close(g1);

        machine.begin_connect();
        assert_eq!(machine.begin_reconnect(g1), None);

        let mut closed = ChannelMachine::new(policy());
        let g = closed.begin_connect();
        closed.on_close(g);
        closed.shutdown();
        assert_eq!(closed.begin_reconnect(g), None);
    }

    #[test]
    fn close_after_shutdown_stops() {
        let mut machine = ChannelMachine::new(policy());
        machine.begin_connect();
        let g = machine.shutdown();
        assert_eq!(machine.on_close(g), CloseAction::Stop);
        assert_eq!(machine.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn gives_up_after_budget() {
        let mut machine = ChannelMachine::new(policy());
        let mut generation = machine.begin_connect();
        for attempt in 1..=3 {
            match machine.on_close(generation) {
                CloseAction::Reconnect { attempt: a, .. } => assert_eq!(a, attempt),
                other => panic!("expected reconnect, got {other:?}"),
            }
            generation = machine.begin_reconnect(generation).unwrap();
        }
        assert_eq!(machine.on_close(generation), CloseAction::GiveUp);
        assert_eq!(machine.status(), ConnectionStatus::Failed);
        assert!(!machine.wants_open());
    }

    #[test]
    fn successful_open_resets_budget() {
        let mut machine = ChannelMachine::new(policy());
        let mut generation = machine.begin_connect();
        for _ in 0..10 {
            machine.on_open(generation, Instant::now());
            assert!(matches!(
                machine.on_close(generation),
                CloseAction::Reconnect { attempt: 1, .. }
            ));
            generation = machine.begin_reconnect(generation).unwrap();
        }
    }

    #[test]
    fn heartbeat_expires_only_when_connected_and_silent() {
        let mut machine = ChannelMachine::new(policy());
        let g = machine.begin_connect();
        let t0 = Instant::now();
        assert!(!machine.heartbeat_expired(g, t0 + Duration::from_secs(60)));

        machine.on_open(g, t0);
        assert!(!machine.heartbeat_expired(g, t0 + Duration::from_millis(10_000)));
        assert!(machine.heartbeat_expired(g, t0 + Duration::from_millis(10_001)));

        machine.on_keepalive(g, t0 + Duration::from_millis(9_000));
        assert!(!machine.heartbeat_expired(g, t0 + Duration::from_millis(15_000)));

        machine.on_keepalive(g + 7, t0 + Duration::from_millis(30_000));
        assert!(machine.heartbeat_expired(g, t0 + Duration::from_millis(25_000)));
    }
}
