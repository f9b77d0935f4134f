//! Control engine: the poll → validate → gate → write loop.
//!
//! One engine instance owns all control state and processes an enumerated
//! event stream through a single dispatch function, so reconciliations are
//! strictly serialized. The scheduler is a two-state machine: steady cadence
//! while latency is flowing, a faster discovery cadence while the client
//! reports none. Writes are deferred while the client forbids mutation.

use crate::client::{GameClient, TUNING_CVAR};
use crate::config::ConfigManager;
use crate::feedback::{self, FeedbackEvent};
use crate::latency::{candidate_ms, LatencyWindow};
use crate::metrics::MetricsCollector;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Delay before retrying a rejected write, in seconds.
const WRITE_RETRY_DELAY_SECS: u64 = 1;

/// Polling cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollMode {
    /// Latency is flowing; poll at the steady interval.
    #[default]
    Steady,
    /// Latency reads as zero/unavailable; poll fast until it returns.
    Discovery,
}

impl PollMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollMode::Steady => "steady",
            PollMode::Discovery => "discovery",
        }
    }
}

/// Inbound events driving the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// A scheduled poll came due.
    TimerFired,
    /// The client entered a state where cvar writes are forbidden.
    MutationForbidden,
    /// The client left the mutation-forbidden state.
    MutationAllowed,
    /// Something outside the daemon changed the tuning setting.
    SettingChangedExternally,
}

/// Why a reconciliation decided not to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    ZeroLatency,
    ReadFailed,
    BelowThreshold,
    NoChange,
    MaxAttempts,
    WriteFailed,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Disabled => "disabled",
            SkipReason::ZeroLatency => "zero-latency",
            SkipReason::ReadFailed => "read-failed",
            SkipReason::BelowThreshold => "below-threshold",
            SkipReason::NoChange => "no-change",
            SkipReason::MaxAttempts => "max-attempts",
            SkipReason::WriteFailed => "write-failed",
        }
    }
}

/// Result of one reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Skipped(SkipReason),
    Wrote { old: u32, new: u32 },
    Queued,
}

/// In-memory control state, rebuilt each session.
#[derive(Debug, Default)]
pub struct ControlState {
    pub last_written: Option<u32>,
    pub update_queued: bool,
    pub consecutive_zero_samples: u32,
    pub attempt_count: u32,
}

/// Point-in-time view of the engine for the status surface.
#[derive(Debug, Clone, Default)]
pub struct EngineSnapshot {
    pub current_latency_ms: Option<u32>,
    pub avg_latency_ms: f64,
    pub current_setting: Option<u32>,
    pub last_written: Option<u32>,
    pub update_queued: bool,
    pub combat_locked: bool,
    pub mode: PollMode,
}

/// The control engine. Owns all mutable loop state; shared views go out
/// through the snapshot.
pub struct Engine<C: GameClient> {
    client: Arc<C>,
    config: Arc<ConfigManager>,
    metrics: Arc<MetricsCollector>,
    snapshot: Arc<RwLock<EngineSnapshot>>,
    state: ControlState,
    mode: PollMode,
    combat_locked: bool,
    retry_pending: bool,
    window: LatencyWindow,
    current_latency_ms: Option<u32>,
    current_setting: Option<u32>,
}

impl<C: GameClient> Engine<C> {
    pub fn new(
        client: Arc<C>,
        config: Arc<ConfigManager>,
        metrics: Arc<MetricsCollector>,
        snapshot: Arc<RwLock<EngineSnapshot>>,
    ) -> Self {
        Self {
            client,
            config,
            metrics,
            snapshot,
            state: ControlState::default(),
            mode: PollMode::Steady,
            combat_locked: false,
            retry_pending: false,
            window: LatencyWindow::new(),
            current_latency_ms: None,
            current_setting: None,
        }
    }

    /// Process one inbound event. Returns the reconciliation outcome when
    /// the event triggered one.
    pub async fn handle_event(&mut self, event: EngineEvent) -> Option<ReconcileOutcome> {
        let outcome = match event {
            EngineEvent::TimerFired => {
                // A fresh interval resets the attempt budget; a pending
                // retry keeps consuming the current one.
                if self.retry_pending {
                    self.retry_pending = false;
                } else {
                    self.state.attempt_count = 0;
                }
                Some(self.reconcile().await)
            }
            EngineEvent::MutationForbidden => {
                self.combat_locked = true;
                None
            }
            EngineEvent::MutationAllowed => {
                let was_locked = std::mem::replace(&mut self.combat_locked, false);
                if was_locked && self.state.update_queued {
                    // The single deferred retry. Consumed regardless of
                    // outcome; the reconciliation re-runs from scratch.
                    self.state.update_queued = false;
                    Some(self.reconcile().await)
                } else {
                    None
                }
            }
            EngineEvent::SettingChangedExternally => Some(self.reconcile().await),
        };

        if let Some(outcome) = &outcome {
            self.note_outcome(outcome);
        }
        self.publish_snapshot().await;
        outcome
    }

    /// One full reconciliation pass.
    pub async fn reconcile(&mut self) -> ReconcileOutcome {
        let policy = self.config.get();

        if !policy.enabled {
            return ReconcileOutcome::Skipped(SkipReason::Disabled);
        }

        // Combat lock: record one pending intent, touch nothing.
        if self.combat_locked || self.client.in_combat().await.unwrap_or(false) {
            self.combat_locked = true;
            self.state.update_queued = true;
            return ReconcileOutcome::Queued;
        }

        // Sample. Failures are expected right after login and mean
        // "unavailable", never a crash.
        let effective = match self.client.read_latency().await {
            Ok(sample) => Some(sample.effective_ms()),
            Err(e) => {
                debug!("latency read failed: {}", e);
                None
            }
        };

        let effective = match effective {
            None | Some(0) => {
                self.state.consecutive_zero_samples += 1;
                self.current_latency_ms = None;
                if self.mode == PollMode::Steady {
                    self.mode = PollMode::Discovery;
                    self.metrics.record_discovery_entry();
                    feedback::emit(
                        &FeedbackEvent::DiscoveryEntered,
                        policy.verbose,
                        policy.debug,
                    );
                }
                return ReconcileOutcome::Skipped(SkipReason::ZeroLatency);
            }
            Some(ms) => ms,
        };

        if self.mode == PollMode::Discovery {
            self.mode = PollMode::Steady;
            self.state.consecutive_zero_samples = 0;
            feedback::emit(
                &FeedbackEvent::DiscoveryExited,
                policy.verbose,
                policy.debug,
            );
        }

        self.current_latency_ms = Some(effective);
        self.window.push(effective);

        let candidate = candidate_ms(effective, policy.latency_cap_ms);

        // The setting is shared; read it fresh rather than trusting what we
        // last wrote.
        let current = match self.client.read_setting(TUNING_CVAR).await {
            Ok(v) => v,
            Err(e) => {
                debug!("setting read failed: {}", e);
                return ReconcileOutcome::Skipped(SkipReason::ReadFailed);
            }
        };
        self.current_setting = Some(current);

        if let Some(last) = self.state.last_written {
            if current != last {
                feedback::emit(
                    &FeedbackEvent::ExternallyModified { now: current },
                    policy.verbose,
                    policy.debug,
                );
            }
        }

        let delta = current.abs_diff(candidate);
        if delta < policy.threshold_ms {
            feedback::emit(
                &FeedbackEvent::Trace(format!(
                    "delta {} ms under threshold {} ms, keeping {} ms",
                    delta, policy.threshold_ms, current
                )),
                policy.verbose,
                policy.debug,
            );
            return ReconcileOutcome::Skipped(SkipReason::BelowThreshold);
        }

        // Re-read immediately before mutating; a concurrent writer may have
        // already landed the same target.
        let fresh = self
            .client
            .read_setting(TUNING_CVAR)
            .await
            .unwrap_or(current);
        if fresh == candidate {
            self.current_setting = Some(fresh);
            return ReconcileOutcome::Skipped(SkipReason::NoChange);
        }

        if self.state.attempt_count >= policy.max_update_attempts {
            return ReconcileOutcome::Skipped(SkipReason::MaxAttempts);
        }

        match self.client.write_setting(TUNING_CVAR, candidate).await {
            Ok(()) => {
                self.state.last_written = Some(candidate);
                self.state.update_queued = false;
                self.state.attempt_count = 0;
                self.retry_pending = false;
                self.current_setting = Some(candidate);
                feedback::emit(
                    &FeedbackEvent::Updated {
                        old: fresh,
                        new: candidate,
                    },
                    policy.verbose,
                    policy.debug,
                );
                ReconcileOutcome::Wrote {
                    old: fresh,
                    new: candidate,
                }
            }
            Err(e) => {
                warn!("write of {} ms rejected by client: {}", candidate, e);
                self.state.attempt_count += 1;
                if self.state.attempt_count < policy.max_update_attempts {
                    self.retry_pending = true;
                }
                ReconcileOutcome::Skipped(SkipReason::WriteFailed)
            }
        }
    }

    /// Delay until the next poll, derived from mode and any pending retry.
    /// The run loop re-arms a single sleep from this value each iteration,
    /// so there is never more than one timer outstanding.
    pub fn next_delay(&self) -> Duration {
        if self.retry_pending {
            return Duration::from_secs(WRITE_RETRY_DELAY_SECS);
        }
        let policy = self.config.get();
        match self.mode {
            PollMode::Steady => Duration::from_secs(policy.steady_interval_secs),
            PollMode::Discovery => Duration::from_secs(policy.discovery_interval_secs),
        }
    }

    /// Whether periodic polling should stand down entirely.
    pub fn is_polling_paused(&self) -> bool {
        self.combat_locked || !self.config.get().enabled
    }

    pub fn mode(&self) -> PollMode {
        self.mode
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    fn note_outcome(&self, outcome: &ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Wrote { old, new } => {
                info!(old = *old, new = *new, "tuning setting updated");
                self.metrics.record_write();
            }
            ReconcileOutcome::Queued => {
                debug!("write deferred until the client allows mutation");
                self.metrics.record_deferral();
            }
            ReconcileOutcome::Skipped(SkipReason::WriteFailed) => {
                self.metrics.record_write_failure();
            }
            ReconcileOutcome::Skipped(reason) => {
                debug!(reason = reason.as_str(), "no write");
                self.metrics.record_skip();
            }
        }
    }

    async fn publish_snapshot(&self) {
        let snap = EngineSnapshot {
            current_latency_ms: self.current_latency_ms,
            avg_latency_ms: self.window.average(),
            current_setting: self.current_setting,
            last_written: self.state.last_written,
            update_queued: self.state.update_queued,
            combat_locked: self.combat_locked,
            mode: self.mode,
        };
        *self.snapshot.write().await = snap;
    }
}
