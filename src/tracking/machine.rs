//! # Tracker State Machine
//!
//! One control flow shared by every tracker:
//!
//! ```text
//! Idle -> MovingSecondaryToTarget -> Stabilizing -> (MovingToTarget ->) Active -> Idle
//! ```
//!
//! The train ("secondary") axis is driven to a target first and must settle
//! there before the primary axes do anything. What the target is, whether a
//! primary acquisition slew is needed, and what happens while active are
//! supplied by a [`TrackingStrategy`].
//!
//! The machine is polled by the orchestrator tick and never blocks. Any
//! error aborts the session to `Idle` and is kept for the status label.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::phase::{ActionLedger, TrackerStatus, TrackingPhase};
use crate::config::TrackingConfig;
use crate::error::TrackingError;
use crate::geometry::AzEl;
use crate::icd::protocol::{AxisMask, AxisMotion, ManualMove};
use crate::icd::status::StatusSnapshot;
use crate::icd::Command;
use crate::link::CommandSink;

/// Tolerances, timings and speeds used by every tracker
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSettings {
    pub approach_tolerance_deg: f64,
    pub settle_tolerance_deg: f64,
    pub settle_dwell: Duration,
    pub settle_timeout: Duration,
    pub tilt_offset_deg: f64,
    pub train_speed_deg_s: f64,
    pub slew_speed_deg_s: f64,
    pub block_points: usize,
}

impl From<&TrackingConfig> for TrackingSettings {
    fn from(config: &TrackingConfig) -> Self {
        Self {
            approach_tolerance_deg: config.approach_tolerance_deg,
            settle_tolerance_deg: config.settle_tolerance_deg,
            settle_dwell: Duration::milliseconds(config.settle_dwell_ms as i64),
            settle_timeout: Duration::seconds(config.settle_timeout_s as i64),
            tilt_offset_deg: config.tilt_offset_deg,
            train_speed_deg_s: config.train_speed_deg_s,
            slew_speed_deg_s: config.slew_speed_deg_s,
            block_points: config.block_points,
        }
    }
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self::from(&TrackingConfig::default())
    }
}

/// Operator-set offsets shared by the trackers
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Offsets {
    pub time_offset_s: f32,
    pub azimuth_deg: f32,
    pub elevation_deg: f32,
    pub train_deg: f32,
}

/// Everything a tracker may look at or act on during one tick
pub struct TickContext<'a> {
    pub now: DateTime<Utc>,
    pub telemetry: &'a StatusSnapshot,
    /// Firmware link health at `now`
    pub connected: bool,
    pub sink: &'a dyn CommandSink,
    pub settings: &'a TrackingSettings,
    pub offsets: &'a Offsets,
}

impl TickContext<'_> {
    /// Queue a command; a dead link becomes a tracking error
    ///
    /// # Errors
    ///
    /// Returns `TrackingError::CommandRejected` if the link is gone
    pub fn send(&self, command: Command) -> Result<(), TrackingError> {
        self.sink
            .send(command)
            .map_err(|e| TrackingError::CommandRejected(e.to_string()))
    }

    /// Measured train angle, if the link is up and the firmware reports it
    ///
    /// # Errors
    ///
    /// Returns `TrackingError::FeedbackUnavailable` otherwise
    pub fn train_angle(&self) -> Result<f64, TrackingError> {
        self.require_link()?;
        self.telemetry
            .train
            .angle
            .map(f64::from)
            .ok_or(TrackingError::FeedbackUnavailable("train angle unknown"))
    }

    /// Measured azimuth/elevation
    ///
    /// # Errors
    ///
    /// Returns `TrackingError::FeedbackUnavailable` if either is unknown
    pub fn az_el(&self) -> Result<AzEl, TrackingError> {
        self.require_link()?;
        match (self.telemetry.azimuth.angle, self.telemetry.elevation.angle) {
            (Some(az), Some(el)) => Ok(AzEl::new(f64::from(az), f64::from(el))),
            _ => Err(TrackingError::FeedbackUnavailable("azimuth/elevation unknown")),
        }
    }

    fn require_link(&self) -> Result<(), TrackingError> {
        if self.connected {
            Ok(())
        } else {
            Err(TrackingError::FeedbackUnavailable("firmware link down"))
        }
    }
}

/// Result of one active-phase tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveOutcome {
    Continue,
    Completed,
}

/// The parts of a maneuver that differ between trackers
pub trait TrackingStrategy: Send {
    /// What a session is started with
    type Session;

    /// Short name for logs and status
    fn name(&self) -> &'static str;

    /// Load a new session's parameters
    fn begin(&mut self, session: Self::Session);

    /// Forget the session
    fn end(&mut self);

    /// Train axis target for the current session
    fn secondary_target(&mut self, ctx: &TickContext<'_>) -> Result<f64, TrackingError>;

    /// Primary-axis pointing to reach before going active, if any
    fn acquisition_target(
        &mut self,
        _ctx: &TickContext<'_>,
        _train_deg: f64,
    ) -> Result<Option<AzEl>, TrackingError> {
        Ok(None)
    }

    /// Work done every tick while active
    fn active_tick(
        &mut self,
        ctx: &TickContext<'_>,
        train_deg: f64,
        ledger: &mut ActionLedger,
    ) -> Result<ActiveOutcome, TrackingError>;

    /// Firmware pull request for satellite-track data while active
    fn firmware_request(
        &mut self,
        _ctx: &TickContext<'_>,
        _elapsed_ms: u32,
        _ledger: &ActionLedger,
    ) -> Result<(), TrackingError> {
        Ok(())
    }

    /// Extra status text, e.g. which pass is loaded
    fn detail(&self) -> Option<String> {
        None
    }
}

/// Per-tracker mutable state; only the orchestrator tick touches it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerState {
    pub phase: TrackingPhase,
    pub train_target_deg: Option<f64>,
    commanded_train_deg: Option<f64>,
    /// When stabilization started
    pub stabilizing_since: Option<DateTime<Utc>>,
    /// Start of the current continuous in-tolerance stretch
    settled_since: Option<DateTime<Utc>>,
    commanded_pointing: Option<AzEl>,
    pub ledger: ActionLedger,
    pub last_error: Option<TrackingError>,
}

impl TrackerState {
    fn reset(&mut self) {
        let last_error = self.last_error.take();
        *self = TrackerState {
            last_error,
            ..TrackerState::default()
        };
    }
}

/// A strategy driven through the shared phase sequence
#[derive(Debug)]
pub struct Tracker<S> {
    strategy: S,
    state: TrackerState,
}

impl<S: TrackingStrategy> Tracker<S> {
    pub fn new(strategy: S) -> Self {
        Self {
            strategy,
            state: TrackerState::default(),
        }
    }

    #[must_use]
    pub fn phase(&self) -> TrackingPhase {
        self.state.phase
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.phase() == TrackingPhase::Idle
    }

    #[must_use]
    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    #[must_use]
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Begin a new session from idle
    ///
    /// # Errors
    ///
    /// Returns `TrackingError::AlreadyActive` unless idle
    pub fn start(&mut self, session: S::Session) -> Result<(), TrackingError> {
        if !self.is_idle() {
            return Err(TrackingError::AlreadyActive(self.strategy.name()));
        }

        self.state = TrackerState::default();
        self.strategy.begin(session);
        self.enter(TrackingPhase::MovingSecondaryToTarget);
        Ok(())
    }

    /// Stop all axes, then drop the session.
    ///
    /// The stop command is queued before any state is cleared, so it is the
    /// next thing the firmware sees from this tracker.
    ///
    /// # Errors
    ///
    /// Returns `TrackingError::CommandRejected` if the stop could not be
    /// queued; the tracker is idle either way
    pub fn stop(&mut self, sink: &dyn CommandSink) -> Result<(), TrackingError> {
        let sent = sink
            .send(Command::AxisStop {
                axes: AxisMask::ALL,
            })
            .map_err(|e| TrackingError::CommandRejected(e.to_string()));

        if !self.is_idle() {
            info!("{} tracker stopped from {}", self.strategy.name(), self.phase());
        }
        self.strategy.end();
        self.state = TrackerState::default();
        sent
    }

    /// Forget a stored fault while idle. Sends nothing.
    pub fn dismiss(&mut self) {
        if self.is_idle() {
            self.state = TrackerState::default();
        }
    }

    /// Advance by one tick
    pub fn tick(&mut self, ctx: &TickContext<'_>) {
        if self.is_idle() {
            return;
        }

        if let Err(e) = self.step(ctx) {
            self.abort(ctx, e);
        }
    }

    /// Route a firmware pull request to the strategy while active
    pub fn firmware_request(&mut self, ctx: &TickContext<'_>, elapsed_ms: u32) {
        if self.phase() != TrackingPhase::Active {
            debug!(
                "{} tracker ignoring track request at {} ms in {}",
                self.strategy.name(),
                elapsed_ms,
                self.phase()
            );
            return;
        }

        if let Err(e) = self
            .strategy
            .firmware_request(ctx, elapsed_ms, &self.state.ledger)
        {
            self.abort(ctx, e);
        }
    }

    #[must_use]
    pub fn status(&self) -> TrackerStatus {
        let phase = self.phase();
        let label = match (&self.state.last_error, phase) {
            (Some(_), TrackingPhase::Idle) => "error".to_string(),
            _ => phase.as_str().to_string(),
        };

        TrackerStatus {
            tracker: self.strategy.name(),
            phase,
            label,
            train_target_deg: self.state.train_target_deg,
            detail: self.strategy.detail(),
            last_error: self.state.last_error.as_ref().map(ToString::to_string),
        }
    }

    fn step(&mut self, ctx: &TickContext<'_>) -> Result<(), TrackingError> {
        match self.phase() {
            TrackingPhase::Idle => Ok(()),
            TrackingPhase::MovingSecondaryToTarget => self.move_secondary(ctx),
            TrackingPhase::Stabilizing => self.stabilize(ctx),
            TrackingPhase::MovingToTarget => self.move_primary(ctx),
            TrackingPhase::Active => self.active(ctx),
        }
    }

    fn move_secondary(&mut self, ctx: &TickContext<'_>) -> Result<(), TrackingError> {
        let measured = ctx.train_angle()?;
        let target = self.strategy.secondary_target(ctx)?;
        self.state.train_target_deg = Some(target);

        let changed = self
            .state
            .commanded_train_deg
            .map_or(true, |c| (c - target).abs() > f64::EPSILON);
        if changed {
            info!(
                "{} tracker: train {:.2} -> {:.2} deg",
                self.strategy.name(),
                measured,
                target
            );
            ctx.send(Command::ManualMove(ManualMove {
                axes: AxisMask::TRAIN,
                train: AxisMotion::new(target as f32, ctx.settings.train_speed_deg_s as f32),
                ..ManualMove::default()
            }))?;
            self.state.commanded_train_deg = Some(target);
        }

        if (measured - target).abs() <= ctx.settings.approach_tolerance_deg {
            self.state.stabilizing_since = Some(ctx.now);
            self.state.settled_since = None;
            self.enter(TrackingPhase::Stabilizing);
        }
        Ok(())
    }

    fn stabilize(&mut self, ctx: &TickContext<'_>) -> Result<(), TrackingError> {
        let measured = ctx.train_angle()?;
        let target = self.state.train_target_deg.unwrap_or(measured);
        let since = *self.state.stabilizing_since.get_or_insert(ctx.now);

        if (measured - target).abs() <= ctx.settings.settle_tolerance_deg {
            let settled = *self.state.settled_since.get_or_insert(ctx.now);
            if ctx.now - settled >= ctx.settings.settle_dwell {
                debug!(
                    "{} tracker: train settled at {:.2} deg",
                    self.strategy.name(),
                    measured
                );
                return self.finish_stabilizing(ctx, target);
            }
        } else {
            self.state.settled_since = None;
        }

        if ctx.now - since >= ctx.settings.settle_timeout {
            warn!(
                "{} tracker: train did not settle within {}s ({:.2} vs {:.2} deg); continuing",
                self.strategy.name(),
                ctx.settings.settle_timeout.num_seconds(),
                measured,
                target
            );
            return self.finish_stabilizing(ctx, target);
        }
        Ok(())
    }

    fn finish_stabilizing(&mut self, ctx: &TickContext<'_>, train: f64) -> Result<(), TrackingError> {
        match self.strategy.acquisition_target(ctx, train)? {
            Some(_) => self.enter(TrackingPhase::MovingToTarget),
            None => self.enter(TrackingPhase::Active),
        }
        Ok(())
    }

    fn move_primary(&mut self, ctx: &TickContext<'_>) -> Result<(), TrackingError> {
        let measured = ctx.az_el()?;
        ctx.train_angle()?;
        let train = self.state.train_target_deg.unwrap_or(0.0);

        let Some(target) = self.strategy.acquisition_target(ctx, train)? else {
            self.enter(TrackingPhase::Active);
            return Ok(());
        };

        let tolerance = ctx.settings.approach_tolerance_deg;
        let drifted = self.state.commanded_pointing.map_or(true, |c| {
            (c.azimuth_deg - target.azimuth_deg).abs() > tolerance / 2.0
                || (c.elevation_deg - target.elevation_deg).abs() > tolerance / 2.0
        });
        if drifted {
            let speed = ctx.settings.slew_speed_deg_s as f32;
            ctx.send(Command::ManualMove(ManualMove {
                axes: AxisMask::AZ_EL,
                azimuth: AxisMotion::new(target.azimuth_deg as f32, speed),
                elevation: AxisMotion::new(target.elevation_deg as f32, speed),
                ..ManualMove::default()
            }))?;
            self.state.commanded_pointing = Some(target);
        }

        if (measured.azimuth_deg - target.azimuth_deg).abs() <= tolerance
            && (measured.elevation_deg - target.elevation_deg).abs() <= tolerance
        {
            self.enter(TrackingPhase::Active);
        }
        Ok(())
    }

    fn active(&mut self, ctx: &TickContext<'_>) -> Result<(), TrackingError> {
        ctx.train_angle()?;
        let train = self.state.train_target_deg.unwrap_or(0.0);

        match self
            .strategy
            .active_tick(ctx, train, &mut self.state.ledger)?
        {
            ActiveOutcome::Continue => {}
            ActiveOutcome::Completed => {
                info!("{} tracker: session complete", self.strategy.name());
                self.strategy.end();
                self.state.reset();
            }
        }
        Ok(())
    }

    fn enter(&mut self, phase: TrackingPhase) {
        if self.state.phase != phase {
            info!("{} tracker: {} -> {}", self.strategy.name(), self.phase(), phase);
            self.state.phase = phase;
        }
    }

    fn abort(&mut self, ctx: &TickContext<'_>, e: TrackingError) {
        error!("{} tracker aborted in {}: {}", self.strategy.name(), self.phase(), e);
        if let Err(stop_err) = ctx.sink.send(Command::AxisStop {
            axes: AxisMask::ALL,
        }) {
            debug!("Stop after abort not queued: {}", stop_err);
        }
        self.strategy.end();
        self.state = TrackerState {
            last_error: Some(e),
            ..TrackerState::default()
        };
    }
}
