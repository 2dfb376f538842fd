//! # Orchestrator
//!
//! Owns both trackers, the pass catalog and the operator offsets, and is the
//! only thing that mutates them. Everything reaches it as a message:
//!
//! - a tick every `tick_interval_ms`
//! - firmware pull requests forwarded by the link
//! - operator requests, each answered on its own oneshot channel
//!
//! After every tick the current [`OrchestratorStatus`] is published on a
//! watch channel for display consumers and the recorder.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::machine::{Offsets, TickContext, Tracker, TrackingSettings, TrackingStrategy};
use super::pass::{Pass, PassCatalog, PassSummary};
use super::phase::TrackerStatus;
use super::scheduled::ScheduledPassStrategy;
use super::sun::{SunSpeeds, SunStrategy};
use crate::error::TrackingError;
use crate::icd::protocol::{AxisMask, BandMask, ManualMove};
use crate::icd::Command;
use crate::link::{CommandSink, FirmwareEvent};
use crate::telemetry::{ConnectionHealth, TelemetryReader};

/// Operator-facing requests
#[derive(Debug, Clone)]
pub enum EngineRequest {
    StartScheduled { pass_id: u32 },
    StopScheduled,
    StartSun { speeds: SunSpeeds },
    StopSun,
    EmergencyStop { engage: bool },
    ManualMove(ManualMove),
    PositionOffset {
        axes: AxisMask,
        azimuth: f32,
        elevation: f32,
        train: f32,
    },
    TimeOffset { seconds: f32 },
    Feed { bands: BandMask, on: bool },
    AddPasses(Vec<Pass>),
    ListPasses,
    ClearPasses,
    Status,
}

/// Answer to an [`EngineRequest`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum EngineReply {
    Ok,
    PassesAdded { ids: Vec<u32> },
    Passes { passes: Vec<PassSummary> },
    Status(Box<OrchestratorStatus>),
    Error { message: String },
}

/// Snapshot of everything a display needs about tracking and the link
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorStatus {
    pub time: DateTime<Utc>,
    pub connection: ConnectionHealth,
    pub scheduled: TrackerStatus,
    pub sun: TrackerStatus,
    pub offsets: Offsets,
    pub passes: usize,
}

/// A request plus where to send its reply
#[derive(Debug)]
pub struct Envelope {
    pub request: EngineRequest,
    pub reply: oneshot::Sender<EngineReply>,
}

/// Cloneable client for a running orchestrator
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Envelope>,
}

impl EngineHandle {
    /// Create a handle and the receiver [`run_orchestrator`] drains
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Send a request and wait for its reply
    pub async fn request(&self, request: EngineRequest) -> EngineReply {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Envelope { request, reply }).await.is_err() {
            return EngineReply::Error {
                message: "orchestrator is not running".to_string(),
            };
        }
        rx.await.unwrap_or_else(|_| EngineReply::Error {
            message: "orchestrator dropped the request".to_string(),
        })
    }
}

/// Both trackers and the state they share
pub struct Orchestrator {
    scheduled: Tracker<ScheduledPassStrategy>,
    sun: Tracker<SunStrategy>,
    catalog: PassCatalog,
    settings: TrackingSettings,
    offsets: Offsets,
    sink: Arc<dyn CommandSink>,
    telemetry: TelemetryReader,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("scheduled", &self.scheduled.phase())
            .field("sun", &self.sun.phase())
            .field("passes", &self.catalog.len())
            .field("offsets", &self.offsets)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        settings: TrackingSettings,
        sun: SunStrategy,
        sink: Arc<dyn CommandSink>,
        telemetry: TelemetryReader,
    ) -> Self {
        Self {
            scheduled: Tracker::new(ScheduledPassStrategy::new()),
            sun: Tracker::new(sun),
            catalog: PassCatalog::new(),
            settings,
            offsets: Offsets::default(),
            sink,
            telemetry,
        }
    }

    /// Advance both trackers by one tick
    pub fn tick(&mut self, now: DateTime<Utc>) {
        let snapshot = self.telemetry.snapshot();
        let ctx = TickContext {
            now,
            telemetry: &snapshot,
            connected: self.telemetry.is_connected_at(now),
            sink: self.sink.as_ref(),
            settings: &self.settings,
            offsets: &self.offsets,
        };

        self.scheduled.tick(&ctx);
        self.sun.tick(&ctx);
    }

    /// React to a firmware-originated event
    pub fn handle_event(&mut self, event: FirmwareEvent, now: DateTime<Utc>) {
        match event {
            FirmwareEvent::SatTrackRequest { elapsed_ms } => {
                let snapshot = self.telemetry.snapshot();
                let ctx = TickContext {
                    now,
                    telemetry: &snapshot,
                    connected: self.telemetry.is_connected_at(now),
                    sink: self.sink.as_ref(),
                    settings: &self.settings,
                    offsets: &self.offsets,
                };
                self.scheduled.firmware_request(&ctx, elapsed_ms);
            }
        }
    }

    /// Execute one operator request
    pub fn handle_request(&mut self, request: EngineRequest, now: DateTime<Utc>) -> EngineReply {
        debug!("Operator request: {}", request_name(&request));
        match self.apply(request, now) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Operator request rejected: {}", e);
                EngineReply::Error {
                    message: e.to_string(),
                }
            }
        }
    }

    #[must_use]
    pub fn status(&self, now: DateTime<Utc>) -> OrchestratorStatus {
        OrchestratorStatus {
            time: now,
            connection: self.telemetry.health_at(now),
            scheduled: self.scheduled.status(),
            sun: self.sun.status(),
            offsets: self.offsets,
            passes: self.catalog.len(),
        }
    }

    /// Stop whatever is moving; called once on the way out
    pub fn shutdown(&mut self) {
        let mut stopped = false;
        if !self.scheduled.is_idle() {
            stopped |= self.scheduled.stop(self.sink.as_ref()).is_ok();
        }
        if !self.sun.is_idle() {
            stopped |= self.sun.stop(self.sink.as_ref()).is_ok();
        }
        if !stopped {
            if let Err(e) = self.sink.send(Command::AxisStop {
                axes: AxisMask::ALL,
            }) {
                warn!("Final axis stop not queued: {}", e);
            }
        }
        info!("Orchestrator stopped");
    }

    fn apply(
        &mut self,
        request: EngineRequest,
        now: DateTime<Utc>,
    ) -> Result<EngineReply, TrackingError> {
        match request {
            EngineRequest::StartScheduled { pass_id } => {
                Self::ensure_idle(&self.sun)?;
                let pass = self
                    .catalog
                    .get(pass_id)
                    .ok_or(TrackingError::UnknownPass(pass_id))?;
                if pass.final_track.is_empty() {
                    return Err(TrackingError::EmptyPass(pass_id));
                }
                self.scheduled.start(pass)?;
                Ok(EngineReply::Ok)
            }
            EngineRequest::StopScheduled => {
                Self::stop_tracker(&mut self.scheduled, self.sink.as_ref())?;
                Ok(EngineReply::Ok)
            }
            EngineRequest::StartSun { speeds } => {
                Self::ensure_idle(&self.scheduled)?;
                self.sun.start(speeds)?;
                Ok(EngineReply::Ok)
            }
            EngineRequest::StopSun => {
                Self::stop_tracker(&mut self.sun, self.sink.as_ref())?;
                Ok(EngineReply::Ok)
            }
            EngineRequest::EmergencyStop { engage } => {
                self.send(Command::EmergencyStop { engage })?;
                if engage {
                    warn!("Emergency stop engaged");
                    if !self.scheduled.is_idle() {
                        self.scheduled.stop(self.sink.as_ref())?;
                    }
                    if !self.sun.is_idle() {
                        self.sun.stop(self.sink.as_ref())?;
                    }
                } else {
                    info!("Emergency stop released");
                }
                Ok(EngineReply::Ok)
            }
            EngineRequest::ManualMove(motion) => {
                Self::ensure_idle(&self.scheduled)?;
                Self::ensure_idle(&self.sun)?;
                self.send(Command::ManualMove(motion))?;
                Ok(EngineReply::Ok)
            }
            EngineRequest::PositionOffset {
                axes,
                azimuth,
                elevation,
                train,
            } => {
                if axes.contains(AxisMask::AZIMUTH) {
                    self.offsets.azimuth_deg = azimuth;
                }
                if axes.contains(AxisMask::ELEVATION) {
                    self.offsets.elevation_deg = elevation;
                }
                if axes.contains(AxisMask::TRAIN) {
                    self.offsets.train_deg = train;
                }
                self.send(Command::PositionOffset {
                    axes,
                    azimuth,
                    elevation,
                    train,
                })?;
                Ok(EngineReply::Ok)
            }
            EngineRequest::TimeOffset { seconds } => {
                self.offsets.time_offset_s = seconds;
                self.send(Command::TimeOffset { seconds })?;
                Ok(EngineReply::Ok)
            }
            EngineRequest::Feed { bands, on } => {
                self.send(Command::Feed { bands, on })?;
                Ok(EngineReply::Ok)
            }
            EngineRequest::AddPasses(passes) => {
                let ids: Vec<u32> = passes.into_iter().map(|p| self.catalog.insert(p)).collect();
                info!("Added {} passes ({} total)", ids.len(), self.catalog.len());
                Ok(EngineReply::PassesAdded { ids })
            }
            EngineRequest::ListPasses => Ok(EngineReply::Passes {
                passes: self.catalog.list(),
            }),
            EngineRequest::ClearPasses => {
                self.catalog.clear();
                info!("Pass catalog cleared");
                Ok(EngineReply::Ok)
            }
            EngineRequest::Status => Ok(EngineReply::Status(Box::new(self.status(now)))),
        }
    }

    /// Stop one tracker. An idle tracker sends nothing, so the other one
    /// keeps its axes.
    fn stop_tracker<S: TrackingStrategy>(
        tracker: &mut Tracker<S>,
        sink: &dyn CommandSink,
    ) -> Result<(), TrackingError> {
        if tracker.is_idle() {
            debug!("{} tracker already idle", tracker.strategy().name());
            tracker.dismiss();
            return Ok(());
        }
        tracker.stop(sink)
    }

    fn ensure_idle<S: TrackingStrategy>(tracker: &Tracker<S>) -> Result<(), TrackingError> {
        if tracker.is_idle() {
            Ok(())
        } else {
            Err(TrackingError::AlreadyActive(tracker.strategy().name()))
        }
    }

    fn send(&self, command: Command) -> Result<(), TrackingError> {
        self.sink
            .send(command)
            .map_err(|e| TrackingError::CommandRejected(e.to_string()))
    }
}

fn request_name(request: &EngineRequest) -> &'static str {
    match request {
        EngineRequest::StartScheduled { .. } => "start_scheduled",
        EngineRequest::StopScheduled => "stop_scheduled",
        EngineRequest::StartSun { .. } => "start_sun",
        EngineRequest::StopSun => "stop_sun",
        EngineRequest::EmergencyStop { .. } => "emergency_stop",
        EngineRequest::ManualMove(_) => "manual_move",
        EngineRequest::PositionOffset { .. } => "position_offset",
        EngineRequest::TimeOffset { .. } => "time_offset",
        EngineRequest::Feed { .. } => "feed",
        EngineRequest::AddPasses(_) => "add_passes",
        EngineRequest::ListPasses => "list_passes",
        EngineRequest::ClearPasses => "clear_passes",
        EngineRequest::Status => "status",
    }
}

/// Drive an [`Orchestrator`] until shutdown is signalled.
///
/// The tick uses wall-clock time. On shutdown the in-flight step finishes,
/// then [`Orchestrator::shutdown`] queues the final stop.
pub async fn run_orchestrator(
    mut orchestrator: Orchestrator,
    tick_interval: Duration,
    mut events: mpsc::UnboundedReceiver<FirmwareEvent>,
    mut requests: mpsc::Receiver<Envelope>,
    status: watch::Sender<OrchestratorStatus>,
    mut shutdown: watch::Receiver<bool>,
) -> Orchestrator {
    let mut ticker = interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Orchestrator running, tick every {:?}", tick_interval);

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            Some(event) = events.recv() => {
                orchestrator.handle_event(event, Utc::now());
            }

            Some(envelope) = requests.recv() => {
                let reply = orchestrator.handle_request(envelope.request, Utc::now());
                if envelope.reply.send(reply).is_err() {
                    debug!("Requester went away before the reply");
                }
            }

            _ = ticker.tick() => {
                let now = Utc::now();
                orchestrator.tick(now);
                status.send_replace(orchestrator.status(now));
            }
        }
    }

    orchestrator.shutdown();
    status.send_replace(orchestrator.status(Utc::now()));
    orchestrator
}
