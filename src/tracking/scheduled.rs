//! Scheduled-pass tracking: train to the pass's AOS offset, then hand the
//! firmware a program track once the pass window opens.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::machine::{ActiveOutcome, TickContext, TrackingStrategy};
use super::pass::Pass;
use super::phase::{ActionLedger, ACTION_COMPLETED, ACTION_IN_PROGRESS};
use crate::error::TrackingError;
use crate::icd::protocol::{
    AxisMask, AxisMotion, ManualMove, SatTrackBlock, SatTrackHeader, SatTrackInitial,
    SAT_TRACK_BLOCK_POINTS, SAT_TRACK_STEP_MS,
};
use crate::icd::Command;

/// Seconds between the NTP epoch (1900) and the Unix epoch
const NTP_UNIX_OFFSET_S: i64 = 2_208_988_800;

/// Tracks one [`Pass`] per session
#[derive(Debug, Default)]
pub struct ScheduledPassStrategy {
    pass: Option<Arc<Pass>>,
}

impl ScheduledPassStrategy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The loaded pass, if a session is running
    #[must_use]
    pub fn pass(&self) -> Option<&Arc<Pass>> {
        self.pass.as_ref()
    }

    fn loaded(&self) -> Result<&Arc<Pass>, TrackingError> {
        self.pass.as_ref().ok_or(TrackingError::UnknownPass(0))
    }

    fn block_points(ctx: &TickContext<'_>) -> usize {
        ctx.settings.block_points.clamp(1, SAT_TRACK_BLOCK_POINTS)
    }

    fn begin_program_track(ctx: &TickContext<'_>, pass: &Pass) -> Result<(), TrackingError> {
        let total_points = u16::try_from(pass.final_track.len()).unwrap_or(u16::MAX);
        ctx.send(Command::SatTrackHeader(SatTrackHeader {
            aos_unix_s: unix_seconds(pass.start),
            los_unix_s: unix_seconds(pass.end),
            total_points,
            step_ms: SAT_TRACK_STEP_MS,
        }))?;

        let (ntp_seconds, ntp_fraction) = ntp_timestamp(ctx.now);
        ctx.send(Command::SatTrackInitial(SatTrackInitial {
            ntp_seconds,
            ntp_fraction,
            time_offset_s: ctx.offsets.time_offset_s,
            points: pass.initial_block(Self::block_points(ctx)),
        }))?;

        info!(
            "Pass {} ({}): program track started, {} points",
            pass.id, pass.satellite, total_points
        );
        Ok(())
    }

    fn point_at_fixed_target(ctx: &TickContext<'_>, pass: &Pass) -> Result<(), TrackingError> {
        let target = pass
            .final_track
            .first()
            .ok_or(TrackingError::EmptyPass(pass.id))?;
        let speed = ctx.settings.slew_speed_deg_s as f32;

        ctx.send(Command::ManualMove(ManualMove {
            axes: AxisMask::AZ_EL,
            azimuth: AxisMotion::new(target.azimuth_deg as f32, speed),
            elevation: AxisMotion::new(target.elevation_deg as f32, speed),
            ..ManualMove::default()
        }))?;

        info!(
            "Pass {} ({}): pointing at az {:.2} el {:.2}",
            pass.id, pass.satellite, target.azimuth_deg, target.elevation_deg
        );
        Ok(())
    }
}

impl TrackingStrategy for ScheduledPassStrategy {
    type Session = Arc<Pass>;

    fn name(&self) -> &'static str {
        "scheduled"
    }

    fn begin(&mut self, pass: Arc<Pass>) {
        info!(
            "Pass {} ({}) loaded: {} to {}, train {:.2} deg",
            pass.id, pass.satellite, pass.start, pass.end, pass.train_offset_deg
        );
        self.pass = Some(pass);
    }

    fn end(&mut self) {
        self.pass = None;
    }

    fn secondary_target(&mut self, _ctx: &TickContext<'_>) -> Result<f64, TrackingError> {
        Ok(self.loaded()?.train_offset_deg)
    }

    fn active_tick(
        &mut self,
        ctx: &TickContext<'_>,
        _train_deg: f64,
        ledger: &mut ActionLedger,
    ) -> Result<ActiveOutcome, TrackingError> {
        let pass = Arc::clone(self.loaded()?);

        if ctx.now < pass.start {
            return Ok(ActiveOutcome::Continue);
        }

        if ctx.now <= pass.end {
            if ledger.fire(ACTION_IN_PROGRESS) {
                if pass.geostationary {
                    Self::point_at_fixed_target(ctx, &pass)?;
                } else {
                    Self::begin_program_track(ctx, &pass)?;
                }
            }
            return Ok(ActiveOutcome::Continue);
        }

        if ledger.fire(ACTION_COMPLETED) {
            info!("Pass {} ({}) completed", pass.id, pass.satellite);
        }
        Ok(ActiveOutcome::Completed)
    }

    fn firmware_request(
        &mut self,
        ctx: &TickContext<'_>,
        elapsed_ms: u32,
        ledger: &ActionLedger,
    ) -> Result<(), TrackingError> {
        let pass = self.loaded()?;
        if !ledger.has_fired(ACTION_IN_PROGRESS) || pass.geostationary {
            debug!("Track request at {} ms before program track, ignored", elapsed_ms);
            return Ok(());
        }

        match pass.block_at(elapsed_ms, Self::block_points(ctx)) {
            Some(points) => {
                debug!("Track block at {} ms, {} points", elapsed_ms, points.len());
                ctx.send(Command::SatTrackData(SatTrackBlock { elapsed_ms, points }))
            }
            None => {
                warn!(
                    "Track request at {} ms is past the end of pass {} ({} points)",
                    elapsed_ms,
                    pass.id,
                    pass.final_track.len()
                );
                Ok(())
            }
        }
    }

    fn detail(&self) -> Option<String> {
        self.pass
            .as_ref()
            .map(|p| format!("pass {} ({})", p.id, p.satellite))
    }
}

fn unix_seconds(at: DateTime<Utc>) -> u32 {
    u32::try_from(at.timestamp()).unwrap_or(0)
}

/// NTP seconds and 2^-32 fraction for `at`
fn ntp_timestamp(at: DateTime<Utc>) -> (u32, u32) {
    let seconds = (at.timestamp() + NTP_UNIX_OFFSET_S) as u32;
    let fraction = ((u64::from(at.timestamp_subsec_nanos()) << 32) / 1_000_000_000) as u32;
    (seconds, fraction)
}
