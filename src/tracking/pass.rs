//! # Passes
//!
//! Scheduled tracking opportunities and the tables built for them.
//!
//! A pass carries three parallel sequences sampled every 100ms from its
//! start: the propagator's raw look angles, the same angles in the mount
//! frame, and the mount-frame angles wrapped into the ±270° azimuth range.
//! The last one is what the firmware is fed, indexed directly by elapsed
//! time.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::ephemeris::{
    GroundStation, OrbitPropagator, PropagatedPass, RawSample, Tle, Window, SAMPLE_STEP_MS,
};
use crate::error::ScheduleError;
use crate::geometry::{normalize_mechanical, AngleWrap, AzEl, CoordinateTransform};
use crate::icd::protocol::TrackPoint;

/// One scheduled tracking opportunity
#[derive(Debug, Clone, PartialEq)]
pub struct Pass {
    /// Assigned by the [`PassCatalog`]
    pub id: u32,
    pub satellite: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub geostationary: bool,
    pub max_elevation_deg: f64,
    pub max_azimuth_rate_deg_s: f64,
    pub max_elevation_rate_deg_s: f64,
    pub max_azimuth_accel_deg_s2: f64,
    pub max_elevation_accel_deg_s2: f64,
    /// Train axis angle for this pass: AOS azimuth, or zero if geostationary
    pub train_offset_deg: f64,
    pub raw: Vec<RawSample>,
    pub transformed: Vec<AzEl>,
    pub final_track: Vec<AzEl>,
}

/// A pass without its sample tables
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassSummary {
    pub id: u32,
    pub satellite: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub geostationary: bool,
    pub max_elevation_deg: f64,
    pub max_azimuth_rate_deg_s: f64,
    pub max_elevation_rate_deg_s: f64,
    pub train_offset_deg: f64,
    pub points: usize,
}

impl Pass {
    #[must_use]
    pub fn summary(&self) -> PassSummary {
        PassSummary {
            id: self.id,
            satellite: self.satellite.clone(),
            start: self.start,
            end: self.end,
            geostationary: self.geostationary,
            max_elevation_deg: self.max_elevation_deg,
            max_azimuth_rate_deg_s: self.max_azimuth_rate_deg_s,
            max_elevation_rate_deg_s: self.max_elevation_rate_deg_s,
            train_offset_deg: self.train_offset_deg,
            points: self.final_track.len(),
        }
    }

    /// Sample index for a firmware elapsed-time accumulator
    #[must_use]
    pub fn sample_index(elapsed_ms: u32) -> usize {
        (i64::from(elapsed_ms) / SAMPLE_STEP_MS) as usize
    }

    /// Up to `max_points` final-track points starting at `elapsed_ms`.
    ///
    /// Returns `None` once the accumulator runs past the end of the pass.
    #[must_use]
    pub fn block_at(&self, elapsed_ms: u32, max_points: usize) -> Option<Vec<TrackPoint>> {
        let index = Self::sample_index(elapsed_ms);
        if index >= self.final_track.len() {
            return None;
        }
        Some(self.points(index, max_points))
    }

    /// The first block, sent with the initial control message
    #[must_use]
    pub fn initial_block(&self, max_points: usize) -> Vec<TrackPoint> {
        self.points(0, max_points)
    }

    fn points(&self, index: usize, max_points: usize) -> Vec<TrackPoint> {
        self.final_track
            .iter()
            .skip(index)
            .take(max_points)
            .map(|p| TrackPoint {
                elevation: p.elevation_deg as f32,
                azimuth: p.azimuth_deg as f32,
            })
            .collect()
    }
}

/// Passes addressable by identifier
#[derive(Debug, Default)]
pub struct PassCatalog {
    passes: BTreeMap<u32, Arc<Pass>>,
    next_id: u32,
}

impl PassCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self {
            passes: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Store a pass under a fresh identifier and return it
    pub fn insert(&mut self, mut pass: Pass) -> u32 {
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        pass.id = id;
        self.passes.insert(id, Arc::new(pass));
        id
    }

    #[must_use]
    pub fn get(&self, id: u32) -> Option<Arc<Pass>> {
        self.passes.get(&id).cloned()
    }

    /// Summaries in start-time order
    #[must_use]
    pub fn list(&self) -> Vec<PassSummary> {
        let mut list: Vec<PassSummary> = self.passes.values().map(|p| p.summary()).collect();
        list.sort_by_key(|p| (p.start, p.id));
        list
    }

    pub fn clear(&mut self) {
        self.passes.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

/// Turns TLEs into fully tabulated passes
#[derive(Clone)]
pub struct ScheduleBuilder {
    propagator: Arc<dyn OrbitPropagator>,
    transform: Arc<dyn CoordinateTransform>,
    wrap: Arc<dyn AngleWrap>,
    station: GroundStation,
    tilt_offset_deg: f64,
    min_elevation_deg: f64,
}

impl std::fmt::Debug for ScheduleBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleBuilder")
            .field("station", &self.station)
            .field("tilt_offset_deg", &self.tilt_offset_deg)
            .field("min_elevation_deg", &self.min_elevation_deg)
            .finish_non_exhaustive()
    }
}

impl ScheduleBuilder {
    #[must_use]
    pub fn new(
        propagator: Arc<dyn OrbitPropagator>,
        transform: Arc<dyn CoordinateTransform>,
        wrap: Arc<dyn AngleWrap>,
        station: GroundStation,
        tilt_offset_deg: f64,
        min_elevation_deg: f64,
    ) -> Self {
        Self {
            propagator,
            transform,
            wrap,
            station,
            tilt_offset_deg,
            min_elevation_deg,
        }
    }

    /// Predict and tabulate every pass of `tle_text` inside `window`.
    ///
    /// CPU heavy; run it off the orchestrator's tick.
    ///
    /// # Errors
    ///
    /// Returns error if the TLE is invalid or propagation fails
    pub fn build(&self, tle_text: &str, window: Window) -> Result<Vec<Pass>, ScheduleError> {
        let tle = Tle::parse(tle_text)?;
        let satellite = tle
            .name
            .clone()
            .unwrap_or_else(|| tle.line1.get(2..7).unwrap_or("unknown").trim().to_string());

        let predicted =
            self.propagator
                .schedule(&tle, &self.station, window, self.min_elevation_deg)?;

        let passes: Vec<Pass> = predicted
            .into_iter()
            .filter(|p| !p.samples.is_empty())
            .map(|p| self.tabulate(&satellite, p))
            .collect();

        info!("Scheduled {} passes of {}", passes.len(), satellite);
        Ok(passes)
    }

    /// A fixed-pointing pass for a geostationary target over `window`
    #[must_use]
    pub fn geostationary(&self, satellite: &str, target: AzEl, window: Window) -> Pass {
        let raw = RawSample {
            azimuth_deg: target.azimuth_deg,
            elevation_deg: target.elevation_deg,
            range_km: 0.0,
            altitude_km: 35_786.0,
        };
        self.tabulate(
            satellite,
            PropagatedPass {
                start: window.start,
                end: window.end,
                samples: vec![raw],
                geostationary: true,
            },
        )
    }

    fn tabulate(&self, satellite: &str, pass: PropagatedPass) -> Pass {
        let train_offset_deg = if pass.geostationary {
            0.0
        } else {
            pass.samples
                .first()
                .map(|s| normalize_mechanical(s.azimuth_deg))
                .unwrap_or(0.0)
        };

        let transformed: Vec<AzEl> = pass
            .samples
            .iter()
            .map(|s| {
                self.transform
                    .transform(s.az_el(), self.tilt_offset_deg, train_offset_deg)
            })
            .collect();
        let final_track = self.wrap.wrap(&transformed);

        let az: Vec<f64> = final_track.iter().map(|p| p.azimuth_deg).collect();
        let el: Vec<f64> = final_track.iter().map(|p| p.elevation_deg).collect();
        let (max_azimuth_rate_deg_s, max_azimuth_accel_deg_s2) = rate_extrema(&az);
        let (max_elevation_rate_deg_s, max_elevation_accel_deg_s2) = rate_extrema(&el);

        Pass {
            id: 0,
            satellite: satellite.to_string(),
            start: pass.start,
            end: pass.end,
            geostationary: pass.geostationary,
            max_elevation_deg: pass
                .samples
                .iter()
                .map(|s| s.elevation_deg)
                .fold(f64::MIN, f64::max),
            max_azimuth_rate_deg_s,
            max_elevation_rate_deg_s,
            max_azimuth_accel_deg_s2,
            max_elevation_accel_deg_s2,
            train_offset_deg,
            raw: pass.samples,
            transformed,
            final_track,
        }
    }
}

/// Largest absolute first and second differences, per second
fn rate_extrema(values: &[f64]) -> (f64, f64) {
    let dt = SAMPLE_STEP_MS as f64 / 1000.0;
    let rates: Vec<f64> = values.windows(2).map(|w| (w[1] - w[0]) / dt).collect();
    let max_rate = rates.iter().map(|r| r.abs()).fold(0.0, f64::max);
    let max_accel = rates
        .windows(2)
        .map(|w| ((w[1] - w[0]) / dt).abs())
        .fold(0.0, f64::max);
    (max_rate, max_accel)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::geometry::{ContinuousWrap, TiltTrainTransform};
    use chrono::{Duration, TimeZone};

    /// Propagator returning canned passes
    pub(crate) struct FixedPropagator {
        pub passes: Vec<PropagatedPass>,
    }

    impl OrbitPropagator for FixedPropagator {
        fn schedule(
            &self,
            _tle: &Tle,
            _station: &GroundStation,
            _window: Window,
            _min_elevation_deg: f64,
        ) -> Result<Vec<PropagatedPass>, ScheduleError> {
            Ok(self.passes.clone())
        }
    }

    pub(crate) fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap()
    }

    /// `count` samples, azimuth stepping 0.1° per sample from `az0`
    pub(crate) fn synthetic_pass(start: DateTime<Utc>, az0: f64, count: usize) -> PropagatedPass {
        let samples = (0..count)
            .map(|i| RawSample {
                azimuth_deg: (az0 + 0.1 * i as f64).rem_euclid(360.0),
                elevation_deg: 10.0 + 0.05 * i as f64,
                range_km: 1000.0,
                altitude_km: 500.0,
            })
            .collect();
        PropagatedPass {
            start,
            end: start + Duration::milliseconds((count as i64 - 1) * SAMPLE_STEP_MS),
            samples,
            geostationary: false,
        }
    }

    pub(crate) fn builder(passes: Vec<PropagatedPass>) -> ScheduleBuilder {
        ScheduleBuilder::new(
            Arc::new(FixedPropagator { passes }),
            Arc::new(TiltTrainTransform),
            Arc::new(ContinuousWrap::default()),
            GroundStation::new(45.0, 10.0, 0.0),
            0.0,
            5.0,
        )
    }

    pub(crate) const TLE_TEXT: &str = "TESTSAT
1 25544U 98067A   08264.51782528 -.00002182  00000-0 -11606-4 0  2927
2 25544  51.6416 247.4627 0006703 130.5360 325.0288 15.72125391563537";

    fn window() -> Window {
        Window::new(t0(), t0() + Duration::hours(24)).unwrap()
    }

    #[test]
    fn test_build_tabulates_three_sequences() {
        let passes = builder(vec![synthetic_pass(t0(), 350.0, 200)])
            .build(TLE_TEXT, window())
            .unwrap();
        assert_eq!(passes.len(), 1);

        let pass = &passes[0];
        assert_eq!(pass.satellite, "TESTSAT");
        assert_eq!(pass.raw.len(), 200);
        assert_eq!(pass.transformed.len(), 200);
        assert_eq!(pass.final_track.len(), 200);
        assert!((pass.train_offset_deg - (-10.0)).abs() < 1e-9);
        // train at AOS azimuth puts the first mount-frame azimuth at zero
        assert!(pass.final_track[0].azimuth_deg.abs() < 1e-6);
        assert!((pass.max_azimuth_rate_deg_s - 1.0).abs() < 1e-6);
        assert!((pass.max_elevation_deg - (10.0 + 0.05 * 199.0)).abs() < 1e-9);
    }

    #[test]
    fn test_final_track_is_continuous() {
        let passes = builder(vec![synthetic_pass(t0(), 300.0, 1500)])
            .build(TLE_TEXT, window())
            .unwrap();
        let track = &passes[0].final_track;
        for w in track.windows(2) {
            assert!((w[1].azimuth_deg - w[0].azimuth_deg).abs() < 0.2);
        }
        assert!(track.iter().all(|p| p.azimuth_deg.abs() <= 270.0));
    }

    #[test]
    fn test_build_propagates_format_errors() {
        let result = builder(vec![]).build("not a tle", window());
        assert!(matches!(result, Err(ScheduleError::InvalidTleFormat)));
    }

    #[test]
    fn test_geostationary_pass() {
        let pass = builder(vec![]).geostationary("GEO-1", AzEl::new(200.0, 40.0), window());
        assert!(pass.geostationary);
        assert_eq!(pass.train_offset_deg, 0.0);
        assert_eq!(pass.final_track.len(), 1);
        assert!((pass.final_track[0].azimuth_deg - (-160.0)).abs() < 1e-6);
        assert!((pass.final_track[0].elevation_deg - 40.0).abs() < 1e-6);
    }

    #[test]
    fn test_elapsed_5000_selects_index_50() {
        let passes = builder(vec![synthetic_pass(t0(), 100.0, 300)])
            .build(TLE_TEXT, window())
            .unwrap();
        let pass = &passes[0];

        assert_eq!(Pass::sample_index(5000), 50);
        let block = pass.block_at(5000, 50).unwrap();
        assert_eq!(block.len(), 50);
        assert_eq!(block[0].azimuth, pass.final_track[50].azimuth_deg as f32);
        assert_eq!(block[0].elevation, pass.final_track[50].elevation_deg as f32);
    }

    #[test]
    fn test_block_near_end_is_short_and_past_end_is_none() {
        let passes = builder(vec![synthetic_pass(t0(), 100.0, 120)])
            .build(TLE_TEXT, window())
            .unwrap();
        let pass = &passes[0];

        assert_eq!(pass.block_at(10_000, 50).unwrap().len(), 20);
        assert!(pass.block_at(12_000, 50).is_none());
        assert_eq!(pass.initial_block(50).len(), 50);
    }

    #[test]
    fn test_catalog_assigns_ids_and_clears() {
        let mut catalog = PassCatalog::new();
        let b = builder(vec![]);
        let later_window =
            Window::new(t0() + Duration::hours(2), t0() + Duration::hours(3)).unwrap();
        let later = b.geostationary("B", AzEl::new(10.0, 10.0), later_window);
        let earlier = b.geostationary("A", AzEl::new(10.0, 10.0), window());

        let id_b = catalog.insert(later);
        let id_a = catalog.insert(earlier);
        assert_eq!((id_b, id_a), (1, 2));
        assert_eq!(catalog.get(2).unwrap().satellite, "A");

        let list = catalog.list();
        assert_eq!(list[0].satellite, "A");
        assert_eq!(list[1].satellite, "B");

        catalog.clear();
        assert!(catalog.is_empty());
        assert!(catalog.get(1).is_none());
        // ids are not reused after a clear
        assert_eq!(catalog.insert(b.geostationary("C", AzEl::default(), window())), 3);
    }
}
