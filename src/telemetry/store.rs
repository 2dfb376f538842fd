//! # Telemetry Store
//!
//! Single-writer, multi-reader home of the latest firmware status.
//!
//! The link's receive path is the only writer ([`TelemetryStore`]). It merges
//! each decoded status into a fresh immutable snapshot and swaps it in through
//! a `tokio::sync::watch` channel. Readers ([`TelemetryReader`]) clone an
//! `Arc` out of the channel and never hold a lock across their own work.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::trace;

use crate::icd::status::StatusSnapshot;

/// Default window within which the last update counts as "connected"
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::seconds(5);

/// What the store publishes: snapshot plus bookkeeping
#[derive(Debug, Clone, Default)]
pub struct TelemetryRecord {
    pub snapshot: Arc<StatusSnapshot>,
    /// Bumped only when the curated field subset changes
    pub version: u64,
    /// Time of the last accepted merge
    pub last_update: Option<DateTime<Utc>>,
}

/// Link health as shown to display consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionHealth {
    pub last_update: Option<DateTime<Utc>>,
    pub connected: bool,
    pub version: u64,
}

/// Writer half; owned by the link's receive path
#[derive(Debug)]
pub struct TelemetryStore {
    tx: watch::Sender<TelemetryRecord>,
    timeout: Duration,
}

/// Cloneable read-only handle
#[derive(Debug, Clone)]
pub struct TelemetryReader {
    rx: watch::Receiver<TelemetryRecord>,
    timeout: Duration,
}

impl TelemetryStore {
    /// Create an empty store
    ///
    /// # Arguments
    ///
    /// * `timeout` - Connection timeout; an update older than this means disconnected
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let (tx, _rx) = watch::channel(TelemetryRecord::default());
        Self { tx, timeout }
    }

    /// Hand out a new reader
    #[must_use]
    pub fn reader(&self) -> TelemetryReader {
        TelemetryReader {
            rx: self.tx.subscribe(),
            timeout: self.timeout,
        }
    }

    /// Merge an incoming status at the current time
    pub fn merge(&self, incoming: &StatusSnapshot) -> bool {
        self.merge_at(incoming, Utc::now())
    }

    /// Merge an incoming status, stamping it with `now`.
    ///
    /// The merged snapshot always replaces the current one and refreshes
    /// `last_update`; the version only moves, and waiting readers are only
    /// woken, when the curated signature changed.
    ///
    /// # Returns
    ///
    /// * `bool` - Whether the curated subset changed
    pub fn merge_at(&self, incoming: &StatusSnapshot, now: DateTime<Utc>) -> bool {
        let current = Arc::clone(&self.tx.borrow().snapshot);
        let merged = current.merged_with(incoming);
        let changed = merged.signature() != current.signature();
        let merged = Arc::new(merged);

        self.tx.send_if_modified(|record| {
            record.snapshot = merged;
            record.last_update = Some(now);
            if changed {
                record.version += 1;
                trace!(version = record.version, "telemetry changed");
            }
            changed
        });

        changed
    }
}

impl TelemetryReader {
    /// Latest record (snapshot + version + timestamp)
    #[must_use]
    pub fn record(&self) -> TelemetryRecord {
        self.rx.borrow().clone()
    }

    /// Latest snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<StatusSnapshot> {
        Arc::clone(&self.rx.borrow().snapshot)
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.rx.borrow().version
    }

    /// True iff `now - last_update < timeout`
    #[must_use]
    pub fn is_connected_at(&self, now: DateTime<Utc>) -> bool {
        is_within(self.rx.borrow().last_update, now, self.timeout)
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.is_connected_at(Utc::now())
    }

    /// Health summary at `now`
    #[must_use]
    pub fn health_at(&self, now: DateTime<Utc>) -> ConnectionHealth {
        let record = self.rx.borrow();
        ConnectionHealth {
            last_update: record.last_update,
            connected: is_within(record.last_update, now, self.timeout),
            version: record.version,
        }
    }

    #[must_use]
    pub fn health(&self) -> ConnectionHealth {
        self.health_at(Utc::now())
    }
}

fn is_within(last_update: Option<DateTime<Utc>>, now: DateTime<Utc>, timeout: Duration) -> bool {
    last_update.map(|t| now - t < timeout).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 20, 12, 0, 0).unwrap()
    }

    fn status_with_az(az: f32) -> StatusSnapshot {
        let mut s = StatusSnapshot::default();
        s.azimuth.angle = Some(az);
        s
    }

    #[test]
    fn test_starts_empty_and_disconnected() {
        let store = TelemetryStore::new(DEFAULT_CONNECTION_TIMEOUT);
        let reader = store.reader();

        assert_eq!(*reader.snapshot(), StatusSnapshot::default());
        assert_eq!(reader.version(), 0);
        assert!(!reader.is_connected_at(t0()));
    }

    #[test]
    fn test_version_bumps_only_on_curated_change() {
        let store = TelemetryStore::new(DEFAULT_CONNECTION_TIMEOUT);
        let reader = store.reader();

        assert!(store.merge_at(&status_with_az(10.0), t0()));
        assert_eq!(reader.version(), 1);

        // same curated content
        assert!(!store.merge_at(&status_with_az(10.0), t0()));
        assert_eq!(reader.version(), 1);

        // non-curated field: stored but no version bump
        let mut windy = StatusSnapshot::default();
        windy.wind_speed = Some(12.0);
        assert!(!store.merge_at(&windy, t0()));
        assert_eq!(reader.version(), 1);
        assert_eq!(reader.snapshot().wind_speed, Some(12.0));

        assert!(store.merge_at(&status_with_az(11.0), t0()));
        assert_eq!(reader.version(), 2);
    }

    #[test]
    fn test_version_never_decreases() {
        let store = TelemetryStore::new(DEFAULT_CONNECTION_TIMEOUT);
        let reader = store.reader();
        let mut last = 0;

        for az in [1.0, 1.0, 2.0, 2.0, 2.0, 3.0, 1.0] {
            store.merge_at(&status_with_az(az), t0());
            assert!(reader.version() >= last);
            last = reader.version();
        }
        assert_eq!(last, 4);
    }

    #[test]
    fn test_partial_update_keeps_known_fields() {
        let store = TelemetryStore::new(DEFAULT_CONNECTION_TIMEOUT);
        let reader = store.reader();

        let mut first = status_with_az(100.0);
        first.elevation.angle = Some(30.0);
        store.merge_at(&first, t0());

        let mut partial = StatusSnapshot::default();
        partial.elevation.angle = Some(31.0);
        store.merge_at(&partial, t0());

        let snap = reader.snapshot();
        assert_eq!(snap.azimuth.angle, Some(100.0));
        assert_eq!(snap.elevation.angle, Some(31.0));
    }

    #[test]
    fn test_connected_boundary() {
        let store = TelemetryStore::new(DEFAULT_CONNECTION_TIMEOUT);
        let reader = store.reader();
        store.merge_at(&status_with_az(0.0), t0());

        assert!(reader.is_connected_at(t0()));
        assert!(reader.is_connected_at(t0() + Duration::milliseconds(4999)));
        // exactly at the timeout counts as disconnected
        assert!(!reader.is_connected_at(t0() + Duration::seconds(5)));
        assert!(!reader.is_connected_at(t0() + Duration::seconds(6)));
    }

    #[test]
    fn test_last_update_refreshed_without_change() {
        let store = TelemetryStore::new(DEFAULT_CONNECTION_TIMEOUT);
        let reader = store.reader();
        store.merge_at(&status_with_az(0.0), t0());
        store.merge_at(&status_with_az(0.0), t0() + Duration::seconds(4));

        assert!(reader.is_connected_at(t0() + Duration::seconds(8)));
        let health = reader.health_at(t0() + Duration::seconds(8));
        assert!(health.connected);
        assert_eq!(health.version, 1);
    }

    #[test]
    fn test_reader_snapshot_is_stable_across_writes() {
        let store = TelemetryStore::new(DEFAULT_CONNECTION_TIMEOUT);
        let reader = store.reader();
        store.merge_at(&status_with_az(1.0), t0());

        let held = reader.snapshot();
        store.merge_at(&status_with_az(2.0), t0());

        assert_eq!(held.azimuth.angle, Some(1.0));
        assert_eq!(reader.snapshot().azimuth.angle, Some(2.0));
    }
}
