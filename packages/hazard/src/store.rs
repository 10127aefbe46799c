//! Copy-on-write incident store with an R-tree index.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use rstar::{AABB, RTree, primitives::GeomWithData};
use saferoute_hazard_models::{BoundingBox, DecayModel, HazardConfig, Incident};
use serde::Serialize;

use crate::HazardError;

type IndexedIncident = GeomWithData<[f64; 2], Arc<Incident>>;

/// Immutable view of the incident set at one ingestion boundary.
///
/// Obtained from [`HazardStore::snapshot`]. Holding a snapshot never blocks
/// ingestion; the store copies the snapshot on the next write instead.
#[derive(Clone)]
pub struct HazardSnapshot {
    version: u64,
    decay: DecayModel,
    tree: RTree<IndexedIncident>,
    ids: HashSet<String>,
    retained_since: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for HazardSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HazardSnapshot")
            .field("version", &self.version)
            .field("incidents", &self.tree.size())
            .field("retained_since", &self.retained_since)
            .finish_non_exhaustive()
    }
}

impl HazardSnapshot {
    /// An empty snapshot weighted by `decay`.
    #[must_use]
    pub fn empty(decay: DecayModel) -> Self {
        Self {
            version: 0,
            decay,
            tree: RTree::new(),
            ids: HashSet::new(),
            retained_since: None,
        }
    }

    /// Builds a snapshot directly from a set of incidents. Later duplicates
    /// of an id are ignored.
    #[must_use]
    pub fn from_incidents(
        decay: DecayModel,
        incidents: impl IntoIterator<Item = Incident>,
    ) -> Self {
        let mut ids = HashSet::new();
        let entries: Vec<IndexedIncident> = incidents
            .into_iter()
            .filter(|incident| ids.insert(incident.id.clone()))
            .map(|incident| GeomWithData::new(incident.position.to_xy(), Arc::new(incident)))
            .collect();

        Self {
            version: 1,
            decay,
            tree: RTree::bulk_load(entries),
            ids,
            retained_since: None,
        }
    }

    /// Incremented on every successful write.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// The weighting model incidents in this snapshot are scored with.
    #[must_use]
    pub const fn decay(&self) -> &DecayModel {
        &self.decay
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Cutoff of the latest purge that dropped anything. Incidents older
    /// than this may be missing; `None` means nothing was ever purged.
    #[must_use]
    pub const fn retained_since(&self) -> Option<DateTime<Utc>> {
        self.retained_since
    }

    /// Checks that every incident at or after `since` is still stored.
    ///
    /// # Errors
    ///
    /// Returns [`HazardError::Validation`] if a purge may have dropped
    /// incidents from that window.
    pub fn ensure_retained(&self, since: DateTime<Utc>) -> Result<(), HazardError> {
        match self.retained_since {
            Some(cutoff) if since < cutoff => Err(HazardError::validation(format!(
                "incident history before {} is no longer retained",
                cutoff.to_rfc3339()
            ))),
            _ => Ok(()),
        }
    }

    /// Incidents inside `region` whose decayed weight at `as_of` exceeds the
    /// model's epsilon.
    ///
    /// The iterator borrows the snapshot and can be recreated any number of
    /// times with identical results.
    pub fn query(
        &self,
        region: BoundingBox,
        as_of: DateTime<Utc>,
    ) -> impl Iterator<Item = &Incident> + '_ {
        let decay = self.decay;
        self.within(region)
            .filter(move |incident| decay.is_significant(incident, as_of))
    }

    /// Every incident inside `region`, regardless of age.
    pub fn within(&self, region: BoundingBox) -> impl Iterator<Item = &Incident> + '_ {
        let envelope = AABB::from_corners(region.min_xy(), region.max_xy());
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|entry| entry.data.as_ref())
    }

    /// Every incident in the snapshot, in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Incident> + '_ {
        self.tree.iter().map(|entry| entry.data.as_ref())
    }

    fn insert(&mut self, incident: Incident) -> bool {
        if !self.ids.insert(incident.id.clone()) {
            return false;
        }
        self.tree
            .insert(GeomWithData::new(incident.position.to_xy(), Arc::new(incident)));
        true
    }

    fn purge_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let expired: Vec<IndexedIncident> = self
            .tree
            .iter()
            .filter(|entry| entry.data.timestamp < cutoff)
            .cloned()
            .collect();

        for entry in &expired {
            self.tree.remove(entry);
            self.ids.remove(&entry.data.id);
        }
        if !expired.is_empty() {
            self.retained_since = Some(self.retained_since.map_or(cutoff, |c| c.max(cutoff)));
        }
        expired.len()
    }
}

/// Result of ingesting a single incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    /// The incident was new and is now visible to queries.
    Inserted,
    /// An incident with the same id was already stored; nothing changed.
    Duplicate,
}

/// An incident that failed validation during a batch ingest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedIncident {
    pub id: String,
    pub reason: String,
}

/// Summary of a batch ingest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Newly inserted incidents.
    pub accepted: usize,
    /// Incidents whose id was already stored.
    pub duplicates: usize,
    /// Incidents that failed validation.
    pub rejected: Vec<RejectedIncident>,
    /// Expired incidents dropped while applying the batch.
    pub purged: usize,
    /// Snapshot version after the batch.
    pub version: u64,
}

/// Health of the upstream incident feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedStatus {
    /// `false` once a refresh has failed and until the next success.
    pub available: bool,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for FeedStatus {
    fn default() -> Self {
        Self {
            available: true,
            last_success: None,
            last_error: None,
        }
    }
}

/// Thread-safe incident store.
///
/// Writers copy the current snapshot if any reader still holds it, apply the
/// change, and publish the result; readers clone an `Arc` and never hold the
/// lock while they compute.
#[derive(Debug)]
pub struct HazardStore {
    config: HazardConfig,
    current: RwLock<Arc<HazardSnapshot>>,
    feed: RwLock<FeedStatus>,
}

impl HazardStore {
    #[must_use]
    pub fn new(config: HazardConfig) -> Self {
        let snapshot = HazardSnapshot::empty(config.decay);
        Self {
            config,
            current: RwLock::new(Arc::new(snapshot)),
            feed: RwLock::new(FeedStatus::default()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &HazardConfig {
        &self.config
    }

    /// The current snapshot. Cheap; clones an `Arc`.
    #[must_use]
    pub fn snapshot(&self) -> Arc<HazardSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validates and stores `incident` using the wall clock.
    ///
    /// # Errors
    ///
    /// Returns [`HazardError::Validation`] if the incident is outside the
    /// service region, has invalid coordinates or an empty id, or is
    /// timestamped in the future.
    pub fn ingest(&self, incident: Incident) -> Result<IngestOutcome, HazardError> {
        self.ingest_at(incident, Utc::now())
    }

    /// Like [`Self::ingest`] with an explicit ingestion clock.
    ///
    /// # Errors
    ///
    /// See [`Self::ingest`].
    pub fn ingest_at(
        &self,
        incident: Incident,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome, HazardError> {
        self.validate(&incident, now)?;

        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if guard.contains(&incident.id) {
            log::debug!("Ignoring duplicate incident {}", incident.id);
            return Ok(IngestOutcome::Duplicate);
        }

        let snapshot = Arc::make_mut(&mut guard);
        snapshot.insert(incident);
        if self.config.purge_on_ingest {
            let purged = snapshot.purge_before(now - self.config.retention());
            if purged > 0 {
                log::debug!("Purged {purged} expired incidents");
            }
        }
        snapshot.version += 1;
        drop(guard);

        Ok(IngestOutcome::Inserted)
    }

    /// Ingests a batch under a single write. Invalid incidents are reported
    /// and skipped; they do not abort the batch.
    pub fn ingest_batch(
        &self,
        incidents: impl IntoIterator<Item = Incident>,
        now: DateTime<Utc>,
    ) -> IngestReport {
        let mut report = IngestReport::default();
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut changed = false;

        for incident in incidents {
            if let Err(e) = self.validate(&incident, now) {
                log::warn!("Rejected incident {}: {e}", incident.id);
                report.rejected.push(RejectedIncident {
                    id: incident.id,
                    reason: e.to_string(),
                });
                continue;
            }
            if guard.contains(&incident.id) {
                report.duplicates += 1;
                continue;
            }
            Arc::make_mut(&mut guard).insert(incident);
            report.accepted += 1;
            changed = true;
        }

        if changed {
            let snapshot = Arc::make_mut(&mut guard);
            if self.config.purge_on_ingest {
                report.purged = snapshot.purge_before(now - self.config.retention());
            }
            snapshot.version += 1;
        }
        report.version = guard.version;
        drop(guard);

        log::info!(
            "Ingested batch: {} accepted, {} duplicates, {} rejected, {} purged",
            report.accepted,
            report.duplicates,
            report.rejected.len(),
            report.purged
        );
        report
    }

    /// Drops incidents older than the retention period relative to `as_of`.
    ///
    /// Queries whose window starts inside the retention period see the same
    /// incidents before and after; [`HazardSnapshot::ensure_retained`] tells
    /// callers whether an older window is still answerable.
    pub fn purge_expired(&self, as_of: DateTime<Utc>) -> usize {
        let cutoff = as_of - self.config.retention();
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if !guard.iter().any(|incident| incident.timestamp < cutoff) {
            return 0;
        }
        let snapshot = Arc::make_mut(&mut guard);
        let purged = snapshot.purge_before(cutoff);
        snapshot.version += 1;
        log::debug!("Purged {purged} incidents older than {}", cutoff.to_rfc3339());
        purged
    }

    fn validate(&self, incident: &Incident, now: DateTime<Utc>) -> Result<(), HazardError> {
        if incident.id.trim().is_empty() {
            return Err(HazardError::validation("incident id must not be empty"));
        }
        if !incident.position.is_valid() {
            return Err(HazardError::validation(format!(
                "invalid coordinates ({}, {})",
                incident.position.lat, incident.position.lon
            )));
        }
        if let Some(region) = &self.config.service_region
            && !region.contains(&incident.position)
        {
            return Err(HazardError::validation(format!(
                "position ({}, {}) is outside the service region",
                incident.position.lat, incident.position.lon
            )));
        }
        let latest = now + Duration::seconds(self.config.max_clock_skew_seconds.max(0));
        if incident.timestamp > latest {
            return Err(HazardError::validation(format!(
                "timestamp {} is in the future",
                incident.timestamp.to_rfc3339()
            )));
        }
        Ok(())
    }

    /// Current feed health.
    #[must_use]
    pub fn feed_status(&self) -> FeedStatus {
        self.feed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether risk data can be trusted for routing.
    #[must_use]
    pub fn risk_available(&self) -> bool {
        self.feed_status().available
    }

    /// Records a successful feed refresh.
    pub fn mark_feed_success(&self, at: DateTime<Utc>) {
        let mut feed = self.feed.write().unwrap_or_else(PoisonError::into_inner);
        feed.available = true;
        feed.last_success = Some(at);
        feed.last_error = None;
    }

    /// Records a failed feed refresh. Routing degrades to time-only until
    /// the next success.
    pub fn mark_feed_failure(&self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("Incident feed unavailable: {message}");
        let mut feed = self.feed.write().unwrap_or_else(PoisonError::into_inner);
        feed.available = false;
        feed.last_error = Some(message);
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use saferoute_hazard_models::{GeoPoint, IncidentCategory, Severity};

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn incident(id: &str, lat: f64, lon: f64, age: Duration) -> Incident {
        Incident::new(
            id,
            GeoPoint::new(lat, lon),
            now() - age,
            IncidentCategory::Violent,
            Severity::High,
        )
    }

    fn chicago() -> HazardConfig {
        HazardConfig {
            service_region: Some(BoundingBox::new(-88.0, 41.6, -87.5, 42.1)),
            ..HazardConfig::default()
        }
    }

    #[test]
    fn ingest_is_visible_immediately() {
        let store = HazardStore::new(chicago());
        let outcome = store
            .ingest_at(incident("a", 41.88, -87.63, Duration::hours(1)), now())
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Inserted);

        let snapshot = store.snapshot();
        let region = BoundingBox::around(GeoPoint::new(41.88, -87.63), 100.0);
        assert_eq!(snapshot.query(region, now()).count(), 1);
        assert_eq!(snapshot.version(), 1);
    }

    #[test]
    fn duplicate_ids_are_ignored() {
        let store = HazardStore::new(chicago());
        let first = incident("dup", 41.88, -87.63, Duration::hours(1));
        let mut second = first.clone();
        second.severity = Severity::Low;

        assert_eq!(store.ingest_at(first, now()).unwrap(), IngestOutcome::Inserted);
        assert_eq!(store.ingest_at(second, now()).unwrap(), IngestOutcome::Duplicate);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.iter().next().unwrap().severity, Severity::High);
        assert_eq!(snapshot.version(), 1, "duplicate must not bump the version");
    }

    #[test]
    fn rejects_out_of_region_and_future_incidents() {
        let store = HazardStore::new(chicago());
        let outside = incident("nyc", 40.71, -74.0, Duration::hours(1));
        assert!(matches!(
            store.ingest_at(outside, now()),
            Err(HazardError::Validation { .. })
        ));

        let future = incident("future", 41.88, -87.63, Duration::hours(-2));
        assert!(matches!(
            store.ingest_at(future, now()),
            Err(HazardError::Validation { .. })
        ));

        let skewed = incident("skewed", 41.88, -87.63, Duration::seconds(-30));
        assert!(store.ingest_at(skewed, now()).is_ok());
    }

    #[test]
    fn rejects_blank_ids_and_bad_coordinates() {
        let store = HazardStore::new(HazardConfig::default());
        assert!(store
            .ingest_at(incident(" ", 41.88, -87.63, Duration::hours(1)), now())
            .is_err());
        assert!(store
            .ingest_at(incident("nan", f64::NAN, -87.63, Duration::hours(1)), now())
            .is_err());
    }

    #[test]
    fn query_filters_decayed_incidents() {
        let store = HazardStore::new(HazardConfig {
            purge_on_ingest: false,
            ..chicago()
        });
        store.ingest_batch(
            vec![
                incident("fresh", 41.88, -87.63, Duration::hours(1)),
                incident("stale", 41.88, -87.63, Duration::days(10)),
            ],
            now(),
        );

        let snapshot = store.snapshot();
        let region = BoundingBox::around(GeoPoint::new(41.88, -87.63), 100.0);
        let ids: Vec<&str> = snapshot.query(region, now()).map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["fresh"]);
        assert_eq!(snapshot.within(region).count(), 2);
        // restartable
        assert_eq!(snapshot.query(region, now()).count(), 1);
    }

    #[test]
    fn batch_reports_each_outcome() {
        let store = HazardStore::new(chicago());
        store
            .ingest_at(incident("existing", 41.88, -87.63, Duration::hours(1)), now())
            .unwrap();

        let report = store.ingest_batch(
            vec![
                incident("existing", 41.88, -87.63, Duration::hours(1)),
                incident("new", 41.89, -87.62, Duration::hours(2)),
                incident("outside", 10.0, 10.0, Duration::hours(2)),
                incident("old", 41.88, -87.63, Duration::days(400)),
            ],
            now(),
        );

        assert_eq!(report.accepted, 2);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].id, "outside");
        assert_eq!(report.purged, 1);
        assert_eq!(report.version, 2);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[test]
    fn purging_does_not_change_query_results() {
        let store = HazardStore::new(HazardConfig {
            purge_on_ingest: false,
            ..chicago()
        });
        store.ingest_batch(
            vec![
                incident("fresh", 41.88, -87.63, Duration::hours(3)),
                incident("stale", 41.88, -87.63, Duration::days(8)),
                incident("ancient", 41.88, -87.63, Duration::days(400)),
            ],
            now(),
        );
        let region = BoundingBox::around(GeoPoint::new(41.88, -87.63), 500.0);
        let before: Vec<String> = store
            .snapshot()
            .query(region, now())
            .map(|i| i.id.clone())
            .collect();

        assert_eq!(store.purge_expired(now()), 1);
        let after: Vec<String> = store
            .snapshot()
            .query(region, now())
            .map(|i| i.id.clone())
            .collect();
        assert_eq!(before, after);
        assert_eq!(store.purge_expired(now()), 0);
    }

    #[test]
    fn purge_keeps_history_within_retention() {
        let store = HazardStore::new(chicago());
        store.ingest_batch(
            vec![
                incident("week-old", 41.88, -87.63, Duration::days(9)),
                incident("ancient", 41.88, -87.63, Duration::days(400)),
            ],
            now(),
        );

        let snapshot = store.snapshot();
        assert!(snapshot.contains("week-old"));
        assert!(!snapshot.contains("ancient"));

        // A historical instant still sees the nine-day-old incident.
        let as_of = now() - Duration::days(5);
        let region = BoundingBox::around(GeoPoint::new(41.88, -87.63), 100.0);
        assert_eq!(snapshot.query(region, as_of).count(), 1);

        let cutoff = snapshot.retained_since().unwrap();
        assert_eq!(cutoff, now() - Duration::days(365));
        assert!(snapshot.ensure_retained(now() - Duration::days(30)).is_ok());
        assert!(matches!(
            snapshot.ensure_retained(now() - Duration::days(366)),
            Err(HazardError::Validation { .. })
        ));
        let untouched = HazardStore::new(chicago()).snapshot();
        assert!(untouched.ensure_retained(now() - Duration::days(999)).is_ok());
    }

    #[test]
    fn held_snapshots_are_unaffected_by_later_writes() {
        let store = HazardStore::new(chicago());
        store
            .ingest_at(incident("a", 41.88, -87.63, Duration::hours(1)), now())
            .unwrap();
        let held = store.snapshot();
        store
            .ingest_at(incident("b", 41.88, -87.63, Duration::hours(1)), now())
            .unwrap();

        assert_eq!(held.len(), 1);
        assert_eq!(store.snapshot().len(), 2);
        assert!(store.snapshot().version() > held.version());
    }

    #[test]
    fn feed_status_round_trip() {
        let store = HazardStore::new(HazardConfig::default());
        assert!(store.risk_available());
        store.mark_feed_failure("timeout fetching feed");
        assert!(!store.risk_available());
        assert_eq!(
            store.feed_status().last_error.as_deref(),
            Some("timeout fetching feed")
        );
        store.mark_feed_success(now());
        assert!(store.risk_available());
        assert_eq!(store.feed_status().last_success, Some(now()));
    }
}
