//! Per-track data state.
//!
//! The manager owns every track's source and its latest published data.
//! Each fetch carries a [`RequestToken`]: the view generation it was issued
//! under and the track's request sequence number. A result is published only
//! if both are still current, so out-of-order completions can never show
//! data for a view the user has already left.

use crate::formats::Record;
use crate::model::{DisplayedRegionModel, ExpansionData, RegionExpander};
use crate::sources::{DataSource, SourceFactory, TrackOptions, TrackSpec};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(u64);

impl TrackId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out track ids, unique for the issuer's lifetime.
#[derive(Debug)]
pub struct TrackIdIssuer {
    next: AtomicU64,
}

impl TrackIdIssuer {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn issue(&self) -> TrackId {
        TrackId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TrackIdIssuer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    Idle,
    Fetching,
    Ready,
    Error,
}

/// Latest published state of a track.
#[derive(Debug, Clone, Serialize)]
pub struct TrackData {
    pub status: TrackStatus,
    pub records: Arc<Vec<Record>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// View generation the records belong to.
    pub view_generation: u64,
}

impl TrackData {
    fn idle() -> Self {
        Self {
            status: TrackStatus::Idle,
            records: Arc::new(Vec::new()),
            error: None,
            view_generation: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestToken {
    pub view_generation: u64,
    pub sequence: u64,
}

/// What became of a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchOutcome {
    /// The result (data or error) is now the track's state.
    Published,
    /// The view or the track moved on before the result arrived.
    Discarded,
    /// An identical request was already in flight.
    Deduplicated,
}

/// What an update to a track's spec requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateEffect {
    /// Display-only change; published data stays valid.
    None,
    Refetch,
    /// A new source replaced the old one; data must be refetched.
    Replaced,
}

/// The view tracks are fetched for.
#[derive(Debug, Clone)]
pub struct ViewState {
    pub generation: u64,
    /// The region on screen.
    pub region: DisplayedRegionModel,
    /// The region fetched, including off-screen margins.
    pub expansion: ExpansionData,
    pub width_px: f64,
    pub bases_per_pixel: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct FetchKey {
    view_generation: u64,
    bases_per_pixel: u64,
    options: String,
}

struct InFlight {
    key: FetchKey,
    sequence: u64,
    abort: Option<AbortHandle>,
}

struct CacheEntry {
    spec: TrackSpec,
    source: Arc<dyn DataSource>,
    sequence: u64,
    in_flight: Option<InFlight>,
    data: TrackData,
    /// Status to fall back to when a fetch ends without publishing.
    settled: TrackStatus,
}

impl CacheEntry {
    /// Invalidates any outstanding request.
    fn supersede(&mut self) {
        self.sequence += 1;
        if let Some(in_flight) = self.in_flight.take() {
            if let Some(abort) = in_flight.abort {
                abort.abort();
            }
        }
    }
}

#[derive(Default)]
struct Inner {
    tracks: HashMap<TrackId, CacheEntry>,
    view: Option<ViewState>,
    generation: u64,
}

/// Owns per-track sources and state.
pub struct TrackDataManager {
    factory: SourceFactory,
    ids: TrackIdIssuer,
    expander: RegionExpander,
    inner: Mutex<Inner>,
}

impl TrackDataManager {
    pub fn new(factory: SourceFactory, expander: RegionExpander) -> Self {
        Self {
            factory,
            ids: TrackIdIssuer::new(),
            expander,
            inner: Mutex::new(Inner::default()),
        }
    }

    // Never held across an await.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_track(&self, spec: TrackSpec) -> Result<TrackId> {
        let source = self.factory.create(&spec)?;
        Ok(self.add_source(spec, source))
    }

    /// Registers a track backed by a caller-provided source.
    pub fn add_source(&self, spec: TrackSpec, source: Arc<dyn DataSource>) -> TrackId {
        let id = self.ids.issue();
        debug!(%id, url = %spec.url, kind = ?spec.kind, "adding track");
        self.lock().tracks.insert(
            id,
            CacheEntry {
                spec,
                source,
                sequence: 0,
                in_flight: None,
                data: TrackData::idle(),
                settled: TrackStatus::Idle,
            },
        );
        id
    }

    pub fn update_track(&self, id: TrackId, spec: TrackSpec) -> Result<UpdateEffect> {
        let replacement = {
            let inner = self.lock();
            let entry = inner
                .tracks
                .get(&id)
                .ok_or_else(|| Error::NotFound(format!("track {}", id)))?;
            if entry.spec.same_source(&spec) {
                None
            } else {
                Some(self.factory.create(&spec)?)
            }
        };

        let mut inner = self.lock();
        let entry = inner
            .tracks
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("track {}", id)))?;
        let effect = if let Some(source) = replacement {
            entry.supersede();
            let old = std::mem::replace(&mut entry.source, source);
            old.clean_up();
            entry.data = TrackData::idle();
            entry.settled = TrackStatus::Idle;
            UpdateEffect::Replaced
        } else if entry.spec.options.fetch_key() != spec.options.fetch_key() {
            entry.supersede();
            entry.data.status = TrackStatus::Idle;
            entry.settled = TrackStatus::Idle;
            UpdateEffect::Refetch
        } else {
            UpdateEffect::None
        };
        debug!(%id, ?effect, "updated track");
        entry.spec = spec;
        Ok(effect)
    }

    pub fn remove_track(&self, id: TrackId) -> Result<()> {
        let mut entry = self
            .lock()
            .tracks
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("track {}", id)))?;
        entry.supersede();
        entry.source.clean_up();
        debug!(%id, "removed track");
        Ok(())
    }

    pub fn track_ids(&self) -> Vec<TrackId> {
        let mut ids: Vec<TrackId> = self.lock().tracks.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn track_spec(&self, id: TrackId) -> Option<TrackSpec> {
        self.lock().tracks.get(&id).map(|e| e.spec.clone())
    }

    pub fn track_data(&self, id: TrackId) -> Option<TrackData> {
        self.lock().tracks.get(&id).map(|e| e.data.clone())
    }

    pub fn view(&self) -> Option<ViewState> {
        self.lock().view.clone()
    }

    /// Sets the displayed region. Returns `false`, keeping the current
    /// generation, when neither the region nor the width changed.
    pub fn set_view(&self, region: DisplayedRegionModel, width_px: f64) -> Result<bool> {
        if !width_px.is_finite() || width_px <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "view width must be positive, got {}",
                width_px
            )));
        }
        let mut inner = self.lock();
        if let Some(view) = &inner.view {
            if view.region.same_axis(&region)
                && view.region.start() == region.start()
                && view.region.end() == region.end()
                && view.width_px == width_px
            {
                return Ok(false);
            }
        }

        let expansion = self.expander.calculate_expansion(width_px, &region);
        let bases_per_pixel = region.width() as f64 / width_px;
        inner.generation += 1;
        debug!(
            generation = inner.generation,
            start = region.start(),
            end = region.end(),
            bases_per_pixel,
            "view changed"
        );
        inner.view = Some(ViewState {
            generation: inner.generation,
            region,
            expansion,
            width_px,
            bases_per_pixel,
        });
        Ok(true)
    }

    /// Fetches a track's data for the current view and publishes it if the
    /// request is still current when it completes.
    pub async fn fetch_track(self: &Arc<Self>, id: TrackId) -> Result<FetchOutcome> {
        let (token, source, region, bases_per_pixel, options) = {
            let mut inner = self.lock();
            let view = inner
                .view
                .clone()
                .ok_or_else(|| Error::InvalidInput("no view has been set".to_string()))?;
            let entry = inner
                .tracks
                .get_mut(&id)
                .ok_or_else(|| Error::NotFound(format!("track {}", id)))?;

            let key = FetchKey {
                view_generation: view.generation,
                bases_per_pixel: view.bases_per_pixel.to_bits(),
                options: entry.spec.options.fetch_key(),
            };
            if entry.in_flight.as_ref().is_some_and(|f| f.key == key) {
                debug!(%id, "request already in flight");
                return Ok(FetchOutcome::Deduplicated);
            }

            entry.supersede();
            let token = RequestToken {
                view_generation: view.generation,
                sequence: entry.sequence,
            };
            entry.in_flight = Some(InFlight {
                key,
                sequence: token.sequence,
                abort: None,
            });
            entry.data.status = TrackStatus::Fetching;
            (
                token,
                entry.source.clone(),
                view.expansion.expanded_region,
                view.bases_per_pixel,
                entry.spec.options.clone(),
            )
        };

        let manager = self.clone();
        let task = tokio::spawn(async move {
            let result = source.get_data(&region, bases_per_pixel, &options).await;
            manager.publish(id, token, result)
        });

        {
            let mut inner = self.lock();
            if let Some(in_flight) = inner
                .tracks
                .get_mut(&id)
                .and_then(|e| e.in_flight.as_mut())
                .filter(|f| f.sequence == token.sequence)
            {
                in_flight.abort = Some(task.abort_handle());
            }
        }

        match task.await {
            Ok(outcome) => Ok(outcome),
            Err(err) if err.is_cancelled() => Ok(FetchOutcome::Discarded),
            Err(err) => Err(Error::Internal(format!("track fetch failed: {}", err))),
        }
    }

    fn publish(&self, id: TrackId, token: RequestToken, result: Result<Vec<Record>>) -> FetchOutcome {
        let mut inner = self.lock();
        let generation = inner.generation;
        let Some(entry) = inner.tracks.get_mut(&id) else {
            return FetchOutcome::Discarded;
        };
        if token.view_generation != generation || token.sequence != entry.sequence {
            debug!(
                %id,
                token_generation = token.view_generation,
                generation,
                "discarding stale result"
            );
            if entry.in_flight.as_ref().is_some_and(|f| f.sequence == token.sequence) {
                entry.in_flight = None;
            }
            if entry.in_flight.is_none() && entry.data.status == TrackStatus::Fetching {
                entry.data.status = entry.settled;
            }
            return FetchOutcome::Discarded;
        }

        entry.in_flight = None;
        entry.data = match result {
            Ok(records) => TrackData {
                status: TrackStatus::Ready,
                records: Arc::new(records),
                error: None,
                view_generation: token.view_generation,
            },
            Err(err) => {
                warn!(%id, error = %err, "track fetch failed");
                TrackData {
                    status: TrackStatus::Error,
                    records: Arc::new(Vec::new()),
                    error: Some(err.to_string()),
                    view_generation: token.view_generation,
                }
            }
        };
        entry.settled = entry.data.status;
        FetchOutcome::Published
    }

    /// Fetches every track for the current view concurrently.
    pub async fn refresh_all(self: &Arc<Self>) -> Vec<(TrackId, Result<FetchOutcome>)> {
        let mut tasks = JoinSet::new();
        for id in self.track_ids() {
            let manager = self.clone();
            tasks.spawn(async move { (id, manager.fetch_track(id).await) });
        }
        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => warn!(error = %err, "refresh task failed"),
            }
        }
        outcomes.sort_by_key(|(id, _)| *id);
        outcomes
    }

    /// Reads a track for an arbitrary region, bypassing published state.
    pub async fn query_track(
        &self,
        id: TrackId,
        region: &DisplayedRegionModel,
        bases_per_pixel: f64,
        options: Option<&TrackOptions>,
    ) -> Result<Vec<Record>> {
        let (source, spec_options) = {
            let inner = self.lock();
            let entry = inner
                .tracks
                .get(&id)
                .ok_or_else(|| Error::NotFound(format!("track {}", id)))?;
            (entry.source.clone(), entry.spec.options.clone())
        };
        source
            .get_data(region, bases_per_pixel, options.unwrap_or(&spec_options))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::BedRecord;
    use crate::model::{ChromosomeInterval, NavigationContext, Segment};
    use crate::sources::{DecodePool, TrackKind};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::{Notify, oneshot};

    /// Source whose calls block until the test releases them, keyed by the
    /// start of the requested locus.
    #[derive(Default)]
    struct GatedSource {
        gates: Mutex<HashMap<u64, oneshot::Receiver<Result<Vec<Record>>>>>,
        started: Notify,
        calls: AtomicUsize,
        cleaned: AtomicUsize,
    }

    impl GatedSource {
        fn gate(&self, start: u64) -> oneshot::Sender<Result<Vec<Record>>> {
            let (tx, rx) = oneshot::channel();
            self.gates.lock().unwrap().insert(start, rx);
            tx
        }
    }

    #[async_trait]
    impl DataSource for GatedSource {
        async fn fetch_loci(
            &self,
            loci: &[ChromosomeInterval],
            _bases_per_pixel: f64,
            _options: &TrackOptions,
        ) -> Result<Vec<Record>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let start = loci.first().map_or(0, |l| l.start);
            let gate = self.gates.lock().unwrap().remove(&start);
            self.started.notify_one();
            match gate {
                Some(rx) => rx.await.unwrap_or_else(|_| Ok(Vec::new())),
                None => Ok(Vec::new()),
            }
        }

        fn clean_up(&self) {
            self.cleaned.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn bed(start: u64) -> Record {
        Record::Bed(BedRecord {
            chr: "chr1".to_string(),
            start,
            end: start + 1,
            rest: Vec::new(),
        })
    }

    fn spec() -> TrackSpec {
        TrackSpec {
            kind: TrackKind::Bed,
            url: "mem://a.bed.gz".to_string(),
            index_url: None,
            options: TrackOptions::default(),
        }
    }

    fn manager() -> Arc<TrackDataManager> {
        Arc::new(TrackDataManager::new(
            SourceFactory::new(std::path::PathBuf::from("."), DecodePool::new(1), 8, 1_000),
            RegionExpander::identity(),
        ))
    }

    fn region(context: &Arc<NavigationContext>, start: i64, end: i64) -> DisplayedRegionModel {
        DisplayedRegionModel::with_region(context.clone(), 10, start, end)
    }

    fn context() -> Arc<NavigationContext> {
        Arc::new(NavigationContext::new("genome", vec![Segment::chromosome("chr1", 1_000_000)]).unwrap())
    }

    #[tokio::test]
    async fn test_stale_result_is_discarded() {
        let manager = manager();
        let source = Arc::new(GatedSource::default());
        let id = manager.add_source(spec(), source.clone());
        let context = context();

        let release_a = source.gate(0);
        let release_b = source.gate(5_000);

        manager.set_view(region(&context, 0, 1_000), 100.0).unwrap();
        let first = tokio::spawn({
            let manager = manager.clone();
            async move { manager.fetch_track(id).await }
        });
        source.started.notified().await;

        manager.set_view(region(&context, 5_000, 6_000), 100.0).unwrap();
        let second = tokio::spawn({
            let manager = manager.clone();
            async move { manager.fetch_track(id).await }
        });
        source.started.notified().await;

        // The newer request completes first, then the stale one.
        release_b.send(Ok(vec![bed(5_000)])).unwrap();
        assert_eq!(second.await.unwrap().unwrap(), FetchOutcome::Published);
        let _ = release_a.send(Ok(vec![bed(0)]));
        let first = first.await.unwrap().unwrap();
        assert_eq!(first, FetchOutcome::Discarded);

        let data = manager.track_data(id).unwrap();
        assert_eq!(data.status, TrackStatus::Ready);
        assert_eq!(data.records.as_slice(), &[bed(5_000)]);
        assert_eq!(data.view_generation, 2);
    }

    /// Starts a fetch, moves the view without refetching, then completes the
    /// fetch with `result`.
    async fn complete_after_view_change(result: Result<Vec<Record>>) -> (FetchOutcome, TrackData) {
        let manager = manager();
        let source = Arc::new(GatedSource::default());
        let id = manager.add_source(spec(), source.clone());
        let context = context();

        let release = source.gate(0);
        manager.set_view(region(&context, 0, 1_000), 100.0).unwrap();
        let pending = tokio::spawn({
            let manager = manager.clone();
            async move { manager.fetch_track(id).await }
        });
        source.started.notified().await;

        assert!(manager.set_view(region(&context, 5_000, 6_000), 100.0).unwrap());
        release.send(result).unwrap();
        let outcome = pending.await.unwrap().unwrap();
        (outcome, manager.track_data(id).unwrap())
    }

    #[tokio::test]
    async fn test_result_for_old_view_is_discarded() {
        let (outcome, data) = complete_after_view_change(Ok(vec![bed(0)])).await;
        assert_eq!(outcome, FetchOutcome::Discarded);
        assert_eq!(data.status, TrackStatus::Idle);
        assert!(data.records.is_empty());
        assert_eq!(data.view_generation, 0);
    }

    #[tokio::test]
    async fn test_error_for_old_view_is_discarded() {
        let (outcome, data) =
            complete_after_view_change(Err(Error::CorruptFile("bad block".to_string()))).await;
        assert_eq!(outcome, FetchOutcome::Discarded);
        assert_eq!(data.status, TrackStatus::Idle);
        assert!(data.error.is_none());
        assert!(data.records.is_empty());
    }

    #[tokio::test]
    async fn test_discard_restores_last_published_status() {
        let manager = manager();
        let source = Arc::new(GatedSource::default());
        let id = manager.add_source(spec(), source.clone());
        let context = context();

        manager.set_view(region(&context, 0, 1_000), 100.0).unwrap();
        assert_eq!(manager.fetch_track(id).await.unwrap(), FetchOutcome::Published);
        // Permit left by the first fetch.
        source.started.notified().await;

        let release = source.gate(5_000);
        manager.set_view(region(&context, 5_000, 6_000), 100.0).unwrap();
        let pending = tokio::spawn({
            let manager = manager.clone();
            async move { manager.fetch_track(id).await }
        });
        source.started.notified().await;
        assert_eq!(manager.track_data(id).unwrap().status, TrackStatus::Fetching);

        manager.set_view(region(&context, 9_000, 10_000), 100.0).unwrap();
        release.send(Ok(vec![bed(5_000)])).unwrap();
        assert_eq!(pending.await.unwrap().unwrap(), FetchOutcome::Discarded);
        let data = manager.track_data(id).unwrap();
        assert_eq!(data.status, TrackStatus::Ready);
        assert_eq!(data.view_generation, 1);
    }

    #[tokio::test]
    async fn test_current_error_is_published() {
        let manager = manager();
        let source = Arc::new(GatedSource::default());
        let id = manager.add_source(spec(), source.clone());
        let context = context();

        let release = source.gate(0);
        manager.set_view(region(&context, 0, 1_000), 100.0).unwrap();
        let pending = tokio::spawn({
            let manager = manager.clone();
            async move { manager.fetch_track(id).await }
        });
        source.started.notified().await;
        release
            .send(Err(Error::CorruptFile("bad block".to_string())))
            .unwrap();
        assert_eq!(pending.await.unwrap().unwrap(), FetchOutcome::Published);
        let data = manager.track_data(id).unwrap();
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["records"], serde_json::json!([]));
        assert_eq!(data.status, TrackStatus::Error);
        assert!(data.error.unwrap().contains("bad block"));
    }

    #[tokio::test]
    async fn test_identical_requests_are_deduplicated() {
        let manager = manager();
        let source = Arc::new(GatedSource::default());
        let id = manager.add_source(spec(), source.clone());
        let context = context();

        let release = source.gate(0);
        manager.set_view(region(&context, 0, 1_000), 100.0).unwrap();
        let pending = tokio::spawn({
            let manager = manager.clone();
            async move { manager.fetch_track(id).await }
        });
        source.started.notified().await;

        assert_eq!(manager.fetch_track(id).await.unwrap(), FetchOutcome::Deduplicated);
        // Same region again: no new generation, still deduplicated.
        assert!(!manager.set_view(region(&context, 0, 1_000), 100.0).unwrap());
        assert_eq!(manager.fetch_track(id).await.unwrap(), FetchOutcome::Deduplicated);

        release.send(Ok(vec![bed(1)])).unwrap();
        assert_eq!(pending.await.unwrap().unwrap(), FetchOutcome::Published);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_update_render_only_vs_fetch_options() {
        let manager = manager();
        let source = Arc::new(GatedSource::default());
        let id = manager.add_source(spec(), source.clone());

        let mut styled = spec();
        styled
            .options
            .display
            .insert("color".to_string(), serde_json::json!("blue"));
        assert_eq!(manager.update_track(id, styled.clone()).unwrap(), UpdateEffect::None);
        assert_eq!(manager.track_spec(id).unwrap().options.display["color"], "blue");

        let mut limited = styled;
        limited.options.data_limit = Some(10);
        assert_eq!(manager.update_track(id, limited).unwrap(), UpdateEffect::Refetch);
        assert_eq!(source.cleaned.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_remove_aborts_and_cleans_up() {
        let manager = manager();
        let source = Arc::new(GatedSource::default());
        let id = manager.add_source(spec(), source.clone());
        let context = context();

        let _release = source.gate(0);
        manager.set_view(region(&context, 0, 1_000), 100.0).unwrap();
        let pending = tokio::spawn({
            let manager = manager.clone();
            async move { manager.fetch_track(id).await }
        });
        source.started.notified().await;

        manager.remove_track(id).unwrap();
        assert_eq!(pending.await.unwrap().unwrap(), FetchOutcome::Discarded);
        assert_eq!(source.cleaned.load(Ordering::SeqCst), 1);
        assert!(manager.track_data(id).is_none());
        assert!(matches!(manager.remove_track(id), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_fetch_without_view_fails() {
        let manager = manager();
        let id = manager.add_source(spec(), Arc::new(GatedSource::default()));
        assert!(matches!(
            manager.fetch_track(id).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(manager.set_view(region(&context(), 0, 100), 0.0).is_err());
    }

    #[test]
    fn test_track_ids_are_unique() {
        let issuer = TrackIdIssuer::new();
        let a = issuer.issue();
        let b = issuer.issue();
        assert_ne!(a, b);
        assert!(b > a);
    }
}
