use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::cache::EntityCache;
use crate::catalog::primacy::should_promote;
use crate::catalog::{CatalogStore, CatalogWriter, ProjectForm, Resolver, Spin, StoreError};
use crate::identity::derive_id;

/// One play event as reported by a client.
#[derive(Debug, Clone, Deserialize)]
pub struct SpinRequest {
    pub user_id: u64,
    pub time: DateTime<Utc>,
    pub track_title: String,
    pub track_artist_names: Vec<String>,
    pub project_title: String,
    pub project_artist_names: Vec<String>,
    pub project_form: ProjectForm,
    pub project_release: NaiveDate,
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Invalid spin request: {0}")]
    Validation(String),
    #[error("Failed to resolve {entity} {key}: {source}")]
    Resolve {
        entity: &'static str,
        key: String,
        source: StoreError,
    },
    #[error("Failed to write {entity} {key}: {source}")]
    Write {
        entity: &'static str,
        key: String,
        source: StoreError,
    },
}

impl IngestError {
    fn resolve(entity: &'static str, key: impl ToString) -> impl FnOnce(StoreError) -> Self {
        move |source| IngestError::Resolve {
            entity,
            key: key.to_string(),
            source,
        }
    }

    fn write(entity: &'static str, key: impl ToString) -> impl FnOnce(StoreError) -> Self {
        move |source| IngestError::Write {
            entity,
            key: key.to_string(),
            source,
        }
    }
}

impl SpinRequest {
    /// Reject requests that would create nameless catalog entries.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.track_title.trim().is_empty() {
            return Err(IngestError::Validation("track title is empty".into()));
        }
        if self.track_artist_names.is_empty() {
            return Err(IngestError::Validation("track has no artists".into()));
        }
        if self.project_title.trim().is_empty() {
            return Err(IngestError::Validation("project title is empty".into()));
        }
        let blank = self
            .track_artist_names
            .iter()
            .chain(&self.project_artist_names)
            .any(|n| n.trim().is_empty());
        if blank {
            return Err(IngestError::Validation("artist name is empty".into()));
        }
        Ok(())
    }
}

/// Turns play events into catalog rows and spins.
///
/// Cheap to share: one ingestor serves any number of concurrent callers,
/// all going through the same store and cache.
pub struct SpinIngestor {
    store: Arc<dyn CatalogStore>,
    cache: Arc<dyn EntityCache>,
}

impl SpinIngestor {
    pub fn new(store: Arc<dyn CatalogStore>, cache: Arc<dyn EntityCache>) -> Self {
        Self { store, cache }
    }

    /// Record one play, creating whatever artist, track and project rows it
    /// mentions that don't exist yet.
    pub fn ingest_spin(&self, req: &SpinRequest) -> Result<Spin, IngestError> {
        req.validate()?;

        let store = self.store.as_ref();
        let resolver = Resolver::new(store, self.cache.as_ref());
        let writer = CatalogWriter::new(store, &resolver);

        // Track
        let track_id = derive_id(&req.track_title, &req.track_artist_names);
        let mut artist_ids: Option<Vec<u64>> = None;
        let track = match resolver
            .track(track_id)
            .map_err(IngestError::resolve("track", track_id))?
        {
            Some(track) => track,
            None => {
                let ids = resolve_artists(&resolver, &writer, &req.track_artist_names)?;
                let track = writer
                    .create_track(track_id, &req.track_title, &ids)
                    .map_err(IngestError::write("track", track_id))?;
                artist_ids = Some(ids);
                track
            }
        };

        // Project. Its artist credits are the track's artists, not the
        // project's own artist list, which only feeds the id.
        let project_id = derive_id(&req.project_title, &req.project_artist_names);
        let project = match resolver
            .project(project_id)
            .map_err(IngestError::resolve("project", project_id))?
        {
            Some(project) => project,
            None => {
                let ids = match artist_ids.take() {
                    Some(ids) => ids,
                    None => resolve_artists(&resolver, &writer, &req.track_artist_names)?,
                };
                writer
                    .create_project(
                        project_id,
                        &req.project_title,
                        &ids,
                        req.project_form,
                        req.project_release,
                    )
                    .map_err(IngestError::write("project", project_id))?
            }
        };

        // Association and primacy
        if !track.project_ids.contains(&project_id) {
            let current = match track.primary_project_id {
                Some(id) => {
                    let current = resolver
                        .project(id)
                        .map_err(IngestError::resolve("project", id))?;
                    if current.is_none() {
                        log::warn!("Track {} has missing primary project {}", track_id, id);
                    }
                    current
                }
                None => None,
            };
            let make_primary = should_promote(current.as_ref(), &project);
            writer
                .update_track_association(&track, project_id, make_primary)
                .map_err(IngestError::write("track association", track_id))?;
        }

        let spin = store
            .create_spin(req.time, req.user_id, track_id)
            .map_err(IngestError::write("spin", track_id))?;
        log::debug!(
            "Recorded spin {} of \"{}\" for user {}",
            spin.id,
            req.track_title,
            req.user_id
        );
        Ok(spin)
    }
}

/// Look up each artist by name, creating the missing ones, in credit order.
fn resolve_artists(
    resolver: &Resolver<'_>,
    writer: &CatalogWriter<'_>,
    names: &[String],
) -> Result<Vec<u64>, IngestError> {
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        let artist = match resolver
            .artist(name)
            .map_err(IngestError::resolve("artist", name))?
        {
            Some(artist) => artist,
            None => writer
                .create_artist(name)
                .map_err(IngestError::write("artist", name))?,
        };
        ids.push(artist.id);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, MemoryCache};
    use crate::catalog::resolver::track_key;
    use crate::catalog::{Artist, Project, StoreResult, Track};
    use crate::db::Database;
    use chrono::SubsecRound;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    const BAD_IDEA: u64 = 908849726797084829;
    const GUTS: u64 = 2371983535859309014;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn request(track: &str, project: &str, form: ProjectForm, release: &str) -> SpinRequest {
        SpinRequest {
            user_id: 1,
            time: Utc::now(),
            track_title: track.into(),
            track_artist_names: vec!["Olivia Rodrigo".into()],
            project_title: project.into(),
            project_artist_names: vec!["Olivia Rodrigo".into()],
            project_form: form,
            project_release: date(release),
        }
    }

    fn setup() -> (Arc<Database>, Arc<MemoryCache>, SpinIngestor) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let cache = Arc::new(MemoryCache::new(Duration::from_secs(600), 1000));
        let ingestor = SpinIngestor::new(db.clone(), cache.clone());
        (db, cache, ingestor)
    }

    #[test]
    fn test_first_spin_creates_catalog() {
        let (db, _, ingestor) = setup();
        let req = request("bad idea right?", "GUTS", ProjectForm::Album, "2023-08-09");

        let spin = ingestor.ingest_spin(&req).unwrap();
        assert_eq!(spin.track_id, BAD_IDEA);
        assert_eq!(spin.user_id, 1);
        assert_eq!(spin.time, req.time.trunc_subsecs(6));

        let track = db.find_track(BAD_IDEA).unwrap().unwrap();
        assert_eq!(track.title, "bad idea right?");
        assert!(track.project_ids.contains(&GUTS));
        assert_eq!(track.primary_project_id, Some(GUTS));

        let project = db.find_project(GUTS).unwrap().unwrap();
        assert_eq!(project.form, ProjectForm::Album);
        assert_eq!(project.release, date("2023-08-09"));

        let stats = db.stats().unwrap();
        assert_eq!((stats.artists, stats.tracks, stats.projects, stats.spins), (1, 1, 1, 1));
    }

    #[test]
    fn test_repeat_spin_reuses_catalog() {
        let (db, _, ingestor) = setup();
        let req = request("bad idea right?", "GUTS", ProjectForm::Album, "2023-08-09");

        let first = ingestor.ingest_spin(&req).unwrap();
        let second = ingestor.ingest_spin(&req).unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(first.track_id, second.track_id);

        let stats = db.stats().unwrap();
        assert_eq!((stats.artists, stats.tracks, stats.projects, stats.spins), (1, 1, 1, 2));
    }

    #[test]
    fn test_repeat_spin_with_cold_cache_reuses_catalog() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let req = request("bad idea right?", "GUTS", ProjectForm::Album, "2023-08-09");

        for _ in 0..2 {
            let cache = Arc::new(MemoryCache::new(Duration::from_secs(600), 1000));
            SpinIngestor::new(db.clone(), cache).ingest_spin(&req).unwrap();
        }

        let stats = db.stats().unwrap();
        assert_eq!((stats.artists, stats.tracks, stats.projects, stats.spins), (1, 1, 1, 2));
    }

    #[test]
    fn test_single_then_album_promotes_album() {
        let (db, _, ingestor) = setup();
        ingestor
            .ingest_spin(&request("vampire", "vampire", ProjectForm::Single, "2023-06-30"))
            .unwrap();
        // Track and single share title and artists, hence the same id.
        let vampire = derive_id("vampire", &["Olivia Rodrigo"]);
        assert_eq!(db.find_track(vampire).unwrap().unwrap().primary_project_id, Some(vampire));

        // Fresh cache so the track is re-read with its association.
        let cache = Arc::new(MemoryCache::new(Duration::from_secs(600), 1000));
        SpinIngestor::new(db.clone(), cache)
            .ingest_spin(&request("vampire", "GUTS", ProjectForm::Album, "2023-08-09"))
            .unwrap();

        let track = db.find_track(vampire).unwrap().unwrap();
        assert_eq!(track.project_ids.len(), 2);
        assert_eq!(track.primary_project_id, Some(GUTS));
    }

    #[test]
    fn test_album_then_compilation_keeps_album() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let fresh = || {
            SpinIngestor::new(
                db.clone(),
                Arc::new(MemoryCache::new(Duration::from_secs(600), 1000)),
            )
        };
        fresh()
            .ingest_spin(&request("drivers license", "SOUR", ProjectForm::Album, "2021-05-21"))
            .unwrap();
        fresh()
            .ingest_spin(&request("drivers license", "Hits 2021", ProjectForm::Compilation, "2021-12-01"))
            .unwrap();

        let track = db.find_track(derive_id("drivers license", &["Olivia Rodrigo"])).unwrap().unwrap();
        assert_eq!(track.project_ids.len(), 2);
        assert_eq!(track.primary_project_id, Some(derive_id("SOUR", &["Olivia Rodrigo"])));
    }

    #[test]
    fn test_project_credits_track_artists() {
        let (db, _, ingestor) = setup();
        let mut req = request("Lean Beef Patty", "SCARING THE HOES", ProjectForm::Album, "2023-03-24");
        req.track_artist_names = vec!["JPEGMAFIA".into(), "Danny Brown".into()];
        req.project_artist_names = vec!["Various Artists".into()];
        ingestor.ingest_spin(&req).unwrap();

        // "Various Artists" only feeds the project id; no artist row for it.
        assert!(db.find_artist("Various Artists").unwrap().is_none());
        assert_eq!(db.stats().unwrap().artists, 2);
        assert!(db.find_project(derive_id("SCARING THE HOES", &["Various Artists"])).unwrap().is_some());
    }

    #[test]
    fn test_known_track_new_project_resolves_artists() {
        let (db, _, ingestor) = setup();
        ingestor
            .ingest_spin(&request("vampire", "vampire", ProjectForm::Single, "2023-06-30"))
            .unwrap();
        ingestor
            .ingest_spin(&request("vampire", "GUTS", ProjectForm::Album, "2023-08-09"))
            .unwrap();
        // Existing artist reused rather than duplicated.
        assert_eq!(db.stats().unwrap().artists, 1);
        assert_eq!(db.stats().unwrap().projects, 2);
    }

    #[test]
    fn test_validation_happens_before_store_access() {
        let (db, cache, ingestor) = setup();
        let mut req = request("  ", "GUTS", ProjectForm::Album, "2023-08-09");
        assert!(matches!(ingestor.ingest_spin(&req), Err(IngestError::Validation(_))));

        req.track_title = "x".into();
        req.track_artist_names.clear();
        assert!(matches!(ingestor.ingest_spin(&req), Err(IngestError::Validation(_))));

        req.track_artist_names = vec!["".into()];
        assert!(matches!(ingestor.ingest_spin(&req), Err(IngestError::Validation(_))));

        req.track_artist_names = vec!["a".into()];
        req.project_title = "".into();
        assert!(matches!(ingestor.ingest_spin(&req), Err(IngestError::Validation(_))));

        assert!(cache.is_empty());
        assert_eq!(db.stats().unwrap().artists, 0);
    }

    #[test]
    fn test_cached_track_matches_store_after_spin() {
        let (db, cache, ingestor) = setup();
        let req = request("bad idea right?", "GUTS", ProjectForm::Album, "2023-08-09");
        ingestor.ingest_spin(&req).unwrap();

        let cached: Track =
            serde_json::from_str(&cache.get(&track_key(BAD_IDEA)).unwrap().unwrap()).unwrap();
        assert_eq!(Some(cached), db.find_track(BAD_IDEA).unwrap());

        ingestor.ingest_spin(&req).unwrap();
        assert_eq!(db.stats().unwrap().spins, 2);
    }

    #[test]
    fn test_shared_cache_never_demotes_album() {
        let (db, _, ingestor) = setup();
        let vampire = derive_id("vampire", &["Olivia Rodrigo"]);
        let vampire_ep = derive_id("vampire EP", &["Olivia Rodrigo"]);

        ingestor
            .ingest_spin(&request("vampire", "vampire", ProjectForm::Single, "2023-06-30"))
            .unwrap();
        ingestor
            .ingest_spin(&request("vampire", "GUTS", ProjectForm::Album, "2023-08-09"))
            .unwrap();
        assert_eq!(db.find_track(vampire).unwrap().unwrap().primary_project_id, Some(GUTS));

        ingestor
            .ingest_spin(&request("vampire", "vampire EP", ProjectForm::Ep, "2023-07-01"))
            .unwrap();

        let track = db.find_track(vampire).unwrap().unwrap();
        assert_eq!(track.project_ids, BTreeSet::from([vampire, GUTS, vampire_ep]));
        assert_eq!(track.primary_project_id, Some(GUTS));
    }

    /// Cache that fails every call.
    struct BrokenCache;

    impl EntityCache for BrokenCache {
        fn get(&self, _: &str) -> crate::cache::Result<Option<String>> {
            Err(CacheError::Unavailable("connection reset".into()))
        }
        fn put(&self, _: &str, _: &str) -> crate::cache::Result<()> {
            Err(CacheError::Unavailable("connection reset".into()))
        }
    }

    #[test]
    fn test_cache_outage_does_not_fail_ingestion() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let ingestor = SpinIngestor::new(db.clone(), Arc::new(BrokenCache));
        let req = request("bad idea right?", "GUTS", ProjectForm::Album, "2023-08-09");

        ingestor.ingest_spin(&req).unwrap();
        let spin = ingestor.ingest_spin(&req).unwrap();
        assert_eq!(spin.track_id, BAD_IDEA);

        let stats = db.stats().unwrap();
        assert_eq!((stats.artists, stats.tracks, stats.projects, stats.spins), (1, 1, 1, 2));
    }

    /// Wraps a store whose track reads fail and counts every write.
    struct UnreadableTracks {
        inner: Database,
        writes: AtomicUsize,
    }

    impl UnreadableTracks {
        fn wrote(&self) {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CatalogStore for UnreadableTracks {
        fn get_artist(&self, name: &str) -> StoreResult<Option<Artist>> {
            self.inner.get_artist(name)
        }
        fn create_artist(&self, name: &str) -> StoreResult<Artist> {
            self.wrote();
            self.inner.create_artist(name)
        }
        fn get_track(&self, _: u64) -> StoreResult<Option<Track>> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        fn create_track(&self, id: u64, title: &str, artist_ids: &[u64]) -> StoreResult<Track> {
            self.wrote();
            self.inner.create_track(id, title, artist_ids)
        }
        fn get_project(&self, id: u64) -> StoreResult<Option<Project>> {
            self.inner.get_project(id)
        }
        fn create_project(
            &self,
            id: u64,
            title: &str,
            artist_ids: &[u64],
            form: ProjectForm,
            release: NaiveDate,
        ) -> StoreResult<Project> {
            self.wrote();
            self.inner.create_project(id, title, artist_ids, form, release)
        }
        fn update_track_association(&self, t: u64, p: u64, primary: bool) -> StoreResult<()> {
            self.wrote();
            self.inner.update_track_association(t, p, primary)
        }
        fn create_spin(&self, time: DateTime<Utc>, user_id: u64, track_id: u64) -> StoreResult<Spin> {
            self.wrote();
            self.inner.create_spin(time, user_id, track_id)
        }
    }

    #[test]
    fn test_track_read_failure_is_a_resolve_error() {
        let store = Arc::new(UnreadableTracks {
            inner: Database::open_in_memory().unwrap(),
            writes: AtomicUsize::new(0),
        });
        let cache = Arc::new(MemoryCache::new(Duration::from_secs(600), 1000));
        let ingestor = SpinIngestor::new(store.clone(), cache.clone());

        let err = ingestor
            .ingest_spin(&request("bad idea right?", "GUTS", ProjectForm::Album, "2023-08-09"))
            .unwrap_err();
        match err {
            IngestError::Resolve { entity, key, source } => {
                assert_eq!(entity, "track");
                assert_eq!(key, BAD_IDEA.to_string());
                assert!(matches!(source, StoreError::Unavailable(_)));
            }
            other => panic!("expected resolve error, got {other:?}"),
        }
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
        assert!(cache.is_empty());
    }

    /// Wraps a store and fails every spin write.
    struct FailingSpins {
        inner: Database,
        spin_attempts: AtomicUsize,
    }

    impl CatalogStore for FailingSpins {
        fn get_artist(&self, name: &str) -> StoreResult<Option<Artist>> {
            self.inner.get_artist(name)
        }
        fn create_artist(&self, name: &str) -> StoreResult<Artist> {
            self.inner.create_artist(name)
        }
        fn get_track(&self, id: u64) -> StoreResult<Option<Track>> {
            self.inner.get_track(id)
        }
        fn create_track(&self, id: u64, title: &str, artist_ids: &[u64]) -> StoreResult<Track> {
            self.inner.create_track(id, title, artist_ids)
        }
        fn get_project(&self, id: u64) -> StoreResult<Option<Project>> {
            self.inner.get_project(id)
        }
        fn create_project(
            &self,
            id: u64,
            title: &str,
            artist_ids: &[u64],
            form: ProjectForm,
            release: NaiveDate,
        ) -> StoreResult<Project> {
            self.inner.create_project(id, title, artist_ids, form, release)
        }
        fn update_track_association(&self, t: u64, p: u64, primary: bool) -> StoreResult<()> {
            self.inner.update_track_association(t, p, primary)
        }
        fn create_spin(&self, _: DateTime<Utc>, _: u64, _: u64) -> StoreResult<Spin> {
            self.spin_attempts.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("disk full".into()))
        }
    }

    #[test]
    fn test_spin_write_failure_is_reported() {
        let store = Arc::new(FailingSpins {
            inner: Database::open_in_memory().unwrap(),
            spin_attempts: AtomicUsize::new(0),
        });
        let cache = Arc::new(MemoryCache::new(Duration::from_secs(600), 1000));
        let ingestor = SpinIngestor::new(store.clone(), cache);

        let err = ingestor
            .ingest_spin(&request("bad idea right?", "GUTS", ProjectForm::Album, "2023-08-09"))
            .unwrap_err();
        match err {
            IngestError::Write { entity, .. } => assert_eq!(entity, "spin"),
            other => panic!("expected write error, got {other:?}"),
        }
        assert_eq!(store.spin_attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_first_spins_share_one_track() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let req = request("get him back!", "GUTS", ProjectForm::Album, "2023-08-09");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                let req = req.clone();
                thread::spawn(move || {
                    // Separate caches so every thread starts cold.
                    let cache = Arc::new(MemoryCache::new(Duration::from_secs(600), 100));
                    SpinIngestor::new(db, cache).ingest_spin(&req)
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap().unwrap();
        }

        let stats = db.stats().unwrap();
        assert_eq!(stats.tracks, 1);
        assert_eq!(stats.projects, 1);
        assert_eq!(stats.spins, 8);
        let track = db.find_track(derive_id("get him back!", &["Olivia Rodrigo"])).unwrap().unwrap();
        assert_eq!(track.primary_project_id, Some(GUTS));
    }

    #[test]
    fn test_request_from_json() {
        let json = r#"{
            "user_id": 1,
            "time": "2024-03-01T12:00:00Z",
            "track_title": "bad idea right?",
            "track_artist_names": ["Olivia Rodrigo"],
            "project_title": "GUTS",
            "project_artist_names": ["Olivia Rodrigo"],
            "project_form": "album",
            "project_release": "2023-08-09"
        }"#;
        let req: SpinRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.project_form, ProjectForm::Album);
        assert_eq!(req.project_release, date("2023-08-09"));

        let bad = json.replace("\"album\"", "\"mixtape\"");
        assert!(serde_json::from_str::<SpinRequest>(&bad).is_err());
    }
}
