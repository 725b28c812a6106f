//! Cache-aside reads of catalog entities.
//!
//! The cache is consulted first and a hit never touches the store. On a miss
//! the store is queried and a found entity is written back to the cache.
//! Absence is never cached, so every miss goes back to the store. Cache
//! failures only cost a store round trip.

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{Artist, CatalogStore, Project, StoreResult, Track};
use crate::cache::EntityCache;

pub fn artist_key(name: &str) -> String {
    format!("a-{name}")
}

pub fn track_key(id: u64) -> String {
    format!("t-{id}")
}

pub fn project_key(id: u64) -> String {
    format!("p-{id}")
}

pub struct Resolver<'a> {
    store: &'a dyn CatalogStore,
    cache: &'a dyn EntityCache,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a dyn CatalogStore, cache: &'a dyn EntityCache) -> Self {
        Self { store, cache }
    }

    pub fn artist(&self, name: &str) -> StoreResult<Option<Artist>> {
        self.cache_aside(artist_key(name), || self.store.get_artist(name))
    }

    pub fn track(&self, id: u64) -> StoreResult<Option<Track>> {
        self.cache_aside(track_key(id), || self.store.get_track(id))
    }

    pub fn project(&self, id: u64) -> StoreResult<Option<Project>> {
        self.cache_aside(project_key(id), || self.store.get_project(id))
    }

    fn cache_aside<T, F>(&self, key: String, fetch: F) -> StoreResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> StoreResult<Option<T>>,
    {
        match self.cache.get(&key) {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(entity) => {
                    log::debug!("Cache hit: {}", key);
                    return Ok(Some(entity));
                }
                Err(e) => log::warn!("Ignoring undecodable cache entry {}: {}", key, e),
            },
            Ok(None) => log::debug!("Cache miss: {}", key),
            Err(e) => log::warn!("Cache lookup for {} failed, using store: {}", key, e),
        }

        let found = fetch()?;

        if let Some(entity) = &found {
            self.remember(&key, entity);
        }

        Ok(found)
    }

    /// Replace the cached snapshot of a track this process just modified.
    pub fn refresh_track(&self, track: &Track) {
        self.remember(&track_key(track.id), track);
    }

    fn remember<T: Serialize>(&self, key: &str, entity: &T) {
        match serde_json::to_string(entity) {
            Ok(json) => {
                if let Err(e) = self.cache.put(key, &json) {
                    log::warn!("Failed to cache {}: {}", key, e);
                }
            }
            Err(e) => log::warn!("Failed to serialize {} for cache: {}", key, e),
        }
    }
}
