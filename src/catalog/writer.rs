//! Catalog creation and track/project association.
//!
//! Creates do no existence check of their own; callers resolve first. When
//! two ingestions race to create the same track or project, the loser gets a
//! `Conflict` from the store, re-reads the winner's row and carries on.

use chrono::NaiveDate;

use super::{Artist, CatalogStore, Project, ProjectForm, Resolver, StoreError, StoreResult, Track};

pub struct CatalogWriter<'a> {
    store: &'a dyn CatalogStore,
    resolver: &'a Resolver<'a>,
}

impl<'a> CatalogWriter<'a> {
    pub fn new(store: &'a dyn CatalogStore, resolver: &'a Resolver<'a>) -> Self {
        Self { store, resolver }
    }

    pub fn create_artist(&self, name: &str) -> StoreResult<Artist> {
        match self.store.create_artist(name) {
            Ok(artist) => {
                log::info!("Created artist {} ({})", artist.name, artist.id);
                Ok(artist)
            }
            Err(conflict @ StoreError::Conflict { .. }) => {
                recover(conflict, || self.resolver.artist(name))
            }
            Err(e) => Err(e),
        }
    }

    pub fn create_track(&self, id: u64, title: &str, artist_ids: &[u64]) -> StoreResult<Track> {
        match self.store.create_track(id, title, artist_ids) {
            Ok(track) => {
                log::info!("Created track \"{}\" ({})", track.title, track.id);
                Ok(track)
            }
            Err(conflict @ StoreError::Conflict { .. }) => {
                recover(conflict, || self.resolver.track(id))
            }
            Err(e) => Err(e),
        }
    }

    pub fn create_project(
        &self,
        id: u64,
        title: &str,
        artist_ids: &[u64],
        form: ProjectForm,
        release: NaiveDate,
    ) -> StoreResult<Project> {
        match self.store.create_project(id, title, artist_ids, form, release) {
            Ok(project) => {
                log::info!("Created {} \"{}\" ({})", project.form, project.title, project.id);
                Ok(project)
            }
            Err(conflict @ StoreError::Conflict { .. }) => {
                recover(conflict, || self.resolver.project(id))
            }
            Err(e) => Err(e),
        }
    }

    /// Link `project_id` to `track`, optionally as its primary, and return
    /// the track as it now stands. The cached snapshot is replaced so later
    /// primacy decisions see the new association.
    pub fn update_track_association(
        &self,
        track: &Track,
        project_id: u64,
        make_primary: bool,
    ) -> StoreResult<Track> {
        self.store
            .update_track_association(track.id, project_id, make_primary)?;
        log::debug!(
            "Linked project {} to track {}{}",
            project_id,
            track.id,
            if make_primary { " as primary" } else { "" }
        );

        let mut updated = track.clone();
        updated.project_ids.insert(project_id);
        if make_primary {
            updated.primary_project_id = Some(project_id);
        }
        self.resolver.refresh_track(&updated);
        Ok(updated)
    }
}

/// The row exists now: return it. If it still can't be read, report the
/// original conflict.
fn recover<T>(
    conflict: StoreError,
    reread: impl FnOnce() -> StoreResult<Option<T>>,
) -> StoreResult<T> {
    log::warn!("{}; re-reading concurrent insert", conflict);
    reread()?.ok_or(conflict)
}
