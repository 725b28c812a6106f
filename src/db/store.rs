use super::{Database, DbError};
use crate::catalog::{
    Artist, CatalogStore, Project, ProjectForm, Spin, StoreError, StoreResult, Track,
};
use chrono::{DateTime, NaiveDate, Utc};

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Sqlite(rusqlite::Error::FromSqlConversionFailure(_, _, inner)) => {
                StoreError::Corrupt(inner.to_string())
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Map a failed insert, turning duplicate-key failures into `Conflict`.
fn insert_error(e: DbError, entity: &'static str, key: impl ToString) -> StoreError {
    if e.is_duplicate() {
        StoreError::Conflict {
            entity,
            key: key.to_string(),
        }
    } else {
        e.into()
    }
}

impl CatalogStore for Database {
    fn get_artist(&self, name: &str) -> StoreResult<Option<Artist>> {
        Ok(self.find_artist(name)?)
    }

    fn create_artist(&self, name: &str) -> StoreResult<Artist> {
        self.insert_artist(name)
            .map_err(|e| insert_error(e, "artist", name))
    }

    fn get_track(&self, id: u64) -> StoreResult<Option<Track>> {
        Ok(self.find_track(id)?)
    }

    fn create_track(&self, id: u64, title: &str, artist_ids: &[u64]) -> StoreResult<Track> {
        self.insert_track(id, title, artist_ids)
            .map_err(|e| insert_error(e, "track", id))
    }

    fn get_project(&self, id: u64) -> StoreResult<Option<Project>> {
        Ok(self.find_project(id)?)
    }

    fn create_project(
        &self,
        id: u64,
        title: &str,
        artist_ids: &[u64],
        form: ProjectForm,
        release: NaiveDate,
    ) -> StoreResult<Project> {
        self.insert_project(id, title, artist_ids, form, release)
            .map_err(|e| insert_error(e, "project", id))
    }

    fn update_track_association(
        &self,
        track_id: u64,
        project_id: u64,
        make_primary: bool,
    ) -> StoreResult<()> {
        Ok(self.associate_project(track_id, project_id, make_primary)?)
    }

    fn create_spin(&self, time: DateTime<Utc>, user_id: u64, track_id: u64) -> StoreResult<Spin> {
        Ok(self.insert_spin(time, user_id, track_id)?)
    }
}
