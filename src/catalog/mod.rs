pub mod primacy;
pub mod resolver;
pub mod writer;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use resolver::Resolver;
pub use writer::CatalogWriter;

/// An artist. Ids are assigned by the store, not derived from the name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    pub id: u64,
    pub name: String,
}

/// Kind of release a project is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectForm {
    Album,
    Ep,
    Single,
    Compilation,
}

impl ProjectForm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Album => "album",
            Self::Ep => "ep",
            Self::Single => "single",
            Self::Compilation => "compilation",
        }
    }
}

impl fmt::Display for ProjectForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectForm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "album" => Ok(Self::Album),
            "ep" => Ok(Self::Ep),
            "single" => Ok(Self::Single),
            "compilation" => Ok(Self::Compilation),
            other => Err(format!(
                "unknown project form '{other}' (expected album, ep, single or compilation)"
            )),
        }
    }
}

/// A release: album, EP, single or compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub title: String,
    pub form: ProjectForm,
    pub release: NaiveDate,
}

/// A track and the projects it has been heard on.
///
/// `project_ids` only ever grows. `primary_project_id` is always a member of
/// `project_ids` when set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: u64,
    pub title: String,
    pub project_ids: BTreeSet<u64>,
    pub primary_project_id: Option<u64>,
}

/// One recorded play of a track by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spin {
    pub id: u64,
    pub user_id: u64,
    pub time: DateTime<Utc>,
    pub track_id: u64,
}

#[derive(Error, Debug)]
pub enum StoreError {
    /// A row with the same identity already exists.
    #[error("{entity} {key} already exists")]
    Conflict { entity: &'static str, key: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The store returned something that does not fit the catalog model.
    #[error("corrupt catalog data: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable catalog storage. Absence is `Ok(None)`, never an error.
///
/// Implementations must be safe to share between concurrent ingestions and
/// must reject a second create of an existing track or project id with
/// [`StoreError::Conflict`].
pub trait CatalogStore: Send + Sync {
    fn get_artist(&self, name: &str) -> StoreResult<Option<Artist>>;

    fn create_artist(&self, name: &str) -> StoreResult<Artist>;

    fn get_track(&self, id: u64) -> StoreResult<Option<Track>>;

    fn create_track(&self, id: u64, title: &str, artist_ids: &[u64]) -> StoreResult<Track>;

    fn get_project(&self, id: u64) -> StoreResult<Option<Project>>;

    fn create_project(
        &self,
        id: u64,
        title: &str,
        artist_ids: &[u64],
        form: ProjectForm,
        release: NaiveDate,
    ) -> StoreResult<Project>;

    /// Add `project_id` to the track's projects and, if `make_primary`,
    /// make it the track's primary project. Re-adding is a no-op.
    fn update_track_association(
        &self,
        track_id: u64,
        project_id: u64,
        make_primary: bool,
    ) -> StoreResult<()>;

    fn create_spin(&self, time: DateTime<Utc>, user_id: u64, track_id: u64) -> StoreResult<Spin>;
}
