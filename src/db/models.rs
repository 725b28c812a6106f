use chrono::{DateTime, Utc};

/// Row counts for the `stats` command.
#[derive(Debug, Default)]
pub struct CatalogStats {
    pub artists: u64,
    pub tracks: u64,
    pub projects: u64,
    pub spins: u64,
    pub users: u64,
}

/// A spin joined with what was played.
#[derive(Debug, Clone)]
pub struct SpinHistoryEntry {
    pub spin_id: u64,
    pub time: DateTime<Utc>,
    pub track_title: String,
    pub artists: Vec<String>,
    pub primary_project: Option<String>,
}
