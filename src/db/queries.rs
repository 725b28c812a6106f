use super::models::{CatalogStats, SpinHistoryEntry};
use super::{from_db_id, to_db_id, Database, Result};
use crate::catalog::{Artist, Project, ProjectForm, Spin, Track};
use chrono::{DateTime, NaiveDate, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

const RELEASE_FORMAT: &str = "%Y-%m-%d";

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_release(idx: usize, raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, RELEASE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_form(idx: usize, raw: &str) -> rusqlite::Result<ProjectForm> {
    raw.parse::<ProjectForm>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

impl Database {
    /// Oldest artist row with exactly this name.
    pub fn find_artist(&self, name: &str) -> Result<Option<Artist>> {
        let conn = self.conn()?;
        let artist = conn
            .query_row(
                "SELECT id, name FROM artists WHERE name = ?1 ORDER BY id LIMIT 1",
                params![name],
                |row| {
                    Ok(Artist {
                        id: from_db_id(row.get(0)?),
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(artist)
    }

    pub fn insert_artist(&self, name: &str) -> Result<Artist> {
        let conn = self.conn()?;
        conn.execute("INSERT INTO artists (name) VALUES (?1)", params![name])?;
        Ok(Artist {
            id: from_db_id(conn.last_insert_rowid()),
            name: name.to_string(),
        })
    }

    pub fn find_track(&self, id: u64) -> Result<Option<Track>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT title, primary_project_id FROM tracks WHERE id = ?1",
                params![to_db_id(id)],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<i64>>(1)?)),
            )
            .optional()?;

        let Some((title, primary)) = row else {
            return Ok(None);
        };

        let mut stmt = conn.prepare_cached(
            "SELECT project_id FROM project_tracks WHERE track_id = ?1",
        )?;
        let project_ids = stmt
            .query_map(params![to_db_id(id)], |row| row.get::<_, i64>(0))?
            .map(|r| r.map(from_db_id))
            .collect::<std::result::Result<_, _>>()?;

        Ok(Some(Track {
            id,
            title,
            project_ids,
            primary_project_id: primary.map(from_db_id),
        }))
    }

    /// Insert a track and its artist credits in one transaction.
    pub fn insert_track(&self, id: u64, title: &str, artist_ids: &[u64]) -> Result<Track> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO tracks (id, title) VALUES (?1, ?2)",
            params![to_db_id(id), title],
        )?;
        insert_credits(&tx, "artist_tracks", "track_id", id, artist_ids)?;

        tx.commit()?;
        Ok(Track {
            id,
            title: title.to_string(),
            project_ids: Default::default(),
            primary_project_id: None,
        })
    }

    pub fn find_project(&self, id: u64) -> Result<Option<Project>> {
        let conn = self.conn()?;
        let project = conn
            .query_row(
                "SELECT title, form, release FROM projects WHERE id = ?1",
                params![to_db_id(id)],
                |row| {
                    Ok(Project {
                        id,
                        title: row.get(0)?,
                        form: parse_form(1, &row.get::<_, String>(1)?)?,
                        release: parse_release(2, &row.get::<_, String>(2)?)?,
                    })
                },
            )
            .optional()?;
        Ok(project)
    }

    /// Insert a project and its artist credits in one transaction.
    pub fn insert_project(
        &self,
        id: u64,
        title: &str,
        artist_ids: &[u64],
        form: ProjectForm,
        release: NaiveDate,
    ) -> Result<Project> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO projects (id, title, form, release) VALUES (?1, ?2, ?3, ?4)",
            params![
                to_db_id(id),
                title,
                form.as_str(),
                release.format(RELEASE_FORMAT).to_string()
            ],
        )?;
        insert_credits(&tx, "artist_projects", "project_id", id, artist_ids)?;

        tx.commit()?;
        Ok(Project {
            id,
            title: title.to_string(),
            form,
            release,
        })
    }

    /// Link a project to a track, optionally making it the primary project.
    /// Both writes land together so the primary is always a linked project.
    pub fn associate_project(&self, track_id: u64, project_id: u64, make_primary: bool) -> Result<()> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            "INSERT OR IGNORE INTO project_tracks (project_id, track_id) VALUES (?1, ?2)",
            params![to_db_id(project_id), to_db_id(track_id)],
        )?;
        if make_primary {
            tx.execute(
                "UPDATE tracks SET primary_project_id = ?2 WHERE id = ?1",
                params![to_db_id(track_id), to_db_id(project_id)],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Times are kept at microsecond precision; the returned spin carries
    /// the stored value.
    pub fn insert_spin(&self, time: DateTime<Utc>, user_id: u64, track_id: u64) -> Result<Spin> {
        let time = time.trunc_subsecs(6);
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO spins (user_id, time, track_id) VALUES (?1, ?2, ?3)",
            params![to_db_id(user_id), format_time(&time), to_db_id(track_id)],
        )?;
        Ok(Spin {
            id: from_db_id(conn.last_insert_rowid()),
            user_id,
            time,
            track_id,
        })
    }

    /// Most recent spins of a user, newest first.
    pub fn recent_spins(&self, user_id: u64, limit: usize) -> Result<Vec<SpinHistoryEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT s.id, s.time, t.title, p.title,
                    (SELECT group_concat(a.name, char(31))
                       FROM artist_tracks atr
                       JOIN artists a ON a.id = atr.artist_id
                      WHERE atr.track_id = t.id)
             FROM spins s
             JOIN tracks t ON t.id = s.track_id
             LEFT JOIN projects p ON p.id = t.primary_project_id
             WHERE s.user_id = ?1
             ORDER BY s.time DESC, s.id DESC
             LIMIT ?2",
        )?;

        let entries = stmt
            .query_map(params![to_db_id(user_id), limit as i64], |row| {
                let artists: Option<String> = row.get(4)?;
                Ok(SpinHistoryEntry {
                    spin_id: from_db_id(row.get(0)?),
                    time: parse_time(1, &row.get::<_, String>(1)?)?,
                    track_title: row.get(2)?,
                    primary_project: row.get(3)?,
                    artists: artists
                        .map(|a| a.split('\u{1f}').map(str::to_string).collect())
                        .unwrap_or_default(),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    pub fn stats(&self) -> Result<CatalogStats> {
        let conn = self.conn()?;
        let count = |sql: &str| -> Result<u64> {
            let n: i64 = conn.query_row(sql, [], |r| r.get(0))?;
            Ok(n as u64)
        };

        Ok(CatalogStats {
            artists: count("SELECT COUNT(*) FROM artists")?,
            tracks: count("SELECT COUNT(*) FROM tracks")?,
            projects: count("SELECT COUNT(*) FROM projects")?,
            spins: count("SELECT COUNT(*) FROM spins")?,
            users: count("SELECT COUNT(DISTINCT user_id) FROM spins")?,
        })
    }
}

/// Credit rows are idempotent: the same artist listed twice is one credit.
fn insert_credits(
    conn: &Connection,
    table: &str,
    column: &str,
    entity_id: u64,
    artist_ids: &[u64],
) -> Result<()> {
    if artist_ids.is_empty() {
        return Ok(());
    }
    let sql = format!("INSERT OR IGNORE INTO {table} (artist_id, {column}) VALUES (?1, ?2)");
    let mut stmt = conn.prepare_cached(&sql)?;
    for artist_id in artist_ids {
        stmt.execute(params![to_db_id(*artist_id), to_db_id(entity_id)])?;
    }
    Ok(())
}
