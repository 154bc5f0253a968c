use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::model::{JobRecord, NaturalKey, StoredJob};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    init_schema(&conn)?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id           INTEGER PRIMARY KEY,
            title        TEXT NOT NULL,
            company      TEXT NOT NULL,
            location     TEXT NOT NULL,
            posted_at    TEXT NOT NULL,
            extracted_at TEXT NOT NULL,
            summary      TEXT NOT NULL,
            salary       TEXT NOT NULL,
            source_url   TEXT NOT NULL,
            created_at   TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(title, company, source_url)
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_title ON jobs(title);
        CREATE INDEX IF NOT EXISTS idx_jobs_location ON jobs(location);
        ",
    )?;
    Ok(())
}

// ── Dedup primitives ──

pub fn job_exists(conn: &Connection, key: NaturalKey<'_>) -> rusqlite::Result<bool> {
    conn.prepare_cached(
        "SELECT 1 FROM jobs WHERE title = ?1 AND company = ?2 AND source_url = ?3 LIMIT 1",
    )?
    .query_row(rusqlite::params![key.title, key.company, key.source_url], |_| Ok(()))
    .optional()
    .map(|found| found.is_some())
}

pub fn insert_job(conn: &Connection, job: &JobRecord) -> rusqlite::Result<i64> {
    conn.prepare_cached(
        "INSERT INTO jobs
         (title, company, location, posted_at, extracted_at, summary, salary, source_url)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?
    .execute(rusqlite::params![
        job.title,
        job.company,
        job.location,
        job.posted_at,
        job.extracted_at.format("%Y-%m-%d").to_string(),
        job.summary,
        job.salary,
        job.source_url,
    ])?;
    Ok(conn.last_insert_rowid())
}

// ── Retrieval ──

/// Case-insensitive substring filters; each is skipped when blank.
/// Serializes as the `filters` object of the JSON listing, blank terms as `null`.
#[derive(Debug, Default, Clone, Serialize)]
pub struct JobFilter {
    pub position: Option<String>,
    pub location: Option<String>,
    #[serde(skip)]
    pub limit: Option<usize>,
}

impl JobFilter {
    /// Terms are trimmed; blank ones become `None`.
    pub fn new(position: Option<String>, location: Option<String>, limit: Option<usize>) -> Self {
        Self {
            position: clean_term(position),
            location: clean_term(location),
            limit,
        }
    }
}

fn clean_term(term: Option<String>) -> Option<String> {
    term.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

/// Filtered listing in insertion order.
///
/// Matching uses SQLite `LIKE`, which folds case for ASCII letters only:
/// "engineer" finds "ENGINEER", but "émile" does not find "ÉMILE".
pub fn search_jobs(conn: &Connection, filter: &JobFilter) -> Result<Vec<StoredJob>> {
    let mut conditions = Vec::new();
    let mut params: Vec<String> = Vec::new();

    let terms = [("title", &filter.position), ("location", &filter.location)];
    for (column, term) in terms {
        if let Some(t) = term.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            params.push(like_pattern(t));
            conditions.push(format!("{} LIKE ?{} ESCAPE '\\'", column, params.len()));
        }
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };
    let limit_clause = match filter.limit {
        Some(n) => format!(" LIMIT {}", n),
        None => String::new(),
    };

    let sql = format!(
        "SELECT id, title, company, location, posted_at, extracted_at, summary, salary, source_url
         FROM jobs{}
         ORDER BY id{}",
        where_clause, limit_clause
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), stored_job)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn stored_job(row: &Row<'_>) -> rusqlite::Result<StoredJob> {
    let extracted: String = row.get(5)?;
    let extracted_at = chrono::NaiveDate::parse_from_str(&extracted, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(StoredJob {
        id: row.get(0)?,
        record: JobRecord {
            title: row.get(1)?,
            company: row.get(2)?,
            location: row.get(3)?,
            posted_at: row.get(4)?,
            extracted_at,
            summary: row.get(6)?,
            salary: row.get(7)?,
            source_url: row.get(8)?,
        },
    })
}

// ── Stats ──

pub struct Stats {
    pub jobs: usize,
    pub companies: usize,
    pub latest_extract: Option<String>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let jobs: usize = conn.query_row("SELECT COUNT(*) FROM jobs", [], |r| r.get(0))?;
    let companies: usize = conn.query_row(
        "SELECT COUNT(DISTINCT company) FROM jobs WHERE company != 'NOT MENTIONED'",
        [],
        |r| r.get(0),
    )?;
    let latest_extract: Option<String> =
        conn.query_row("SELECT MAX(extracted_at) FROM jobs", [], |r| r.get(0))?;
    Ok(Stats {
        jobs,
        companies,
        latest_extract,
    })
}
