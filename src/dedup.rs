use rusqlite::Connection;
use tracing::{debug, info};

use crate::db;
use crate::error::StorageError;
use crate::model::JobRecord;

/// Insert every record whose natural key is not yet stored, as one transaction.
///
/// Returns the newly inserted records in input order. Known keys are skipped,
/// including repeats within `records`. On any failure the whole batch is rolled
/// back and nothing from it is persisted.
pub fn commit(conn: &Connection, records: &[JobRecord]) -> Result<Vec<JobRecord>, StorageError> {
    // Dropping an uncommitted transaction rolls it back.
    let tx = conn.unchecked_transaction()?;
    let mut novel = Vec::new();
    for record in records {
        if db::job_exists(&tx, record.natural_key())? {
            debug!("Already stored: {} @ {}", record.title, record.company);
            continue;
        }
        db::insert_job(&tx, record)?;
        novel.push(record.clone());
    }
    tx.commit()?;

    info!(
        "Committed {} new of {} scraped jobs",
        novel.len(),
        records.len()
    );
    Ok(novel)
}
