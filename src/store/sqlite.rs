//! SQLite-backed `LeadStore`.
//!
//! The connection lives behind a mutex and every call runs on the blocking
//! pool. `leads.email` is `UNIQUE`, so concurrent runs writing the same
//! address end up with a single row.

use super::{ledger_records, sort_counts, LeadStore, StoreResult};
use crate::core::error::StoreError;
use crate::core::models::{
    AcceptedLead, ListStats, SuppressionSource, SuppressionStats, VerificationRecord,
    VerificationStatus,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS leads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL DEFAULT '',
    gender TEXT NOT NULL,
    company TEXT NOT NULL DEFAULT '',
    source TEXT NOT NULL DEFAULT '',
    source_detail TEXT NOT NULL DEFAULT '',
    job_title TEXT NOT NULL DEFAULT '',
    industry TEXT NOT NULL DEFAULT '',
    location TEXT NOT NULL DEFAULT '',
    company_domain TEXT NOT NULL DEFAULT '',
    profile_url TEXT NOT NULL DEFAULT '',
    list_tag TEXT NOT NULL,
    verified_status TEXT NOT NULL,
    verified_at TEXT,
    pushed_downstream INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_leads_list_tag ON leads(list_tag);

CREATE TABLE IF NOT EXISTS suppression (
    email TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    added_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS verifications (
    email TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    verified_at TEXT NOT NULL
);
"#;

// Well under SQLite's bound-parameter limit.
const LOOKUP_CHUNK: usize = 500;

#[derive(Clone)]
pub struct SqliteLeadStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteLeadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteLeadStore").finish_non_exhaustive()
    }
}

impl SqliteLeadStore {
    /// Opens (creating if needed) the database file and applies the schema.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        tracing::debug!(target: "store", "Opening SQLite store at {}", path.display());
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

/// Runs `sql` (which must contain one `{}` for the placeholder list) once per
/// chunk of `emails` and collects the first column.
fn select_in(conn: &Connection, sql: &str, emails: &[String]) -> StoreResult<HashSet<String>> {
    let mut found = HashSet::new();
    for chunk in emails.chunks(LOOKUP_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(",");
        let mut stmt = conn.prepare(&sql.replace("{}", &placeholders))?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| row.get::<_, String>(0))?;
        for row in rows {
            found.insert(row?);
        }
    }
    Ok(found)
}

fn upsert_verifications(conn: &Connection, records: &[VerificationRecord]) -> StoreResult<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO verifications (email, status, verified_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(email) DO UPDATE SET status = excluded.status, verified_at = excluded.verified_at",
    )?;
    for record in records {
        stmt.execute(params![record.email, record.status.as_str(), record.verified_at])?;
    }
    Ok(())
}

#[async_trait]
impl LeadStore for SqliteLeadStore {
    async fn existing_emails(&self, emails: &[String]) -> StoreResult<HashSet<String>> {
        let emails = emails.to_vec();
        self.with_conn(move |conn| {
            select_in(conn, "SELECT email FROM leads WHERE email IN ({})", &emails)
        })
        .await
    }

    async fn suppressed_emails(&self, emails: &[String]) -> StoreResult<HashSet<String>> {
        let emails = emails.to_vec();
        self.with_conn(move |conn| {
            select_in(conn, "SELECT email FROM suppression WHERE email IN ({})", &emails)
        })
        .await
    }

    async fn cached_statuses(
        &self,
        emails: &[String],
    ) -> StoreResult<HashMap<String, VerificationRecord>> {
        let emails = emails.to_vec();
        self.with_conn(move |conn| {
            let mut cached = HashMap::new();
            for chunk in emails.chunks(LOOKUP_CHUNK) {
                let sql = format!(
                    "SELECT email, status, verified_at FROM verifications WHERE email IN ({})",
                    vec!["?"; chunk.len()].join(",")
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, DateTime<Utc>>(2)?,
                    ))
                })?;
                for row in rows {
                    let (email, status, verified_at) = row?;
                    let status: VerificationStatus =
                        status.parse().map_err(StoreError::Decode)?;
                    cached.insert(
                        email.clone(),
                        VerificationRecord {
                            email,
                            status,
                            verified_at,
                        },
                    );
                }
            }
            Ok(cached)
        })
        .await
    }

    async fn record_verifications(&self, records: &[VerificationRecord]) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let records = records.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            upsert_verifications(&tx, &records)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn insert_leads(&self, leads: &[AcceptedLead]) -> StoreResult<usize> {
        if leads.is_empty() {
            return Ok(0);
        }
        let leads = leads.to_vec();
        self.with_conn(move |conn| {
            let now = Utc::now();
            let tx = conn.transaction()?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR IGNORE INTO leads (
                        email, first_name, last_name, gender, company, source, source_detail,
                        job_title, industry, location, company_domain, profile_url, list_tag,
                        verified_status, verified_at, pushed_downstream, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                )?;
                for lead in &leads {
                    inserted += stmt.execute(params![
                        lead.email,
                        lead.first_name,
                        lead.last_name,
                        lead.gender.as_str(),
                        lead.company,
                        lead.source,
                        lead.source_detail,
                        lead.job_title,
                        lead.industry,
                        lead.location,
                        lead.company_domain,
                        lead.profile_url,
                        lead.list_tag,
                        lead.verified_status.as_str(),
                        lead.verified_at,
                        lead.pushed_downstream,
                        now,
                    ])?;
                }
            }
            upsert_verifications(&tx, &ledger_records(&leads))?;
            tx.commit()?;
            Ok(inserted)
        })
        .await
    }

    async fn add_suppressions(
        &self,
        emails: &[String],
        source: SuppressionSource,
    ) -> StoreResult<usize> {
        if emails.is_empty() {
            return Ok(0);
        }
        let emails = emails.to_vec();
        self.with_conn(move |conn| {
            let now = Utc::now();
            let tx = conn.transaction()?;
            let mut added = 0;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR IGNORE INTO suppression (email, source, added_at) VALUES (?1, ?2, ?3)",
                )?;
                for email in &emails {
                    added += stmt.execute(params![email, source.as_str(), now])?;
                }
            }
            tx.commit()?;
            Ok(added)
        })
        .await
    }

    async fn all_lead_emails(&self) -> StoreResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT email FROM leads ORDER BY email")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn suppression_stats(&self) -> StoreResult<SuppressionStats> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT source, COUNT(*) FROM suppression GROUP BY source")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?;
            let mut by_source = rows.collect::<Result<Vec<_>, _>>()?;
            sort_counts(&mut by_source);
            Ok(SuppressionStats {
                total: by_source.iter().map(|(_, n)| n).sum(),
                by_source,
            })
        })
        .await
    }

    async fn clear_suppressions(&self) -> StoreResult<u64> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM suppression", [])? as u64))
            .await
    }

    async fn list_stats(&self) -> StoreResult<Vec<ListStats>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT list_tag, COUNT(*) FROM leads GROUP BY list_tag")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?;
            let mut counts = rows.collect::<Result<Vec<_>, _>>()?;
            sort_counts(&mut counts);
            Ok(counts
                .into_iter()
                .map(|(list_tag, total)| ListStats { list_tag, total })
                .collect())
        })
        .await
    }

    async fn lead_count(&self) -> StoreResult<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM leads", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }
}
