use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::{Result, ScoutError};
use crate::models::{
    AgentRecord, ApiBinding, NewSchedule, OutreachRecord, OutreachStatus, Performance, Recruiter,
    RecruiterMatch, Resume, SchedulePatch, ScheduleSpec, SearchScheduleEntry,
};

pub struct Database {
    conn: Mutex<Connection>,
    path: PathBuf,
}

/// Filter for schedule queries. Empty filter matches every entry.
#[derive(Debug, Clone, Default)]
pub struct ScheduleFilter {
    pub user_id: Option<i64>,
    pub agent_name: Option<String>,
    pub ids: Option<Vec<i64>>,
}

impl ScheduleFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_user(user_id: i64) -> Self {
        Self {
            user_id: Some(user_id),
            ..Default::default()
        }
    }

    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut sql = String::from(" WHERE 1=1");
        let mut values: Vec<Value> = vec![];

        if let Some(user_id) = self.user_id {
            values.push(Value::Integer(user_id));
            sql.push_str(&format!(" AND user_id = ?{}", values.len()));
        }

        if let Some(agent) = &self.agent_name {
            values.push(Value::Text(agent.clone()));
            sql.push_str(&format!(" AND agent_name = ?{}", values.len()));
        }

        if let Some(ids) = &self.ids {
            if ids.is_empty() {
                sql.push_str(" AND 0");
            } else {
                let mut placeholders = Vec::with_capacity(ids.len());
                for id in ids {
                    values.push(Value::Integer(*id));
                    placeholders.push(format!("?{}", values.len()));
                }
                sql.push_str(&format!(" AND id IN ({})", placeholders.join(", ")));
            }
        }

        (sql, values)
    }
}

const SCHEDULE_COLUMNS: &str = "id, user_id, resume_id, agent_name, search_type, search_approach,
    quality_level, criteria, frequency, next_run_at, jobs_found, last_run_at, last_error, created_at";

const RECRUITER_COLUMNS: &str = "r.id, r.first_name, r.last_name, r.email, r.phone, r.linkedin_url,
    r.title, r.company, r.industry, r.location, r.rating, r.last_active_at, r.is_active";

// Literal substring match over the trimmed full name or the title.
// ?1 is the query already folded with `str::to_lowercase`.
const RECRUITER_MATCH: &str = "r.is_active = 1 AND (
    instr(scout_fold(TRIM(COALESCE(r.first_name, '') || ' ' || COALESCE(r.last_name, ''))), ?1) > 0
    OR instr(scout_fold(COALESCE(r.title, '')), ?1) > 0)";

/// Per-connection setup: wait on other writers instead of failing, and
/// register `scout_fold`, a Unicode lowercase matching `str::to_lowercase`.
fn prepare_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.create_scalar_function(
        "scout_fold",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text.map(|t| t.to_lowercase()))
        },
    )
}

impl Database {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        prepare_connection(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        prepare_connection(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub async fn init(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS agents (
                name TEXT PRIMARY KEY,
                agent_type TEXT NOT NULL,
                config TEXT NOT NULL DEFAULT '{}',
                api_binding TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_run_at TEXT,
                performance TEXT NOT NULL DEFAULT '{}',
                version TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS resumes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS search_schedules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                resume_id INTEGER REFERENCES resumes(id),
                agent_name TEXT NOT NULL,
                search_type TEXT NOT NULL,
                search_approach TEXT,
                quality_level TEXT,
                criteria TEXT NOT NULL DEFAULT '{}',
                frequency TEXT NOT NULL,
                next_run_at TEXT,
                jobs_found TEXT NOT NULL DEFAULT '[]',
                last_run_at TEXT,
                last_error TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS recruiters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                first_name TEXT,
                last_name TEXT,
                email TEXT,
                phone TEXT,
                linkedin_url TEXT,
                title TEXT,
                company TEXT,
                industry TEXT,
                location TEXT,
                rating REAL,
                last_active_at TEXT,
                is_active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS outreach (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                recruiter_id INTEGER NOT NULL REFERENCES recruiters(id),
                status TEXT NOT NULL DEFAULT 'not_contacted'
                    CHECK (status IN ('not_contacted', 'contacted', 'responded', 'declined')),
                last_contact_date TEXT,
                notes TEXT,
                UNIQUE (user_id, recruiter_id)
            );

            CREATE INDEX IF NOT EXISTS idx_schedules_user ON search_schedules(user_id);
            CREATE INDEX IF NOT EXISTS idx_schedules_agent ON search_schedules(agent_name);
            CREATE INDEX IF NOT EXISTS idx_recruiters_first_name ON recruiters(first_name);
            CREATE INDEX IF NOT EXISTS idx_outreach_user ON outreach(user_id);
            "#,
        )?;
        Ok(())
    }

    pub async fn ensure_initialized(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        let tables: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='search_schedules'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            anyhow::bail!("Database not initialized. Run 'scout init' first.");
        }
        Ok(())
    }

    // --- Agent operations ---

    /// Store a newly registered agent. Returns false if the name is taken.
    pub async fn insert_agent(&self, record: &AgentRecord) -> Result<bool> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "INSERT INTO agents (name, agent_type, config, api_binding, is_active, last_run_at, performance, version, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, datetime('now'))
             ON CONFLICT(name) DO NOTHING",
            params![
                record.name,
                record.agent_type.as_str(),
                serde_json::to_string(&record.config)?,
                serde_json::to_string(&record.api_binding)?,
                record.is_active,
                record.last_run_at,
                serde_json::to_string(&record.performance)?,
                record.version,
            ],
        )?;
        Ok(rows > 0)
    }

    pub async fn agent_names(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT name FROM agents ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    /// Read one agent. A row whose type or JSON columns cannot be read is an error
    /// for that agent only.
    pub async fn load_agent(&self, name: &str) -> Result<Option<AgentRecord>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT name, agent_type, config, api_binding, is_active, last_run_at, performance, version
                 FROM agents WHERE name = ?1",
                [name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        json_column::<serde_json::Map<String, serde_json::Value>>(row, 2)?,
                        json_column::<ApiBinding>(row, 3)?,
                        row.get::<_, bool>(4)?,
                        row.get::<_, Option<DateTime<Utc>>>(5)?,
                        json_column::<Performance>(row, 6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((name, agent_type, config, api_binding, is_active, last_run_at, performance, version)) =
            row
        else {
            return Ok(None);
        };
        Ok(Some(AgentRecord {
            name,
            agent_type: agent_type.parse()?,
            config,
            api_binding,
            is_active,
            last_run_at,
            performance,
            version,
        }))
    }

    /// Fold one invocation outcome into the stored stats and return the result.
    ///
    /// Read and write share one immediate transaction, so outcomes recorded by
    /// other processes are never overwritten.
    pub async fn record_agent_outcome(
        &self,
        name: &str,
        elapsed_ms: u64,
        succeeded: bool,
    ) -> Result<Performance> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut performance = tx
            .query_row("SELECT performance FROM agents WHERE name = ?1", [name], |row| {
                json_column::<Performance>(row, 0)
            })
            .optional()?
            .ok_or_else(|| ScoutError::not_found("agent", name))?;

        performance.record(elapsed_ms, succeeded);
        tx.execute(
            "UPDATE agents SET performance = ?1, updated_at = datetime('now') WHERE name = ?2",
            params![serde_json::to_string(&performance)?, name],
        )?;
        tx.commit()?;
        Ok(performance)
    }

    pub async fn mark_agent_run(&self, name: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE agents SET last_run_at = ?1, updated_at = datetime('now') WHERE name = ?2",
            params![at, name],
        )?;
        if rows == 0 {
            return Err(ScoutError::not_found("agent", name));
        }
        Ok(())
    }

    pub async fn set_agent_active(&self, name: &str, active: bool) -> Result<()> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE agents SET is_active = ?1, updated_at = datetime('now') WHERE name = ?2",
            params![active, name],
        )?;
        if rows == 0 {
            return Err(ScoutError::not_found("agent", name));
        }
        Ok(())
    }

    pub async fn delete_agent(&self, name: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let rows = conn.execute("DELETE FROM agents WHERE name = ?1", [name])?;
        Ok(rows > 0)
    }

    // --- Resume operations ---

    pub async fn create_resume(&self, user_id: i64, name: &str, content: &str) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO resumes (user_id, name, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, name, content, Utc::now()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn get_resume(&self, id: i64) -> Result<Option<Resume>> {
        let conn = self.conn.lock().await;
        let resume = conn
            .query_row(
                "SELECT id, user_id, name, content, created_at FROM resumes WHERE id = ?1",
                [id],
                |row| {
                    Ok(Resume {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        name: row.get(2)?,
                        content: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(resume)
    }

    // --- Schedule operations ---

    pub async fn insert_schedule(&self, new: &NewSchedule) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO search_schedules (user_id, resume_id, agent_name, search_type, search_approach,
                quality_level, criteria, frequency, next_run_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                new.user_id,
                new.resume_id,
                new.agent_name,
                new.search_type,
                new.search_approach,
                new.quality_level,
                serde_json::to_string(&new.criteria)?,
                new.schedule.frequency,
                new.schedule.next_run_at,
                Utc::now(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn find_schedules(&self, filter: &ScheduleFilter) -> Result<Vec<SearchScheduleEntry>> {
        let conn = self.conn.lock().await;
        let (clause, values) = filter.where_clause();
        let sql = format!(
            "SELECT {} FROM search_schedules{} ORDER BY id",
            SCHEDULE_COLUMNS, clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), Self::row_to_schedule)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub async fn get_schedule(&self, id: i64) -> Result<Option<SearchScheduleEntry>> {
        let filter = ScheduleFilter {
            ids: Some(vec![id]),
            ..Default::default()
        };
        Ok(self.find_schedules(&filter).await?.into_iter().next())
    }

    pub async fn count_schedules(&self, filter: &ScheduleFilter) -> Result<i64> {
        let conn = self.conn.lock().await;
        let (clause, values) = filter.where_clause();
        let sql = format!("SELECT COUNT(*) FROM search_schedules{}", clause);
        let count = conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?;
        Ok(count)
    }

    /// Delete the given entries in one transaction, re-checking each row
    /// against `still_matches` right before removing it. Rows that changed
    /// since the caller read them and no longer match are left alone.
    pub async fn delete_schedules_where<F>(&self, ids: &[i64], still_matches: F) -> Result<usize>
    where
        F: Fn(&SearchScheduleEntry) -> bool,
    {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut deleted = 0;
        {
            let select = format!("SELECT {} FROM search_schedules WHERE id = ?1", SCHEDULE_COLUMNS);
            let mut stmt = tx.prepare(&select)?;
            for id in ids {
                let current = stmt.query_row([id], Self::row_to_schedule).optional()?;
                match current {
                    Some(entry) if still_matches(&entry) => {
                        deleted += tx.execute("DELETE FROM search_schedules WHERE id = ?1", [id])?;
                    }
                    _ => {}
                }
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    pub async fn delete_schedule(&self, id: i64, user_id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "DELETE FROM search_schedules WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        if rows == 0 {
            return Err(ScoutError::not_found("schedule", id));
        }
        Ok(())
    }

    /// Apply `patch` to one entry. New jobs are appended, skipping any whose
    /// dedup key is already in the history. Returns how many were appended.
    pub async fn update_schedule(&self, id: i64, patch: &SchedulePatch) -> Result<usize> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let select = format!("SELECT {} FROM search_schedules WHERE id = ?1", SCHEDULE_COLUMNS);
        let mut entry = tx
            .query_row(&select, [id], Self::row_to_schedule)
            .optional()?
            .ok_or_else(|| ScoutError::not_found("schedule", id))?;

        let mut seen: HashSet<String> = entry.jobs_found.iter().map(|j| j.dedup_key()).collect();
        let mut appended = 0;
        for job in &patch.append_jobs {
            if seen.insert(job.dedup_key()) {
                entry.jobs_found.push(job.clone());
                appended += 1;
            }
        }

        if let Some(at) = patch.last_run_at {
            entry.last_run_at = Some(at);
        }
        if let Some(next) = patch.next_run_at {
            entry.schedule.next_run_at = Some(next);
        }
        if let Some(error) = &patch.last_error {
            entry.last_error = error.clone();
        }

        tx.execute(
            "UPDATE search_schedules
             SET jobs_found = ?1, last_run_at = ?2, next_run_at = ?3, last_error = ?4
             WHERE id = ?5",
            params![
                serde_json::to_string(&entry.jobs_found)?,
                entry.last_run_at,
                entry.schedule.next_run_at,
                entry.last_error,
                id,
            ],
        )?;
        tx.commit()?;
        Ok(appended)
    }

    fn row_to_schedule(row: &Row) -> rusqlite::Result<SearchScheduleEntry> {
        Ok(SearchScheduleEntry {
            id: row.get(0)?,
            user_id: row.get(1)?,
            resume_id: row.get(2)?,
            agent_name: row.get(3)?,
            search_type: row.get(4)?,
            search_approach: row.get(5)?,
            quality_level: row.get(6)?,
            criteria: json_column(row, 7)?,
            schedule: ScheduleSpec {
                frequency: row.get(8)?,
                next_run_at: row.get(9)?,
            },
            jobs_found: json_column(row, 10)?,
            last_run_at: row.get(11)?,
            last_error: row.get(12)?,
            created_at: row.get(13)?,
        })
    }

    // --- Recruiter operations ---

    pub async fn insert_recruiter(&self, recruiter: &Recruiter) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO recruiters (first_name, last_name, email, phone, linkedin_url, title,
                company, industry, location, rating, last_active_at, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                recruiter.first_name,
                recruiter.last_name,
                recruiter.email,
                recruiter.phone,
                recruiter.linkedin_url,
                recruiter.title,
                recruiter.company,
                recruiter.industry,
                recruiter.location,
                recruiter.rating,
                recruiter.last_active_at,
                recruiter.is_active,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn recruiter_exists(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().await;
        let found: Option<i64> = conn
            .query_row("SELECT id FROM recruiters WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// One page of matching recruiters, joined with the user's outreach record.
    pub async fn search_recruiters(
        &self,
        needle: &str,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RecruiterMatch>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {}, o.status, o.last_contact_date, o.notes
             FROM recruiters r
             LEFT JOIN outreach o ON o.recruiter_id = r.id AND o.user_id = ?2
             WHERE {}
             ORDER BY COALESCE(r.first_name, '') COLLATE NOCASE ASC, r.id ASC
             LIMIT ?3 OFFSET ?4",
            RECRUITER_COLUMNS, RECRUITER_MATCH
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![needle, user_id, limit, offset], |row| {
            let recruiter = Self::row_to_recruiter(row)?;
            let status: Option<String> = row.get(13)?;
            let outreach = match status {
                Some(status) => Some(OutreachRecord {
                    user_id,
                    recruiter_id: recruiter.id,
                    status: status.parse::<OutreachStatus>().map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(13, Type::Text, Box::new(e))
                    })?,
                    last_contact_date: row.get(14)?,
                    notes: row.get(15)?,
                }),
                None => None,
            };
            Ok(RecruiterMatch {
                recruiter,
                outreach,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Count over the same predicate as `search_recruiters`, without the join.
    pub async fn count_recruiters(&self, needle: &str) -> Result<i64> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT COUNT(*) FROM recruiters r WHERE {}", RECRUITER_MATCH);
        let count = conn.query_row(&sql, [needle], |row| row.get(0))?;
        Ok(count)
    }

    fn row_to_recruiter(row: &Row) -> rusqlite::Result<Recruiter> {
        Ok(Recruiter {
            id: row.get(0)?,
            first_name: row.get(1)?,
            last_name: row.get(2)?,
            email: row.get(3)?,
            phone: row.get(4)?,
            linkedin_url: row.get(5)?,
            title: row.get(6)?,
            company: row.get(7)?,
            industry: row.get(8)?,
            location: row.get(9)?,
            rating: row.get(10)?,
            last_active_at: row.get(11)?,
            is_active: row.get(12)?,
        })
    }

    // --- Outreach operations ---

    pub async fn upsert_outreach(
        &self,
        user_id: i64,
        recruiter_id: i64,
        status: OutreachStatus,
        contacted_at: Option<DateTime<Utc>>,
        notes: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO outreach (user_id, recruiter_id, status, last_contact_date, notes)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, recruiter_id) DO UPDATE SET
                status = excluded.status,
                last_contact_date = COALESCE(excluded.last_contact_date, outreach.last_contact_date),
                notes = COALESCE(excluded.notes, outreach.notes)",
            params![user_id, recruiter_id, status.as_str(), contacted_at, notes],
        )?;
        Ok(())
    }
}

#[cfg(test)]
impl Database {
    /// Raw SQL for tests that need rows the typed methods refuse to write.
    pub(crate) async fn execute_raw(&self, sql: &str) {
        self.conn.lock().await.execute_batch(sql).unwrap();
    }
}

fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
