//! SQLite-backed store.
//!
//! The database lives at `$CONCIERGE_HOME/concierge.db` by default. The
//! `voicemails` table carries UNIQUE(call_sid, user_id), and `upsert` is a
//! single `INSERT .. ON CONFLICT DO NOTHING`, so concurrent redelivery of the
//! same webhook cannot produce two rows.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    CalendarEvent, Client, Job, JobExtraction, JobStatus, MaterializationSaga, NewCalendarEvent,
    NewClient, NewJob, NewVoicemail, Urgency, VoicemailRecord, VoicemailStatus, VoicemailUpdate,
};

use super::{check_transition, BusinessStore, StoreError, VoicemailRepository};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS voicemails (
    id TEXT PRIMARY KEY,
    call_sid TEXT NOT NULL,
    user_id TEXT NOT NULL,
    from_number TEXT NOT NULL,
    to_number TEXT NOT NULL,
    recording_url TEXT NOT NULL,
    recording_sid TEXT,
    recording_duration INTEGER,
    status TEXT NOT NULL,
    transcript TEXT,
    transcript_confidence REAL,
    transcript_vendor TEXT,
    job_draft TEXT,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(call_sid, user_id)
);

CREATE TABLE IF NOT EXISTS clients (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    name TEXT NOT NULL,
    phone TEXT,
    email TEXT,
    address TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_clients_user_phone ON clients(user_id, phone);

CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    client_id TEXT,
    title TEXT NOT NULL,
    description TEXT,
    status TEXT NOT NULL,
    location TEXT,
    estimated_price REAL,
    urgency TEXT,
    scheduled_at TEXT,
    notes TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS calendar_events (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    job_id TEXT NOT NULL,
    client_id TEXT,
    title TEXT NOT NULL,
    starts_at TEXT NOT NULL,
    ends_at TEXT NOT NULL,
    reminder_minutes INTEGER NOT NULL,
    location TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS materializations (
    user_id TEXT NOT NULL,
    call_id TEXT NOT NULL,
    draft_hash TEXT NOT NULL,
    saga TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (user_id, call_id)
);
";

const VOICEMAIL_COLUMNS: &str = "id, call_sid, user_id, from_number, to_number, recording_url, \
     recording_sid, recording_duration, status, transcript, transcript_confidence, \
     transcript_vendor, job_draft, last_error, created_at, updated_at";

const CLIENT_COLUMNS: &str = "id, user_id, name, phone, email, address, created_at";

const JOB_COLUMNS: &str = "id, user_id, client_id, title, description, status, location, \
     estimated_price, urgency, scheduled_at, notes, created_at";

const EVENT_COLUMNS: &str = "id, user_id, job_id, client_id, title, starts_at, ends_at, \
     reminder_minutes, location, created_at";

const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// SQLite implementation of both store traits.
///
/// The connection is held behind a mutex; every trait call takes the lock for
/// the duration of its statements.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file and apply the schema
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(StoreError::CreateDir)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        debug!(path = %path.display(), "Opened SQLite store");
        Self::bootstrap(conn)
    }

    /// Private in-memory database (tests, dry runs)
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Lock)
    }

    fn insert_voicemail(
        conn: &Connection,
        record: &VoicemailRecord,
        on_conflict: &str,
    ) -> Result<usize, StoreError> {
        let job_draft = record
            .job_draft
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let sql = format!(
            "INSERT INTO voicemails ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16) {}",
            VOICEMAIL_COLUMNS, on_conflict
        );

        let inserted = conn.execute(
            &sql,
            params![
                record.id.to_string(),
                record.call_sid,
                record.user_id,
                record.from_number,
                record.to_number,
                record.recording_url,
                record.recording_sid,
                record.recording_duration,
                record.status.as_str(),
                record.transcript,
                record.transcript_confidence,
                record.transcript_vendor,
                job_draft,
                record.last_error,
                format_ts(&record.created_at),
                format_ts(&record.updated_at),
            ],
        );

        match inserted {
            Ok(n) => Ok(n),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Duplicate {
                    call_sid: record.call_sid.clone(),
                    user_id: record.user_id.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn voicemail_by_call_sid(
        conn: &Connection,
        call_sid: &str,
        user_id: &str,
    ) -> Result<Option<VoicemailRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM voicemails WHERE call_sid = ?1 AND user_id = ?2",
            VOICEMAIL_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![call_sid, user_id], map_voicemail)
            .optional()?)
    }

    fn voicemail_by_id(
        conn: &Connection,
        id: Uuid,
    ) -> Result<Option<VoicemailRecord>, StoreError> {
        let sql = format!("SELECT {} FROM voicemails WHERE id = ?1", VOICEMAIL_COLUMNS);
        Ok(conn
            .query_row(&sql, params![id.to_string()], map_voicemail)
            .optional()?)
    }

    fn client_where(
        conn: &Connection,
        clause: &str,
        user_id: &str,
        value: &str,
    ) -> Result<Option<Client>, StoreError> {
        let sql = format!(
            "SELECT {} FROM clients WHERE user_id = ?1 AND {} ORDER BY created_at ASC, rowid ASC LIMIT 1",
            CLIENT_COLUMNS, clause
        );
        Ok(conn
            .query_row(&sql, params![user_id, value], map_client)
            .optional()?)
    }
}

#[async_trait]
impl VoicemailRepository for SqliteStore {
    async fn find_by_call_sid(
        &self,
        call_sid: &str,
        user_id: &str,
    ) -> Result<Option<VoicemailRecord>, StoreError> {
        let conn = self.lock()?;
        Self::voicemail_by_call_sid(&conn, call_sid, user_id)
    }

    async fn create(&self, input: NewVoicemail) -> Result<VoicemailRecord, StoreError> {
        let conn = self.lock()?;
        let record = VoicemailRecord::from_new(input);
        Self::insert_voicemail(&conn, &record, "")?;
        Ok(record)
    }

    async fn update(
        &self,
        id: Uuid,
        update: VoicemailUpdate,
    ) -> Result<VoicemailRecord, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let mut record = Self::voicemail_by_id(&tx, id)?
            .ok_or_else(|| StoreError::NotFound(format!("voicemail {}", id)))?;
        check_transition(&record, &update)?;
        record.apply(update);

        let job_draft = record
            .job_draft
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        tx.execute(
            "UPDATE voicemails SET status = ?1, transcript = ?2, transcript_confidence = ?3, \
             transcript_vendor = ?4, job_draft = ?5, last_error = ?6, updated_at = ?7 WHERE id = ?8",
            params![
                record.status.as_str(),
                record.transcript,
                record.transcript_confidence,
                record.transcript_vendor,
                job_draft,
                record.last_error,
                format_ts(&record.updated_at),
                record.id.to_string(),
            ],
        )?;
        tx.commit()?;

        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<VoicemailRecord>, StoreError> {
        let conn = self.lock()?;
        Self::voicemail_by_id(&conn, id)
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<VoicemailRecord>, StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM voicemails WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            VOICEMAIL_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![user_id, limit], map_voicemail)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    async fn upsert(&self, input: NewVoicemail) -> Result<(VoicemailRecord, bool), StoreError> {
        let conn = self.lock()?;
        let candidate = VoicemailRecord::from_new(input);

        let inserted = Self::insert_voicemail(
            &conn,
            &candidate,
            "ON CONFLICT(call_sid, user_id) DO NOTHING",
        )?;

        let stored = Self::voicemail_by_call_sid(&conn, &candidate.call_sid, &candidate.user_id)?
            .ok_or_else(|| {
                StoreError::NotFound(format!("{}:{}", candidate.user_id, candidate.call_sid))
            })?;

        Ok((stored, inserted == 1))
    }
}

#[async_trait]
impl BusinessStore for SqliteStore {
    async fn find_client_by_phone(
        &self,
        user_id: &str,
        phone: &str,
    ) -> Result<Option<Client>, StoreError> {
        let conn = self.lock()?;
        Self::client_where(&conn, "phone = ?2", user_id, phone.trim())
    }

    async fn find_client_by_name(
        &self,
        user_id: &str,
        name: &str,
    ) -> Result<Option<Client>, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        let conn = self.lock()?;
        Self::client_where(&conn, "instr(lower(name), lower(?2)) > 0", user_id, name)
    }

    async fn get_client(&self, id: Uuid) -> Result<Option<Client>, StoreError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM clients WHERE id = ?1", CLIENT_COLUMNS);
        Ok(conn
            .query_row(&sql, params![id.to_string()], map_client)
            .optional()?)
    }

    async fn create_client(&self, input: NewClient) -> Result<Client, StoreError> {
        let client = Client::from_new(input);
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO clients ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                CLIENT_COLUMNS
            ),
            params![
                client.id.to_string(),
                client.user_id,
                client.name,
                client.phone,
                client.email,
                client.address,
                format_ts(&client.created_at),
            ],
        )?;
        Ok(client)
    }

    async fn create_job(&self, input: NewJob) -> Result<Job, StoreError> {
        let job = Job::from_new(input);
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO jobs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                JOB_COLUMNS
            ),
            params![
                job.id.to_string(),
                job.user_id,
                job.client_id.map(|id| id.to_string()),
                job.title,
                job.description,
                job.status.as_str(),
                job.location,
                job.estimated_price,
                job.urgency.map(|u| u.as_str()),
                job.scheduled_at.map(|at| at.format(NAIVE_FORMAT).to_string()),
                job.notes,
                format_ts(&job.created_at),
            ],
        )?;
        Ok(job)
    }

    async fn create_calendar_event(
        &self,
        input: NewCalendarEvent,
    ) -> Result<CalendarEvent, StoreError> {
        let event = CalendarEvent::from_new(input);
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO calendar_events ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                EVENT_COLUMNS
            ),
            params![
                event.id.to_string(),
                event.user_id,
                event.job_id.to_string(),
                event.client_id.map(|id| id.to_string()),
                event.title,
                event.starts_at.format(NAIVE_FORMAT).to_string(),
                event.ends_at.format(NAIVE_FORMAT).to_string(),
                event.reminder_minutes,
                event.location,
                format_ts(&event.created_at),
            ],
        )?;
        Ok(event)
    }

    async fn list_clients(&self, user_id: &str) -> Result<Vec<Client>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM clients WHERE user_id = ?1 ORDER BY created_at ASC, rowid ASC",
            CLIENT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id], map_client)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    async fn list_jobs(&self, user_id: &str) -> Result<Vec<Job>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE user_id = ?1 ORDER BY created_at ASC, rowid ASC",
            JOB_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id], map_job)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    async fn list_calendar_events(&self, user_id: &str) -> Result<Vec<CalendarEvent>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM calendar_events WHERE user_id = ?1 ORDER BY starts_at ASC, rowid ASC",
            EVENT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id], map_event)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    async fn load_saga(
        &self,
        user_id: &str,
        call_id: &str,
    ) -> Result<Option<MaterializationSaga>, StoreError> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT saga FROM materializations WHERE user_id = ?1 AND call_id = ?2",
                params![user_id, call_id],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|j| serde_json::from_str(&j))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn save_saga(&self, saga: &MaterializationSaga) -> Result<(), StoreError> {
        let json = serde_json::to_string(saga)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO materializations (user_id, call_id, draft_hash, saga, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(user_id, call_id) DO UPDATE SET \
             draft_hash = excluded.draft_hash, saga = excluded.saga, updated_at = excluded.updated_at",
            params![
                saga.user_id,
                saga.call_id,
                saga.draft_hash,
                json,
                format_ts(&saga.updated_at),
            ],
        )?;
        Ok(())
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn get_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn get_opt_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| Uuid::parse_str(&r).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn get_naive(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let raw: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&raw, NAIVE_FORMAT).map_err(|e| conversion_error(idx, e))
}

fn map_voicemail(row: &Row<'_>) -> rusqlite::Result<VoicemailRecord> {
    let status_raw: String = row.get(8)?;
    let status = VoicemailStatus::parse(&status_raw)
        .ok_or_else(|| conversion_error(8, format!("unknown voicemail status '{}'", status_raw)))?;

    let draft_raw: Option<String> = row.get(12)?;
    let job_draft = draft_raw
        .map(|raw| serde_json::from_str::<JobExtraction>(&raw))
        .transpose()
        .map_err(|e| conversion_error(12, e))?;

    Ok(VoicemailRecord {
        id: get_uuid(row, 0)?,
        call_sid: row.get(1)?,
        user_id: row.get(2)?,
        from_number: row.get(3)?,
        to_number: row.get(4)?,
        recording_url: row.get(5)?,
        recording_sid: row.get(6)?,
        recording_duration: row.get(7)?,
        status,
        transcript: row.get(9)?,
        transcript_confidence: row.get(10)?,
        transcript_vendor: row.get(11)?,
        job_draft,
        last_error: row.get(13)?,
        created_at: get_ts(row, 14)?,
        updated_at: get_ts(row, 15)?,
    })
}

fn map_client(row: &Row<'_>) -> rusqlite::Result<Client> {
    Ok(Client {
        id: get_uuid(row, 0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        phone: row.get(3)?,
        email: row.get(4)?,
        address: row.get(5)?,
        created_at: get_ts(row, 6)?,
    })
}

fn map_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let status_raw: String = row.get(5)?;
    let status = JobStatus::parse(&status_raw)
        .ok_or_else(|| conversion_error(5, format!("unknown job status '{}'", status_raw)))?;

    let urgency_raw: Option<String> = row.get(8)?;
    let urgency = match urgency_raw {
        Some(raw) => Some(
            Urgency::parse(&raw)
                .ok_or_else(|| conversion_error(8, format!("unknown urgency '{}'", raw)))?,
        ),
        None => None,
    };

    let scheduled_raw: Option<String> = row.get(9)?;
    let scheduled_at = scheduled_raw
        .map(|raw| NaiveDateTime::parse_from_str(&raw, NAIVE_FORMAT))
        .transpose()
        .map_err(|e| conversion_error(9, e))?;

    Ok(Job {
        id: get_uuid(row, 0)?,
        user_id: row.get(1)?,
        client_id: get_opt_uuid(row, 2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        status,
        location: row.get(6)?,
        estimated_price: row.get(7)?,
        urgency,
        scheduled_at,
        notes: row.get(10)?,
        created_at: get_ts(row, 11)?,
    })
}

fn map_event(row: &Row<'_>) -> rusqlite::Result<CalendarEvent> {
    Ok(CalendarEvent {
        id: get_uuid(row, 0)?,
        user_id: row.get(1)?,
        job_id: get_uuid(row, 2)?,
        client_id: get_opt_uuid(row, 3)?,
        title: row.get(4)?,
        starts_at: get_naive(row, 5)?,
        ends_at: get_naive(row, 6)?,
        reminder_minutes: row.get(7)?,
        location: row.get(8)?,
        created_at: get_ts(row, 9)?,
    })
}
