use std::path::Path;

use chrono::NaiveDateTime;
use rollcall_core::{Encoding, EnrolledFace};
use thiserror::Error;
use tokio_rusqlite::Connection;

const ENCODING_DIM: usize = 128;
const ENCODING_BYTE_LEN: usize = ENCODING_DIM * 8;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("invalid encoding blob size: {0} bytes")]
    InvalidBlob(usize),
    #[error("invalid encoding dimension: {0} (expected 128)")]
    InvalidEncodingDim(usize),
    #[error("invalid encoding value (NaN/Inf)")]
    InvalidEncodingValue,
}

/// Attendance record status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum AttendanceStatus {
    Present,
    /// Reserved status value in the attendance schema; the verification
    /// path only ever writes `Present`.
    #[allow(dead_code)]
    Unknown,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Unknown => "Unknown",
        }
    }
}

/// Outcome of an attendance write. `AlreadyRecordedToday` is the expected
/// idempotent no-op, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded { record_id: i64 },
    AlreadyRecordedToday,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Course {
    pub id: i64,
    pub name: String,
}

/// One row of the attendance report: the read-only joined view.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReportRow {
    pub name: String,
    pub student_no: String,
    pub program: String,
    pub course: String,
    pub recorded_at: String,
    pub status: String,
}

/// SQLite-backed store for identities, courses, and the attendance ledger.
///
/// All access goes through one `tokio_rusqlite` connection, whose worker
/// thread serializes every call. The ledger's check-then-insert runs inside
/// a single transaction on that thread, so two concurrent check-ins for the
/// same (identity, course, day) cannot both pass the existence check.
#[derive(Clone)]
pub struct AttendanceStore {
    conn: Connection,
}

impl AttendanceStore {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA foreign_keys = ON;
                 CREATE TABLE IF NOT EXISTS identities (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     name TEXT NOT NULL,
                     student_no TEXT NOT NULL,
                     program TEXT NOT NULL,
                     encoding BLOB NOT NULL,
                     created_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS courses (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     name TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS attendance (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     identity_id INTEGER NOT NULL,
                     course_id INTEGER NOT NULL,
                     recorded_at TEXT NOT NULL,
                     status TEXT NOT NULL,
                     FOREIGN KEY (identity_id) REFERENCES identities (id),
                     FOREIGN KEY (course_id) REFERENCES courses (id)
                 );
                 CREATE INDEX IF NOT EXISTS idx_attendance_key
                     ON attendance(identity_id, course_id);",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Insert a new identity with its face encoding. Returns the row id.
    ///
    /// Re-enrollment is a new row; no duplicate-person detection happens
    /// here.
    pub async fn enroll_identity(
        &self,
        name: &str,
        student_no: &str,
        program: &str,
        encoding: &Encoding,
    ) -> Result<i64, StoreError> {
        validate_encoding_values(&encoding.values)?;
        let blob = encoding_to_bytes(&encoding.values);
        let created_at = chrono::Local::now().naive_local().format(DATE_FORMAT).to_string();

        let name = name.to_string();
        let student_no = student_no.to_string();
        let program = program.to_string();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO identities (name, student_no, program, encoding, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![name, student_no, program, blob, created_at],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(StoreError::from)
    }

    /// Load every enrolled identity as the matching gallery.
    ///
    /// Gallery order is row order, which fixes the matcher's tie-break.
    pub async fn load_gallery(&self) -> Result<Vec<EnrolledFace>, StoreError> {
        let rows: Vec<(i64, String, Vec<u8>)> = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id, name, encoding FROM identities ORDER BY id")?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        let mut gallery = Vec::with_capacity(rows.len());
        for (id, name, blob) in rows {
            let values = bytes_to_encoding_strict(&blob)?;
            gallery.push(EnrolledFace {
                id,
                name,
                encoding: Encoding::new(values),
            });
        }
        Ok(gallery)
    }

    /// Create a course. Returns the row id.
    pub async fn add_course(&self, name: &str) -> Result<i64, StoreError> {
        let name = name.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("INSERT INTO courses (name) VALUES (?1)", [&name])?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(StoreError::from)
    }

    pub async fn list_courses(&self) -> Result<Vec<Course>, StoreError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT id, name FROM courses ORDER BY id")?;
                let rows = stmt.query_map([], |row| {
                    Ok(Course {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Record attendance for a verified identity, at most once per
    /// (identity, course, calendar day).
    ///
    /// The existence check and the insert run inside one transaction on the
    /// store's single connection thread, which closes the check-then-insert
    /// race between concurrent sessions.
    pub async fn record_attendance(
        &self,
        identity_id: i64,
        course_id: i64,
        now: NaiveDateTime,
    ) -> Result<RecordOutcome, StoreError> {
        let day = now.date().format("%Y-%m-%d").to_string();
        let recorded_at = now.format(DATE_FORMAT).to_string();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let existing: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM attendance
                         WHERE identity_id = ?1 AND course_id = ?2 AND date(recorded_at) = ?3",
                        rusqlite::params![identity_id, course_id, day],
                        |row| row.get(0),
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })?;

                if existing.is_some() {
                    // Nothing to commit; the transaction rolls back on drop.
                    return Ok(RecordOutcome::AlreadyRecordedToday);
                }

                tx.execute(
                    "INSERT INTO attendance (identity_id, course_id, recorded_at, status)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![
                        identity_id,
                        course_id,
                        recorded_at,
                        AttendanceStatus::Present.as_str()
                    ],
                )?;
                let record_id = tx.last_insert_rowid();
                tx.commit()?;

                Ok(RecordOutcome::Recorded { record_id })
            })
            .await
            .map_err(StoreError::from)
    }

    /// The read-only joined attendance view: one row per record with
    /// identity and course details resolved, in chronological order.
    pub async fn attendance_report(&self) -> Result<Vec<ReportRow>, StoreError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT identities.name, identities.student_no, identities.program,
                            courses.name, attendance.recorded_at, attendance.status
                     FROM attendance
                     JOIN identities ON attendance.identity_id = identities.id
                     JOIN courses ON attendance.course_id = courses.id
                     ORDER BY attendance.recorded_at",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(ReportRow {
                        name: row.get(0)?,
                        student_no: row.get(1)?,
                        program: row.get(2)?,
                        course: row.get(3)?,
                        recorded_at: row.get(4)?,
                        status: row.get(5)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Count enrolled identities.
    pub async fn count_identities(&self) -> Result<u64, StoreError> {
        self.conn
            .call(|conn| {
                let count: u64 =
                    conn.query_row("SELECT COUNT(*) FROM identities", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
            .map_err(StoreError::from)
    }
}

// ── Serialization helpers ─────────────────────────────────────────────────────

fn encoding_to_bytes(values: &[f64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 8);
    for &v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn bytes_to_encoding_strict(bytes: &[u8]) -> Result<Vec<f64>, StoreError> {
    if bytes.len() != ENCODING_BYTE_LEN {
        return Err(StoreError::InvalidBlob(bytes.len()));
    }

    let mut values = Vec::with_capacity(ENCODING_DIM);
    for chunk in bytes.chunks_exact(8) {
        let arr: [u8; 8] = chunk
            .try_into()
            .map_err(|_| StoreError::InvalidBlob(bytes.len()))?;
        let v = f64::from_le_bytes(arr);
        if !v.is_finite() {
            return Err(StoreError::InvalidEncodingValue);
        }
        values.push(v);
    }

    Ok(values)
}

fn validate_encoding_values(values: &[f64]) -> Result<(), StoreError> {
    if values.len() != ENCODING_DIM {
        return Err(StoreError::InvalidEncodingDim(values.len()));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(StoreError::InvalidEncodingValue);
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn test_encoding(seed: f64) -> Encoding {
        Encoding::new((0..ENCODING_DIM).map(|i| seed + i as f64 / 1000.0).collect())
    }

    fn ts(date: (i32, u32, u32), time: (u32, u32, u32)) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(date.0, date.1, date.2)
            .unwrap()
            .and_hms_opt(time.0, time.1, time.2)
            .unwrap()
    }

    async fn memory_store() -> AttendanceStore {
        AttendanceStore::open(Path::new(":memory:")).await.unwrap()
    }

    #[tokio::test]
    async fn enroll_and_load_gallery_roundtrip() {
        let store = memory_store().await;
        let enc = test_encoding(0.5);

        let id = store
            .enroll_identity("Ana", "20240001", "Informatics", &enc)
            .await
            .unwrap();
        assert!(id > 0);

        let gallery = store.load_gallery().await.unwrap();
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery[0].id, id);
        assert_eq!(gallery[0].name, "Ana");
        assert_eq!(gallery[0].encoding, enc);
    }

    #[tokio::test]
    async fn gallery_order_is_enrollment_order() {
        let store = memory_store().await;
        store
            .enroll_identity("Ana", "1", "A", &test_encoding(0.1))
            .await
            .unwrap();
        store
            .enroll_identity("Ben", "2", "B", &test_encoding(0.2))
            .await
            .unwrap();
        let gallery = store.load_gallery().await.unwrap();
        assert_eq!(gallery[0].name, "Ana");
        assert_eq!(gallery[1].name, "Ben");
    }

    #[tokio::test]
    async fn enroll_rejects_wrong_dimension() {
        let store = memory_store().await;
        let short = Encoding::new(vec![0.5; 64]);
        let err = store
            .enroll_identity("Ana", "1", "A", &short)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidEncodingDim(64)));
        assert_eq!(store.count_identities().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn enroll_rejects_non_finite_values() {
        let store = memory_store().await;
        let mut values = vec![0.5; ENCODING_DIM];
        values[17] = f64::NAN;
        let err = store
            .enroll_identity("Ana", "1", "A", &Encoding::new(values))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidEncodingValue));
    }

    #[tokio::test]
    async fn encoding_byte_fidelity() {
        let mut values = vec![0.5f64; ENCODING_DIM];
        values[0] = 0.0;
        values[1] = -0.0;
        values[2] = 1.0;
        values[3] = -1.0;
        values[4] = f64::MIN_POSITIVE;
        values[5] = f64::EPSILON;
        values[6] = std::f64::consts::PI;

        let bytes = encoding_to_bytes(&values);
        let recovered = bytes_to_encoding_strict(&bytes).unwrap();
        for (orig, rec) in values.iter().zip(recovered.iter()) {
            assert_eq!(orig.to_bits(), rec.to_bits(), "mismatch: {orig} vs {rec}");
        }
    }

    #[tokio::test]
    async fn strict_decode_rejects_wrong_length() {
        let err = bytes_to_encoding_strict(&[0u8; 100]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidBlob(100)));
    }

    #[tokio::test]
    async fn record_then_same_day_is_idempotent() {
        let store = memory_store().await;
        let ana = store
            .enroll_identity("Ana", "1", "A", &test_encoding(0.1))
            .await
            .unwrap();
        let course = store.add_course("Signals").await.unwrap();

        let t1 = ts((2026, 8, 30), (9, 0, 0));
        let t2 = ts((2026, 8, 30), (10, 0, 0));

        let first = store.record_attendance(ana, course, t1).await.unwrap();
        assert!(matches!(first, RecordOutcome::Recorded { .. }));

        let second = store.record_attendance(ana, course, t2).await.unwrap();
        assert_eq!(second, RecordOutcome::AlreadyRecordedToday);

        let report = store.attendance_report().await.unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].recorded_at, "2026-08-30 09:00:00");
    }

    #[tokio::test]
    async fn next_day_records_again() {
        let store = memory_store().await;
        let ana = store
            .enroll_identity("Ana", "1", "A", &test_encoding(0.1))
            .await
            .unwrap();
        let course = store.add_course("Signals").await.unwrap();

        store
            .record_attendance(ana, course, ts((2026, 8, 30), (9, 0, 0)))
            .await
            .unwrap();
        let next_day = store
            .record_attendance(ana, course, ts((2026, 8, 31), (9, 0, 0)))
            .await
            .unwrap();
        assert!(matches!(next_day, RecordOutcome::Recorded { .. }));

        // Report is chronological: earliest record first.
        let report = store.attendance_report().await.unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].recorded_at, "2026-08-30 09:00:00");
        assert_eq!(report[1].recorded_at, "2026-08-31 09:00:00");
    }

    #[tokio::test]
    async fn different_course_same_day_records() {
        let store = memory_store().await;
        let ana = store
            .enroll_identity("Ana", "1", "A", &test_encoding(0.1))
            .await
            .unwrap();
        let signals = store.add_course("Signals").await.unwrap();
        let control = store.add_course("Control").await.unwrap();

        let t = ts((2026, 8, 30), (9, 0, 0));
        assert!(matches!(
            store.record_attendance(ana, signals, t).await.unwrap(),
            RecordOutcome::Recorded { .. }
        ));
        assert!(matches!(
            store.record_attendance(ana, control, t).await.unwrap(),
            RecordOutcome::Recorded { .. }
        ));
    }

    #[tokio::test]
    async fn concurrent_same_day_writes_record_exactly_once() {
        let store = memory_store().await;
        let ana = store
            .enroll_identity("Ana", "1", "A", &test_encoding(0.1))
            .await
            .unwrap();
        let course = store.add_course("Signals").await.unwrap();
        let t = ts((2026, 8, 30), (9, 0, 0));

        let a = store.clone();
        let b = store.clone();
        let (ra, rb) = tokio::join!(
            a.record_attendance(ana, course, t),
            b.record_attendance(ana, course, t),
        );
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        let recorded = [&ra, &rb]
            .iter()
            .filter(|r| matches!(r, RecordOutcome::Recorded { .. }))
            .count();
        let deduped = [&ra, &rb]
            .iter()
            .filter(|r| matches!(r, RecordOutcome::AlreadyRecordedToday))
            .count();
        assert_eq!(recorded, 1);
        assert_eq!(deduped, 1);
        assert_eq!(store.attendance_report().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn report_joins_identity_and_course() {
        let store = memory_store().await;
        let ana = store
            .enroll_identity("Ana", "20240001", "Informatics", &test_encoding(0.1))
            .await
            .unwrap();
        let course = store.add_course("Signals").await.unwrap();
        store
            .record_attendance(ana, course, ts((2026, 8, 30), (9, 0, 0)))
            .await
            .unwrap();

        let report = store.attendance_report().await.unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].name, "Ana");
        assert_eq!(report[0].student_no, "20240001");
        assert_eq!(report[0].program, "Informatics");
        assert_eq!(report[0].course, "Signals");
        assert_eq!(report[0].status, "Present");
    }

    #[tokio::test]
    async fn courses_listed_in_creation_order() {
        let store = memory_store().await;
        store.add_course("Signals").await.unwrap();
        store.add_course("Control").await.unwrap();
        let courses = store.list_courses().await.unwrap();
        assert_eq!(courses.len(), 2);
        assert_eq!(courses[0].name, "Signals");
        assert_eq!(courses[1].name, "Control");
    }
}
