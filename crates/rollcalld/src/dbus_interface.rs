use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rollcall_core::{SessionConfig, Verdict};
use serde_json::json;
use tokio::sync::Mutex;
use zbus::interface;

use crate::config::Config;
use crate::engine::EngineHandle;
use crate::store::{AttendanceStore, RecordOutcome};

/// Shared state accessible by D-Bus method handlers.
///
/// Everything here is either read-only or internally synchronized (the
/// engine handle is a channel, the store serializes on its own worker
/// thread), so no outer lock is needed.
pub struct AppState {
    pub config: Config,
    pub engine: EngineHandle,
    pub store: AttendanceStore,
    /// Cancel flag of the most recently started check-in. Each session gets
    /// a fresh flag, so starting a new session can never erase a cancel
    /// already signalled to an earlier one; `Cancel` sets whichever flag is
    /// published here.
    pub active_cancel: Mutex<Arc<AtomicBool>>,
}

/// D-Bus interface for the attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct AttendanceService {
    pub state: Arc<AppState>,
}

impl AttendanceService {
    fn session_config(&self) -> SessionConfig {
        let cfg = &self.state.config;
        SessionConfig {
            match_threshold: cfg.match_threshold,
            blink_ear_threshold: cfg.blink_ear_threshold,
            blink_consecutive_frames: cfg.blink_consecutive_frames,
            face_frame_budget: cfg.session_face_frames,
        }
    }
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Run one verification session and, on a match, write the attendance
    /// record for `course_id`. Returns a JSON object describing the verdict.
    async fn check_in(&self, course_id: i64) -> zbus::fdo::Result<String> {
        tracing::info!(course_id, "check-in requested");

        let courses = self.state.store.list_courses().await.map_err(|e| {
            tracing::error!(error = %e, "check-in: course lookup failed");
            zbus::fdo::Error::Failed(e.to_string())
        })?;
        if !courses.iter().any(|c| c.id == course_id) {
            return Err(zbus::fdo::Error::InvalidArgs(format!(
                "unknown course id {course_id}"
            )));
        }

        // A gallery read failure degrades to an empty gallery: the session
        // still runs and settles VerifiedButUnknown instead of erroring out
        // at the kiosk.
        let gallery = match self.state.store.load_gallery().await {
            Ok(g) => g,
            Err(e) => {
                tracing::warn!(error = %e, "gallery load failed, matching against nobody");
                Vec::new()
            }
        };
        tracing::debug!(enrolled = gallery.len(), "gallery loaded");

        let cancel = Arc::new(AtomicBool::new(false));
        *self.state.active_cancel.lock().await = Arc::clone(&cancel);
        let verdict = self
            .state
            .engine
            .check_in(
                gallery,
                self.session_config(),
                Duration::from_secs(self.state.config.session_timeout_secs),
                cancel,
            )
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "check-in: engine failed");
                zbus::fdo::Error::Failed(e.to_string())
            })?;

        let response = match verdict {
            Verdict::Matched { id, name, distance } => {
                let now = chrono::Local::now().naive_local();
                let outcome = self
                    .state
                    .store
                    .record_attendance(id, course_id, now)
                    .await
                    .map_err(|e| {
                        tracing::error!(error = %e, "check-in: ledger write failed");
                        zbus::fdo::Error::Failed(e.to_string())
                    })?;
                match outcome {
                    RecordOutcome::Recorded { record_id } => {
                        tracing::info!(identity = id, name = %name, record_id, "attendance recorded");
                        json!({
                            "result": "matched",
                            "identity_id": id,
                            "name": name,
                            "distance": distance,
                            "attendance": "recorded",
                            "record_id": record_id,
                        })
                    }
                    RecordOutcome::AlreadyRecordedToday => {
                        tracing::info!(identity = id, name = %name, "already recorded today");
                        json!({
                            "result": "matched",
                            "identity_id": id,
                            "name": name,
                            "distance": distance,
                            "attendance": "already_recorded_today",
                        })
                    }
                }
            }
            Verdict::VerifiedButUnknown => {
                tracing::info!("live face verified but not enrolled");
                json!({ "result": "verified_but_unknown" })
            }
            Verdict::LivenessFailed => {
                tracing::info!("liveness check failed");
                json!({ "result": "liveness_failed" })
            }
            Verdict::Cancelled => {
                tracing::info!("check-in cancelled");
                json!({ "result": "cancelled" })
            }
        };

        Ok(response.to_string())
    }

    /// Abort the check-in session currently on camera, if any.
    async fn cancel(&self) {
        tracing::info!("cancel requested");
        self.state
            .active_cancel
            .lock()
            .await
            .store(true, Ordering::Relaxed);
    }

    /// Capture an enrollment and insert the new identity. Returns its id.
    async fn enroll(
        &self,
        name: &str,
        student_no: &str,
        program: &str,
    ) -> zbus::fdo::Result<i64> {
        tracing::info!(name, student_no, "enroll requested");

        let capture = self
            .state
            .engine
            .enroll(self.state.config.enroll_frames)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "enroll capture failed");
                zbus::fdo::Error::Failed(e.to_string())
            })?;

        tracing::debug!(confidence = capture.confidence, "enroll: encoding captured");

        let id = self
            .state
            .store
            .enroll_identity(name, student_no, program, &capture.encoding)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "enroll: store insert failed");
                zbus::fdo::Error::Failed(e.to_string())
            })?;

        tracing::info!(id, name, "identity enrolled");
        Ok(id)
    }

    /// Create a course. Returns its id.
    async fn add_course(&self, name: &str) -> zbus::fdo::Result<i64> {
        tracing::info!(name, "add course");
        self.state.store.add_course(name).await.map_err(|e| {
            tracing::error!(error = %e, "add course failed");
            zbus::fdo::Error::Failed(e.to_string())
        })
    }

    /// List courses as a JSON array of `{id, name}`.
    async fn list_courses(&self) -> zbus::fdo::Result<String> {
        let courses = self.state.store.list_courses().await.map_err(|e| {
            tracing::error!(error = %e, "list courses failed");
            zbus::fdo::Error::Failed(e.to_string())
        })?;
        serde_json::to_string(&courses)
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Full attendance report (identity and course fields joined in),
    /// in chronological order, as a JSON array.
    async fn report(&self) -> zbus::fdo::Result<String> {
        let rows = self.state.store.attendance_report().await.map_err(|e| {
            tracing::error!(error = %e, "report failed");
            zbus::fdo::Error::Failed(e.to_string())
        })?;
        serde_json::to_string(&rows)
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Daemon status as a JSON object.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let enrolled = self.state.store.count_identities().await.map_err(|e| {
            tracing::error!(error = %e, "status: count failed");
            zbus::fdo::Error::Failed(e.to_string())
        })?;
        let cfg = &self.state.config;
        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "camera_device": cfg.camera_device,
            "model_dir": cfg.model_dir.display().to_string(),
            "enrolled_identities": enrolled,
            "match_threshold": cfg.match_threshold,
            "blink_ear_threshold": cfg.blink_ear_threshold,
            "session_timeout_secs": cfg.session_timeout_secs,
        })
        .to_string())
    }
}
