use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing the dlib model files (68-point shape predictor
    /// and ResNet face encoder) for the optional dlib backend.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Maximum Euclidean distance for a positive identity match.
    pub match_threshold: f64,
    /// EAR below this marks a blink frame.
    pub blink_ear_threshold: f64,
    /// Consecutive blink frames required to confirm liveness.
    pub blink_consecutive_frames: u32,
    /// Face-bearing frames allowed per check-in session.
    pub session_face_frames: u32,
    /// Wall-clock budget in seconds for a check-in session.
    pub session_timeout_secs: u64,
    /// Number of frames to capture per enrollment attempt.
    pub enroll_frames: usize,
    /// Number of warmup frames to discard at startup (camera AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Whether the daemon is running on the session bus (development mode).
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        let model_dir = std::env::var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        Self {
            camera_device: std::env::var("ROLLCALL_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            model_dir,
            db_path,
            match_threshold: env_f64("ROLLCALL_MATCH_THRESHOLD", 0.6),
            blink_ear_threshold: env_f64("ROLLCALL_BLINK_EAR_THRESHOLD", 0.2),
            blink_consecutive_frames: env_u32("ROLLCALL_BLINK_CONSECUTIVE_FRAMES", 1),
            session_face_frames: env_u32("ROLLCALL_SESSION_FACE_FRAMES", 60),
            session_timeout_secs: env_u64("ROLLCALL_SESSION_TIMEOUT_SECS", 20),
            enroll_frames: env_usize("ROLLCALL_ENROLL_FRAMES", 5),
            warmup_frames: env_usize("ROLLCALL_WARMUP_FRAMES", 4),
            session_bus: std::env::var("ROLLCALL_SESSION_BUS").is_ok(),
        }
    }

    /// Path to the 68-point shape predictor model.
    #[cfg(feature = "dlib")]
    pub fn shape_predictor_path(&self) -> String {
        self.model_dir
            .join("shape_predictor_68_face_landmarks.dat")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ResNet face encoder model.
    #[cfg(feature = "dlib")]
    pub fn face_encoder_path(&self) -> String {
        self.model_dir
            .join("dlib_face_recognition_resnet_model_v1.dat")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
