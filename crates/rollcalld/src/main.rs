use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod store;

#[cfg(feature = "dlib")]
mod analyzer;

use config::Config;
use dbus_interface::{AppState, AttendanceService};
use rollcall_core::FaceAnalyzer;
use rollcall_hw::{Camera, FrameSource};
use store::AttendanceStore;

#[cfg(feature = "dlib")]
fn open_analyzer(config: &Config) -> Result<Box<dyn FaceAnalyzer + Send>> {
    let analyzer = analyzer::DlibAnalyzer::open(
        &config.shape_predictor_path(),
        &config.face_encoder_path(),
    )?;
    Ok(Box::new(analyzer))
}

#[cfg(not(feature = "dlib"))]
fn open_analyzer(_config: &Config) -> Result<Box<dyn FaceAnalyzer + Send>> {
    anyhow::bail!(
        "no face analysis backend compiled in; rebuild with --features dlib \
         and install the model files"
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env();

    let store = AttendanceStore::open(&config.db_path).await?;
    tracing::info!(db = %config.db_path.display(), "store opened");

    let camera = Camera::open(&config.camera_device)?;
    let source: Box<dyn FrameSource> = Box::new(camera);

    let analyzer = open_analyzer(&config)?;
    tracing::info!("face analyzer loaded");

    let warmup = config.warmup_frames;
    let session_bus = config.session_bus;
    let engine = engine::spawn_engine(source, analyzer, warmup);

    let state = Arc::new(AppState {
        config,
        engine,
        store,
        active_cancel: tokio::sync::Mutex::new(Arc::new(AtomicBool::new(false))),
    });
    let service = AttendanceService { state };

    let builder = if session_bus {
        tracing::info!("connecting to session bus");
        zbus::connection::Builder::session()?
    } else {
        tracing::info!("connecting to system bus");
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name("org.rollcall.Attendance1")?
        .serve_at("/org/rollcall/Attendance1", service)?
        .build()
        .await?;

    tracing::info!("rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
