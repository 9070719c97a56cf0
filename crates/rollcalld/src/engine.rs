use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rollcall_core::{
    Encoding, EnrolledFace, FaceAnalyzer, SessionConfig, SessionProgress, Verdict,
    VerificationSession,
};
use rollcall_hw::FrameSource;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] rollcall_hw::CameraError),
    #[error("analyzer error: {0}")]
    Analyzer(#[from] rollcall_core::AnalyzerError),
    #[error("enrollment needs exactly one face in view, saw {faces}")]
    NoSingularFace { faces: usize },
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of an enrollment capture.
#[derive(Debug)]
pub struct EnrollCapture {
    pub encoding: Encoding,
    pub confidence: f64,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Enroll {
        frames: usize,
        reply: oneshot::Sender<Result<EnrollCapture, EngineError>>,
    },
    CheckIn {
        gallery: Vec<EnrolledFace>,
        session_cfg: SessionConfig,
        timeout: Duration,
        cancel: Arc<AtomicBool>,
        reply: oneshot::Sender<Result<Verdict, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Request an enrollment capture: detect exactly one face across the
    /// capture window and return its encoding.
    pub async fn enroll(&self, frames: usize) -> Result<EnrollCapture, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll {
                frames,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Run one verification session to a verdict. The caller's `cancel`
    /// flag aborts the session at the next frame boundary.
    pub async fn check_in(
        &self,
        gallery: Vec<EnrolledFace>,
        session_cfg: SessionConfig,
        timeout: Duration,
        cancel: Arc<AtomicBool>,
    ) -> Result<Verdict, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::CheckIn {
                gallery,
                session_cfg,
                timeout,
                cancel,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread takes ownership of the frame source and the analyzer,
/// discards warmup frames, then serves requests one at a time — the camera
/// is a single exclusively-owned pipeline, so sessions never interleave.
pub fn spawn_engine(
    mut source: Box<dyn FrameSource>,
    mut analyzer: Box<dyn FaceAnalyzer + Send>,
    warmup_frames: usize,
) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");

            if warmup_frames > 0 {
                tracing::info!(count = warmup_frames, "discarding warmup frames");
                for _ in 0..warmup_frames {
                    let _ = source.next_frame();
                }
            }

            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll { frames, reply } => {
                        let result = run_enroll(source.as_mut(), analyzer.as_mut(), frames);
                        let _ = reply.send(result);
                    }
                    EngineRequest::CheckIn {
                        gallery,
                        session_cfg,
                        timeout,
                        cancel,
                        reply,
                    } => {
                        let result = run_check_in(
                            source.as_mut(),
                            analyzer.as_mut(),
                            gallery,
                            session_cfg,
                            timeout,
                            &cancel,
                        );
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}

/// Drive one verification session: frames in capture order, cancel checked
/// at every frame boundary, wall-clock deadline on top of the session's own
/// frame budget.
fn run_check_in(
    source: &mut dyn FrameSource,
    analyzer: &mut dyn FaceAnalyzer,
    gallery: Vec<EnrolledFace>,
    session_cfg: SessionConfig,
    timeout: Duration,
    cancel: &AtomicBool,
) -> Result<Verdict, EngineError> {
    let deadline = Instant::now() + timeout;
    let mut session = VerificationSession::new(gallery, session_cfg);

    loop {
        if cancel.load(Ordering::Relaxed) {
            tracing::info!("check-in cancelled by operator");
            return Ok(session.cancel());
        }
        if Instant::now() >= deadline {
            tracing::info!("check-in wall-clock budget expired");
            return Ok(session.expire());
        }

        let Some(frame) = source.next_frame()? else {
            tracing::warn!("frame source ended mid-session");
            return Ok(session.expire());
        };
        if frame.is_dark {
            tracing::debug!(seq = frame.sequence, "skipping dark frame");
            continue;
        }

        let detections = analyzer.detect(&frame.data, frame.width, frame.height)?;
        if let SessionProgress::Settled(verdict) = session.push_frame(&detections) {
            tracing::info!(verdict = ?verdict, "check-in settled");
            return Ok(verdict);
        }
    }
}

/// Capture the enrollment window and return the best single-face encoding.
///
/// Any frame with several faces aborts the capture: an enrollment must bind
/// the new identity to exactly one person.
fn run_enroll(
    source: &mut dyn FrameSource,
    analyzer: &mut dyn FaceAnalyzer,
    frames: usize,
) -> Result<EnrollCapture, EngineError> {
    let mut best: Option<EnrollCapture> = None;

    for _ in 0..frames {
        let Some(frame) = source.next_frame()? else {
            break;
        };
        if frame.is_dark {
            continue;
        }

        let detections = analyzer.detect(&frame.data, frame.width, frame.height)?;
        match detections.as_slice() {
            [] => continue,
            [single] => {
                let better = match &best {
                    None => true,
                    Some(prev) => single.bbox.confidence > prev.confidence,
                };
                if better {
                    best = Some(EnrollCapture {
                        encoding: single.encoding.clone(),
                        confidence: single.bbox.confidence,
                    });
                }
            }
            many => {
                tracing::warn!(faces = many.len(), "enrollment aborted: multiple faces");
                return Err(EngineError::NoSingularFace { faces: many.len() });
            }
        }
    }

    best.ok_or(EngineError::NoSingularFace { faces: 0 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{AnalyzerError, BoundingBox, Detection, Landmarks};
    use rollcall_hw::{CameraError, Frame};
    use std::collections::VecDeque;

    struct FakeSource {
        frames: VecDeque<Frame>,
    }

    impl FakeSource {
        fn with_frames(count: usize) -> Box<Self> {
            let frames = (0..count).map(|i| fake_frame(i as u32, false)).collect();
            Box::new(Self { frames })
        }
    }

    impl FrameSource for FakeSource {
        fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
            Ok(self.frames.pop_front())
        }
    }

    struct FakeAnalyzer {
        script: VecDeque<Vec<Detection>>,
    }

    impl FaceAnalyzer for FakeAnalyzer {
        fn detect(
            &mut self,
            _data: &[u8],
            _width: u32,
            _height: u32,
        ) -> Result<Vec<Detection>, AnalyzerError> {
            Ok(self.script.pop_front().unwrap_or_default())
        }
    }

    fn fake_frame(sequence: u32, is_dark: bool) -> Frame {
        Frame {
            data: vec![128; 16],
            width: 4,
            height: 4,
            timestamp: Instant::now(),
            sequence,
            is_dark,
        }
    }

    fn landmarks_with_opening(v: f64) -> Landmarks {
        let mut pts = [(0.0, 0.0); 68];
        for (base, x_off) in [(36usize, 10.0), (42usize, 20.0)] {
            pts[base] = (x_off, 0.0);
            pts[base + 1] = (x_off + 1.0, v);
            pts[base + 2] = (x_off + 2.0, v);
            pts[base + 3] = (x_off + 3.0, 0.0);
            pts[base + 4] = (x_off + 2.0, -v);
            pts[base + 5] = (x_off + 1.0, -v);
        }
        Landmarks(pts)
    }

    fn detection(eye_opening: f64, encoding: Vec<f64>, confidence: f64) -> Detection {
        Detection {
            bbox: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 100.0,
                height: 100.0,
                confidence,
            },
            landmarks: landmarks_with_opening(eye_opening),
            encoding: Encoding::new(encoding),
        }
    }

    fn ana_gallery() -> Vec<EnrolledFace> {
        vec![EnrolledFace {
            id: 1,
            name: "Ana".into(),
            encoding: Encoding::new(vec![1.0, 0.0, 0.0]),
        }]
    }

    fn spawn_fake_engine(
        frames: usize,
        script: Vec<Vec<Detection>>,
    ) -> EngineHandle {
        spawn_engine(
            FakeSource::with_frames(frames),
            Box::new(FakeAnalyzer {
                script: script.into(),
            }),
            0,
        )
    }

    #[tokio::test]
    async fn check_in_settles_on_match_after_blink() {
        let probe = vec![1.0, 0.3, 0.0]; // distance 0.3 from Ana
        let script = vec![
            vec![detection(0.9, probe.clone(), 0.99)],
            vec![detection(0.9, probe.clone(), 0.99)],
            vec![detection(0.15, probe.clone(), 0.99)], // blink
        ];
        let handle = spawn_fake_engine(5, script);

        let verdict = handle
            .check_in(
                ana_gallery(),
                SessionConfig::default(),
                Duration::from_secs(5),
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();

        match verdict {
            Verdict::Matched { id, name, .. } => {
                assert_eq!(id, 1);
                assert_eq!(name, "Ana");
            }
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[tokio::test]
    async fn check_in_without_blink_fails_liveness() {
        let probe = vec![1.0, 0.3, 0.0];
        let script: Vec<_> = (0..4)
            .map(|_| vec![detection(0.9, probe.clone(), 0.99)])
            .collect();
        let handle = spawn_fake_engine(4, script);

        let verdict = handle
            .check_in(
                ana_gallery(),
                SessionConfig::default(),
                Duration::from_secs(5),
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::LivenessFailed);
    }

    #[tokio::test]
    async fn check_in_blink_without_match_is_verified_but_unknown() {
        let stranger = vec![-1.0, -1.0, -1.0];
        let script = vec![
            vec![detection(0.15, stranger.clone(), 0.99)], // blink, no match
            vec![detection(0.9, stranger.clone(), 0.99)],
        ];
        let handle = spawn_fake_engine(2, script);

        let verdict = handle
            .check_in(
                ana_gallery(),
                SessionConfig::default(),
                Duration::from_secs(5),
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::VerifiedButUnknown);
    }

    #[tokio::test]
    async fn cancelled_check_in_returns_cancelled() {
        let probe = vec![1.0, 0.3, 0.0];
        let script = vec![vec![detection(0.9, probe, 0.99)]];
        let handle = spawn_fake_engine(100, script);

        let cancel = Arc::new(AtomicBool::new(true));
        let verdict = handle
            .check_in(
                ana_gallery(),
                SessionConfig::default(),
                Duration::from_secs(5),
                cancel,
            )
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::Cancelled);
    }

    #[tokio::test]
    async fn dark_frames_are_skipped() {
        let probe = vec![1.0, 0.3, 0.0];
        // One dark frame, then a blinking matching frame. The analyzer
        // script has a single entry; it must be consumed by the lit frame.
        let frames = VecDeque::from(vec![fake_frame(0, true), fake_frame(1, false)]);
        let script = vec![vec![detection(0.15, probe, 0.99)]];
        let handle = spawn_engine(
            Box::new(FakeSource { frames }),
            Box::new(FakeAnalyzer {
                script: script.into(),
            }),
            0,
        );

        let verdict = handle
            .check_in(
                ana_gallery(),
                SessionConfig::default(),
                Duration::from_secs(5),
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();
        assert!(matches!(verdict, Verdict::Matched { .. }));
    }

    #[tokio::test]
    async fn enroll_picks_best_single_face() {
        let enc_low = vec![0.1; 128];
        let enc_high = vec![0.2; 128];
        let script = vec![
            vec![detection(0.9, enc_low, 0.80)],
            vec![],
            vec![detection(0.9, enc_high.clone(), 0.95)],
        ];
        let handle = spawn_fake_engine(3, script);

        let capture = handle.enroll(3).await.unwrap();
        assert_eq!(capture.encoding.values, enc_high);
        assert!((capture.confidence - 0.95).abs() < 1e-9);
    }

    #[tokio::test]
    async fn enroll_with_no_faces_fails() {
        let handle = spawn_fake_engine(3, vec![vec![], vec![], vec![]]);
        let err = handle.enroll(3).await.unwrap_err();
        assert!(matches!(err, EngineError::NoSingularFace { faces: 0 }));
    }

    #[tokio::test]
    async fn enroll_with_multiple_faces_fails() {
        let enc = vec![0.1; 128];
        let script = vec![vec![
            detection(0.9, enc.clone(), 0.9),
            detection(0.9, enc, 0.8),
        ]];
        let handle = spawn_fake_engine(3, script);
        let err = handle.enroll(3).await.unwrap_err();
        assert!(matches!(err, EngineError::NoSingularFace { faces: 2 }));
    }

    #[tokio::test]
    async fn source_exhaustion_expires_the_session() {
        let probe = vec![1.0, 0.3, 0.0];
        let script = vec![vec![detection(0.9, probe, 0.99)]];
        let handle = spawn_fake_engine(1, script);

        let verdict = handle
            .check_in(
                ana_gallery(),
                SessionConfig::default(),
                Duration::from_secs(5),
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::LivenessFailed);
    }
}
