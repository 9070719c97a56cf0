//! Verification session — the per-attempt state machine.
//!
//! One session covers one end-to-end verification attempt: callers push the
//! detections extracted from each captured frame and the session drives the
//! blink tracker and the matcher to a single [`Verdict`]. The machine is
//! pure (no camera, no clock); the engine that feeds it owns frame pacing
//! and the wall-clock deadline.

use crate::liveness::{BlinkTracker, LivenessState};
use crate::matcher::{EuclideanMatcher, MatchOutcome, Matcher};
use crate::types::{Detection, EnrolledFace};

/// Tunables for one verification session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum Euclidean distance for a positive identity match.
    pub match_threshold: f64,
    /// EAR below this marks a blink frame.
    pub blink_ear_threshold: f64,
    /// Consecutive blink frames required to confirm liveness.
    pub blink_consecutive_frames: u32,
    /// Face-bearing frames allowed before the session gives up.
    pub face_frame_budget: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.6,
            blink_ear_threshold: 0.2,
            blink_consecutive_frames: 1,
            face_frame_budget: 60,
        }
    }
}

/// Terminal outcome of a verification session.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Liveness confirmed and an enrolled identity matched.
    Matched { id: i64, name: String, distance: f64 },
    /// Liveness confirmed but no gallery entry came within threshold.
    VerifiedButUnknown,
    /// The budget ran out before a blink was observed.
    LivenessFailed,
    /// The operator aborted the session. No side effects.
    Cancelled,
}

/// What the caller sees after pushing one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionProgress {
    InProgress,
    Settled(Verdict),
}

/// State machine for one verification attempt.
pub struct VerificationSession {
    gallery: Vec<EnrolledFace>,
    cfg: SessionConfig,
    tracker: BlinkTracker,
    face_frames: u32,
    best_match: Option<(i64, String, f64)>,
    settled: Option<Verdict>,
}

impl VerificationSession {
    pub fn new(gallery: Vec<EnrolledFace>, cfg: SessionConfig) -> Self {
        let tracker = BlinkTracker::new(
            cfg.blink_ear_threshold,
            cfg.blink_consecutive_frames,
            cfg.face_frame_budget,
        );
        Self {
            gallery,
            cfg,
            tracker,
            face_frames: 0,
            best_match: None,
            settled: None,
        }
    }

    /// Feed one frame's detections. Frames with no face carry no signal and
    /// do not consume the budget.
    pub fn push_frame(&mut self, detections: &[Detection]) -> SessionProgress {
        if let Some(v) = &self.settled {
            return SessionProgress::Settled(v.clone());
        }

        if detections.is_empty() {
            self.tracker.observe(None);
            return SessionProgress::InProgress;
        }
        self.face_frames += 1;

        // Liveness tracks the largest face in frame; smaller bystander
        // faces must not be able to supply the blink.
        let liveness_face = detections
            .iter()
            .max_by(|a, b| a.bbox.area().total_cmp(&b.bbox.area()))
            .map(|d| &d.landmarks);
        self.tracker.observe(liveness_face);

        // Matching considers every face present, before or after the blink.
        for detection in detections {
            if let MatchOutcome::Matched { id, name, distance } =
                EuclideanMatcher.best_match(&detection.encoding, &self.gallery, self.cfg.match_threshold)
            {
                let improves = match &self.best_match {
                    None => true,
                    Some((_, _, best)) => distance < *best,
                };
                if improves {
                    self.best_match = Some((id, name, distance));
                }
            }
        }

        self.evaluate()
    }

    /// The wall-clock budget expired: settle on whatever evidence exists.
    pub fn expire(&mut self) -> Verdict {
        if let Some(v) = &self.settled {
            return v.clone();
        }
        let verdict = if self.tracker.state() == LivenessState::LiveConfirmed {
            Verdict::VerifiedButUnknown
        } else {
            Verdict::LivenessFailed
        };
        self.settled = Some(verdict.clone());
        verdict
    }

    /// Operator abort: discard all transient state, no side effects.
    pub fn cancel(&mut self) -> Verdict {
        self.best_match = None;
        self.settled = Some(Verdict::Cancelled);
        Verdict::Cancelled
    }

    fn evaluate(&mut self) -> SessionProgress {
        let verdict = match self.tracker.state() {
            LivenessState::LiveConfirmed => match &self.best_match {
                Some((id, name, distance)) => Some(Verdict::Matched {
                    id: *id,
                    name: name.clone(),
                    distance: *distance,
                }),
                None if self.face_frames >= self.cfg.face_frame_budget => {
                    Some(Verdict::VerifiedButUnknown)
                }
                None => None,
            },
            LivenessState::TimedOut => Some(Verdict::LivenessFailed),
            LivenessState::Observing => None,
        };

        match verdict {
            Some(v) => {
                tracing::debug!(verdict = ?v, frames = self.face_frames, "session settled");
                self.settled = Some(v.clone());
                SessionProgress::Settled(v)
            }
            None => SessionProgress::InProgress,
        }
    }
}
