//! Blink-based liveness detection from eye-aspect-ratio dips.
//!
//! A static photograph held in front of the camera produces a steady,
//! wide-open eye contour frame after frame. A live subject blinks
//! involuntarily within a few seconds, and during a blink the eye-aspect
//! ratio (EAR) drops sharply. This module watches a bounded stream of
//! per-frame landmark sets for that dip.
//!
//! # Threat Coverage
//!
//! - **Blocks:** Printed photographs and other static images.
//! - **Does not block:** Video replay attacks (blinks are in the video),
//!   high-quality masks with articulated eyelids.

use crate::types::Landmarks;

/// Eye aspect ratio for one eye contour `p0..p5`, clockwise from the outer
/// corner: `(‖p1−p5‖ + ‖p2−p4‖) / (2·‖p0−p3‖)`.
///
/// Open eyes sit around 0.25–0.35; a blink dips well below 0.2.
pub fn eye_aspect_ratio(eye: &[(f64, f64); 6]) -> f64 {
    let a = point_distance(eye[1], eye[5]);
    let b = point_distance(eye[2], eye[4]);
    let c = point_distance(eye[0], eye[3]);
    if c <= f64::EPSILON {
        // Degenerate contour (zero eye width) carries no blink signal.
        return f64::INFINITY;
    }
    (a + b) / (2.0 * c)
}

/// Average EAR across both eyes of a landmark set.
pub fn average_ear(landmarks: &Landmarks) -> f64 {
    let left = eye_aspect_ratio(&landmarks.left_eye());
    let right = eye_aspect_ratio(&landmarks.right_eye());
    (left + right) / 2.0
}

fn point_distance(p: (f64, f64), q: (f64, f64)) -> f64 {
    let dx = p.0 - q.0;
    let dy = p.1 - q.1;
    (dx * dx + dy * dy).sqrt()
}

/// State of a [`BlinkTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    /// Still watching for a blink.
    Observing,
    /// A blink was observed — the subject is treated as live. Terminal.
    LiveConfirmed,
    /// The frame budget ran out without a blink. Terminal.
    TimedOut,
}

/// Per-session blink state machine.
///
/// Fed one landmark set per frame (or `None` when no face was detected).
/// Frames without a face carry no signal and do not consume the budget —
/// absence of a face is not liveness failure, only "no signal yet". Only
/// frames where a face was observed without a blink count toward
/// [`LivenessState::TimedOut`].
#[derive(Debug)]
pub struct BlinkTracker {
    ear_threshold: f64,
    consecutive_required: u32,
    frame_budget: u32,
    observed_frames: u32,
    below_streak: u32,
    state: LivenessState,
}

impl BlinkTracker {
    /// `consecutive_required` is the debounce: how many consecutive
    /// below-threshold frames confirm a blink. 1 reproduces the single-dip
    /// rule.
    pub fn new(ear_threshold: f64, consecutive_required: u32, frame_budget: u32) -> Self {
        Self {
            ear_threshold,
            consecutive_required: consecutive_required.max(1),
            frame_budget,
            observed_frames: 0,
            below_streak: 0,
            state: LivenessState::Observing,
        }
    }

    pub fn state(&self) -> LivenessState {
        self.state
    }

    /// Face-bearing frames seen so far.
    pub fn observed_frames(&self) -> u32 {
        self.observed_frames
    }

    /// Consume one frame's landmark set and return the resulting state.
    pub fn observe(&mut self, landmarks: Option<&Landmarks>) -> LivenessState {
        if self.state != LivenessState::Observing {
            return self.state;
        }
        let Some(landmarks) = landmarks else {
            return self.state;
        };

        self.observed_frames += 1;
        let ear = average_ear(landmarks);

        if ear < self.ear_threshold {
            self.below_streak += 1;
            if self.below_streak >= self.consecutive_required {
                tracing::debug!(ear, frames = self.observed_frames, "blink confirmed");
                self.state = LivenessState::LiveConfirmed;
                return self.state;
            }
        } else {
            self.below_streak = 0;
        }

        if self.observed_frames >= self.frame_budget {
            tracing::debug!(frames = self.observed_frames, "liveness budget exhausted");
            self.state = LivenessState::TimedOut;
        }
        self.state
    }
}
