//! rollcall-core — Face matching, blink liveness, and verification sessions.
//!
//! Pure domain logic: no camera, no models, no storage. The detection /
//! landmark / encoding models are an injected capability behind the
//! [`FaceAnalyzer`] trait; callers feed per-frame detections into a
//! [`VerificationSession`] and read back a [`Verdict`].

pub mod liveness;
pub mod matcher;
pub mod session;
pub mod types;

pub use matcher::{EuclideanMatcher, MatchOutcome, Matcher};
pub use session::{SessionConfig, SessionProgress, Verdict, VerificationSession};
pub use types::{AnalyzerError, BoundingBox, Detection, Encoding, EnrolledFace, FaceAnalyzer, Landmarks};
