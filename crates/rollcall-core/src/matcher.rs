use crate::types::{Encoding, EnrolledFace};

/// Result of matching a probe encoding against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched {
        id: i64,
        name: String,
        /// Euclidean distance of the winning entry.
        distance: f64,
    },
    NoMatch,
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Matched { .. })
    }
}

/// Strategy for comparing a probe encoding against a gallery of enrolled faces.
pub trait Matcher {
    fn best_match(
        &self,
        probe: &Encoding,
        gallery: &[EnrolledFace],
        threshold: f64,
    ) -> MatchOutcome;
}

/// Euclidean nearest-neighbor matcher.
///
/// Always scans the full gallery, no early exit. Ties on minimum distance go
/// to the earliest gallery entry (strict `<` during the scan), so identical
/// inputs always produce the identical outcome.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn best_match(
        &self,
        probe: &Encoding,
        gallery: &[EnrolledFace],
        threshold: f64,
    ) -> MatchOutcome {
        let mut best_dist = f64::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, face) in gallery.iter().enumerate() {
            let dist = probe.euclidean_distance(&face.encoding);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            // argmin over an empty gallery is undefined: best_idx stays None.
            Some(idx) if best_dist <= threshold => MatchOutcome::Matched {
                id: gallery[idx].id,
                name: gallery[idx].name.clone(),
                distance: best_dist,
            },
            _ => MatchOutcome::NoMatch,
        }
    }
}
