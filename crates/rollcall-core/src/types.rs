use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bounding box for a detected face.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub confidence: f64,
}

impl BoundingBox {
    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// 68-point facial landmark set (dlib shape-predictor indexing).
///
/// Points 36–41 span the left eye, 42–47 the right eye, clockwise from the
/// outer corner.
#[derive(Debug, Clone)]
pub struct Landmarks(pub [(f64, f64); 68]);

impl Landmarks {
    /// The six points of the left eye contour.
    pub fn left_eye(&self) -> [(f64, f64); 6] {
        let mut eye = [(0.0, 0.0); 6];
        eye.copy_from_slice(&self.0[36..42]);
        eye
    }

    /// The six points of the right eye contour.
    pub fn right_eye(&self) -> [(f64, f64); 6] {
        let mut eye = [(0.0, 0.0); 6];
        eye.copy_from_slice(&self.0[42..48]);
        eye
    }
}

/// Face encoding vector (128-dimensional for the dlib ResNet encoder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encoding {
    pub values: Vec<f64>,
}

impl Encoding {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Euclidean distance to another encoding. Lower = more similar.
    pub fn euclidean_distance(&self, other: &Encoding) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

/// An enrolled identity as the matcher sees it: the gallery entry.
#[derive(Debug, Clone)]
pub struct EnrolledFace {
    pub id: i64,
    pub name: String,
    pub encoding: Encoding,
}

/// One detected face in one frame: region, landmarks, encoding.
///
/// Transient — produced per frame, consumed by the session, discarded.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub landmarks: Landmarks,
    pub encoding: Encoding,
}

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("bad frame dimensions: {width}x{height} for {len} bytes")]
    BadFrame { width: u32, height: u32, len: usize },
}

/// The detection / landmark / encoding capability.
///
/// Implementations wrap whatever model stack produces face regions with
/// 68-point landmarks and 128-d encodings from a grayscale frame. Loaded
/// once at process start and held by the engine thread.
pub trait FaceAnalyzer {
    fn detect(&mut self, data: &[u8], width: u32, height: u32)
        -> Result<Vec<Detection>, AnalyzerError>;
}
