//! dlib-backed face analysis (behind the `dlib` feature).
//!
//! Pipeline per frame: HOG face detector, 68-point shape predictor, ResNet
//! face encoder producing 128-d encodings. Model loads are slow, so the
//! three are opened on parallel threads at startup.

use dlib_face_recognition::{
    FaceDetector, FaceDetectorTrait, FaceEncoderNetwork, FaceEncoderTrait, ImageMatrix,
    LandmarkPredictor, LandmarkPredictorTrait,
};
use image::RgbImage;
use rollcall_core::{AnalyzerError, BoundingBox, Detection, Encoding, FaceAnalyzer, Landmarks};

pub struct DlibAnalyzer {
    detector: FaceDetector,
    predictor: LandmarkPredictor,
    encoder: FaceEncoderNetwork,
}

impl DlibAnalyzer {
    pub fn open(shape_predictor: &str, face_encoder: &str) -> Result<Self, AnalyzerError> {
        let detector_t = std::thread::spawn(FaceDetector::new);
        let predictor_path = shape_predictor.to_string();
        let predictor_t = std::thread::spawn(move || LandmarkPredictor::open(predictor_path));
        let encoder_path = face_encoder.to_string();
        let encoder_t = std::thread::spawn(move || FaceEncoderNetwork::open(encoder_path));

        let detector = detector_t
            .join()
            .map_err(|_| AnalyzerError::ModelLoad("face detector init panicked".into()))?;
        let predictor = predictor_t
            .join()
            .map_err(|_| AnalyzerError::ModelLoad("shape predictor init panicked".into()))?
            .map_err(AnalyzerError::ModelLoad)?;
        let encoder = encoder_t
            .join()
            .map_err(|_| AnalyzerError::ModelLoad("face encoder init panicked".into()))?
            .map_err(AnalyzerError::ModelLoad)?;

        Ok(Self {
            detector,
            predictor,
            encoder,
        })
    }
}

impl FaceAnalyzer for DlibAnalyzer {
    fn detect(
        &mut self,
        data: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, AnalyzerError> {
        let expected = (width * height) as usize;
        if data.len() < expected {
            return Err(AnalyzerError::BadFrame {
                width,
                height,
                len: data.len(),
            });
        }

        // dlib wants RGB; replicate the gray channel.
        let rgb = RgbImage::from_fn(width, height, |x, y| {
            let g = data[(y * width + x) as usize];
            image::Rgb([g, g, g])
        });
        let matrix = ImageMatrix::from_image(&rgb);

        let locations = self.detector.face_locations(&matrix);
        let mut detections = Vec::with_capacity(locations.len());

        for rect in locations.iter() {
            let landmarks = self.predictor.face_landmarks(&matrix, rect);
            if landmarks.len() != 68 {
                return Err(AnalyzerError::Inference(format!(
                    "shape predictor returned {} points, expected 68",
                    landmarks.len()
                )));
            }
            let mut points = [(0.0, 0.0); 68];
            for (slot, p) in points.iter_mut().zip(landmarks.iter()) {
                *slot = (p.x() as f64, p.y() as f64);
            }

            let encodings = self.encoder.get_face_encodings(&matrix, &[landmarks], 0);
            let Some(face_encoding) = encodings.first() else {
                return Err(AnalyzerError::Inference(
                    "encoder produced no encoding for detected face".into(),
                ));
            };

            detections.push(Detection {
                bbox: BoundingBox {
                    x: rect.left as f64,
                    y: rect.top as f64,
                    width: (rect.right - rect.left) as f64,
                    height: (rect.bottom - rect.top) as f64,
                    // The HOG detector reports no score at this API level.
                    confidence: 1.0,
                },
                landmarks: Landmarks(points),
                encoding: Encoding::new(face_encoding.to_vec()),
            });
        }

        Ok(detections)
    }
}
