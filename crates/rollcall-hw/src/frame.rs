//! Frame type and image helpers — YUYV conversion and dark-frame detection.

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }
}

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("buffer too short: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
/// Grayscale = every even-indexed byte.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Check if a frame is dark using a low-intensity pixel count.
///
/// Returns true if more than `threshold_pct` of pixels fall below 32.
/// Frames captured before auto-exposure settles look like this and carry
/// no usable face signal.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_extracts_y_channel() {
        // Two pixels: Y0=10 U=20 Y1=30 V=40
        let yuyv = [10u8, 20, 30, 40];
        let gray = yuyv_to_grayscale(&yuyv, 2, 1).unwrap();
        assert_eq!(gray, vec![10, 30]);
    }

    #[test]
    fn yuyv_short_buffer_rejected() {
        let err = yuyv_to_grayscale(&[0u8; 3], 2, 1).unwrap_err();
        assert!(matches!(
            err,
            FrameError::InvalidLength {
                expected: 4,
                actual: 3
            }
        ));
    }

    #[test]
    fn dark_frame_detection() {
        assert!(is_dark_frame(&vec![0u8; 1000], 0.95));
        assert!(!is_dark_frame(&vec![128u8; 1000], 0.95));
        assert!(is_dark_frame(&[], 0.95));
    }

    #[test]
    fn avg_brightness() {
        let frame = Frame {
            data: vec![0, 255],
            width: 2,
            height: 1,
            timestamp: std::time::Instant::now(),
            sequence: 0,
            is_dark: false,
        };
        assert!((frame.avg_brightness() - 127.5).abs() < 1e-3);
    }
}
