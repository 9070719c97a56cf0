//! rollcall-hw — Hardware abstraction for camera capture.
//!
//! Provides V4L2-based camera access behind the [`FrameSource`] trait the
//! verification engine consumes. Frames are delivered in capture order;
//! dropping frames under load is fine, reordering is not.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, FrameSource, PixelFormat};
pub use frame::Frame;
