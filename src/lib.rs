//! Trigger-Capture: serial-triggered frame capture from a V4L2 camera.
//!
//! A [`CaptureController`] owns a camera and an MJPEG AVI output stream and
//! listens on a UART: an `a` byte saves the next frame, a `q` byte ends the
//! session. A camera-only mode previews frames without recording. Devices
//! are built through the [`DeviceFactory`] trait so the controller runs
//! against mock devices in tests.

pub mod backend;
pub mod config;
pub mod controller;
pub mod device;
pub mod preview;
pub mod serial;
pub mod session;
pub mod sink;
pub mod traits;

#[cfg(test)]
pub mod mock;

pub use backend::SystemDevices;
pub use config::SerialSettings;
pub use controller::{CaptureController, InitError, RunSummary};
pub use device::{list_cameras, CameraInfo, V4l2Camera};
pub use serial::{CommandStream, SerialCommandSource};
pub use session::{Action, CaptureSession, Mode, SessionState};
pub use sink::AviWriter;
pub use traits::{
    DeviceCapabilities, DeviceFactory, Format, FourCC, Frame, FrameAcquirer, FrameMetadata,
    FrameSink, FrameSize, PreviewWindow,
};
