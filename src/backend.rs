//! Real devices: V4L2 camera, AVI file, serial port, terminal preview.

use std::path::Path;

use crate::config::SerialSettings;
use crate::device::V4l2Camera;
use crate::preview::TerminalPreview;
use crate::serial::{CommandStream, SerialCommandSource, SerialError};
use crate::sink::{AviWriter, SinkError};
use crate::traits::{CameraError, DeviceFactory, FrameSize};

/// Factory for the devices attached to this machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDevices;

impl DeviceFactory for SystemDevices {
    type Acquirer = V4l2Camera;
    type Sink = AviWriter;
    type Preview = TerminalPreview;

    fn open_camera(&mut self, camera_id: u32) -> Result<V4l2Camera, CameraError> {
        V4l2Camera::open(camera_id)
    }

    fn open_sink(&mut self, path: &Path, fps: u32, size: FrameSize) -> Result<AviWriter, SinkError> {
        AviWriter::create(path, fps, size)
    }

    fn open_serial(&mut self, settings: &SerialSettings) -> Result<CommandStream, SerialError> {
        SerialCommandSource::open(settings).map(SerialCommandSource::subscribe)
    }

    fn open_preview(&mut self) -> TerminalPreview {
        TerminalPreview::new()
    }
}
