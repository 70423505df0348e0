//! V4L2 camera implementation using the v4l crate.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, trace, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream as V4lCaptureStream;
use v4l::video::Capture;
use v4l::Device;

use crate::traits::{
    CameraError, DeviceCapabilities, Format, FourCC, Frame, FrameAcquirer, FrameMetadata,
    FrameSize,
};

const BUFFER_COUNT: u32 = 4;
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(2);

/// A V4L2 camera streaming into mmap buffers.
pub struct V4l2Camera {
    // Declared before `device` so the buffers are unmapped first.
    stream: Option<Stream<'static>>,
    device: Option<Device>,
    capabilities: DeviceCapabilities,
    format: Format,
}

impl std::fmt::Debug for V4l2Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("V4l2Camera")
            .field("stream", &self.stream.is_some())
            .field("device", &"<v4l::Device>")
            .field("capabilities", &self.capabilities)
            .field("format", &self.format)
            .finish()
    }
}

impl V4l2Camera {
    /// Open a V4L2 device by index (e.g., 0 for /dev/video0).
    ///
    /// Requests YUYV at the device's current resolution; drivers that refuse
    /// keep whatever format they report back.
    pub fn open(index: u32) -> Result<Self, CameraError> {
        let device = Device::new(index as usize)
            .map_err(|err| CameraError::DeviceOpenFailed(format!("/dev/video{index}: {err}")))?;
        let capabilities = query_capabilities(&device)?;
        if !capabilities.can_capture {
            return Err(CameraError::DeviceOpenFailed(format!(
                "{} cannot capture video",
                capabilities.card
            )));
        }

        let mut fmt = device
            .format()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;
        fmt.fourcc = FourCC::YUYV.into();
        let fmt = device
            .set_format(&fmt)
            .map_err(|err| CameraError::StreamError(err.to_string()))?;
        let format = Format {
            width: fmt.width,
            height: fmt.height,
            fourcc: FourCC::from(fmt.fourcc),
            stride: fmt.stride,
            size: fmt.size,
        };
        debug!(card = %capabilities.card, ?format, "opened camera");

        Ok(Self {
            stream: None,
            device: Some(device),
            capabilities,
            format,
        })
    }

    /// Device capabilities.
    #[must_use]
    pub const fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    /// Negotiated capture format.
    #[must_use]
    pub const fn format(&self) -> &Format {
        &self.format
    }

    fn stream(&mut self) -> Result<&mut Stream<'static>, CameraError> {
        if self.stream.is_none() {
            let device = self
                .device
                .as_ref()
                .ok_or_else(|| CameraError::StreamError("device closed".to_owned()))?;
            let mut stream = Stream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
                .map_err(|err| CameraError::StreamError(err.to_string()))?;
            stream.set_timeout(DEQUEUE_TIMEOUT);
            self.stream = Some(stream);
        }
        self.stream
            .as_mut()
            .ok_or_else(|| CameraError::StreamError("stream unavailable".to_owned()))
    }

    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let format = self.format.clone();
        let (buf, meta) = self
            .stream()?
            .next()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        // V4L2 timestamps are always non-negative in practice
        #[allow(clippy::cast_sign_loss)]
        let secs = meta.timestamp.sec.max(0) as u64;
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let nanos = (meta.timestamp.usec.max(0) as u32).saturating_mul(1000);

        let used = buf.len().min(meta.bytesused as usize);
        Ok(Frame {
            data: buf.get(..used).unwrap_or_default().to_vec(),
            format,
            metadata: FrameMetadata {
                sequence: meta.sequence,
                timestamp: Duration::new(secs, nanos),
                bytes_used: meta.bytesused,
            },
        })
    }
}

impl FrameAcquirer for V4l2Camera {
    fn frame_size(&self) -> FrameSize {
        self.format.frame_size()
    }

    fn read_frame(&mut self) -> Option<Frame> {
        match self.next_frame() {
            Ok(frame) if frame.is_empty() => {
                trace!(sequence = frame.metadata.sequence, "empty frame");
                None
            }
            Ok(frame) => Some(frame),
            Err(err) => {
                warn!("frame read failed: {err}");
                None
            }
        }
    }

    fn close(&mut self) {
        let had_stream = self.stream.take().is_some();
        if self.device.take().is_some() {
            debug!(card = %self.capabilities.card, had_stream, "released camera");
        }
    }
}

impl Drop for V4l2Camera {
    fn drop(&mut self) {
        self.close();
    }
}

fn query_capabilities(device: &Device) -> Result<DeviceCapabilities, CameraError> {
    let caps = device
        .query_caps()
        .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

    Ok(DeviceCapabilities {
        driver: caps.driver,
        card: caps.card,
        bus_info: caps.bus,
        can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
        can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
    })
}

/// A video device node found on the system.
#[derive(Debug, Clone)]
pub struct CameraInfo {
    /// Index usable with [`V4l2Camera::open`].
    pub index: u32,
    /// Device node path.
    pub path: PathBuf,
    /// Name reported by the driver.
    pub name: String,
    /// Capabilities, if the node could be queried.
    pub capabilities: Option<DeviceCapabilities>,
}

/// Enumerate `/dev/video*` nodes.
#[must_use]
pub fn list_cameras() -> Vec<CameraInfo> {
    let mut cameras: Vec<CameraInfo> = v4l::context::enum_devices()
        .into_iter()
        .map(|node| {
            let index = u32::try_from(node.index()).unwrap_or(u32::MAX);
            let capabilities = Device::new(node.index())
                .ok()
                .and_then(|device| query_capabilities(&device).ok());
            CameraInfo {
                index,
                path: node.path().to_path_buf(),
                name: node.name().unwrap_or_default(),
                capabilities,
            }
        })
        .collect();
    cameras.sort_by_key(|camera| camera.index);
    cameras
}
