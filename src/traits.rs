//! Core types and the device seams the capture controller is written against.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::config::SerialSettings;
use crate::serial::{CommandStream, SerialError};
use crate::sink::SinkError;

/// Pixel format representation (e.g., YUYV, MJPG, RGB3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl FrameSize {
    /// Create a frame size.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Video format specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a new packed format specification.
    ///
    /// Stride and size are derived from the pixel format; MJPG frames are
    /// variable length, so their size is an upper bound of 2 bytes per pixel.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        let bytes_per_pixel = if matches!(fourcc.0, *b"RGB3") { 3 } else { 2 };
        let stride = width * bytes_per_pixel;
        let size = stride * height;
        Self {
            width,
            height,
            fourcc,
            stride,
            size,
        }
    }

    /// Frame dimensions of this format.
    #[must_use]
    pub const fn frame_size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// Metadata for a captured frame.
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Actual bytes used in the frame buffer.
    pub bytes_used: u32,
}

/// A captured video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw frame data.
    pub data: Vec<u8>,
    /// Layout of `data`.
    pub format: Format,
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

impl Frame {
    /// Whether the device handed back no image data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Frame dimensions.
    #[must_use]
    pub const fn size(&self) -> FrameSize {
        self.format.frame_size()
    }

    /// Get RGB values for a pixel at the specified coordinates.
    ///
    /// For YUYV at odd x coordinates the Y value of the second pixel in the
    /// pair is used with the shared U/V. Compressed frames have no pixels.
    #[must_use]
    pub fn pixel_at(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        if x >= self.format.width || y >= self.format.height {
            return None;
        }
        if self.format.fourcc == FourCC::RGB3 {
            let offset = (y * self.format.stride + x * 3) as usize;
            let &[r, g, b] = self.data.get(offset..offset + 3)? else {
                return None;
            };
            return Some((r, g, b));
        }
        if self.format.fourcc != FourCC::YUYV {
            return None;
        }

        // YUYV: [Y0 U Y1 V] per pixel pair
        let pair_x = x & !1;
        let offset = ((y * self.format.width + pair_x) * 2) as usize;

        let y_val = if x % 2 == 0 {
            *self.data.get(offset)?
        } else {
            *self.data.get(offset + 2)?
        };
        let u = *self.data.get(offset + 1)?;
        let v = *self.data.get(offset + 3)?;

        Some(yuv_to_rgb(y_val, u, v))
    }

    /// Packed 24-bit RGB copy of the frame.
    ///
    /// Returns `None` for compressed (MJPG) or truncated frames.
    #[must_use]
    pub fn to_rgb(&self) -> Option<Vec<u8>> {
        let pixels = (self.format.width as usize) * (self.format.height as usize);

        match self.format.fourcc {
            FourCC::RGB3 => self.data.get(..pixels * 3).map(<[u8]>::to_vec),
            FourCC::YUYV => {
                let packed = self.data.get(..pixels * 2)?;
                let mut rgb = Vec::with_capacity(pixels * 3);
                for quad in packed.chunks_exact(4) {
                    let &[y0, u, y1, v] = quad else {
                        return None;
                    };
                    let (r, g, b) = yuv_to_rgb(y0, u, v);
                    rgb.extend_from_slice(&[r, g, b]);
                    let (r, g, b) = yuv_to_rgb(y1, u, v);
                    rgb.extend_from_slice(&[r, g, b]);
                }
                Some(rgb)
            }
            _ => None,
        }
    }
}

/// Convert YUV values to RGB using the ITU-R BT.601 formula.
#[must_use]
#[allow(clippy::many_single_char_names)]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    let clamp = |val: f32| -> u8 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            val.clamp(0.0, 255.0) as u8
        }
    };

    (clamp(r), clamp(g), clamp(b))
}

/// Error type for camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Device with given index was not found.
    #[error("device {0} not found")]
    DeviceNotFound(u32),
    /// Failed to open device.
    #[error("failed to open device: {0}")]
    DeviceOpenFailed(String),
    /// Error during streaming operation.
    #[error("stream error: {0}")]
    StreamError(String),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Blocking source of decoded frames.
pub trait FrameAcquirer {
    /// Dimensions of the frames this device produces.
    fn frame_size(&self) -> FrameSize;

    /// Read the next frame.
    ///
    /// Returns `None` when the device yields nothing (end of stream,
    /// timeout, empty buffer). Never blocks past the device's own timeout.
    fn read_frame(&mut self) -> Option<Frame>;

    /// Release the device. Safe to call more than once.
    fn close(&mut self);
}

/// Append-only frame output stream.
pub trait FrameSink {
    /// Append one frame after every previously appended frame.
    fn append(&mut self, frame: &Frame) -> Result<(), SinkError>;

    /// Flush and release the stream. A no-op on a closed stream.
    fn close(&mut self) -> Result<(), SinkError>;
}

/// Live preview surface used by camera-only mode.
pub trait PreviewWindow {
    /// Display one frame.
    fn show(&mut self, frame: &Frame);

    /// Wait up to `timeout` for a local stop request.
    fn poll_stop(&mut self, timeout: Duration) -> bool;
}

/// Constructs every collaborator the capture controller owns.
pub trait DeviceFactory {
    /// Camera type.
    type Acquirer: FrameAcquirer;
    /// Output stream type.
    type Sink: FrameSink;
    /// Preview surface type.
    type Preview: PreviewWindow;

    /// Open the camera with the given index.
    fn open_camera(&mut self, camera_id: u32) -> Result<Self::Acquirer, CameraError>;

    /// Create an output stream at `path`.
    fn open_sink(&mut self, path: &Path, fps: u32, size: FrameSize)
        -> Result<Self::Sink, SinkError>;

    /// Open the serial line and subscribe to its chunks.
    fn open_serial(&mut self, settings: &SerialSettings) -> Result<CommandStream, SerialError>;

    /// Open the preview surface.
    fn open_preview(&mut self) -> Self::Preview;
}
