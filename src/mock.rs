//! Mock devices for testing the controller without hardware.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use crate::config::SerialSettings;
use crate::serial::{ChunkSender, CommandStream, SerialError};
use crate::sink::SinkError;
use crate::traits::{
    CameraError, DeviceFactory, Format, FourCC, Frame, FrameAcquirer, FrameMetadata, FrameSink,
    FrameSize, PreviewWindow,
};

/// Everything the mocks were asked to do.
#[derive(Debug, Clone, Default)]
pub struct MockLog {
    /// Camera ids opened.
    pub camera_opens: Vec<u32>,
    /// Camera `close` calls that released something.
    pub camera_closes: u32,
    /// `read_frame` calls.
    pub frames_read: u32,
    /// Output streams opened: path, fps, size.
    pub sink_opens: Vec<(PathBuf, u32, FrameSize)>,
    /// Sequence numbers appended, in order.
    pub appended: Vec<u32>,
    /// Sink `close` calls that released something.
    pub sink_closes: u32,
    /// Serial open attempts.
    pub serial_opens: u32,
    /// Preview surfaces opened.
    pub preview_opens: u32,
    /// Frames shown in the preview.
    pub frames_shown: u32,
}

type SharedLog = Rc<RefCell<MockLog>>;

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
}

/// Mock camera producing YUYV test patterns.
#[derive(Debug)]
pub struct MockCamera {
    log: SharedLog,
    format: Format,
    pattern: TestPattern,
    sequence: u32,
    empty_reads: u32,
    open: bool,
}

impl FrameAcquirer for MockCamera {
    fn frame_size(&self) -> FrameSize {
        self.format.frame_size()
    }

    fn read_frame(&mut self) -> Option<Frame> {
        self.log.borrow_mut().frames_read += 1;
        if self.empty_reads > 0 {
            self.empty_reads -= 1;
            return None;
        }

        let sequence = self.sequence;
        self.sequence += 1;
        Some(Frame {
            data: generate_test_frame(&self.format, self.pattern),
            format: self.format.clone(),
            metadata: FrameMetadata {
                sequence,
                timestamp: Duration::from_millis(u64::from(sequence) * 40), // 25fps
                bytes_used: self.format.size,
            },
        })
    }

    fn close(&mut self) {
        if std::mem::take(&mut self.open) {
            self.log.borrow_mut().camera_closes += 1;
        }
    }
}

/// Mock output stream remembering what was appended.
#[derive(Debug)]
pub struct MockSink {
    log: SharedLog,
    reject_appends: bool,
    open: bool,
}

impl FrameSink for MockSink {
    fn append(&mut self, frame: &Frame) -> Result<(), SinkError> {
        if !self.open {
            return Err(SinkError::Closed);
        }
        if self.reject_appends {
            return Err(SinkError::UnsupportedFormat(frame.format.fourcc));
        }
        self.log.borrow_mut().appended.push(frame.metadata.sequence);
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        if std::mem::take(&mut self.open) {
            self.log.borrow_mut().sink_closes += 1;
        }
        Ok(())
    }
}

/// Mock preview that asks to stop after a fixed number of polls.
#[derive(Debug)]
pub struct MockPreview {
    log: SharedLog,
    stop_after: Option<u32>,
    polls: u32,
}

impl PreviewWindow for MockPreview {
    fn show(&mut self, _frame: &Frame) {
        self.log.borrow_mut().frames_shown += 1;
    }

    fn poll_stop(&mut self, _timeout: Duration) -> bool {
        self.polls += 1;
        self.stop_after.is_some_and(|limit| self.polls >= limit)
    }
}

/// Mock device factory with switchable failures.
#[derive(Debug)]
pub struct MockDevices {
    log: SharedLog,
    format: Format,
    fail_camera: bool,
    fail_sink: bool,
    fail_serial: bool,
    reject_appends: bool,
    empty_reads: u32,
    stop_preview_after: Option<u32>,
    serial: RefCell<Option<ChunkSender>>,
}

impl Default for MockDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevices {
    /// Factory whose devices all work, producing 64x48 YUYV frames.
    #[must_use]
    pub fn new() -> Self {
        Self {
            log: SharedLog::default(),
            format: Format::new(64, 48, FourCC::YUYV),
            fail_camera: false,
            fail_sink: false,
            fail_serial: false,
            reject_appends: false,
            empty_reads: 0,
            stop_preview_after: None,
            serial: RefCell::new(None),
        }
    }

    /// Camera open fails.
    #[must_use]
    pub fn failing_camera(mut self) -> Self {
        self.fail_camera = true;
        self
    }

    /// Output stream open fails.
    #[must_use]
    pub fn failing_sink(mut self) -> Self {
        self.fail_sink = true;
        self
    }

    /// Serial open fails.
    #[must_use]
    pub fn failing_serial(mut self) -> Self {
        self.fail_serial = true;
        self
    }

    /// Every append fails.
    #[must_use]
    pub fn rejecting_appends(mut self) -> Self {
        self.reject_appends = true;
        self
    }

    /// The first `count` reads return nothing.
    #[must_use]
    pub fn empty_reads(mut self, count: u32) -> Self {
        self.empty_reads = count;
        self
    }

    /// The preview requests a stop on its `polls`-th poll.
    #[must_use]
    pub fn stop_preview_after(mut self, polls: u32) -> Self {
        self.stop_preview_after = Some(polls);
        self
    }

    /// Snapshot of the recorded calls.
    #[must_use]
    pub fn log(&self) -> MockLog {
        self.log.borrow().clone()
    }

    /// Sender feeding the opened serial stream.
    #[must_use]
    pub fn serial_sender(&self) -> Option<ChunkSender> {
        self.serial.borrow().clone()
    }

    /// Drop the factory's own sender so the stream can end.
    pub fn drop_serial_sender(&self) {
        self.serial.borrow_mut().take();
    }
}

impl DeviceFactory for MockDevices {
    type Acquirer = MockCamera;
    type Sink = MockSink;
    type Preview = MockPreview;

    fn open_camera(&mut self, camera_id: u32) -> Result<MockCamera, CameraError> {
        if self.fail_camera {
            return Err(CameraError::DeviceNotFound(camera_id));
        }
        self.log.borrow_mut().camera_opens.push(camera_id);
        Ok(MockCamera {
            log: Rc::clone(&self.log),
            format: self.format.clone(),
            pattern: if camera_id % 2 == 0 {
                TestPattern::ColorBars
            } else {
                TestPattern::Gradient
            },
            sequence: 0,
            empty_reads: self.empty_reads,
            open: true,
        })
    }

    fn open_sink(&mut self, path: &Path, fps: u32, size: FrameSize) -> Result<MockSink, SinkError> {
        if self.fail_sink {
            return Err(SinkError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )));
        }
        self.log
            .borrow_mut()
            .sink_opens
            .push((path.to_path_buf(), fps, size));
        Ok(MockSink {
            log: Rc::clone(&self.log),
            reject_appends: self.reject_appends,
            open: true,
        })
    }

    fn open_serial(&mut self, settings: &SerialSettings) -> Result<CommandStream, SerialError> {
        self.log.borrow_mut().serial_opens += 1;
        if self.fail_serial {
            return Err(SerialError::Unsupported {
                field: "port",
                value: settings.port_name.clone(),
            });
        }
        let (tx, stream) = CommandStream::channel();
        *self.serial.borrow_mut() = Some(tx);
        Ok(stream)
    }

    fn open_preview(&mut self) -> MockPreview {
        self.log.borrow_mut().preview_opens += 1;
        MockPreview {
            log: Rc::clone(&self.log),
            stop_after: self.stop_preview_after,
            polls: 0,
        }
    }
}

/// Generate test frame data based on pattern.
fn generate_test_frame(format: &Format, pattern: TestPattern) -> Vec<u8> {
    let size = (format.width * format.height * 2) as usize; // YUYV = 2 bytes/pixel
    let mut data = vec![0u8; size];

    match pattern {
        TestPattern::ColorBars => generate_color_bars(&mut data, format.width, format.height),
        TestPattern::Gradient => generate_gradient(&mut data, format.width, format.height),
    }

    data
}

/// Generate YUYV color bars pattern.
fn generate_color_bars(data: &mut [u8], width: u32, height: u32) {
    // White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    let bars: [(u8, u8, u8); 8] = [
        (235, 128, 128),
        (210, 16, 146),
        (170, 166, 16),
        (145, 54, 34),
        (106, 202, 222),
        (81, 90, 240),
        (41, 240, 110),
        (16, 128, 128),
    ];
    let bar_width = (width / 8).max(1);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let (y_val, u_val, v_val) = bars[((x / bar_width).min(7)) as usize];
            let offset = ((y * width + x) * 2) as usize;
            if let Some(quad) = data.get_mut(offset..offset + 4) {
                quad.copy_from_slice(&[y_val, u_val, y_val, v_val]);
            }
        }
    }
}

/// Generate YUYV horizontal gradient pattern.
fn generate_gradient(data: &mut [u8], width: u32, height: u32) {
    for y in 0..height {
        for x in (0..width).step_by(2) {
            #[allow(clippy::cast_possible_truncation)]
            let y_val = ((x * 255) / width) as u8;
            let offset = ((y * width + x) * 2) as usize;
            if let Some(quad) = data.get_mut(offset..offset + 4) {
                quad.copy_from_slice(&[y_val, 128, y_val, 128]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_camera_sequence() {
        let mut devices = MockDevices::new();
        let mut camera = devices.open_camera(0).expect("open_camera should succeed");
        assert_eq!(camera.frame_size(), FrameSize::new(64, 48));

        let frame1 = camera.read_frame().expect("frame");
        assert_eq!(frame1.metadata.sequence, 0);
        assert_eq!(frame1.data.len(), 64 * 48 * 2);

        let frame2 = camera.read_frame().expect("frame");
        assert_eq!(frame2.metadata.sequence, 1);
        assert_eq!(devices.log().frames_read, 2);
    }

    #[test]
    fn test_color_bars_pattern() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::ColorBars);
        assert_eq!(data.len(), 640 * 480 * 2);
        // First bar is white
        assert_eq!(data[0], 235);
    }

    #[test]
    fn test_gradient_pattern() {
        let format = Format::new(640, 480, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::Gradient);
        assert!(data[0] < 10);
        let last_row_start = 479 * 640 * 2;
        assert!(data[last_row_start + 638 * 2] > 200);
    }

    #[test]
    fn test_close_counts_once() {
        let mut devices = MockDevices::new();
        let mut camera = devices.open_camera(0).expect("camera");
        camera.close();
        camera.close();
        let mut sink = devices
            .open_sink(Path::new("x.avi"), 25, FrameSize::new(64, 48))
            .expect("sink");
        sink.close().expect("close");
        sink.close().expect("close");

        let log = devices.log();
        assert_eq!(log.camera_closes, 1);
        assert_eq!(log.sink_closes, 1);
    }
}
