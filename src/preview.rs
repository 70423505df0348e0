//! Terminal preview for camera-only mode.

use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use tracing::{info, warn};

use crate::traits::{Frame, PreviewWindow};

/// Prints a status line per frame; pressing Enter stops the preview.
#[derive(Debug)]
pub struct TerminalPreview {
    keys: Receiver<()>,
    stdin_closed: bool,
}

impl TerminalPreview {
    /// Start watching stdin for a stop request.
    #[must_use]
    pub fn new() -> Self {
        let (tx, keys) = mpsc::channel();
        let watcher = std::thread::Builder::new()
            .name("preview-stdin".to_owned())
            .spawn(move || {
                let mut line = String::new();
                let mut stdin = std::io::stdin().lock();
                while matches!(stdin.read_line(&mut line), Ok(n) if n > 0) {
                    if tx.send(()).is_err() {
                        break;
                    }
                    line.clear();
                }
            });
        match watcher {
            Ok(_) => info!("press Enter to stop the preview"),
            Err(err) => warn!("no stop key available: {err}"),
        }

        Self {
            keys,
            stdin_closed: false,
        }
    }
}

impl Default for TerminalPreview {
    fn default() -> Self {
        Self::new()
    }
}

impl PreviewWindow for TerminalPreview {
    fn show(&mut self, frame: &Frame) {
        println!("{}", status_line(frame));
    }

    fn poll_stop(&mut self, timeout: Duration) -> bool {
        if self.stdin_closed {
            std::thread::sleep(timeout);
            return false;
        }
        match self.keys.recv_timeout(timeout) {
            Ok(()) => true,
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                warn!("stdin closed; the preview can only be stopped by signal");
                self.stdin_closed = true;
                false
            }
        }
    }
}

/// One preview line: sequence, size, payload length, center pixel, timestamp.
fn status_line(frame: &Frame) -> String {
    let size = frame.size();
    let center = frame
        .pixel_at(size.width / 2, size.height / 2)
        .map_or_else(|| "n/a".to_owned(), |(r, g, b)| format!("#{r:02x}{g:02x}{b:02x}"));
    format!(
        "Frame {}: {} {} bytes, center {}, timestamp: {:?}",
        frame.metadata.sequence,
        size,
        frame.data.len(),
        center,
        frame.metadata.timestamp
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{Format, FourCC, FrameMetadata};

    fn gray_frame(fourcc: FourCC) -> Frame {
        let format = Format::new(4, 2, fourcc);
        Frame {
            data: vec![128; format.size as usize],
            format,
            metadata: FrameMetadata {
                sequence: 7,
                timestamp: Duration::from_millis(40),
                bytes_used: 16,
            },
        }
    }

    #[test]
    fn test_status_line_reports_center_pixel() {
        let line = status_line(&gray_frame(FourCC::YUYV));
        assert!(line.starts_with("Frame 7: 4x2 16 bytes"), "{line}");
        assert!(line.contains("center #"), "{line}");
    }

    #[test]
    fn test_status_line_without_decodable_pixels() {
        let line = status_line(&gray_frame(FourCC::MJPG));
        assert!(line.contains("center n/a"), "{line}");
    }

    #[test]
    fn test_closed_stdin_never_stops_and_is_remembered() {
        let (tx, keys) = mpsc::channel();
        drop(tx);
        let mut preview = TerminalPreview {
            keys,
            stdin_closed: false,
        };

        assert!(!preview.poll_stop(Duration::ZERO));
        assert!(preview.stdin_closed);
        assert!(!preview.poll_stop(Duration::ZERO));
    }

    #[test]
    fn test_key_press_stops() {
        let (tx, keys) = mpsc::channel();
        let mut preview = TerminalPreview {
            keys,
            stdin_closed: false,
        };
        tx.send(()).expect("receiver alive");
        assert!(preview.poll_stop(Duration::from_millis(10)));
        assert!(!preview.poll_stop(Duration::ZERO));
    }
}
