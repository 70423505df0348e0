//! Frame sink writing a Motion-JPEG AVI file.
//!
//! Layout (all sizes little endian):
//!
//! ```text
//! RIFF 'AVI '
//!   LIST 'hdrl'
//!     avih                    main header, total frame count patched on close
//!     LIST 'strl'
//!       strh 'vids' 'MJPG'    stream header, length patched on close
//!       strf                  BITMAPINFOHEADER
//!   LIST 'movi'
//!     00dc <jpeg> ...         one chunk per appended frame
//!   idx1                      written on close
//! ```

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use thiserror::Error;
use tracing::{debug, warn};

use crate::traits::{FourCC, Frame, FrameSink, FrameSize};

const JPEG_QUALITY: u8 = 90;
const AVIF_HASINDEX: u32 = 0x10;
const AVIIF_KEYFRAME: u32 = 0x10;
const MAIN_HEADER_LEN: u32 = 56;
const STREAM_HEADER_LEN: u32 = 56;
const BITMAP_INFO_LEN: u32 = 40;

/// Errors creating or writing the output stream.
#[derive(Debug, Error)]
pub enum SinkError {
    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Frame could not be compressed.
    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    /// Frame dimensions differ from the stream's.
    #[error("frame is {actual}, stream expects {expected}")]
    SizeMismatch {
        /// Stream frame size.
        expected: FrameSize,
        /// Appended frame size.
        actual: FrameSize,
    },
    /// Frame data cannot be converted to RGB.
    #[error("cannot encode {0:?} frame data")]
    UnsupportedFormat(FourCC),
    /// Frame rate of zero.
    #[error("frame rate must be positive")]
    InvalidFrameRate,
    /// Stream has been closed.
    #[error("output stream is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    offset: u32,
    size: u32,
}

/// Byte offsets of the header fields that are only known on close.
#[derive(Debug, Clone, Copy)]
struct Placeholders {
    riff_size: u64,
    total_frames: u64,
    suggested_buffer: u64,
    stream_length: u64,
    stream_buffer: u64,
    movi_size: u64,
    movi_start: u64,
}

/// Append-only MJPEG AVI writer.
#[derive(Debug)]
pub struct AviWriter {
    file: Option<BufWriter<File>>,
    size: FrameSize,
    fps: u32,
    index: Vec<IndexEntry>,
    placeholders: Placeholders,
    largest_chunk: u32,
}

impl AviWriter {
    /// Create `path` and write the stream headers.
    pub fn create(path: &Path, fps: u32, size: FrameSize) -> Result<Self, SinkError> {
        if fps == 0 {
            return Err(SinkError::InvalidFrameRate);
        }

        let mut file = BufWriter::new(File::create(path)?);
        let placeholders = write_headers(&mut file, fps, size)?;
        debug!(path = %path.display(), %size, fps, "opened output stream");

        Ok(Self {
            file: Some(file),
            size,
            fps,
            index: Vec::new(),
            placeholders,
            largest_chunk: 0,
        })
    }

    /// Frame rate the stream was opened with.
    #[must_use]
    pub const fn fps(&self) -> u32 {
        self.fps
    }

    /// Frames appended so far.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.index.len()
    }

    fn encode(&self, frame: &Frame) -> Result<Vec<u8>, SinkError> {
        if frame.size() != self.size {
            return Err(SinkError::SizeMismatch {
                expected: self.size,
                actual: frame.size(),
            });
        }
        if frame.format.fourcc == FourCC::MJPG {
            return Ok(frame.data.clone());
        }

        let rgb = frame
            .to_rgb()
            .ok_or(SinkError::UnsupportedFormat(frame.format.fourcc))?;
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode(
            &rgb,
            self.size.width,
            self.size.height,
            ExtendedColorType::Rgb8,
        )?;
        Ok(jpeg)
    }

    fn finish(&mut self, mut file: BufWriter<File>) -> Result<(), SinkError> {
        let p = self.placeholders;
        let movi_end = file.stream_position()?;

        file.write_all(b"idx1")?;
        write_u32(&mut file, len_u32(self.index.len() * 16))?;
        for entry in &self.index {
            file.write_all(b"00dc")?;
            write_u32(&mut file, AVIIF_KEYFRAME)?;
            write_u32(&mut file, entry.offset)?;
            write_u32(&mut file, entry.size)?;
        }
        let file_end = file.stream_position()?;

        let frames = len_u32(self.index.len());
        patch(&mut file, p.riff_size, len_u32(file_end - 8))?;
        patch(&mut file, p.total_frames, frames)?;
        patch(&mut file, p.suggested_buffer, self.largest_chunk)?;
        patch(&mut file, p.stream_length, frames)?;
        patch(&mut file, p.stream_buffer, self.largest_chunk)?;
        // 'movi' tag plus chunks
        patch(&mut file, p.movi_size, len_u32(movi_end - p.movi_start))?;

        file.seek(SeekFrom::End(0))?;
        file.flush()?;
        Ok(())
    }
}

impl FrameSink for AviWriter {
    fn append(&mut self, frame: &Frame) -> Result<(), SinkError> {
        if self.file.is_none() {
            return Err(SinkError::Closed);
        }
        let jpeg = self.encode(frame)?;
        let movi_start = self.placeholders.movi_start;
        let file = self.file.as_mut().ok_or(SinkError::Closed)?;

        let chunk_start = file.stream_position()?;
        let size = len_u32(jpeg.len());
        file.write_all(b"00dc")?;
        write_u32(file, size)?;
        file.write_all(&jpeg)?;
        if jpeg.len() % 2 == 1 {
            file.write_all(&[0])?;
        }

        self.index.push(IndexEntry {
            offset: len_u32(chunk_start - movi_start),
            size,
        });
        self.largest_chunk = self.largest_chunk.max(size);
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        match self.file.take() {
            Some(file) => {
                self.finish(file)?;
                debug!(frames = self.index.len(), "closed output stream");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for AviWriter {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("failed to finalize output stream: {err}");
        }
    }
}

fn len_u32<T: TryInto<u32>>(len: T) -> u32 {
    len.try_into().unwrap_or(u32::MAX)
}

fn write_u32<W: Write>(w: &mut W, value: u32) -> std::io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

fn write_u16<W: Write>(w: &mut W, value: u16) -> std::io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

fn patch<W: Write + Seek>(w: &mut W, at: u64, value: u32) -> std::io::Result<()> {
    w.seek(SeekFrom::Start(at))?;
    write_u32(w, value)
}

#[allow(clippy::cast_possible_truncation)]
fn write_headers<W: Write + Seek>(
    w: &mut W,
    fps: u32,
    size: FrameSize,
) -> Result<Placeholders, SinkError> {
    let strl_len = 4 + (8 + STREAM_HEADER_LEN) + (8 + BITMAP_INFO_LEN);
    let hdrl_len = 4 + (8 + MAIN_HEADER_LEN) + (8 + strl_len);
    let image_bytes = size.width * size.height * 3;

    w.write_all(b"RIFF")?;
    let riff_size = w.stream_position()?;
    write_u32(w, 0)?;
    w.write_all(b"AVI ")?;

    w.write_all(b"LIST")?;
    write_u32(w, hdrl_len)?;
    w.write_all(b"hdrl")?;

    w.write_all(b"avih")?;
    write_u32(w, MAIN_HEADER_LEN)?;
    write_u32(w, 1_000_000 / fps)?; // microseconds per frame
    write_u32(w, image_bytes.saturating_mul(fps))?; // max bytes per second
    write_u32(w, 0)?; // padding granularity
    write_u32(w, AVIF_HASINDEX)?;
    let total_frames = w.stream_position()?;
    write_u32(w, 0)?;
    write_u32(w, 0)?; // initial frames
    write_u32(w, 1)?; // streams
    let suggested_buffer = w.stream_position()?;
    write_u32(w, 0)?;
    write_u32(w, size.width)?;
    write_u32(w, size.height)?;
    w.write_all(&[0; 16])?; // reserved

    w.write_all(b"LIST")?;
    write_u32(w, strl_len)?;
    w.write_all(b"strl")?;

    w.write_all(b"strh")?;
    write_u32(w, STREAM_HEADER_LEN)?;
    w.write_all(b"vids")?;
    w.write_all(b"MJPG")?;
    write_u32(w, 0)?; // flags
    write_u16(w, 0)?; // priority
    write_u16(w, 0)?; // language
    write_u32(w, 0)?; // initial frames
    write_u32(w, 1)?; // scale
    write_u32(w, fps)?; // rate
    write_u32(w, 0)?; // start
    let stream_length = w.stream_position()?;
    write_u32(w, 0)?;
    let stream_buffer = w.stream_position()?;
    write_u32(w, 0)?;
    write_u32(w, u32::MAX)?; // default quality
    write_u32(w, 0)?; // sample size
    write_u16(w, 0)?;
    write_u16(w, 0)?;
    write_u16(w, size.width.min(u32::from(u16::MAX)) as u16)?;
    write_u16(w, size.height.min(u32::from(u16::MAX)) as u16)?;

    w.write_all(b"strf")?;
    write_u32(w, BITMAP_INFO_LEN)?;
    write_u32(w, BITMAP_INFO_LEN)?;
    write_u32(w, size.width)?;
    write_u32(w, size.height)?;
    write_u16(w, 1)?; // planes
    write_u16(w, 24)?; // bit count
    w.write_all(b"MJPG")?;
    write_u32(w, image_bytes)?;
    w.write_all(&[0; 16])?; // resolution and palette

    w.write_all(b"LIST")?;
    let movi_size = w.stream_position()?;
    write_u32(w, 0)?;
    let movi_start = w.stream_position()?;
    w.write_all(b"movi")?;

    Ok(Placeholders {
        riff_size,
        total_frames,
        suggested_buffer,
        stream_length,
        stream_buffer,
        movi_size,
        movi_start,
    })
}
