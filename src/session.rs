//! Capture session state and the serial trigger protocol.

use tracing::{debug, warn};

use crate::traits::{FrameAcquirer, FrameSink};

/// Byte that requests a frame to be saved.
pub const SAVE_COMMAND: u8 = b'a';
/// Byte that requests termination.
pub const QUIT_COMMAND: u8 = b'q';

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Initialized, loop not started.
    Idle,
    /// Camera-only preview loop running.
    Previewing,
    /// Recording mode waiting for serial commands.
    Armed,
    /// Loop finished or finishing.
    Terminated,
}

/// What a received chunk asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Save one frame.
    Save,
    /// Terminate.
    Quit,
    /// Save one frame now, terminate at the next dispatch boundary.
    SaveThenQuit,
}

impl Action {
    /// Inspect a chunk for command bytes anywhere in it.
    ///
    /// Save is checked before quit.
    #[must_use]
    pub fn from_chunk(chunk: &[u8]) -> Option<Self> {
        let save = chunk.contains(&SAVE_COMMAND);
        let quit = chunk.contains(&QUIT_COMMAND);
        match (save, quit) {
            (true, true) => Some(Self::SaveThenQuit),
            (true, false) => Some(Self::Save),
            (false, true) => Some(Self::Quit),
            (false, false) => None,
        }
    }
}

impl SessionState {
    /// Apply one chunk: the next state and the action to perform.
    ///
    /// Only an armed session reacts to serial input.
    #[must_use]
    pub fn on_chunk(self, chunk: &[u8]) -> (Self, Option<Action>) {
        if self != Self::Armed {
            return (self, None);
        }
        match Action::from_chunk(chunk) {
            Some(Action::Quit) => (Self::Terminated, Some(Action::Quit)),
            action => (self, action),
        }
    }
}

/// Operating mode, fixed at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Live preview only.
    CameraOnly,
    /// Serial-triggered persistence.
    Recording,
}

/// Everything a running capture owns.
///
/// The two constructors are the only way to build one, so a camera-only
/// session never has an output stream and a recording session always does.
#[derive(Debug)]
pub struct CaptureSession<A: FrameAcquirer, S: FrameSink> {
    camera: A,
    output: Option<S>,
    mode: Mode,
    frame_count: u64,
    ready: bool,
    state: SessionState,
    quit_pending: bool,
    released: bool,
}

impl<A: FrameAcquirer, S: FrameSink> CaptureSession<A, S> {
    /// Session with a camera and an output stream.
    pub fn recording(camera: A, output: S) -> Self {
        Self::new(camera, Some(output), Mode::Recording)
    }

    /// Session with a camera only.
    pub fn camera_only(camera: A) -> Self {
        Self::new(camera, None, Mode::CameraOnly)
    }

    fn new(camera: A, output: Option<S>, mode: Mode) -> Self {
        Self {
            camera,
            output,
            mode,
            frame_count: 0,
            ready: false,
            state: SessionState::Idle,
            quit_pending: false,
            released: false,
        }
    }

    /// Operating mode.
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Frames persisted so far.
    pub const fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Whether the loop has started.
    pub const fn is_ready(&self) -> bool {
        self.ready
    }

    /// Current state.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Whether a quit is waiting for the next dispatch boundary.
    pub const fn quit_pending(&self) -> bool {
        self.quit_pending
    }

    /// Whether the output stream is attached.
    pub const fn has_output(&self) -> bool {
        self.output.is_some()
    }

    /// Leave `Idle` for the mode's running state. A session only starts once.
    pub(crate) fn start(&mut self) -> bool {
        if self.state != SessionState::Idle {
            return false;
        }
        self.ready = true;
        self.state = match self.mode {
            Mode::CameraOnly => SessionState::Previewing,
            Mode::Recording => SessionState::Armed,
        };
        true
    }

    pub(crate) fn camera_mut(&mut self) -> &mut A {
        &mut self.camera
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    pub(crate) fn defer_quit(&mut self) {
        self.quit_pending = true;
    }

    pub(crate) fn take_pending_quit(&mut self) -> bool {
        std::mem::take(&mut self.quit_pending)
    }

    pub(crate) fn terminate(&mut self) {
        self.state = SessionState::Terminated;
    }

    /// Read one frame and append it to the output stream.
    ///
    /// Returns whether a frame was persisted; the counter moves only then.
    pub(crate) fn save_frame(&mut self) -> bool {
        let Some(output) = self.output.as_mut() else {
            warn!("save requested without an output stream");
            return false;
        };
        let Some(frame) = self.camera.read_frame() else {
            warn!("save requested but the camera returned no frame");
            return false;
        };
        if let Err(err) = output.append(&frame) {
            warn!("failed to append frame: {err}");
            return false;
        }
        self.frame_count += 1;
        debug!(
            frame = self.frame_count,
            sequence = frame.metadata.sequence,
            "saved frame"
        );
        true
    }

    /// Close the output stream and the camera. Runs at most once.
    pub(crate) fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        if let Some(output) = self.output.as_mut() {
            if let Err(err) = output.close() {
                warn!("failed to close output stream: {err}");
            }
        }
        self.camera.close();
    }
}

impl<A: FrameAcquirer, S: FrameSink> Drop for CaptureSession<A, S> {
    fn drop(&mut self) {
        self.release();
    }
}
