//! The capture controller: owns the session and runs the event loop.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SerialSettings;
use crate::serial::CommandStream;
use crate::session::{Action, CaptureSession, Mode, SessionState};
use crate::sink::SinkError;
use crate::traits::{CameraError, DeviceFactory, FrameAcquirer, PreviewWindow};

/// Frame rate used until one is given.
pub const DEFAULT_FPS: u32 = 25;
/// How long the preview waits for a stop request per iteration.
pub const PREVIEW_POLL: Duration = Duration::from_millis(30);
/// Pause between opening the camera and probing its frame size.
pub const DEFAULT_WARMUP: Duration = Duration::from_millis(1);

/// Initialization failures. The controller stays uninitialized.
#[derive(Debug, Error)]
pub enum InitError {
    /// The camera could not be opened.
    #[error("cannot open camera {camera_id}: {source}")]
    CameraUnavailable {
        /// Requested camera.
        camera_id: u32,
        /// Device error.
        source: CameraError,
    },
    /// The output stream could not be created.
    #[error("could not open the output video {} for write: {source}", .path.display())]
    OutputUnavailable {
        /// Requested output file.
        path: PathBuf,
        /// Writer error.
        source: SinkError,
    },
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Mode the loop ran in, `None` if there was no session.
    pub mode: Option<Mode>,
    /// Frames persisted over the session's lifetime.
    pub frames_saved: u64,
    /// Preview iterations performed.
    pub preview_iterations: u64,
}

enum Event {
    Chunk(Option<Vec<u8>>),
    Interrupt,
}

/// Coordinates the camera, the output stream and the serial commands.
pub struct CaptureController<F: DeviceFactory> {
    factory: F,
    session: Option<CaptureSession<F::Acquirer, F::Sink>>,
    commands: Option<CommandStream>,
    serial_settings: SerialSettings,
    fps: u32,
    warmup: Duration,
}

impl<F: DeviceFactory> CaptureController<F> {
    /// Controller with in-code serial defaults and no session.
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            session: None,
            commands: None,
            serial_settings: SerialSettings::default(),
            fps: DEFAULT_FPS,
            warmup: DEFAULT_WARMUP,
        }
    }

    /// Set the device warm-up delay applied once after opening the camera.
    #[must_use]
    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    /// Replace the serial settings used by the next [`Self::initialize`].
    pub fn set_serial_settings(&mut self, settings: SerialSettings) {
        debug!(%settings, "new serial configuration");
        self.serial_settings = settings;
    }

    /// Load serial settings from an XML file, or its fallback defaults.
    pub fn load_serial_config(&mut self, path: &Path) {
        self.set_serial_settings(SerialSettings::load_or_fallback(path));
    }

    /// Serial settings currently loaded.
    pub const fn serial_settings(&self) -> &SerialSettings {
        &self.serial_settings
    }

    /// Target frame rate.
    pub const fn frame_rate(&self) -> u32 {
        self.fps
    }

    /// The live session, if initialized.
    pub const fn session(&self) -> Option<&CaptureSession<F::Acquirer, F::Sink>> {
        self.session.as_ref()
    }

    /// Whether serial commands can arrive.
    pub const fn has_serial_input(&self) -> bool {
        self.commands.is_some()
    }

    /// The device factory.
    pub const fn factory(&self) -> &F {
        &self.factory
    }

    /// Update the target frame rate.
    ///
    /// An already-open output stream keeps the rate it was opened with.
    pub fn set_frame_rate(&mut self, fps: u32) {
        if self.fps == fps {
            return;
        }
        self.fps = fps;
        if self.session.as_ref().is_some_and(CaptureSession::has_output) {
            debug!(fps, "frame rate changed; the open output stream keeps its rate");
        }
    }

    fn already_initialized(&self) -> bool {
        if self.session.is_some() {
            warn!("camera already initialized");
            return true;
        }
        false
    }

    fn open_camera(&mut self, camera_id: u32) -> Result<F::Acquirer, InitError> {
        let camera = self
            .factory
            .open_camera(camera_id)
            .map_err(|source| InitError::CameraUnavailable { camera_id, source })?;
        if !self.warmup.is_zero() {
            std::thread::sleep(self.warmup);
        }
        Ok(camera)
    }

    /// Open camera, output stream and serial line for recording.
    ///
    /// A serial failure is logged and leaves the session without serial
    /// input. Calling this on an initialized controller does nothing.
    pub fn initialize(&mut self, camera_id: u32, fps: u32, path: &Path) -> Result<(), InitError> {
        if self.already_initialized() {
            return Ok(());
        }

        let mut camera = self.open_camera(camera_id)?;
        let size = camera.frame_size();
        let output = match self.factory.open_sink(path, fps, size) {
            Ok(output) => output,
            Err(source) => {
                camera.close();
                return Err(InitError::OutputUnavailable {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        self.fps = fps;
        info!(camera_id, %size, fps, path = %path.display(), "recording initialized");

        self.commands = match self.factory.open_serial(&self.serial_settings) {
            Ok(commands) => Some(commands),
            Err(err) => {
                warn!("serial line unavailable, running without commands: {err}");
                None
            }
        };

        self.session = Some(CaptureSession::recording(camera, output));
        Ok(())
    }

    /// Open the camera alone for preview.
    ///
    /// Calling this on an initialized controller does nothing.
    pub fn initialize_camera_only(&mut self, camera_id: u32) -> Result<(), InitError> {
        if self.already_initialized() {
            return Ok(());
        }

        let camera = self.open_camera(camera_id)?;
        self.fps = DEFAULT_FPS;
        info!(camera_id, size = %camera.frame_size(), "preview initialized");
        self.session = Some(CaptureSession::camera_only(camera));
        Ok(())
    }

    /// Read one frame and append it to the output stream.
    pub fn on_save_command(&mut self) {
        match self.session.as_mut() {
            Some(session) if session.state() == SessionState::Terminated => {
                warn!("save command ignored: session finished");
            }
            Some(session) if session.mode() == Mode::Recording => {
                session.save_frame();
            }
            Some(_) => warn!("save command ignored: no output stream in camera-only mode"),
            None => warn!("save command ignored: camera not initialized"),
        }
    }

    /// Ask the loop to stop at its next dispatch boundary.
    pub fn on_quit_command(&mut self) {
        if let Some(session) = self.session.as_mut() {
            info!("stop requested");
            session.terminate();
        }
    }

    /// Handle one serial chunk.
    ///
    /// A chunk holding both command bytes saves now and leaves the quit
    /// pending for the next dispatch boundary.
    pub fn handle_chunk(&mut self, chunk: &[u8]) -> Option<Action> {
        let session = self.session.as_mut()?;
        let (next, action) = session.state().on_chunk(chunk);
        match action {
            Some(Action::Save) => self.on_save_command(),
            Some(Action::SaveThenQuit) => {
                self.on_save_command();
                if let Some(session) = self.session.as_mut() {
                    session.defer_quit();
                }
            }
            Some(Action::Quit) => self.on_quit_command(),
            None => {}
        }
        if let Some(session) = self.session.as_mut() {
            session.set_state(next);
        }
        action
    }

    fn dispatch_boundary(&mut self) -> bool {
        let Some(session) = self.session.as_mut() else {
            return true;
        };
        if session.take_pending_quit() {
            self.on_quit_command();
        }
        self.session
            .as_ref()
            .map_or(true, |session| session.state() == SessionState::Terminated)
    }

    /// Run until terminated, then release the camera and output stream.
    ///
    /// Recording mode reacts to serial chunks and stops on a quit command or
    /// when `interrupt` completes; the interrupt is checked before each chunk.
    /// Camera-only mode previews until the local stop signal and never polls
    /// `interrupt`. A session runs once: later calls return without touching
    /// the released devices.
    pub async fn run<I>(&mut self, interrupt: I) -> RunSummary
    where
        I: Future<Output = ()>,
    {
        let Some(session) = self.session.as_mut() else {
            warn!("camera not initialized");
            return RunSummary {
                mode: None,
                frames_saved: 0,
                preview_iterations: 0,
            };
        };
        let mode = session.mode();
        if !session.start() {
            warn!(state = ?session.state(), "session already ran");
            return RunSummary {
                mode: Some(mode),
                frames_saved: session.frame_count(),
                preview_iterations: 0,
            };
        }

        let preview_iterations = match mode {
            Mode::CameraOnly => self.run_preview(),
            Mode::Recording => {
                self.run_armed(interrupt).await;
                0
            }
        };

        let frames_saved = self.session.as_ref().map_or(0, CaptureSession::frame_count);
        if let Some(session) = self.session.as_mut() {
            session.release();
        }
        info!(frames_saved, "capture finished");

        RunSummary {
            mode: Some(mode),
            frames_saved,
            preview_iterations,
        }
    }

    fn run_preview(&mut self) -> u64 {
        let mut preview = self.factory.open_preview();
        let mut iterations = 0;

        while let Some(session) = self.session.as_mut() {
            if session.state() == SessionState::Terminated {
                break;
            }
            iterations += 1;
            if let Some(frame) = session.camera_mut().read_frame() {
                preview.show(&frame);
            }
            if preview.poll_stop(PREVIEW_POLL) {
                info!("stop");
                session.terminate();
            }
        }
        iterations
    }

    async fn run_armed<I>(&mut self, interrupt: I)
    where
        I: Future<Output = ()>,
    {
        tokio::pin!(interrupt);
        if self.commands.is_none() {
            info!("no serial input; waiting for interrupt");
        }

        while !self.dispatch_boundary() {
            let event = match self.commands.as_mut() {
                Some(commands) => tokio::select! {
                    biased;
                    () = &mut interrupt => Event::Interrupt,
                    chunk = commands.next_chunk() => Event::Chunk(chunk),
                },
                None => {
                    (&mut interrupt).await;
                    Event::Interrupt
                }
            };

            match event {
                Event::Chunk(Some(chunk)) => {
                    self.handle_chunk(&chunk);
                }
                Event::Chunk(None) => {
                    warn!("serial line closed; waiting for interrupt");
                    self.commands = None;
                }
                Event::Interrupt => self.on_quit_command(),
            }
        }
    }
}
