//! Capture and replay of hand motion.
//!
//! Recording and playback are mutually exclusive; a request for one while
//! the other is active is refused with `HandError::State`. Realtime
//! recording and all playback run on background workers so the caller
//! stays responsive.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::codec::SharedClock;
use crate::config::{FrameSettings, RecorderCfg};
use crate::error::{HandError, Result};
use crate::manager::{ActuatorManager, HandControl};
use crate::playback::{self, PlaybackPlan};
use crate::recording::{Recording, RecordingFrame, RecordingMode, RecordingSummary};
use crate::util;
use crate::worker::Worker;

struct ActiveRecording {
    started: Instant,
    sampler: Option<Worker>,
}

struct PlaybackRun {
    worker: Worker,
    progress: Arc<AtomicU32>,
}

struct RecorderState {
    recording: Recording,
    active: Option<ActiveRecording>,
    playback: Option<PlaybackRun>,
    frame_settings: FrameSettings,
}

impl RecorderState {
    fn is_playing(&self) -> bool {
        self.playback.as_ref().is_some_and(|p| p.worker.is_running())
    }
}

pub struct MotionRecorder {
    hand: Arc<dyn HandControl>,
    clock: SharedClock,
    cfg: RecorderCfg,
    /// Shared with the realtime sampler.
    frames: Arc<Mutex<Vec<RecordingFrame>>>,
    state: Mutex<RecorderState>,
}

impl std::fmt::Debug for MotionRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotionRecorder")
            .field("recording", &self.is_recording())
            .field("playing", &self.is_playing())
            .field("frames", &self.frame_count())
            .finish_non_exhaustive()
    }
}

impl MotionRecorder {
    pub fn new(hand: Arc<dyn HandControl>, clock: SharedClock, cfg: RecorderCfg) -> Self {
        let recording = Recording::new(cfg.mode, cfg.freq);
        let frame_settings = cfg.playback.frame.clone();
        Self {
            hand,
            clock,
            cfg,
            frames: Arc::new(Mutex::new(Vec::new())),
            state: Mutex::new(RecorderState {
                recording,
                active: None,
                playback: None,
                frame_settings,
            }),
        }
    }

    /// Recorder bound to a manager and its bus clock.
    pub fn for_manager(manager: Arc<ActuatorManager>, cfg: RecorderCfg) -> Self {
        let clock = manager.clock();
        Self::new(manager, clock, cfg)
    }

    pub fn is_recording(&self) -> bool {
        self.state.lock().active.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().is_playing()
    }

    pub fn mode(&self) -> RecordingMode {
        self.state.lock().recording.mode
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    /// 1-based repeat currently playing; 0 when idle.
    pub fn current_repeat(&self) -> u32 {
        let st = self.state.lock();
        match &st.playback {
            Some(p) if p.worker.is_running() => p.progress.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    /// Snapshot of the current (or last) recording.
    pub fn recording(&self) -> Recording {
        let mut rec = self.state.lock().recording.clone();
        rec.frames = self.frames.lock().clone();
        rec
    }

    /// Begin a new recording, discarding unsaved frames. `mode` defaults
    /// to the configured one.
    pub fn start_recording(&self, mode: Option<RecordingMode>) -> std::result::Result<(), HandError> {
        let mut st = self.state.lock();
        if st.active.is_some() {
            return Err(HandError::State("already recording".into()));
        }
        if st.is_playing() {
            return Err(HandError::State("cannot record during playback".into()));
        }
        let mode = mode.unwrap_or(self.cfg.mode);
        st.recording = Recording::new(mode, self.cfg.freq);
        self.frames.lock().clear();
        let started = self.clock.now();

        let sampler = match mode {
            RecordingMode::Frame => None,
            RecordingMode::Realtime => Some(self.spawn_sampler(started)?),
        };
        st.active = Some(ActiveRecording { started, sampler });
        info!(%mode, freq = self.cfg.freq, "recording started");
        Ok(())
    }

    fn spawn_sampler(&self, started: Instant) -> std::result::Result<Worker, HandError> {
        let hand = self.hand.clone();
        let clock = self.clock.clone();
        let frames = self.frames.clone();
        let period = util::period(self.cfg.freq);
        Worker::spawn("recorder", move |stop| {
            while !stop.is_stopped() {
                if !hand.is_open() {
                    warn!("bus closed; realtime recording stopped");
                    break;
                }
                let t0 = clock.now();
                let readings = hand.read_positions();
                if stop.is_stopped() {
                    break;
                }
                let frame = RecordingFrame::from_readings(clock.secs_since(started), &readings);
                if frame.positions.is_empty() {
                    debug!("no servo answered; frame skipped");
                } else {
                    frames.lock().push(frame);
                }
                let spent = clock.now().saturating_duration_since(t0);
                if !stop.sleep(&*clock, period.saturating_sub(spent)) {
                    break;
                }
            }
        })
        .map_err(|e| HandError::Io(e.to_string()))
    }

    /// Finish the active recording; returns the number of frames captured.
    /// A no-op returning 0 when not recording.
    pub fn stop_recording(&self) -> usize {
        let active = self.state.lock().active.take();
        let Some(active) = active else {
            return 0;
        };
        if let Some(sampler) = active.sampler {
            sampler.stop(self.cfg.join_timeout);
        }
        let n = self.frame_count();
        info!(frames = n, "recording stopped");
        n
    }

    /// Capture the current pose (frame mode only); returns the new frame count.
    pub fn add_frame(&self) -> std::result::Result<usize, HandError> {
        let started = {
            let st = self.state.lock();
            match &st.active {
                Some(a) if st.recording.mode == RecordingMode::Frame => a.started,
                Some(_) => {
                    return Err(HandError::State(
                        "frames are captured automatically in realtime mode".into(),
                    ));
                }
                None => return Err(HandError::State("not recording".into())),
            }
        };
        let readings = self.hand.read_positions();
        let frame = RecordingFrame::from_readings(self.clock.secs_since(started), &readings);
        if frame.positions.is_empty() {
            return Err(HandError::Transport("no servo position could be read".into()));
        }
        let mut frames = self.frames.lock();
        frames.push(frame);
        info!(frame = frames.len(), "frame captured");
        Ok(frames.len())
    }

    /// Write the recording to `path`, or to an auto-named file in the
    /// configured save directory. Returns the path written.
    pub fn save_recording(&self, path: Option<&Path>) -> Result<PathBuf> {
        let rec = self.recording();
        if rec.is_empty() {
            return Err(eyre::Report::new(HandError::State(
                "nothing recorded".into(),
            )));
        }
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => self.cfg.save_dir.join(rec.default_file_name()),
        };
        rec.save(&path)?;
        info!(path = %path.display(), frames = rec.frames.len(), "recording saved");
        Ok(path)
    }

    /// Load a recording file as the current recording.
    pub fn select_file(&self, path: &Path) -> Result<RecordingSummary> {
        let mut st = self.state.lock();
        if st.active.is_some() || st.is_playing() {
            return Err(eyre::Report::new(HandError::State(
                "cannot load a recording while recording or playing".into(),
            )));
        }
        let rec = Recording::load(path)?;
        let summary = rec.summary();
        *self.frames.lock() = rec.frames.clone();
        st.recording = Recording {
            frames: Vec::new(),
            ..rec
        };
        info!(
            path = %path.display(),
            mode = %summary.mode,
            frames = summary.frame_count,
            "recording loaded"
        );
        Ok(summary)
    }

    /// Profile and pacing for subsequent frame-mode playback.
    pub fn set_frame_playback_settings(&self, settings: FrameSettings) {
        debug!(?settings, "frame playback settings updated");
        self.state.lock().frame_settings = settings;
    }

    pub fn frame_playback_settings(&self) -> FrameSettings {
        self.state.lock().frame_settings.clone()
    }

    /// Replay the current recording `repeat_count` times in the background.
    ///
    /// `speed` scales realtime recordings (2.0 replays in half the time);
    /// frame recordings keep their interval. `frame_settings` overrides the
    /// stored frame-mode settings for this run only.
    pub fn start_playback(
        &self,
        repeat_count: u32,
        speed: f64,
        frame_settings: Option<FrameSettings>,
    ) -> std::result::Result<(), HandError> {
        playback::validate_request(repeat_count, speed)?;
        let mut st = self.state.lock();
        if st.active.is_some() {
            return Err(HandError::State("cannot play while recording".into()));
        }
        if st.is_playing() {
            return Err(HandError::State("playback already running".into()));
        }
        let frames = self.frames.lock().clone();
        if frames.is_empty() {
            return Err(HandError::State("no recording loaded".into()));
        }
        let recording = Arc::new(Recording {
            frames,
            ..st.recording.clone()
        });

        let mut cfg = self.cfg.playback.clone();
        cfg.frame = frame_settings.unwrap_or_else(|| st.frame_settings.clone());
        let plan = PlaybackPlan::new(recording, repeat_count, speed, &cfg)?;
        let progress = Arc::new(AtomicU32::new(0));
        let hand = self.hand.clone();
        let clock = self.clock.clone();
        let shared = progress.clone();
        let worker = Worker::spawn("playback", move |stop| {
            playback::run(hand.as_ref(), &*clock, &plan, &stop, &shared);
        })
        .map_err(|e| HandError::Io(e.to_string()))?;

        // A finished previous run is joined here when replaced.
        st.playback = Some(PlaybackRun { worker, progress });
        Ok(())
    }

    /// True if a playback was running.
    pub fn stop_playback(&self) -> bool {
        let run = self.state.lock().playback.take();
        match run {
            Some(run) => {
                let was_running = run.worker.is_running();
                run.worker.stop(self.cfg.join_timeout);
                if was_running {
                    info!("playback stopped");
                }
                was_running
            }
            None => false,
        }
    }

    /// Block until the running playback finishes or `timeout` passes;
    /// true if nothing is playing anymore.
    pub fn wait_playback(&self, timeout: Duration) -> bool {
        let exited = match &self.state.lock().playback {
            Some(run) => run.worker.exit_signal(),
            None => return true,
        };
        !matches!(exited.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
    }
}

impl Drop for MotionRecorder {
    fn drop(&mut self) {
        self.stop_recording();
        self.stop_playback();
    }
}
