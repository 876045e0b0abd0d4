//! Simulation runner with lifecycle management
//!
//! `SimulationRunner` owns a `ParticleSimulation` on a background thread.
//! Control happens through a command channel; commands are applied only
//! between frames, so emitting or clearing never races a step. The latest
//! frame is published as a shared `FrameSnapshot` that readers re-fetch
//! whenever they redraw.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use glam::Vec2;
use serde::Serialize;
use sph2d_kernel::{BackendError, ParticleSimulation, StepProfile};

use crate::config::ConfigError;
use crate::domain::{RegionEmitter, Scenario};

/// Failure of the runner or of the simulation it drives.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// A step failed on the compute backend.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// The scenario could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The runner thread could not be started.
    #[error("failed to spawn runner thread: {0}")]
    Spawn(#[source] std::io::Error),
    /// The runner thread panicked.
    #[error("runner thread panicked")]
    ThreadPanicked,
    /// The runner thread is gone.
    #[error("runner thread is no longer accepting commands")]
    Disconnected,
}

/// Runner state enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// Frames are being simulated
    Running,
    /// Waiting for `resume` or `stop`
    Paused,
    /// Stopped or reached `max_frames`
    Finished,
    /// A step failed; see `error_message`
    Error,
}

/// Command applied by the runner thread between frames.
#[derive(Debug, Clone)]
pub enum RunnerCommand {
    /// Seed a region.
    Emit(RegionEmitter),
    /// Remove every particle.
    Clear,
    /// Stop advancing frames.
    Pause,
    /// Continue after `Pause`.
    Resume,
    /// Exit the thread.
    Stop,
}

/// Particle positions after a completed frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameSnapshot {
    /// Frames completed so far.
    pub frame: u64,
    /// Live particle count.
    pub count: usize,
    /// Live positions.
    pub positions: Vec<Vec2>,
}

/// Frame pacing and stop condition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSettings {
    /// Simulated time per frame.
    pub frame_dt: f32,
    /// Sub-steps per frame.
    pub substeps: u32,
    /// Stop after this many frames.
    pub max_frames: Option<u64>,
    /// Collect per-stage timings.
    pub profile: bool,
    /// Also send every snapshot through [`SimulationRunner::take_frames`].
    pub stream_frames: bool,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            frame_dt: 0.016,
            substeps: 6,
            max_frames: None,
            profile: false,
            stream_frames: false,
        }
    }
}

/// Totals reported when the runner thread exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Frames completed.
    pub frames: u64,
    /// Particles alive at exit.
    pub particles: usize,
    /// Summed stage timings (zero unless profiling).
    pub profile: StepProfile,
}

/// Shared state between the runner thread and control interface
struct SharedState {
    state: RunnerState,
    snapshot: Arc<FrameSnapshot>,
    profile: StepProfile,
    error_message: Option<String>,
}

fn lock(shared: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle for controlling and querying a running simulation
pub struct SimulationRunner {
    commands: Sender<RunnerCommand>,
    shared: Arc<Mutex<SharedState>>,
    frames: Option<Receiver<Arc<FrameSnapshot>>>,
    thread_handle: Option<thread::JoinHandle<Result<RunSummary, RunnerError>>>,
}

impl SimulationRunner {
    /// Move `sim` onto a background thread and start simulating frames.
    pub fn spawn(
        sim: ParticleSimulation,
        scenario: Scenario,
        settings: FrameSettings,
    ) -> Result<Self, RunnerError> {
        let shared = Arc::new(Mutex::new(SharedState {
            state: RunnerState::Running,
            snapshot: Arc::new(FrameSnapshot::default()),
            profile: StepProfile::default(),
            error_message: None,
        }));
        let (commands, command_rx) = mpsc::channel();
        let (frame_tx, frames) = if settings.stream_frames {
            let (tx, rx) = mpsc::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let worker = Worker {
            sim,
            scenario,
            settings,
            commands: command_rx,
            shared: Arc::clone(&shared),
            frames: frame_tx,
        };
        let thread_handle = thread::Builder::new()
            .name("sph2d-runner".into())
            .spawn(move || worker.run())
            .map_err(RunnerError::Spawn)?;

        Ok(Self {
            commands,
            shared,
            frames,
            thread_handle: Some(thread_handle),
        })
    }

    /// Get current runner state
    pub fn state(&self) -> RunnerState {
        lock(&self.shared).state
    }

    /// Latest completed frame.
    pub fn snapshot(&self) -> Arc<FrameSnapshot> {
        Arc::clone(&lock(&self.shared).snapshot)
    }

    /// Frames completed so far.
    pub fn frame(&self) -> u64 {
        lock(&self.shared).snapshot.frame
    }

    /// Stage timings summed over every frame so far.
    pub fn profile(&self) -> StepProfile {
        lock(&self.shared).profile
    }

    /// Get error message if state is Error
    pub fn error_message(&self) -> Option<String> {
        lock(&self.shared).error_message.clone()
    }

    /// Receiver of every published snapshot, if streaming was requested.
    /// Can be taken once.
    pub fn take_frames(&mut self) -> Option<Receiver<Arc<FrameSnapshot>>> {
        self.frames.take()
    }

    /// Queue a command for the next frame boundary.
    pub fn send(&self, command: RunnerCommand) -> Result<(), RunnerError> {
        self.commands
            .send(command)
            .map_err(|_| RunnerError::Disconnected)
    }

    /// Seed a region before the next frame.
    pub fn emit(&self, emitter: RegionEmitter) -> Result<(), RunnerError> {
        self.send(RunnerCommand::Emit(emitter))
    }

    /// Remove every particle before the next frame.
    pub fn clear(&self) -> Result<(), RunnerError> {
        self.send(RunnerCommand::Clear)
    }

    /// Pause the simulation
    pub fn pause(&self) -> Result<(), RunnerError> {
        self.send(RunnerCommand::Pause)
    }

    /// Resume the simulation
    pub fn resume(&self) -> Result<(), RunnerError> {
        self.send(RunnerCommand::Resume)
    }

    /// Ask the thread to exit after the current frame.
    pub fn stop(&self) -> Result<(), RunnerError> {
        self.send(RunnerCommand::Stop)
    }

    /// Wait for the simulation thread to complete
    pub fn join(mut self) -> Result<RunSummary, RunnerError> {
        match self.thread_handle.take() {
            Some(handle) => handle.join().map_err(|_| RunnerError::ThreadPanicked)?,
            None => Err(RunnerError::Disconnected),
        }
    }
}

impl Drop for SimulationRunner {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            // The thread may already have exited.
            let _ = self.commands.send(RunnerCommand::Stop);
        }
    }
}

/// What the thread should do after draining commands.
enum Control {
    Continue,
    Stop,
}

/// State owned by the runner thread.
struct Worker {
    sim: ParticleSimulation,
    scenario: Scenario,
    settings: FrameSettings,
    commands: Receiver<RunnerCommand>,
    shared: Arc<Mutex<SharedState>>,
    frames: Option<Sender<Arc<FrameSnapshot>>>,
}

impl Worker {
    fn run(mut self) -> Result<RunSummary, RunnerError> {
        tracing::info!(
            backend = self.sim.backend_name(),
            frame_dt = self.settings.frame_dt,
            substeps = self.settings.substeps,
            max_frames = ?self.settings.max_frames,
            "runner started"
        );
        let started = Instant::now();
        let mut summary = RunSummary::default();
        let mut paused = false;

        loop {
            let idle = self.is_idle(summary.frames);
            if let Control::Stop = self.drain_commands(&mut paused, idle) {
                break;
            }
            if paused || (idle && self.sim.count() == 0) {
                continue;
            }
            if self
                .settings
                .max_frames
                .is_some_and(|max| summary.frames >= max)
            {
                tracing::info!(frames = summary.frames, "reached max_frames");
                break;
            }

            match self.advance(summary.frames) {
                Ok(profile) => {
                    summary.frames += 1;
                    summary.profile += profile;
                    self.publish(summary.frames, profile);
                }
                Err(e) => {
                    tracing::error!(frame = summary.frames, error = %e, "step failed");
                    let mut guard = lock(&self.shared);
                    guard.state = RunnerState::Error;
                    guard.error_message = Some(e.to_string());
                    return Err(e.into());
                }
            }

            if summary.frames % 100 == 0 {
                tracing::debug!(
                    frames = summary.frames,
                    count = self.sim.count(),
                    wall_s = started.elapsed().as_secs_f64(),
                    "progress"
                );
            }
        }

        lock(&self.shared).state = RunnerState::Finished;
        summary.particles = self.sim.count();
        tracing::info!(
            frames = summary.frames,
            particles = summary.particles,
            wall_s = started.elapsed().as_secs_f64(),
            "runner exiting"
        );
        Ok(summary)
    }

    /// Nothing can change until a command arrives: the simulation is empty,
    /// no scheduled event is pending and the run has no frame limit.
    fn is_idle(&self, frame: u64) -> bool {
        self.settings.max_frames.is_none()
            && self.sim.count() == 0
            && self.scenario.last_event().map_or(true, |last| last < frame)
    }

    /// Apply every queued command. While paused or idle, block until a
    /// command arrives.
    fn drain_commands(&mut self, paused: &mut bool, idle: bool) -> Control {
        let mut block = *paused || idle;
        loop {
            let command = if block {
                match self.commands.recv_timeout(Duration::from_millis(50)) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => return Control::Continue,
                    Err(RecvTimeoutError::Disconnected) => return Control::Stop,
                }
            } else {
                match self.commands.try_recv() {
                    Ok(command) => command,
                    Err(TryRecvError::Empty) => return Control::Continue,
                    Err(TryRecvError::Disconnected) => return Control::Stop,
                }
            };

            match command {
                RunnerCommand::Emit(emitter) => {
                    let added = emitter.seed(&mut self.sim);
                    tracing::debug!(added, "emit command applied");
                }
                RunnerCommand::Clear => self.sim.clear(),
                RunnerCommand::Pause => {
                    *paused = true;
                    lock(&self.shared).state = RunnerState::Paused;
                }
                RunnerCommand::Resume => {
                    *paused = false;
                    lock(&self.shared).state = RunnerState::Running;
                }
                RunnerCommand::Stop => return Control::Stop,
            }
            block = *paused;
        }
    }

    /// Apply scheduled events and simulate one frame.
    fn advance(&mut self, frame: u64) -> Result<StepProfile, BackendError> {
        self.scenario.apply(frame, &mut self.sim);
        let FrameSettings {
            frame_dt,
            substeps,
            profile,
            ..
        } = self.settings;
        if profile {
            self.sim.step_substeps_profiled(frame_dt, substeps)
        } else {
            self.sim.step_substeps(frame_dt, substeps)?;
            Ok(StepProfile::default())
        }
    }

    fn publish(&self, frame: u64, profile: StepProfile) {
        let snapshot = Arc::new(FrameSnapshot {
            frame,
            count: self.sim.count(),
            positions: self.sim.positions().to_vec(),
        });
        if let Some(frames) = &self.frames {
            // Receiver may have been dropped.
            let _ = frames.send(Arc::clone(&snapshot));
        }
        let mut guard = lock(&self.shared);
        guard.snapshot = snapshot;
        guard.profile += profile;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Polygon;
    use sph2d_kernel::SimParams;

    fn block() -> RegionEmitter {
        RegionEmitter::new(Polygon::rect(Vec2::splat(0.15), 0.15, 0.15).unwrap())
    }

    fn sim() -> ParticleSimulation {
        ParticleSimulation::with_cpu(SimParams::with_diameter(0.1)).unwrap()
    }

    fn wait_for(runner: &SimulationRunner, what: impl Fn(&SimulationRunner) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !what(runner) {
            assert!(Instant::now() < deadline, "timed out waiting for runner");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn runs_to_max_frames() {
        let mut scenario = Scenario::default();
        scenario.emit_at(0, block());
        let settings = FrameSettings {
            max_frames: Some(5),
            substeps: 2,
            ..FrameSettings::default()
        };
        let runner = SimulationRunner::spawn(sim(), scenario, settings).unwrap();
        let summary = runner.join().unwrap();
        assert_eq!(summary.frames, 5);
        assert_eq!(summary.particles, 16);
    }

    #[test]
    fn streamed_frames_arrive_in_order() {
        let mut scenario = Scenario::default();
        scenario.emit_at(0, block());
        let settings = FrameSettings {
            max_frames: Some(4),
            substeps: 1,
            stream_frames: true,
            ..FrameSettings::default()
        };
        let mut runner = SimulationRunner::spawn(sim(), scenario, settings).unwrap();
        let frames = runner.take_frames().unwrap();
        assert!(runner.take_frames().is_none());
        runner.join().unwrap();

        let received: Vec<_> = frames.iter().collect();
        assert_eq!(received.len(), 4);
        for (i, snap) in received.iter().enumerate() {
            assert_eq!(snap.frame, i as u64 + 1);
            assert_eq!(snap.count, 16);
            assert_eq!(snap.positions.len(), 16);
        }
    }

    #[test]
    fn commands_apply_between_frames() {
        let runner =
            SimulationRunner::spawn(sim(), Scenario::default(), FrameSettings::default()).unwrap();
        runner.emit(block()).unwrap();
        wait_for(&runner, |r| r.snapshot().count == 16);

        runner.clear().unwrap();
        wait_for(&runner, |r| r.snapshot().count == 0);

        runner.stop().unwrap();
        let summary = runner.join().unwrap();
        assert_eq!(summary.particles, 0);
        assert!(summary.frames >= 2);
    }

    #[test]
    fn empty_open_ended_run_waits_for_commands() {
        let runner =
            SimulationRunner::spawn(sim(), Scenario::default(), FrameSettings::default()).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(runner.frame(), 0);

        runner.emit(block()).unwrap();
        wait_for(&runner, |r| r.frame() >= 2);
        assert_eq!(runner.snapshot().count, 16);

        runner.stop().unwrap();
        runner.join().unwrap();
    }

    #[test]
    fn pause_holds_the_frame_counter() {
        let mut scenario = Scenario::default();
        scenario.emit_at(0, block());
        let runner = SimulationRunner::spawn(sim(), scenario, FrameSettings::default()).unwrap();
        wait_for(&runner, |r| r.frame() >= 1);

        runner.pause().unwrap();
        wait_for(&runner, |r| r.state() == RunnerState::Paused);
        let held = runner.frame();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(runner.frame(), held);

        runner.resume().unwrap();
        wait_for(&runner, |r| r.frame() > held);
        assert_eq!(runner.state(), RunnerState::Running);

        runner.stop().unwrap();
        runner.join().unwrap();
    }

    #[test]
    fn profile_accumulates_when_enabled() {
        let mut scenario = Scenario::default();
        scenario.emit_at(0, block());
        let settings = FrameSettings {
            max_frames: Some(3),
            profile: true,
            ..FrameSettings::default()
        };
        let runner = SimulationRunner::spawn(sim(), scenario, settings).unwrap();
        wait_for(&runner, |r| r.state() == RunnerState::Finished);
        let shared = runner.profile();
        let summary = runner.join().unwrap();
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.profile, shared);
        assert!(summary.profile.total_us >= summary.profile.solve_us);
    }
}
