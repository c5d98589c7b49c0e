//! # Worker Supervisor
//!
//! Owns a fixed-size pool of worker processes.
//!
//! ## Lifecycle
//!
//! - [`WorkerSupervisor::start`] launches `pool_size` processes, staggered by
//!   `stagger_interval`, each with its own log sink.
//! - [`WorkerSupervisor::check_slots`] is one monitoring pass: a slot still
//!   alive since its launch moves from `Starting` to `Running`; a dead process
//!   is logged with its exit status, its sink is closed, and a replacement is
//!   launched at once. [`WorkerSupervisor::monitor`] runs a pass every
//!   `poll_interval`.
//! - [`WorkerSupervisor::stop`] sends SIGTERM (a hard kill off unix), waits up
//!   to `grace_period`, force-kills stragglers and closes every sink. Calling
//!   it again does nothing.
//!
//! Slot state lives only here; lifecycle events are broadcast to subscribers.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::log_sink::{open_sink, LogSink, SinkMode};
use crate::constants::defaults;
use crate::error::{ConveyorError, Result};
use crate::state_machine::SlotState;

/// Environment variable telling a worker which slot it occupies
pub const WORKER_SLOT_ENV: &str = "CONVEYOR_WORKER_SLOT";

/// Time allowed for output pumps to drain after their process exited
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Program and arguments used to launch one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Same arguments and environment, different executable
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    fn build(&self, slot: usize) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(WORKER_SLOT_ENV, slot.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

/// Pool supervision settings
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub pool_size: usize,
    pub stagger_interval: Duration,
    pub poll_interval: Duration,
    pub grace_period: Duration,
    /// A worker dying sooner than this after launch is reported as crash-looping
    pub crash_loop_window: Duration,
    pub log_dir: PathBuf,
    pub sink_mode: SinkMode,
    pub command: WorkerCommand,
}

impl SupervisorSettings {
    /// Production defaults for the given worker command
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            pool_size: defaults::POOL_SIZE,
            stagger_interval: Duration::from_millis(defaults::STAGGER_INTERVAL_MS),
            poll_interval: Duration::from_millis(defaults::SUPERVISOR_POLL_INTERVAL_MS),
            grace_period: Duration::from_millis(defaults::GRACE_PERIOD_MS),
            crash_loop_window: Duration::from_millis(defaults::CRASH_LOOP_WINDOW_MS),
            log_dir: PathBuf::from("logs"),
            sink_mode: SinkMode::FileOnly,
            command,
        }
    }
}

/// Pool lifecycle notifications
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorEvent {
    Started {
        slot: usize,
        pid: Option<u32>,
        log_path: PathBuf,
    },
    Exited {
        slot: usize,
        pid: Option<u32>,
        exit_code: Option<i32>,
        signal: Option<i32>,
        uptime: Duration,
        crash_looping: bool,
    },
    Restarted {
        slot: usize,
        pid: Option<u32>,
        restart_count: u32,
    },
    Stopped {
        slot: usize,
        forced: bool,
    },
}

/// Everything the supervisor knows about one slot; replaced wholesale on restart
pub struct WorkerProcessState {
    pub slot: usize,
    child: Option<Child>,
    pub pid: Option<u32>,
    pub started_at: Instant,
    sink: Arc<dyn LogSink>,
    pumps: Vec<JoinHandle<()>>,
    pub restart_count: u32,
    pub state: SlotState,
}

impl WorkerProcessState {
    pub fn log_path(&self) -> &Path {
        self.sink.path()
    }

    async fn close_sink(&mut self) {
        for pump in self.pumps.drain(..) {
            let _ = tokio::time::timeout(PUMP_DRAIN_TIMEOUT, pump).await;
        }
        if let Err(e) = self.sink.close() {
            warn!(slot = self.slot, error = %e, "Failed to close worker log");
        }
    }

    fn transition(&mut self, next: SlotState) {
        match self.state.transition_to(next) {
            Ok(_) => debug!(slot = self.slot, from = %self.state, to = %next, "Slot state transition"),
            Err(e) => error!(slot = self.slot, error = %e, "Illegal slot state transition"),
        }
        self.state = next;
    }
}

pub struct WorkerSupervisor {
    settings: SupervisorSettings,
    slots: Mutex<Vec<WorkerProcessState>>,
    events: broadcast::Sender<SupervisorEvent>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl WorkerSupervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            settings,
            slots: Mutex::new(Vec::new()),
            events,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    /// Launch the whole pool
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ConveyorError::SupervisorError(
                "worker pool already started".to_string(),
            ));
        }
        if self.settings.pool_size < 1 {
            return Err(ConveyorError::ConfigurationError(
                "pool_size must be at least 1".to_string(),
            ));
        }

        std::fs::create_dir_all(&self.settings.log_dir)?;
        info!(
            pool_size = self.settings.pool_size,
            program = %self.settings.command.program(),
            log_dir = %self.settings.log_dir.display(),
            "🚀 Starting worker pool"
        );

        for slot in 1..=self.settings.pool_size {
            if slot > 1 && !self.settings.stagger_interval.is_zero() {
                tokio::time::sleep(self.settings.stagger_interval).await;
            }

            // Launch under the lock so a concurrent stop sees every worker
            let mut slots = self.slots.lock().await;
            if self.stopped.load(Ordering::SeqCst) {
                warn!(launched = slots.len(), "Stop requested while starting; remaining workers not launched");
                return Ok(());
            }
            let state = self.launch(slot, 0)?;
            info!(
                slot = slot,
                pid = ?state.pid,
                log_file = %state.log_path().display(),
                "✅ Worker started"
            );
            let _ = self.events.send(SupervisorEvent::Started {
                slot,
                pid: state.pid,
                log_path: state.log_path().to_path_buf(),
            });
            slots.push(state);
        }
        Ok(())
    }

    /// One monitoring pass; returns how many workers were relaunched
    pub async fn check_slots(&self) -> Result<usize> {
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(0);
        }

        let mut slots = self.slots.lock().await;
        let mut relaunched = 0;

        for index in 0..slots.len() {
            let exit = match slots[index].child.as_mut() {
                Some(child) => match child.try_wait() {
                    Ok(exit) => exit,
                    Err(e) => {
                        warn!(slot = slots[index].slot, error = %e, "Failed to poll worker; checking again next pass");
                        continue;
                    }
                },
                // A failed relaunch left the slot empty; try again this pass
                None => None,
            };
            let needs_launch = slots[index].child.is_none() || exit.is_some();
            if !needs_launch {
                if slots[index].state == SlotState::Starting {
                    slots[index].transition(SlotState::Running);
                }
                continue;
            }

            let slot = slots[index].slot;
            let restart_count = slots[index].restart_count + 1;

            if let Some(status) = exit {
                self.record_exit(&mut slots[index], status).await;
            }

            match self.launch(slot, restart_count) {
                Ok(replacement) => {
                    info!(
                        slot = slot,
                        pid = ?replacement.pid,
                        restart_count = restart_count,
                        log_file = %replacement.log_path().display(),
                        "🔄 Worker restarted"
                    );
                    let _ = self.events.send(SupervisorEvent::Restarted {
                        slot,
                        pid: replacement.pid,
                        restart_count,
                    });
                    slots[index] = replacement;
                    relaunched += 1;
                }
                Err(e) => {
                    error!(slot = slot, error = %e, "❌ Failed to relaunch worker; retrying next pass");
                    slots[index].restart_count = restart_count;
                }
            }
        }

        Ok(relaunched)
    }

    /// Run monitoring passes until `shutdown` fires
    pub async fn monitor(&self, shutdown: CancellationToken) {
        info!(poll_interval_ms = self.settings.poll_interval.as_millis() as u64, "👀 Monitoring workers");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
            if let Err(e) = self.check_slots().await {
                error!(error = %e, "Monitoring pass failed");
            }
        }
        debug!("Worker monitoring stopped");
    }

    /// Stop every worker; later calls are no-ops. A `start` still staggering
    /// its launches stops launching.
    pub async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut slots = self.slots.lock().await;
        info!(workers = slots.len(), "🛑 Stopping all workers");

        for state in slots.iter_mut() {
            if let Some(child) = state.child.as_mut() {
                match child.try_wait() {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        debug!(slot = state.slot, pid = ?state.pid, "Sending termination signal");
                        send_terminate(child);
                    }
                    Err(e) => {
                        warn!(slot = state.slot, error = %e, "Failed to poll worker; signalling anyway");
                        send_terminate(child);
                    }
                }
            }
        }

        let deadline = tokio::time::Instant::now() + self.settings.grace_period;
        for state in slots.iter_mut() {
            let mut forced = false;
            if let Some(mut child) = state.child.take() {
                match tokio::time::timeout_at(deadline, child.wait()).await {
                    Ok(Ok(status)) => {
                        info!(slot = state.slot, status = %status, "Worker stopped gracefully");
                    }
                    Ok(Err(e)) => {
                        warn!(slot = state.slot, error = %e, "Failed to wait for worker");
                    }
                    Err(_) => {
                        warn!(slot = state.slot, pid = ?state.pid, "⚠️ Worker didn't stop gracefully, forcing kill");
                        if let Err(e) = child.kill().await {
                            warn!(slot = state.slot, error = %e, "Force kill failed");
                        }
                        forced = true;
                    }
                }
            }
            state.close_sink().await;
            state.transition(SlotState::Stopped);
            let _ = self.events.send(SupervisorEvent::Stopped {
                slot: state.slot,
                forced,
            });
        }

        info!("All workers stopped");
        Ok(())
    }

    /// Workers currently alive
    pub async fn live_count(&self) -> usize {
        self.slots
            .lock()
            .await
            .iter()
            .filter(|s| s.state.is_live() && s.child.is_some())
            .count()
    }

    pub async fn slot_states(&self) -> Vec<SlotState> {
        self.slots.lock().await.iter().map(|s| s.state).collect()
    }

    pub async fn pids(&self) -> Vec<Option<u32>> {
        self.slots.lock().await.iter().map(|s| s.pid).collect()
    }

    pub async fn restart_counts(&self) -> Vec<u32> {
        self.slots
            .lock()
            .await
            .iter()
            .map(|s| s.restart_count)
            .collect()
    }

    pub async fn log_paths(&self) -> Vec<PathBuf> {
        self.slots
            .lock()
            .await
            .iter()
            .map(|s| s.log_path().to_path_buf())
            .collect()
    }

    fn log_path_for(&self, slot: usize, restart_count: u32) -> PathBuf {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        self.settings
            .log_dir
            .join(format!("worker_{slot}_{timestamp}_r{restart_count}.log"))
    }

    fn launch(&self, slot: usize, restart_count: u32) -> Result<WorkerProcessState> {
        let log_path = self.log_path_for(slot, restart_count);
        let sink = open_sink(self.settings.sink_mode, &log_path, slot)?;

        let mut child = self.settings.command.build(slot).spawn().map_err(|e| {
            ConveyorError::SupervisorError(format!(
                "failed to launch '{}' for worker {slot}: {e}",
                self.settings.command.program()
            ))
        })?;

        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(spawn_pump(stdout, Arc::clone(&sink)));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(spawn_pump(stderr, Arc::clone(&sink)));
        }

        Ok(WorkerProcessState {
            slot,
            pid: child.id(),
            child: Some(child),
            started_at: Instant::now(),
            sink,
            pumps,
            restart_count,
            state: SlotState::Starting,
        })
    }

    async fn record_exit(&self, state: &mut WorkerProcessState, status: ExitStatus) {
        let uptime = state.started_at.elapsed();
        let crash_looping = uptime < self.settings.crash_loop_window;
        let signal = exit_signal(&status);

        state.transition(SlotState::Dead);
        state.child = None;

        warn!(
            slot = state.slot,
            pid = ?state.pid,
            exit_code = ?status.code(),
            signal = ?signal,
            uptime_ms = uptime.as_millis() as u64,
            "💀 Worker died"
        );
        if crash_looping {
            error!(
                slot = state.slot,
                restart_count = state.restart_count,
                "🔁 Worker is crash-looping (died within {:?} of launch)",
                self.settings.crash_loop_window
            );
        }

        state.close_sink().await;
        let _ = self.events.send(SupervisorEvent::Exited {
            slot: state.slot,
            pid: state.pid,
            exit_code: status.code(),
            signal,
            uptime,
            crash_looping,
        });
    }
}

fn spawn_pump<R>(stream: R, sink: Arc<dyn LogSink>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Err(e) = sink.write_line(&line) {
                warn!(log_file = %sink.path().display(), error = %e, "Failed to write worker output");
                break;
            }
        }
    })
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        warn!(pid = pid, error = %e, "SIGTERM failed; killing instead");
        let _ = child.start_kill();
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) {
    let _ = child.start_kill();
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}
