//! The state machine that owns the strip and hands it from one render routine
//! to the next.
//!
//! A single scheduling loop polls the command queue. On a new mode it moves
//! the shared marker (which cancels the running routine), joins that routine
//! and only then starts the next one, so no two routines ever write to the
//! strip at the same time. A routine that ends on its own is not restarted;
//! the marker keeps naming its mode until another mode is submitted.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::{
    render::{RenderContext, RoutineTable, SharedPixels},
    AppConfig, Mode, ModeMarker, ModeWatch, PixelBuffer, Result, StripError,
};

/// Snapshot answered to status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub mode: Option<Mode>,
    pub scheduler_alive: bool,
    pub renderer_alive: bool,
}

pub struct StateMachine {
    commands: Sender<Mode>,
    watch: ModeWatch,
    pixels: SharedPixels,
    stop: Arc<AtomicBool>,
    renderer_alive: Arc<AtomicBool>,
    pending: Option<SchedulingLoop>,
    scheduler: Option<JoinHandle<()>>,
}

impl StateMachine {
    /// Builds an engine with the standard routines. The configured initial
    /// mode is already queued.
    pub fn new(pixels: PixelBuffer, config: AppConfig) -> Self {
        Self::with_routines(pixels, config, RoutineTable::standard())
    }

    pub fn with_routines(pixels: PixelBuffer, config: AppConfig, routines: RoutineTable) -> Self {
        let (commands, queue) = crossbeam_channel::unbounded();
        let marker = ModeMarker::new();
        let watch = marker.watch();
        let pixels = Arc::new(Mutex::new(pixels));
        let stop = Arc::new(AtomicBool::new(false));
        let renderer_alive = Arc::new(AtomicBool::new(false));
        let initial = config.engine.initial_mode;

        let pending = SchedulingLoop {
            queue,
            marker,
            pixels: pixels.clone(),
            routines,
            wait: config.engine.poll_interval(),
            config: Arc::new(config),
            stop: stop.clone(),
            renderer_alive: renderer_alive.clone(),
            renderer: None,
        };

        let machine = Self {
            commands,
            watch,
            pixels,
            stop,
            renderer_alive,
            pending: Some(pending),
            scheduler: None,
        };
        machine.submit(initial);
        machine
    }

    /// Queues a mode. Never blocks.
    pub fn submit(&self, mode: Mode) {
        if self.commands.send(mode).is_err() {
            tracing::debug!(%mode, "engine stopped, dropping mode request");
        }
    }

    /// Validates a mode name from the command boundary and queues it.
    pub fn submit_named(&self, name: &str) -> Result<Mode> {
        let mode = name.parse::<Mode>()?;
        self.submit(mode);
        Ok(mode)
    }

    /// Starts the scheduling loop on a background thread and returns.
    pub fn run(&mut self) -> Result<()> {
        let scheduling = self
            .pending
            .take()
            .ok_or_else(|| StripError::msg("the engine has already been started"))?;

        let handle = thread::Builder::new()
            .name("scheduler".to_string())
            .spawn(move || scheduling.run())?;
        self.scheduler = Some(handle);
        Ok(())
    }

    pub fn status(&self) -> Status {
        Status {
            mode: self.watch.get(),
            scheduler_alive: self
                .scheduler
                .as_ref()
                .map(|handle| !handle.is_finished())
                .unwrap_or(false),
            renderer_alive: self.renderer_alive.load(Ordering::Acquire),
        }
    }

    #[cfg(test)]
    fn pixels(&self) -> SharedPixels {
        self.pixels.clone()
    }

    /// Stops the loop, cancels and joins the active routine, then blanks and
    /// releases the strip. Safe to call more than once.
    pub fn shutdown(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.scheduler.take() {
            if handle.join().is_err() {
                tracing::error!("scheduling loop panicked");
            }
        }
        self.pending = None;

        let mut pixels = self.pixels.lock().unwrap_or_else(PoisonError::into_inner);
        pixels.release()
    }
}

impl Drop for StateMachine {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::warn!(%err, "engine shutdown failed");
        }
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("status", &self.status())
            .finish()
    }
}

/// State moved onto the scheduler thread. It owns the only marker writer.
struct SchedulingLoop {
    queue: Receiver<Mode>,
    marker: ModeMarker,
    pixels: SharedPixels,
    routines: RoutineTable,
    config: Arc<AppConfig>,
    wait: Duration,
    stop: Arc<AtomicBool>,
    renderer_alive: Arc<AtomicBool>,
    renderer: Option<JoinHandle<()>>,
}

impl SchedulingLoop {
    fn run(mut self) {
        tracing::info!(wait_ms = self.wait.as_millis() as u64, "scheduler started");
        while !self.stop.load(Ordering::Acquire) {
            if let Ok(mode) = self.queue.try_recv() {
                self.switch_to(mode);
            }
            thread::sleep(self.wait);
        }

        self.marker.clear();
        self.join_renderer();
        tracing::info!("scheduler stopped");
    }

    fn switch_to(&mut self, mode: Mode) {
        if self.marker.get() == Some(mode) {
            tracing::debug!(%mode, "mode already active");
            return;
        }

        let previous = self.marker.get();
        self.marker.set(mode);
        self.join_renderer();
        tracing::info!(from = ?previous, to = %mode, "switching mode");

        let ctx = RenderContext::new(
            mode,
            self.marker.watch(),
            self.pixels.clone(),
            self.config.clone(),
        );
        let routine = self.routines.get(mode);
        let alive = self.renderer_alive.clone();

        alive.store(true, Ordering::Release);
        let spawned = thread::Builder::new()
            .name(format!("render-{mode}"))
            .spawn(move || {
                let _alive = AliveFlag(alive);
                match routine(&ctx) {
                    Ok(()) => tracing::debug!(%mode, "routine finished"),
                    Err(err) => tracing::error!(%mode, %err, "routine failed"),
                }
            });

        match spawned {
            Ok(handle) => self.renderer = Some(handle),
            Err(err) => {
                self.renderer_alive.store(false, Ordering::Release);
                tracing::error!(%mode, %err, "failed to start routine");
            }
        }
    }

    fn join_renderer(&mut self) {
        if let Some(handle) = self.renderer.take() {
            if handle.join().is_err() {
                tracing::error!("routine panicked");
            }
        }
    }
}

/// Clears the liveness flag when the routine thread exits, panics included.
struct AliveFlag(Arc<AtomicBool>);

impl Drop for AliveFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
