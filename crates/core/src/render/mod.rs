//! Render routines and the table that binds each [`Mode`] to one.
//!
//! A routine runs on its own thread until the shared mode marker stops naming
//! its mode. Every routine re-checks the marker at least once per iteration
//! and never blocks longer than one of its own steps, which is what keeps
//! mode switches prompt.

mod ambient;
mod spectrum;

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::{Duration, Instant},
};

use crate::{AppConfig, Mode, ModeWatch, PixelBuffer, Result};

pub use spectrum::{draw_mirrored, render_spectrum};

/// The strip, shared between the engine and the active routine.
pub type SharedPixels = Arc<Mutex<PixelBuffer>>;

/// Longest uninterrupted sleep inside [`RenderContext::pause`].
const PAUSE_SLICE: Duration = Duration::from_millis(20);

/// Everything a routine is bound to while it runs.
#[derive(Clone)]
pub struct RenderContext {
    mode: Mode,
    watch: ModeWatch,
    pixels: SharedPixels,
    config: Arc<AppConfig>,
}

impl RenderContext {
    pub fn new(mode: Mode, watch: ModeWatch, pixels: SharedPixels, config: Arc<AppConfig>) -> Self {
        Self {
            mode,
            watch,
            pixels,
            config,
        }
    }

    /// The mode this routine was started for.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// False as soon as the engine selected another mode.
    pub fn is_active(&self) -> bool {
        self.watch.is(self.mode)
    }

    /// Runs `draw` with exclusive access to the strip.
    pub fn with_pixels<T>(&self, draw: impl FnOnce(&mut PixelBuffer) -> Result<T>) -> Result<T> {
        let mut pixels = self.lock_pixels();
        draw(&mut pixels)
    }

    /// Sleeps for `duration` in short slices, returning early once the routine
    /// has been cancelled. Returns whether the routine is still active.
    pub fn pause(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if !self.is_active() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(PAUSE_SLICE));
        }
    }

    fn lock_pixels(&self) -> MutexGuard<'_, PixelBuffer> {
        self.pixels.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
            tracing::warn!(mode = %self.mode, "recovering strip after a routine panicked");
            poisoned.into_inner()
        })
    }
}

impl fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext")
            .field("mode", &self.mode)
            .field("active", &self.is_active())
            .finish()
    }
}

/// A long-running unit of work implementing one mode.
pub type Routine = Arc<dyn Fn(&RenderContext) -> Result<()> + Send + Sync>;

/// Lookup table from mode to routine.
#[derive(Clone)]
pub struct RoutineTable {
    routines: [Routine; Mode::COUNT],
}

impl RoutineTable {
    /// The built-in routine for every mode.
    pub fn standard() -> Self {
        Self::from_fn(standard_routine)
    }

    pub fn from_fn(build: impl FnMut(Mode) -> Routine) -> Self {
        Self {
            routines: Mode::ALL.map(build),
        }
    }

    /// Replaces the routine bound to `mode`.
    #[must_use]
    pub fn with(mut self, mode: Mode, routine: Routine) -> Self {
        self.routines[mode.index()] = routine;
        self
    }

    pub fn get(&self, mode: Mode) -> Routine {
        self.routines[mode.index()].clone()
    }
}

impl Default for RoutineTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for RoutineTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutineTable")
            .field("modes", &Mode::ALL)
            .finish()
    }
}

fn standard_routine(mode: Mode) -> Routine {
    match mode {
        Mode::Idle => Arc::new(ambient::rotate_rainbow),
        Mode::ColorCycle => Arc::new(ambient::color_cycle),
        Mode::Breathe => Arc::new(ambient::breathe),
        Mode::SpectrumBars => Arc::new(spectrum::analyzer_bars),
        Mode::SpectrumFft => Arc::new(spectrum::local_fft),
    }
}
