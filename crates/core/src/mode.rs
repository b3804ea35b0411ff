use std::{
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};

use serde::{Deserialize, Serialize};

use crate::StripError;

/// Mutually exclusive rendering behaviors selectable by command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Rainbow gradient rotating along the strip.
    Idle,
    /// Whole strip stepping through the hue circle.
    ColorCycle,
    /// One hue fading in and out.
    Breathe,
    /// Mirrored bars fed by the external spectrum analyzer.
    SpectrumBars,
    /// Mirrored bars fed by local spectral analysis of the capture device.
    SpectrumFft,
}

impl Mode {
    pub const COUNT: usize = 5;

    pub const ALL: [Mode; Mode::COUNT] = [
        Mode::Idle,
        Mode::ColorCycle,
        Mode::Breathe,
        Mode::SpectrumBars,
        Mode::SpectrumFft,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Mode::Idle => "idle",
            Mode::ColorCycle => "color-cycle",
            Mode::Breathe => "breathe",
            Mode::SpectrumBars => "spectrum-bars",
            Mode::SpectrumFft => "spectrum-fft",
        }
    }

    /// Position in [`Mode::ALL`].
    pub const fn index(self) -> usize {
        self as usize
    }

    fn to_tag(self) -> u8 {
        self as u8 + 1
    }

    fn from_tag(tag: u8) -> Option<Self> {
        tag.checked_sub(1)
            .and_then(|index| Self::ALL.get(usize::from(index)).copied())
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mode {
    type Err = StripError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let wanted = name.trim();
        Mode::ALL
            .into_iter()
            .find(|mode| mode.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| StripError::UnknownMode(wanted.to_string()))
    }
}

/// Write side of the shared "current mode" cell. Only the scheduling loop
/// holds one.
#[derive(Debug, Default)]
pub struct ModeMarker {
    cell: Arc<AtomicU8>,
}

impl ModeMarker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, mode: Mode) {
        self.cell.store(mode.to_tag(), Ordering::Release);
    }

    /// Leaves no mode selected, which cancels every running routine.
    pub fn clear(&self) {
        self.cell.store(0, Ordering::Release);
    }

    pub fn get(&self) -> Option<Mode> {
        Mode::from_tag(self.cell.load(Ordering::Acquire))
    }

    pub fn watch(&self) -> ModeWatch {
        ModeWatch {
            cell: self.cell.clone(),
        }
    }
}

/// Read-only view of the current mode handed to routines.
#[derive(Debug, Clone)]
pub struct ModeWatch {
    cell: Arc<AtomicU8>,
}

impl ModeWatch {
    pub fn get(&self) -> Option<Mode> {
        Mode::from_tag(self.cell.load(Ordering::Acquire))
    }

    /// True while `mode` is still the selected one.
    pub fn is(&self, mode: Mode) -> bool {
        self.get() == Some(mode)
    }
}
