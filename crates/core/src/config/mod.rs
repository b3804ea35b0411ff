use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{audio::BitFormat, color::ColorSweep, Mode, Result, StripError};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub strip: StripConfig,
    pub engine: EngineConfig,
    pub routines: RoutineConfig,
    pub analyzer: AnalyzerConfig,
    pub capture: CaptureConfig,
}

impl AppConfig {
    /// Loads the configuration from a JSON file, falling back to defaults when
    /// no path is given. Missing keys keep their default values.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|err| {
                    StripError::config(format!("failed to read {}: {err}", path.display()))
                })?;
                serde_json::from_str(&text)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let pixels = self.strip.pixel_count;
        if pixels == 0 {
            return Err(StripError::config("strip.pixel_count must be at least 1"));
        }
        if self.engine.poll_interval_ms == 0 {
            return Err(StripError::config("engine.poll_interval_ms must be positive"));
        }
        if self.routines.breathe_steps == 0 {
            return Err(StripError::config("routines.breathe_steps must be positive"));
        }

        // Bars are mirrored, so only half the strip (rounded up) can take them.
        let max_bars = pixels.div_ceil(2);
        let analyzer_bars = self.analyzer_bars();
        if analyzer_bars == 0 || analyzer_bars > max_bars {
            return Err(StripError::config(format!(
                "analyzer.bars must be between 1 and {max_bars}, got {analyzer_bars}"
            )));
        }

        let capture_bars = self.capture_bars();
        if capture_bars == 0 || capture_bars > max_bars {
            return Err(StripError::config(format!(
                "capture.bars must be between 1 and {max_bars}, got {capture_bars}"
            )));
        }
        if self.capture.fft_size / 2 + 1 < capture_bars {
            return Err(StripError::config(format!(
                "capture.fft_size {} yields fewer than {capture_bars} bins",
                self.capture.fft_size
            )));
        }
        if self.capture.block_size < self.capture.fft_size {
            return Err(StripError::config(
                "capture.block_size must be at least capture.fft_size",
            ));
        }
        Ok(())
    }

    /// Number of bars requested from the external analyzer.
    pub fn analyzer_bars(&self) -> usize {
        self.analyzer.bars.unwrap_or(self.strip.pixel_count / 2).max(1)
    }

    /// Number of bins kept from the local spectral analysis.
    pub fn capture_bars(&self) -> usize {
        self.capture.bars.unwrap_or(self.strip.pixel_count / 2).max(1)
    }
}

/// Physical strip description and transport selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StripConfig {
    pub pixel_count: usize,
    pub brightness: f32,
    pub auto_flush: bool,
    pub transport: TransportConfig,
}

impl Default for StripConfig {
    fn default() -> Self {
        Self {
            pixel_count: 32,
            brightness: 1.0,
            auto_flush: false,
            transport: TransportConfig::default(),
        }
    }
}

/// Which backend moves frames to the strip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TransportConfig {
    /// A clocked serial bus exposed as a spidev character device.
    Spi { device: PathBuf, baud_hz: u32 },
    /// Clock and data lines driven through sysfs GPIO.
    BitBang { clock_pin: u32, data_pin: u32 },
    /// Frames are discarded; useful without hardware attached.
    DryRun,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Spi {
            device: PathBuf::from("/dev/spidev0.0"),
            baud_hz: 2_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub poll_interval_ms: u64,
    pub initial_mode: Mode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            initial_mode: Mode::Idle,
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Timing and palette knobs for the render routines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutineConfig {
    pub rotate_interval_ms: u64,
    pub cycle_interval_ms: u64,
    pub breathe_step_ms: u64,
    pub breathe_steps: u32,
    pub breathe_pause_ms: u64,
    /// Colors for the analyzer-driven bars.
    pub palette: ColorSweep,
    /// Colors for the locally analyzed bars; plain white by default.
    pub fft_palette: ColorSweep,
}

impl Default for RoutineConfig {
    fn default() -> Self {
        Self {
            rotate_interval_ms: 200,
            cycle_interval_ms: 50,
            breathe_step_ms: 10,
            breathe_steps: 100,
            breathe_pause_ms: 1_000,
            palette: ColorSweep::default(),
            fft_palette: ColorSweep::Saturation {
                hue: 0.0,
                start: 0.0,
                end: 0.0,
                value: 1.0,
            },
        }
    }
}

/// Settings for the external spectrum analyzer process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub binary: PathBuf,
    /// Defaults to half the pixel count so the mirrored bars cover the strip.
    pub bars: Option<usize>,
    pub bit_format: BitFormat,
    pub input_method: String,
    pub source: String,
    /// `/dev/stdout` reads the process output directly, anything else is
    /// treated as a named pipe.
    pub raw_target: PathBuf,
    pub higher_cutoff_freq: u32,
    pub gravity: u32,
    pub autosens: bool,
    pub read_timeout_ms: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("cava"),
            bars: None,
            bit_format: BitFormat::Eight,
            input_method: "pulse".to_string(),
            source: "auto".to_string(),
            raw_target: PathBuf::from("/dev/stdout"),
            higher_cutoff_freq: 7_000,
            gravity: 100,
            autosens: false,
            read_timeout_ms: 500,
        }
    }
}

impl AnalyzerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn uses_stdout(&self) -> bool {
        self.raw_target == Path::new("/dev/stdout")
    }
}

/// Settings for the local capture and spectral analysis path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    pub fft_size: usize,
    pub bars: Option<usize>,
    pub read_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            block_size: 2_048,
            fft_size: 64,
            bars: None,
            read_timeout_ms: 500,
        }
    }
}

impl CaptureConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
