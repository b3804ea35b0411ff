//! Core library for the pixelstrip LED controller.
//!
//! Modules map onto the pieces of the controller: the pixel buffer and its
//! wire transports, audio frame sources, color mapping, the render routines
//! and the state machine that schedules them.

pub mod audio;
pub mod color;
pub mod config;
pub mod engine;
pub mod error;
pub mod mode;
pub mod pixels;
pub mod render;

pub use audio::{AudioFrame, BitFormat, Fetch, FrameSource};
pub use color::{ColorSweep, Rgb};
pub use config::{
    AnalyzerConfig, AppConfig, CaptureConfig, EngineConfig, RoutineConfig, StripConfig,
    TransportConfig,
};
pub use engine::{StateMachine, Status};
pub use error::{Result, StripError};
pub use mode::{Mode, ModeMarker, ModeWatch};
pub use pixels::{PixelBuffer, Slice};
pub use render::{RenderContext, Routine, RoutineTable, SharedPixels};
