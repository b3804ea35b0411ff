//! In-memory frame buffer for the strip and the transports that push it to
//! the hardware.

#[cfg(target_os = "linux")]
pub mod linux;
pub mod transport;

use std::fmt;

use crate::{color::BLACK, config::StripConfig, config::TransportConfig, Result, Rgb, StripError};

pub use transport::{BitBang, ClockedBus, DryRun, Transport};

/// Strided selection of pixels. Negative positions count from the end and
/// out-of-range bounds are clipped, so any slice over any strip is valid as
/// long as the step is not zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slice {
    pub start: Option<isize>,
    pub stop: Option<isize>,
    pub step: isize,
}

impl Slice {
    pub fn new(start: isize, stop: isize) -> Self {
        Self {
            start: Some(start),
            stop: Some(stop),
            step: 1,
        }
    }

    /// Every pixel, front to back.
    pub fn full() -> Self {
        Self {
            start: None,
            stop: None,
            step: 1,
        }
    }

    #[must_use]
    pub fn step_by(mut self, step: isize) -> Self {
        self.step = step;
        self
    }

    /// Resolves the slice against a strip length into concrete
    /// `(start, stop, step)` bounds.
    pub fn indices(&self, len: usize) -> Result<(isize, isize, isize)> {
        let step = self.step;
        if step == 0 {
            return Err(StripError::InvalidInput("slice step cannot be zero"));
        }

        let len = len as isize;
        let (lower, upper) = if step < 0 { (-1, len - 1) } else { (0, len) };
        let clip = |bound: Option<isize>, default: isize| match bound {
            None => default,
            Some(value) if value < 0 => (value + len).max(lower),
            Some(value) => value.min(upper),
        };

        let start = clip(self.start, if step < 0 { upper } else { lower });
        let stop = clip(self.stop, if step < 0 { lower } else { upper });
        Ok((start, stop, step))
    }

    /// Number of pixels selected, i.e. `ceil((stop - start) / step)`.
    pub fn len(&self, len: usize) -> Result<usize> {
        let (start, stop, step) = self.indices(len)?;
        let count = if step > 0 && start < stop {
            (stop - start - 1) / step + 1
        } else if step < 0 && stop < start {
            (start - stop - 1) / (-step) + 1
        } else {
            0
        };
        Ok(count as usize)
    }

    fn positions(&self, len: usize) -> Result<impl Iterator<Item = usize>> {
        let (start, _, step) = self.indices(len)?;
        let count = self.len(len)?;
        Ok((0..count as isize).map(move |k| (start + k * step) as usize))
    }
}

/// RGB frame buffer bound to a transport.
///
/// Colors are stored untouched. Brightness is applied to a scratch copy on
/// every flush, so dimming never loses the logical color values.
pub struct PixelBuffer {
    pixels: Vec<Rgb>,
    brightness: f32,
    auto_flush: bool,
    transport: Option<Box<dyn Transport>>,
    wire: Vec<u8>,
    flushes: u64,
}

impl PixelBuffer {
    pub fn new(pixel_count: usize, transport: Box<dyn Transport>) -> Result<Self> {
        if pixel_count == 0 {
            return Err(StripError::InvalidInput("a strip needs at least one pixel"));
        }
        Ok(Self {
            pixels: vec![BLACK; pixel_count],
            brightness: 1.0,
            auto_flush: false,
            transport: Some(transport),
            wire: Vec::with_capacity(pixel_count * 3),
            flushes: 0,
        })
    }

    /// Opens the configured transport and applies the initial brightness and
    /// auto-flush settings.
    pub fn from_config(config: &StripConfig) -> Result<Self> {
        let transport = open_transport(&config.transport)?;
        let mut buffer = Self::new(config.pixel_count, transport)?;
        buffer.set_brightness(config.brightness)?;
        buffer.set_auto_flush(config.auto_flush);
        Ok(buffer)
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn colors(&self) -> &[Rgb] {
        &self.pixels
    }

    pub fn brightness(&self) -> f32 {
        self.brightness
    }

    pub fn auto_flush(&self) -> bool {
        self.auto_flush
    }

    pub fn set_auto_flush(&mut self, enabled: bool) {
        self.auto_flush = enabled;
    }

    /// Number of frames handed to the transport so far.
    pub fn frames_flushed(&self) -> u64 {
        self.flushes
    }

    pub fn is_released(&self) -> bool {
        self.transport.is_none()
    }

    pub fn get(&self, index: isize) -> Result<Rgb> {
        let index = self.resolve(index)?;
        Ok(self.pixels[index])
    }

    pub fn set(&mut self, index: isize, color: Rgb) -> Result<()> {
        let index = self.resolve(index)?;
        self.pixels[index] = color;
        self.after_write()
    }

    pub fn get_range(&self, slice: Slice) -> Result<Vec<Rgb>> {
        Ok(slice
            .positions(self.len())?
            .map(|index| self.pixels[index])
            .collect())
    }

    /// Assigns `colors` to the slice in order. Fails without touching the
    /// buffer when the lengths differ.
    pub fn set_range(&mut self, slice: Slice, colors: &[Rgb]) -> Result<()> {
        let expected = slice.len(self.len())?;
        if expected != colors.len() {
            return Err(StripError::LengthMismatch {
                expected,
                actual: colors.len(),
            });
        }
        for (index, color) in slice.positions(self.len())?.zip(colors) {
            self.pixels[index] = *color;
        }
        self.after_write()
    }

    /// Sets every pixel. With auto-flush enabled this causes a single
    /// transfer.
    pub fn fill(&mut self, color: Rgb) -> Result<()> {
        self.pixels.fill(color);
        self.after_write()
    }

    /// Shifts every pixel `by` positions towards the front, wrapping the
    /// first pixels around to the back.
    pub fn rotate_left(&mut self, by: usize) -> Result<()> {
        let len = self.len();
        self.pixels.rotate_left(by % len);
        self.after_write()
    }

    pub fn set_brightness(&mut self, brightness: f32) -> Result<()> {
        self.brightness = if brightness.is_nan() {
            0.0
        } else {
            brightness.clamp(0.0, 1.0)
        };
        self.after_write()
    }

    /// Sends the current frame to the strip, red-green-blue per pixel.
    pub fn flush(&mut self) -> Result<()> {
        let transport = self.transport.as_mut().ok_or(StripError::Released)?;

        self.wire.clear();
        let scale = self.brightness;
        for pixel in &self.pixels {
            for channel in [pixel.r, pixel.g, pixel.b] {
                let byte = if scale < 1.0 {
                    (f32::from(channel) * scale) as u8
                } else {
                    channel
                };
                self.wire.push(byte);
            }
        }

        transport.write(&self.wire)?;
        self.flushes += 1;
        tracing::trace!(frame = self.flushes, bytes = self.wire.len(), "flushed strip");
        Ok(())
    }

    /// Blanks the strip and gives the transport back. Safe to call again.
    pub fn release(&mut self) -> Result<()> {
        if self.transport.is_none() {
            return Ok(());
        }

        self.auto_flush = false;
        self.pixels.fill(BLACK);
        let blanked = self.flush();

        let released = match self.transport.take() {
            Some(mut transport) => transport.release(),
            None => Ok(()),
        };
        tracing::debug!(pixels = self.len(), "released strip");
        blanked.and(released)
    }

    fn resolve(&self, index: isize) -> Result<usize> {
        let len = self.len();
        let resolved = if index < 0 {
            index + len as isize
        } else {
            index
        };
        if resolved < 0 || resolved as usize >= len {
            return Err(StripError::IndexOutOfRange { index, len });
        }
        Ok(resolved as usize)
    }

    fn after_write(&mut self) -> Result<()> {
        if self.auto_flush {
            self.flush()
        } else {
            Ok(())
        }
    }
}

impl Drop for PixelBuffer {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::warn!(%err, "failed to blank strip on drop");
        }
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("pixels", &self.pixels.len())
            .field("brightness", &self.brightness)
            .field("auto_flush", &self.auto_flush)
            .field("released", &self.transport.is_none())
            .field("flushes", &self.flushes)
            .finish()
    }
}

/// Builds the transport named by the configuration.
pub fn open_transport(config: &TransportConfig) -> Result<Box<dyn Transport>> {
    match config {
        TransportConfig::DryRun => Ok(Box::new(DryRun::new())),
        #[cfg(target_os = "linux")]
        TransportConfig::Spi { device, baud_hz } => {
            let bus = linux::SpidevBus::open(device, *baud_hz)?;
            Ok(Box::new(ClockedBus::new(bus)))
        }
        #[cfg(target_os = "linux")]
        TransportConfig::BitBang {
            clock_pin,
            data_pin,
        } => {
            let clock = linux::SysfsPin::export(*clock_pin)?;
            let data = linux::SysfsPin::export(*data_pin)?;
            tracing::info!(clock_pin, data_pin, "driving strip through gpio lines");
            Ok(Box::new(BitBang::new(clock, data)))
        }
        #[cfg(not(target_os = "linux"))]
        other => Err(StripError::config(format!(
            "transport {other:?} is only available on linux"
        ))),
    }
}
