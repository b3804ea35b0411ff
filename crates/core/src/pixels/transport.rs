//! Wire transports for the strip.
//!
//! Both hardware transports emit the frame bytes unchanged, most significant
//! bit first. The bit-banged path exists for boards without a serial bus
//! controller and must stay bit-identical to the clocked bus.

use embedded_hal::{digital::OutputPin, spi::SpiBus};

use crate::{Result, StripError};

/// Moves one serialized frame to the strip.
pub trait Transport: Send {
    /// Writes the whole frame. Calls are never interleaved.
    fn write(&mut self, frame: &[u8]) -> Result<()>;

    /// Gives the underlying device back. Called once, after the final write.
    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Transport over a clocked serial bus. The bus is expected to be configured
/// for the strip's clock rate when it is handed over.
#[derive(Debug)]
pub struct ClockedBus<B> {
    bus: Option<B>,
}

impl<B> ClockedBus<B>
where
    B: SpiBus<u8> + Send,
{
    pub fn new(bus: B) -> Self {
        Self { bus: Some(bus) }
    }
}

impl<B> Transport for ClockedBus<B>
where
    B: SpiBus<u8> + Send,
{
    fn write(&mut self, frame: &[u8]) -> Result<()> {
        let bus = self.bus.as_mut().ok_or(StripError::Released)?;
        bus.write(frame).map_err(spi_error)?;
        bus.flush().map_err(spi_error)
    }

    fn release(&mut self) -> Result<()> {
        if let Some(mut bus) = self.bus.take() {
            bus.flush().map_err(spi_error)?;
        }
        Ok(())
    }
}

fn spi_error<E: embedded_hal::spi::Error>(err: E) -> StripError {
    StripError::transport(format!("serial bus write failed: {:?}", err.kind()))
}

/// Transport that toggles a clock and a data line by hand.
#[derive(Debug)]
pub struct BitBang<C, D> {
    clock: C,
    data: D,
    released: bool,
}

impl<C, D> BitBang<C, D>
where
    C: OutputPin + Send,
    D: OutputPin + Send,
{
    pub fn new(clock: C, data: D) -> Self {
        Self {
            clock,
            data,
            released: false,
        }
    }

    fn write_byte(&mut self, mut byte: u8) -> Result<()> {
        for _ in 0..8 {
            self.data
                .set_state((byte & 0x80 != 0).into())
                .map_err(pin_error)?;
            self.clock.set_high().map_err(pin_error)?;
            self.clock.set_low().map_err(pin_error)?;
            byte <<= 1;
        }
        Ok(())
    }
}

impl<C, D> Transport for BitBang<C, D>
where
    C: OutputPin + Send,
    D: OutputPin + Send,
{
    fn write(&mut self, frame: &[u8]) -> Result<()> {
        if self.released {
            return Err(StripError::Released);
        }
        for &byte in frame {
            self.write_byte(byte)?;
        }
        // Holding the clock low latches the frame.
        self.clock.set_low().map_err(pin_error)
    }

    fn release(&mut self) -> Result<()> {
        self.released = true;
        Ok(())
    }
}

fn pin_error<E: embedded_hal::digital::Error>(err: E) -> StripError {
    StripError::transport(format!("gpio write failed: {:?}", err.kind()))
}

/// Discards frames. Lets the engine run on machines without a strip.
#[derive(Debug, Default)]
pub struct DryRun {
    frames: u64,
}

impl DryRun {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for DryRun {
    fn write(&mut self, frame: &[u8]) -> Result<()> {
        self.frames += 1;
        tracing::trace!(bytes = frame.len(), frame = self.frames, "dry-run flush");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;

    #[test]
    fn clocked_bus_writes_whole_frame() {
        let bus = RecordingBus::default();
        let mut transport = ClockedBus::new(bus.clone());

        transport.write(&[1, 2, 3, 4, 5, 6]).unwrap();

        assert_eq!(*bus.written.lock().unwrap(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(*bus.writes.lock().unwrap(), 1);
    }

    #[test]
    fn bit_bang_matches_clocked_bus_output() {
        let frame = [0x00, 0xff, 0xa5, 0x5a, 0x80, 0x01, 0x3c];

        let bus = RecordingBus::default();
        ClockedBus::new(bus.clone()).write(&frame).unwrap();

        let (clock, data, log) = RecordingPin::pair();
        BitBang::new(clock, data).write(&frame).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(decode_line_log(&log), *bus.written.lock().unwrap());
        assert_eq!(log.last(), Some(&(Line::Clock, false)));
    }

    #[test]
    fn bit_bang_pulses_clock_once_per_bit() {
        let (clock, data, log) = RecordingPin::pair();
        BitBang::new(clock, data).write(&[0b1000_0001]).unwrap();

        let rising = log
            .lock()
            .unwrap()
            .iter()
            .filter(|(line, level)| *line == Line::Clock && *level)
            .count();
        assert_eq!(rising, 8);
    }

    #[test]
    fn writes_after_release_fail() {
        let mut transport = ClockedBus::new(RecordingBus::default());
        transport.release().unwrap();
        assert!(matches!(transport.write(&[0]), Err(StripError::Released)));

        let (clock, data, _log) = RecordingPin::pair();
        let mut transport = BitBang::new(clock, data);
        transport.release().unwrap();
        assert!(matches!(transport.write(&[0]), Err(StripError::Released)));
    }

    #[test]
    fn surfaces_bus_failures() {
        let mut transport = ClockedBus::new(BrokenBus);
        let err = transport.write(&[1]).unwrap_err();
        assert!(matches!(err, StripError::Transport(_)));
    }
}
