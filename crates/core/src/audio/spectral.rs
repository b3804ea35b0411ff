use std::{fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use super::{AudioFrame, Fetch, FrameSource};
use crate::{config::CaptureConfig, Result, StripError};

/// Magnitude gain applied before normalizing by the transform size.
const MAGNITUDE_GAIN: f32 = 10.0;

/// Blocking, timeout-bounded source of raw mono samples.
pub trait SampleSource {
    fn read_block(&mut self, len: usize) -> Result<Fetch<Vec<f32>>>;
}

/// Local spectral analysis: one block of samples in, one frame of bin
/// magnitudes out.
///
/// Only the first `fft_size` samples of each block are transformed. The
/// lowest `bars` bins are kept and scaled by `MAGNITUDE_GAIN / fft_size`.
pub struct SpectralAnalyzer<S> {
    source: S,
    block_size: usize,
    bars: usize,
    normalization: f32,
    plan: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl<S: SampleSource> SpectralAnalyzer<S> {
    pub fn new(source: S, config: &CaptureConfig, bars: usize) -> Result<Self> {
        let fft_size = config.fft_size;
        if fft_size < 2 {
            return Err(StripError::InvalidInput("fft size must be at least 2"));
        }
        if bars == 0 || bars > fft_size / 2 + 1 {
            return Err(StripError::config(format!(
                "{bars} bars do not fit a {fft_size}-point transform"
            )));
        }

        let plan = RealFftPlanner::<f32>::new().plan_fft_forward(fft_size);
        let input = plan.make_input_vec();
        let spectrum = plan.make_output_vec();
        let scratch = plan.make_scratch_vec();

        Ok(Self {
            source,
            block_size: config.block_size.max(fft_size),
            bars,
            normalization: MAGNITUDE_GAIN / fft_size as f32,
            plan,
            input,
            spectrum,
            scratch,
        })
    }

    /// Transforms one block of samples. Short blocks are zero padded.
    pub fn analyze(&mut self, samples: &[f32]) -> Result<AudioFrame> {
        let take = samples.len().min(self.input.len());
        self.input[..take].copy_from_slice(&samples[..take]);
        self.input[take..].fill(0.0);

        self.plan
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)?;

        let levels = self.spectrum[..self.bars]
            .iter()
            .map(|bin| bin.norm() * self.normalization)
            .collect();
        Ok(AudioFrame::from_levels(levels))
    }
}

impl<S: SampleSource> FrameSource for SpectralAnalyzer<S> {
    fn next_frame(&mut self) -> Result<Fetch<AudioFrame>> {
        match self.source.read_block(self.block_size)? {
            Fetch::Ready(block) => Ok(Fetch::Ready(self.analyze(&block)?)),
            Fetch::Pending => Ok(Fetch::Pending),
            Fetch::Ended => Ok(Fetch::Ended),
        }
    }
}

impl<S> fmt::Debug for SpectralAnalyzer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralAnalyzer")
            .field("block_size", &self.block_size)
            .field("fft_size", &self.input.len())
            .field("bars", &self.bars)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, f32::consts::PI};

    use super::*;

    struct ScriptedSamples {
        blocks: VecDeque<Fetch<Vec<f32>>>,
    }

    impl SampleSource for ScriptedSamples {
        fn read_block(&mut self, _len: usize) -> Result<Fetch<Vec<f32>>> {
            Ok(self.blocks.pop_front().unwrap_or(Fetch::Ended))
        }
    }

    fn config() -> CaptureConfig {
        CaptureConfig {
            block_size: 128,
            fft_size: 64,
            ..CaptureConfig::default()
        }
    }

    fn sine(bin: usize, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| amplitude * (2.0 * PI * bin as f32 * n as f32 / 64.0).sin())
            .collect()
    }

    #[test]
    fn sine_lands_in_its_bin() {
        let source = ScriptedSamples {
            blocks: VecDeque::from([Fetch::Ready(sine(4, 0.1, 128))]),
        };
        let mut analyzer = SpectralAnalyzer::new(source, &config(), 32).unwrap();

        let frame = analyzer.next_frame().unwrap().ready().expect("a frame");
        assert_eq!(frame.len(), 32);
        assert!((frame.levels()[4] - 0.5).abs() < 1e-3, "{}", frame.levels()[4]);
        for (bin, level) in frame.levels().iter().enumerate() {
            if bin != 4 {
                assert!(*level < 1e-3, "bin {bin} leaked {level}");
            }
        }
    }

    #[test]
    fn loud_bins_saturate_at_one() {
        let source = ScriptedSamples {
            blocks: VecDeque::new(),
        };
        let mut analyzer = SpectralAnalyzer::new(source, &config(), 8).unwrap();

        let frame = analyzer.analyze(&[1.0; 64]).unwrap();
        assert_eq!(frame.levels()[0], 1.0);
        assert!(frame.levels()[1..].iter().all(|level| *level < 1e-3));
    }

    #[test]
    fn forwards_pending_and_end() {
        let source = ScriptedSamples {
            blocks: VecDeque::from([Fetch::Pending]),
        };
        let mut analyzer = SpectralAnalyzer::new(source, &config(), 8).unwrap();

        assert_eq!(analyzer.next_frame().unwrap(), Fetch::Pending);
        assert_eq!(analyzer.next_frame().unwrap(), Fetch::Ended);
    }

    #[test]
    fn rejects_too_many_bars() {
        let source = ScriptedSamples {
            blocks: VecDeque::new(),
        };
        assert!(SpectralAnalyzer::new(source, &config(), 34).is_err());
    }
}
