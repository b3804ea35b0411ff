use super::RenderContext;
use crate::{
    audio::{AnalyzerProcess, AudioFrame, Fetch, FrameSource},
    color::ColorSweep,
    PixelBuffer, Result,
};

/// Writes each bar to pixel `i` and to its mirror `len - 1 - i`, then flushes
/// once. Only the first half of the strip (rounded up) takes bars; the rest
/// are ignored.
pub fn draw_mirrored(pixels: &mut PixelBuffer, frame: &AudioFrame, palette: &ColorSweep) -> Result<()> {
    let len = pixels.len();
    let bars = frame.len();
    for (index, &level) in frame.levels().iter().enumerate().take(len.div_ceil(2)) {
        let color = palette.color_for(index, bars, level);
        pixels.set(index as isize, color)?;
        pixels.set((len - 1 - index) as isize, color)?;
    }
    pixels.flush()
}

/// Pulls frames from `source` until the routine is cancelled or the source
/// ends. A source that times out only costs one marker check.
pub fn render_spectrum(ctx: &RenderContext, source: &mut dyn FrameSource, palette: &ColorSweep) -> Result<()> {
    while ctx.is_active() {
        match source.next_frame()? {
            Fetch::Ready(frame) => ctx.with_pixels(|pixels| draw_mirrored(pixels, &frame, palette))?,
            Fetch::Pending => tracing::trace!(mode = %ctx.mode(), "no audio frame yet"),
            Fetch::Ended => {
                tracing::info!(mode = %ctx.mode(), "audio stream ended");
                break;
            }
        }
    }
    Ok(())
}

/// Bars from the external analyzer process. The process is stopped when this
/// returns, whichever way it returns.
pub(super) fn analyzer_bars(ctx: &RenderContext) -> Result<()> {
    let config = ctx.config();
    let mut analyzer = AnalyzerProcess::spawn(&config.analyzer, config.analyzer_bars())?;
    render_spectrum(ctx, &mut analyzer, &config.routines.palette)
}

/// Bars from local spectral analysis of the default capture device.
#[cfg(feature = "capture")]
pub(super) fn local_fft(ctx: &RenderContext) -> Result<()> {
    use crate::audio::{CpalCapture, SpectralAnalyzer};

    let config = ctx.config();
    let capture = CpalCapture::open(&config.capture)?;
    let mut analyzer = SpectralAnalyzer::new(capture, &config.capture, config.capture_bars())?;
    render_spectrum(ctx, &mut analyzer, &config.routines.fft_palette)
}

#[cfg(not(feature = "capture"))]
pub(super) fn local_fft(ctx: &RenderContext) -> Result<()> {
    tracing::error!(mode = %ctx.mode(), "built without audio capture support");
    Err(crate::StripError::audio(
        "spectrum-fft needs the `capture` feature",
    ))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::super::testing::context;
    use super::*;
    use crate::{color::BLACK, Mode, ModeMarker};

    struct ScriptedFrames {
        frames: VecDeque<Fetch<AudioFrame>>,
        cancel_after: Option<(usize, ModeMarker)>,
        served: usize,
    }

    impl ScriptedFrames {
        fn new(frames: Vec<Fetch<AudioFrame>>) -> Self {
            Self {
                frames: frames.into(),
                cancel_after: None,
                served: 0,
            }
        }
    }

    impl FrameSource for ScriptedFrames {
        fn next_frame(&mut self) -> Result<Fetch<AudioFrame>> {
            self.served += 1;
            if let Some((after, marker)) = &self.cancel_after {
                if self.served > *after {
                    marker.set(Mode::Idle);
                }
            }
            Ok(self.frames.pop_front().unwrap_or(Fetch::Ended))
        }
    }

    #[test]
    fn mirrors_each_bar() {
        let (ctx, _marker) = context(Mode::SpectrumBars, 50);
        let mut levels = vec![0.0; 25];
        levels[3] = 0.8;
        let frame = AudioFrame::from_levels(levels);
        let palette = ColorSweep::rainbow();

        ctx.with_pixels(|pixels| {
            draw_mirrored(pixels, &frame, &palette)?;
            let lit = pixels.get(3)?;
            assert_ne!(lit, BLACK);
            assert_eq!(pixels.get(46)?, lit);
            assert_eq!(pixels.get(4)?, BLACK);
            assert_eq!(pixels.frames_flushed(), 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn extra_bars_do_not_overwrite_mirrors() {
        let (ctx, _marker) = context(Mode::SpectrumBars, 4);
        let frame = AudioFrame::from_levels(vec![1.0; 9]);
        let palette = ColorSweep::rainbow();

        ctx.with_pixels(|pixels| {
            draw_mirrored(pixels, &frame, &palette)?;
            let first = palette.color_for(0, 9, 1.0);
            let second = palette.color_for(1, 9, 1.0);
            assert_ne!(first, second);
            assert_eq!(pixels.colors(), &[first, second, second, first]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn odd_strips_light_the_middle_pixel() {
        let (ctx, _marker) = context(Mode::SpectrumBars, 5);
        let frame = AudioFrame::from_levels(vec![1.0; 3]);
        let palette = ColorSweep::rainbow();

        ctx.with_pixels(|pixels| {
            draw_mirrored(pixels, &frame, &palette)?;
            assert_eq!(pixels.get(2)?, palette.color_for(2, 3, 1.0));
            assert_eq!(pixels.get(0)?, pixels.get(4)?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn stops_when_the_stream_ends() {
        let (ctx, _marker) = context(Mode::SpectrumBars, 8);
        let mut source = ScriptedFrames::new(vec![
                Fetch::Ready(AudioFrame::from_levels(vec![0.0, 0.25, 0.5, 1.0])),
                Fetch::Pending,
                Fetch::Ready(AudioFrame::from_levels(vec![1.0; 4])),
            ],
        );

        render_spectrum(&ctx, &mut source, &ColorSweep::default()).unwrap();

        assert_eq!(source.served, 4);
        ctx.with_pixels(|pixels| {
            assert_eq!(pixels.frames_flushed(), 2);
            assert_eq!(pixels.get(0)?, pixels.get(7)?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn stops_when_cancelled() {
        let (ctx, marker) = context(Mode::SpectrumFft, 8);
        let frames = (0..100)
            .map(|_| Fetch::Ready(AudioFrame::from_levels(vec![0.5; 4])))
            .collect();
        let mut source = ScriptedFrames::new(frames);
        source.cancel_after = Some((3, marker));

        render_spectrum(&ctx, &mut source, &ColorSweep::default()).unwrap();

        assert_eq!(source.served, 4);
        ctx.with_pixels(|pixels| {
            assert_eq!(pixels.frames_flushed(), 4);
            Ok(())
        })
        .unwrap();
    }

    #[cfg(not(feature = "capture"))]
    #[test]
    fn local_fft_requires_capture_support() {
        let (ctx, _marker) = context(Mode::SpectrumFft, 8);
        assert!(local_fft(&ctx).is_err());
    }
}
