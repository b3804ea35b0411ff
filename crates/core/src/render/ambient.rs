use std::time::Duration;

use super::RenderContext;
use crate::{
    color::{hsv_to_rgb, wheel},
    Result,
};

const BREATHE_HUE: f32 = 328.0 / 360.0;
const BREATHE_PEAK: f32 = 0.22;
const BREATHE_FLOOR: f32 = 0.02;
/// Hue advance per color-cycle step, as a fraction of the full circle.
const CYCLE_HUE_STEP: f32 = 1.0 / 120.0;

/// Spreads one rainbow over the strip, then rotates it by one pixel per step.
pub(super) fn rotate_rainbow(ctx: &RenderContext) -> Result<()> {
    let interval = Duration::from_millis(ctx.config().routines.rotate_interval_ms);

    ctx.with_pixels(|pixels| {
        let len = pixels.len();
        for index in 0..len {
            pixels.set(index as isize, wheel((index * 256 / len % 256) as u8))?;
        }
        pixels.flush()
    })?;

    while ctx.is_active() {
        ctx.with_pixels(|pixels| {
            pixels.rotate_left(1)?;
            pixels.flush()
        })?;
        ctx.pause(interval);
    }
    Ok(())
}

/// Fills the strip with one color that walks around the hue circle.
pub(super) fn color_cycle(ctx: &RenderContext) -> Result<()> {
    let interval = Duration::from_millis(ctx.config().routines.cycle_interval_ms);
    let mut hue = 0.0_f32;

    while ctx.is_active() {
        let color = hsv_to_rgb(hue, 1.0, 1.0);
        ctx.with_pixels(|pixels| {
            pixels.fill(color)?;
            pixels.flush()
        })?;
        hue = (hue + CYCLE_HUE_STEP).fract();
        ctx.pause(interval);
    }
    Ok(())
}

/// Dims a single pink hue down to a glow, holds, and brings it back up.
pub(super) fn breathe(ctx: &RenderContext) -> Result<()> {
    let routines = &ctx.config().routines;
    let steps = routines.breathe_steps.max(1);
    let step = Duration::from_millis(routines.breathe_step_ms);
    let hold = Duration::from_millis(routines.breathe_pause_ms);

    while ctx.is_active() {
        if !ramp(ctx, BREATHE_PEAK, BREATHE_FLOOR, steps, step)? {
            break;
        }
        if !ctx.pause(hold) {
            break;
        }
        if !ramp(ctx, BREATHE_FLOOR, BREATHE_PEAK, steps, step)? {
            break;
        }
    }
    Ok(())
}

/// Moves the breathe value from `from` to `to` in `steps` flushes. Returns
/// false when cancelled midway.
fn ramp(ctx: &RenderContext, from: f32, to: f32, steps: u32, interval: Duration) -> Result<bool> {
    let delta = (to - from) / steps as f32;
    for step in 1..=steps {
        if !ctx.is_active() {
            return Ok(false);
        }
        let color = hsv_to_rgb(BREATHE_HUE, 1.0, from + delta * step as f32);
        ctx.with_pixels(|pixels| {
            pixels.fill(color)?;
            pixels.flush()
        })?;
        if !ctx.pause(interval) {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::{
        thread,
        time::{Duration, Instant},
    };

    use super::super::testing::context;
    use super::*;
    use crate::{Mode, Rgb};

    #[test]
    fn rainbow_rotates_until_cancelled() {
        let (ctx, marker) = context(Mode::Idle, 8);
        let worker = {
            let ctx = ctx.clone();
            thread::spawn(move || rotate_rainbow(&ctx))
        };

        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        marker.set(Mode::Breathe);
        worker.join().unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_millis(150));

        ctx.with_pixels(|pixels| {
            // One initial frame plus one per rotation.
            assert!(pixels.frames_flushed() >= 2);
            let colors = pixels.colors().to_vec();
            assert!(colors.contains(&wheel(0)));
            assert!(colors.contains(&wheel(32)));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn breathe_stays_on_one_hue() {
        let (ctx, marker) = context(Mode::Breathe, 4);
        let worker = {
            let ctx = ctx.clone();
            thread::spawn(move || breathe(&ctx))
        };

        thread::sleep(Duration::from_millis(40));
        marker.set(Mode::Idle);
        worker.join().unwrap().unwrap();

        ctx.with_pixels(|pixels| {
            let first = pixels.get(0)?;
            assert!(pixels.colors().iter().all(|color| *color == first));
            // Pink: red dominates, blue above green.
            assert!(first.r > first.b && first.b >= first.g);
            assert_ne!(first, Rgb::default());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn inactive_routines_return_immediately() {
        let (ctx, marker) = context(Mode::ColorCycle, 4);
        marker.set(Mode::Idle);

        color_cycle(&ctx).unwrap();
        ctx.with_pixels(|pixels| {
            assert_eq!(pixels.frames_flushed(), 0);
            Ok(())
        })
        .unwrap();
    }
}
