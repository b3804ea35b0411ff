//! Color helpers shared by the render routines.
//!
//! HSV is the only color model used for output. Conversions truncate each
//! channel to `floor(c * 255)`.

use serde::{Deserialize, Serialize};
use smart_leds::RGB8;

pub type Rgb = RGB8;

pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };

/// Converts an HSV triple (all components in `[0, 1]`) to an 8-bit color.
pub fn hsv_to_rgb(hue: f32, saturation: f32, value: f32) -> Rgb {
    let hue = hue - hue.floor();
    let saturation = saturation.clamp(0.0, 1.0);
    let value = value.clamp(0.0, 1.0);

    if saturation == 0.0 {
        return rgb_from_unit(value, value, value);
    }

    let sector = (hue * 6.0).floor();
    let fraction = hue * 6.0 - sector;
    let p = value * (1.0 - saturation);
    let q = value * (1.0 - saturation * fraction);
    let t = value * (1.0 - saturation * (1.0 - fraction));

    match sector as u8 % 6 {
        0 => rgb_from_unit(value, t, p),
        1 => rgb_from_unit(q, value, p),
        2 => rgb_from_unit(p, value, t),
        3 => rgb_from_unit(p, q, value),
        4 => rgb_from_unit(t, p, value),
        _ => rgb_from_unit(value, p, q),
    }
}

fn rgb_from_unit(r: f32, g: f32, b: f32) -> Rgb {
    Rgb {
        r: unit_to_byte(r),
        g: unit_to_byte(g),
        b: unit_to_byte(b),
    }
}

fn unit_to_byte(channel: f32) -> u8 {
    (channel.clamp(0.0, 1.0) * 255.0) as u8
}

/// Classic 0..=255 color wheel: red → green → blue → red.
pub fn wheel(pos: u8) -> Rgb {
    match pos {
        0..=84 => Rgb {
            r: pos * 3,
            g: 255 - pos * 3,
            b: 0,
        },
        85..=169 => {
            let pos = pos - 85;
            Rgb {
                r: 255 - pos * 3,
                g: 0,
                b: pos * 3,
            }
        }
        _ => {
            let pos = pos - 170;
            Rgb {
                r: 0,
                g: pos * 3,
                b: 255 - pos * 3,
            }
        }
    }
}

/// Maps a bar index and its magnitude to a color by interpolating either the
/// hue or the saturation across the bar range.
///
/// Hue values are in degrees, saturation values in percent, `value` is the
/// peak brightness in `[0, 1]` that gets scaled by the bar level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sweep", rename_all = "kebab-case")]
pub enum ColorSweep {
    Hue {
        start: f32,
        end: f32,
        saturation: f32,
        value: f32,
    },
    Saturation {
        hue: f32,
        start: f32,
        end: f32,
        value: f32,
    },
}

impl Default for ColorSweep {
    fn default() -> Self {
        Self::Saturation {
            hue: 0.0,
            start: 100.0,
            end: 90.0,
            value: 0.5,
        }
    }
}

impl ColorSweep {
    /// A full rainbow across the bars at full saturation.
    pub fn rainbow() -> Self {
        Self::Hue {
            start: 0.0,
            end: 360.0,
            saturation: 100.0,
            value: 1.0,
        }
    }

    pub fn color_for(&self, index: usize, bars: usize, level: f32) -> Rgb {
        let position = index as f32 / bars.max(1) as f32;
        let level = level.clamp(0.0, 1.0);

        match *self {
            Self::Hue {
                start,
                end,
                saturation,
                value,
            } => {
                let mut delta = end - start;
                if delta < 0.0 {
                    delta += 360.0;
                }
                let hue = start / 360.0 + position * delta / 360.0;
                hsv_to_rgb(hue, saturation / 100.0, value * level)
            }
            Self::Saturation {
                hue,
                start,
                end,
                value,
            } => {
                let saturation = start / 100.0 + position * (end - start) / 100.0;
                hsv_to_rgb(hue / 360.0, saturation, value * level)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgb = Rgb { r: 255, g: 0, b: 0 };

    #[test]
    fn converts_primary_hues() {
        assert_eq!(hsv_to_rgb(0.0, 1.0, 1.0), RED);
        assert_eq!(hsv_to_rgb(1.0 / 3.0, 1.0, 1.0), Rgb { r: 0, g: 255, b: 0 });
        assert_eq!(hsv_to_rgb(2.0 / 3.0, 1.0, 1.0), Rgb { r: 0, g: 0, b: 255 });
        assert_eq!(hsv_to_rgb(0.5, 0.0, 0.5), Rgb { r: 127, g: 127, b: 127 });
    }

    #[test]
    fn wheel_covers_the_three_segments() {
        assert_eq!(wheel(0), Rgb { r: 0, g: 255, b: 0 });
        assert_eq!(wheel(85), Rgb { r: 255, g: 0, b: 0 });
        assert_eq!(wheel(170), Rgb { r: 0, g: 0, b: 255 });
        assert_eq!(wheel(255), Rgb { r: 0, g: 255, b: 0 });
    }

    #[test]
    fn saturation_sweep_scales_value_by_level() {
        let sweep = ColorSweep::default();

        assert_eq!(sweep.color_for(0, 16, 1.0), Rgb { r: 127, g: 0, b: 0 });
        assert_eq!(sweep.color_for(0, 16, 0.0), BLACK);

        let last = sweep.color_for(15, 16, 1.0);
        assert_eq!(last.r, 127);
        assert!(last.g > 0 && last.g == last.b);
    }

    #[test]
    fn hue_sweep_wraps_around() {
        let sweep = ColorSweep::Hue {
            start: 300.0,
            end: 60.0,
            saturation: 100.0,
            value: 1.0,
        };

        // 300° + half of the 120° span lands exactly on 360° == red.
        assert_eq!(sweep.color_for(8, 16, 1.0), RED);
        assert_eq!(ColorSweep::rainbow().color_for(0, 16, 1.0), RED);
    }
}
