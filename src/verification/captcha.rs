//! Captcha answers and a raster renderer.
//!
//! Glyphs are stroke outlines on a 4x6 grid. Every character gets its own
//! jitter, scale and rotation, the whole image is bent by a sine wave, and
//! noise lines and speckles are drawn over the text. The result is a PNG, so
//! the answer never appears as text in the payload.

use base64::{Engine, engine::general_purpose::STANDARD};
use image::{Rgb, RgbImage, codecs::png::PngEncoder};
use rand::Rng;
use std::time::Duration;

const DEFAULT_CHARSET: &str = "1234567890";

const BACKGROUND: Rgb<u8> = Rgb([244, 244, 244]);

/// Captcha generation parameters.
#[derive(Debug, Clone)]
pub struct CaptchaConfig {
    /// Number of characters in the answer
    pub length: usize,
    /// Characters the answer is drawn from
    pub charset: String,
    pub width: u32,
    pub height: u32,
    pub noise_lines: u32,
    pub ttl: Duration,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            length: 4,
            charset: DEFAULT_CHARSET.to_string(),
            width: 240,
            height: 80,
            noise_lines: 4,
            ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// A generated captcha. The answer must never be sent to clients in production.
#[derive(Debug, Clone)]
pub struct Captcha {
    pub id: String,
    pub image: String,
    pub answer: String,
}

#[derive(Debug, thiserror::Error)]
#[error("captcha rendering failed: {0}")]
pub struct RenderError(pub String);

/// Turns an answer into something a human can read and a bot cannot.
pub trait CaptchaRenderer: Send + Sync {
    fn render(&self, answer: &str, config: &CaptchaConfig) -> Result<String, RenderError>;
}

/// Renders the answer as a distorted PNG, returned as a base64 data URL.
///
/// Supports ASCII digits and letters; letters are drawn upper case.
#[derive(Debug, Default, Clone, Copy)]
pub struct PngCaptchaRenderer;

type Stroke = &'static [(f32, f32)];

const RING: Stroke = &[
    (1.0, 0.0),
    (3.0, 0.0),
    (4.0, 1.0),
    (4.0, 5.0),
    (3.0, 6.0),
    (1.0, 6.0),
    (0.0, 5.0),
    (0.0, 1.0),
    (1.0, 0.0),
];
const BOWL: Stroke = &[
    (0.0, 6.0),
    (0.0, 0.0),
    (3.0, 0.0),
    (4.0, 1.0),
    (4.0, 2.0),
    (3.0, 3.0),
    (0.0, 3.0),
];

// Zero is slashed to tell it apart from O.
const GLYPHS: &[(char, &[Stroke])] = &[
    ('0', &[RING, &[(3.5, 1.0), (0.5, 5.0)]]),
    ('1', &[&[(1.0, 1.0), (2.0, 0.0), (2.0, 6.0)], &[(1.0, 6.0), (3.0, 6.0)]]),
    (
        '2',
        &[&[(0.0, 1.0), (1.0, 0.0), (3.0, 0.0), (4.0, 1.0), (4.0, 2.0), (0.0, 6.0), (4.0, 6.0)]],
    ),
    (
        '3',
        &[&[
            (0.0, 0.0),
            (4.0, 0.0),
            (2.0, 2.5),
            (3.0, 2.5),
            (4.0, 3.5),
            (4.0, 5.0),
            (3.0, 6.0),
            (1.0, 6.0),
            (0.0, 5.0),
        ]],
    ),
    ('4', &[&[(3.0, 6.0), (3.0, 0.0), (0.0, 4.0), (4.0, 4.0)]]),
    (
        '5',
        &[&[
            (4.0, 0.0),
            (0.0, 0.0),
            (0.0, 2.5),
            (3.0, 2.5),
            (4.0, 3.5),
            (4.0, 5.0),
            (3.0, 6.0),
            (0.0, 6.0),
        ]],
    ),
    (
        '6',
        &[&[
            (3.0, 0.0),
            (1.0, 0.0),
            (0.0, 1.0),
            (0.0, 5.0),
            (1.0, 6.0),
            (3.0, 6.0),
            (4.0, 5.0),
            (4.0, 4.0),
            (3.0, 3.0),
            (0.0, 3.0),
        ]],
    ),
    ('7', &[&[(0.0, 0.0), (4.0, 0.0), (1.5, 6.0)]]),
    (
        '8',
        &[
            &[
                (1.0, 0.0),
                (3.0, 0.0),
                (4.0, 1.0),
                (4.0, 2.0),
                (3.0, 3.0),
                (1.0, 3.0),
                (0.0, 4.0),
                (0.0, 5.0),
                (1.0, 6.0),
                (3.0, 6.0),
                (4.0, 5.0),
                (4.0, 4.0),
                (3.0, 3.0),
            ],
            &[(1.0, 3.0), (0.0, 2.0), (0.0, 1.0), (1.0, 0.0)],
        ],
    ),
    (
        '9',
        &[&[
            (4.0, 3.0),
            (1.0, 3.0),
            (0.0, 2.0),
            (0.0, 1.0),
            (1.0, 0.0),
            (3.0, 0.0),
            (4.0, 1.0),
            (4.0, 5.0),
            (3.0, 6.0),
            (1.0, 6.0),
        ]],
    ),
    ('A', &[&[(0.0, 6.0), (2.0, 0.0), (4.0, 6.0)], &[(0.8, 3.6), (3.2, 3.6)]]),
    (
        'B',
        &[
            &[(0.0, 0.0), (0.0, 6.0), (3.0, 6.0), (4.0, 5.0), (4.0, 4.0), (3.0, 3.0), (0.0, 3.0)],
            &[(0.0, 0.0), (3.0, 0.0), (4.0, 1.0), (4.0, 2.0), (3.0, 3.0)],
        ],
    ),
    (
        'C',
        &[&[
            (4.0, 1.0),
            (3.0, 0.0),
            (1.0, 0.0),
            (0.0, 1.0),
            (0.0, 5.0),
            (1.0, 6.0),
            (3.0, 6.0),
            (4.0, 5.0),
        ]],
    ),
    (
        'D',
        &[&[(0.0, 0.0), (0.0, 6.0), (2.5, 6.0), (4.0, 4.5), (4.0, 1.5), (2.5, 0.0), (0.0, 0.0)]],
    ),
    ('E', &[&[(4.0, 0.0), (0.0, 0.0), (0.0, 6.0), (4.0, 6.0)], &[(0.0, 3.0), (3.0, 3.0)]]),
    ('F', &[&[(4.0, 0.0), (0.0, 0.0), (0.0, 6.0)], &[(0.0, 3.0), (3.0, 3.0)]]),
    (
        'G',
        &[&[
            (4.0, 1.0),
            (3.0, 0.0),
            (1.0, 0.0),
            (0.0, 1.0),
            (0.0, 5.0),
            (1.0, 6.0),
            (3.0, 6.0),
            (4.0, 5.0),
            (4.0, 3.0),
            (2.0, 3.0),
        ]],
    ),
    ('H', &[&[(0.0, 0.0), (0.0, 6.0)], &[(4.0, 0.0), (4.0, 6.0)], &[(0.0, 3.0), (4.0, 3.0)]]),
    ('I', &[&[(1.0, 0.0), (3.0, 0.0)], &[(2.0, 0.0), (2.0, 6.0)], &[(1.0, 6.0), (3.0, 6.0)]]),
    (
        'J',
        &[&[(1.0, 0.0), (4.0, 0.0)], &[(3.0, 0.0), (3.0, 5.0), (2.0, 6.0), (1.0, 6.0), (0.0, 5.0)]],
    ),
    ('K', &[&[(0.0, 0.0), (0.0, 6.0)], &[(4.0, 0.0), (0.0, 3.5)], &[(1.2, 2.8), (4.0, 6.0)]]),
    ('L', &[&[(0.0, 0.0), (0.0, 6.0), (4.0, 6.0)]]),
    ('M', &[&[(0.0, 6.0), (0.0, 0.0), (2.0, 3.0), (4.0, 0.0), (4.0, 6.0)]]),
    ('N', &[&[(0.0, 6.0), (0.0, 0.0), (4.0, 6.0), (4.0, 0.0)]]),
    ('O', &[RING]),
    ('P', &[BOWL]),
    ('Q', &[RING, &[(2.5, 4.5), (4.0, 6.0)]]),
    ('R', &[BOWL, &[(2.0, 3.0), (4.0, 6.0)]]),
    (
        'S',
        &[&[
            (4.0, 1.0),
            (3.0, 0.0),
            (1.0, 0.0),
            (0.0, 1.0),
            (0.0, 2.0),
            (1.0, 3.0),
            (3.0, 3.0),
            (4.0, 4.0),
            (4.0, 5.0),
            (3.0, 6.0),
            (1.0, 6.0),
            (0.0, 5.0),
        ]],
    ),
    ('T', &[&[(0.0, 0.0), (4.0, 0.0)], &[(2.0, 0.0), (2.0, 6.0)]]),
    ('U', &[&[(0.0, 0.0), (0.0, 5.0), (1.0, 6.0), (3.0, 6.0), (4.0, 5.0), (4.0, 0.0)]]),
    ('V', &[&[(0.0, 0.0), (2.0, 6.0), (4.0, 0.0)]]),
    ('W', &[&[(0.0, 0.0), (1.0, 6.0), (2.0, 3.0), (3.0, 6.0), (4.0, 0.0)]]),
    ('X', &[&[(0.0, 0.0), (4.0, 6.0)], &[(4.0, 0.0), (0.0, 6.0)]]),
    ('Y', &[&[(0.0, 0.0), (2.0, 3.0), (4.0, 0.0)], &[(2.0, 3.0), (2.0, 6.0)]]),
    ('Z', &[&[(0.0, 0.0), (4.0, 0.0), (0.0, 6.0), (4.0, 6.0)]]),
];

fn glyph(c: char) -> Option<&'static [Stroke]> {
    let c = c.to_ascii_uppercase();
    GLYPHS
        .iter()
        .find(|(g, _)| *g == c)
        .map(|(_, strokes)| *strokes)
}

impl CaptchaRenderer for PngCaptchaRenderer {
    fn render(&self, answer: &str, config: &CaptchaConfig) -> Result<String, RenderError> {
        let glyphs = answer
            .chars()
            .map(|c| glyph(c).ok_or_else(|| RenderError(format!("no glyph for {:?}", c))))
            .collect::<Result<Vec<_>, _>>()?;

        let mut rng = rand::rng();
        let (width, height) = (config.width.max(1), config.height.max(1));
        let mut img = RgbImage::from_pixel(width, height, BACKGROUND);

        let (w, h) = (width as f32, height as f32);
        let cell = w / glyphs.len().max(1) as f32;
        let amplitude = h * rng.random_range(0.03f32..0.08);
        let frequency = rng.random_range(1.0f32..2.5) * std::f32::consts::TAU / w;
        let phase = rng.random_range(0.0..std::f32::consts::TAU);
        let warp = |x: f32, y: f32| (x, y + amplitude * (x * frequency + phase).sin());

        for (i, strokes) in glyphs.iter().enumerate() {
            let unit = (h * 0.6 / 6.0 * rng.random_range(0.85f32..1.1)).min(cell / 5.0);
            let radius = (unit * 0.35).max(1.0);
            let angle: f32 = rng.random_range(-0.35..0.35);
            let (sin, cos) = angle.sin_cos();
            let cx = cell * (i as f32 + 0.5) + rng.random_range(-0.1f32..0.1) * cell;
            let cy = h / 2.0 + rng.random_range(-0.1f32..0.1) * h;
            let color = Rgb([
                rng.random_range(20..110),
                rng.random_range(20..110),
                rng.random_range(20..110),
            ]);

            for stroke in strokes.iter() {
                let points: Vec<(f32, f32)> = stroke
                    .iter()
                    .map(|&(gx, gy)| {
                        let lx = (gx - 2.0 + rng.random_range(-0.25f32..0.25)) * unit;
                        let ly = (gy - 3.0 + rng.random_range(-0.25f32..0.25)) * unit;
                        warp(cx + lx * cos - ly * sin, cy + lx * sin + ly * cos)
                    })
                    .collect();
                for pair in points.windows(2) {
                    draw_segment(&mut img, pair[0], pair[1], radius, color);
                }
            }
        }

        for _ in 0..config.noise_lines {
            let from = (rng.random_range(0.0..w), rng.random_range(0.0..h));
            let to = (rng.random_range(0.0..w), rng.random_range(0.0..h));
            let color = Rgb([
                rng.random_range(60..200),
                rng.random_range(60..200),
                rng.random_range(60..200),
            ]);
            draw_segment(&mut img, from, to, 1.0, color);
        }

        for _ in 0..(width * height / 60) {
            let (x, y) = (rng.random_range(0..width), rng.random_range(0..height));
            img.put_pixel(x, y, Rgb([rng.random(), rng.random(), rng.random()]));
        }

        let mut png = Vec::new();
        img.write_with_encoder(PngEncoder::new(&mut png))
            .map_err(|e| RenderError(e.to_string()))?;

        Ok(format!("data:image/png;base64,{}", STANDARD.encode(png)))
    }
}

/// Thick line made of overlapping discs.
fn draw_segment(
    img: &mut RgbImage,
    from: (f32, f32),
    to: (f32, f32),
    radius: f32,
    color: Rgb<u8>,
) {
    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    let steps = ((dx * dx + dy * dy).sqrt() / (radius * 0.5)).ceil().max(1.0) as u32;
    for step in 0..=steps {
        let t = step as f32 / steps as f32;
        stamp(img, from.0 + dx * t, from.1 + dy * t, radius, color);
    }
}

fn stamp(img: &mut RgbImage, x: f32, y: f32, radius: f32, color: Rgb<u8>) {
    let r = radius.ceil() as i64;
    let (cx, cy) = (x.round() as i64, y.round() as i64);
    for oy in -r..=r {
        for ox in -r..=r {
            if (ox * ox + oy * oy) as f32 > radius * radius {
                continue;
            }
            let (px, py) = (cx + ox, cy + oy);
            if px >= 0 && py >= 0 && px < img.width() as i64 && py < img.height() as i64 {
                img.put_pixel(px as u32, py as u32, color);
            }
        }
    }
}

/// Draw a random answer from the configured charset.
pub fn generate_answer(config: &CaptchaConfig) -> String {
    let charset: Vec<char> = if config.charset.is_empty() {
        DEFAULT_CHARSET.chars().collect()
    } else {
        config.charset.chars().collect()
    };
    let mut rng = rand::rng();
    (0..config.length.max(1))
        .map(|_| charset[rng.random_range(0..charset.len())])
        .collect()
}

/// Case-insensitive comparison, the established behavior for captcha answers.
pub fn answer_matches(expected: &str, input: &str) -> bool {
    expected.to_lowercase() == input.trim().to_lowercase()
}
