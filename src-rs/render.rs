use crate::enrich::DetectionHit;
use crate::language::LanguageProfile;
use crate::layout::{panel_rect, BlockSize, Position};
use crate::wrap::TextLine;
use ab_glyph::{FontVec, PxScale};
use font8x8::{UnicodeFonts, BASIC_FONTS, LATIN_FONTS};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Vertical distance between consecutive text lines, independent of font metrics.
pub const LINE_PITCH: u32 = 42;
pub const PANEL_RADIUS: f64 = 15.0;
pub const PANEL_FILL: Rgba<u8> = Rgba([0, 0, 0, 150]);
pub const TEXT_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
pub const BOX_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);
pub const BOX_THICKNESS: u32 = 3;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to decode image {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to encode image {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to load font {}: {reason}", path.display())]
    Font { path: PathBuf, reason: String },
}

pub enum FontFace {
    Vector { font: FontVec, scale: PxScale },
    /// 8x8 bitmap glyphs scaled by an integer factor; used when no font file
    /// is configured. Glyphs outside the basic/latin tables render as `?`.
    Bitmap { scale: u32 },
}

impl std::fmt::Debug for FontFace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FontFace::Vector { scale, .. } => write!(f, "FontFace::Vector({}px)", scale.y),
            FontFace::Bitmap { scale } => write!(f, "FontFace::Bitmap(x{scale})"),
        }
    }
}

impl FontFace {
    /// Loads a TrueType/OpenType font (first face of a collection).
    pub fn load(path: &Path, px: f32) -> Result<Self, RenderError> {
        let data = fs::read(path).map_err(|source| RenderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let font = FontVec::try_from_vec_and_index(data, 0).map_err(|err| RenderError::Font {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        info!(path = %path.display(), px, "loaded font");
        Ok(FontFace::Vector {
            font,
            scale: PxScale::from(px),
        })
    }

    pub fn bitmap(px: f32) -> Self {
        FontFace::Bitmap {
            scale: (px / 8.0).round().max(1.0) as u32,
        }
    }

    pub fn measure(&self, text: &str) -> u32 {
        match self {
            FontFace::Vector { font, scale } => text_size(*scale, font, text).0,
            FontFace::Bitmap { scale } => text.chars().count() as u32 * 8 * (*scale).max(1),
        }
    }

    pub fn draw(&self, img: &mut RgbaImage, x: i32, y: i32, text: &str, color: Rgba<u8>) {
        match self {
            FontFace::Vector { font, scale } => draw_text_mut(img, color, x, y, *scale, font, text),
            FontFace::Bitmap { scale } => draw_bitmap_text(img, x, y, text, color, *scale),
        }
    }
}

/// Header and body faces for one language.
#[derive(Debug)]
pub struct FontSet {
    pub header: FontFace,
    pub body: FontFace,
}

impl FontSet {
    pub fn bitmap(profile: &LanguageProfile) -> Self {
        Self {
            header: FontFace::bitmap(profile.header_font_px),
            body: FontFace::bitmap(profile.body_font_px),
        }
    }

    /// Loads the configured font files; a face without a path falls back to
    /// the bitmap glyphs.
    pub fn load(
        header_path: Option<&Path>,
        body_path: Option<&Path>,
        profile: &LanguageProfile,
    ) -> Result<Self, RenderError> {
        let header = match header_path {
            Some(path) => FontFace::load(path, profile.header_font_px)?,
            None => FontFace::bitmap(profile.header_font_px),
        };
        let body = match body_path.or(header_path) {
            Some(path) => FontFace::load(path, profile.body_font_px)?,
            None => FontFace::bitmap(profile.body_font_px),
        };
        Ok(Self { header, body })
    }

    pub fn for_line(&self, line: &str, profile: &LanguageProfile) -> &FontFace {
        if profile.is_header(line) {
            &self.header
        } else {
            &self.body
        }
    }
}

/// Wrapped lines of one record plus their measured extent.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayBlock {
    pub lines: Vec<TextLine>,
    pub header_flags: Vec<bool>,
    pub size: BlockSize,
}

impl DisplayBlock {
    pub fn measure(lines: Vec<TextLine>, fonts: &FontSet, profile: &LanguageProfile) -> Self {
        let header_flags: Vec<bool> = lines.iter().map(|l| profile.is_header(l.as_str())).collect();
        let width = lines
            .iter()
            .map(|line| fonts.for_line(line.as_str(), profile).measure(line.as_str()))
            .max()
            .unwrap_or(0);
        let height = lines.len() as u32 * LINE_PITCH;
        Self {
            lines,
            header_flags,
            size: BlockSize::new(width, height),
        }
    }

    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(TextLine::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub struct Compositor<'a> {
    fonts: &'a FontSet,
    profile: &'a LanguageProfile,
}

impl<'a> Compositor<'a> {
    pub fn new(fonts: &'a FontSet, profile: &'a LanguageProfile) -> Self {
        Self { fonts, profile }
    }

    pub fn measure(&self, lines: Vec<TextLine>) -> DisplayBlock {
        DisplayBlock::measure(lines, self.fonts, self.profile)
    }

    /// Composites the block's panel onto the canvas and draws its text on top.
    pub fn draw(&self, canvas: RgbaImage, block: &DisplayBlock, position: Position) -> RgbaImage {
        let mut canvas = canvas;
        let overlay = panel_overlay(canvas.width(), canvas.height(), position, block.size);
        image::imageops::overlay(&mut canvas, &overlay, 0, 0);

        let mut y = position.y;
        for (line, is_header) in block.lines.iter().zip(&block.header_flags) {
            let face = if *is_header {
                &self.fonts.header
            } else {
                &self.fonts.body
            };
            face.draw(&mut canvas, position.x, y, line.as_str(), TEXT_COLOR);
            y += LINE_PITCH as i32;
        }
        canvas
    }
}

/// Transparent canvas-sized layer holding one rounded panel.
fn panel_overlay(width: u32, height: u32, position: Position, size: BlockSize) -> RgbaImage {
    let mut overlay = RgbaImage::new(width, height);
    if width == 0 || height == 0 {
        return overlay;
    }
    let (x0, y0, x1, y1) = panel_rect(position, size);
    let min_x = x0.clamp(0, width as i32 - 1);
    let max_x = x1.clamp(0, width as i32 - 1);
    let min_y = y0.clamp(0, height as i32 - 1);
    let max_y = y1.clamp(0, height as i32 - 1);
    for py in min_y..=max_y {
        for px in min_x..=max_x {
            if point_in_rounded_rect(px, py, x0, y0, x1 + 1, y1 + 1, PANEL_RADIUS) {
                overlay.put_pixel(px as u32, py as u32, PANEL_FILL);
            }
        }
    }
    overlay
}

fn point_in_rounded_rect(
    px: i32,
    py: i32,
    x0: i32,
    y0: i32,
    x1: i32,
    y1: i32,
    radius: f64,
) -> bool {
    if px < x0 || px >= x1 || py < y0 || py >= y1 {
        return false;
    }
    if radius <= 0.1 {
        return true;
    }
    let r = radius
        .min(f64::from((x1 - x0).abs()) / 2.0)
        .min(f64::from((y1 - y0).abs()) / 2.0);
    let fx = f64::from(px);
    let fy = f64::from(py);
    let left = f64::from(x0);
    let right = f64::from(x1);
    let top = f64::from(y0);
    let bottom = f64::from(y1);

    if (fx >= left + r && fx <= right - r) || (fy >= top + r && fy <= bottom - r) {
        return true;
    }

    let corners = [
        (left + r, top + r),
        (right - r, top + r),
        (left + r, bottom - r),
        (right - r, bottom - r),
    ];
    corners.iter().any(|(cx, cy)| {
        let dx = fx - cx;
        let dy = fy - cy;
        dx * dx + dy * dy <= r * r
    })
}

fn blend_pixel(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let a = f64::from(src[3]) / 255.0;
    if a <= 0.0 {
        return dst;
    }
    let inv = 1.0 - a;
    let mix = |d: u8, s: u8| (f64::from(d) * inv + f64::from(s) * a).round().clamp(0.0, 255.0) as u8;
    let out_a = (f64::from(dst[3]) * inv + f64::from(src[3]))
        .round()
        .clamp(0.0, 255.0) as u8;
    Rgba([mix(dst[0], src[0]), mix(dst[1], src[1]), mix(dst[2], src[2]), out_a])
}

fn draw_bitmap_text(img: &mut RgbaImage, x: i32, y: i32, text: &str, color: Rgba<u8>, scale: u32) {
    let scale_i = scale.max(1) as i32;
    let mut cursor_x = x;
    for ch in text.chars() {
        let glyph = BASIC_FONTS
            .get(ch)
            .or_else(|| LATIN_FONTS.get(ch))
            .or_else(|| BASIC_FONTS.get('?'));
        let Some(glyph) = glyph else {
            cursor_x += 8 * scale_i;
            continue;
        };
        for (row_idx, row) in glyph.iter().enumerate() {
            for col_idx in 0..8 {
                if (*row >> col_idx) & 1 == 0 {
                    continue;
                }
                let px = cursor_x + col_idx * scale_i;
                let py = y + row_idx as i32 * scale_i;
                for sy in 0..scale_i {
                    for sx in 0..scale_i {
                        let tx = px + sx;
                        let ty = py + sy;
                        if tx >= 0 && ty >= 0 && tx < img.width() as i32 && ty < img.height() as i32 {
                            let dst = *img.get_pixel(tx as u32, ty as u32);
                            img.put_pixel(tx as u32, ty as u32, blend_pixel(dst, color));
                        }
                    }
                }
            }
        }
        cursor_x += 8 * scale_i;
    }
}

/// Outlines every boxed hit on the canvas and returns how many were drawn.
pub fn draw_detection_boxes(canvas: &mut RgbaImage, hits: &[DetectionHit]) -> usize {
    let (width, height) = canvas.dimensions();
    if width == 0 || height == 0 {
        return 0;
    }
    let max_x = f64::from(width - 1);
    let max_y = f64::from(height - 1);
    let mut drawn = 0;
    for hit in hits {
        let Some([x0, y0, x1, y1]) = hit.pixel_box(width, height) else {
            continue;
        };
        let (x0, x1) = (x0.min(x1), x0.max(x1));
        let (y0, y1) = (y0.min(y1), y0.max(y1));
        let clamp = |v: f64, max: f64| v.round().clamp(0.0, max) as u32;
        draw_rect_outline(
            canvas,
            (clamp(x0, max_x), clamp(y0, max_y)),
            (clamp(x1, max_x), clamp(y1, max_y)),
            BOX_COLOR,
            BOX_THICKNESS,
        );
        drawn += 1;
    }
    debug!(boxes = drawn, "drew detection boxes");
    drawn
}

// Rings grow inward from the given corners.
fn draw_rect_outline(
    img: &mut RgbaImage,
    (x0, y0): (u32, u32),
    (x1, y1): (u32, u32),
    color: Rgba<u8>,
    thickness: u32,
) {
    for t in 0..thickness.max(1) {
        let tx0 = x0 + t;
        let ty0 = y0 + t;
        let tx1 = x1.saturating_sub(t);
        let ty1 = y1.saturating_sub(t);
        if tx0 > tx1 || ty0 > ty1 {
            break;
        }
        for xx in tx0..=tx1 {
            img.put_pixel(xx, ty0, color);
            img.put_pixel(xx, ty1, color);
        }
        for yy in ty0..=ty1 {
            img.put_pixel(tx0, yy, color);
            img.put_pixel(tx1, yy, color);
        }
    }
}

pub fn load_canvas(path: &Path) -> Result<RgbaImage, RenderError> {
    let img = image::open(path).map_err(|source| RenderError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), width = img.width(), height = img.height(), "loaded image");
    Ok(img.to_rgba8())
}

pub fn decode_canvas(bytes: &[u8]) -> Result<RgbaImage, RenderError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgba8())
        .map_err(|source| RenderError::Decode {
            path: PathBuf::from("<memory>"),
            source,
        })
}

/// Flattens the canvas to RGB and writes it in the format implied by the
/// extension. The file is encoded next to the target and renamed into place,
/// so a failed encode leaves no partial output behind.
pub fn save_canvas(canvas: RgbaImage, path: &Path) -> Result<(), RenderError> {
    let format = ImageFormat::from_path(path).map_err(|source| RenderError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| RenderError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("output");
    let partial = path.with_file_name(format!(".{file_name}.partial"));
    let rgb = DynamicImage::ImageRgba8(canvas).to_rgb8();
    if let Err(source) = rgb.save_with_format(&partial, format) {
        let _ = fs::remove_file(&partial);
        return Err(RenderError::Encode {
            path: path.to_path_buf(),
            source,
        });
    }
    fs::rename(&partial, path).map_err(|source| {
        let _ = fs::remove_file(&partial);
        RenderError::Io {
            path: path.to_path_buf(),
            source,
        }
    })?;
    info!(path = %path.display(), "saved annotated image");
    Ok(())
}
