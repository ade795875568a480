use std::fs;
use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::model::Detection;

/// Box and label-tag color.
pub const BOX_COLOR: Rgb<u8> = Rgb([0, 92, 255]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const STROKE_WIDTH: i32 = 2;
const FONT_SCALE: f32 = 16.0;
const TAG_PADDING: i32 = 2;

/// Common system font locations, tried in order.
const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/freefont/FreeSans.ttf",
];

enum LabelFace {
    Ttf(FontVec),
    /// Minimal 5x7 bitmap face used when no TTF can be loaded, so a missing
    /// system font never fails a request.
    Builtin,
}

/// Draws bounding boxes and label tags onto a copy of the input image.
/// The buffer used for inference is never mutated.
pub struct Annotator {
    face: LabelFace,
}

impl Annotator {
    /// Tries `font_path` first (when configured), then the system font
    /// candidates, then falls back to the built-in face.
    pub fn new(font_path: Option<&Path>) -> Self {
        let configured = font_path.map(Path::to_path_buf);
        let candidates = configured
            .iter()
            .map(|p| p.as_path())
            .chain(FONT_CANDIDATES.iter().map(Path::new));

        for path in candidates {
            match fs::read(path).ok().and_then(|bytes| FontVec::try_from_vec(bytes).ok()) {
                Some(font) => {
                    log::info!("annotator font: {}", path.display());
                    return Self {
                        face: LabelFace::Ttf(font),
                    };
                }
                None => continue,
            }
        }

        log::warn!("no usable TTF font found, labels will use the built-in bitmap face");
        Self {
            face: LabelFace::Builtin,
        }
    }

    #[cfg(test)]
    pub fn with_builtin_face() -> Self {
        Self {
            face: LabelFace::Builtin,
        }
    }

    pub fn annotate(&self, image: &RgbImage, detections: &[Detection]) -> RgbImage {
        let mut canvas = image.clone();
        for detection in detections {
            self.draw_detection(&mut canvas, detection);
        }
        canvas
    }

    fn draw_detection(&self, canvas: &mut RgbImage, detection: &Detection) {
        let (w, h) = (canvas.width() as i32, canvas.height() as i32);
        let [x1, y1, x2, y2] = detection.bbox;
        let (x1, y1) = (x1.floor() as i32, y1.floor() as i32);
        let (x2, y2) = ((x2.ceil() as i32).min(w), (y2.ceil() as i32).min(h));

        for inset in 0..STROKE_WIDTH {
            let bw = x2 - x1 - 2 * inset;
            let bh = y2 - y1 - 2 * inset;
            if bw <= 0 || bh <= 0 {
                break;
            }
            draw_hollow_rect_mut(
                canvas,
                Rect::at(x1 + inset, y1 + inset).of_size(bw as u32, bh as u32),
                BOX_COLOR,
            );
        }

        let label = format!("{} {:.2}", detection.class_name, detection.confidence);
        self.draw_label(canvas, &label, x1, y1);
    }

    /// Draws a filled tag sized to the measured text, immediately above the
    /// box's top-left corner. Tags are shifted to stay on-canvas: down to
    /// the image top when the box starts near the frame edge, left when the
    /// text would overrun the right edge.
    fn draw_label(&self, canvas: &mut RgbImage, label: &str, box_x: i32, box_y: i32) {
        let (w, h) = (canvas.width() as i32, canvas.height() as i32);
        let (text_w, text_h) = self.face.measure(label);
        let tag_w = (text_w + 2 * TAG_PADDING).min(w);
        let tag_h = (text_h + 2 * TAG_PADDING).min(h);
        if tag_w <= 0 || tag_h <= 0 {
            return;
        }

        let tag_x = box_x.clamp(0, w - tag_w);
        let tag_y = (box_y - tag_h).clamp(0, h - tag_h);

        draw_filled_rect_mut(
            canvas,
            Rect::at(tag_x, tag_y).of_size(tag_w as u32, tag_h as u32),
            BOX_COLOR,
        );
        self.face
            .draw(canvas, label, tag_x + TAG_PADDING, tag_y + TAG_PADDING);
    }
}

impl LabelFace {
    fn measure(&self, text: &str) -> (i32, i32) {
        match self {
            LabelFace::Ttf(font) => {
                let (tw, th) = text_size(PxScale::from(FONT_SCALE), font, text);
                (tw as i32, th.max(FONT_SCALE as u32) as i32)
            }
            LabelFace::Builtin => (
                text.chars().count() as i32 * builtin::ADVANCE,
                builtin::LINE_HEIGHT,
            ),
        }
    }

    fn draw(&self, canvas: &mut RgbImage, text: &str, x: i32, y: i32) {
        match self {
            LabelFace::Ttf(font) => {
                draw_text_mut(
                    canvas,
                    TEXT_COLOR,
                    x,
                    y,
                    PxScale::from(FONT_SCALE),
                    font,
                    text,
                );
            }
            LabelFace::Builtin => builtin::draw_text(canvas, TEXT_COLOR, x, y, text),
        }
    }
}

/// A 5x7 bitmap face covering the characters that appear in labels
/// (class names, digits, separators). Rendered at a fixed 2x pixel scale.
mod builtin {
    use image::{Rgb, RgbImage};

    const GLYPH_ROWS: usize = 7;
    const GLYPH_COLS: i32 = 5;
    const PIXEL: i32 = 2;
    pub const ADVANCE: i32 = (GLYPH_COLS + 1) * PIXEL;
    pub const LINE_HEIGHT: i32 = GLYPH_ROWS as i32 * PIXEL;

    /// Rows top to bottom, low 5 bits used, MSB is the left column.
    fn glyph(c: char) -> Option<[u8; GLYPH_ROWS]> {
        let rows = match c.to_ascii_uppercase() {
            ' ' => [0x00; 7],
            'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
            'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
            'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
            'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
            'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
            'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
            'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0E],
            'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
            'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
            'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
            'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
            'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
            'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
            'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
            'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
            'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
            'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
            'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
            'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
            'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
            'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
            'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
            'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x1B, 0x11],
            'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
            'Y' => [0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x04],
            'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
            '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
            '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
            '2' => [0x0E, 0x11, 0x01, 0x06, 0x08, 0x10, 0x1F],
            '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
            '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
            '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
            '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
            '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
            '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
            '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
            '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
            '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
            '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
            _ => return None,
        };
        Some(rows)
    }

    pub fn draw_text(canvas: &mut RgbImage, color: Rgb<u8>, x: i32, y: i32, text: &str) {
        let (w, h) = (canvas.width() as i32, canvas.height() as i32);
        let mut pen_x = x;
        for c in text.chars() {
            if let Some(rows) = glyph(c) {
                for (row_idx, row) in rows.iter().enumerate() {
                    for col in 0..GLYPH_COLS {
                        if row & (1 << (GLYPH_COLS - 1 - col)) == 0 {
                            continue;
                        }
                        for dy in 0..PIXEL {
                            for dx in 0..PIXEL {
                                let px = pen_x + col * PIXEL + dx;
                                let py = y + row_idx as i32 * PIXEL + dy;
                                if px >= 0 && px < w && py >= 0 && py < h {
                                    canvas.put_pixel(px as u32, py as u32, color);
                                }
                            }
                        }
                    }
                }
            }
            pen_x += ADVANCE;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Detection;

    fn detection(bbox: [f32; 4]) -> Detection {
        Detection {
            class_id: 16,
            class_name: "dog".into(),
            confidence: 0.87,
            bbox,
        }
    }

    fn gray_image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([128, 128, 128]))
    }

    #[test]
    fn annotate_never_mutates_the_input() {
        let annotator = Annotator::with_builtin_face();
        let input = gray_image(320, 240);
        let before = input.clone();

        let output = annotator.annotate(&input, &[detection([40.0, 60.0, 200.0, 180.0])]);

        assert_eq!(input.as_raw(), before.as_raw());
        assert_eq!(output.dimensions(), input.dimensions());
        assert_ne!(output.as_raw(), input.as_raw());
    }

    #[test]
    fn empty_detections_yield_an_identical_copy() {
        let annotator = Annotator::with_builtin_face();
        let input = gray_image(64, 48);
        let output = annotator.annotate(&input, &[]);
        assert_eq!(output.as_raw(), input.as_raw());
    }

    #[test]
    fn box_outline_is_drawn_at_bbox_coordinates() {
        let annotator = Annotator::with_builtin_face();
        let input = gray_image(320, 240);
        let output = annotator.annotate(&input, &[detection([40.0, 60.0, 200.0, 180.0])]);

        assert_eq!(*output.get_pixel(40, 120), BOX_COLOR); // left edge
        assert_eq!(*output.get_pixel(120, 179), BOX_COLOR); // bottom edge
        assert_eq!(*output.get_pixel(120, 120), Rgb([128, 128, 128])); // interior untouched
    }

    #[test]
    fn label_tag_sits_above_the_box() {
        let annotator = Annotator::with_builtin_face();
        let input = gray_image(320, 240);
        let output = annotator.annotate(&input, &[detection([40.0, 60.0, 200.0, 180.0])]);

        // Tag top-left corner is filled with the box color.
        assert_eq!(*output.get_pixel(40, 42), BOX_COLOR);
    }

    #[test]
    fn tag_is_clamped_when_the_box_touches_the_top_edge() {
        let annotator = Annotator::with_builtin_face();
        let input = gray_image(320, 240);
        let output = annotator.annotate(&input, &[detection([40.0, 2.0, 200.0, 100.0])]);

        // No room above the box: the tag sits at the image top instead of
        // drawing off-canvas.
        assert_eq!(output.dimensions(), (320, 240));
        assert_eq!(*output.get_pixel(40, 0), BOX_COLOR);
    }

    #[test]
    fn tag_is_shifted_left_at_the_right_edge() {
        let annotator = Annotator::with_builtin_face();
        let input = gray_image(120, 120);
        let output = annotator.annotate(&input, &[detection([100.0, 50.0, 119.0, 110.0])]);

        // The rightmost column stays inside the frame; the tag starts
        // left of the box corner.
        assert_eq!(*output.get_pixel(119, 40), BOX_COLOR);
    }
}
