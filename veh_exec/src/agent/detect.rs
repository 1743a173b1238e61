//! # Line detection
//!
//! Scans a single image column for pixels inside a colour box.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use image::{imageops::FilterType, Rgb, RgbImage};

use super::params::Params;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Fewest matching rows for the line to count as detected.
pub const MIN_LINE_ROWS: usize = 3;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Inclusive RGB box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColourBox {
    pub r: (u8, u8),
    pub g: (u8, u8),
    pub b: (u8, u8),
}

/// Result of scanning a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Rows of the scanned column matching the colour box, top to bottom
    pub rows: Vec<u32>,

    /// Height of the scanned image
    pub height: u32,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ColourBox {
    pub fn from_params(params: &Params) -> Self {
        Self {
            r: (params.r_min, params.r_max),
            g: (params.g_min, params.g_max),
            b: (params.b_min, params.b_max),
        }
    }

    pub fn contains(&self, px: &Rgb<u8>) -> bool {
        let in_range = |v: u8, (lo, hi): (u8, u8)| v >= lo && v <= hi;

        in_range(px[0], self.r) && in_range(px[1], self.g) && in_range(px[2], self.b)
    }

    /// True if no colour can possibly match.
    pub fn is_empty(&self) -> bool {
        self.r.0 > self.r.1 || self.g.0 > self.g.1 || self.b.0 > self.b.1
    }
}

impl Detection {
    /// The line is detected if enough rows matched.
    pub fn is_found(&self) -> bool {
        self.rows.len() >= MIN_LINE_ROWS
    }

    /// Mean of the matched rows.
    pub fn avg_row(&self) -> Option<f32> {
        if self.rows.is_empty() {
            return None;
        }

        Some(self.rows.iter().map(|r| *r as f32).sum::<f32>() / self.rows.len() as f32)
    }

    /// Signed distance of the line from the middle row, positive when the line is above the
    /// middle of the image.
    pub fn lateral_error(&self) -> Option<f32> {
        self.avg_row().map(|avg| self.height as f32 / 2.0 - avg)
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Scan the column `width - column_offset` from top to bottom.
///
/// An offset placing the column outside of the image produces no rows.
pub fn scan_column(image: &RgbImage, column_offset: u32, colour: &ColourBox) -> Detection {
    let height = image.height();

    let rows = match image.width().checked_sub(column_offset) {
        Some(col) if col < image.width() => (0..height)
            .filter(|row| colour.contains(image.get_pixel(col, *row)))
            .collect(),
        _ => Vec::new(),
    };

    Detection { rows, height }
}

/// Resize the image to the given width, keeping its aspect ratio.
///
/// Returns `None` if the image already has that width.
pub fn resize_to_width(image: &RgbImage, width: u32) -> Option<RgbImage> {
    if width == 0 || image.width() == 0 || image.width() == width {
        return None;
    }

    let height = ((image.height() as f64) * (width as f64) / (image.width() as f64))
        .round()
        .max(1.0) as u32;

    Some(image::imageops::resize(
        image,
        width,
        height,
        FilterType::Triangle,
    ))
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    pub const LINE: Rgb<u8> = Rgb([220, 220, 40]);
    pub const GROUND: Rgb<u8> = Rgb([40, 40, 40]);

    /// Image with the line covering `rows` of the column `width - offset`.
    pub fn line_image(width: u32, height: u32, offset: u32, rows: std::ops::Range<u32>) -> RgbImage {
        let mut img = RgbImage::from_pixel(width, height, GROUND);
        for row in rows {
            img.put_pixel(width - offset, row, LINE);
        }
        img
    }

    fn colour() -> ColourBox {
        ColourBox::from_params(&Params::default())
    }

    #[test]
    fn test_scan_column() {
        let img = line_image(64, 48, 10, 10..14);
        let det = scan_column(&img, 10, &colour());

        assert_eq!(det.rows, vec![10, 11, 12, 13]);
        assert!(det.is_found());
        assert_eq!(det.avg_row(), Some(11.5));
        assert_eq!(det.lateral_error(), Some(12.5));

        // Neighbouring column sees nothing
        assert!(!scan_column(&img, 11, &colour()).is_found());
    }

    #[test]
    fn test_too_few_rows() {
        let img = line_image(64, 48, 10, 20..22);
        let det = scan_column(&img, 10, &colour());

        assert_eq!(det.rows.len(), 2);
        assert!(!det.is_found());
    }

    #[test]
    fn test_column_out_of_range() {
        let img = line_image(64, 48, 10, 0..48);

        assert!(scan_column(&img, 0, &colour()).rows.is_empty());
        assert!(scan_column(&img, 65, &colour()).rows.is_empty());
        assert_eq!(scan_column(&img, 64, &colour()).rows.len(), 0);
    }

    #[test]
    fn test_resize_keeps_aspect() {
        let img = RgbImage::from_pixel(640, 480, GROUND);

        let small = resize_to_width(&img, 256).unwrap();
        assert_eq!((small.width(), small.height()), (256, 192));

        assert!(resize_to_width(&img, 640).is_none());
    }

    #[test]
    fn test_colour_box() {
        let c = colour();
        assert!(c.contains(&Rgb([180, 255, 140])));
        assert!(!c.contains(&Rgb([179, 255, 140])));
        assert!(!c.contains(&Rgb([200, 200, 141])));
        assert!(!c.is_empty());
    }
}
