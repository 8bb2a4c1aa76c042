use image::imageops::FilterType;
use image::{DynamicImage, RgbaImage};
use serde::{Deserialize, Serialize};

/// ESC/POS Commands (byte sequences)
const ESC: u8 = 0x1b;
const GS: u8 = 0x1d;
const LF: u8 = 0x0a;

/// Rows per GS v 0 block; some printers reject taller single blocks
pub const RASTER_BAND_ROWS: u32 = 256;

/// Paper width configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaperWidth {
    #[serde(rename = "58mm")]
    Width58mm,
    #[serde(rename = "80mm")]
    Width80mm,
}

impl PaperWidth {
    /// Printable width in dots at 203 dpi
    pub fn dots(self) -> u32 {
        match self {
            PaperWidth::Width58mm => 384,
            PaperWidth::Width80mm => 576,
        }
    }
}

/// Text alignment
#[derive(Debug, Clone, Copy)]
pub enum Alignment {
    Left = 0,
    Center = 1,
    Right = 2,
}

/// Character code page for international characters
#[derive(Debug, Clone, Copy)]
pub enum CodePage {
    PC437USA = 0,
    PC850Multilingual = 2,
    PC857Turkish = 13,
    WPC1252Latin1 = 16,
    PC858Euro = 19,
}

/// ESC/POS Command Builder
pub struct ESCPOSBuilder {
    buffer: Vec<u8>,
}

impl ESCPOSBuilder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Get the built command buffer
    pub fn build(self) -> Vec<u8> {
        self.buffer
    }

    /// Initialize printer
    pub fn initialize(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x40]);
        self
    }

    /// Add line feed
    pub fn feed(&mut self, lines: u8) -> &mut Self {
        for _ in 0..lines {
            self.buffer.push(LF);
        }
        self
    }

    /// Set alignment (applies to raster images as well as text)
    pub fn align(&mut self, alignment: Alignment) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x61, alignment as u8]);
        self
    }

    pub fn code_page(&mut self, page: CodePage) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x74, page as u8]);
        self
    }

    /// Print raster bit image (monochrome bitmap)
    ///
    /// Converts to a 1-bit bitmap and sends via GS v 0 in bands of
    /// `RASTER_BAND_ROWS`. Images wider than `max_width` are scaled down.
    /// Transparent pixels print as paper (white).
    pub fn raster_image(&mut self, img: &DynamicImage, max_width: u32) -> &mut Self {
        let rgba = img.to_rgba8();
        let (orig_width, orig_height) = rgba.dimensions();
        if orig_width == 0 || orig_height == 0 {
            return self;
        }

        let resized: RgbaImage = if orig_width > max_width {
            let scale = max_width as f32 / orig_width as f32;
            let height = ((orig_height as f32 * scale) as u32).max(1);
            image::imageops::resize(&rgba, max_width, height, FilterType::Triangle)
        } else {
            rgba
        };

        let (width, height) = resized.dimensions();
        let byte_width = width.div_ceil(8);

        let mut band_start = 0;
        while band_start < height {
            let rows = RASTER_BAND_ROWS.min(height - band_start);

            // GS v 0, m=0 (normal size)
            self.buffer.extend_from_slice(&[GS, 0x76, 0x30, 0x00]);
            self.buffer.push((byte_width & 0xff) as u8); // xL
            self.buffer.push((byte_width >> 8) as u8); // xH
            self.buffer.push((rows & 0xff) as u8); // yL
            self.buffer.push((rows >> 8) as u8); // yH

            for y in band_start..band_start + rows {
                for bx in 0..byte_width {
                    let mut byte_val = 0u8;
                    for bit in 0..8u32 {
                        let x = bx * 8 + bit;
                        if x < width && is_dark(resized.get_pixel(x, y).0) {
                            byte_val |= 1 << (7 - bit);
                        }
                    }
                    self.buffer.push(byte_val);
                }
            }

            band_start += rows;
        }

        self
    }

    /// Cut paper
    pub fn cut(&mut self, partial: bool) -> &mut Self {
        self.feed(3); // Feed before cut
        self.buffer.extend_from_slice(&[GS, 0x56, if partial { 1 } else { 0 }]);
        self
    }

    /// Sound the buzzer: `times` beeps of `duration` x 100ms (ESC B n t)
    pub fn beep(&mut self, times: u8, duration: u8) -> &mut Self {
        self.buffer
            .extend_from_slice(&[ESC, 0x42, times.clamp(1, 9), duration.clamp(1, 9)]);
        self
    }
}

impl Default for ESCPOSBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Black if opaque enough and darker than mid-grey
fn is_dark([r, g, b, a]: [u8; 4]) -> bool {
    if a < 128 {
        return false;
    }
    let luma = (299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000;
    luma < 128
}

/// Format one image job: image, then cut, then beep, as a single stream.
pub fn format_image_receipt(img: &DynamicImage, paper_width: PaperWidth) -> Vec<u8> {
    let mut builder = ESCPOSBuilder::new();

    builder
        .initialize()
        .code_page(CodePage::PC857Turkish)
        .align(Alignment::Center)
        .raster_image(img, paper_width.dots())
        .align(Alignment::Left)
        .cut(false)
        .beep(3, 2);

    builder.build()
}
